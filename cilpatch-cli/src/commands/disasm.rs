use std::path::Path;

use anyhow::{bail, Context};
use cilpatch::{patch::locator, Module, PatchConfig};
use log::warn;
use serde::Serialize;

use crate::{
    app::GlobalOptions,
    output::{print_output, Align, TabWriter},
};

#[derive(Debug, Serialize)]
pub struct Listing {
    pub method: String,
    pub max_stack: u16,
    pub instructions: Vec<Line>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Line {
    pub index: usize,
    pub instruction: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor: Option<&'static str>,
}

pub fn run(
    path: &Path,
    type_name: &str,
    method_name: &str,
    opts: &GlobalOptions,
) -> anyhow::Result<()> {
    let module = Module::from_file(path)
        .with_context(|| format!("failed to load assembly: {}", path.display()))?;

    let Some(ty) = module
        .types()
        .find(|ty| !ty.is_nested && (ty.name == type_name || ty.full_name() == type_name))
    else {
        bail!("no type named '{type_name}' found");
    };

    let Some((method, body)) = ty
        .methods
        .iter()
        .filter(|method| method.name == method_name)
        .find_map(|method| method.body().map(|body| (method, body)))
    else {
        bail!("no method '{type_name}::{method_name}' with a body found");
    };

    let config = PatchConfig::default();
    let anchors = locator::locate(
        &body.instructions,
        &config.injection_member,
        &config.array_size_member,
    );
    let anchor_error = anchors.as_ref().err().map(ToString::to_string);
    if let Some(error) = &anchor_error {
        warn!("Anchors not found: {error}");
    }

    let instructions = body
        .instructions
        .iter()
        .enumerate()
        .map(|(index, (id, instruction))| Line {
            index,
            instruction: instruction.to_string(),
            anchor: match &anchors {
                Ok(anchors) if anchors.injection == id => Some("injection"),
                Ok(anchors) if anchors.array_size == id => Some("array size"),
                _ => None,
            },
        })
        .collect();

    let listing = Listing {
        method: format!("{}::{} ({})", ty.full_name(), method.name, method.token),
        max_stack: body.max_stack,
        instructions,
        anchor_error,
    };

    print_output(&listing, opts, |listing| {
        println!("{} maxstack {}", listing.method, listing.max_stack);
        let mut table = TabWriter::new(vec![
            ("#", Align::Right),
            ("Instruction", Align::Left),
            ("Anchor", Align::Left),
        ]);
        for line in &listing.instructions {
            table.row(vec![
                line.index.to_string(),
                line.instruction.clone(),
                line.anchor.unwrap_or_default().to_string(),
            ]);
        }
        table.print();
    })
}
