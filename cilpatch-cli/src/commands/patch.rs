use std::path::Path;

use anyhow::{bail, Context};
use cilpatch::{patch_file, PatchConfig, PatchReport, PeStore};
use serde::Serialize;

use crate::{
    app::GlobalOptions,
    output::print_output,
    platform::{GameLayout, OsFamily},
};

#[derive(Debug, Serialize)]
pub struct PatchSummary {
    pub input: String,
    pub output: String,
    pub method: String,
    pub method_token: String,
    pub previous_size: i32,
    pub array_size: i32,
    pub inserted: usize,
    pub max_stack: u16,
    pub entries: Vec<String>,
}

impl PatchSummary {
    fn new(input: &Path, output: &Path, report: &PatchReport, config: &PatchConfig) -> Self {
        PatchSummary {
            input: input.display().to_string(),
            output: output.display().to_string(),
            method: format!("{}::{}", report.type_name, report.method_name),
            method_token: report.method_token.to_string(),
            previous_size: report.previous_size,
            array_size: report.array_size,
            inserted: report.inserted,
            max_stack: report.max_stack,
            entries: config.entries.clone(),
        }
    }
}

pub fn run(
    install_dir: &Path,
    os: Option<OsFamily>,
    assemblies: &[String],
    output: Option<&Path>,
    opts: &GlobalOptions,
) -> anyhow::Result<()> {
    if !install_dir.is_dir() {
        bail!("directory '{}' does not exist", install_dir.display());
    }

    let layout = GameLayout::new(install_dir, os.unwrap_or_else(OsFamily::current));
    let input = layout.game_assembly();
    if !input.is_file() {
        bail!(
            "Assembly-CSharp.dll not found at '{}'; pass the game installation directory (steamapps/common/Cities_Skylines)",
            input.display()
        );
    }

    let output = output.map_or_else(|| layout.patched_assembly(), Path::to_path_buf);

    let mut config = PatchConfig::default();
    if !assemblies.is_empty() {
        config = config.with_entries(assemblies.iter().cloned());
    }

    let report = patch_file(&PeStore, &input, &output, &config)
        .with_context(|| format!("failed to patch {}", input.display()))?;

    let summary = PatchSummary::new(&input, &output, &report, &config);
    print_output(&summary, opts, |summary| {
        println!("{report}");
        println!("Wrote {}", summary.output);
    })
}
