//! Grows a statically sized `string[]` literal inside a method and fills the new slots.
//!
//! A run finds the target type and method, locates the two anchors with
//! [`locator::locate`], and rewrites the body with an [`InjectionPlan`]. [`patch_file`]
//! wraps this with reading and writing through a [`ModuleStore`].
//!
//! # Examples
//!
//! ```rust,no_run
//! use cilpatch::{patch_file, PatchConfig, PeStore};
//! use std::path::Path;
//!
//! let report = patch_file(
//!     &PeStore,
//!     Path::new("Cities_Data/Managed/Assembly-CSharp.dll"),
//!     Path::new("Cities_Data/Managed/Assembly-CSharp.mod.dll"),
//!     &PatchConfig::default(),
//! )?;
//! println!("{report}");
//! # Ok::<(), cilpatch::Error>(())
//! ```

mod config;
pub mod locator;
mod patcher;

pub use config::PatchConfig;
pub use locator::Anchors;
pub use patcher::{InjectionPlan, PatchOutcome, STORE_SEQUENCE_LEN, STORE_STACK_DEPTH};

use std::{fmt, path::Path};

use log::info;

use crate::{
    metadata::token::Token,
    module::{Module, ModuleStore},
    Error::{InputNotFound, MethodNotFound, TypeNotFound},
    Result,
};

/// Summary of a successful patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchReport {
    /// Full name of the patched type
    pub type_name: String,
    /// Name of the patched method
    pub method_name: String,
    /// Token of the patched method
    pub method_token: Token,
    /// Array size before the patch
    pub previous_size: i32,
    /// Array size after the patch
    pub array_size: i32,
    /// Number of inserted instructions
    pub inserted: usize,
    /// Stack bound after the patch
    pub max_stack: u16,
}

impl fmt::Display for PatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}::{} ({}): array size {} -> {}, {} instructions inserted",
            self.type_name,
            self.method_name,
            self.method_token,
            self.previous_size,
            self.array_size,
            self.inserted
        )
    }
}

/// Patch the target method of `module` in memory.
///
/// # Errors
/// - [`crate::Error::TypeNotFound`] unless exactly one top-level type has the name
/// - [`crate::Error::MethodNotFound`] unless exactly one of its methods with a body has
///   the name
/// - any locator or patcher error
pub fn patch_module(module: &mut Module, config: &PatchConfig) -> Result<PatchReport> {
    let type_matches: Vec<usize> = module
        .types
        .iter()
        .enumerate()
        .filter(|(_, ty)| {
            !ty.is_nested && (ty.name == config.type_name || ty.full_name() == config.type_name)
        })
        .map(|(index, _)| index)
        .collect();

    let [type_index] = type_matches[..] else {
        return Err(TypeNotFound {
            name: config.type_name.clone(),
            matches: type_matches.len(),
        });
    };

    let ty = &mut module.types[type_index];
    let type_name = ty.full_name();
    info!("Found type {}", type_name);

    let method_matches: Vec<usize> = ty
        .methods
        .iter()
        .enumerate()
        .filter(|(_, method)| method.name == config.method_name && method.body().is_some())
        .map(|(index, _)| index)
        .collect();

    let [method_index] = method_matches[..] else {
        return Err(MethodNotFound {
            type_name,
            name: config.method_name.clone(),
            matches: method_matches.len(),
        });
    };

    let method = &mut ty.methods[method_index];
    info!("Found method {} ({})", method.name, method.token);

    let Some(body) = method.body() else {
        return Err(MethodNotFound {
            type_name,
            name: config.method_name.clone(),
            matches: 0,
        });
    };

    let anchors = locator::locate(
        &body.instructions,
        &config.injection_member,
        &config.array_size_member,
    )?;
    info!(
        "Injection point: instruction {} before 'call {}'",
        body.instructions.position(anchors.injection).unwrap_or_default(),
        config.injection_member
    );
    info!(
        "Array size: instruction {} after 'call {}'",
        body.instructions.position(anchors.array_size).unwrap_or_default(),
        config.array_size_member
    );

    let plan = InjectionPlan::new(&config.entries, anchors);
    plan.check(body)?;

    let method_token = method.token;
    let method_name = method.name.clone();
    let Some(body) = method.body_mut() else {
        return Err(MethodNotFound {
            type_name,
            name: config.method_name.clone(),
            matches: 0,
        });
    };

    let outcome = plan.apply(body)?;
    info!(
        "Resized array from {} to {}",
        outcome.previous_size, outcome.array_size
    );
    for entry in &config.entries {
        info!("Added reference {}", entry);
    }

    Ok(PatchReport {
        type_name,
        method_name,
        method_token,
        previous_size: outcome.previous_size,
        array_size: outcome.array_size,
        inserted: outcome.inserted,
        max_stack: outcome.max_stack,
    })
}

/// Read `input`, patch it and write the result to `output`.
///
/// Nothing is written unless every step succeeds.
///
/// # Errors
/// Returns [`crate::Error::InputNotFound`] if `input` is not an existing file, any error of
/// [`patch_module`], or any error of the store.
pub fn patch_file(
    store: &dyn ModuleStore,
    input: &Path,
    output: &Path,
    config: &PatchConfig,
) -> Result<PatchReport> {
    if !input.is_file() {
        return Err(InputNotFound(input.to_path_buf()));
    }

    info!("Reading assembly {}", input.display());
    let mut module = store.read(input)?;
    if let Some(assembly) = &module.assembly {
        info!("Loaded {}", assembly);
    }

    let report = patch_module(&mut module, config)?;

    info!("Writing {}", output.display());
    store.write(&module, output)?;

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::{Instruction, InstructionList, OpCode, Operand},
        metadata::method::MethodBody,
        module::{MethodDef, TypeDef},
        test::{call, MemoryStore},
    };

    fn awake_body() -> MethodBody {
        let mut list = InstructionList::new();
        list.push(call("SetAdditionalAssemblies"));
        list.push(call("add_eventLogMessage"));
        list.push(Instruction::ldc_i4(0));

        MethodBody {
            max_stack: 2,
            local_var_sig_token: Token::new(0),
            init_locals: false,
            instructions: list,
            exception_handlers: Vec::new(),
        }
    }

    fn module() -> Module {
        let mut starter = TypeDef::new(Token::new(0x0200_0002), "", "Starter");
        starter
            .methods
            .push(MethodDef::new(Token::new(0x0600_0001), "Awake", Some(awake_body())));
        starter
            .methods
            .push(MethodDef::new(Token::new(0x0600_0002), "Awake", None));

        let mut module = Module::new("Assembly-CSharp.dll");
        module.types.push(TypeDef::new(Token::new(0x0200_0001), "", "<Module>"));
        module.types.push(starter);
        module
    }

    #[test]
    fn patches_in_memory() {
        let mut module = module();
        let config = PatchConfig::default().with_entries(["A.dll", "B.dll"]);

        let report = patch_module(&mut module, &config).unwrap();
        assert_eq!(report.type_name, "Starter");
        assert_eq!(report.method_token, Token::new(0x0600_0001));
        assert_eq!(report.array_size, 3);
        assert_eq!(report.inserted, 8);
        assert_eq!(report.max_stack, 5);
        assert_eq!(module.modified_methods().count(), 1);
        assert_eq!(
            report.to_string(),
            "Starter::Awake (0x06000001): array size 0 -> 3, 8 instructions inserted"
        );
    }

    #[test]
    fn full_type_name() {
        let mut module = module();
        module.types[1].namespace = "ColossalFramework".to_string();

        let config = PatchConfig::default().with_type_name("ColossalFramework.Starter");
        assert!(patch_module(&mut module, &config).is_ok());
    }

    #[test]
    fn type_lookup() {
        let mut module = module();
        let config = PatchConfig::default().with_type_name("Loader");
        assert!(matches!(
            patch_module(&mut module, &config),
            Err(TypeNotFound { matches: 0, .. })
        ));

        // Nested types do not count
        let mut nested = TypeDef::new(Token::new(0x0200_0003), "", "Starter");
        nested.is_nested = true;
        module.types.push(nested);
        assert!(patch_module(&mut module, &PatchConfig::default()).is_ok());

        let mut module = self::module();
        module.types.push(TypeDef::new(Token::new(0x0200_0003), "Other", "Starter"));
        assert!(matches!(
            patch_module(&mut module, &PatchConfig::default()),
            Err(TypeNotFound { matches: 2, .. })
        ));
    }

    #[test]
    fn method_lookup() {
        let mut module = module();
        let config = PatchConfig::default().with_method_name("Start");
        assert!(matches!(
            patch_module(&mut module, &config),
            Err(MethodNotFound { matches: 0, .. })
        ));

        module.types[1]
            .methods
            .push(MethodDef::new(Token::new(0x0600_0003), "Awake", Some(awake_body())));
        assert!(matches!(
            patch_module(&mut module, &PatchConfig::default()),
            Err(MethodNotFound { matches: 2, .. })
        ));
    }

    #[test]
    fn anchor_failure_leaves_module_unmodified() {
        let mut module = module();
        let config = PatchConfig::default().with_injection_member("Missing");

        assert!(patch_module(&mut module, &config).is_err());
        assert_eq!(module.modified_methods().count(), 0);

        let mut shape = awake_body();
        let size = shape.instructions.id_at(2).unwrap();
        shape
            .instructions
            .replace(size, Instruction::new(OpCode::LDNULL))
            .unwrap();
        let mut module = self::module();
        module.types[1].methods[0] =
            MethodDef::new(Token::new(0x0600_0001), "Awake", Some(shape));
        assert!(matches!(
            patch_module(&mut module, &PatchConfig::default()),
            Err(crate::Error::UnexpectedAnchorShape { .. })
        ));
        assert_eq!(module.modified_methods().count(), 0);

        let mut branching = awake_body();
        let injection = branching.instructions.id_at(0).unwrap();
        branching
            .instructions
            .insert_before(
                injection,
                vec![Instruction::with_operand(OpCode::BR_S, Operand::Target(injection))],
            )
            .unwrap();
        let mut module = self::module();
        module.types[1].methods[0] =
            MethodDef::new(Token::new(0x0600_0001), "Awake", Some(branching));
        assert!(matches!(
            patch_module(&mut module, &PatchConfig::default()),
            Err(crate::Error::UnsafeInsertionPoint(_))
        ));
        assert_eq!(module.modified_methods().count(), 0);
    }

    #[test]
    fn missing_input() {
        let store = MemoryStore::with_module("in.dll", module());

        let report = patch_file(
            &store,
            Path::new("in.dll"),
            Path::new("out.dll"),
            &PatchConfig::default(),
        );
        // The in-memory input path does not exist on disk
        assert!(matches!(report, Err(InputNotFound(_))));
        assert!(store.written().is_empty());
    }

    #[test]
    fn directory_input() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::with_module(dir.path(), module());

        let report = patch_file(
            &store,
            dir.path(),
            &dir.path().join("out.dll"),
            &PatchConfig::default(),
        );
        assert!(matches!(report, Err(InputNotFound(_))));
        assert!(store.written().is_empty());
    }

    #[test]
    fn file_through_store() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.dll");
        std::fs::write(&input, b"placeholder").unwrap();
        let output = dir.path().join("out.dll");

        let store = MemoryStore::with_module(&input, module());
        let report = patch_file(&store, &input, &output, &PatchConfig::default()).unwrap();

        assert_eq!(report.array_size, 3);
        assert_eq!(store.written(), [output]);
    }
}
