use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::platform::OsFamily;

/// cilpatch - inject plugin assemblies into a Unity game's startup
#[derive(Debug, Parser)]
#[command(name = "cilpatch", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOptions,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared across all subcommands.
#[derive(Debug, Parser)]
pub struct GlobalOptions {
    /// Emit output as JSON instead of human-readable text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable verbose (debug-level) logging output.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Patch the game's Assembly-CSharp.dll so it loads extra assemblies on startup.
    Patch {
        /// Game installation directory.
        #[arg(value_name = "INSTALL_DIR")]
        install_dir: PathBuf,

        /// Platform layout of the installation (defaults to the current OS).
        #[arg(long, value_enum)]
        os: Option<OsFamily>,

        /// Assembly to load on startup; repeat for several (defaults to the standard set).
        #[arg(long = "assembly", value_name = "NAME")]
        assembly: Vec<String>,

        /// Where to write the patched assembly (defaults to Assembly-CSharp.mod.dll next to the input).
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Print the target method's instructions and mark the patch anchors.
    Disasm {
        /// Path to the .NET assembly file.
        #[arg(value_name = "FILE")]
        path: PathBuf,

        /// Type that holds the method.
        #[arg(long = "type", value_name = "NAME", default_value = "Starter")]
        r#type: String,

        /// Method to disassemble.
        #[arg(long, value_name = "NAME", default_value = "Awake")]
        method: String,
    },
}
