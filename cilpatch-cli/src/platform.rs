//! Where the game keeps its managed assemblies on each platform.

use std::path::{Path, PathBuf};

use clap::ValueEnum;
use log::warn;

/// File name of the game's main managed assembly.
pub const GAME_ASSEMBLY: &str = "Assembly-CSharp.dll";
/// File name of the patched copy written next to it.
pub const PATCHED_ASSEMBLY: &str = "Assembly-CSharp.mod.dll";

/// Operating system families with a known installation layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OsFamily {
    Windows,
    Linux,
    Macos,
}

impl OsFamily {
    /// The family of the running system. Unknown systems fall back to the Linux layout.
    pub fn current() -> OsFamily {
        Self::from_os_name(std::env::consts::OS).unwrap_or_else(|| {
            warn!(
                "Unsupported operating system '{}', assuming the Linux layout",
                std::env::consts::OS
            );
            OsFamily::Linux
        })
    }

    fn from_os_name(name: &str) -> Option<OsFamily> {
        match name {
            "windows" => Some(OsFamily::Windows),
            "linux" => Some(OsFamily::Linux),
            "macos" => Some(OsFamily::Macos),
            _ => None,
        }
    }

    /// Data directory relative to the installation directory.
    pub fn data_dir(self) -> &'static [&'static str] {
        match self {
            OsFamily::Windows | OsFamily::Linux => &["Cities_Data"],
            OsFamily::Macos => &["Cities.app", "Contents", "Resources", "Data"],
        }
    }
}

/// Paths of one game installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameLayout {
    /// The `Managed` directory holding the game's assemblies
    pub managed: PathBuf,
}

impl GameLayout {
    pub fn new(install_dir: &Path, os: OsFamily) -> Self {
        let mut managed = install_dir.to_path_buf();
        managed.extend(os.data_dir());
        managed.push("Managed");
        GameLayout { managed }
    }

    pub fn game_assembly(&self) -> PathBuf {
        self.managed.join(GAME_ASSEMBLY)
    }

    pub fn patched_assembly(&self) -> PathBuf {
        self.managed.join(PATCHED_ASSEMBLY)
    }
}
