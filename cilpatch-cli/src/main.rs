mod app;
mod commands;
mod output;
mod platform;

use clap::Parser;

use crate::app::{Cli, Command};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Show cilpatch info+ on stderr unless --json; --verbose enables debug; RUST_LOG overrides
    if !cli.global.json {
        let level = if cli.global.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        };
        env_logger::Builder::new()
            .filter_module("cilpatch", level)
            .parse_default_env()
            .target(env_logger::Target::Stderr)
            .format_timestamp(None)
            .format_module_path(false)
            .format_target(false)
            .init();
    }

    match &cli.command {
        Command::Patch {
            install_dir,
            os,
            assembly,
            output,
        } => commands::patch::run(
            install_dir,
            *os,
            assembly,
            output.as_deref(),
            &cli.global,
        ),
        Command::Disasm {
            path,
            r#type,
            method,
        } => commands::disasm::run(path, r#type, method, &cli.global),
    }
}
