use clap::Parser;

mod cli;
mod commands;

use cli::SfsCli;

/// Inspects and edits simplefs images without mounting them in the host.
fn main() -> anyhow::Result<()> {
    env_logger::builder().format_timestamp_nanos().init();
    let mut out = std::io::stdout().lock();
    match SfsCli::parse() {
        SfsCli::Mkfs(args) => commands::mkfs(args, &mut out),
        SfsCli::Stat(args) => commands::stat(args, &mut out),
        SfsCli::Ls(args) => commands::ls(args, &mut out),
        SfsCli::Cat(args) => commands::cat(args, &mut out),
        SfsCli::Touch(args) => commands::touch(args),
        SfsCli::Mkdir(args) => commands::mkdir(args),
        SfsCli::Write(args) => commands::write(args),
        SfsCli::Check(args) => commands::check(args, &mut out),
    }
}
