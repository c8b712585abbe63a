use std::path::PathBuf;

use clap::Parser;
use kite_matrix::{logging, BuildContext, FsWorkspace, RegistryClient};

#[derive(Parser)]
#[command(name = "pipeline-generate", version)]
#[command(about = "Print the CI test matrix pipeline for a Rails checkout")]
struct Cli {
    /// Root of the checkout to generate for
    #[arg(default_value = "..")]
    root: PathBuf,
}

fn main() {
    logging::init();

    if let Err(err) = run(Cli::parse()) {
        eprintln!("error: {}", err);
        let mut source = std::error::Error::source(&err);
        while let Some(cause) = source {
            eprintln!("  caused by: {}", cause);
            source = cause.source();
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> kite_matrix::Result<()> {
    let workspace = FsWorkspace::new(cli.root);
    let ctx = BuildContext::from_env(&workspace)?;
    let pipeline = kite_matrix::generate(&workspace, &ctx, &RegistryClient::default())?;
    pipeline.emit()
}
