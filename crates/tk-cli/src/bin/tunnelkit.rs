use std::process::ExitCode;

use clap::Parser;
use tk_cli::{Cli, init_tracing, run};
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbosity());
    let outcome = match cli.into_action() {
        Ok(action) => run(action).await,
        Err(err) => Err(err),
    };
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            // Goes through the log filter so --quiet silences it too.
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
