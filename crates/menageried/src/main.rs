use std::process::ExitCode;

use clap::Parser;

use menageried::bootstrap::{self, Cli};

fn main() -> ExitCode {
    let cli = Cli::parse();
    ExitCode::from(bootstrap::run(&cli))
}
