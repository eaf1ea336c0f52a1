use std::process::ExitCode;

use clap::Parser;
use gpu_rotate::cli::{self, CliArgs};

fn main() -> ExitCode {
    cli::run(CliArgs::parse())
}
