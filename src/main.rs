use clap::Parser;
use stockscreen::cli::{Cli, run};

fn main() -> std::process::ExitCode {
    run(Cli::parse())
}
