use clap::Parser;
use trailtrigger::cli::{run, Cli};

fn main() -> std::process::ExitCode {
    run(Cli::parse())
}
