use clap::{Parser, Subcommand};

mod cli;

#[derive(Parser)]
#[command(
    name = "rangec",
    version,
    about = "Stack-machine back end for programs over intervals and records"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a typed program (JSON) to stack-machine assembly
    Build(cli::build::BuildArgs),
    /// Compile a typed program and execute it on the simulator
    Run(cli::run::RunArgs),
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Build(args) => cli::build::cmd_build(args),
        Command::Run(args) => cli::run::cmd_run(args),
    }
}
