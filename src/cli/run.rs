use std::path::PathBuf;

use clap::Args;
use rangec::diagnostic::Diagnostic;
use rangec::span::Span;

use super::{fail, load_config, load_program};

#[derive(Args)]
pub struct RunArgs {
    /// Input program (typed AST as JSON)
    pub input: PathBuf,
    /// Configuration file (default: nearest rangec.toml)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
    /// Source file the spans in the program refer to
    #[arg(long, value_name = "PATH")]
    pub source: Option<PathBuf>,
    /// Print step count and heap statistics after the run
    #[arg(long)]
    pub stats: bool,
}

pub fn cmd_run(args: RunArgs) {
    let config = load_config(args.config.as_deref(), &args.input);
    let program = load_program(&args.input);
    let execution = match rangec::run(&program, &config) {
        Ok(execution) => execution,
        Err(diag) => fail(&diag, args.source.as_deref()),
    };

    print!("{}", execution.output);
    if args.stats {
        let heap = &execution.heap;
        eprintln!("Steps:       {}", execution.steps);
        eprintln!("Allocations: {}", heap.allocations);
        eprintln!("Frees:       {}", heap.deallocations);
        eprintln!("Peak live:   {}", heap.peak_live_records);
        if heap.leaked() > 0 {
            Diagnostic::warning(
                format!("{} records still live at exit", heap.leaked()),
                Span::dummy(),
            )
            .render_plain();
        }
    }
}
