use std::path::PathBuf;
use std::process;

use clap::Args;

use super::{fail, load_config, load_program};

#[derive(Args)]
pub struct BuildArgs {
    /// Input program (typed AST as JSON)
    pub input: PathBuf,
    /// Output assembly file (default: <input>.asm)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Configuration file (default: nearest rangec.toml)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
    /// Source file the spans in the program refer to
    #[arg(long, value_name = "PATH")]
    pub source: Option<PathBuf>,
}

pub fn cmd_build(args: BuildArgs) {
    let BuildArgs {
        input,
        output,
        config,
        source,
    } = args;

    let config = load_config(config.as_deref(), &input);
    let program = load_program(&input);
    let code = match rangec::compile(&program, &config.codegen) {
        Ok(code) => code,
        Err(diag) => fail(&diag, source.as_deref()),
    };

    let out_path = output.unwrap_or_else(|| input.with_extension("asm"));
    if let Err(e) = std::fs::write(&out_path, code.to_string()) {
        eprintln!("error: cannot write '{}': {}", out_path.display(), e);
        process::exit(1);
    }
    eprintln!("Compiled -> {}", out_path.display());
}
