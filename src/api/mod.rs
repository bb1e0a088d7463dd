//! Library entry points: compile a typed program to stack-machine code,
//! and compile-and-run it on the bundled simulator.

use crate::asm::Code;
use crate::ast::Program;
use crate::codegen;
use crate::config::{CodegenConfig, Config};
use crate::diagnostic::Diagnostic;
use crate::span::Span;
use crate::vm::{self, Execution};


/// Generate code for an already type-checked program.
pub fn compile(program: &Program, config: &CodegenConfig) -> Result<Code, Diagnostic> {
    let code = codegen::generate(program, config)?;
    log::info!(
        "generated {} instructions, {} of them data",
        code.len(),
        code.iter().filter(|i| i.is_data()).count()
    );
    Ok(code)
}

/// Compile a program serialized as JSON.
pub fn compile_json(text: &str, config: &CodegenConfig) -> Result<Code, Diagnostic> {
    let program = parse_program(text)?;
    compile(&program, config)
}

/// Decode the JSON form of a [`Program`].
pub fn parse_program(text: &str) -> Result<Program, Diagnostic> {
    Program::from_json(text).map_err(|e| {
        Diagnostic::error(format!("malformed program: {}", e), Span::dummy())
            .with_note(format!("at line {}, column {}", e.line(), e.column()))
            .with_help("the input must be a typed tree produced by the front end".to_string())
    })
}

/// Compile `program` and execute it to completion.
pub fn run(program: &Program, config: &Config) -> Result<Execution, Diagnostic> {
    let code = compile(program, &config.codegen)?;
    let execution = vm::execute(&code, &config.vm).map_err(|fault| {
        Diagnostic::error(format!("execution failed: {}", fault), Span::dummy())
    })?;
    log::info!(
        "executed {} steps, {} allocations, {} leaked",
        execution.steps,
        execution.heap.allocations,
        execution.heap.leaked()
    );
    Ok(execution)
}
