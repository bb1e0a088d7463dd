pub mod api;
pub mod asm;
pub mod ast;
pub mod codegen;
pub mod config;
pub mod diagnostic;
pub mod layout;
pub mod runtime;
pub mod span;
pub mod vm;

// Re-export public API: `rangec::compile()` etc.
pub use api::*;
pub use asm::{Code, Instr};
pub use ast::Program;
pub use config::{CodegenConfig, Config, VmConfig};
pub use diagnostic::Diagnostic;
pub use vm::Execution;
