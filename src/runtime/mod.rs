//! Runtime environment emitted into every program.
//!
//! Besides the reference counter and the calling-convention helpers this
//! holds the fixed data every program carries: the null guard at address
//! zero, print formats, the frame/stack pointer cells, the global memory
//! block and the fatal error handlers.

pub mod frame;
pub mod refcount;

use crate::asm::{Code, Instr};
use crate::layout::NULL_GUARD_SIZE;

pub use frame::MachineState;
pub use refcount::RefCounter;

// ─── Labels ────────────────────────────────────────────────────────

pub const MAIN_LABEL: &str = "$$main";
pub const EAT_LOCATION_ZERO: &str = "$eat-location-zero";
pub const GLOBAL_MEMORY_BLOCK: &str = "$global-memory-block";
pub const FRAME_POINTER: &str = "$frame-pointer";
pub const STACK_POINTER: &str = "$stack-pointer";

pub const INTEGER_FORMAT: &str = "$print-format-integer";
pub const FLOAT_FORMAT: &str = "$print-format-floating";
pub const CHARACTER_FORMAT: &str = "$print-format-character";
pub const STRING_FORMAT: &str = "$print-format-string";
pub const NEWLINE_STRING: &str = "$print-format-newline";
pub const SPACE_STRING: &str = "$print-format-space";
pub const TRUE_STRING: &str = "$boolean-true-string";
pub const FALSE_STRING: &str = "$boolean-false-string";
pub const OPEN_BRACKET_STRING: &str = "$print-format-open-bracket";
pub const CLOSE_BRACKET_STRING: &str = "$print-format-close-bracket";
pub const SEPARATOR_STRING: &str = "$print-format-separator";

pub const GENERAL_RUNTIME_ERROR: &str = "$$general-runtime-error";
pub const DIVIDE_BY_ZERO: &str = "$$divide-by-zero";
const RUNTIME_ERROR_FORMAT: &str = "$errors-general-message";
const DIVIDE_BY_ZERO_MESSAGE: &str = "$errors-divide-by-zero";

/// Entry points of the external memory manager.
pub const MEM_MANAGER_ALLOCATE: &str = "-mem-manager-allocate";
pub const MEM_MANAGER_DEALLOCATE: &str = "-mem-manager-deallocate";

pub const RUNTIME_ERROR_PREFIX: &str = "Runtime error: ";

/// Data string label for the printed name of a struct type.
pub fn struct_name_label(type_code: i32) -> String {
    format!("$struct-name-{}", type_code)
}

// ─── Emission ──────────────────────────────────────────────────────

fn data_string(code: &mut Code, label: &str, text: &str) {
    code.push(Instr::DLabel(label.to_string()));
    code.push(Instr::DataS(text.to_string()));
}

/// Program prologue: jump over the environment to main, then the fixed
/// data. The null guard is emitted first so that it occupies address zero.
pub fn environment(cells: &MachineState, global_size: u32) -> Code {
    let mut code = Code::new();
    code.push(Instr::Jump(MAIN_LABEL.to_string()));

    code.push(Instr::DLabel(EAT_LOCATION_ZERO.to_string()));
    code.push(Instr::DataZ(NULL_GUARD_SIZE));

    data_string(&mut code, INTEGER_FORMAT, "%d");
    data_string(&mut code, FLOAT_FORMAT, "%g");
    data_string(&mut code, CHARACTER_FORMAT, "%c");
    data_string(&mut code, STRING_FORMAT, "%s");
    data_string(&mut code, NEWLINE_STRING, "\n");
    data_string(&mut code, SPACE_STRING, " ");
    data_string(&mut code, TRUE_STRING, "true");
    data_string(&mut code, FALSE_STRING, "false");
    data_string(&mut code, OPEN_BRACKET_STRING, "[");
    data_string(&mut code, CLOSE_BRACKET_STRING, "]");
    data_string(&mut code, SEPARATOR_STRING, ", ");
    data_string(
        &mut code,
        RUNTIME_ERROR_FORMAT,
        &format!("{}%s\n", RUNTIME_ERROR_PREFIX),
    );
    data_string(&mut code, DIVIDE_BY_ZERO_MESSAGE, "division by zero");

    code.append(cells.declare());

    code.push(Instr::DLabel(GLOBAL_MEMORY_BLOCK.to_string()));
    code.push(Instr::DataZ(global_size));
    code
}

/// Fatal error handlers. The general handler expects the message address
/// on the stack, prints it and halts.
pub fn error_handlers() -> Code {
    vec![
        Instr::Label(GENERAL_RUNTIME_ERROR.to_string()),
        Instr::PushD(RUNTIME_ERROR_FORMAT.to_string()),
        Instr::Printf,
        Instr::Halt,
        Instr::Label(DIVIDE_BY_ZERO.to_string()),
        Instr::PushD(DIVIDE_BY_ZERO_MESSAGE.to_string()),
        Instr::Jump(GENERAL_RUNTIME_ERROR.to_string()),
    ]
    .into()
}

#[cfg(test)]
mod tests;
