//! Calling convention and activation records.
//!
//! The frame stack grows downward from `Memtop`. Two data cells hold the
//! frame pointer and the stack pointer; they are updated by hand around
//! every call:
//!
//! ```text
//!   higher addresses
//!   | first argument  |  fp + paramSize - size
//!   | ...             |
//!   | last argument   |  fp + 0
//!   | saved fp        |  fp - 4
//!   | return address  |  fp - 8
//!   | locals ...      |  fp - 8 - localsSize  == sp
//!   lower addresses
//! ```
//!
//! Immediately after a callee returns, `sp` has dropped by the size of the
//! return value, which the caller then fetches and pops.

use super::{FRAME_POINTER, GLOBAL_MEMORY_BLOCK, STACK_POINTER};
use crate::asm::{load_instr, store_instr, Code, Instr};
use crate::ast::{Storage, Type};
use crate::layout::{FRAME_HEADER_SIZE, RETURN_ADDRESS_OFFSET, SAVED_FP_OFFSET};

/// The two machine cells. Every frame operation receives them explicitly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MachineState {
    pub frame_pointer: String,
    pub stack_pointer: String,
}

impl Default for MachineState {
    fn default() -> Self {
        Self {
            frame_pointer: FRAME_POINTER.to_string(),
            stack_pointer: STACK_POINTER.to_string(),
        }
    }
}

impl MachineState {
    /// Data declarations for both cells.
    pub fn declare(&self) -> Code {
        vec![
            Instr::DLabel(self.frame_pointer.clone()),
            Instr::DataZ(4),
            Instr::DLabel(self.stack_pointer.clone()),
            Instr::DataZ(4),
        ]
        .into()
    }

    /// `[..] -> [.. fp]`
    pub fn load_fp(&self) -> [Instr; 2] {
        [Instr::PushD(self.frame_pointer.clone()), Instr::LoadI]
    }

    /// `[..] -> [.. sp]`
    pub fn load_sp(&self) -> [Instr; 2] {
        [Instr::PushD(self.stack_pointer.clone()), Instr::LoadI]
    }

    /// `[.. v] -> [..]`, fp = v
    pub fn store_fp(&self) -> [Instr; 3] {
        [
            Instr::PushD(self.frame_pointer.clone()),
            Instr::Exchange,
            Instr::StoreI,
        ]
    }

    /// `[.. v] -> [..]`, sp = v
    pub fn store_sp(&self) -> [Instr; 3] {
        [
            Instr::PushD(self.stack_pointer.clone()),
            Instr::Exchange,
            Instr::StoreI,
        ]
    }

    /// sp += delta
    pub fn adjust_sp(&self, delta: i32) -> Code {
        let mut code: Code = vec![Instr::PushD(self.stack_pointer.clone())].into();
        code.extend(self.load_sp());
        code.extend([Instr::PushI(delta), Instr::Add, Instr::StoreI]);
        code
    }
}

/// Program entry: both cells start at the top of memory.
pub fn program_entry(cells: &MachineState) -> Code {
    let mut code: Code = vec![Instr::Memtop].into();
    code.extend(cells.store_fp());
    code.push(Instr::Memtop);
    code.extend(cells.store_sp());
    code
}

/// Callee entry, `[.. (ret)] -> [..]`: save the caller's fp and the return
/// address below the arguments, then open a frame of `locals_size` bytes.
pub fn prologue(cells: &MachineState, locals_size: u32) -> Code {
    let mut code = Code::new();
    // [sp-4] = fp
    code.extend(cells.load_sp());
    code.extend([Instr::PushI(SAVED_FP_OFFSET), Instr::Add]);
    code.extend(cells.load_fp());
    code.push(Instr::StoreI);
    // [sp-8] = return address
    code.extend(cells.load_sp());
    code.extend([
        Instr::PushI(RETURN_ADDRESS_OFFSET),
        Instr::Add,
        Instr::Exchange,
        Instr::StoreI,
    ]);
    // fp = sp
    code.extend(cells.load_sp());
    code.extend(cells.store_fp());
    code.append(cells.adjust_sp(-((FRAME_HEADER_SIZE + locals_size) as i32)));
    code
}

/// Callee exit, `[.. value] -> returns` (or `[..]` for `Void`): restore the
/// caller's fp, collapse frame and arguments, leave the return value at the
/// new sp and jump back.
pub fn epilogue(cells: &MachineState, locals_size: u32, params_size: u32, ret: &Type) -> Code {
    let mut code = Code::new();
    // return address
    code.extend(cells.load_fp());
    code.extend([Instr::PushI(RETURN_ADDRESS_OFFSET), Instr::Add, Instr::LoadI]);
    // fp = [fp-4]
    code.extend(cells.load_fp());
    code.extend([Instr::PushI(SAVED_FP_OFFSET), Instr::Add, Instr::LoadI]);
    code.extend(cells.store_fp());

    let frame_size = FRAME_HEADER_SIZE + locals_size + params_size;
    match store_instr(ret) {
        Some(store) => {
            code.push(Instr::Exchange);
            code.append(cells.adjust_sp(frame_size as i32 - ret.size() as i32));
            code.extend(cells.load_sp());
            code.extend([Instr::Exchange, store]);
        }
        None => code.append(cells.adjust_sp(frame_size as i32)),
    }
    code.push(Instr::Return);
    code
}

/// Caller side, `[.. value] -> [..]`: reserve a slot of `ty` below sp and
/// store the argument there.
pub fn push_argument(cells: &MachineState, ty: &Type) -> Code {
    let mut code = cells.adjust_sp(-(ty.size() as i32));
    if let Some(store) = store_instr(ty) {
        code.extend(cells.load_sp());
        code.extend([Instr::Exchange, store]);
    }
    code
}

/// Caller side after `Call`, `[..] -> [.. value]`: read the return value at
/// sp and pop it off the frame stack. Nothing for `Void`.
pub fn fetch_return_value(cells: &MachineState, ty: &Type) -> Code {
    let mut code = Code::new();
    if let Some(load) = load_instr(ty) {
        code.extend(cells.load_sp());
        code.push(load);
        code.append(cells.adjust_sp(ty.size() as i32));
    }
    code
}

/// `[..] -> [.. self]`: the record pointer of the current initializer or
/// method, stored at `fp + self_slot`.
pub fn self_pointer(cells: &MachineState, self_slot: i32) -> Code {
    let mut code: Code = cells.load_fp().into_iter().collect();
    code.extend([Instr::PushI(self_slot), Instr::Add, Instr::LoadI]);
    code
}

/// `[..] -> [.. address]` of a binding. Members need the self slot of the
/// enclosing frame; `None` when there is none.
pub fn storage_address(cells: &MachineState, storage: &Storage, self_slot: Option<i32>) -> Option<Code> {
    let mut code = Code::new();
    let offset = match *storage {
        Storage::Global { offset } => {
            code.push(Instr::PushD(GLOBAL_MEMORY_BLOCK.to_string()));
            offset
        }
        Storage::FramePositive { offset } | Storage::FrameNegative { offset } => {
            code.extend(cells.load_fp());
            offset
        }
        Storage::Member { offset } => {
            code.append(self_pointer(cells, self_slot?));
            offset
        }
    };
    if offset != 0 {
        code.extend([Instr::PushI(offset), Instr::Add]);
    }
    Some(code)
}

/// Run a struct initializer for the record on the stack, `[.. rec] -> [.. rec]`.
///
/// The record pointer is passed as the routine's only argument; the routine's
/// own prologue and epilogue give the member initializers a private frame
/// and restore the caller's cells afterwards.
pub fn call_initializer(cells: &MachineState, routine: &str) -> Code {
    let mut code: Code = vec![Instr::Duplicate].into();
    code.append(push_argument(cells, &Type::Int));
    code.push(Instr::Call(routine.to_string()));
    code
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells() -> MachineState {
        MachineState::default()
    }

    #[test]
    fn entry_sets_both_cells_from_memtop() {
        let code = program_entry(&cells());
        assert_eq!(code.count(&Instr::Memtop), 2);
        assert_eq!(code.count(&Instr::StoreI), 2);
    }

    #[test]
    fn void_epilogue_stores_nothing() {
        let code = epilogue(&cells(), 8, 4, &Type::Void);
        // only the one inside the fp restore
        assert_eq!(code.count(&Instr::Exchange), 1);
        assert_eq!(code.instrs().last(), Some(&Instr::Return));
        assert!(!code.instrs().contains(&Instr::StoreF));
        // sp += 8 + 8 + 4
        assert!(code.instrs().contains(&Instr::PushI(20)));
    }

    #[test]
    fn float_epilogue_leaves_value_below_arguments() {
        let code = epilogue(&cells(), 0, 12, &Type::Float);
        // sp += 8 + 0 + 12 - 8
        assert!(code.instrs().contains(&Instr::PushI(12)));
        assert!(code.instrs().contains(&Instr::StoreF));
    }

    #[test]
    fn member_storage_requires_self_slot() {
        let member = Storage::Member { offset: 16 };
        assert!(storage_address(&cells(), &member, None).is_none());
        let code = storage_address(&cells(), &member, Some(4)).unwrap();
        assert_eq!(code.count(&Instr::LoadI), 2);
        assert!(code.instrs().contains(&Instr::PushI(16)));
    }

    #[test]
    fn global_storage_is_relative_to_block() {
        let code = storage_address(&cells(), &Storage::Global { offset: 0 }, None).unwrap();
        assert_eq!(code.instrs(), &[Instr::PushD(GLOBAL_MEMORY_BLOCK.to_string())]);
    }

    #[test]
    fn void_return_fetch_is_empty() {
        assert!(fetch_return_value(&cells(), &Type::Void).is_empty());
        let code = fetch_return_value(&cells(), &Type::Char);
        assert!(code.instrs().contains(&Instr::LoadC));
    }
}
