//! Deferred reference counting.
//!
//! Three subroutines are emitted once per program:
//!
//! - `-ref-counter-increment-refcount` `[.. rec (ret)] -> [..]`
//! - `-ref-counter-push-record` `[.. rec (ret)] -> [..]`
//! - `-ref-counter-perform-decrements` `[.. (ret)] -> [..]`
//!
//! Decrements are not applied when a reference dies. The record is pushed
//! onto a fixed-capacity worklist instead, and the worklist is drained at
//! the end of every scope. Draining pops a record, decrements it, and when
//! the count drops to zero pushes the record's children back onto the same
//! worklist before handing the record to the memory manager. Nested
//! structures of any depth are released in bounded target stack space.
//!
//! The reference count is the first header word, so a record pointer is
//! also the address of its count.

use super::{GENERAL_RUNTIME_ERROR, MEM_MANAGER_DEALLOCATE};
use crate::asm::{Code, Instr};
use crate::layout::{
    StructTable, NESTED_INTERVAL_TYPE_CODE, PAYLOAD_OFFSET, POINTER_SIZE, TYPE_CODE_OFFSET,
};

pub const INCREMENT_REFCOUNT: &str = "-ref-counter-increment-refcount";
pub const PUSH_RECORD: &str = "-ref-counter-push-record";
pub const PERFORM_DECREMENTS: &str = "-ref-counter-perform-decrements";

pub const WORKLIST: &str = "$rctr-decrement-stack";
pub const WORKLIST_INDEX: &str = "$rctr-decrement-stack-index";
const OVERFLOW_HANDLER: &str = "$$rctr-worklist-overflow";
const OVERFLOW_MESSAGE: &str = "$errors-rctr-worklist-overflow";

pub const OVERFLOW_TEXT: &str = "reference-count decrement worklist overflow";

/// Largest worklist whose size in bytes, and whose capacity as a `PushI`
/// operand, still fit in an `i32`.
pub const MAX_WORKLIST_CAPACITY: u32 = i32::MAX as u32 / POINTER_SIZE;

/// Emitter for the reference-counting runtime.
#[derive(Clone, Debug)]
pub struct RefCounter {
    capacity: i32,
    worklist_bytes: u32,
}

fn label(name: &str) -> Instr {
    Instr::Label(name.to_string())
}

fn jump(name: &str) -> Instr {
    Instr::Jump(name.to_string())
}

/// `[..] -> [.. index]`
fn load_index() -> [Instr; 2] {
    [Instr::PushD(WORKLIST_INDEX.to_string()), Instr::LoadI]
}

/// `[..] -> [.. &worklist[index]]`
fn slot_address() -> Code {
    let mut code: Code = vec![Instr::PushD(WORKLIST.to_string())].into();
    code.extend(load_index());
    code.extend([
        Instr::PushI(POINTER_SIZE as i32),
        Instr::Multiply,
        Instr::Add,
    ]);
    code
}

/// `index += delta`
fn bump_index(delta: i32) -> Code {
    let mut code: Code = vec![Instr::PushD(WORKLIST_INDEX.to_string())].into();
    code.extend(load_index());
    code.extend([Instr::PushI(delta), Instr::Add, Instr::StoreI]);
    code
}

impl RefCounter {
    /// `None` unless `1 <= capacity <= MAX_WORKLIST_CAPACITY`.
    pub fn new(capacity: u32) -> Option<Self> {
        if capacity == 0 || capacity > MAX_WORKLIST_CAPACITY {
            return None;
        }
        let worklist_bytes = capacity.checked_mul(POINTER_SIZE)?;
        Some(Self {
            capacity: i32::try_from(capacity).ok()?,
            worklist_bytes,
        })
    }

    pub fn capacity(&self) -> u32 {
        self.capacity as u32
    }

    /// Worklist storage and the overflow message.
    pub fn data(&self) -> Code {
        vec![
            Instr::DLabel(WORKLIST.to_string()),
            Instr::DataZ(self.worklist_bytes),
            Instr::DLabel(WORKLIST_INDEX.to_string()),
            Instr::DataZ(POINTER_SIZE),
            Instr::DLabel(OVERFLOW_MESSAGE.to_string()),
            Instr::DataS(OVERFLOW_TEXT.to_string()),
        ]
        .into()
    }

    /// Reset the worklist to empty; part of program entry.
    pub fn initialize(&self) -> Code {
        vec![
            Instr::PushD(WORKLIST_INDEX.to_string()),
            Instr::PushI(0),
            Instr::StoreI,
        ]
        .into()
    }

    /// `[.. rec] -> [..]`: schedule one decrement of `rec`.
    pub fn push_record() -> Instr {
        Instr::Call(PUSH_RECORD.to_string())
    }

    /// `[.. rec] -> [..]`: add one reference to `rec`.
    pub fn increment() -> Instr {
        Instr::Call(INCREMENT_REFCOUNT.to_string())
    }

    /// `[..] -> [..]`: apply every scheduled decrement.
    pub fn drain() -> Instr {
        Instr::Call(PERFORM_DECREMENTS.to_string())
    }

    /// The three subroutines and the overflow handler.
    pub fn subroutines(&self, structs: &StructTable) -> Code {
        let mut code = Code::new();
        code.append(self.increment_routine());
        code.append(self.push_routine());
        code.append(self.drain_routine(structs));
        code.extend([
            label(OVERFLOW_HANDLER),
            Instr::PushD(OVERFLOW_MESSAGE.to_string()),
            jump(GENERAL_RUNTIME_ERROR),
        ]);
        code
    }

    fn increment_routine(&self) -> Code {
        let null = "-rctr-increment-null";
        let mut code: Code = vec![
            label(INCREMENT_REFCOUNT),
            Instr::Exchange,
            Instr::Duplicate,
            Instr::JumpFalse(null.to_string()),
            Instr::Duplicate,
        ]
        .into();
        code.extend([
            Instr::LoadI,
            Instr::PushI(1),
            Instr::Add,
            Instr::StoreI,
            Instr::Return,
            label(null),
            Instr::Pop,
            Instr::Return,
        ]);
        code
    }

    fn push_routine(&self) -> Code {
        let null = "-rctr-push-null";
        let room = "-rctr-push-room";
        let mut code: Code = vec![
            label(PUSH_RECORD),
            Instr::Exchange,
            Instr::Duplicate,
            Instr::JumpFalse(null.to_string()),
        ]
        .into();
        code.extend(load_index());
        code.extend([
            Instr::PushI(self.capacity),
            Instr::Subtract,
            Instr::JumpNeg(room.to_string()),
            jump(OVERFLOW_HANDLER),
            label(room),
        ]);
        code.append(slot_address());
        code.extend([Instr::Exchange, Instr::StoreI]);
        code.append(bump_index(1));
        code.extend([Instr::Return, label(null), Instr::Pop, Instr::Return]);
        code
    }

    fn drain_routine(&self, structs: &StructTable) -> Code {
        let top = "-rctr-drain-loop";
        let done = "-rctr-drain-done";
        let live = "-rctr-drain-still-live";
        let free = "-rctr-drain-free";
        let nested = "-rctr-release-nested";

        let mut code: Code = vec![label(PERFORM_DECREMENTS), label(top)].into();
        code.extend(load_index());
        code.push(Instr::JumpFalse(done.to_string()));

        // pop the next record
        code.append(bump_index(-1));
        code.append(slot_address());
        code.push(Instr::LoadI);

        // decrement, keep going while references remain
        code.extend([
            Instr::Duplicate,
            Instr::Duplicate,
            Instr::LoadI,
            Instr::PushI(1),
            Instr::Subtract,
            Instr::StoreI,
            Instr::Duplicate,
            Instr::LoadI,
            Instr::JumpPos(live.to_string()),
        ]);

        // dispatch on type code to find the children
        code.extend([
            Instr::Duplicate,
            Instr::PushI(TYPE_CODE_OFFSET),
            Instr::Add,
            Instr::LoadI,
            Instr::Duplicate,
            Instr::PushI(NESTED_INTERVAL_TYPE_CODE),
            Instr::Subtract,
            Instr::JumpFalse(nested.to_string()),
        ]);
        let with_children: Vec<_> = structs
            .iter()
            .filter(|s| !s.reference_slots.is_empty())
            .collect();
        for layout in &with_children {
            code.extend([
                Instr::Duplicate,
                Instr::PushI(layout.type_code),
                Instr::Subtract,
                Instr::JumpFalse(struct_release_label(layout.type_code)),
            ]);
        }
        code.extend([Instr::Pop, jump(free)]);

        code.extend([label(nested), Instr::Pop]);
        for offset in [PAYLOAD_OFFSET, PAYLOAD_OFFSET + POINTER_SIZE as i32] {
            code.extend(push_child(offset));
        }
        code.push(jump(free));

        for layout in &with_children {
            code.extend([label(&struct_release_label(layout.type_code)), Instr::Pop]);
            for &offset in &layout.reference_slots {
                code.extend(push_child(offset));
            }
            code.push(jump(free));
        }

        code.extend([
            label(free),
            Instr::Call(MEM_MANAGER_DEALLOCATE.to_string()),
            jump(top),
            label(live),
            Instr::Pop,
            jump(top),
            label(done),
            Instr::Return,
        ]);
        code
    }
}

fn struct_release_label(type_code: i32) -> String {
    format!("-rctr-release-struct-{}", type_code)
}

/// `[.. rec] -> [.. rec]`, scheduling the child pointer stored at `offset`.
fn push_child(offset: i32) -> [Instr; 5] {
    [
        Instr::Duplicate,
        Instr::PushI(offset),
        Instr::Add,
        Instr::LoadI,
        RefCounter::push_record(),
    ]
}
