use super::*;
use crate::ast::builder::ProgramBuilder;
use crate::ast::Expr;
use crate::layout::StructTable;

fn labels(code: &Code) -> Vec<&str> {
    code.iter()
        .filter_map(|i| match i {
            Instr::Label(l) => Some(l.as_str()),
            _ => None,
        })
        .collect()
}

#[test]
fn test_environment_starts_with_jump_and_null_guard() {
    let code = environment(&MachineState::default(), 24);
    let instrs = code.instrs();
    assert_eq!(instrs[0], Instr::Jump(MAIN_LABEL.to_string()));
    assert_eq!(instrs[1], Instr::DLabel(EAT_LOCATION_ZERO.to_string()));
    assert_eq!(instrs[2], Instr::DataZ(8));
    assert!(instrs.contains(&Instr::DLabel(FRAME_POINTER.to_string())));
    assert!(instrs.contains(&Instr::DLabel(STACK_POINTER.to_string())));
    let n = instrs.len();
    assert_eq!(instrs[n - 2], Instr::DLabel(GLOBAL_MEMORY_BLOCK.to_string()));
    assert_eq!(instrs[n - 1], Instr::DataZ(24));
}

#[test]
fn test_error_handlers_halt() {
    let code = error_handlers();
    assert_eq!(labels(&code), vec![GENERAL_RUNTIME_ERROR, DIVIDE_BY_ZERO]);
    assert_eq!(code.count(&Instr::Halt), 1);
    assert_eq!(code.count(&Instr::Printf), 1);
}

#[test]
fn test_worklist_storage_matches_capacity() {
    let rc = RefCounter::new(200).unwrap();
    let data = rc.data();
    assert_eq!(data.instrs()[1], Instr::DataZ(800));
    assert_eq!(rc.capacity(), 200);
}

#[test]
fn test_capacity_bounds() {
    assert!(RefCounter::new(0).is_none());
    assert!(RefCounter::new(refcount::MAX_WORKLIST_CAPACITY + 1).is_none());
    assert!(RefCounter::new(1 << 30).is_none());

    let rc = RefCounter::new(refcount::MAX_WORKLIST_CAPACITY).unwrap();
    let bytes = refcount::MAX_WORKLIST_CAPACITY * crate::layout::POINTER_SIZE;
    assert!(bytes <= i32::MAX as u32);
    assert_eq!(rc.data().instrs()[1], Instr::DataZ(bytes));
    let code = rc.subroutines(&StructTable::default());
    assert!(code
        .instrs()
        .contains(&Instr::PushI(refcount::MAX_WORKLIST_CAPACITY as i32)));
}

#[test]
fn test_subroutines_are_labelled() {
    let rc = RefCounter::new(4).unwrap();
    let code = rc.subroutines(&StructTable::default());
    let names = labels(&code);
    assert!(names.contains(&refcount::INCREMENT_REFCOUNT));
    assert!(names.contains(&refcount::PUSH_RECORD));
    assert!(names.contains(&refcount::PERFORM_DECREMENTS));
    // records are released through the memory manager only from the drain
    assert_eq!(code.calls(MEM_MANAGER_DEALLOCATE), 1);
    assert!(code.instrs().contains(&Instr::PushI(4)));
}

#[test]
fn test_drain_dispatches_only_structs_with_references() {
    let mut b = ProgramBuilder::new();
    let plain = b.begin_struct("Plain");
    b.member("n", Expr::int(1));
    b.end_struct();
    let holder = b.begin_struct("Holder");
    b.member("span", Expr::interval(Expr::int(1), Expr::int(2)));
    b.end_struct();
    let program = b.finish();
    let table = StructTable::new(&program);

    let code = RefCounter::new(8).unwrap().subroutines(&table);
    let names = labels(&code);
    let plain_code = table.get(plain).unwrap().type_code;
    let holder_code = table.get(holder).unwrap().type_code;
    assert!(!names.contains(&format!("-rctr-release-struct-{}", plain_code).as_str()));
    assert!(names.contains(&format!("-rctr-release-struct-{}", holder_code).as_str()));
    // nested children (2) + one struct member
    assert_eq!(code.calls(refcount::PUSH_RECORD), 3);
}
