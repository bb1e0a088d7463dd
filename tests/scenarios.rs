use rangec::asm::{Code, Instr};
use rangec::ast::builder::ProgramBuilder;
use rangec::ast::{BinOp, Expr, Program, Stmt, Type, UnaryOp};
use rangec::config::{CodegenConfig, Config, VmConfig};
use rangec::layout::{StructTable, TYPE_CODE_OFFSET};
use rangec::runtime::refcount::{INCREMENT_REFCOUNT, WORKLIST_INDEX};
use rangec::runtime::{
    environment, error_handlers, MachineState, RefCounter, DIVIDE_BY_ZERO, FRAME_POINTER,
    MAIN_LABEL, MEM_MANAGER_ALLOCATE, STACK_POINTER,
};
use rangec::vm::Machine;

fn interval(low: i32, high: i32) -> Expr {
    Expr::interval(Expr::int(low), Expr::int(high))
}

fn contains_window(code: &Code, window: &[Instr]) -> bool {
    code.instrs().windows(window.len()).any(|w| w == window)
}

// ── Records and scopes ──

#[test]
fn test_interval_released_at_scope_exit() {
    let mut b = ProgramBuilder::new();
    b.open_block();
    b.declare_init("a", interval(3, 7));
    let block = b.close_block();
    b.stmt(Stmt::Block(block));
    b.println(vec![Expr::int(0)]);
    let program = b.finish();

    let code = rangec::compile(&program, &CodegenConfig::default()).unwrap();
    assert!(contains_window(
        &code,
        &[
            Instr::PushI(20),
            Instr::Call(MEM_MANAGER_ALLOCATE.to_string())
        ]
    ));

    let execution = rangec::run(&program, &Config::default()).unwrap();
    assert_eq!(execution.output, "0\n");
    assert_eq!(execution.heap.allocations, 1);
    assert_eq!(execution.heap.deallocations, 1);
}

#[test]
fn test_shared_interval_freed_exactly_once() {
    let mut b = ProgramBuilder::new();
    b.open_block();
    let a = b.declare_init("a", interval(3, 7));
    b.declare_init("b", Expr::ident(&a));
    let block = b.close_block();
    b.stmt(Stmt::Block(block));
    let program = b.finish();

    let code = rangec::compile(&program, &CodegenConfig::default()).unwrap();
    assert_eq!(code.calls(INCREMENT_REFCOUNT), 1);

    let execution = rangec::run(&program, &Config::default()).unwrap();
    assert_eq!(execution.heap.allocations, 1);
    assert_eq!(execution.heap.deallocations, 1);
}

#[test]
fn test_inner_alias_leaves_outer_binding_alive() {
    let mut b = ProgramBuilder::new();
    let a = b.declare_init("a", interval(3, 7));
    b.open_block();
    let alias = b.declare_init("b", Expr::ident(&a));
    b.println(vec![Expr::ident(&alias)]);
    let block = b.close_block();
    b.stmt(Stmt::Block(block));
    b.println(vec![Expr::ident(&a), Expr::low(Expr::ident(&a))]);

    let execution = rangec::run(&b.finish(), &Config::default()).unwrap();
    assert_eq!(execution.output, "[3, 7]\n[3, 7] 3\n");
    assert_eq!(execution.heap.leaked(), 0);
}

#[test]
fn test_scalar_only_scope_is_neutral() {
    let mut b = ProgramBuilder::new();
    b.open_block();
    let x = b.declare_init("x", Expr::int(2));
    b.declare_init("y", Expr::binary(BinOp::Mul, Expr::ident(&x), Expr::int(3)));
    let block = b.close_block();
    b.stmt(Stmt::Block(block));

    let code = rangec::compile(&b.finish(), &CodegenConfig::default()).unwrap();
    let main: Vec<Instr> = code
        .iter()
        .skip_while(|i| **i != Instr::Label(MAIN_LABEL.to_string()))
        .take_while(|i| **i != Instr::Halt)
        .cloned()
        .collect();
    assert!(!main
        .iter()
        .any(|i| matches!(i, Instr::Call(l) if l.starts_with("-ref-counter-"))));
}

// ── Runtime guards ──

#[test]
fn test_integer_division_is_guarded() {
    let mut b = ProgramBuilder::new();
    let x = b.declare_init("x", Expr::int(9));
    let zero = b.declare_init("zero", Expr::int(0));
    b.println(vec![Expr::binary(BinOp::Div, Expr::ident(&x), Expr::ident(&zero))]);
    let program = b.finish();

    let code = rangec::compile(&program, &CodegenConfig::default()).unwrap();
    assert!(contains_window(
        &code,
        &[Instr::Duplicate, Instr::JumpFalse(DIVIDE_BY_ZERO.to_string())]
    ));
    let execution = rangec::run(&program, &Config::default()).unwrap();
    assert_eq!(execution.output, "Runtime error: division by zero\n");
}

#[test]
fn test_drain_of_empty_worklist_is_a_no_op() {
    let cells = MachineState::default();
    let counter = RefCounter::new(8).unwrap();
    let mut code = environment(&cells, 0);
    code.append(counter.data());
    code.append(counter.subroutines(&StructTable::new(&Program::default())));
    code.push(Instr::Label(MAIN_LABEL.to_string()));
    code.append(counter.initialize());
    // one flat interval record with a single reference
    code.extend([
        Instr::PushI(20),
        Instr::Call(MEM_MANAGER_ALLOCATE.to_string()),
        Instr::Duplicate,
        Instr::PushI(1),
        Instr::StoreI,
        Instr::Duplicate,
        Instr::PushI(TYPE_CODE_OFFSET),
        Instr::Add,
        Instr::PushI(2),
        Instr::StoreI,
        RefCounter::push_record(),
        RefCounter::drain(),
        RefCounter::drain(),
        RefCounter::drain(),
        Instr::Halt,
    ]);
    code.append(error_handlers());

    let mut machine = Machine::new(&code, &VmConfig::default()).unwrap();
    machine.run().unwrap();
    let heap = machine.heap_stats();
    assert_eq!(heap.allocations, 1);
    assert_eq!(heap.deallocations, 1);
    let index = machine.data_address(WORKLIST_INDEX).unwrap();
    assert_eq!(machine.read_i32(index).unwrap(), 0);
    assert!(machine.stack().is_empty());
}

#[test]
fn test_worklist_overflow_halts_before_corrupting_memory() {
    let mut b = ProgramBuilder::new();
    let a = b.declare_init("a", interval(0, 0));
    for k in 1..=4 {
        b.update(Expr::ident(&a), interval(k, k));
    }
    b.println(vec![Expr::ident(&a)]);
    let program = b.finish();

    let mut config = Config::default();
    config.codegen.worklist_capacity = 3;
    let execution = rangec::run(&program, &config).unwrap();
    assert_eq!(
        execution.output,
        "Runtime error: reference-count decrement worklist overflow\n"
    );

    // four updates and the release of `a` at exit
    config.codegen.worklist_capacity = 5;
    let execution = rangec::run(&program, &config).unwrap();
    assert_eq!(execution.output, "[4, 4]\n");
    assert_eq!(execution.heap.leaked(), 0);
}

// ── Calling convention ──

#[test]
fn test_calls_restore_both_frame_cells() {
    let mut b = ProgramBuilder::new();
    let params = b.begin_function("f", &[("x", Type::Int), ("y", Type::Float)], Type::Int);
    b.ret(Some(Expr::binary(
        BinOp::Add,
        Expr::ident(&params[0]),
        Expr::unary(UnaryOp::ToInt, Expr::ident(&params[1])),
    )));
    b.end_function();
    let r = b.declare_init(
        "r",
        Expr::call("f", vec![Expr::int(1), Expr::float(2.5)], Type::Int),
    );
    b.println(vec![
        Expr::ident(&r),
        Expr::call(
            "f",
            vec![
                Expr::call("f", vec![Expr::int(3), Expr::float(4.0)], Type::Int),
                Expr::float(0.5),
            ],
            Type::Int,
        ),
    ]);

    let code = rangec::compile(&b.finish(), &CodegenConfig::default()).unwrap();
    let mut machine = Machine::new(&code, &VmConfig::default()).unwrap();
    machine.run().unwrap();
    assert_eq!(machine.output(), "3 7\n");
    let top = machine.memory_size();
    let sp = machine.data_address(STACK_POINTER).unwrap();
    let fp = machine.data_address(FRAME_POINTER).unwrap();
    assert_eq!(machine.read_i32(sp).unwrap() as u32, top);
    assert_eq!(machine.read_i32(fp).unwrap() as u32, top);
    assert!(machine.stack().is_empty());
}

/// Run `code` with `Halt` inserted at `at`; returns `(sp, fp)` and the
/// machine for further reads.
fn frame_cells_at(code: &Code, at: usize) -> (u32, u32, Machine) {
    let mut instrs = code.instrs().to_vec();
    instrs.insert(at, Instr::Halt);
    let mut machine = Machine::new(&Code::from(instrs), &VmConfig::default()).unwrap();
    machine.run().unwrap();
    let sp = machine.data_address(STACK_POINTER).unwrap();
    let fp = machine.data_address(FRAME_POINTER).unwrap();
    let sp = machine.read_i32(sp).unwrap() as u32;
    let fp = machine.read_i32(fp).unwrap() as u32;
    (sp, fp, machine)
}

#[test]
fn test_call_boundary_frame_cells() {
    let mut b = ProgramBuilder::new();
    let params = b.begin_function("f", &[("x", Type::Int), ("y", Type::Float)], Type::Int);
    b.ret(Some(Expr::binary(
        BinOp::Add,
        Expr::ident(&params[0]),
        Expr::unary(UnaryOp::ToInt, Expr::ident(&params[1])),
    )));
    b.end_function();
    b.call_stmt(Expr::call(
        "f",
        vec![Expr::int(1), Expr::float(2.5)],
        Type::Int,
    ));
    let code = rangec::compile(&b.finish(), &CodegenConfig::default()).unwrap();

    let instrs = code.instrs();
    let call = instrs
        .iter()
        .position(|i| *i == Instr::Call("-function-f".to_string()))
        .unwrap();
    // main's first statement starts right after the worklist reset
    let reset = [
        Instr::PushD(WORKLIST_INDEX.to_string()),
        Instr::PushI(0),
        Instr::StoreI,
    ];
    let entry = instrs
        .windows(reset.len())
        .position(|w| w == reset)
        .unwrap()
        + reset.len();
    assert!(entry < call);

    let (sp_before_args, fp_before_args, _) = frame_cells_at(&code, entry);
    let (sp_at_call, fp_at_call, machine) = frame_cells_at(&code, call);
    let (sp_after_call, fp_after_call, _) = frame_cells_at(&code, call + 1);

    let top = machine.memory_size();
    assert_eq!(sp_before_args, top);
    assert_eq!(fp_before_args, top);

    // int + float arguments, x nearest the caller's frame
    assert_eq!(sp_before_args - sp_at_call, 12);
    assert_eq!(fp_at_call, top);
    assert_eq!(machine.read_i32(sp_before_args - 4).unwrap(), 1);

    // callee pops its arguments and leaves the int result at sp
    assert_eq!(sp_before_args - sp_after_call, 4);
    assert_eq!(fp_after_call, fp_before_args);
}

#[test]
fn test_interval_result_through_nested_calls() {
    let mut b = ProgramBuilder::new();
    let ty = Type::interval_of(Type::Int);
    let params = b.begin_function("widen", &[("r", ty.clone())], ty.clone());
    b.ret(Some(Expr::interval(
        Expr::binary(BinOp::Sub, Expr::low(Expr::ident(&params[0])), Expr::int(1)),
        Expr::binary(BinOp::Add, Expr::high(Expr::ident(&params[0])), Expr::int(1)),
    )));
    b.end_function();
    b.println(vec![Expr::call(
        "widen",
        vec![Expr::call("widen", vec![interval(5, 6)], ty.clone())],
        ty,
    )]);

    let execution = rangec::run(&b.finish(), &Config::default()).unwrap();
    assert_eq!(execution.output, "[3, 8]\n");
    assert_eq!(execution.heap.allocations, 3);
    assert_eq!(execution.heap.leaked(), 0);
}

// ── Nested records ──

#[test]
fn test_nested_interval_prints_through_children() {
    let mut b = ProgramBuilder::new();
    let n = b.declare_init("n", Expr::interval(interval(1, 2), interval(3, 4)));
    b.println(vec![Expr::ident(&n)]);
    b.println(vec![Expr::high(Expr::ident(&n))]);

    let execution = rangec::run(&b.finish(), &Config::default()).unwrap();
    assert_eq!(execution.output, "[[1, 2], [3, 4]]\n[3, 4]\n");
    assert_eq!(execution.heap.allocations, 3);
    assert_eq!(execution.heap.deallocations, 3);
}

#[test]
fn test_struct_with_nested_member_is_released_recursively() {
    let mut b = ProgramBuilder::new();
    let pair = b.begin_struct("Pair");
    let span = b.member("span", Expr::interval(interval(1, 2), interval(3, 4)));
    b.end_struct();

    let p = b.declare_init("p", Expr::new_struct(pair));
    let q = b.declare_init("q", Expr::ident(&p));
    b.println(vec![Expr::field(Expr::ident(&q), &span)]);
    b.update(Expr::ident(&p), Expr::new_struct(pair));
    b.println(vec![Expr::low(Expr::field(Expr::ident(&p), &span))]);

    let execution = rangec::run(&b.finish(), &Config::default()).unwrap();
    assert_eq!(execution.output, "[[1, 2], [3, 4]]\n[1, 2]\n");
    assert_eq!(execution.heap.allocations, 8);
    assert_eq!(execution.heap.deallocations, 8);
}

// ── Hand-off ──

#[test]
fn test_json_program_with_discovered_config() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("rangec.toml"),
        "[codegen]\nworklist_capacity = 16\n",
    )
    .unwrap();
    let nested = dir.path().join("src");
    std::fs::create_dir(&nested).unwrap();

    let mut b = ProgramBuilder::new();
    let a = b.declare_init("a", interval(2, 9));
    b.println(vec![Expr::ident(&a)]);
    let text = b.finish().to_json().unwrap();
    let input = nested.join("prog.json");
    std::fs::write(&input, &text).unwrap();

    let config = Config::discover(&nested).unwrap();
    assert_eq!(config.codegen.worklist_capacity, 16);
    let code = rangec::compile_json(&std::fs::read_to_string(&input).unwrap(), &config.codegen)
        .unwrap();
    assert!(code.instrs().contains(&Instr::DataZ(16 * 4)));
    let execution = rangec::vm::execute(&code, &config.vm).unwrap();
    assert_eq!(execution.output, "[2, 9]\n");
}
