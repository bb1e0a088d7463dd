use super::*;

fn config() -> VmConfig {
    VmConfig {
        memory_size: 4096,
        heap_size: 1024,
        step_limit: 10_000,
    }
}

fn run(instrs: Vec<Instr>) -> Result<Execution, Fault> {
    execute(&Code::from(instrs), &config())
}

fn s(label: &str) -> String {
    label.to_string()
}

#[test]
fn test_printf_formats() {
    let out = run(vec![
        Instr::DLabel(s("$fmt")),
        Instr::DataS(s("%d %g %c|%s\n")),
        Instr::DLabel(s("$word")),
        Instr::DataS(s("ok")),
        Instr::PushI(-12),
        Instr::PushF(2.5),
        Instr::PushI(120),
        Instr::PushD(s("$word")),
        Instr::PushD(s("$fmt")),
        Instr::Printf,
        Instr::Halt,
    ])
    .unwrap();
    assert_eq!(out.output, "-12 2.5 x|ok\n");
    assert_eq!(out.steps, 7);
}

#[test]
fn test_integer_and_float_arithmetic() {
    let out = run(vec![
        Instr::DLabel(s("$d")),
        Instr::DataS(s("%d,%g")),
        Instr::PushI(7),
        Instr::PushI(2),
        Instr::Subtract,
        Instr::PushI(3),
        Instr::Multiply,
        Instr::PushI(4),
        Instr::Divide,
        Instr::PushI(1),
        Instr::ConvertF,
        Instr::PushF(4.0),
        Instr::FDivide,
        Instr::FNegate,
        Instr::PushD(s("$d")),
        Instr::Printf,
        Instr::Halt,
    ])
    .unwrap();
    assert_eq!(out.output, "3,-0.25");
}

#[test]
fn test_memory_round_trip_and_data_layout() {
    let code: Code = vec![
        Instr::DLabel(s("$zero")),
        Instr::DataZ(8),
        Instr::DLabel(s("$cell")),
        Instr::DataI(41),
        Instr::PushD(s("$cell")),
        Instr::PushD(s("$cell")),
        Instr::LoadI,
        Instr::PushI(1),
        Instr::Add,
        Instr::StoreI,
        Instr::Halt,
    ]
    .into();
    let mut machine = Machine::new(&code, &config()).unwrap();
    machine.run().unwrap();
    assert_eq!(machine.data_address("$zero"), Some(0));
    assert_eq!(machine.data_address("$cell"), Some(8));
    assert_eq!(machine.read_i32(8).unwrap(), 42);
    assert!(machine.stack().is_empty());
    assert!(machine.is_halted());
}

#[test]
fn test_call_and_return() {
    let code: Code = vec![
        Instr::DLabel(s("$fmt")),
        Instr::DataS(s("%d")),
        Instr::PushI(20),
        Instr::Call(s("double")),
        Instr::PushD(s("$fmt")),
        Instr::Printf,
        Instr::Halt,
        Instr::Label(s("double")),
        Instr::Exchange,
        Instr::Duplicate,
        Instr::Add,
        Instr::Exchange,
        Instr::Return,
    ]
    .into();
    let out = execute(&code, &config()).unwrap();
    assert_eq!(out.output, "40");
}

#[test]
fn test_conditional_jumps() {
    let out = run(vec![
        Instr::DLabel(s("$y")),
        Instr::DataS(s("y")),
        Instr::DLabel(s("$n")),
        Instr::DataS(s("n")),
        Instr::PushF(-0.5),
        Instr::JumpFNeg(s("neg")),
        Instr::PushD(s("$n")),
        Instr::Printf,
        Instr::Halt,
        Instr::Label(s("neg")),
        Instr::PushI(0),
        Instr::JumpTrue(s("wrong")),
        Instr::PushI(0),
        Instr::BNegate,
        Instr::JumpFalse(s("wrong")),
        Instr::PushD(s("$y")),
        Instr::Printf,
        Instr::Halt,
        Instr::Label(s("wrong")),
        Instr::PushD(s("$n")),
        Instr::Printf,
        Instr::Halt,
    ])
    .unwrap();
    assert_eq!(out.output, "y");
}

#[test]
fn test_memory_manager_routines() {
    let out = run(vec![
        Instr::PushI(20),
        Instr::Call(s(MEM_MANAGER_ALLOCATE)),
        Instr::Duplicate,
        Instr::PushI(5),
        Instr::StoreI,
        Instr::Call(s(MEM_MANAGER_DEALLOCATE)),
        Instr::Halt,
    ])
    .unwrap();
    assert_eq!(out.heap.allocations, 1);
    assert_eq!(out.heap.deallocations, 1);
    assert_eq!(out.heap.leaked(), 0);
}

#[test]
fn test_freed_record_cannot_be_read() {
    let err = run(vec![
        Instr::PushI(12),
        Instr::Call(s(MEM_MANAGER_ALLOCATE)),
        Instr::Duplicate,
        Instr::Call(s(MEM_MANAGER_DEALLOCATE)),
        Instr::LoadI,
        Instr::Halt,
    ])
    .unwrap_err();
    assert!(matches!(err, Fault::UseAfterFree(_)));
}

#[test]
fn test_double_free_faults() {
    let err = run(vec![
        Instr::PushI(12),
        Instr::Call(s(MEM_MANAGER_ALLOCATE)),
        Instr::Duplicate,
        Instr::Call(s(MEM_MANAGER_DEALLOCATE)),
        Instr::Call(s(MEM_MANAGER_DEALLOCATE)),
        Instr::Halt,
    ])
    .unwrap_err();
    assert!(matches!(err, Fault::InvalidFree(_)));
}

#[test]
fn test_faults() {
    assert_eq!(
        run(vec![Instr::Pop]).unwrap_err(),
        Fault::StackUnderflow { pc: 0 }
    );
    assert!(matches!(
        run(vec![Instr::PushF(1.0), Instr::PushI(1), Instr::Add]).unwrap_err(),
        Fault::TypeMismatch { pc: 2, .. }
    ));
    assert_eq!(
        run(vec![Instr::Jump(s("nowhere"))]).unwrap_err(),
        Fault::UnknownLabel(s("nowhere"))
    );
    assert_eq!(
        run(vec![Instr::Label(s("spin")), Instr::Jump(s("spin"))]).unwrap_err(),
        Fault::StepLimit(10_000)
    );
    assert_eq!(run(vec![Instr::Nop]).unwrap_err(), Fault::RanOffEnd);
    assert!(matches!(
        run(vec![Instr::PushI(-4), Instr::LoadI]).unwrap_err(),
        Fault::InvalidAddress { .. }
    ));
    assert_eq!(
        run(vec![Instr::PushI(1), Instr::PushI(0), Instr::Divide]).unwrap_err(),
        Fault::DivideByZero { pc: 2 }
    );
}

#[test]
fn test_memtop_and_layout_checks() {
    let out = Machine::new(&Code::from(vec![Instr::Memtop, Instr::Halt]), &config()).map(|mut m| {
        m.run().unwrap();
        m.stack().to_vec()
    });
    assert_eq!(out.unwrap(), vec![Value::Int(4096)]);

    let too_big = VmConfig {
        memory_size: 64,
        heap_size: 60,
        step_limit: 10,
    };
    let code = Code::from(vec![Instr::DLabel(s("$x")), Instr::DataZ(16), Instr::Halt]);
    assert_eq!(Machine::new(&code, &too_big).err(), Some(Fault::MemoryLayout(64)));

    let dup = Code::from(vec![Instr::Label(s("a")), Instr::Label(s("a"))]);
    assert_eq!(
        Machine::new(&dup, &config()).err(),
        Some(Fault::DuplicateLabel(s("a")))
    );
}
