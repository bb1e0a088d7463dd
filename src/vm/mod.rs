//! Simulator for the target stack machine.
//!
//! Executes emitted [`Code`] directly: data directives are laid out from
//! address zero in emission order, the memory manager's region follows the
//! data segment, and the frame stack grows down from `Memtop`. Values on
//! the operand stack are tagged integers or floats, so instruction misuse
//! surfaces as a [`Fault`] rather than as garbage.
//!
//! Output of `Printf` is captured, not written to stdout.

pub mod format;
pub mod heap;

use std::collections::HashMap;

use crate::asm::{Code, Instr};
use crate::config::VmConfig;
use crate::runtime::{MEM_MANAGER_ALLOCATE, MEM_MANAGER_DEALLOCATE};

pub use heap::{FirstFitHeap, HeapStats, MemoryManager};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Value {
    Int(i32),
    Float(f64),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Fault {
    #[error("operand stack underflow at instruction {pc}")]
    StackUnderflow { pc: usize },
    #[error("expected {expected} operand at instruction {pc}, found {found:?}")]
    TypeMismatch {
        pc: usize,
        expected: &'static str,
        found: Value,
    },
    #[error("access of {width} bytes at {address} is outside memory")]
    InvalidAddress { address: i64, width: u32 },
    #[error("access to unallocated heap memory at {0}")]
    UseAfterFree(u32),
    #[error("deallocation of {0}, which is not a live allocation")]
    InvalidFree(u32),
    #[error("memory manager cannot satisfy a request for {0} bytes")]
    OutOfMemory(u32),
    #[error("undefined label `{0}`")]
    UnknownLabel(String),
    #[error("label `{0}` defined twice")]
    DuplicateLabel(String),
    #[error("integer division by zero at instruction {pc}")]
    DivideByZero { pc: usize },
    #[error("step limit of {0} instructions exceeded")]
    StepLimit(u64),
    #[error("data segment and heap do not fit in {0} bytes of memory")]
    MemoryLayout(u32),
    #[error("bad printf format: {0}")]
    BadFormat(String),
    #[error("execution ran past the last instruction")]
    RanOffEnd,
}

/// Result of a completed run.
#[derive(Clone, Debug, PartialEq)]
pub struct Execution {
    pub output: String,
    pub steps: u64,
    pub heap: HeapStats,
}

pub struct Machine {
    code: Vec<Instr>,
    labels: HashMap<String, usize>,
    data_labels: HashMap<String, u32>,
    memory: Vec<u8>,
    stack: Vec<Value>,
    pc: usize,
    heap: Box<dyn MemoryManager>,
    output: String,
    steps: u64,
    step_limit: u64,
    halted: bool,
}

impl Machine {
    /// Assemble `program` into a fresh machine.
    pub fn new(program: &Code, config: &VmConfig) -> Result<Self, Fault> {
        let size = config.memory_size as usize;
        let mut memory = vec![0u8; size];
        let mut code = Vec::new();
        let mut labels = HashMap::new();
        let mut data_labels = HashMap::new();
        let mut cursor: usize = 0;

        for instr in program {
            let bytes: Vec<u8> = match instr {
                Instr::Label(name) => {
                    if labels.insert(name.clone(), code.len()).is_some() {
                        return Err(Fault::DuplicateLabel(name.clone()));
                    }
                    continue;
                }
                Instr::DLabel(name) => {
                    if data_labels.insert(name.clone(), cursor as u32).is_some() {
                        return Err(Fault::DuplicateLabel(name.clone()));
                    }
                    continue;
                }
                Instr::DataZ(n) => vec![0; *n as usize],
                Instr::DataI(n) => n.to_le_bytes().to_vec(),
                Instr::DataF(x) => x.to_le_bytes().to_vec(),
                Instr::DataC(c) => vec![*c],
                Instr::DataS(s) => s.bytes().chain(std::iter::once(0)).collect(),
                other => {
                    code.push(other.clone());
                    continue;
                }
            };
            let end = cursor + bytes.len();
            if end > size {
                return Err(Fault::MemoryLayout(config.memory_size));
            }
            memory[cursor..end].copy_from_slice(&bytes);
            cursor = end;
        }

        for instr in &code {
            if let Some(target) = instr.target() {
                let host = target == MEM_MANAGER_ALLOCATE || target == MEM_MANAGER_DEALLOCATE;
                if !host && !labels.contains_key(target) {
                    return Err(Fault::UnknownLabel(target.to_string()));
                }
            }
        }

        let heap_base = (cursor as u32).div_ceil(8) * 8;
        let heap_limit = heap_base
            .checked_add(config.heap_size)
            .filter(|&l| l <= config.memory_size)
            .ok_or(Fault::MemoryLayout(config.memory_size))?;
        log::debug!(
            "loaded {} instructions, {} data bytes, heap [{}, {})",
            code.len(),
            cursor,
            heap_base,
            heap_limit
        );

        Ok(Self {
            code,
            labels,
            data_labels,
            memory,
            stack: Vec::new(),
            pc: 0,
            heap: Box::new(FirstFitHeap::new(heap_base, heap_limit)),
            output: String::new(),
            steps: 0,
            step_limit: config.step_limit,
            halted: false,
        })
    }

    // ── Inspection ──────────────────────────────────────────────

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn heap_stats(&self) -> HeapStats {
        self.heap.stats()
    }

    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn memory_size(&self) -> u32 {
        self.memory.len() as u32
    }

    pub fn data_address(&self, label: &str) -> Option<u32> {
        self.data_labels.get(label).copied()
    }

    pub fn read_i32(&self, address: u32) -> Result<i32, Fault> {
        let bytes = self.bytes(address as i64, 4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    // ── Execution ───────────────────────────────────────────────

    /// Run until `Halt`.
    pub fn run(&mut self) -> Result<(), Fault> {
        while !self.halted {
            self.step()?;
        }
        log::debug!("halted after {} steps", self.steps);
        Ok(())
    }

    /// Execute one instruction.
    pub fn step(&mut self) -> Result<(), Fault> {
        if self.steps >= self.step_limit {
            return Err(Fault::StepLimit(self.step_limit));
        }
        self.steps += 1;
        let instr = self.code.get(self.pc).cloned().ok_or(Fault::RanOffEnd)?;
        let at = self.pc;
        self.pc += 1;

        match instr {
            Instr::PushI(n) => self.stack.push(Value::Int(n)),
            Instr::PushF(x) => self.stack.push(Value::Float(x)),
            Instr::PushD(label) => {
                let address = self
                    .data_address(&label)
                    .ok_or(Fault::UnknownLabel(label))?;
                self.stack.push(Value::Int(address as i32));
            }

            Instr::Duplicate => {
                let v = self.pop(at)?;
                self.stack.extend([v, v]);
            }
            Instr::Exchange => {
                let b = self.pop(at)?;
                let a = self.pop(at)?;
                self.stack.extend([b, a]);
            }
            Instr::Pop => {
                self.pop(at)?;
            }

            Instr::LoadC => {
                let address = self.pop_int(at)?;
                let byte = self.bytes(address as i64, 1)?[0];
                self.stack.push(Value::Int(byte as i32));
            }
            Instr::LoadI => {
                let address = self.pop_int(at)?;
                let b = self.bytes(address as i64, 4)?;
                self.stack
                    .push(Value::Int(i32::from_le_bytes([b[0], b[1], b[2], b[3]])));
            }
            Instr::LoadF => {
                let address = self.pop_int(at)?;
                let b = self.bytes(address as i64, 8)?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(b);
                self.stack.push(Value::Float(f64::from_le_bytes(raw)));
            }
            Instr::StoreC => {
                let v = self.pop_int(at)?;
                let address = self.pop_int(at)?;
                self.bytes_mut(address as i64, 1)?[0] = v as u8;
            }
            Instr::StoreI => {
                let v = self.pop_int(at)?;
                let address = self.pop_int(at)?;
                self.bytes_mut(address as i64, 4)?
                    .copy_from_slice(&v.to_le_bytes());
            }
            Instr::StoreF => {
                let v = self.pop_float(at)?;
                let address = self.pop_int(at)?;
                self.bytes_mut(address as i64, 8)?
                    .copy_from_slice(&v.to_le_bytes());
            }

            Instr::Add => self.int_binary(at, |a, b| Ok(a.wrapping_add(b)))?,
            Instr::Subtract => self.int_binary(at, |a, b| Ok(a.wrapping_sub(b)))?,
            Instr::Multiply => self.int_binary(at, |a, b| Ok(a.wrapping_mul(b)))?,
            Instr::Divide => self.int_binary(at, |a, b| {
                if b == 0 {
                    Err(Fault::DivideByZero { pc: at })
                } else {
                    Ok(a.wrapping_div(b))
                }
            })?,
            Instr::Negate => {
                let a = self.pop_int(at)?;
                self.stack.push(Value::Int(a.wrapping_neg()));
            }
            Instr::BTAnd => self.int_binary(at, |a, b| Ok(a & b))?,
            Instr::BTOr => self.int_binary(at, |a, b| Ok(a | b))?,
            Instr::BNegate => {
                let a = self.pop_int(at)?;
                self.stack.push(Value::Int((a == 0) as i32));
            }

            Instr::FAdd => self.float_binary(at, |a, b| a + b)?,
            Instr::FSubtract => self.float_binary(at, |a, b| a - b)?,
            Instr::FMultiply => self.float_binary(at, |a, b| a * b)?,
            Instr::FDivide => self.float_binary(at, |a, b| a / b)?,
            Instr::FNegate => {
                let a = self.pop_float(at)?;
                self.stack.push(Value::Float(-a));
            }
            Instr::ConvertF => {
                let a = self.pop_int(at)?;
                self.stack.push(Value::Float(a as f64));
            }
            Instr::ConvertI => {
                let a = self.pop_float(at)?;
                self.stack.push(Value::Int(a as i32));
            }

            Instr::Jump(label) => self.jump(&label)?,
            Instr::JumpTrue(label) => {
                if self.pop_int(at)? != 0 {
                    self.jump(&label)?;
                }
            }
            Instr::JumpFalse(label) => {
                if self.pop_int(at)? == 0 {
                    self.jump(&label)?;
                }
            }
            Instr::JumpPos(label) => {
                if self.pop_int(at)? > 0 {
                    self.jump(&label)?;
                }
            }
            Instr::JumpNeg(label) => {
                if self.pop_int(at)? < 0 {
                    self.jump(&label)?;
                }
            }
            Instr::JumpFZero(label) => {
                if self.pop_float(at)? == 0.0 {
                    self.jump(&label)?;
                }
            }
            Instr::JumpFPos(label) => {
                if self.pop_float(at)? > 0.0 {
                    self.jump(&label)?;
                }
            }
            Instr::JumpFNeg(label) => {
                if self.pop_float(at)? < 0.0 {
                    self.jump(&label)?;
                }
            }

            Instr::Call(label) => self.call(at, &label)?,
            Instr::Return => {
                let target = self.pop_int(at)?;
                self.pc = usize::try_from(target).map_err(|_| Fault::RanOffEnd)?;
            }
            Instr::Halt => self.halted = true,

            Instr::Printf => self.printf(at)?,
            Instr::Memtop => self.stack.push(Value::Int(self.memory.len() as i32)),
            Instr::Nop => {}

            // Labels and data never reach the code vector.
            Instr::Label(_)
            | Instr::DLabel(_)
            | Instr::DataZ(_)
            | Instr::DataI(_)
            | Instr::DataF(_)
            | Instr::DataC(_)
            | Instr::DataS(_) => {}
        }
        Ok(())
    }

    fn call(&mut self, at: usize, label: &str) -> Result<(), Fault> {
        match label {
            MEM_MANAGER_ALLOCATE if !self.labels.contains_key(label) => {
                let size = self.pop_int(at)?;
                let address = self.heap.allocate(size.max(0) as u32)?;
                self.stack.push(Value::Int(address as i32));
            }
            MEM_MANAGER_DEALLOCATE if !self.labels.contains_key(label) => {
                let address = self.pop_int(at)?;
                self.heap.deallocate(address as u32)?;
            }
            _ => {
                self.stack.push(Value::Int(self.pc as i32));
                self.jump(label)?;
            }
        }
        Ok(())
    }

    fn printf(&mut self, at: usize) -> Result<(), Fault> {
        let format_address = self.pop_int(at)?;
        let text = self.read_c_string(format_address as u32)?;
        let pieces = format::parse(&text)?;
        let count = format::argument_count(&pieces);
        if self.stack.len() < count {
            return Err(Fault::StackUnderflow { pc: at });
        }
        let args = self.stack.split_off(self.stack.len() - count);
        let rendered = format::render(&pieces, &args, |a| self.read_c_string(a))?;
        self.output.push_str(&rendered);
        Ok(())
    }

    fn read_c_string(&self, address: u32) -> Result<String, Fault> {
        let start = address as usize;
        let tail = self
            .memory
            .get(start..)
            .ok_or(Fault::InvalidAddress {
                address: address as i64,
                width: 1,
            })?;
        let len = tail.iter().position(|&b| b == 0).ok_or(Fault::InvalidAddress {
            address: address as i64,
            width: tail.len() as u32,
        })?;
        Ok(String::from_utf8_lossy(&tail[..len]).into_owned())
    }

    fn jump(&mut self, label: &str) -> Result<(), Fault> {
        self.pc = *self
            .labels
            .get(label)
            .ok_or_else(|| Fault::UnknownLabel(label.to_string()))?;
        Ok(())
    }

    // ── Operand stack ───────────────────────────────────────────

    fn pop(&mut self, pc: usize) -> Result<Value, Fault> {
        self.stack.pop().ok_or(Fault::StackUnderflow { pc })
    }

    fn pop_int(&mut self, pc: usize) -> Result<i32, Fault> {
        match self.pop(pc)? {
            Value::Int(n) => Ok(n),
            found => Err(Fault::TypeMismatch {
                pc,
                expected: "integer",
                found,
            }),
        }
    }

    fn pop_float(&mut self, pc: usize) -> Result<f64, Fault> {
        match self.pop(pc)? {
            Value::Float(x) => Ok(x),
            found => Err(Fault::TypeMismatch {
                pc,
                expected: "float",
                found,
            }),
        }
    }

    fn int_binary(
        &mut self,
        pc: usize,
        op: impl Fn(i32, i32) -> Result<i32, Fault>,
    ) -> Result<(), Fault> {
        let b = self.pop_int(pc)?;
        let a = self.pop_int(pc)?;
        self.stack.push(Value::Int(op(a, b)?));
        Ok(())
    }

    fn float_binary(&mut self, pc: usize, op: impl Fn(f64, f64) -> f64) -> Result<(), Fault> {
        let b = self.pop_float(pc)?;
        let a = self.pop_float(pc)?;
        self.stack.push(Value::Float(op(a, b)));
        Ok(())
    }

    // ── Memory ──────────────────────────────────────────────────

    fn check(&self, address: i64, width: u32) -> Result<usize, Fault> {
        if address < 0 || address + width as i64 > self.memory.len() as i64 {
            return Err(Fault::InvalidAddress { address, width });
        }
        let address = address as u32;
        if self.heap.manages(address) {
            self.heap.check_access(address, width)?;
        }
        Ok(address as usize)
    }

    fn bytes(&self, address: i64, width: u32) -> Result<&[u8], Fault> {
        let start = self.check(address, width)?;
        Ok(&self.memory[start..start + width as usize])
    }

    fn bytes_mut(&mut self, address: i64, width: u32) -> Result<&mut [u8], Fault> {
        let start = self.check(address, width)?;
        Ok(&mut self.memory[start..start + width as usize])
    }
}

/// Assemble and run `program` to completion.
pub fn execute(program: &Code, config: &VmConfig) -> Result<Execution, Fault> {
    let mut machine = Machine::new(program, config)?;
    machine.run()?;
    Ok(Execution {
        output: machine.output,
        steps: machine.steps,
        heap: machine.heap.stats(),
    })
}

#[cfg(test)]
mod tests;
