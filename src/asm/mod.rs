//! Target instruction set and instruction sequences.
//!
//! Instructions operate on the VM's operand stack. Memory instructions take
//! the address below the value (`[.. addr value] StoreI -> [..]`), jumps
//! pop their condition, `Call` pushes the return address and `Return` pops
//! it.

pub mod fragment;
pub mod labels;

use std::fmt;

use crate::ast::Type;

pub use fragment::{Fragment, FragmentError, Shape};
pub use labels::{LabelGroup, Labeller};

// ─── Instructions ──────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub enum Instr {
    // ── Data directives ──
    DLabel(String),
    DataZ(u32),
    DataI(i32),
    DataF(f64),
    DataC(u8),
    /// NUL-terminated string.
    DataS(String),

    // ── Labels and literals ──
    Label(String),
    PushI(i32),
    PushF(f64),
    /// Push the address of a data label.
    PushD(String),

    // ── Stack ──
    Duplicate,
    Exchange,
    Pop,

    // ── Memory ──
    LoadC,
    LoadI,
    LoadF,
    StoreC,
    StoreI,
    StoreF,

    // ── Integer arithmetic ──
    Add,
    Subtract,
    Multiply,
    Divide,
    Negate,

    // ── Float arithmetic ──
    FAdd,
    FSubtract,
    FMultiply,
    FDivide,
    FNegate,
    ConvertF,
    ConvertI,

    // ── Logic ──
    BTAnd,
    BTOr,
    /// Boolean not: zero becomes 1, anything else 0.
    BNegate,

    // ── Control flow ──
    Jump(String),
    JumpTrue(String),
    JumpFalse(String),
    JumpPos(String),
    JumpNeg(String),
    JumpFZero(String),
    JumpFPos(String),
    JumpFNeg(String),
    Call(String),
    Return,
    Halt,

    // ── Environment ──
    Printf,
    Memtop,
    Nop,
}

impl Instr {
    pub fn is_data(&self) -> bool {
        matches!(
            self,
            Instr::DLabel(_)
                | Instr::DataZ(_)
                | Instr::DataI(_)
                | Instr::DataF(_)
                | Instr::DataC(_)
                | Instr::DataS(_)
        )
    }

    /// Target label of a jump or call.
    pub fn target(&self) -> Option<&str> {
        match self {
            Instr::Jump(l)
            | Instr::JumpTrue(l)
            | Instr::JumpFalse(l)
            | Instr::JumpPos(l)
            | Instr::JumpNeg(l)
            | Instr::JumpFZero(l)
            | Instr::JumpFPos(l)
            | Instr::JumpFNeg(l)
            | Instr::Call(l) => Some(l),
            _ => None,
        }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::DLabel(l) => write!(f, "DLabel {}", l),
            Instr::DataZ(n) => write!(f, "DataZ {}", n),
            Instr::DataI(n) => write!(f, "DataI {}", n),
            Instr::DataF(x) => write!(f, "DataF {:?}", x),
            Instr::DataC(c) => write!(f, "DataC {}", c),
            Instr::DataS(s) => write!(f, "DataS \"{}\"", s.escape_debug()),
            Instr::Label(l) => write!(f, "Label {}", l),
            Instr::PushI(n) => write!(f, "PushI {}", n),
            Instr::PushF(x) => write!(f, "PushF {:?}", x),
            Instr::PushD(l) => write!(f, "PushD {}", l),
            Instr::Duplicate => write!(f, "Duplicate"),
            Instr::Exchange => write!(f, "Exchange"),
            Instr::Pop => write!(f, "Pop"),
            Instr::LoadC => write!(f, "LoadC"),
            Instr::LoadI => write!(f, "LoadI"),
            Instr::LoadF => write!(f, "LoadF"),
            Instr::StoreC => write!(f, "StoreC"),
            Instr::StoreI => write!(f, "StoreI"),
            Instr::StoreF => write!(f, "StoreF"),
            Instr::Add => write!(f, "Add"),
            Instr::Subtract => write!(f, "Subtract"),
            Instr::Multiply => write!(f, "Multiply"),
            Instr::Divide => write!(f, "Divide"),
            Instr::Negate => write!(f, "Negate"),
            Instr::FAdd => write!(f, "FAdd"),
            Instr::FSubtract => write!(f, "FSubtract"),
            Instr::FMultiply => write!(f, "FMultiply"),
            Instr::FDivide => write!(f, "FDivide"),
            Instr::FNegate => write!(f, "FNegate"),
            Instr::ConvertF => write!(f, "ConvertF"),
            Instr::ConvertI => write!(f, "ConvertI"),
            Instr::BTAnd => write!(f, "BTAnd"),
            Instr::BTOr => write!(f, "BTOr"),
            Instr::BNegate => write!(f, "BNegate"),
            Instr::Jump(l) => write!(f, "Jump {}", l),
            Instr::JumpTrue(l) => write!(f, "JumpTrue {}", l),
            Instr::JumpFalse(l) => write!(f, "JumpFalse {}", l),
            Instr::JumpPos(l) => write!(f, "JumpPos {}", l),
            Instr::JumpNeg(l) => write!(f, "JumpNeg {}", l),
            Instr::JumpFZero(l) => write!(f, "JumpFZero {}", l),
            Instr::JumpFPos(l) => write!(f, "JumpFPos {}", l),
            Instr::JumpFNeg(l) => write!(f, "JumpFNeg {}", l),
            Instr::Call(l) => write!(f, "Call {}", l),
            Instr::Return => write!(f, "Return"),
            Instr::Halt => write!(f, "Halt"),
            Instr::Printf => write!(f, "Printf"),
            Instr::Memtop => write!(f, "Memtop"),
            Instr::Nop => write!(f, "Nop"),
        }
    }
}

/// Load of a value of type `ty` from the address on top of the stack.
/// `None` for `Void`, which has no storage.
pub fn load_instr(ty: &Type) -> Option<Instr> {
    match ty {
        Type::Bool | Type::Char => Some(Instr::LoadC),
        Type::Float => Some(Instr::LoadF),
        Type::Int | Type::Interval(_) | Type::Struct(_) => Some(Instr::LoadI),
        Type::Void => None,
    }
}

/// Store of a value of type `ty`: `[.. addr value] -> [..]`.
pub fn store_instr(ty: &Type) -> Option<Instr> {
    match ty {
        Type::Bool | Type::Char => Some(Instr::StoreC),
        Type::Float => Some(Instr::StoreF),
        Type::Int | Type::Interval(_) | Type::Struct(_) => Some(Instr::StoreI),
        Type::Void => None,
    }
}

// ─── Code sequences ────────────────────────────────────────────────

/// An ordered instruction sequence.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Code(Vec<Instr>);

impl Code {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, instr: Instr) {
        self.0.push(instr);
    }

    pub fn append(&mut self, mut other: Code) {
        self.0.append(&mut other.0);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Instr> {
        self.0.iter()
    }

    pub fn instrs(&self) -> &[Instr] {
        &self.0
    }

    /// Count of instructions equal to `instr`.
    pub fn count(&self, instr: &Instr) -> usize {
        self.0.iter().filter(|i| *i == instr).count()
    }

    pub fn calls(&self, label: &str) -> usize {
        self.0
            .iter()
            .filter(|i| matches!(i, Instr::Call(l) if l == label))
            .count()
    }
}

impl From<Vec<Instr>> for Code {
    fn from(instrs: Vec<Instr>) -> Self {
        Self(instrs)
    }
}

impl FromIterator<Instr> for Code {
    fn from_iter<I: IntoIterator<Item = Instr>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<Instr> for Code {
    fn extend<I: IntoIterator<Item = Instr>>(&mut self, iter: I) {
        self.0.extend(iter)
    }
}

impl IntoIterator for Code {
    type Item = Instr;
    type IntoIter = std::vec::IntoIter<Instr>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Code {
    type Item = &'a Instr;
    type IntoIter = std::slice::Iter<'a, Instr>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Assembly text: labels flush left, everything else indented.
impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for instr in &self.0 {
            match instr {
                Instr::Label(_) | Instr::DLabel(_) => writeln!(f, "{}", instr)?,
                _ => writeln!(f, "    {}", instr)?,
            }
        }
        Ok(())
    }
}
