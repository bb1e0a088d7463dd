//! Typed, desugared syntax tree handed over by the front end.
//!
//! By the time a tree reaches the back end every expression carries its
//! concrete type, every scope knows its allocated size and every identifier
//! is bound to a resolved storage location. Interval comparisons, unions,
//! intersections and membership tests have already been rewritten into the
//! primitive forms below.
//!
//! The tree is a plain serde data model so that any front end can hand it
//! over as JSON.

pub mod builder;

use serde::{Deserialize, Serialize};

use crate::layout::POINTER_SIZE;
use crate::span::{Span, Spanned};

// ─── Types ─────────────────────────────────────────────────────────

/// Identifier of a struct definition, matched against [`StructDef::id`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StructId(pub u32);

/// Concrete (post-inference) types.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    Bool,
    Char,
    Int,
    Float,
    /// `low .. high` over a subtype; nested when the subtype is an interval.
    Interval(Box<Type>),
    Struct(StructId),
    /// Result type of procedures and statements.
    Void,
}

impl Type {
    pub fn interval_of(subtype: Type) -> Type {
        Type::Interval(Box::new(subtype))
    }

    /// Bytes a value of this type occupies in a variable slot.
    pub fn size(&self) -> u32 {
        match self {
            Type::Bool | Type::Char => 1,
            Type::Int => 4,
            Type::Float => 8,
            Type::Interval(_) | Type::Struct(_) => POINTER_SIZE,
            Type::Void => 0,
        }
    }

    /// Values of heap types are pointers to reference-counted records.
    pub fn is_heap(&self) -> bool {
        matches!(self, Type::Interval(_) | Type::Struct(_))
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Type::Float)
    }

    /// The innermost scalar of a (possibly nested) interval type.
    pub fn base_scalar(&self) -> &Type {
        match self {
            Type::Interval(sub) => sub.base_scalar(),
            other => other,
        }
    }

    pub fn subtype(&self) -> Option<&Type> {
        match self {
            Type::Interval(sub) => Some(sub),
            _ => None,
        }
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Bool => write!(f, "bool"),
            Type::Char => write!(f, "char"),
            Type::Int => write!(f, "int"),
            Type::Float => write!(f, "float"),
            Type::Interval(sub) => write!(f, "[{}]", sub),
            Type::Struct(id) => write!(f, "struct#{}", id.0),
            Type::Void => write!(f, "void"),
        }
    }
}

// ─── Bindings and scopes ───────────────────────────────────────────

/// Where a binding's storage lives. Offsets are assigned by the front end's
/// allocation strategy; the back end never invents them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Storage {
    /// Offset into the global memory block.
    Global { offset: i32 },
    /// Non-negative offset from the frame pointer (parameters).
    FramePositive { offset: i32 },
    /// Negative offset from the frame pointer (locals).
    FrameNegative { offset: i32 },
    /// Offset from the start of the enclosing struct record, reached
    /// through the self pointer of the current initializer or method.
    Member { offset: i32 },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub name: String,
    pub ty: Type,
    pub storage: Storage,
}

impl Binding {
    pub fn new(name: &str, ty: Type, storage: Storage) -> Self {
        Self {
            name: name.to_string(),
            ty,
            storage,
        }
    }

    /// Heap bindings owned by a scope. Members belong to their record.
    pub fn is_owned_reference(&self) -> bool {
        self.ty.is_heap() && !matches!(self.storage, Storage::Member { .. })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Scope {
    pub allocated_size: u32,
    pub bindings: Vec<Binding>,
}

impl Scope {
    /// Heap-typed bindings this scope must release on exit.
    pub fn owned_references(&self) -> impl Iterator<Item = &Binding> {
        self.bindings.iter().filter(|b| b.is_owned_reference())
    }
}

// ─── Expressions ───────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    Eq,
    NotEq,
    And,
    Or,
}

impl BinOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Less
                | BinOp::LessEq
                | BinOp::Greater
                | BinOp::GreaterEq
                | BinOp::Eq
                | BinOp::NotEq
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Less => "<",
            BinOp::LessEq => "<=",
            BinOp::Greater => ">",
            BinOp::GreaterEq => ">=",
            BinOp::Eq => "==",
            BinOp::NotEq => "!=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Negate,
    ToFloat,
    ToInt,
    ToChar,
    ToBool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bound {
    Low,
    High,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: Type,
    #[serde(default)]
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    Bool(bool),
    Char(char),
    Int(i32),
    Float(f64),
    Identifier(Binding),
    /// The record pointer of the enclosing initializer or method.
    This,
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Interval {
        low: Box<Expr>,
        high: Box<Expr>,
    },
    /// `.low` / `.high`
    Bound {
        interval: Box<Expr>,
        bound: Bound,
    },
    /// `object.member`, the member binding carries a `Storage::Member` offset.
    Field {
        object: Box<Expr>,
        member: Binding,
    },
    MethodCall {
        object: Box<Expr>,
        method: String,
        args: Vec<Expr>,
    },
    Call {
        function: String,
        args: Vec<Expr>,
    },
    New(StructId),
}

impl Expr {
    pub fn new(kind: ExprKind, ty: Type) -> Self {
        Self {
            kind,
            ty,
            span: Span::dummy(),
        }
    }

    pub fn at(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn int(value: i32) -> Self {
        Self::new(ExprKind::Int(value), Type::Int)
    }

    pub fn float(value: f64) -> Self {
        Self::new(ExprKind::Float(value), Type::Float)
    }

    pub fn boolean(value: bool) -> Self {
        Self::new(ExprKind::Bool(value), Type::Bool)
    }

    pub fn character(value: char) -> Self {
        Self::new(ExprKind::Char(value), Type::Char)
    }

    pub fn ident(binding: &Binding) -> Self {
        Self::new(ExprKind::Identifier(binding.clone()), binding.ty.clone())
    }

    pub fn this(id: StructId) -> Self {
        Self::new(ExprKind::This, Type::Struct(id))
    }

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Self {
        let ty = if op.is_comparison() || matches!(op, BinOp::And | BinOp::Or) {
            Type::Bool
        } else {
            lhs.ty.clone()
        };
        Self::new(
            ExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            ty,
        )
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        let ty = match op {
            UnaryOp::Not | UnaryOp::ToBool => Type::Bool,
            UnaryOp::Negate => operand.ty.clone(),
            UnaryOp::ToFloat => Type::Float,
            UnaryOp::ToInt => Type::Int,
            UnaryOp::ToChar => Type::Char,
        };
        Self::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            ty,
        )
    }

    pub fn interval(low: Expr, high: Expr) -> Self {
        let ty = Type::interval_of(low.ty.clone());
        Self::new(
            ExprKind::Interval {
                low: Box::new(low),
                high: Box::new(high),
            },
            ty,
        )
    }

    pub fn bound(interval: Expr, bound: Bound) -> Self {
        let ty = interval.ty.subtype().cloned().unwrap_or(Type::Void);
        Self::new(
            ExprKind::Bound {
                interval: Box::new(interval),
                bound,
            },
            ty,
        )
    }

    pub fn low(interval: Expr) -> Self {
        Self::bound(interval, Bound::Low)
    }

    pub fn high(interval: Expr) -> Self {
        Self::bound(interval, Bound::High)
    }

    pub fn field(object: Expr, member: &Binding) -> Self {
        Self::new(
            ExprKind::Field {
                object: Box::new(object),
                member: member.clone(),
            },
            member.ty.clone(),
        )
    }

    pub fn method(object: Expr, method: &str, args: Vec<Expr>, ret: Type) -> Self {
        Self::new(
            ExprKind::MethodCall {
                object: Box::new(object),
                method: method.to_string(),
                args,
            },
            ret,
        )
    }

    pub fn call(function: &str, args: Vec<Expr>, ret: Type) -> Self {
        Self::new(
            ExprKind::Call {
                function: function.to_string(),
                args,
            },
            ret,
        )
    }

    pub fn new_struct(id: StructId) -> Self {
        Self::new(ExprKind::New(id), Type::Struct(id))
    }
}

// ─── Statements ────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub scope: Scope,
    pub stmts: Vec<Spanned<Stmt>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    Declaration {
        target: Binding,
        value: Expr,
    },
    /// `target := value`; the target must denote storage.
    Update {
        target: Expr,
        value: Expr,
    },
    Print {
        items: Vec<Expr>,
        spaces: bool,
        newline: bool,
    },
    If {
        cond: Expr,
        then_block: Block,
        else_block: Option<Block>,
    },
    While {
        cond: Expr,
        body: Block,
    },
    Break,
    Return(Option<Expr>),
    /// A call evaluated for its effect; any result is discarded.
    Call(Expr),
    Block(Block),
}

// ─── Items ─────────────────────────────────────────────────────────

/// A function or method. Methods receive the record pointer as an implicit
/// first parameter that is not listed in `params`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub params: Vec<Binding>,
    pub return_type: Type,
    /// Largest extent of the frame-local area over all nested blocks.
    pub locals_size: u32,
    pub body: Block,
    #[serde(default)]
    pub span: Span,
}

impl Function {
    pub fn declared_params_size(&self) -> u32 {
        self.params.iter().map(|p| p.ty.size()).sum()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StructDef {
    pub id: StructId,
    pub name: String,
    /// Declared members, each with a `Storage::Member` offset.
    pub members: Vec<Binding>,
    /// Bytes occupied by declared members (excluding header and self slot).
    pub member_area: u32,
    /// Frame-local area of the initializer routine.
    #[serde(default)]
    pub initializer_locals: u32,
    /// Member initializers, run once per construction.
    pub initializer: Block,
    pub methods: Vec<Function>,
    /// Zero-argument method used by `print`, if any.
    #[serde(default)]
    pub printer: Option<String>,
    #[serde(default)]
    pub span: Span,
}

impl StructDef {
    pub fn method(&self, name: &str) -> Option<&Function> {
        self.methods.iter().find(|m| m.name == name)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    /// Size of the global memory block.
    pub global_size: u32,
    pub structs: Vec<StructDef>,
    pub functions: Vec<Function>,
    /// Top-level code; its scope holds the global bindings.
    pub main: Block,
}

impl Program {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn struct_def(&self, id: StructId) -> Option<&StructDef> {
        self.structs.iter().find(|def| def.id == id)
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }
}
