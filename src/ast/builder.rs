//! Front-end side tree construction with the generic allocation strategy.
//!
//! The back end consumes bindings whose storage is already resolved. This
//! builder plays the front end's allocator when trees are written by hand
//! (tests, benches, small drivers):
//!
//! - top-level declarations grow the global block upward;
//! - parameters sit at non-negative frame offsets, the first parameter
//!   highest and the last at `fp+0`; methods get the record pointer as an
//!   implicit first parameter;
//! - locals grow downward below the saved frame pointer and return address;
//! - struct members are laid out after the record header and self slot.
//!
//! Sibling blocks reuse the space of blocks that have closed; a frame's
//! local area is the peak over its lifetime.

use crate::layout::{FRAME_HEADER_SIZE, STRUCT_MEMBERS_OFFSET};
use crate::span::{Span, Spanned};

use super::*;

enum ContextKind {
    Main,
    Function {
        name: String,
        params: Vec<Binding>,
        return_type: Type,
    },
    Initializer {
        id: StructId,
    },
    Method {
        id: StructId,
        name: String,
        params: Vec<Binding>,
        return_type: Type,
    },
}

struct Context {
    kind: ContextKind,
    used: u32,
    peak: u32,
    blocks: Vec<(Block, u32)>,
}

impl Context {
    fn new(kind: ContextKind) -> Self {
        Self {
            kind,
            used: 0,
            peak: 0,
            blocks: vec![(Block::default(), 0)],
        }
    }

    fn is_frame(&self) -> bool {
        !matches!(self.kind, ContextKind::Main)
    }

    fn allocate(&mut self, size: u32) -> Storage {
        let storage = if self.is_frame() {
            Storage::FrameNegative {
                offset: -((FRAME_HEADER_SIZE + self.used + size) as i32),
            }
        } else {
            Storage::Global {
                offset: self.used as i32,
            }
        };
        self.used += size;
        self.peak = self.peak.max(self.used);
        storage
    }

    fn close_root(&mut self) -> Block {
        while self.blocks.len() > 1 {
            let (mut block, mark) = self.pop_block();
            block.scope.allocated_size = self.used - mark;
            self.used = mark;
            self.current().stmts.push(Spanned::dummy(Stmt::Block(block)));
        }
        let (mut block, mark) = self.pop_block();
        block.scope.allocated_size = self.used - mark;
        block
    }

    fn pop_block(&mut self) -> (Block, u32) {
        self.blocks.pop().unwrap_or_default()
    }

    fn current(&mut self) -> &mut Block {
        if self.blocks.is_empty() {
            self.blocks.push((Block::default(), self.used));
        }
        let last = self.blocks.len() - 1;
        &mut self.blocks[last].0
    }
}

/// Incremental builder for a [`Program`].
pub struct ProgramBuilder {
    structs: Vec<StructDef>,
    functions: Vec<Function>,
    contexts: Vec<Context>,
}

impl Default for ProgramBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self {
            structs: Vec::new(),
            functions: Vec::new(),
            contexts: vec![Context::new(ContextKind::Main)],
        }
    }

    fn context(&mut self) -> &mut Context {
        if self.contexts.is_empty() {
            self.contexts.push(Context::new(ContextKind::Main));
        }
        let last = self.contexts.len() - 1;
        &mut self.contexts[last]
    }

    // ── Statements ──────────────────────────────────────────────

    /// Append a statement to the innermost open block.
    pub fn stmt(&mut self, stmt: Stmt) {
        self.context().current().stmts.push(Spanned::dummy(stmt));
    }

    /// Allocate a binding in the innermost open block without initializing it.
    pub fn declare(&mut self, name: &str, ty: Type) -> Binding {
        let ctx = self.context();
        let storage = ctx.allocate(ty.size());
        let binding = Binding::new(name, ty, storage);
        ctx.current().scope.bindings.push(binding.clone());
        binding
    }

    /// Allocate a binding and emit its declaration statement.
    pub fn declare_init(&mut self, name: &str, value: Expr) -> Binding {
        let binding = self.declare(name, value.ty.clone());
        self.stmt(Stmt::Declaration {
            target: binding.clone(),
            value,
        });
        binding
    }

    pub fn update(&mut self, target: Expr, value: Expr) {
        self.stmt(Stmt::Update { target, value });
    }

    pub fn print(&mut self, items: Vec<Expr>) {
        self.stmt(Stmt::Print {
            items,
            spaces: true,
            newline: false,
        });
    }

    pub fn println(&mut self, items: Vec<Expr>) {
        self.stmt(Stmt::Print {
            items,
            spaces: true,
            newline: true,
        });
    }

    pub fn call_stmt(&mut self, call: Expr) {
        self.stmt(Stmt::Call(call));
    }

    pub fn ret(&mut self, value: Option<Expr>) {
        self.stmt(Stmt::Return(value));
    }

    pub fn brk(&mut self) {
        self.stmt(Stmt::Break);
    }

    /// Open a nested block; declarations go into its scope until it closes.
    pub fn open_block(&mut self) {
        let ctx = self.context();
        let mark = ctx.used;
        ctx.blocks.push((Block::default(), mark));
    }

    /// Close the innermost block and hand it back for use in a statement.
    pub fn close_block(&mut self) -> Block {
        let ctx = self.context();
        let (mut block, mark) = ctx.pop_block();
        block.scope.allocated_size = ctx.used - mark;
        ctx.used = mark;
        block
    }

    // ── Functions ───────────────────────────────────────────────

    /// Start a function; the returned bindings are its parameters.
    pub fn begin_function(&mut self, name: &str, params: &[(&str, Type)], ret: Type) -> Vec<Binding> {
        let params = lay_out_params(params);
        self.contexts.push(Context::new(ContextKind::Function {
            name: name.to_string(),
            params: params.clone(),
            return_type: ret,
        }));
        params
    }

    /// Start a method of struct `id`.
    pub fn begin_method(
        &mut self,
        id: StructId,
        name: &str,
        params: &[(&str, Type)],
        ret: Type,
    ) -> Vec<Binding> {
        let params = lay_out_params(params);
        self.contexts.push(Context::new(ContextKind::Method {
            id,
            name: name.to_string(),
            params: params.clone(),
            return_type: ret,
        }));
        params
    }

    /// Finish the innermost function or method.
    pub fn end_function(&mut self) {
        let in_function = matches!(
            self.contexts.last().map(|c| &c.kind),
            Some(ContextKind::Function { .. } | ContextKind::Method { .. })
        );
        debug_assert!(in_function, "end_function outside of a function");
        if !in_function {
            return;
        }
        let Some(mut ctx) = self.contexts.pop() else {
            return;
        };
        let body = ctx.close_root();
        let locals_size = ctx.peak;
        match ctx.kind {
            ContextKind::Function {
                name,
                params,
                return_type,
            } => self.functions.push(Function {
                name,
                params,
                return_type,
                locals_size,
                body,
                span: Span::dummy(),
            }),
            ContextKind::Method {
                id,
                name,
                params,
                return_type,
            } => {
                if let Some(def) = self.structs.get_mut(id.0 as usize) {
                    def.methods.push(Function {
                        name,
                        params,
                        return_type,
                        locals_size,
                        body,
                        span: Span::dummy(),
                    });
                }
            }
            ContextKind::Main | ContextKind::Initializer { .. } => {}
        }
    }

    // ── Structs ─────────────────────────────────────────────────

    /// Start a struct definition. Until [`end_struct`](Self::end_struct),
    /// statements go into its initializer.
    pub fn begin_struct(&mut self, name: &str) -> StructId {
        let id = StructId(self.structs.len() as u32);
        self.structs.push(StructDef {
            id,
            name: name.to_string(),
            members: Vec::new(),
            member_area: 0,
            initializer_locals: 0,
            initializer: Block::default(),
            methods: Vec::new(),
            printer: None,
            span: Span::dummy(),
        });
        self.contexts
            .push(Context::new(ContextKind::Initializer { id }));
        id
    }

    /// Declare a member of the struct being defined and initialize it.
    pub fn member(&mut self, name: &str, value: Expr) -> Binding {
        let id = match self.contexts.last().map(|c| &c.kind) {
            Some(ContextKind::Initializer { id }) => *id,
            _ => {
                debug_assert!(false, "member declared outside of a struct");
                return Binding::new(name, value.ty, Storage::Member { offset: 0 });
            }
        };
        let Some(def) = self.structs.get_mut(id.0 as usize) else {
            return Binding::new(name, value.ty, Storage::Member { offset: 0 });
        };
        let offset = (STRUCT_MEMBERS_OFFSET + def.member_area) as i32;
        def.member_area += value.ty.size();
        let binding = Binding::new(name, value.ty.clone(), Storage::Member { offset });
        def.members.push(binding.clone());
        self.stmt(Stmt::Declaration {
            target: binding.clone(),
            value,
        });
        binding
    }

    pub fn end_struct(&mut self) {
        let in_struct = matches!(
            self.contexts.last().map(|c| &c.kind),
            Some(ContextKind::Initializer { .. })
        );
        debug_assert!(in_struct, "end_struct outside of a struct");
        if !in_struct {
            return;
        }
        let Some(mut ctx) = self.contexts.pop() else {
            return;
        };
        let body = ctx.close_root();
        if let ContextKind::Initializer { id } = ctx.kind {
            if let Some(def) = self.structs.get_mut(id.0 as usize) {
                def.initializer = body;
                def.initializer_locals = ctx.peak;
            }
        }
    }

    /// Designate a zero-argument method as the struct's print routine.
    pub fn set_printer(&mut self, id: StructId, method: &str) {
        if let Some(def) = self.structs.get_mut(id.0 as usize) {
            def.printer = Some(method.to_string());
        }
    }

    // ── Result ──────────────────────────────────────────────────

    pub fn finish(mut self) -> Program {
        while self.contexts.len() > 1 {
            match self.contexts.last().map(|c| &c.kind) {
                Some(ContextKind::Initializer { .. }) => self.end_struct(),
                Some(ContextKind::Function { .. } | ContextKind::Method { .. }) => {
                    self.end_function()
                }
                _ => break,
            }
        }
        let mut main = self.context_main();
        let main_block = main.close_root();
        Program {
            global_size: main.peak,
            structs: self.structs,
            functions: self.functions,
            main: main_block,
        }
    }

    fn context_main(&mut self) -> Context {
        self.contexts
            .pop()
            .unwrap_or_else(|| Context::new(ContextKind::Main))
    }
}

/// Parameter offsets: the last parameter at `fp+0`, earlier ones above it.
/// A method's record pointer is pushed first, so it lands right above the
/// declared parameters and does not shift them.
fn lay_out_params(params: &[(&str, Type)]) -> Vec<Binding> {
    let mut offset: u32 = params.iter().map(|(_, ty)| ty.size()).sum();
    params
        .iter()
        .map(|(name, ty)| {
            offset -= ty.size();
            Binding::new(
                name,
                ty.clone(),
                Storage::FramePositive {
                    offset: offset as i32,
                },
            )
        })
        .collect()
}
