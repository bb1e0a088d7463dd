//! Tree-walking code generator.
//!
//! Every tree node is translated into a [`Fragment`] that its parent
//! consumes exactly once. Heap values follow one ownership rule: a
//! fragment of address shape names a reference somebody else owns, so
//! storing it anywhere costs an increment; a value-shaped heap fragment is
//! a fresh reference the consumer takes over. Fresh temporaries that are
//! not stored are pushed onto the decrement worklist right after their
//! last use.
//!
//! Output order:
//!
//! ```text
//!   environment, worklist, struct names
//!   reference-counting subroutines
//!   $$main: entry, main block, Halt
//!   functions, struct initializers, methods
//!   interval printers
//!   error handlers
//! ```

mod expr;
mod print;
mod stmt;

use std::collections::BTreeSet;

use crate::asm::{Code, Fragment, FragmentError, Instr, Labeller};
use crate::ast::{Binding, Block, Function, Program, Scope, Type};
use crate::config::CodegenConfig;
use crate::diagnostic::Diagnostic;
use crate::layout::StructTable;
use crate::runtime::{self, frame, refcount, MachineState, RefCounter};
use crate::span::Span;

use print::ScalarKind;

// ─── Errors ────────────────────────────────────────────────────────

/// Internal inconsistencies in a tree that passed semantic analysis.
/// They abort compilation; no partial output is produced.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CodegenError {
    #[error("{source}")]
    Fragment { source: FragmentError, span: Span },
    #[error("`break` outside of a loop")]
    BreakOutsideLoop { span: Span },
    #[error("`return` outside of a function")]
    ReturnOutsideFunction { span: Span },
    #[error("return does not match the declared return type `{expected}`")]
    ReturnMismatch { expected: Type, span: Span },
    #[error("unknown function `{name}`")]
    UnknownFunction { name: String, span: Span },
    #[error("unknown struct #{id}")]
    UnknownStruct { id: u32, span: Span },
    #[error("`{name}` expects {expected} arguments, found {found}")]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
        span: Span,
    },
    #[error("type `{ty}` has no method `{method}`")]
    UnknownMethod { ty: Type, method: String, span: Span },
    #[error("member `{name}` used outside of a struct initializer or method")]
    MemberOutsideStruct { name: String, span: Span },
    #[error("`{name}` is not a struct member")]
    NotAMember { name: String, span: Span },
    #[error("`this` used outside of a struct initializer or method")]
    ThisOutsideStruct { span: Span },
    #[error("operator `{op}` is not defined for `{ty}`")]
    UnsupportedOperand { op: String, ty: Type, span: Span },
    #[error("cannot print a value of type `{ty}`")]
    Unprintable { ty: Type, span: Span },
    #[error("cannot update a member of a temporary record")]
    TemporaryUpdateTarget { span: Span },
    #[error("worklist capacity {capacity} is outside 1..={max}")]
    WorklistCapacity { capacity: u32, max: u32 },
}

impl CodegenError {
    pub fn span(&self) -> Span {
        match self {
            CodegenError::Fragment { span, .. }
            | CodegenError::BreakOutsideLoop { span }
            | CodegenError::ReturnOutsideFunction { span }
            | CodegenError::ReturnMismatch { span, .. }
            | CodegenError::UnknownFunction { span, .. }
            | CodegenError::UnknownStruct { span, .. }
            | CodegenError::ArityMismatch { span, .. }
            | CodegenError::UnknownMethod { span, .. }
            | CodegenError::MemberOutsideStruct { span, .. }
            | CodegenError::NotAMember { span, .. }
            | CodegenError::ThisOutsideStruct { span }
            | CodegenError::UnsupportedOperand { span, .. }
            | CodegenError::Unprintable { span, .. }
            | CodegenError::TemporaryUpdateTarget { span } => *span,
            CodegenError::WorklistCapacity { .. } => Span::dummy(),
        }
    }
}

impl From<CodegenError> for Diagnostic {
    fn from(err: CodegenError) -> Self {
        let span = err.span();
        Diagnostic::error(format!("code generation failed: {}", err), span)
            .with_note("the tree passed semantic analysis but is inconsistent".to_string())
    }
}

/// Attach a span to a fragment coercion failure.
fn shaped<T>(result: Result<T, FragmentError>, span: Span) -> Result<T, CodegenError> {
    result.map_err(|source| CodegenError::Fragment { source, span })
}

// ─── Routine labels ────────────────────────────────────────────────

pub fn function_label(name: &str) -> String {
    format!("-function-{}", name)
}

pub fn method_label(type_code: i32, name: &str) -> String {
    format!("-method-{}-{}", type_code, name)
}

pub fn initializer_label(type_code: i32) -> String {
    format!("-struct-init-{}", type_code)
}

// ─── Generator state ───────────────────────────────────────────────

/// A scope currently being generated.
struct OpenScope<'p> {
    scope: &'p Scope,
    /// Something was pushed onto the worklist while this scope was innermost.
    pushed: bool,
}

struct LoopContext {
    end_label: String,
    /// Number of open scopes outside the loop body.
    depth: usize,
}

/// The routine (function, method or initializer) being generated.
struct RoutineContext {
    exit_label: String,
    return_type: Type,
    /// Offset of the record pointer from fp, for initializers and methods.
    self_slot: Option<i32>,
    /// The shared exit has references to drain.
    pushed: bool,
}

/// Description of one routine to emit.
struct RoutineSpec<'p> {
    name: String,
    label: String,
    params: &'p [Binding],
    params_size: u32,
    locals_size: u32,
    return_type: Type,
    self_slot: Option<i32>,
    body: &'p Block,
}

pub struct Generator<'p> {
    program: &'p Program,
    cells: MachineState,
    labels: Labeller,
    structs: StructTable,
    refcounter: RefCounter,
    scopes: Vec<OpenScope<'p>>,
    loops: Vec<LoopContext>,
    routine: Option<RoutineContext>,
    interval_printers: BTreeSet<ScalarKind>,
}

/// Translate a whole program into target code.
pub fn generate(program: &Program, config: &CodegenConfig) -> Result<Code, CodegenError> {
    Generator::new(program, config)?.generate()
}

impl<'p> Generator<'p> {
    pub fn new(program: &'p Program, config: &CodegenConfig) -> Result<Self, CodegenError> {
        let capacity = config.worklist_capacity;
        let refcounter =
            RefCounter::new(capacity).ok_or(CodegenError::WorklistCapacity {
                capacity,
                max: refcount::MAX_WORKLIST_CAPACITY,
            })?;
        Ok(Self {
            program,
            cells: MachineState::default(),
            labels: Labeller::new(),
            structs: StructTable::new(program),
            refcounter,
            scopes: Vec::new(),
            loops: Vec::new(),
            routine: None,
            interval_printers: BTreeSet::new(),
        })
    }

    pub fn generate(mut self) -> Result<Code, CodegenError> {
        let program = self.program;
        let mut code = runtime::environment(&self.cells, program.global_size);
        code.append(self.refcounter.data());
        for layout in self.structs.iter() {
            code.push(Instr::DLabel(runtime::struct_name_label(layout.type_code)));
            code.push(Instr::DataS(layout.name.clone()));
        }
        code.append(self.refcounter.subroutines(&self.structs));

        code.push(Instr::Label(runtime::MAIN_LABEL.to_string()));
        code.append(frame::program_entry(&self.cells));
        code.append(self.refcounter.initialize());
        code.append(self.block(&program.main, false)?);
        code.push(Instr::Halt);

        for function in &program.functions {
            let spec = RoutineSpec {
                name: function.name.clone(),
                label: function_label(&function.name),
                params: &function.params,
                params_size: function.declared_params_size(),
                locals_size: function.locals_size,
                return_type: function.return_type.clone(),
                self_slot: None,
                body: &function.body,
            };
            code.append(self.routine(spec)?);
        }

        for def in &program.structs {
            let type_code = self.type_code(def.id, def.span)?;
            let spec = RoutineSpec {
                name: format!("{} initializer", def.name),
                label: initializer_label(type_code),
                params: &[],
                params_size: crate::layout::POINTER_SIZE,
                locals_size: def.initializer_locals,
                return_type: Type::Void,
                self_slot: Some(0),
                body: &def.initializer,
            };
            code.append(self.routine(spec)?);
            for method in &def.methods {
                code.append(self.routine(method_spec(type_code, &def.name, method))?);
            }
        }

        for kind in std::mem::take(&mut self.interval_printers) {
            code.append(self.interval_printer(kind));
        }
        code.append(runtime::error_handlers());

        log::debug!(
            "generated {} instructions for {} functions and {} structs",
            code.len(),
            program.functions.len(),
            program.structs.len()
        );
        Ok(code)
    }

    // ── Routines ────────────────────────────────────────────────

    fn routine(&mut self, spec: RoutineSpec<'p>) -> Result<Code, CodegenError> {
        log::debug!(
            "routine {} ({} param bytes, {} local bytes)",
            spec.name,
            spec.params_size,
            spec.locals_size
        );
        let heap_params: Vec<&Binding> = spec.params.iter().filter(|p| p.ty.is_heap()).collect();
        let exit_label = self.labels.fresh("exit");
        self.routine = Some(RoutineContext {
            exit_label: exit_label.clone(),
            return_type: spec.return_type.clone(),
            self_slot: spec.self_slot,
            pushed: !heap_params.is_empty(),
        });

        let mut code: Code = vec![Instr::Label(spec.label)].into();
        code.append(frame::prologue(&self.cells, spec.locals_size));
        code.append(self.block(spec.body, false)?);

        // callees own their heap parameters
        let mut exit: Code = vec![Instr::Label(exit_label)].into();
        for param in heap_params {
            exit.append(self.release_binding(param, Span::dummy())?);
        }
        let pushed = self.routine.take().map_or(true, |r| r.pushed);
        code.append(exit);
        if pushed {
            code.push(RefCounter::drain());
        }
        code.append(frame::epilogue(
            &self.cells,
            spec.locals_size,
            spec.params_size,
            &spec.return_type,
        ));
        Ok(code)
    }

    // ── Scopes and ownership ────────────────────────────────────

    /// Record that the innermost scope left something on the worklist.
    fn note_push(&mut self) {
        if let Some(open) = self.scopes.last_mut() {
            open.pushed = true;
        }
    }

    fn self_slot(&self) -> Option<i32> {
        self.routine.as_ref().and_then(|r| r.self_slot)
    }

    /// `[..] -> [.. address]` of a binding's storage.
    fn binding_address(&self, binding: &Binding, span: Span) -> Result<Code, CodegenError> {
        frame::storage_address(&self.cells, &binding.storage, self.self_slot()).ok_or_else(|| {
            CodegenError::MemberOutsideStruct {
                name: binding.name.clone(),
                span,
            }
        })
    }

    /// Null out the heap slots a scope owns so that releasing a binding
    /// whose declaration never ran is harmless.
    fn clear_references(&self, scope: &Scope, span: Span) -> Result<Code, CodegenError> {
        let mut code = Code::new();
        for binding in scope.owned_references() {
            code.append(self.binding_address(binding, span)?);
            code.extend([Instr::PushI(0), Instr::StoreI]);
        }
        Ok(code)
    }

    /// Push the reference held by `binding` onto the worklist.
    fn release_binding(&mut self, binding: &Binding, span: Span) -> Result<Code, CodegenError> {
        let mut code = self.binding_address(binding, span)?;
        code.extend([Instr::LoadI, RefCounter::push_record()]);
        self.note_push();
        Ok(code)
    }

    /// Release every reference a scope owns.
    fn release_scope(&mut self, scope: &Scope, span: Span) -> Result<Code, CodegenError> {
        let mut code = Code::new();
        for binding in scope.owned_references() {
            code.append(self.release_binding(binding, span)?);
        }
        Ok(code)
    }

    /// Release the open scopes from the innermost down to `depth`, leaving
    /// them open for the code that follows in source order.
    fn release_open_scopes(&mut self, depth: usize, span: Span) -> Result<(Code, bool), CodegenError> {
        let mut code = Code::new();
        let mut pending = false;
        let scopes: Vec<&'p Scope> = self.scopes[depth..].iter().rev().map(|s| s.scope).collect();
        for open in &self.scopes[depth..] {
            pending |= open.pushed;
        }
        for scope in scopes {
            pending |= scope.owned_references().next().is_some();
            code.append(self.release_scope(scope, span)?);
        }
        Ok((code, pending))
    }

    fn type_code(&self, id: crate::ast::StructId, span: Span) -> Result<i32, CodegenError> {
        self.structs
            .get(id)
            .map(|layout| layout.type_code)
            .ok_or(CodegenError::UnknownStruct { id: id.0, span })
    }
}

/// Methods receive the record pointer after their declared parameters, so
/// it sits right above them at `fp + declared_params_size`.
fn method_spec<'p>(type_code: i32, struct_name: &str, method: &'p Function) -> RoutineSpec<'p> {
    let declared = method.declared_params_size();
    RoutineSpec {
        name: format!("{}.{}", struct_name, method.name),
        label: method_label(type_code, &method.name),
        params: &method.params,
        params_size: declared + crate::layout::POINTER_SIZE,
        locals_size: method.locals_size,
        return_type: method.return_type.clone(),
        self_slot: Some(declared as i32),
        body: &method.body,
    }
}

/// Fresh heap values are value-shaped; every other heap value is borrowed.
fn is_fresh(fragment: &Fragment, ty: &Type) -> bool {
    ty.is_heap() && !fragment.is_address()
}
