//! Statements, blocks and control flow.

use super::{shaped, CodegenError, Generator, LoopContext, OpenScope};
use crate::asm::{store_instr, Code, Fragment, FragmentError, Instr};
use crate::ast::{Block, Expr, ExprKind, Stmt, Type};
use crate::runtime::RefCounter;
use crate::span::{Span, Spanned};

impl<'p> Generator<'p> {
    /// A block with its own scope: zero the scope's reference slots, run
    /// the statements, release what the scope owns and drain.
    ///
    /// The drain is only emitted when the block put something on the
    /// worklist, or when `force_drain` asks for it (loop bodies whose
    /// condition leaves temporaries behind on every iteration).
    pub(super) fn block(&mut self, block: &'p Block, force_drain: bool) -> Result<Code, CodegenError> {
        let span = block.stmts.first().map(|s| s.span).unwrap_or_default();
        let mut code = self.clear_references(&block.scope, span)?;
        self.scopes.push(OpenScope {
            scope: &block.scope,
            pushed: false,
        });
        for stmt in &block.stmts {
            code.append(self.stmt(stmt)?);
        }
        code.append(self.release_scope(&block.scope, span)?);
        let pushed = self.scopes.pop().map_or(false, |open| open.pushed);
        if pushed || force_drain {
            code.push(RefCounter::drain());
        }
        Ok(code)
    }

    pub(super) fn stmt(&mut self, stmt: &'p Spanned<Stmt>) -> Result<Code, CodegenError> {
        let span = stmt.span;
        match &stmt.node {
            Stmt::Declaration { target, value } => {
                let store = store_for(&target.ty, span)?;
                let mut code = self.binding_address(target, span)?;
                code.append(self.owned_value(value)?);
                code.push(store);
                Ok(code)
            }
            Stmt::Update { target, value } => self.update(target, value, span),
            Stmt::Print {
                items,
                spaces,
                newline,
            } => self.print(items, *spaces, *newline),
            Stmt::If {
                cond,
                then_block,
                else_block,
            } => {
                let group = self.labels.group("if");
                let else_label = group.label("else");
                let end_label = group.label("end");

                let mut code = self.value(cond)?;
                match else_block {
                    Some(else_block) => {
                        code.push(Instr::JumpFalse(else_label.clone()));
                        code.append(self.block(then_block, false)?);
                        code.push(Instr::Jump(end_label.clone()));
                        code.push(Instr::Label(else_label));
                        code.append(self.block(else_block, false)?);
                    }
                    None => {
                        code.push(Instr::JumpFalse(end_label.clone()));
                        code.append(self.block(then_block, false)?);
                    }
                }
                code.push(Instr::Label(end_label));
                Ok(code)
            }
            Stmt::While { cond, body } => self.while_loop(cond, body),
            Stmt::Break => {
                let Some(context) = self.loops.last() else {
                    return Err(CodegenError::BreakOutsideLoop { span });
                };
                let end_label = context.end_label.clone();
                let depth = context.depth;
                let (mut code, pending) = self.release_open_scopes(depth, span)?;
                if pending {
                    code.push(RefCounter::drain());
                }
                code.push(Instr::Jump(end_label));
                Ok(code)
            }
            Stmt::Return(value) => self.ret(value.as_ref(), span),
            Stmt::Call(call) => {
                let fragment = self.expr(call)?;
                Ok(self.discard(fragment, &call.ty))
            }
            Stmt::Block(block) => self.block(block, false),
        }
    }

    /// `target := value`. The new value is computed first, then the old
    /// reference goes onto the worklist and the new one is stored.
    fn update(&mut self, target: &'p Expr, value: &'p Expr, span: Span) -> Result<Code, CodegenError> {
        let store = store_for(&target.ty, span)?;
        let mut code = self.owned_value(value)?;

        let fragment = self.expr(target)?;
        if !fragment.is_address() && matches!(target.kind, ExprKind::Field { .. } | ExprKind::Bound { .. }) {
            return Err(CodegenError::TemporaryUpdateTarget { span });
        }
        code.append(shaped(fragment.into_address(), target.span)?);
        if target.ty.is_heap() {
            code.extend([Instr::Duplicate, Instr::LoadI, RefCounter::push_record()]);
            self.note_push();
        }
        code.extend([Instr::Exchange, store]);
        Ok(code)
    }

    fn while_loop(&mut self, cond: &'p Expr, body: &'p Block) -> Result<Code, CodegenError> {
        let group = self.labels.group("while");
        let test_label = group.label("test");
        let end_label = group.label("end");

        let outer_pushed = self.scopes.last_mut().map(|open| std::mem::take(&mut open.pushed));
        let mut code: Code = vec![Instr::Label(test_label.clone())].into();
        code.append(self.value(cond)?);
        let cond_pushed = match self.scopes.last_mut() {
            Some(open) => {
                let pushed = open.pushed;
                open.pushed |= outer_pushed.unwrap_or(false);
                pushed
            }
            None => false,
        };
        code.push(Instr::JumpFalse(end_label.clone()));

        self.loops.push(LoopContext {
            end_label: end_label.clone(),
            depth: self.scopes.len(),
        });
        let body = self.block(body, cond_pushed);
        self.loops.pop();
        code.append(body?);

        code.push(Instr::Jump(test_label));
        code.push(Instr::Label(end_label));
        Ok(code)
    }

    /// Return from the current routine: count a borrowed result, release
    /// every open scope and leave through the shared exit, which releases
    /// the parameters and restores the caller's frame.
    fn ret(&mut self, value: Option<&'p Expr>, span: Span) -> Result<Code, CodegenError> {
        let Some(routine) = &self.routine else {
            return Err(CodegenError::ReturnOutsideFunction { span });
        };
        let expected = routine.return_type.clone();
        let exit_label = routine.exit_label.clone();

        let mut code = match value {
            Some(value) if expected != Type::Void => self.owned_value(value)?,
            None if expected == Type::Void => Code::new(),
            _ => return Err(CodegenError::ReturnMismatch { expected, span }),
        };
        let (release, pending) = self.release_open_scopes(0, span)?;
        code.append(release);
        if pending {
            if let Some(routine) = self.routine.as_mut() {
                routine.pushed = true;
            }
        }
        code.push(Instr::Jump(exit_label));
        Ok(code)
    }

    /// Code for a fragment whose result is not wanted. Fresh records go
    /// onto the worklist; anything else is popped.
    pub(super) fn discard(&mut self, fragment: Fragment, ty: &Type) -> Code {
        match fragment {
            Fragment::Void(code) => code,
            Fragment::Address(mut code) => {
                code.push(Instr::Pop);
                code
            }
            Fragment::Value(mut code) => {
                if ty.is_heap() {
                    code.push(RefCounter::push_record());
                    self.note_push();
                } else {
                    code.push(Instr::Pop);
                }
                code
            }
        }
    }
}

fn store_for(ty: &Type, span: Span) -> Result<Instr, CodegenError> {
    shaped(
        store_instr(ty).ok_or_else(|| FragmentError::Unloadable(ty.clone())),
        span,
    )
}
