//! Expression translation.

use super::{function_label, initializer_label, is_fresh, method_label, shaped, CodegenError, Generator};
use crate::asm::{load_instr, store_instr, Code, Fragment, FragmentError, Instr};
use crate::ast::{BinOp, Bound, Expr, ExprKind, StructId, Type, UnaryOp};
use crate::layout::{
    interval_high_offset, interval_low_offset, interval_record_size, RecordKind,
    SELF_SLOT_OFFSET, SUBTYPE_SIZE_OFFSET, TYPE_CODE_OFFSET,
};
use crate::runtime::{frame, RefCounter, DIVIDE_BY_ZERO, MEM_MANAGER_ALLOCATE};
use crate::span::Span;

impl<'p> Generator<'p> {
    pub(super) fn expr(&mut self, expr: &'p Expr) -> Result<Fragment, CodegenError> {
        let span = expr.span;
        match &expr.kind {
            ExprKind::Bool(b) => Ok(Fragment::value([Instr::PushI(*b as i32)])),
            ExprKind::Char(c) => Ok(Fragment::value([Instr::PushI(*c as u32 as i32)])),
            ExprKind::Int(n) => Ok(Fragment::value([Instr::PushI(*n)])),
            ExprKind::Float(x) => Ok(Fragment::value([Instr::PushF(*x)])),
            ExprKind::Identifier(binding) => Ok(Fragment::Address(self.binding_address(binding, span)?)),
            ExprKind::This => {
                // the self slot itself, so that storing `this` counts a reference
                let slot = self.self_slot().ok_or(CodegenError::ThisOutsideStruct { span })?;
                let mut code: Code = self.cells.load_fp().into_iter().collect();
                code.extend([Instr::PushI(slot), Instr::Add]);
                Ok(Fragment::Address(code))
            }
            ExprKind::Binary { op, lhs, rhs } => self.binary(*op, lhs, rhs, span),
            ExprKind::Unary { op, operand } => self.unary(*op, operand, span),
            ExprKind::Interval { low, high } => self.interval(&expr.ty, low, high, span),
            ExprKind::Bound { interval, bound } => {
                let Some(subtype) = interval.ty.subtype() else {
                    return Err(CodegenError::UnsupportedOperand {
                        op: format!(".{}", bound_name(*bound)),
                        ty: interval.ty.clone(),
                        span,
                    });
                };
                let offset = match bound {
                    Bound::Low => interval_low_offset(),
                    Bound::High => interval_high_offset(subtype),
                };
                self.member_of(interval, offset, &expr.ty, span)
            }
            ExprKind::Field { object, member } => match member.storage {
                crate::ast::Storage::Member { offset } => self.member_of(object, offset, &member.ty, span),
                _ => Err(CodegenError::NotAMember {
                    name: member.name.clone(),
                    span,
                }),
            },
            ExprKind::Call { function, args } => self.call(function, args, span),
            ExprKind::MethodCall { object, method, args } => {
                let receiver = self.expr(object)?;
                let fresh = is_fresh(&receiver, &object.ty);
                let receiver = shaped(receiver.into_value(&object.ty), object.span)?;
                self.invoke_method(receiver, fresh, &object.ty, method, args, span)
            }
            ExprKind::New(id) => self.new_struct(*id, span),
        }
    }

    /// Value code of an expression that is used up on the spot.
    pub(super) fn value(&mut self, expr: &'p Expr) -> Result<Code, CodegenError> {
        let fragment = self.expr(expr)?;
        shaped(fragment.into_value(&expr.ty), expr.span)
    }

    /// Value code of an expression whose result gets a new owner. A
    /// borrowed heap value is counted; a fresh one is handed over as is.
    pub(super) fn owned_value(&mut self, expr: &'p Expr) -> Result<Code, CodegenError> {
        let fragment = self.expr(expr)?;
        let borrowed = expr.ty.is_heap() && fragment.is_address();
        let mut code = shaped(fragment.into_value(&expr.ty), expr.span)?;
        if borrowed {
            code.extend([Instr::Duplicate, RefCounter::increment()]);
        }
        Ok(code)
    }

    // ── Operators ───────────────────────────────────────────────

    fn binary(&mut self, op: BinOp, lhs: &'p Expr, rhs: &'p Expr, span: Span) -> Result<Fragment, CodegenError> {
        let operand = &lhs.ty;
        let unsupported = || CodegenError::UnsupportedOperand {
            op: op.as_str().to_string(),
            ty: operand.clone(),
            span,
        };
        if operand.is_heap() || *operand == Type::Void {
            return Err(unsupported());
        }

        let mut code = self.value(lhs)?;
        if matches!(op, BinOp::And | BinOp::Or) {
            if *operand != Type::Bool {
                return Err(unsupported());
            }
            let end = self.labels.fresh(if op == BinOp::And { "and" } else { "or" });
            code.push(Instr::Duplicate);
            code.push(if op == BinOp::And {
                Instr::JumpFalse(end.clone())
            } else {
                Instr::JumpTrue(end.clone())
            });
            code.push(Instr::Pop);
            code.append(self.value(rhs)?);
            code.push(Instr::Label(end));
            return Ok(Fragment::Value(code));
        }

        code.append(self.value(rhs)?);
        let float = operand.is_float();
        if op.is_comparison() {
            code.push(if float { Instr::FSubtract } else { Instr::Subtract });
            code.append(self.compare(op, float));
            return Ok(Fragment::Value(code));
        }

        if *operand == Type::Bool {
            return Err(unsupported());
        }
        match (op, float) {
            (BinOp::Add, false) => code.push(Instr::Add),
            (BinOp::Add, true) => code.push(Instr::FAdd),
            (BinOp::Sub, false) => code.push(Instr::Subtract),
            (BinOp::Sub, true) => code.push(Instr::FSubtract),
            (BinOp::Mul, false) => code.push(Instr::Multiply),
            (BinOp::Mul, true) => code.push(Instr::FMultiply),
            (BinOp::Div, false) => code.extend([
                Instr::Duplicate,
                Instr::JumpFalse(DIVIDE_BY_ZERO.to_string()),
                Instr::Divide,
            ]),
            (BinOp::Div, true) => code.extend([
                Instr::Duplicate,
                Instr::JumpFZero(DIVIDE_BY_ZERO.to_string()),
                Instr::FDivide,
            ]),
            _ => return Err(unsupported()),
        }
        Ok(Fragment::Value(code))
    }

    /// `[.. lhs-rhs] -> [.. bool]` by branching on the sign of the difference.
    fn compare(&mut self, op: BinOp, float: bool) -> Code {
        // taking the jump means true except where it rules the relation out
        let taken = !matches!(op, BinOp::LessEq | BinOp::GreaterEq) && !(op == BinOp::NotEq && float);
        let jump: fn(String) -> Instr = match (op, float) {
            (BinOp::Less, false) | (BinOp::GreaterEq, false) => Instr::JumpNeg,
            (BinOp::Less, true) | (BinOp::GreaterEq, true) => Instr::JumpFNeg,
            (BinOp::Greater, false) | (BinOp::LessEq, false) => Instr::JumpPos,
            (BinOp::Greater, true) | (BinOp::LessEq, true) => Instr::JumpFPos,
            (BinOp::Eq, false) => Instr::JumpFalse,
            (BinOp::NotEq, false) => Instr::JumpTrue,
            _ => Instr::JumpFZero,
        };
        let group = self.labels.group("compare");
        let target = group.label("taken");
        let join = group.label("join");
        vec![
            jump(target.clone()),
            Instr::PushI(!taken as i32),
            Instr::Jump(join.clone()),
            Instr::Label(target),
            Instr::PushI(taken as i32),
            Instr::Label(join),
        ]
        .into()
    }

    fn unary(&mut self, op: UnaryOp, operand: &'p Expr, span: Span) -> Result<Fragment, CodegenError> {
        let ty = &operand.ty;
        let unsupported = || CodegenError::UnsupportedOperand {
            op: format!("{:?}", op),
            ty: ty.clone(),
            span,
        };
        if ty.is_heap() || *ty == Type::Void {
            return Err(unsupported());
        }

        let mut code = self.value(operand)?;
        match (op, ty) {
            (UnaryOp::Not, Type::Bool) => code.push(Instr::BNegate),
            (UnaryOp::Negate, Type::Float) => code.push(Instr::FNegate),
            (UnaryOp::Negate, Type::Int | Type::Char) => code.push(Instr::Negate),
            (UnaryOp::ToFloat, Type::Float) => {}
            (UnaryOp::ToFloat, _) => code.push(Instr::ConvertF),
            (UnaryOp::ToInt, Type::Float) => code.push(Instr::ConvertI),
            (UnaryOp::ToInt, _) => {}
            (UnaryOp::ToChar, Type::Char) => {}
            (UnaryOp::ToChar, _) => {
                if ty.is_float() {
                    code.push(Instr::ConvertI);
                }
                code.extend([Instr::PushI(127), Instr::BTAnd]);
            }
            (UnaryOp::ToBool, Type::Bool) => {}
            (UnaryOp::ToBool, Type::Float) => {
                let group = self.labels.group("to-bool");
                let zero = group.label("zero");
                let join = group.label("join");
                code.extend([
                    Instr::JumpFZero(zero.clone()),
                    Instr::PushI(1),
                    Instr::Jump(join.clone()),
                    Instr::Label(zero),
                    Instr::PushI(0),
                    Instr::Label(join),
                ]);
            }
            (UnaryOp::ToBool, _) => code.extend([Instr::BNegate, Instr::BNegate]),
            _ => return Err(unsupported()),
        }
        Ok(Fragment::Value(code))
    }

    // ── Records ─────────────────────────────────────────────────

    /// `[..] -> [.. rec]`: a fresh record with its count at one and its
    /// type code set.
    fn allocate_record(size: u32, type_code: i32) -> Code {
        vec![
            Instr::PushI(size as i32),
            Instr::Call(MEM_MANAGER_ALLOCATE.to_string()),
            Instr::Duplicate,
            Instr::PushI(1),
            Instr::StoreI,
            Instr::Duplicate,
            Instr::PushI(TYPE_CODE_OFFSET),
            Instr::Add,
            Instr::PushI(type_code),
            Instr::StoreI,
        ]
        .into()
    }

    fn interval(&mut self, ty: &Type, low: &'p Expr, high: &'p Expr, span: Span) -> Result<Fragment, CodegenError> {
        let (Some(subtype), Some(kind)) = (ty.subtype(), RecordKind::of(ty)) else {
            return Err(CodegenError::UnsupportedOperand {
                op: "..".to_string(),
                ty: ty.clone(),
                span,
            });
        };
        let store = shaped(
            store_instr(subtype).ok_or_else(|| FragmentError::Unloadable(subtype.clone())),
            span,
        )?;

        let mut code = Self::allocate_record(interval_record_size(subtype), kind.type_code());
        code.extend([
            Instr::Duplicate,
            Instr::PushI(SUBTYPE_SIZE_OFFSET),
            Instr::Add,
            Instr::PushI(subtype.size() as i32),
            Instr::StoreC,
        ]);
        for (bound, offset) in [(low, interval_low_offset()), (high, interval_high_offset(subtype))] {
            code.extend([Instr::Duplicate, Instr::PushI(offset), Instr::Add]);
            code.append(self.owned_value(bound)?);
            code.push(store.clone());
        }
        Ok(Fragment::Value(code))
    }

    /// A bound or member of the record `object` evaluates to. For a stored
    /// record this is the member's address. A fresh record dies right
    /// here, so the member is read out (and counted if it is a reference)
    /// before the record goes onto the worklist.
    fn member_of(&mut self, object: &'p Expr, offset: i32, ty: &Type, span: Span) -> Result<Fragment, CodegenError> {
        let fragment = self.expr(object)?;
        let fresh = is_fresh(&fragment, &object.ty);
        let mut code = shaped(fragment.into_value(&object.ty), object.span)?;
        if !fresh {
            code.extend([Instr::PushI(offset), Instr::Add]);
            return Ok(Fragment::Address(code));
        }

        let load = shaped(load_instr(ty).ok_or_else(|| FragmentError::Unloadable(ty.clone())), span)?;
        code.extend([Instr::Duplicate, Instr::PushI(offset), Instr::Add, load]);
        if ty.is_heap() {
            code.extend([Instr::Duplicate, RefCounter::increment()]);
        }
        code.extend([Instr::Exchange, RefCounter::push_record()]);
        self.note_push();
        Ok(Fragment::Value(code))
    }

    fn new_struct(&mut self, id: StructId, span: Span) -> Result<Fragment, CodegenError> {
        let layout = self
            .structs
            .get(id)
            .ok_or(CodegenError::UnknownStruct { id: id.0, span })?;

        let mut code = Self::allocate_record(layout.record_size, layout.type_code);
        // self slot
        code.extend([
            Instr::Duplicate,
            Instr::Duplicate,
            Instr::PushI(SELF_SLOT_OFFSET),
            Instr::Add,
            Instr::Exchange,
            Instr::StoreI,
        ]);
        for &slot in &layout.reference_slots {
            code.extend([
                Instr::Duplicate,
                Instr::PushI(slot),
                Instr::Add,
                Instr::PushI(0),
                Instr::StoreI,
            ]);
        }
        code.append(frame::call_initializer(&self.cells, &initializer_label(layout.type_code)));
        Ok(Fragment::Value(code))
    }

    // ── Calls ───────────────────────────────────────────────────

    /// Evaluate arguments left to right, each straight into its slot below
    /// sp. Heap arguments become references owned by the callee.
    fn arguments(&mut self, args: &'p [Expr], params: &[crate::ast::Binding], callee: &str, span: Span) -> Result<Code, CodegenError> {
        if args.len() != params.len() {
            return Err(CodegenError::ArityMismatch {
                name: callee.to_string(),
                expected: params.len(),
                found: args.len(),
                span,
            });
        }
        let mut code = Code::new();
        for (arg, param) in args.iter().zip(params) {
            code.append(self.owned_value(arg)?);
            code.append(frame::push_argument(&self.cells, &param.ty));
        }
        Ok(code)
    }

    fn call(&mut self, function: &str, args: &'p [Expr], span: Span) -> Result<Fragment, CodegenError> {
        let program = self.program;
        let callee = program.function(function).ok_or_else(|| CodegenError::UnknownFunction {
            name: function.to_string(),
            span,
        })?;

        let mut code = self.arguments(args, &callee.params, function, span)?;
        code.push(Instr::Call(function_label(function)));
        code.append(frame::fetch_return_value(&self.cells, &callee.return_type));
        Ok(if callee.return_type == Type::Void {
            Fragment::Void(code)
        } else {
            Fragment::Value(code)
        })
    }

    /// Call `method` on the record left by `receiver`. The receiver is
    /// kept on the operand stack for the duration of the call with a
    /// reference of its own, which goes onto the worklist afterwards.
    pub(super) fn invoke_method(
        &mut self,
        receiver: Code,
        fresh: bool,
        receiver_ty: &Type,
        method: &str,
        args: &'p [Expr],
        span: Span,
    ) -> Result<Fragment, CodegenError> {
        let program = self.program;
        let unknown = || CodegenError::UnknownMethod {
            ty: receiver_ty.clone(),
            method: method.to_string(),
            span,
        };
        let Type::Struct(id) = *receiver_ty else {
            return Err(unknown());
        };
        let def = program
            .struct_def(id)
            .ok_or(CodegenError::UnknownStruct { id: id.0, span })?;
        let callee = def.method(method).ok_or_else(unknown)?;
        let type_code = self.type_code(id, span)?;

        let mut code = receiver;
        if !fresh {
            code.extend([Instr::Duplicate, RefCounter::increment()]);
        }
        code.push(Instr::Duplicate);
        code.append(frame::push_argument(&self.cells, &Type::Int));
        code.append(self.arguments(args, &callee.params, method, span)?);
        code.push(Instr::Call(method_label(type_code, method)));
        code.append(frame::fetch_return_value(&self.cells, &callee.return_type));

        let fragment = if callee.return_type == Type::Void {
            code.push(RefCounter::push_record());
            Fragment::Void(code)
        } else {
            code.extend([Instr::Exchange, RefCounter::push_record()]);
            Fragment::Value(code)
        };
        self.note_push();
        Ok(fragment)
    }
}

fn bound_name(bound: Bound) -> &'static str {
    match bound {
        Bound::Low => "low",
        Bound::High => "high",
    }
}
