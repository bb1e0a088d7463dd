//! `print` statements and the interval printing subroutines.

use super::{is_fresh, shaped, CodegenError, Generator};
use crate::asm::{load_instr, Code, Instr};
use crate::ast::{Expr, Type};
use crate::layout::{
    interval_low_offset, NESTED_INTERVAL_TYPE_CODE, PAYLOAD_OFFSET, POINTER_SIZE,
    SUBTYPE_SIZE_OFFSET, TYPE_CODE_OFFSET,
};
use crate::runtime::{
    struct_name_label, RefCounter, CHARACTER_FORMAT, CLOSE_BRACKET_STRING, FALSE_STRING, FLOAT_FORMAT,
    INTEGER_FORMAT, NEWLINE_STRING, OPEN_BRACKET_STRING, SEPARATOR_STRING, SPACE_STRING,
    STRING_FORMAT, TRUE_STRING,
};

/// Scalar types that can sit at the bottom of an interval.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ScalarKind {
    Bool,
    Char,
    Int,
    Float,
}

impl ScalarKind {
    pub fn of(ty: &Type) -> Option<Self> {
        match ty {
            Type::Bool => Some(ScalarKind::Bool),
            Type::Char => Some(ScalarKind::Char),
            Type::Int => Some(ScalarKind::Int),
            Type::Float => Some(ScalarKind::Float),
            _ => None,
        }
    }

    pub fn ty(self) -> Type {
        match self {
            ScalarKind::Bool => Type::Bool,
            ScalarKind::Char => Type::Char,
            ScalarKind::Int => Type::Int,
            ScalarKind::Float => Type::Float,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ScalarKind::Bool => "bool",
            ScalarKind::Char => "char",
            ScalarKind::Int => "int",
            ScalarKind::Float => "float",
        }
    }
}

/// Printing routine for intervals whose innermost scalar is `kind`,
/// `[.. rec (ret)] -> [..]`.
pub fn interval_printer_label(kind: ScalarKind) -> String {
    format!("-print-interval-{}", kind.name())
}

fn print_string(label: &str) -> [Instr; 2] {
    [Instr::PushD(label.to_string()), Instr::Printf]
}

impl<'p> Generator<'p> {
    pub(super) fn print(&mut self, items: &'p [Expr], spaces: bool, newline: bool) -> Result<Code, CodegenError> {
        let mut code = Code::new();
        for (i, item) in items.iter().enumerate() {
            if spaces && i > 0 {
                code.extend(print_string(SPACE_STRING));
            }
            code.append(self.print_item(item)?);
        }
        if newline {
            code.extend(print_string(NEWLINE_STRING));
        }
        Ok(code)
    }

    fn print_item(&mut self, item: &'p Expr) -> Result<Code, CodegenError> {
        let span = item.span;
        let ty = &item.ty;
        if ScalarKind::of(ty).is_some() {
            let mut code = self.value(item)?;
            code.append(self.print_scalar(ty));
            return Ok(code);
        }

        let fragment = self.expr(item)?;
        let fresh = is_fresh(&fragment, ty);
        let mut code = shaped(fragment.into_value(ty), span)?;
        match ty {
            Type::Interval(_) => {
                let Some(kind) = ScalarKind::of(ty.base_scalar()) else {
                    return Err(CodegenError::Unprintable { ty: ty.clone(), span });
                };
                self.interval_printers.insert(kind);
                if fresh {
                    code.push(Instr::Duplicate);
                }
                code.push(Instr::Call(interval_printer_label(kind)));
                if fresh {
                    code.push(RefCounter::push_record());
                    self.note_push();
                }
                Ok(code)
            }
            Type::Struct(id) => {
                let program = self.program;
                let def = program
                    .struct_def(*id)
                    .ok_or(CodegenError::UnknownStruct { id: id.0, span })?;
                if let Some(printer) = &def.printer {
                    let ret = def
                        .method(printer)
                        .map(|m| m.return_type.clone())
                        .unwrap_or(Type::Void);
                    let fragment = self.invoke_method(code, fresh, ty, printer, &[], span)?;
                    return Ok(self.discard(fragment, &ret));
                }
                let type_code = self.type_code(*id, span)?;
                if fresh {
                    code.push(RefCounter::push_record());
                    self.note_push();
                } else {
                    code.push(Instr::Pop);
                }
                code.push(Instr::PushD(struct_name_label(type_code)));
                code.extend(print_string(STRING_FORMAT));
                Ok(code)
            }
            _ => Err(CodegenError::Unprintable { ty: ty.clone(), span }),
        }
    }

    /// `[.. v] -> [..]` for a scalar value.
    fn print_scalar(&mut self, ty: &Type) -> Code {
        match ty {
            Type::Float => print_string(FLOAT_FORMAT).into_iter().collect(),
            Type::Char => print_string(CHARACTER_FORMAT).into_iter().collect(),
            Type::Bool => {
                let group = self.labels.group("print-bool");
                let false_label = group.label("false");
                let join = group.label("join");
                let mut code: Code = vec![
                    Instr::JumpFalse(false_label.clone()),
                    Instr::PushD(TRUE_STRING.to_string()),
                    Instr::Jump(join.clone()),
                    Instr::Label(false_label),
                    Instr::PushD(FALSE_STRING.to_string()),
                    Instr::Label(join),
                ]
                .into();
                code.extend(print_string(STRING_FORMAT));
                code
            }
            _ => print_string(INTEGER_FORMAT).into_iter().collect(),
        }
    }

    /// The printer for intervals over `kind`. Flat records read their high
    /// bound at the offset recorded in the subtype-size byte; nested
    /// records recurse into both children.
    pub(super) fn interval_printer(&mut self, kind: ScalarKind) -> Code {
        let label = interval_printer_label(kind);
        let scalar = kind.ty();
        // every scalar has a load
        let load = load_instr(&scalar).unwrap_or(Instr::LoadI);
        let group = self.labels.group("interval-printer");
        let nested = group.label("nested");
        let close = group.label("close");

        let mut code: Code = vec![Instr::Label(label.clone()), Instr::Exchange].into();
        code.extend(print_string(OPEN_BRACKET_STRING));
        code.extend([
            Instr::Duplicate,
            Instr::PushI(TYPE_CODE_OFFSET),
            Instr::Add,
            Instr::LoadI,
            Instr::PushI(NESTED_INTERVAL_TYPE_CODE),
            Instr::Subtract,
            Instr::JumpFalse(nested.clone()),
        ]);

        // flat
        code.extend([
            Instr::Duplicate,
            Instr::PushI(interval_low_offset()),
            Instr::Add,
            load.clone(),
        ]);
        code.append(self.print_scalar(&scalar));
        code.extend(print_string(SEPARATOR_STRING));
        code.extend([
            Instr::Duplicate,
            Instr::Duplicate,
            Instr::PushI(SUBTYPE_SIZE_OFFSET),
            Instr::Add,
            Instr::LoadC,
            Instr::PushI(PAYLOAD_OFFSET),
            Instr::Add,
            Instr::Add,
            load,
        ]);
        code.append(self.print_scalar(&scalar));
        code.push(Instr::Jump(close.clone()));

        code.push(Instr::Label(nested));
        for (i, offset) in [PAYLOAD_OFFSET, PAYLOAD_OFFSET + POINTER_SIZE as i32]
            .into_iter()
            .enumerate()
        {
            if i > 0 {
                code.extend(print_string(SEPARATOR_STRING));
            }
            code.extend([
                Instr::Duplicate,
                Instr::PushI(offset),
                Instr::Add,
                Instr::LoadI,
                Instr::Call(label.clone()),
            ]);
        }

        code.push(Instr::Label(close));
        code.push(Instr::Pop);
        code.extend(print_string(CLOSE_BRACKET_STRING));
        code.push(Instr::Return);
        code
    }
}
