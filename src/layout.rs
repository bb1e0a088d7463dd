//! Binary shape of heap records and activation records.
//!
//! Every heap record starts with a 12-byte header:
//!
//! ```text
//!  0      4      8        11      12
//!  +------+------+--------+-------+------------------
//!  | refc | type | (rsv)  | subsz | payload ...
//!  +------+------+--------+-------+------------------
//! ```
//!
//! Interval payloads hold two inline scalars, or two child pointers when the
//! subtype is itself an interval. Struct payloads start with the self
//! pointer, followed by the declared members.

use std::collections::BTreeMap;

use crate::ast::{Program, StructId, Type};

pub const POINTER_SIZE: u32 = 4;

pub const REFCOUNT_OFFSET: i32 = 0;
pub const TYPE_CODE_OFFSET: i32 = 4;
pub const SUBTYPE_SIZE_OFFSET: i32 = 11;
pub const HEADER_SIZE: u32 = 12;
pub const PAYLOAD_OFFSET: i32 = 12;

/// Offset of a struct's hidden self pointer.
pub const SELF_SLOT_OFFSET: i32 = 12;
/// First declared struct member.
pub const STRUCT_MEMBERS_OFFSET: u32 = 16;

pub const FLAT_INTERVAL_TYPE_CODE: i32 = 2;
pub const NESTED_INTERVAL_TYPE_CODE: i32 = 3;
/// Struct type codes are assigned from here on, in declaration order.
pub const FIRST_STRUCT_TYPE_CODE: i32 = 16;

/// Saved frame pointer (`fp-4`) and return address (`fp-8`).
pub const FRAME_HEADER_SIZE: u32 = 8;
pub const SAVED_FP_OFFSET: i32 = -4;
pub const RETURN_ADDRESS_OFFSET: i32 = -8;

/// Bytes reserved at address 0 so that no record is ever located there.
pub const NULL_GUARD_SIZE: u32 = 8;

/// Offset of the low bound in an interval record.
pub fn interval_low_offset() -> i32 {
    PAYLOAD_OFFSET
}

/// Offset of the high bound in an interval record over `subtype`.
pub fn interval_high_offset(subtype: &Type) -> i32 {
    PAYLOAD_OFFSET + subtype.size() as i32
}

pub fn interval_record_size(subtype: &Type) -> u32 {
    HEADER_SIZE + 2 * subtype.size()
}

/// The closed set of record kinds the collector knows how to release.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordKind {
    FlatInterval,
    NestedInterval,
    Struct(StructId),
}

impl RecordKind {
    /// Kind of the records that values of `ty` point to.
    pub fn of(ty: &Type) -> Option<Self> {
        match ty {
            Type::Interval(sub) if sub.is_heap() => Some(RecordKind::NestedInterval),
            Type::Interval(_) => Some(RecordKind::FlatInterval),
            Type::Struct(id) => Some(RecordKind::Struct(*id)),
            _ => None,
        }
    }

    pub fn type_code(self) -> i32 {
        match self {
            RecordKind::FlatInterval => FLAT_INTERVAL_TYPE_CODE,
            RecordKind::NestedInterval => NESTED_INTERVAL_TYPE_CODE,
            RecordKind::Struct(id) => FIRST_STRUCT_TYPE_CODE + id.0 as i32,
        }
    }
}

/// Layout of one struct type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StructLayout {
    pub id: StructId,
    pub name: String,
    pub type_code: i32,
    pub record_size: u32,
    /// Offsets of members that hold references; the self slot is never listed.
    pub reference_slots: Vec<i32>,
}

/// Layouts of every struct in a program, keyed by id.
#[derive(Clone, Debug, Default)]
pub struct StructTable {
    layouts: BTreeMap<StructId, StructLayout>,
}

impl StructTable {
    pub fn new(program: &Program) -> Self {
        let mut layouts = BTreeMap::new();
        for def in &program.structs {
            let reference_slots = def
                .members
                .iter()
                .filter(|m| m.ty.is_heap())
                .filter_map(|m| match m.storage {
                    crate::ast::Storage::Member { offset } => Some(offset),
                    _ => None,
                })
                .collect();
            layouts.insert(
                def.id,
                StructLayout {
                    id: def.id,
                    name: def.name.clone(),
                    type_code: RecordKind::Struct(def.id).type_code(),
                    record_size: STRUCT_MEMBERS_OFFSET + def.member_area,
                    reference_slots,
                },
            );
        }
        Self { layouts }
    }

    pub fn get(&self, id: StructId) -> Option<&StructLayout> {
        self.layouts.get(&id)
    }

    /// Struct layouts in type-code order.
    pub fn iter(&self) -> impl Iterator<Item = &StructLayout> {
        self.layouts.values()
    }

    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builder::ProgramBuilder;
    use crate::ast::Expr;

    #[test]
    fn interval_offsets_follow_subtype_size() {
        assert_eq!(interval_record_size(&Type::Char), 14);
        assert_eq!(interval_record_size(&Type::Int), 20);
        assert_eq!(interval_record_size(&Type::Float), 28);
        assert_eq!(interval_record_size(&Type::interval_of(Type::Int)), 20);
        assert_eq!(interval_low_offset(), 12);
        assert_eq!(interval_high_offset(&Type::Float), 20);
        assert_eq!(interval_high_offset(&Type::Bool), 13);
    }

    #[test]
    fn record_kinds_and_codes() {
        let flat = Type::interval_of(Type::Float);
        let nested = Type::interval_of(flat.clone());
        assert_eq!(RecordKind::of(&flat), Some(RecordKind::FlatInterval));
        assert_eq!(RecordKind::of(&nested), Some(RecordKind::NestedInterval));
        assert_eq!(RecordKind::of(&Type::Int), None);
        assert_eq!(RecordKind::FlatInterval.type_code(), 2);
        assert_eq!(RecordKind::NestedInterval.type_code(), 3);
        assert_eq!(RecordKind::Struct(StructId(0)).type_code(), 16);
        assert_eq!(RecordKind::Struct(StructId(4)).type_code(), 20);
    }

    #[test]
    fn struct_table_lists_reference_members() {
        let mut b = ProgramBuilder::new();
        let inner = b.begin_struct("Inner");
        b.member("n", Expr::int(0));
        b.end_struct();
        let outer = b.begin_struct("Outer");
        b.member("flag", Expr::boolean(true));
        b.member("span", Expr::interval(Expr::int(1), Expr::int(2)));
        b.member("child", Expr::new_struct(inner));
        b.end_struct();
        let program = b.finish();

        let table = StructTable::new(&program);
        let inner = table.get(inner).unwrap();
        assert_eq!(inner.record_size, 20);
        assert!(inner.reference_slots.is_empty());

        let outer = table.get(outer).unwrap();
        assert_eq!(outer.type_code, 17);
        assert_eq!(outer.record_size, 16 + 1 + 4 + 4);
        assert_eq!(outer.reference_slots, vec![17, 21]);
        assert!(!outer.reference_slots.contains(&SELF_SLOT_OFFSET));
        assert_eq!(table.iter().count(), 2);
    }
}
