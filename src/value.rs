//! Abstract value domain (§3: `HeapItem`, side-effect levels).

use std::fmt;

use crate::ir::ConstValue;

/// Opaque handle to a heap-allocated object tracked by symbolic execution.
///
/// Indexes into the owning [`crate::state::MethodState`]'s object table; it
/// carries no payload itself, mirroring the arena-index style used for
/// [`crate::graph::NodeId`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ObjectRef(pub u32);

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj#{}", self.0)
    }
}

/// Concrete primitive payload of a [`HeapItem::Concrete`] value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Primitive {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Boolean(bool),
    Byte(i8),
    Short(i16),
    Char(u16),
}

impl Primitive {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Primitive::Int(v) => Some(*v as i64),
            Primitive::Long(v) => Some(*v),
            Primitive::Boolean(v) => Some(*v as i64),
            Primitive::Byte(v) => Some(*v as i64),
            Primitive::Short(v) => Some(*v as i64),
            Primitive::Char(v) => Some(*v as i64),
            Primitive::Float(_) | Primitive::Double(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Primitive::Float(v) => Some(*v as f64),
            Primitive::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Primitive::Int(_) => "int",
            Primitive::Long(_) => "long",
            Primitive::Float(_) => "float",
            Primitive::Double(_) => "double",
            Primitive::Boolean(_) => "boolean",
            Primitive::Byte(_) => "byte",
            Primitive::Short(_) => "short",
            Primitive::Char(_) => "char",
        }
    }
}

/// Concrete payload carried by a fully-known [`HeapItem`].
#[derive(Clone, Debug, PartialEq)]
pub enum Concrete {
    Primitive(Primitive),
    /// A reference-typed value with statically known identity: a string
    /// literal, a class literal, or a freshly allocated (not-yet-escaped)
    /// object.
    Object {
        declared_type: String,
        reference: ObjectRef,
    },
    String(String),
    Class(String),
    Null,
}

/// An abstract value tracked per register/heap slot (§3 `HeapItem`).
///
/// Forms a join-semilattice: `Concrete(a).join(Concrete(b)) == Concrete(a)`
/// only when `a == b`, otherwise `Unknown`. `Unknown` is the top element;
/// there is no bottom element distinct from an absent binding.
#[derive(Clone, Debug, PartialEq)]
pub enum HeapItem {
    Concrete(Concrete),
    /// A value that symbolic execution cannot characterize further: the
    /// result of an opaque call, a merge of differing concrete values, or
    /// the output of an unmodeled opcode.
    Unknown,
    /// The receiver of a constructor before its superclass chain has
    /// finished initializing (I-series invariant in §3).
    UninitializedInstance { reference: ObjectRef, class: String },
    /// An exception value produced by a `throw` or a failing instruction,
    /// not yet bound to a `move-exception` destination.
    VirtualException { exception_type: String },
}

impl HeapItem {
    pub fn int(value: i32) -> Self {
        HeapItem::Concrete(Concrete::Primitive(Primitive::Int(value)))
    }

    pub fn long(value: i64) -> Self {
        HeapItem::Concrete(Concrete::Primitive(Primitive::Long(value)))
    }

    pub fn float(value: f32) -> Self {
        HeapItem::Concrete(Concrete::Primitive(Primitive::Float(value)))
    }

    pub fn double(value: f64) -> Self {
        HeapItem::Concrete(Concrete::Primitive(Primitive::Double(value)))
    }

    pub fn null() -> Self {
        HeapItem::Concrete(Concrete::Null)
    }

    pub fn from_const(value: &ConstValue) -> Self {
        match value {
            ConstValue::Int(v) => HeapItem::int(*v),
            ConstValue::Long(v) => HeapItem::long(*v),
            ConstValue::Float(v) => HeapItem::float(*v),
            ConstValue::Double(v) => HeapItem::double(*v),
            ConstValue::String(s) => HeapItem::Concrete(Concrete::String(s.clone())),
            ConstValue::Class(c) => HeapItem::Concrete(Concrete::Class(c.clone())),
        }
    }

    pub fn as_concrete(&self) -> Option<&Concrete> {
        match self {
            HeapItem::Concrete(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_primitive(&self) -> Option<Primitive> {
        match self.as_concrete() {
            Some(Concrete::Primitive(p)) => Some(*p),
            _ => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, HeapItem::Unknown)
    }

    /// Lattice join used when control-flow paths merge (I-MERGE, §4.2).
    ///
    /// Two instances of `Concrete` join to themselves only when bit-equal;
    /// anything else — differing concrete values, or either side already
    /// `Unknown` — joins to `Unknown`. `UninitializedInstance` and
    /// `VirtualException` are not expected on a control-flow merge in a
    /// well-formed method and also collapse to `Unknown` defensively.
    pub fn join(&self, other: &HeapItem) -> HeapItem {
        match (self, other) {
            (HeapItem::Concrete(a), HeapItem::Concrete(b)) if concrete_eq(a, b) => self.clone(),
            (HeapItem::UninitializedInstance { reference: r1, .. }, HeapItem::UninitializedInstance { reference: r2, .. }) if r1 == r2 => {
                self.clone()
            }
            _ => HeapItem::Unknown,
        }
    }
}

fn concrete_eq(a: &Concrete, b: &Concrete) -> bool {
    match (a, b) {
        (Concrete::Primitive(x), Concrete::Primitive(y)) => primitive_bit_eq(x, y),
        (Concrete::Object { reference: x, .. }, Concrete::Object { reference: y, .. }) => x == y,
        (Concrete::String(x), Concrete::String(y)) => x == y,
        (Concrete::Class(x), Concrete::Class(y)) => x == y,
        (Concrete::Null, Concrete::Null) => true,
        _ => false,
    }
}

fn primitive_bit_eq(a: &Primitive, b: &Primitive) -> bool {
    match (a, b) {
        (Primitive::Int(x), Primitive::Int(y)) => x == y,
        (Primitive::Long(x), Primitive::Long(y)) => x == y,
        (Primitive::Float(x), Primitive::Float(y)) => x.to_bits() == y.to_bits(),
        (Primitive::Double(x), Primitive::Double(y)) => x.to_bits() == y.to_bits(),
        (Primitive::Boolean(x), Primitive::Boolean(y)) => x == y,
        (Primitive::Byte(x), Primitive::Byte(y)) => x == y,
        (Primitive::Short(x), Primitive::Short(y)) => x == y,
        (Primitive::Char(x), Primitive::Char(y)) => x == y,
        _ => false,
    }
}

/// Side-effect level tracked per instruction and accumulated per method
/// (§3 `SideEffect.Level`). Forms a three-element join-semilattice:
/// `NONE < WEAK < STRONG`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub enum SideEffectLevel {
    None,
    Weak,
    Strong,
}

impl SideEffectLevel {
    pub fn join(self, other: SideEffectLevel) -> SideEffectLevel {
        std::cmp::max(self, other)
    }
}

impl Default for SideEffectLevel {
    fn default() -> Self {
        SideEffectLevel::None
    }
}

impl fmt::Display for SideEffectLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SideEffectLevel::None => "NONE",
            SideEffectLevel::Weak => "WEAK",
            SideEffectLevel::Strong => "STRONG",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_same_concrete_is_identity() {
        let a = HeapItem::int(7);
        let b = HeapItem::int(7);
        assert_eq!(a.join(&b), HeapItem::int(7));
    }

    #[test]
    fn join_differing_concrete_is_unknown() {
        let a = HeapItem::int(7);
        let b = HeapItem::int(8);
        assert_eq!(a.join(&b), HeapItem::Unknown);
    }

    #[test]
    fn join_with_unknown_is_unknown() {
        let a = HeapItem::int(7);
        assert_eq!(a.join(&HeapItem::Unknown), HeapItem::Unknown);
    }

    #[test]
    fn float_join_uses_bit_equality_not_nan_equality() {
        let nan_a = HeapItem::float(f32::NAN);
        let nan_b = HeapItem::float(f32::NAN);
        assert_eq!(nan_a.join(&nan_b), nan_a);
    }

    #[test]
    fn side_effect_join_is_max() {
        assert_eq!(
            SideEffectLevel::None.join(SideEffectLevel::Weak),
            SideEffectLevel::Weak
        );
        assert_eq!(
            SideEffectLevel::Weak.join(SideEffectLevel::Strong),
            SideEffectLevel::Strong
        );
        assert_eq!(
            SideEffectLevel::Strong.join(SideEffectLevel::None),
            SideEffectLevel::Strong
        );
    }

    #[test]
    fn uninitialized_instance_joins_by_identity() {
        let reference = ObjectRef(1);
        let a = HeapItem::UninitializedInstance {
            reference,
            class: "LFoo;".to_string(),
        };
        let b = a.clone();
        assert_eq!(a.join(&b), a);
    }
}
