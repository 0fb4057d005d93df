//! Stand-in for "reflectively invoke the real implementation" (§4.1
//! invoke-opcode resolution, third bullet). The engine has no JVM/ART to
//! reflect into, so a small table of hand-written pure functions covers
//! the same entries as [`crate::config::SafeList::default_table`] — enough
//! to exercise `MethodInliner`/`PredictableCallCollapser` end to end.

use crate::value::{Concrete, HeapItem, Primitive};

/// Attempts to evaluate a safe-listed call given fully concrete arguments.
/// Returns `None` if the call isn't one of the handful modeled here, or if
/// an argument doesn't have the shape the call expects — either way the
/// caller falls back to treating the invoke as opaque.
pub fn invoke(owner: &str, name: &str, descriptor: &str, args: &[HeapItem]) -> Option<HeapItem> {
    match (owner, name, descriptor, args) {
        ("Ljava/lang/Math;", "abs", "(I)I", [a]) => Some(HeapItem::int(a.as_primitive()?.as_i64()?.unsigned_abs() as i32)),
        ("Ljava/lang/Math;", "abs", "(J)J", [a]) => Some(HeapItem::long(a.as_primitive()?.as_i64()?.unsigned_abs() as i64)),
        ("Ljava/lang/Math;", "max", "(II)I", [a, b]) => {
            Some(HeapItem::int(a.as_primitive()?.as_i64()?.max(b.as_primitive()?.as_i64()?) as i32))
        }
        ("Ljava/lang/Math;", "min", "(II)I", [a, b]) => {
            Some(HeapItem::int(a.as_primitive()?.as_i64()?.min(b.as_primitive()?.as_i64()?) as i32))
        }
        ("Ljava/lang/String;", "length", "()I", [a]) => {
            string_literal(a).map(|s| HeapItem::int(s.encode_utf16().count() as i32))
        }
        ("Ljava/lang/String;", "charAt", "(I)C", [a, index]) => {
            let s = string_literal(a)?;
            let index = index.as_primitive()?.as_i64()? as usize;
            let unit = s.encode_utf16().nth(index)?;
            Some(HeapItem::Concrete(Concrete::Primitive(Primitive::Char(unit))))
        }
        ("Ljava/lang/String;", "equals", "(Ljava/lang/Object;)Z", [a, b]) => {
            let (a, b) = (string_literal(a)?, string_literal(b));
            Some(HeapItem::Concrete(Concrete::Primitive(Primitive::Boolean(Some(a) == b))))
        }
        ("Ljava/lang/String;", "hashCode", "()I", [a]) => {
            let s = string_literal(a)?;
            Some(HeapItem::int(java_string_hash(s)))
        }
        ("Ljava/util/Objects;", "equals", "(Ljava/lang/Object;Ljava/lang/Object;)Z", [a, b]) => {
            Some(HeapItem::Concrete(Concrete::Primitive(Primitive::Boolean(concrete_value_eq(a, b)))))
        }
        _ => None,
    }
}

fn string_literal(value: &HeapItem) -> Option<&str> {
    match value {
        HeapItem::Concrete(Concrete::String(s)) => Some(s.as_str()),
        _ => None,
    }
}

/// Java's `String.hashCode()` recurrence: `s[0]*31^(n-1) + ... + s[n-1]`.
fn java_string_hash(s: &str) -> i32 {
    s.encode_utf16()
        .fold(0i32, |hash, unit| hash.wrapping_mul(31).wrapping_add(unit as i32))
}

fn concrete_value_eq(a: &HeapItem, b: &HeapItem) -> bool {
    matches!((a, b), (HeapItem::Concrete(_), HeapItem::Concrete(_))) && a == b
}
