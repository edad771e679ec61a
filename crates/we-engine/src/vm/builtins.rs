//! Value-level built-ins
//!
//! Conversions and structural helpers shared by the opcode handlers and the
//! embedding API. None of these run bytecode.

use rustc_hash::FxHashMap;

use super::array::Array;
use super::buffer::Buffer;
use super::value::{borrow, borrow_mut, Value, ValueKind};
use super::{VmError, VmResult};

// ============================================================================
// Stringify / parse
// ============================================================================

/// Render any value as a buffer
///
/// A buffer is returned unchanged. Nested buffers are quoted, tables render
/// as `{k: v, ...}` and arrays as `[a, b, ...]`. A container that is already
/// being rendered further up renders as `{...}` or `[...]`.
pub fn stringify(value: &Value) -> VmResult<Buffer> {
    if let Value::Buffer(buf) = value {
        return Ok(buf.clone());
    }
    let mut out = Vec::new();
    let mut active = FxHashMap::default();
    render(value, &mut out, &mut active)?;
    Buffer::from_vec(out)
}

fn render(value: &Value, out: &mut Vec<u8>, active: &mut FxHashMap<usize, u32>) -> VmResult<()> {
    match value {
        Value::Nil => out.extend_from_slice(b"nil"),
        Value::Number(n) => out.extend_from_slice(n.to_string().as_bytes()),
        Value::Buffer(buf) => {
            out.push(b'"');
            buf.with_bytes(|b| out.extend_from_slice(b));
            out.push(b'"');
        }
        Value::Table(h) => {
            let rc = h.upgrade()?;
            let id = h.as_ptr() as usize;
            out.push(b'{');
            if enter(active, id) {
                let table = borrow(&rc)?;
                for (n, (key, val)) in table.entries().enumerate() {
                    if n != 0 {
                        out.extend_from_slice(b", ");
                    }
                    render(key, out, active)?;
                    out.extend_from_slice(b": ");
                    render(val, out, active)?;
                }
            } else {
                out.extend_from_slice(b"...");
            }
            leave(active, id);
            out.push(b'}');
        }
        Value::Array(h) => {
            let rc = h.upgrade()?;
            let id = h.as_ptr() as usize;
            out.push(b'[');
            if enter(active, id) {
                let arr = borrow(&rc)?;
                for (n, item) in arr.values().enumerate() {
                    if n != 0 {
                        out.extend_from_slice(b", ");
                    }
                    render(item, out, active)?;
                }
            } else {
                out.extend_from_slice(b"...");
            }
            leave(active, id);
            out.push(b']');
        }
    }
    Ok(())
}

/// Count a visit; true on the first (outermost) visit
fn enter(active: &mut FxHashMap<usize, u32>, id: usize) -> bool {
    let depth = active.entry(id).or_insert(0);
    *depth += 1;
    *depth == 1
}

fn leave(active: &mut FxHashMap<usize, u32>, id: usize) {
    if let Some(depth) = active.get_mut(&id) {
        *depth -= 1;
        if *depth == 0 {
            active.remove(&id);
        }
    }
}

/// Parse a base-10 integer prefix: optional `-`, then digits up to the first
/// non-digit. Overflow wraps, so every `i64` round-trips through stringify.
pub fn parse_int(bytes: &[u8]) -> i64 {
    let (negative, digits) = match bytes.split_first() {
        Some((b'-', rest)) => (true, rest),
        _ => (false, bytes),
    };
    let magnitude = digits
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .fold(0i64, |acc, b| acc.wrapping_mul(10).wrapping_add((b - b'0') as i64));
    if negative {
        magnitude.wrapping_neg()
    } else {
        magnitude
    }
}

/// Convert a looked-up value to the kind of a non-nil default
///
/// Numbers and tables stringify to buffers and buffers parse to numbers;
/// any other mismatch is an error.
pub fn dyncast(value: Value, kind: ValueKind) -> VmResult<Value> {
    if value.kind() == kind {
        return Ok(value);
    }
    match (&value, kind) {
        (Value::Number(_), ValueKind::Buffer) | (Value::Table(_), ValueKind::Buffer) => {
            Ok(Value::Buffer(stringify(&value)?))
        }
        (Value::Buffer(buf), ValueKind::Number) => {
            Ok(Value::Number(buf.with_bytes(parse_int)))
        }
        _ => {
            tracing::warn!(
                from = value.kind().name(),
                to = kind.name(),
                "could not convert value"
            );
            Err(VmError::InvalidArgument(format!(
                "cannot convert {} to {}",
                value.kind().name(),
                kind.name()
            )))
        }
    }
}

// ============================================================================
// Slice / join
// ============================================================================

fn bound(value: &Value, what: &str) -> VmResult<Option<i64>> {
    match value {
        Value::Nil => Ok(None),
        Value::Number(n) => Ok(Some(*n)),
        other => Err(VmError::InvalidArgument(format!(
            "slice {} must be a number, found {}",
            what,
            other.kind().name()
        ))),
    }
}

/// Python-style slice `buf[start:stop:step]`
///
/// Nil bounds default toward the ends in the step direction and a nil step
/// is 1. A unit step returns a view of the same heap buffer; other steps copy.
pub fn slice(buf: &Buffer, start: &Value, stop: &Value, step: &Value) -> VmResult<Buffer> {
    let n = buf.len() as i64;
    let start = bound(start, "start")?;
    let stop = bound(stop, "stop")?;
    let step = bound(step, "step")?.unwrap_or(1);
    if n == 0 {
        return Ok(buf.clone());
    }
    if step == 0 {
        return buf.view(0, 0);
    }

    let clamp = |idx: i64, low: i64, high: i64| -> i64 {
        let idx = if idx < 0 { idx.saturating_add(n) } else { idx };
        idx.clamp(low, high)
    };
    let (i, e) = if step > 0 {
        (
            start.map_or(0, |s| clamp(s, 0, n)),
            stop.map_or(n, |s| clamp(s, 0, n)),
        )
    } else {
        (
            start.map_or(n - 1, |s| clamp(s, -1, n - 1)),
            stop.map_or(-1, |s| clamp(s, -1, n - 1)),
        )
    };

    if step == 1 {
        if i >= e {
            return buf.view(0, 0);
        }
        return buf.view(i as usize, (e - i) as usize);
    }

    buf.with_bytes(|bytes| {
        let mut out = Vec::new();
        let mut pos = i;
        while (step > 0 && pos < e) || (step < 0 && pos > e) {
            out.push(bytes[pos as usize]);
            pos = match pos.checked_add(step) {
                Some(next) => next,
                None => break,
            };
        }
        Buffer::from_vec(out)
    })
}

/// Join the stringified items of `arr` with `sep`
///
/// The array itself is left unchanged. A single engine-owned buffer item is
/// returned by reference; host storage is always copied.
pub fn join(arr: &Array, sep: &Buffer) -> VmResult<Buffer> {
    let parts = arr
        .values()
        .map(stringify)
        .collect::<VmResult<Vec<Buffer>>>()?;
    match parts.as_slice() {
        [] => Ok(Buffer::empty()),
        [only] if only.is_external() => only.with_bytes(Buffer::copy_from),
        [only] => Ok(only.clone()),
        _ => {
            let mut out = Vec::new();
            for (n, part) in parts.iter().enumerate() {
                if n != 0 {
                    sep.with_bytes(|b| out.extend_from_slice(b));
                }
                part.with_bytes(|b| out.extend_from_slice(b));
            }
            Buffer::from_vec(out)
        }
    }
}

// ============================================================================
// Iteration
// ============================================================================

fn cursor_of(cursor: &Value) -> VmResult<Option<i64>> {
    match cursor {
        Value::Nil => Ok(None),
        Value::Number(n) => Ok(Some(*n)),
        other => Err(VmError::InvalidArgument(format!(
            "iteration cursor must be nil or a number, found {}",
            other.kind().name()
        ))),
    }
}

/// Advance an iteration cursor over a table or array
///
/// Nil starts from the beginning; the result is the next occupied slot index
/// or nil at the end.
pub fn next_key(container: &Value, cursor: &Value) -> VmResult<Value> {
    let cursor = cursor_of(cursor)?;
    let next = match container {
        Value::Table(h) => borrow(&*h.upgrade()?)?.next_occupied(cursor),
        Value::Array(h) => borrow(&*h.upgrade()?)?.next_occupied(cursor),
        other => {
            return Err(VmError::InvalidArgument(format!(
                "cannot iterate over {}",
                other.kind().name()
            )))
        }
    };
    Ok(next.map_or(Value::Nil, |i| Value::Number(i as i64)))
}

/// Store the `(key, value)` pair at `cursor` into `dst[0]` and `dst[1]`
///
/// A nil cursor is a no-op; a cursor outside the container stores nils.
pub fn key_value(container: &Value, cursor: &Value, dst: &Value) -> VmResult<()> {
    let Some(idx) = cursor_of(cursor)? else {
        return Ok(());
    };
    let pair = match container {
        Value::Table(h) => {
            let rc = h.upgrade()?;
            let table = borrow(&rc)?;
            usize::try_from(idx).ok().and_then(|i| table.entry_at(i))
        }
        Value::Array(h) => {
            let rc = h.upgrade()?;
            let arr = borrow(&rc)?;
            usize::try_from(idx)
                .ok()
                .and_then(|i| arr.slot(i).ok().cloned())
                .map(|v| (Value::Number(idx), v))
        }
        other => {
            return Err(VmError::InvalidArgument(format!(
                "cannot iterate over {}",
                other.kind().name()
            )))
        }
    };
    let (key, val) = pair.unwrap_or_default();
    let Value::Array(h) = dst else {
        return Err(VmError::InvalidArgument(format!(
            "pair destination must be an array, found {}",
            dst.kind().name()
        )));
    };
    let rc = h.upgrade()?;
    let mut out = borrow_mut(&rc)?;
    out.set(0, key)?;
    out.set(1, val)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::table::Table;
    use crate::vm::value::Handle;
    use std::rc::Rc;

    fn s(text: &str) -> Buffer {
        Buffer::copy_from(text.as_bytes()).unwrap()
    }

    fn text(buf: &Buffer) -> String {
        String::from_utf8(buf.to_vec()).unwrap()
    }

    #[test]
    fn test_stringify_scalars() {
        assert_eq!(text(&stringify(&Value::Nil).unwrap()), "nil");
        assert_eq!(text(&stringify(&Value::Number(-42)).unwrap()), "-42");
        let raw = s("plain");
        assert!(stringify(&Value::Buffer(raw.clone())).unwrap().same_heap(&raw));
    }

    #[test]
    fn test_stringify_nested() {
        let mut arr = Array::new();
        arr.push(Value::Number(1)).unwrap();
        arr.push(Value::Buffer(s("two"))).unwrap();
        arr.push(Value::Nil).unwrap();
        let value = Value::Array(Handle::new(arr));
        assert_eq!(text(&stringify(&value).unwrap()), "[1, \"two\"]");

        let mut table = Table::new();
        table.set(&Value::Number(0), Value::Buffer(s("v")), None).unwrap();
        let value = Value::Table(Handle::new(table));
        assert_eq!(text(&stringify(&value).unwrap()), "{0: \"v\"}");
    }

    #[test]
    fn test_stringify_cycle_guard() {
        let outer = Value::new_table();
        let rc = outer.as_table().unwrap().unwrap();
        rc.borrow_mut()
            .set(&Value::Number(0), outer.downgrade(), None)
            .unwrap();
        assert_eq!(text(&stringify(&outer).unwrap()), "{0: {...}}");
    }

    #[test]
    fn test_parse_int() {
        assert_eq!(parse_int(b"123"), 123);
        assert_eq!(parse_int(b"-77abc"), -77);
        assert_eq!(parse_int(b"abc"), 0);
        assert_eq!(parse_int(b""), 0);
        assert_eq!(parse_int(b"-"), 0);
    }

    #[test]
    fn test_number_round_trip() {
        for n in [0, 1, -1, 42, i64::MAX, i64::MIN, -9_000_000_000] {
            let buf = stringify(&Value::Number(n)).unwrap();
            assert_eq!(buf.with_bytes(parse_int), n);
        }
    }

    #[test]
    fn test_dyncast() {
        let v = dyncast(Value::Number(12), ValueKind::Buffer).unwrap();
        assert_eq!(text(v.as_buffer().unwrap()), "12");
        let v = dyncast(Value::Buffer(s("-5")), ValueKind::Number).unwrap();
        assert_eq!(v, Value::Number(-5));
        assert!(dyncast(Value::new_array(), ValueKind::Number).is_err());
    }

    #[test]
    fn test_slice_unit_step_is_view() {
        let buf = s("hello world");
        let out = slice(&buf, &Value::Number(6), &Value::Nil, &Value::Nil).unwrap();
        assert!(out.same_heap(&buf));
        assert_eq!(text(&out), "world");
        let out = slice(&buf, &Value::Number(-5), &Value::Number(-1), &Value::Number(1)).unwrap();
        assert_eq!(text(&out), "worl");
    }

    #[test]
    fn test_slice_steps() {
        let buf = s("abcdef");
        let every_other = slice(&buf, &Value::Nil, &Value::Nil, &Value::Number(2)).unwrap();
        assert_eq!(text(&every_other), "ace");
        let reversed = slice(&buf, &Value::Nil, &Value::Nil, &Value::Number(-1)).unwrap();
        assert_eq!(text(&reversed), "fedcba");
        let tail = slice(&buf, &Value::Number(4), &Value::Number(1), &Value::Number(-2)).unwrap();
        assert_eq!(text(&tail), "ec");
        let empty = slice(&buf, &Value::Number(4), &Value::Number(1), &Value::Nil).unwrap();
        assert!(empty.is_empty());
        let zero = slice(&buf, &Value::Nil, &Value::Nil, &Value::Number(0)).unwrap();
        assert!(zero.is_empty());
    }

    #[test]
    fn test_join() {
        let mut arr = Array::new();
        arr.push(Value::Buffer(s("a"))).unwrap();
        arr.push(Value::Number(1)).unwrap();
        arr.push(Value::Buffer(s("b"))).unwrap();
        let out = join(&arr, &s(", ")).unwrap();
        assert_eq!(text(&out), "a, 1, b");
        assert_eq!(arr.len(), 3);
        assert_eq!(arr.get(1, &Value::Nil).unwrap(), Value::Number(1));

        assert!(join(&Array::new(), &s(",")).unwrap().is_empty());
    }

    #[test]
    fn test_join_single_item() {
        let owned = s("solo");
        let mut arr = Array::new();
        arr.push(Value::Buffer(owned.clone())).unwrap();
        let out = join(&arr, &s(",")).unwrap();
        assert!(out.same_heap(&owned));

        let host = Buffer::external(Rc::from(&b"host"[..])).unwrap();
        let mut arr = Array::new();
        arr.push(Value::Buffer(host.clone())).unwrap();
        let out = join(&arr, &s(",")).unwrap();
        assert_eq!(text(&out), "host");
        assert!(!out.same_heap(&host));
        assert!(!out.is_external());
    }

    #[test]
    fn test_iteration_helpers() {
        let mut arr = Array::new();
        arr.set(2, Value::Number(20)).unwrap();
        let container = Value::Array(Handle::new(arr));
        let cursor = next_key(&container, &Value::Nil).unwrap();
        assert_eq!(cursor, Value::Number(2));
        assert_eq!(next_key(&container, &cursor).unwrap(), Value::Nil);

        let dst = Value::new_array();
        key_value(&container, &cursor, &dst).unwrap();
        let out = dst.as_array().unwrap().unwrap();
        assert_eq!(out.borrow_mut().get(0, &Value::Nil).unwrap(), Value::Number(2));
        assert_eq!(out.borrow_mut().get(1, &Value::Nil).unwrap(), Value::Number(20));
    }
}
