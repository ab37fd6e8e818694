//! POD encoding.

use bytes::{BufMut, BytesMut};

use super::{Array, Choice, MAX_DEPTH, Object, POD_HEADER_SIZE, Pod, PodType, Sequence, padded_len};
use crate::error::PwError;

/// Encode `pod` as a complete, padded record.
///
/// Fails with [`PwError::Encoding`] when the value cannot be represented
/// on the wire (invalid fraction or rectangle, mixed array children,
/// oversized payloads, nesting deeper than [`MAX_DEPTH`], ...).
pub fn encode(pod: &Pod) -> Result<Vec<u8>, PwError> {
    let mut buf = BytesMut::new();
    write_pod(&mut buf, pod)?;
    Ok(buf.to_vec())
}

/// Append one padded record to `buf`.
pub(crate) fn write_pod(buf: &mut BytesMut, pod: &Pod) -> Result<(), PwError> {
    write_at_depth(buf, pod, 0)
}

fn write_at_depth(buf: &mut BytesMut, pod: &Pod, depth: usize) -> Result<(), PwError> {
    let body = encode_body(pod, depth)?;
    let size = u32::try_from(body.len())
        .map_err(|_| PwError::Encoding(format!("{} body of {} bytes", pod.pod_type(), body.len())))?;

    buf.reserve(POD_HEADER_SIZE + padded_len(body.len()));
    buf.put_u32_le(size);
    buf.put_u32_le(pod.pod_type() as u32);
    buf.put_slice(&body);
    buf.put_bytes(0, padded_len(body.len()) - body.len());
    Ok(())
}

/// Encode the payload of `pod` without header or padding.
fn encode_body(pod: &Pod, depth: usize) -> Result<Vec<u8>, PwError> {
    if depth > MAX_DEPTH {
        return Err(PwError::Encoding(format!("nesting deeper than {MAX_DEPTH}")));
    }
    let mut body = BytesMut::new();
    match pod {
        Pod::None => {}
        Pod::Bool(v) => body.put_i32_le(i32::from(*v)),
        Pod::Id(v) => body.put_u32_le(*v),
        Pod::Int(v) => body.put_i32_le(*v),
        Pod::Long(v) => body.put_i64_le(*v),
        Pod::Float(v) => body.put_f32_le(*v),
        Pod::Double(v) => body.put_f64_le(*v),
        Pod::String(s) => {
            if s.as_bytes().contains(&0) {
                return Err(PwError::Encoding("string contains an interior NUL".into()));
            }
            body.put_slice(s.as_bytes());
            body.put_u8(0);
        }
        Pod::Bytes(v) | Pod::Bitmap(v) => body.put_slice(v),
        Pod::Rectangle(r) => {
            if !r.is_valid() {
                return Err(PwError::Encoding(format!(
                    "rectangle {}x{} has a zero dimension",
                    r.width, r.height
                )));
            }
            body.put_i32_le(r.x);
            body.put_i32_le(r.y);
            body.put_u32_le(r.width);
            body.put_u32_le(r.height);
        }
        Pod::Fraction(f) => {
            if !f.is_valid() {
                return Err(PwError::Encoding(format!("fraction {}/0", f.num)));
            }
            body.put_u32_le(f.num);
            body.put_u32_le(f.denom);
        }
        Pod::Array(array) => encode_array(&mut body, array, depth)?,
        Pod::Struct(fields) => {
            for field in fields {
                write_at_depth(&mut body, field, depth + 1)?;
            }
        }
        Pod::Object(object) => encode_object(&mut body, object, depth)?,
        Pod::Choice(choice) => encode_choice(&mut body, choice, depth)?,
        Pod::Pointer(p) => {
            body.put_u32_le(p.pointer_type);
            body.put_u32_le(0);
            body.put_u64_le(p.address);
        }
        Pod::Fd(v) => body.put_i64_le(*v),
        Pod::Sequence(seq) => encode_sequence(&mut body, seq, depth)?,
    }
    Ok(body.to_vec())
}

fn encode_array(body: &mut BytesMut, array: &Array, depth: usize) -> Result<(), PwError> {
    let (child_size, children) =
        encode_children(array.child_type, &array.items, "array", depth)?;
    body.put_u32_le(child_size);
    body.put_u32_le(array.child_type as u32);
    for child in children {
        body.put_slice(&child);
    }
    Ok(())
}

fn encode_choice(body: &mut BytesMut, choice: &Choice, depth: usize) -> Result<(), PwError> {
    choice
        .kind
        .check_len(choice.alternatives.len())
        .map_err(PwError::Encoding)?;
    let (child_size, children) =
        encode_children(choice.child_type, &choice.alternatives, "choice", depth)?;
    body.put_u32_le(choice.kind as u32);
    body.put_u32_le(choice.flags);
    body.put_u32_le(child_size);
    body.put_u32_le(choice.child_type as u32);
    for child in children {
        body.put_slice(&child);
    }
    Ok(())
}

/// Encode homogeneous children as equally sized raw bodies.
fn encode_children(
    child_type: PodType,
    items: &[Pod],
    what: &str,
    depth: usize,
) -> Result<(u32, Vec<Vec<u8>>), PwError> {
    let mut children = Vec::with_capacity(items.len());
    for item in items {
        if item.pod_type() != child_type {
            return Err(PwError::Encoding(format!(
                "{what} of {child_type} cannot hold {}",
                item.pod_type()
            )));
        }
        children.push(encode_body(item, depth + 1)?);
    }

    let child_size = match children.first() {
        Some(first) => first.len(),
        None => child_type.fixed_body_size().unwrap_or(0),
    };
    if !children.is_empty() && child_size == 0 {
        return Err(PwError::Encoding(format!(
            "{what} children of {child_type} have zero size"
        )));
    }
    if let Some(odd) = children.iter().find(|c| c.len() != child_size) {
        return Err(PwError::Encoding(format!(
            "{what} children differ in size ({} vs {child_size})",
            odd.len()
        )));
    }

    let child_size = u32::try_from(child_size)
        .map_err(|_| PwError::Encoding(format!("{what} child of {child_size} bytes")))?;
    Ok((child_size, children))
}

fn encode_object(body: &mut BytesMut, object: &Object, depth: usize) -> Result<(), PwError> {
    body.put_u32_le(object.object_type);
    body.put_u32_le(object.object_id);
    for prop in &object.properties {
        body.put_u32_le(prop.key);
        body.put_u32_le(prop.flags.bits());
        write_at_depth(body, &prop.value, depth + 1)?;
    }
    Ok(())
}

fn encode_sequence(body: &mut BytesMut, seq: &Sequence, depth: usize) -> Result<(), PwError> {
    body.put_u32_le(seq.unit);
    body.put_u32_le(0);
    for control in &seq.controls {
        body.put_u32_le(control.offset);
        body.put_u32_le(control.control_type);
        write_at_depth(body, &control.value, depth + 1)?;
    }
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pod::{ChoiceKind, Fraction, Rectangle};

    #[test]
    fn int_42_is_header_plus_padded_word() {
        let bytes = encode(&Pod::Int(42)).unwrap();
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[0..4], &4u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &(PodType::Int as u32).to_le_bytes());
        assert_eq!(&bytes[8..12], &42i32.to_le_bytes());
        assert_eq!(&bytes[12..16], &[0, 0, 0, 0]);
    }

    #[test]
    fn string_is_nul_terminated_and_padded() {
        let bytes = encode(&Pod::from("hello")).unwrap();
        // 5 chars + NUL = 6 bytes, padded to 8
        assert_eq!(&bytes[0..4], &6u32.to_le_bytes());
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[8..14], b"hello\0");
    }

    #[test]
    fn none_has_empty_body() {
        let bytes = encode(&Pod::None).unwrap();
        assert_eq!(bytes, [0, 0, 0, 0, 1, 0, 0, 0]);
    }

    #[test]
    fn array_shares_one_child_header() {
        let arr = Pod::Array(Array::new(PodType::Int, vec![Pod::Int(1), Pod::Int(2), Pod::Int(3)]));
        let bytes = encode(&arr).unwrap();
        // body = child header (8) + 3 * 4
        assert_eq!(&bytes[0..4], &20u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &4u32.to_le_bytes());
        assert_eq!(&bytes[12..16], &(PodType::Int as u32).to_le_bytes());
        assert_eq!(bytes.len(), 8 + 24);
    }

    #[test]
    fn rejects_invalid_leaf_values() {
        assert!(matches!(
            encode(&Pod::Fraction(Fraction::new(30, 0))),
            Err(PwError::Encoding(_))
        ));
        assert!(matches!(
            encode(&Pod::Rectangle(Rectangle::new(0, 0, 0, 480))),
            Err(PwError::Encoding(_))
        ));
        assert!(matches!(
            encode(&Pod::from("a\0b")),
            Err(PwError::Encoding(_))
        ));
    }

    #[test]
    fn rejects_mixed_array() {
        let arr = Pod::Array(Array::new(PodType::Int, vec![Pod::Int(1), Pod::Long(2)]));
        assert!(matches!(encode(&arr), Err(PwError::Encoding(_))));
    }

    #[test]
    fn rejects_uneven_string_array() {
        let arr = Pod::Array(Array::new(
            PodType::String,
            vec![Pod::from("ab"), Pod::from("abc")],
        ));
        assert!(matches!(encode(&arr), Err(PwError::Encoding(_))));
    }

    #[test]
    fn rejects_zero_size_children() {
        let arr = Pod::Array(Array::new(PodType::None, vec![Pod::None]));
        assert!(matches!(encode(&arr), Err(PwError::Encoding(_))));
    }

    #[test]
    fn rejects_short_range_choice() {
        let choice = Pod::Choice(Choice::new(
            ChoiceKind::Range,
            PodType::Int,
            vec![Pod::Int(48000), Pod::Int(8000)],
        ));
        assert!(matches!(encode(&choice), Err(PwError::Encoding(_))));
    }

    fn nested_structs(levels: usize) -> Pod {
        (0..levels).fold(Pod::Int(1), |inner, _| Pod::Struct(vec![inner]))
    }

    #[test]
    fn nesting_limit_matches_decoder() {
        let deepest = nested_structs(MAX_DEPTH);
        let bytes = encode(&deepest).unwrap();
        assert_eq!(crate::pod::decode(&bytes).unwrap().0, deepest);

        assert!(matches!(
            encode(&nested_structs(MAX_DEPTH + 1)),
            Err(PwError::Encoding(_))
        ));
        assert!(matches!(
            encode(&nested_structs(MAX_DEPTH + 2)),
            Err(PwError::Encoding(_))
        ));
    }

    #[test]
    fn nested_errors_propagate() {
        let pod = Pod::Struct(vec![Pod::Int(1), Pod::Fraction(Fraction::new(1, 0))]);
        assert!(encode(&pod).is_err());
    }
}
