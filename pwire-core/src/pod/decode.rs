//! POD decoding.
//!
//! Input is untrusted: every length is checked before it is used and
//! nesting is bounded by [`MAX_DEPTH`].

use super::{
    Array, Choice, ChoiceKind, Control, Fraction, Object, POD_HEADER_SIZE, Pod, PodType, Pointer,
    Property, PropertyFlags, Rectangle, Sequence, padded_len,
};
use crate::error::PwError;

/// Deepest container nesting accepted from the wire.
pub const MAX_DEPTH: usize = 64;

/// Decode one record from the front of `bytes`.
///
/// Returns the value and the number of bytes consumed, padding
/// included. Trailing bytes after the record are left untouched.
pub fn decode(bytes: &[u8]) -> Result<(Pod, usize), PwError> {
    decode_at_depth(bytes, 0)
}

fn decode_at_depth(bytes: &[u8], depth: usize) -> Result<(Pod, usize), PwError> {
    if depth > MAX_DEPTH {
        return Err(PwError::Decoding(format!("nesting deeper than {MAX_DEPTH}")));
    }
    if bytes.len() < POD_HEADER_SIZE {
        return Err(PwError::Decoding(format!(
            "need {POD_HEADER_SIZE} header bytes, have {}",
            bytes.len()
        )));
    }

    let size = read_u32(bytes, 0)? as usize;
    let ty = PodType::try_from(read_u32(bytes, 4)?)?;

    let available = bytes.len() - POD_HEADER_SIZE;
    if available < size {
        return Err(PwError::Decoding(format!(
            "{ty} declares {size} bytes, only {available} available"
        )));
    }
    let padded = padded_len(size);
    if available < padded {
        return Err(PwError::Decoding(format!(
            "{ty} of {size} bytes is missing {} bytes of padding",
            padded - available
        )));
    }

    let body = &bytes[POD_HEADER_SIZE..POD_HEADER_SIZE + size];
    let pod = decode_body(ty, body, depth)?;
    Ok((pod, POD_HEADER_SIZE + padded))
}

/// Decode a raw body of type `ty`.
fn decode_body(ty: PodType, body: &[u8], depth: usize) -> Result<Pod, PwError> {
    if depth > MAX_DEPTH {
        return Err(PwError::Decoding(format!("nesting deeper than {MAX_DEPTH}")));
    }
    if let Some(expected) = ty.fixed_body_size() {
        if body.len() != expected {
            return Err(PwError::Decoding(format!(
                "{ty} body must be {expected} bytes, got {}",
                body.len()
            )));
        }
    }

    let pod = match ty {
        PodType::None => Pod::None,
        PodType::Bool => Pod::Bool(read_u32(body, 0)? != 0),
        PodType::Id => Pod::Id(read_u32(body, 0)?),
        PodType::Int => Pod::Int(read_u32(body, 0)? as i32),
        PodType::Long => Pod::Long(read_u64(body, 0)? as i64),
        PodType::Float => Pod::Float(f32::from_bits(read_u32(body, 0)?)),
        PodType::Double => Pod::Double(f64::from_bits(read_u64(body, 0)?)),
        PodType::String => Pod::String(decode_string(body)?),
        PodType::Bytes => Pod::Bytes(body.to_vec()),
        PodType::Bitmap => Pod::Bitmap(body.to_vec()),
        PodType::Rectangle => {
            let rect = Rectangle {
                x: read_u32(body, 0)? as i32,
                y: read_u32(body, 4)? as i32,
                width: read_u32(body, 8)?,
                height: read_u32(body, 12)?,
            };
            if !rect.is_valid() {
                return Err(PwError::Decoding("rectangle with a zero dimension".into()));
            }
            Pod::Rectangle(rect)
        }
        PodType::Fraction => {
            let frac = Fraction {
                num: read_u32(body, 0)?,
                denom: read_u32(body, 4)?,
            };
            if !frac.is_valid() {
                return Err(PwError::Decoding("fraction with zero denominator".into()));
            }
            Pod::Fraction(frac)
        }
        PodType::Pointer => Pod::Pointer(Pointer {
            pointer_type: read_u32(body, 0)?,
            address: read_u64(body, 8)?,
        }),
        PodType::Fd => Pod::Fd(read_u64(body, 0)? as i64),
        PodType::Array => decode_array(body, depth)?,
        PodType::Struct => Pod::Struct(decode_fields(body, depth)?),
        PodType::Object => decode_object(body, depth)?,
        PodType::Choice => decode_choice(body, depth)?,
        PodType::Sequence => decode_sequence(body, depth)?,
    };
    Ok(pod)
}

fn decode_string(body: &[u8]) -> Result<String, PwError> {
    let Some((&last, text)) = body.split_last() else {
        return Err(PwError::Decoding("empty string body".into()));
    };
    if last != 0 {
        return Err(PwError::Decoding("string is not NUL-terminated".into()));
    }
    if text.contains(&0) {
        return Err(PwError::Decoding("string contains an interior NUL".into()));
    }
    String::from_utf8(text.to_vec())
        .map_err(|e| PwError::Decoding(format!("string is not utf-8: {e}")))
}

fn decode_array(body: &[u8], depth: usize) -> Result<Pod, PwError> {
    let child_size = read_u32(body, 0)? as usize;
    let child_type = PodType::try_from(read_u32(body, 4)?)?;
    let items = decode_children(child_type, child_size, &body[8..], depth)?;
    Ok(Pod::Array(Array { child_type, items }))
}

fn decode_choice(body: &[u8], depth: usize) -> Result<Pod, PwError> {
    let kind = ChoiceKind::try_from(read_u32(body, 0)?)?;
    let flags = read_u32(body, 4)?;
    let child_size = read_u32(body, 8)? as usize;
    let child_type = PodType::try_from(read_u32(body, 12)?)?;
    let alternatives = decode_children(child_type, child_size, &body[16..], depth)?;
    kind.check_len(alternatives.len()).map_err(PwError::Decoding)?;
    Ok(Pod::Choice(Choice {
        kind,
        flags,
        child_type,
        alternatives,
    }))
}

/// Split `data` into `child_size` bodies of `child_type`.
fn decode_children(
    child_type: PodType,
    child_size: usize,
    data: &[u8],
    depth: usize,
) -> Result<Vec<Pod>, PwError> {
    if child_size == 0 {
        if !data.is_empty() {
            return Err(PwError::Decoding(format!(
                "{} bytes of zero-sized {child_type} children",
                data.len()
            )));
        }
        return Ok(Vec::new());
    }
    if data.len() % child_size != 0 {
        return Err(PwError::Decoding(format!(
            "{} bytes is not a multiple of child size {child_size}",
            data.len()
        )));
    }
    data.chunks_exact(child_size)
        .map(|chunk| decode_body(child_type, chunk, depth + 1))
        .collect()
}

/// Decode back-to-back padded records filling all of `body`.
fn decode_fields(body: &[u8], depth: usize) -> Result<Vec<Pod>, PwError> {
    let mut fields = Vec::new();
    let mut offset = 0;
    while offset < body.len() {
        let (pod, used) = decode_at_depth(&body[offset..], depth + 1)?;
        fields.push(pod);
        offset += used;
    }
    Ok(fields)
}

fn decode_object(body: &[u8], depth: usize) -> Result<Pod, PwError> {
    let object_type = read_u32(body, 0)?;
    let object_id = read_u32(body, 4)?;
    let mut properties = Vec::new();
    let mut offset = 8;
    while offset < body.len() {
        let key = read_u32(body, offset)?;
        let flags = PropertyFlags::from_bits_retain(read_u32(body, offset + 4)?);
        let (value, used) = decode_at_depth(&body[offset + 8..], depth + 1)?;
        properties.push(Property { key, flags, value });
        offset += 8 + used;
    }
    Ok(Pod::Object(Object {
        object_type,
        object_id,
        properties,
    }))
}

fn decode_sequence(body: &[u8], depth: usize) -> Result<Pod, PwError> {
    let unit = read_u32(body, 0)?;
    // 4 bytes reserved
    read_u32(body, 4)?;
    let mut controls = Vec::new();
    let mut offset = 8;
    while offset < body.len() {
        let control_offset = read_u32(body, offset)?;
        let control_type = read_u32(body, offset + 4)?;
        let (value, used) = decode_at_depth(&body[offset + 8..], depth + 1)?;
        controls.push(Control {
            offset: control_offset,
            control_type,
            value,
        });
        offset += 8 + used;
    }
    Ok(Pod::Sequence(Sequence { unit, controls }))
}

// ── Primitive readers ────────────────────────────────────────────

fn read_u32(bytes: &[u8], at: usize) -> Result<u32, PwError> {
    bytes
        .get(at..at + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| PwError::Decoding(format!("truncated u32 at offset {at}")))
}

fn read_u64(bytes: &[u8], at: usize) -> Result<u64, PwError> {
    bytes
        .get(at..at + 8)
        .and_then(|b| b.try_into().ok())
        .map(u64::from_le_bytes)
        .ok_or_else(|| PwError::Decoding(format!("truncated u64 at offset {at}")))
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pod::encode;

    fn record(size: u32, ty: u32, body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&size.to_le_bytes());
        out.extend_from_slice(&ty.to_le_bytes());
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn decodes_int_and_reports_consumed() {
        let bytes = record(4, 4, &[42, 0, 0, 0, 0, 0, 0, 0]);
        let (pod, used) = decode(&bytes).unwrap();
        assert_eq!(pod, Pod::Int(42));
        assert_eq!(used, 16);
    }

    #[test]
    fn leaves_trailing_bytes() {
        let mut bytes = encode(&Pod::Long(-7)).unwrap();
        bytes.extend_from_slice(&encode(&Pod::Bool(true)).unwrap());
        let (first, used) = decode(&bytes).unwrap();
        assert_eq!(first, Pod::Long(-7));
        let (second, _) = decode(&bytes[used..]).unwrap();
        assert_eq!(second, Pod::Bool(true));
    }

    #[test]
    fn rejects_unknown_tag() {
        let bytes = record(0, 99, &[]);
        let err = decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("unknown pod type tag 99"));
    }

    #[test]
    fn rejects_short_body() {
        // Declares 8 bytes but only 4 follow.
        let bytes = record(8, 5, &[1, 2, 3, 4]);
        assert!(matches!(decode(&bytes), Err(PwError::Decoding(_))));
    }

    #[test]
    fn rejects_missing_padding() {
        // Int body present, but the 4 padding bytes are not.
        let bytes = record(4, 4, &[42, 0, 0, 0]);
        let err = decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("padding"));
    }

    #[test]
    fn rejects_short_header() {
        assert!(decode(&[1, 0, 0]).is_err());
    }

    #[test]
    fn rejects_wrong_fixed_size() {
        // Int with a declared 8-byte body.
        let bytes = record(8, 4, &[0; 8]);
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn rejects_unterminated_string() {
        let bytes = record(3, 8, &[b'a', b'b', b'c', 0, 0, 0, 0, 0]);
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn rejects_zero_denominator() {
        let mut body = Vec::new();
        body.extend_from_slice(&30u32.to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes());
        assert!(decode(&record(8, 11, &body)).is_err());
    }

    #[test]
    fn rejects_ragged_array() {
        // child_size 4 but 6 bytes of children.
        let mut body = Vec::new();
        body.extend_from_slice(&4u32.to_le_bytes());
        body.extend_from_slice(&(PodType::Int as u32).to_le_bytes());
        body.extend_from_slice(&[0; 6]);
        body.extend_from_slice(&[0; 2]); // padding to 16
        assert!(decode(&record(14, 13, &body)).is_err());
    }

    #[test]
    fn rejects_struct_field_overrun() {
        // Struct whose single field claims more bytes than the struct holds.
        let inner = record(16, 4, &[]);
        assert!(decode(&record(8, 14, &inner)).is_err());
    }

    #[test]
    fn rejects_excessive_nesting() {
        // Structs wrapped around an Int, built by hand since the encoder
        // refuses the same depth.
        let nested = |levels: usize| {
            (0..levels).fold(record(4, 4, &[1, 0, 0, 0, 0, 0, 0, 0]), |inner, _| {
                record(inner.len() as u32, 14, &inner)
            })
        };
        assert!(decode(&nested(MAX_DEPTH)).is_ok());
        let err = decode(&nested(MAX_DEPTH + 1)).unwrap_err();
        assert!(err.to_string().contains("nesting"));
    }

    #[test]
    fn empty_array_keeps_child_type() {
        let arr = Pod::Array(Array::new(PodType::String, Vec::new()));
        let (pod, _) = decode(&encode(&arr).unwrap()).unwrap();
        assert_eq!(pod, arr);
    }
}
