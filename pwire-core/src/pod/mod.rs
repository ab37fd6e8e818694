//! POD: the self-describing tag-length-value format carried by every
//! request and event payload.
//!
//! ## Wire format
//!
//! ```text
//! size:     u32  (4)   payload length, before padding
//! type:     u32  (4)   PodType tag
//! payload:  [u8]       `size` bytes, zero-padded to a multiple of 8
//! ```
//!
//! Every encoded record is therefore a multiple of 8 bytes long, and
//! nested records (struct fields, object property values, sequence
//! controls) keep their own padding. Array and choice children are
//! stored as raw bodies behind a single shared child header.
//!
//! Decoding is strict: an unknown type tag, a short read, or missing
//! padding is an error. Skipping would desynchronize every frame that
//! follows on the same stream.

mod builder;
mod decode;
mod encode;

use std::fmt;

use bitflags::bitflags;

use crate::error::PwError;

pub use builder::{ArrayBuilder, ObjectBuilder, StructBuilder};
pub use decode::{MAX_DEPTH, decode};
pub use encode::encode;

/// Size of the `size` + `type` record header.
pub const POD_HEADER_SIZE: usize = 8;

/// Round `size` up to the 8-byte POD alignment.
pub(crate) fn padded_len(size: usize) -> usize {
    size.div_ceil(8) * 8
}

// ── PodType ──────────────────────────────────────────────────────

/// Type tags, numbered as on the wire.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PodType {
    None = 1,
    Bool = 2,
    Id = 3,
    Int = 4,
    Long = 5,
    Float = 6,
    Double = 7,
    String = 8,
    Bytes = 9,
    Rectangle = 10,
    Fraction = 11,
    Bitmap = 12,
    Array = 13,
    Struct = 14,
    Object = 15,
    Sequence = 16,
    Pointer = 17,
    Fd = 18,
    Choice = 19,
}

impl PodType {
    /// Body size for fixed-width types, `None` for variable-width ones.
    pub fn fixed_body_size(self) -> Option<usize> {
        match self {
            PodType::None => Some(0),
            PodType::Bool | PodType::Id | PodType::Int | PodType::Float => Some(4),
            PodType::Long | PodType::Double | PodType::Fd | PodType::Fraction => Some(8),
            PodType::Rectangle | PodType::Pointer => Some(16),
            _ => None,
        }
    }
}

impl TryFrom<u32> for PodType {
    type Error = PwError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => PodType::None,
            2 => PodType::Bool,
            3 => PodType::Id,
            4 => PodType::Int,
            5 => PodType::Long,
            6 => PodType::Float,
            7 => PodType::Double,
            8 => PodType::String,
            9 => PodType::Bytes,
            10 => PodType::Rectangle,
            11 => PodType::Fraction,
            12 => PodType::Bitmap,
            13 => PodType::Array,
            14 => PodType::Struct,
            15 => PodType::Object,
            16 => PodType::Sequence,
            17 => PodType::Pointer,
            18 => PodType::Fd,
            19 => PodType::Choice,
            other => {
                return Err(PwError::Decoding(format!("unknown pod type tag {other}")));
            }
        })
    }
}

impl fmt::Display for PodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ── Leaf value types ─────────────────────────────────────────────

/// An area with an origin. Width and height must be non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rectangle {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rectangle {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.width != 0 && self.height != 0
    }
}

/// A rational number such as a frame rate. The denominator must be non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fraction {
    pub num: u32,
    pub denom: u32,
}

impl Fraction {
    pub fn new(num: u32, denom: u32) -> Self {
        Self { num, denom }
    }

    pub fn is_valid(&self) -> bool {
        self.denom != 0
    }
}

/// An opaque typed pointer value. Only meaningful within one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pointer {
    pub pointer_type: u32,
    pub address: u64,
}

// ── Containers ───────────────────────────────────────────────────

/// A homogeneous list. `child_type` is recorded even when empty.
#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    pub child_type: PodType,
    pub items: Vec<Pod>,
}

impl Array {
    pub fn new(child_type: PodType, items: Vec<Pod>) -> Self {
        Self { child_type, items }
    }
}

/// How the alternatives of a [`Choice`] are to be interpreted.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChoiceKind {
    /// Exactly one value.
    None = 0,
    /// default, min, max.
    Range = 1,
    /// default, min, max, step.
    Step = 2,
    /// default followed by the allowed values.
    Enum = 3,
    /// default followed by flag masks.
    Flags = 4,
}

impl ChoiceKind {
    /// Number of alternatives this kind requires, if fixed.
    fn required_len(self) -> Option<usize> {
        match self {
            ChoiceKind::None => Some(1),
            ChoiceKind::Range => Some(3),
            ChoiceKind::Step => Some(4),
            ChoiceKind::Enum | ChoiceKind::Flags => None,
        }
    }

    /// Check an alternative count against this kind.
    pub(crate) fn check_len(self, len: usize) -> Result<(), String> {
        match self.required_len() {
            Some(n) if n != len => Err(format!("{self:?} choice needs {n} values, got {len}")),
            None if len == 0 => Err(format!("{self:?} choice needs at least one value")),
            _ => Ok(()),
        }
    }
}

impl TryFrom<u32> for ChoiceKind {
    type Error = PwError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ChoiceKind::None),
            1 => Ok(ChoiceKind::Range),
            2 => Ok(ChoiceKind::Step),
            3 => Ok(ChoiceKind::Enum),
            4 => Ok(ChoiceKind::Flags),
            other => Err(PwError::Decoding(format!("unknown choice kind {other}"))),
        }
    }
}

/// A runtime selection among alternatives of one child type, e.g. the
/// sample formats a port supports.
#[derive(Debug, Clone, PartialEq)]
pub struct Choice {
    pub kind: ChoiceKind,
    pub flags: u32,
    pub child_type: PodType,
    pub alternatives: Vec<Pod>,
}

impl Choice {
    pub fn new(kind: ChoiceKind, child_type: PodType, alternatives: Vec<Pod>) -> Self {
        Self {
            kind,
            flags: 0,
            child_type,
            alternatives,
        }
    }

    /// The default (first) alternative.
    pub fn default_value(&self) -> Option<&Pod> {
        self.alternatives.first()
    }
}

bitflags! {
    /// Per-property flags carried inside an [`Object`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PropertyFlags: u32 {
        const READONLY = 1 << 0;
        const HARDWARE = 1 << 1;
        const HINT_DICT = 1 << 2;
        const MANDATORY = 1 << 3;
        const DONT_FIXATE = 1 << 4;
    }
}

/// One keyed entry of an [`Object`].
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub key: u32,
    pub flags: PropertyFlags,
    pub value: Pod,
}

impl Property {
    pub fn new(key: u32, value: Pod) -> Self {
        Self {
            key,
            flags: PropertyFlags::empty(),
            value,
        }
    }
}

/// An ordered set of keyed properties tagged with an object type and id.
#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    pub object_type: u32,
    pub object_id: u32,
    pub properties: Vec<Property>,
}

impl Object {
    pub fn new(object_type: u32, object_id: u32) -> Self {
        Self {
            object_type,
            object_id,
            properties: Vec::new(),
        }
    }

    /// First property value stored under `key`.
    pub fn property(&self, key: u32) -> Option<&Pod> {
        self.properties
            .iter()
            .find(|p| p.key == key)
            .map(|p| &p.value)
    }
}

/// One timed entry of a [`Sequence`].
#[derive(Debug, Clone, PartialEq)]
pub struct Control {
    pub offset: u32,
    pub control_type: u32,
    pub value: Pod,
}

/// Timed control values, e.g. parameter automation.
#[derive(Debug, Clone, PartialEq)]
pub struct Sequence {
    pub unit: u32,
    pub controls: Vec<Control>,
}

// ── Pod ──────────────────────────────────────────────────────────

/// Any POD value.
#[derive(Debug, Clone, PartialEq)]
pub enum Pod {
    None,
    Bool(bool),
    Id(u32),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    Rectangle(Rectangle),
    Fraction(Fraction),
    Bitmap(Vec<u8>),
    Array(Array),
    Struct(Vec<Pod>),
    Object(Object),
    Choice(Choice),
    Pointer(Pointer),
    Fd(i64),
    Sequence(Sequence),
}

impl Pod {
    /// The wire tag for this value.
    pub fn pod_type(&self) -> PodType {
        match self {
            Pod::None => PodType::None,
            Pod::Bool(_) => PodType::Bool,
            Pod::Id(_) => PodType::Id,
            Pod::Int(_) => PodType::Int,
            Pod::Long(_) => PodType::Long,
            Pod::Float(_) => PodType::Float,
            Pod::Double(_) => PodType::Double,
            Pod::String(_) => PodType::String,
            Pod::Bytes(_) => PodType::Bytes,
            Pod::Rectangle(_) => PodType::Rectangle,
            Pod::Fraction(_) => PodType::Fraction,
            Pod::Bitmap(_) => PodType::Bitmap,
            Pod::Array(_) => PodType::Array,
            Pod::Struct(_) => PodType::Struct,
            Pod::Object(_) => PodType::Object,
            Pod::Choice(_) => PodType::Choice,
            Pod::Pointer(_) => PodType::Pointer,
            Pod::Fd(_) => PodType::Fd,
            Pod::Sequence(_) => PodType::Sequence,
        }
    }

    /// Encode this value into a fresh buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>, PwError> {
        encode(self)
    }

    /// Decode exactly one value occupying all of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PwError> {
        let (pod, used) = decode(bytes)?;
        if used != bytes.len() {
            return Err(PwError::Decoding(format!(
                "{} trailing bytes after pod",
                bytes.len() - used
            )));
        }
        Ok(pod)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Pod::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_id(&self) -> Option<u32> {
        match self {
            Pod::Id(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Pod::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Pod::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Pod::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&[Pod]> {
        match self {
            Pod::Struct(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Pod::Object(obj) => Some(obj),
            _ => None,
        }
    }
}

impl From<bool> for Pod {
    fn from(v: bool) -> Self {
        Pod::Bool(v)
    }
}

impl From<i32> for Pod {
    fn from(v: i32) -> Self {
        Pod::Int(v)
    }
}

impl From<i64> for Pod {
    fn from(v: i64) -> Self {
        Pod::Long(v)
    }
}

impl From<f32> for Pod {
    fn from(v: f32) -> Self {
        Pod::Float(v)
    }
}

impl From<f64> for Pod {
    fn from(v: f64) -> Self {
        Pod::Double(v)
    }
}

impl From<&str> for Pod {
    fn from(v: &str) -> Self {
        Pod::String(v.to_string())
    }
}

impl From<String> for Pod {
    fn from(v: String) -> Self {
        Pod::String(v)
    }
}

impl From<Rectangle> for Pod {
    fn from(v: Rectangle) -> Self {
        Pod::Rectangle(v)
    }
}

impl From<Fraction> for Pod {
    fn from(v: Fraction) -> Self {
        Pod::Fraction(v)
    }
}

impl From<Object> for Pod {
    fn from(v: Object) -> Self {
        Pod::Object(v)
    }
}

impl fmt::Display for Pod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pod::None => write!(f, "none"),
            Pod::Bool(v) => write!(f, "bool({v})"),
            Pod::Id(v) => write!(f, "id({v})"),
            Pod::Int(v) => write!(f, "int({v})"),
            Pod::Long(v) => write!(f, "long({v})"),
            Pod::Float(v) => write!(f, "float({v})"),
            Pod::Double(v) => write!(f, "double({v})"),
            Pod::String(v) => write!(f, "string({v:?})"),
            Pod::Bytes(v) => write!(f, "bytes({} bytes)", v.len()),
            Pod::Rectangle(r) => write!(f, "rect({},{} {}x{})", r.x, r.y, r.width, r.height),
            Pod::Fraction(fr) => write!(f, "fraction({}/{})", fr.num, fr.denom),
            Pod::Bitmap(v) => write!(f, "bitmap({} bytes)", v.len()),
            Pod::Array(a) => write!(f, "array<{}>({} items)", a.child_type, a.items.len()),
            Pod::Struct(fields) => {
                write!(f, "struct{{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{field}")?;
                }
                write!(f, "}}")
            }
            Pod::Object(o) => write!(
                f,
                "object(type={}, id={}, {} props)",
                o.object_type,
                o.object_id,
                o.properties.len()
            ),
            Pod::Choice(c) => write!(
                f,
                "choice<{:?} {}>({} values)",
                c.kind,
                c.child_type,
                c.alternatives.len()
            ),
            Pod::Pointer(p) => write!(f, "pointer(type={}, {:#x})", p.pointer_type, p.address),
            Pod::Fd(v) => write!(f, "fd({v})"),
            Pod::Sequence(s) => write!(f, "sequence(unit={}, {} controls)", s.unit, s.controls.len()),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
