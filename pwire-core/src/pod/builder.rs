//! Builders for container PODs.
//!
//! Builders collect values in call order and validate the composition
//! once, in `build()`, so a request payload is either fully valid or
//! rejected with [`PwError::Encoding`] before anything is written.

use super::{Array, Object, Pod, PodType, Property, PropertyFlags};
use crate::error::PwError;

// ── StructBuilder ────────────────────────────────────────────────

/// Builds a [`Pod::Struct`] field by field.
#[derive(Debug, Default)]
pub struct StructBuilder {
    fields: Vec<Pod>,
}

impl StructBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field.
    pub fn push(mut self, value: impl Into<Pod>) -> Self {
        self.fields.push(value.into());
        self
    }

    pub fn build(self) -> Pod {
        Pod::Struct(self.fields)
    }
}

// ── ObjectBuilder ────────────────────────────────────────────────

/// Builds a [`Pod::Object`] from alternating `key` / `value` calls.
///
/// ```
/// use pwire_core::pod::{ObjectBuilder, Pod};
///
/// let obj = ObjectBuilder::new(2, 0)
///     .key(1)
///     .value(Pod::Int(48000))
///     .property(2, Pod::from("S16LE"))
///     .build()
///     .unwrap();
/// assert_eq!(obj.property(1), Some(&Pod::Int(48000)));
/// ```
#[derive(Debug)]
pub struct ObjectBuilder {
    object: Object,
    pending_key: Option<(u32, PropertyFlags)>,
    error: Option<String>,
}

impl ObjectBuilder {
    pub fn new(object_type: u32, object_id: u32) -> Self {
        Self {
            object: Object::new(object_type, object_id),
            pending_key: None,
            error: None,
        }
    }

    /// Start a property. Must be followed by exactly one [`value`](Self::value).
    pub fn key(self, key: u32) -> Self {
        self.key_with_flags(key, PropertyFlags::empty())
    }

    pub fn key_with_flags(mut self, key: u32, flags: PropertyFlags) -> Self {
        if let Some((previous, _)) = self.pending_key.replace((key, flags)) {
            self.fail(format!("key {previous} has no value"));
        }
        self
    }

    /// Finish the property started by the last [`key`](Self::key).
    pub fn value(mut self, value: impl Into<Pod>) -> Self {
        match self.pending_key.take() {
            Some((key, _)) if self.object.property(key).is_some() => {
                self.fail(format!("key {key} appears twice"));
            }
            Some((key, flags)) => self.object.properties.push(Property {
                key,
                flags,
                value: value.into(),
            }),
            None => self.fail("value without a key".to_string()),
        }
        self
    }

    /// Shorthand for `key(key).value(value)`.
    pub fn property(self, key: u32, value: impl Into<Pod>) -> Self {
        self.key(key).value(value)
    }

    /// Validate key/value pairing and key uniqueness, then return the object.
    pub fn build(mut self) -> Result<Object, PwError> {
        if let Some((key, _)) = self.pending_key.take() {
            self.fail(format!("key {key} has no value"));
        }
        match self.error {
            Some(msg) => Err(PwError::Encoding(format!(
                "invalid object properties: {msg}"
            ))),
            None => Ok(self.object),
        }
    }

    fn fail(&mut self, msg: String) {
        // keep the first problem, it explains the rest
        self.error.get_or_insert(msg);
    }
}

// ── ArrayBuilder ─────────────────────────────────────────────────

/// Builds a homogeneous [`Pod::Array`].
#[derive(Debug)]
pub struct ArrayBuilder {
    child_type: PodType,
    items: Vec<Pod>,
}

impl ArrayBuilder {
    pub fn new(child_type: PodType) -> Self {
        Self {
            child_type,
            items: Vec::new(),
        }
    }

    pub fn push(mut self, value: impl Into<Pod>) -> Self {
        self.items.push(value.into());
        self
    }

    /// Check every item against the recorded child type.
    pub fn build(self) -> Result<Pod, PwError> {
        if let Some(bad) = self.items.iter().find(|p| p.pod_type() != self.child_type) {
            return Err(PwError::Encoding(format!(
                "array of {} cannot hold {}",
                self.child_type,
                bad.pod_type()
            )));
        }
        Ok(Pod::Array(Array::new(self.child_type, self.items)))
    }
}
