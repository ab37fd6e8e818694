//! Handshake payloads.
//!
//! ## Hello request (core method 0)
//!
//! ```text
//! Struct {
//!     Int     major
//!     Int     minor
//!     String  client_name
//! }
//! ```
//!
//! ## Hello reply (core event `info`)
//!
//! ```text
//! Object (type HELLO_INFO_TYPE) {
//!     VERSION       => Struct { Int major, Int minor }
//!     CAPABILITIES  => Struct { String... }
//! }
//! ```

use super::{ProtocolVersion, int_field, str_field, struct_payload};
use crate::error::PwError;
use crate::pod::{ObjectBuilder, Pod, StructBuilder};

/// Object type of the hello reply.
pub const HELLO_INFO_TYPE: u32 = 0x0004_0001;

/// Property key holding the server protocol version.
pub const KEY_VERSION: u32 = 1;

/// Property key holding the server capability names.
pub const KEY_CAPABILITIES: u32 = 2;

// ── HelloRequest ─────────────────────────────────────────────────

/// What the client announces when the socket comes up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloRequest {
    pub version: ProtocolVersion,
    pub client_name: String,
}

impl HelloRequest {
    pub fn new(version: ProtocolVersion, client_name: impl Into<String>) -> Self {
        Self {
            version,
            client_name: client_name.into(),
        }
    }

    /// Fails with [`PwError::Encoding`] when a version part does not fit
    /// the signed wire int.
    pub fn to_pod(&self) -> Result<Pod, PwError> {
        Ok(StructBuilder::new()
            .push(version_int(self.version.major)?)
            .push(version_int(self.version.minor)?)
            .push(self.client_name.as_str())
            .build())
    }

    /// Parse a hello request (server side).
    pub fn from_pod(pod: Option<&Pod>) -> Result<Self, PwError> {
        let fields = struct_payload(pod, "hello")?;
        let major = int_field(fields, 0, "hello")?;
        let minor = int_field(fields, 1, "hello")?;
        let client_name = str_field(fields, 2, "hello")?;
        Ok(Self {
            version: parse_version(major, minor)?,
            client_name: client_name.to_string(),
        })
    }
}

// ── HelloInfo ────────────────────────────────────────────────────

/// The server's answer to hello: its version and what it supports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloInfo {
    pub version: ProtocolVersion,
    pub capabilities: Vec<String>,
}

impl HelloInfo {
    pub fn new(version: ProtocolVersion, capabilities: Vec<String>) -> Self {
        Self {
            version,
            capabilities,
        }
    }

    pub fn to_pod(&self) -> Result<Pod, PwError> {
        let version = StructBuilder::new()
            .push(version_int(self.version.major)?)
            .push(version_int(self.version.minor)?)
            .build();
        let capabilities = self
            .capabilities
            .iter()
            .fold(StructBuilder::new(), |b, cap| b.push(cap.as_str()))
            .build();
        let object = ObjectBuilder::new(HELLO_INFO_TYPE, 0)
            .property(KEY_VERSION, version)
            .property(KEY_CAPABILITIES, capabilities)
            .build()?;
        Ok(Pod::Object(object))
    }

    /// Parse the hello reply.
    ///
    /// A missing `CAPABILITIES` property means an empty set; a missing
    /// or malformed `VERSION` is an error.
    pub fn from_pod(pod: Option<&Pod>) -> Result<Self, PwError> {
        let object = pod
            .and_then(Pod::as_object)
            .ok_or_else(|| PwError::Decoding("hello info: payload is not an Object".into()))?;
        if object.object_type != HELLO_INFO_TYPE {
            return Err(PwError::Decoding(format!(
                "hello info: unexpected object type {:#x}",
                object.object_type
            )));
        }

        let version = struct_payload(object.property(KEY_VERSION), "hello info version")?;
        let major = int_field(version, 0, "hello info version")?;
        let minor = int_field(version, 1, "hello info version")?;

        let capabilities: Vec<String> = match object.property(KEY_CAPABILITIES) {
            None => Vec::new(),
            Some(caps) => {
                let fields = struct_payload(Some(caps), "hello info capabilities")?;
                (0..fields.len())
                    .map(|i| str_field(fields, i, "hello info capabilities").map(str::to_string))
                    .collect::<Result<_, _>>()?
            }
        };

        Ok(Self {
            version: parse_version(major, minor)?,
            capabilities,
        })
    }
}

fn version_int(v: u32) -> Result<i32, PwError> {
    i32::try_from(v)
        .map_err(|_| PwError::Encoding(format!("protocol version part {v} exceeds i32::MAX")))
}

fn parse_version(major: i32, minor: i32) -> Result<ProtocolVersion, PwError> {
    match (u32::try_from(major), u32::try_from(minor)) {
        (Ok(major), Ok(minor)) => Ok(ProtocolVersion::new(major, minor)),
        _ => Err(PwError::Decoding(format!(
            "negative protocol version {major}.{minor}"
        ))),
    }
}

// ── Tests ────────────────────────────────────────────────────────
