//! Sync, ping and error payloads of the core object.
//!
//! ```text
//! sync  (method)  Struct { Int id }
//! done  (event)   Struct { Int id }              seq = sync's seq
//! ping  (event)   Struct { Int id }
//! pong  (method)  Struct { Int id }              id echoed from ping
//! error (event)   Struct { Int code, String message }
//!                                                seq = failed request's seq
//! ```

use super::{int_field, str_field, struct_payload};
use crate::error::PwError;
use crate::pod::{Pod, StructBuilder};

/// Argument of `sync`, echoed back in `done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Done {
    pub id: i32,
}

impl Done {
    /// A sync argument naming the request `sequence`.
    ///
    /// The wire field is a signed int. Sequences above `i32::MAX` travel
    /// as the same 32 bits and come back intact through [`sequence`](Self::sequence).
    pub fn for_sequence(sequence: u32) -> Self {
        Self {
            id: i32::from_le_bytes(sequence.to_le_bytes()),
        }
    }

    /// The request sequence carried in `id`.
    pub fn sequence(self) -> u32 {
        u32::from_le_bytes(self.id.to_le_bytes())
    }

    pub fn to_pod(self) -> Pod {
        StructBuilder::new().push(self.id).build()
    }

    pub fn from_pod(pod: Option<&Pod>) -> Result<Self, PwError> {
        let fields = struct_payload(pod, "done")?;
        Ok(Self {
            id: int_field(fields, 0, "done")?,
        })
    }
}

/// A server liveness check; the same id goes back in `pong`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ping {
    pub id: i32,
}

impl Ping {
    pub fn to_pod(self) -> Pod {
        StructBuilder::new().push(self.id).build()
    }

    pub fn from_pod(pod: Option<&Pod>) -> Result<Self, PwError> {
        let fields = struct_payload(pod, "ping")?;
        Ok(Self {
            id: int_field(fields, 0, "ping")?,
        })
    }

    /// Payload of the matching `pong`.
    pub fn pong(self) -> Pod {
        self.to_pod()
    }
}

/// Error reported by the server for one of our requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    pub code: i32,
    pub message: String,
}

impl RemoteError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn to_pod(&self) -> Pod {
        StructBuilder::new()
            .push(self.code)
            .push(self.message.as_str())
            .build()
    }

    /// Parse an error event. A payload we cannot read still becomes an
    /// error, with a placeholder message.
    pub fn from_pod(pod: Option<&Pod>) -> Self {
        let parsed = struct_payload(pod, "error").and_then(|fields| {
            Ok(Self {
                code: int_field(fields, 0, "error")?,
                message: str_field(fields, 1, "error")?.to_string(),
            })
        });
        parsed.unwrap_or_else(|e| Self::new(-1, format!("unreadable error payload ({e})")))
    }

    /// The error handed to the request waiting on `sequence`.
    pub fn into_error(self, sequence: u32) -> PwError {
        PwError::Remote {
            sequence,
            code: self.code,
            message: self.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pong_echoes_ping_id() {
        let ping = Ping::from_pod(Some(&Ping { id: 77 }.to_pod())).unwrap();
        assert_eq!(ping.pong(), Pod::Struct(vec![Pod::Int(77)]));
    }

    #[test]
    fn done_parses() {
        assert_eq!(Done::from_pod(Some(&Done { id: 4 }.to_pod())).unwrap().id, 4);
        assert!(Done::from_pod(None).is_err());
    }

    #[test]
    fn done_keeps_sequences_past_i32_max() {
        for seq in [1, i32::MAX as u32, i32::MAX as u32 + 1, u32::MAX] {
            let done = Done::from_pod(Some(&Done::for_sequence(seq).to_pod())).unwrap();
            assert_eq!(done.sequence(), seq);
        }
        assert_eq!(Done::for_sequence(u32::MAX).id, -1);
    }

    #[test]
    fn remote_error_becomes_pw_error() {
        let pod = RemoteError::new(-2, "no such object").to_pod();
        let err = RemoteError::from_pod(Some(&pod)).into_error(12);
        match err {
            PwError::Remote {
                sequence,
                code,
                message,
            } => {
                assert_eq!(sequence, 12);
                assert_eq!(code, -2);
                assert_eq!(message, "no such object");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unreadable_remote_error_is_still_an_error() {
        let err = RemoteError::from_pod(Some(&Pod::Bool(true)));
        assert_eq!(err.code, -1);
        assert!(err.message.contains("unreadable"));
    }
}
