//! Ticket types exchanged with the broker.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Opaque broker ticket identifier.
///
/// The broker may hand out numeric or string ids. Either way the id is sent
/// back in the form it was received.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TicketId {
    raw: String,
    numeric: bool,
}

impl TicketId {
    /// Wrap a textual identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            raw: id.into(),
            numeric: false,
        }
    }

    /// The identifier as text.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl From<u64> for TicketId {
    fn from(id: u64) -> Self {
        Self {
            raw: id.to_string(),
            numeric: true,
        }
    }
}

impl From<&str> for TicketId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl Serialize for TicketId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.raw.parse::<u64>() {
            Ok(n) if self.numeric => serializer.serialize_u64(n),
            _ => serializer.serialize_str(&self.raw),
        }
    }
}

impl<'de> Deserialize<'de> for TicketId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Self::from(n),
            Raw::Text(s) => Self::new(s),
        })
    }
}

/// Opaque description of the resource a ticket resolved to.
///
/// Passed verbatim to the take and release hooks.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourcePayload(String);

impl ResourcePayload {
    /// Wrap a payload.
    pub fn new(data: impl Into<String>) -> Self {
        Self(data.into())
    }

    /// The payload as text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourcePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Snapshot of a ticket as returned by `collectTicket`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Collected {
    /// Whether a resource has been assigned.
    #[serde(default)]
    pub ready: bool,
    /// Resource payload, present once the ticket is ready.
    #[serde(default)]
    pub output: Option<String>,
}

impl Collected {
    /// A ticket with an assigned resource.
    pub fn ready(output: impl Into<String>) -> Self {
        Self {
            ready: true,
            output: Some(output.into()),
        }
    }

    /// A ticket still waiting for a resource.
    pub const fn pending() -> Self {
        Self {
            ready: false,
            output: None,
        }
    }

    /// The payload if the ticket is ready.
    ///
    /// A ready ticket without output yields an empty payload.
    pub fn payload(&self) -> Option<ResourcePayload> {
        self.ready
            .then(|| ResourcePayload::new(self.output.clone().unwrap_or_default()))
    }
}
