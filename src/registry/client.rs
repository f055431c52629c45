//! Client entries and identifier generation.

use std::fmt;
use std::net::IpAddr;

use rand::RngCore;
use serde::Serialize;

use crate::registry::stream::ClientStream;

/// Width of a generated identifier, in random bytes (hex doubles it).
pub const ID_BYTES: usize = 16;

/// Opaque identifier of an open client stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Hex-encode raw bytes into an identifier.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ClientId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Source of random bytes for client identifiers.
pub trait IdSource: Send + Sync {
    fn fill(&self, buf: &mut [u8]);
}

/// Thread-local CSPRNG backed identifier source.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIds;

impl IdSource for RandomIds {
    fn fill(&self, buf: &mut [u8]) {
        rand::thread_rng().fill_bytes(buf);
    }
}

/// A registered client.
#[derive(Debug)]
pub(crate) struct Client {
    pub(crate) stream: ClientStream,
    pub(crate) source: IpAddr,
}
