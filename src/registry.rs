//! The registry store holds the pre-serialized configuration-phase payloads per protocol version.
//!
//! Clients only understand registry formats from their own or later protocol releases, so the
//! lookup picks the smallest entry whose version is strictly greater than the client's: the oldest
//! snapshot that is still forward-compatible with the client's parser.

use crate::error::Error;
use portal_packets::Protocol;
use std::collections::HashMap;
use std::path::PathBuf;

/// One pre-serialized registry payload, streamed verbatim during the configuration phase.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    /// The protocol version the payload was captured from.
    pub protocol: Protocol,
    /// The raw, already framed payload bytes.
    pub data: Vec<u8>,
}

/// An ordered set of registry payloads, immutable after startup.
#[derive(Debug, Default)]
pub struct RegistryStore {
    entries: Vec<RegistryEntry>,
}

impl RegistryStore {
    /// Reads every configured `(protocol version, blob path)` pair into memory once.
    pub fn load(sources: &HashMap<Protocol, PathBuf>) -> Result<Self, Error> {
        let mut entries = Vec::with_capacity(sources.len());
        for (protocol, path) in sources {
            let data = std::fs::read(path).map_err(|err| {
                Error::Config(format!(
                    "cannot read registry data for protocol {protocol} from {}: {err}",
                    path.display()
                ))
            })?;
            entries.push(RegistryEntry {
                protocol: *protocol,
                data,
            });
        }
        Ok(Self::from_entries(entries))
    }

    pub fn from_entries(mut entries: Vec<RegistryEntry>) -> Self {
        entries.sort_by_key(|entry| entry.protocol);
        Self { entries }
    }

    /// Returns the first entry whose version is strictly greater than the client's, if any.
    pub fn next(&self, protocol: Protocol) -> Option<&RegistryEntry> {
        let index = self
            .entries
            .partition_point(|entry| entry.protocol <= protocol);
        self.entries.get(index)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
