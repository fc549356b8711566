//! Handler-owned per-message data
//!
//! Handlers may keep opaque blobs in a message's [`SelfManagedSlots`]. The
//! slots themselves are never persisted; instead each handler that
//! implements [`SelfManagedData`] writes its own blob on save and rebuilds
//! its slots on restore.

use bytes::Bytes;
use ctx_codec::{CodecError, FormatHeader, RecordReader, RecordWriter, WireRecord};
use indexmap::IndexMap;

use crate::chain::{find_handler, flatten_handlers, ChainNode, HandlerKind};
use crate::error::HandlerError;

/// Key of a self-managed slot
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SlotKey {
    /// Owning handler kind
    pub owner: HandlerKind,
    /// Key chosen by the owner
    pub key: String,
}

/// Handler-owned blobs attached to one message
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelfManagedSlots {
    slots: IndexMap<SlotKey, Bytes>,
}

impl SelfManagedSlots {
    /// Create empty slots
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Blob stored by `owner` under `key`
    #[must_use]
    pub fn get(&self, owner: &HandlerKind, key: &str) -> Option<&Bytes> {
        self.slots.get(&SlotKey {
            owner: owner.clone(),
            key: key.to_string(),
        })
    }

    /// Store a blob, returning the previous one
    pub fn set(&mut self, owner: HandlerKind, key: impl Into<String>, value: Bytes) -> Option<Bytes> {
        self.slots.insert(
            SlotKey {
                owner,
                key: key.into(),
            },
            value,
        )
    }

    /// Remove a blob
    pub fn remove(&mut self, owner: &HandlerKind, key: &str) -> Option<Bytes> {
        self.slots.shift_remove(&SlotKey {
            owner: owner.clone(),
            key: key.to_string(),
        })
    }

    /// Number of slots
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no slot is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slots in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&SlotKey, &Bytes)> {
        self.slots.iter()
    }
}

/// Capability of handlers that keep per-message state
pub trait SelfManagedData: Send + Sync {
    /// Produce the blob to persist for `message_id`; `None` saves nothing
    ///
    /// # Errors
    /// Returns [`HandlerError::Failed`] if the state cannot be encoded
    fn serialize_self_managed(
        &self,
        message_id: &str,
        slots: &SelfManagedSlots,
    ) -> Result<Option<Bytes>, HandlerError>;

    /// Rebuild slots from a blob produced by
    /// [`serialize_self_managed`](Self::serialize_self_managed)
    ///
    /// # Errors
    /// Returns [`HandlerError::Failed`] if the blob is unusable
    fn deserialize_self_managed(
        &self,
        message_id: &str,
        data: &[u8],
        slots: &mut SelfManagedSlots,
    ) -> Result<(), HandlerError>;

    /// Re-derive state that was never persisted
    ///
    /// # Errors
    /// Returns [`HandlerError::Failed`] if the state cannot be rebuilt
    fn restore_transient(&self, _message_id: &str, _slots: &mut SelfManagedSlots) -> Result<(), HandlerError> {
        Ok(())
    }
}

/// Saved blob of one handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfManagedEntry {
    /// Owning handler kind
    pub kind: HandlerKind,
    /// Owning handler name
    pub name: String,
    /// Opaque data
    pub data: Bytes,
}

impl WireRecord for SelfManagedEntry {
    const HEADER: FormatHeader = FormatHeader::new(0x534d_0000_0000_0001, 1);

    fn encode_body(&self, writer: &mut RecordWriter) -> Result<(), CodecError> {
        writer.write_str(self.kind.as_str())?;
        writer.write_str(&self.name)?;
        writer.write_bytes(&self.data)
    }

    fn decode_body(reader: &mut RecordReader) -> Result<Self, CodecError> {
        Ok(Self {
            kind: HandlerKind::new(reader.read_str()?),
            name: reader.read_str()?,
            data: reader.read_bytes()?,
        })
    }
}

/// Ask every capable handler in `chain` for its blob
///
/// # Errors
/// Propagates the first handler failure
pub fn collect_self_managed(
    chain: &[ChainNode],
    message_id: &str,
    slots: &SelfManagedSlots,
) -> Result<Vec<SelfManagedEntry>, HandlerError> {
    let mut entries = Vec::new();
    for node in flatten_handlers(chain) {
        let ChainNode::Handler(handler) = node else {
            continue;
        };
        let Some(capability) = handler.self_managed() else {
            continue;
        };
        if let Some(data) = capability.serialize_self_managed(message_id, slots)? {
            entries.push(SelfManagedEntry {
                kind: handler.kind().clone(),
                name: handler.name().to_string(),
                data,
            });
        }
    }
    Ok(entries)
}

/// Hand each saved blob back to its handler in `chain`
///
/// Each owner deserializes its blob and then restores transient state.
///
/// # Errors
/// Returns [`HandlerError::Unattributed`] if an entry's handler is not in
/// the chain or no longer has the capability, or the handler's own failure
pub fn restore_self_managed(
    chain: &[ChainNode],
    message_id: &str,
    entries: &[SelfManagedEntry],
    slots: &mut SelfManagedSlots,
) -> Result<(), HandlerError> {
    for entry in entries {
        let handler = find_handler(chain, &entry.kind, &entry.name).ok_or_else(|| HandlerError::Unattributed {
            kind: entry.kind.clone(),
            name: entry.name.clone(),
        })?;
        let capability = handler.self_managed().ok_or_else(|| HandlerError::Unattributed {
            kind: entry.kind.clone(),
            name: entry.name.clone(),
        })?;
        capability.deserialize_self_managed(message_id, &entry.data, slots)?;
        capability.restore_transient(message_id, slots)?;
    }
    Ok(())
}
