//! On-disk framing for spooled entries.
//!
//! ```text
//! +---------+----------------+---------------------------------+
//! | "SLR1"  | crc32 (u32 LE) | bincode(SpooledEntry)           |
//! +---------+----------------+---------------------------------+
//! ```
//!
//! The checksum covers the payload only. Any framing, checksum or decode
//! failure surfaces as a corruption error so the spool can set the record
//! aside instead of retrying it forever.

use std::time::SystemTime;

use serde::Serialize;
use sluice_common::Message;

use crate::{
    SerializationError, SpoolHandle,
    types::SpooledEntry,
};

const MAGIC: &[u8; 4] = b"SLR1";
const HEADER_LEN: usize = MAGIC.len() + size_of::<u32>();

/// Borrowed mirror of [`SpooledEntry`]; serializes identically so a message
/// can be spooled without cloning it.
#[derive(Serialize)]
struct EntryRef<'a> {
    handle: &'a SpoolHandle,
    enqueued_at: &'a SystemTime,
    message: &'a Message,
}

fn frame(payload: &[u8]) -> Vec<u8> {
    let mut record = Vec::with_capacity(HEADER_LEN + payload.len());
    record.extend_from_slice(MAGIC);
    record.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    record.extend_from_slice(payload);
    record
}

/// Encode a new entry for `message`.
///
/// # Errors
/// If bincode fails to encode the entry
pub fn encode(
    handle: &SpoolHandle,
    enqueued_at: &SystemTime,
    message: &Message,
) -> Result<Vec<u8>, SerializationError> {
    let payload = bincode::serde::encode_to_vec(
        EntryRef {
            handle,
            enqueued_at,
            message,
        },
        bincode::config::standard(),
    )?;

    Ok(frame(&payload))
}

/// Encode an existing entry.
///
/// # Errors
/// If bincode fails to encode the entry
pub fn encode_entry(entry: &SpooledEntry) -> Result<Vec<u8>, SerializationError> {
    encode(&entry.handle, &entry.enqueued_at, &entry.message)
}

/// Decode and verify a framed record.
///
/// # Errors
/// [`SerializationError::Corrupted`] on bad framing or checksum, and
/// [`SerializationError::Decode`] when the payload is not a valid entry
pub fn decode(record: &[u8]) -> Result<SpooledEntry, SerializationError> {
    if record.len() < HEADER_LEN {
        return Err(SerializationError::Corrupted(format!(
            "record is {} bytes, shorter than the {HEADER_LEN} byte header",
            record.len()
        )));
    }

    let (header, payload) = record.split_at(HEADER_LEN);
    let (magic, checksum) = header.split_at(MAGIC.len());

    if magic != MAGIC {
        return Err(SerializationError::Corrupted("bad magic".to_string()));
    }

    let mut expected = [0u8; 4];
    expected.copy_from_slice(checksum);
    let expected = u32::from_le_bytes(expected);
    let actual = crc32fast::hash(payload);

    if expected != actual {
        return Err(SerializationError::Corrupted(format!(
            "checksum mismatch: stored {expected:#010x}, computed {actual:#010x}"
        )));
    }

    let (entry, read): (SpooledEntry, usize) =
        bincode::serde::decode_from_slice(payload, bincode::config::standard())?;

    if read != payload.len() {
        return Err(SerializationError::Corrupted(format!(
            "{} trailing bytes after entry",
            payload.len() - read
        )));
    }

    Ok(entry)
}
