use std::{fmt, str::FromStr, time::SystemTime};

use serde::{Deserialize, Serialize};
use sluice_common::Message;
use ulid::Ulid;

/// Width of the zero-padded ordinal in record filenames, so that a plain
/// lexicographic sort is also an ordinal sort.
const ORDINAL_WIDTH: usize = 20;

/// Extension for committed spool records.
pub(crate) const RECORD_EXTENSION: &str = ".rec";

/// Identifies one spooled record and fixes its place in drain order.
///
/// The ordinal is assigned on enqueue and strictly increases; the ULID keeps
/// the record name unique even if an ordinal is ever reused after the spool
/// has been emptied and reopened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpoolHandle {
    ordinal: u64,
    id: Ulid,
}

impl SpoolHandle {
    #[must_use]
    pub const fn new(ordinal: u64, id: Ulid) -> Self {
        Self { ordinal, id }
    }

    #[must_use]
    pub const fn ordinal(&self) -> u64 {
        self.ordinal
    }

    #[must_use]
    pub const fn id(&self) -> Ulid {
        self.id
    }

    /// Filename for this record, e.g. `00000000000000000001-01ARZ3NDEKTSV4RRFFQ69G5FAV.rec`
    #[must_use]
    pub fn filename(&self) -> String {
        format!(
            "{:0width$}-{}{RECORD_EXTENSION}",
            self.ordinal,
            self.id,
            width = ORDINAL_WIDTH
        )
    }

    /// Parse a handle back out of a record filename.
    ///
    /// # Security
    /// Rejects path separators, `..`, and anything that isn't exactly a
    /// padded ordinal plus a valid ULID, so a crafted filename cannot be
    /// turned into a path outside the spool.
    pub fn from_filename(filename: &str) -> Option<Self> {
        if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
            return None;
        }

        let stem = filename.strip_suffix(RECORD_EXTENSION)?;
        let (ordinal, id) = stem.split_once('-')?;

        if ordinal.len() != ORDINAL_WIDTH || !ordinal.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        Some(Self {
            ordinal: ordinal.parse().ok()?,
            id: Ulid::from_string(id).ok()?,
        })
    }
}

impl fmt::Display for SpoolHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ordinal, self.id)
    }
}

impl FromStr for SpoolHandle {
    type Err = String;

    /// Parses the `Display` form, `{ordinal}-{ulid}`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ordinal, id) = s
            .split_once('-')
            .ok_or_else(|| format!("expected ORDINAL-ULID, got '{s}'"))?;

        Ok(Self {
            ordinal: ordinal
                .parse()
                .map_err(|e| format!("invalid ordinal '{ordinal}': {e}"))?,
            id: Ulid::from_string(id).map_err(|e| format!("invalid id '{id}': {e}"))?,
        })
    }
}

/// A message as it sits in the spool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpooledEntry {
    pub handle: SpoolHandle,
    pub enqueued_at: SystemTime,
    pub message: Message,
}

impl SpooledEntry {
    #[must_use]
    pub const fn ordinal(&self) -> u64 {
        self.handle.ordinal()
    }
}
