use std::{
    fmt,
    str::FromStr,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use aegis_common::SendCommand;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Identifier for a queued message
///
/// A ULID: lexicographically sortable by creation time and collision
/// resistant. It names the job's file on disk and is the key callers use to
/// look up delivery status, so it is rendered as the 26 character string
/// everywhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId {
    id: ulid::Ulid,
}

impl MessageId {
    /// Parse a message id from a queue file name such as `01ARYZ6S41.json`
    /// or, for leased and deferred jobs, `01ARYZ6S41@1718000000000.json`.
    ///
    /// Returns the id and the optional timestamp suffix.
    ///
    /// # Security
    /// Rejects path separators, `..` and anything that is not a ULID, so the
    /// result can be joined onto a queue directory safely.
    #[must_use]
    pub fn from_filename(filename: &str) -> Option<(Self, Option<u64>)> {
        if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
            return None;
        }

        let stem = filename.strip_suffix(".json")?;

        let (id, timestamp) = match stem.split_once('@') {
            Some((id, timestamp)) => (id, Some(timestamp.parse::<u64>().ok()?)),
            None => (stem, None),
        };

        let id = ulid::Ulid::from_string(id).ok()?;
        Some((Self { id }, timestamp))
    }

    /// Generate a new unique message id
    #[must_use]
    pub fn generate() -> Self {
        Self {
            id: ulid::Ulid::new(),
        }
    }

    #[must_use]
    pub const fn ulid(&self) -> ulid::Ulid {
        self.id
    }

    /// Milliseconds since the Unix epoch encoded in the id
    #[must_use]
    pub const fn timestamp_ms(&self) -> u64 {
        self.id.timestamp_ms()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl FromStr for MessageId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self {
            id: ulid::Ulid::from_string(s)?,
        })
    }
}

impl Serialize for MessageId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.id.to_string())
    }
}

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A send command together with its queue bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedJob {
    pub id: MessageId,
    pub command: SendCommand,
    pub enqueued_at: DateTime<Utc>,
    /// Number of times the job has been claimed, including the current claim
    #[serde(default)]
    pub attempts: u32,
    /// Ledger partition holding this job's most recent failure, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failed_on: Option<NaiveDate>,
}

impl QueuedJob {
    /// Wrap `command` in a fresh, never-claimed job
    #[must_use]
    pub fn new(command: SendCommand) -> Self {
        Self {
            id: MessageId::generate(),
            command,
            enqueued_at: Utc::now(),
            attempts: 0,
            last_failed_on: None,
        }
    }
}

/// Proof of a claim, required to acknowledge or release a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseToken {
    id: MessageId,
    expires_at_ms: u64,
}

impl LeaseToken {
    pub(crate) const fn new(id: MessageId, expires_at_ms: u64) -> Self {
        Self { id, expires_at_ms }
    }

    #[must_use]
    pub const fn id(&self) -> &MessageId {
        &self.id
    }

    #[must_use]
    pub const fn expires_at_ms(&self) -> u64 {
        self.expires_at_ms
    }

    #[must_use]
    pub fn expires_at(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.expires_at_ms)
    }
}

/// A claimed job
#[derive(Debug, Clone)]
pub struct Lease {
    job: QueuedJob,
    token: LeaseToken,
}

impl Lease {
    pub(crate) const fn new(job: QueuedJob, token: LeaseToken) -> Self {
        Self { job, token }
    }

    #[must_use]
    pub const fn job(&self) -> &QueuedJob {
        &self.job
    }

    #[must_use]
    pub const fn token(&self) -> &LeaseToken {
        &self.token
    }

    #[must_use]
    pub fn into_parts(self) -> (QueuedJob, LeaseToken) {
        (self.job, self.token)
    }
}

/// Milliseconds since the Unix epoch
pub(crate) fn to_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

pub(crate) fn now_millis() -> u64 {
    to_millis(SystemTime::now())
}
