use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Position of a message within one queue's sequence.
///
/// Sequences start at 1; `SequenceNumber::ZERO` means "before the first message".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SequenceNumber(pub u64);

impl SequenceNumber {
    pub const ZERO: SequenceNumber = SequenceNumber(0);

    #[inline]
    pub fn value(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn next(self) -> SequenceNumber {
        SequenceNumber(self.0 + 1)
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub id: u64,
    /// Stamped by the queue on enqueue.
    pub sequence: SequenceNumber,
    pub payload: Bytes,
    pub timestamp: u64,
    pub ttl_ms: u64,
    pub headers: BTreeMap<String, String>,
}

impl Message {
    /// Absolute expiry in milliseconds since epoch (0 = never expires).
    #[inline]
    pub fn expire_at(&self) -> u64 {
        if self.ttl_ms == 0 {
            0
        } else {
            self.timestamp + self.ttl_ms
        }
    }

    #[inline]
    pub fn is_expired(&self, now_ms: u64) -> bool {
        let expire_at = self.expire_at();
        expire_at != 0 && now_ms >= expire_at
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

pub fn new_message(payload: impl Into<Bytes>) -> Message {
    new_message_with_ttl(payload, 0)
}

pub fn new_message_with_ttl(payload: impl Into<Bytes>, ttl_ms: u64) -> Message {
    Message {
        id: generate_id(),
        sequence: SequenceNumber::ZERO,
        payload: payload.into(),
        timestamp: current_timestamp(),
        ttl_ms,
        headers: BTreeMap::new(),
    }
}

pub fn with_custom_message(
    id: u64,
    payload: impl Into<Bytes>,
    timestamp: u64,
    ttl_ms: u64,
) -> Message {
    Message {
        id,
        sequence: SequenceNumber::ZERO,
        payload: payload.into(),
        timestamp,
        ttl_ms,
        headers: BTreeMap::new(),
    }
}

pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Generates a monotonically increasing u64 ID (fast, lock-free).
static NEXT_ID: AtomicU64 = AtomicU64::new(1);
fn generate_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}
