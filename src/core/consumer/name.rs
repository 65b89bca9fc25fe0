use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};

/// Broker-assigned consumer name. Unique for the lifetime of the process and
/// never sent to the remote peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerName(String);

static NEXT_CONSUMER: AtomicU64 = AtomicU64::new(1);

impl ConsumerName {
    /// Generates `"{prefix}-{n}"` with `n` drawn from a process-wide counter,
    /// so generated names are never reused.
    pub fn generate(prefix: &str) -> Self {
        let n = NEXT_CONSUMER.fetch_add(1, Ordering::Relaxed);
        ConsumerName(format!("{prefix}-{n}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConsumerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConsumerName {
    fn from(s: &str) -> Self {
        ConsumerName(s.to_owned())
    }
}

impl From<String> for ConsumerName {
    fn from(s: String) -> Self {
        ConsumerName(s)
    }
}

impl From<ConsumerName> for String {
    fn from(name: ConsumerName) -> Self {
        name.0
    }
}

impl AsRef<str> for ConsumerName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Deref for ConsumerName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
