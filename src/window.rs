//! Fixed-window arithmetic and counter key encoding.
//!
//! A window is identified by its index: the wall-clock epoch seconds
//! divided by the window duration, floored. All processes that agree on
//! the duration and share a clock derive the same index, which is what
//! lets independent limiter instances converge on one counter per
//! subject and window.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Compute the window index for a point in time.
///
/// Times before the epoch and zero durations degrade to index 0 rather
/// than panicking; the limiter validates durations before it gets here.
pub fn window_index(now: SystemTime, duration: Duration) -> u64 {
    let epoch_secs = now
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    epoch_secs / duration.as_secs().max(1)
}

/// Key identifying one subject's counter in one window.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowKey {
    /// The subject being limited.
    pub subject: String,
    /// The window index.
    pub index: u64,
}

impl WindowKey {
    /// Create a new window key.
    pub fn new(subject: &str, index: u64) -> Self {
        Self {
            subject: subject.to_string(),
            index,
        }
    }

    /// Encode to a store key string.
    /// Format: "{prefix}:{subject_len}:{subject}:{index}"
    /// The subject byte length keeps the encoding unambiguous when the
    /// subject itself contains the delimiter.
    pub fn encode(&self, prefix: &str) -> String {
        format!(
            "{}:{}:{}:{}",
            prefix,
            self.subject.len(),
            self.subject,
            self.index
        )
    }

    /// Parse from a store key string produced by [`encode`](Self::encode).
    pub fn decode(prefix: &str, key: &str) -> Option<Self> {
        let rest = key.strip_prefix(prefix)?.strip_prefix(':')?;

        // Subject byte length up to the next delimiter
        let len_sep = rest.find(':')?;
        let subject_len: usize = rest[..len_sep].parse().ok()?;

        // Exactly subject_len bytes of subject follow
        let after_len = &rest[len_sep + 1..];
        if after_len.len() < subject_len || !after_len.is_char_boundary(subject_len) {
            return None;
        }
        let subject = &after_len[..subject_len];

        let index: u64 = after_len[subject_len..].strip_prefix(':')?.parse().ok()?;

        Some(Self {
            subject: subject.to_string(),
            index,
        })
    }
}
