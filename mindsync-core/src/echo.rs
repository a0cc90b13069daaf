/// Flush echo suppression using SHA-256 fingerprints.
///
/// Before a flush hands a tree to a sink, the serialized tree is fingerprinted
/// and registered. If the engine answers the write with a document-change that
/// carries exactly that tree (normalization on save), the change is consumed as
/// an echo and does not dirty any destination.
/// TTL (10s) is cleanup only; fingerprints are consumed on match regardless.
use std::time::Duration;

const FINGERPRINT_TTL: Duration = Duration::from_secs(10);

/// SHA-256 fingerprint of serialized content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentFingerprint(pub String);

impl ContentFingerprint {
    /// Compute SHA-256 fingerprint of content with normalized line endings.
    pub fn from_content(content: &str) -> Self {
        use sha2::{Digest, Sha256};
        let normalized = content.replace("\r\n", "\n");
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }
}

struct PendingFingerprint {
    fingerprint: ContentFingerprint,
    registered_at: u64,
}

/// Tracks fingerprints of content written by our own flushes.
#[derive(Default)]
pub struct EchoTracker {
    /// Several flushes may be outstanding before the engine echoes
    pending: Vec<PendingFingerprint>,
}

impl EchoTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register content about to be written (timestamps on the caller's ms timeline).
    pub fn register(&mut self, content: &str, now: u64) {
        let fingerprint = ContentFingerprint::from_content(content);
        if self.pending.iter().any(|p| p.fingerprint == fingerprint) {
            return;
        }
        self.pending.push(PendingFingerprint {
            fingerprint,
            registered_at: now,
        });
    }

    /// Consume a matching fingerprint. Returns true if `content` is our own echo.
    pub fn check_and_consume(&mut self, content: &str) -> bool {
        let fingerprint = ContentFingerprint::from_content(content);
        if let Some(pos) = self.pending.iter().position(|p| p.fingerprint == fingerprint) {
            self.pending.remove(pos);
            true
        } else {
            false
        }
    }

    /// Remove fingerprints older than the TTL.
    pub fn cleanup_expired(&mut self, now: u64) {
        let ttl = FINGERPRINT_TTL.as_millis() as u64;
        self.pending
            .retain(|p| now.saturating_sub(p.registered_at) < ttl);
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
