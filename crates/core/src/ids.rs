//! Opaque, prefixed ids for the data model. Each kind is a thin newtype so
//! a `TicketId` can never be confused with a `RunId` at a call site.

use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// A process-local nonce, distinct per run of the binary, so ids generated
/// across restarts within the same millisecond never collide. Grounded on
/// the teacher's `now_ms()` + monotonic counter combination in
/// `bm_runner`; we go one step further and hash rather than concatenate,
/// since the spec only promises opacity, not sortability.
fn process_nonce() -> u64 {
    static NONCE: AtomicU64 = AtomicU64::new(0);
    let existing = NONCE.load(Ordering::Relaxed);
    if existing != 0 {
        return existing;
    }
    let seed = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
        ^ (std::process::id() as u64).rotate_left(17);
    NONCE.store(seed.max(1), Ordering::Relaxed);
    seed.max(1)
}

/// Generate a random-looking, 16 hex-char suffix unique within this process.
fn next_suffix() -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut hasher = Sha256::new();
    hasher.update(process_nonce().to_le_bytes());
    hasher.update(n.to_le_bytes());
    let digest = hasher.finalize();
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}

macro_rules! opaque_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn generate() -> Self {
                Self(format!("{}_{}", $prefix, next_suffix()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

opaque_id!(ProjectId, "proj");
opaque_id!(TicketId, "tkt");
opaque_id!(RunId, "run");
opaque_id!(EventId, "evt");
