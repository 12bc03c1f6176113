use rand::RngCore;
use std::fmt;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU32, Ordering};

/// Secret value that asks the issuer to generate one.
pub const DEFAULT_SECRET: &str = "default";

const COUNTER_MASK: u32 = 0x00FF_FFFF;

/// 12-byte identifier: seconds since epoch (4, big-endian), a per-process
/// random value (5), and a wrapping counter (3, big-endian).
///
/// Ids from one process are strictly increasing within a second; ids from
/// different processes differ in the random part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SecretId([u8; 12]);

impl SecretId {
    pub fn generate() -> Self {
        let secs = chrono::Utc::now().timestamp() as u32;
        Self::from_parts(secs, *process_unique(), next_count())
    }

    fn from_parts(secs: u32, unique: [u8; 5], count: u32) -> Self {
        let mut bytes = [0u8; 12];
        bytes[..4].copy_from_slice(&secs.to_be_bytes());
        bytes[4..9].copy_from_slice(&unique);
        bytes[9..].copy_from_slice(&(count & COUNTER_MASK).to_be_bytes()[1..]);
        Self(bytes)
    }

    pub fn timestamp_secs(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }
}

impl fmt::Display for SecretId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

fn process_unique() -> &'static [u8; 5] {
    static UNIQUE: OnceLock<[u8; 5]> = OnceLock::new();
    UNIQUE.get_or_init(|| {
        let mut bytes = [0u8; 5];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes
    })
}

fn next_count() -> u32 {
    static COUNTER: OnceLock<AtomicU32> = OnceLock::new();
    COUNTER
        .get_or_init(|| AtomicU32::new(rand::thread_rng().next_u32() & COUNTER_MASK))
        .fetch_add(1, Ordering::Relaxed)
}
