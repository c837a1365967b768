//! Version tokens and per-host cookie names.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use once_cell::sync::Lazy;
use rand::RngCore;

const TOKEN_KEY_CONTEXT: &str = "solidcoredata token key";
const TOKEN_KEY_BYTES: usize = 4;
const RANDOM_BYTES: usize = 6;

static VERSION_PREFIX: Lazy<String> = Lazy::new(random_part);

fn random_part() -> String {
    let mut buf = [0u8; RANDOM_BYTES];
    rand::thread_rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// Returns a fresh router run version.
///
/// The token is the per-process prefix, the current unix time in seconds
/// and a random suffix, so versions from different router processes and
/// different runs of one process never collide.
pub fn new_version() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    format!("{}{secs}{}", *VERSION_PREFIX, random_part())
}

/// Derives session cookie names from hostnames.
#[derive(Clone)]
pub struct TokenKeyer {
    key: [u8; 32],
}

impl Default for TokenKeyer {
    fn default() -> Self {
        Self::new(None)
    }
}

impl TokenKeyer {
    pub fn new(secret: Option<&str>) -> Self {
        let material = secret.unwrap_or_default();
        Self {
            key: blake3::derive_key(TOKEN_KEY_CONTEXT, material.as_bytes()),
        }
    }

    /// Cookie name for `host`. Ports are not part of the name.
    pub fn cookie_name(&self, host: &str) -> String {
        let hash = blake3::keyed_hash(&self.key, host.as_bytes());
        URL_SAFE_NO_PAD.encode(&hash.as_bytes()[..TOKEN_KEY_BYTES])
    }
}
