//! Rotating provider API keys.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use secrecy::{ExposeSecret, SecretString};

/// An ordered, non-empty list of API keys with a shared rotation cursor.
///
/// The cursor is shared by every fetch in the process, so once one request
/// rotates away from an exhausted key, later requests start on the new one.
pub struct CredentialSet {
    keys: Vec<SecretString>,
    cursor: AtomicUsize,
}

impl CredentialSet {
    pub fn new(keys: Vec<String>) -> anyhow::Result<Self> {
        let keys: Vec<SecretString> = keys
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .map(SecretString::new)
            .collect();
        anyhow::ensure!(!keys.is_empty(), "At least one provider API key is required");
        Ok(Self {
            keys,
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Index of the credential new requests start with.
    pub fn current_index(&self) -> usize {
        self.cursor.load(Ordering::Relaxed) % self.keys.len()
    }

    /// Move to the credential after `index` (round-robin) and make it current.
    pub fn advance_from(&self, index: usize) -> usize {
        let next = (index + 1) % self.keys.len();
        self.cursor.store(next, Ordering::Relaxed);
        next
    }

    pub(crate) fn key(&self, index: usize) -> &str {
        self.keys[index % self.keys.len()].expose_secret()
    }
}

impl fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSet")
            .field("keys", &self.keys.len())
            .field("cursor", &self.current_index())
            .finish()
    }
}
