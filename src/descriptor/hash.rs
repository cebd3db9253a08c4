//! Content hashing for descriptors.

use sha2::{Digest, Sha256};

/// Incremental SHA256 over a sequence of fields.
///
/// Every field is length-prefixed, so `("ab", "c")` and `("a", "bc")` hash
/// differently. Absent optional fields hash differently from empty strings.
pub struct ContentHasher {
    hasher: Sha256,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
        }
    }

    pub fn str(&mut self, value: &str) -> &mut Self {
        self.hasher.update((value.len() as u64).to_le_bytes());
        self.hasher.update(value.as_bytes());
        self
    }

    pub fn opt(&mut self, value: Option<&str>) -> &mut Self {
        match value {
            Some(v) => {
                self.hasher.update([1u8]);
                self.str(v)
            }
            None => {
                self.hasher.update([0u8]);
                self
            }
        }
    }

    pub fn flag(&mut self, value: bool) -> &mut Self {
        self.hasher.update([value as u8]);
        self
    }

    pub fn count(&mut self, value: usize) -> &mut Self {
        self.hasher.update((value as u64).to_le_bytes());
        self
    }

    /// 64-character lowercase hexadecimal digest.
    pub fn finish(self) -> String {
        format!("{:x}", self.hasher.finalize())
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}
