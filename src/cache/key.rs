//! Cache key derivation.

use std::fmt::{self, Write};

use md5::{Digest, Md5};

/// Lowercase hex MD5 of a request's literal target string.
///
/// The target is hashed exactly as it appeared on the request line, with no
/// normalization, so `http://a.example/x` and `http://A.example/x` are distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn for_target(target: &str) -> Self {
        let digest = Md5::digest(target.as_bytes());
        let hex = digest.iter().fold(String::with_capacity(32), |mut acc, b| {
            let _ = write!(acc, "{:02x}", b);
            acc
        });
        Self(hex)
    }

    /// The digest, also used as the cache file name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
