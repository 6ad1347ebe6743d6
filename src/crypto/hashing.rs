//! Sector addressing using BLAKE3
//!
//! Hosts store and serve pieces by their sector root. The root doubles as an
//! integrity check: a downloaded piece whose root does not match its
//! placement record is discarded.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Root hash of a sector (one encoded, encrypted piece), 32 bytes of BLAKE3
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SectorRoot([u8; 32]);

impl SectorRoot {
    /// Hash piece data and return its sector root
    pub fn hash(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Raw root bytes, as addressed on hosts
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Whether piece data hashes back to this root
    pub fn verify(&self, data: &[u8]) -> bool {
        Self::hash(data) == *self
    }

    /// Base58 rendering used in logs and error messages
    pub fn to_base58(&self) -> String {
        bs58::encode(&self.0).into_string()
    }
}

impl fmt::Display for SectorRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl fmt::Debug for SectorRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SectorRoot({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_identifies_piece() {
        let data = b"piece data for a remote host";
        let root = SectorRoot::hash(data);

        assert!(root.verify(data));
        assert!(!root.verify(b"different data"));
        assert_eq!(root, SectorRoot::hash(data));
        assert_ne!(root, SectorRoot::hash(b"different data"));
    }

    #[test]
    fn test_display_renders_base58() {
        let root = SectorRoot::hash(b"piece");

        assert_eq!(root.to_string(), root.to_base58());
        assert!(format!("{:?}", root).contains(&root.to_base58()));

        let decoded = bs58::decode(root.to_base58()).into_vec().unwrap();
        assert_eq!(decoded, root.as_bytes().to_vec());
    }
}
