//! Cryptography Module - Piece encryption for the Nimbus renter
//!
//! Provides Twofish-CTR piece encryption with per-piece derived keys and
//! BLAKE3 sector roots for content addressing and integrity verification.

pub mod encryption;
mod hashing;

pub use encryption::{MasterKey, PieceCipher};
pub use hashing::SectorRoot;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Secure random 32-byte array
pub fn random_32_bytes() -> [u8; 32] {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_bytes() {
        let bytes1 = random_32_bytes();
        let bytes2 = random_32_bytes();

        // Should be different (with overwhelming probability)
        assert_ne!(bytes1, bytes2);
    }
}
