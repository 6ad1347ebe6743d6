//! Piece encryption using Twofish-CTR
//!
//! Every file carries a random master key. Each piece is encrypted under a
//! key and nonce derived from the master key and the piece's (chunk, piece)
//! coordinates, so the same piece always encrypts to the same ciphertext and
//! can be decrypted independently of its neighbors.

use super::CryptoError;
use ctr::cipher::{KeyIvInit, StreamCipher};
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;

type TwofishCtr = ctr::Ctr64BE<twofish::Twofish>;

const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 16;

/// Per-file master encryption key
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterKey([u8; KEY_SIZE]);

impl MasterKey {
    /// Create a master key from raw bytes
    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        Self(key)
    }

    /// Generate a random master key
    pub fn generate() -> Self {
        Self(super::random_32_bytes())
    }

    /// Create a master key from a byte slice
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKey(format!("expected {} bytes", KEY_SIZE)))?;
        Ok(Self(arr))
    }

    /// Get the raw key bytes (be careful with this!)
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Derive the cipher for one piece of one chunk
    pub fn piece_cipher(&self, chunk_index: u64, piece_index: u32) -> PieceCipher {
        let mut salt = [0u8; 12];
        salt[..8].copy_from_slice(&chunk_index.to_le_bytes());
        salt[8..].copy_from_slice(&piece_index.to_le_bytes());

        let hk = Hkdf::<Sha256>::new(Some(&salt), &self.0);
        let mut okm = [0u8; KEY_SIZE + NONCE_SIZE];
        hk.expand(b"nimbus-piece-key", &mut okm).unwrap();

        let mut key = [0u8; KEY_SIZE];
        let mut nonce = [0u8; NONCE_SIZE];
        key.copy_from_slice(&okm[..KEY_SIZE]);
        nonce.copy_from_slice(&okm[KEY_SIZE..]);

        PieceCipher { key, nonce }
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MasterKey(..)")
    }
}

/// Twofish-CTR cipher bound to one piece's derived key and nonce
pub struct PieceCipher {
    key: [u8; KEY_SIZE],
    nonce: [u8; NONCE_SIZE],
}

impl PieceCipher {
    /// Encrypt piece data
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let mut buf = plaintext.to_vec();
        self.apply(&mut buf);
        buf
    }

    /// Decrypt piece data (CTR mode is its own inverse)
    pub fn decrypt(&self, ciphertext: &[u8]) -> Vec<u8> {
        let mut buf = ciphertext.to_vec();
        self.apply(&mut buf);
        buf
    }

    /// Apply the keystream in place
    pub fn apply(&self, buf: &mut [u8]) {
        let mut cipher = TwofishCtr::new((&self.key).into(), (&self.nonce).into());
        cipher.apply_keystream(buf);
    }
}
