//! Erasure Coding using Reed-Solomon
//!
//! Splits a chunk of plaintext into N fixed-size pieces where only D are
//! needed to reconstruct. The code is systematic: the first D pieces are the
//! (padded) plaintext itself, the remaining P pieces are parity.

use reed_solomon_erasure::galois_8::ReedSolomon;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound on total shards per chunk
pub const MAX_TOTAL_SHARDS: usize = 30;

#[derive(Error, Debug)]
pub enum ErasureError {
    #[error("Not enough pieces available: have {have}, need {need}")]
    InsufficientPieces { have: usize, need: usize },

    #[error("Total shards must be between 2 and {max}, got {total}")]
    InvalidShardCount { total: usize, max: usize },

    #[error("Chunk plaintext is {len} bytes but the coding boundary is {max}")]
    ChunkTooLarge { len: usize, max: usize },

    #[error("Piece {index} is {len} bytes, expected {expected}")]
    BadPieceSize { index: usize, len: usize, expected: usize },

    #[error("Reed-Solomon error: {0}")]
    Coding(String),
}

/// Configuration for erasure coding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErasureConfig {
    /// Number of data shards
    pub data_shards: usize,

    /// Number of parity shards
    pub parity_shards: usize,
}

impl ErasureConfig {
    /// Create a new erasure config
    pub fn new(data_shards: usize, parity_shards: usize) -> Result<Self, ErasureError> {
        let total = data_shards + parity_shards;
        if data_shards == 0 || parity_shards == 0 || total > MAX_TOTAL_SHARDS {
            return Err(ErasureError::InvalidShardCount {
                total,
                max: MAX_TOTAL_SHARDS,
            });
        }
        Ok(Self {
            data_shards,
            parity_shards,
        })
    }

    /// Total number of shards
    pub fn total_shards(&self) -> usize {
        self.data_shards + self.parity_shards
    }

    /// Minimum shards needed to reconstruct
    pub fn min_shards(&self) -> usize {
        self.data_shards
    }

    /// Redundancy factor (total / data)
    pub fn redundancy(&self) -> f64 {
        self.total_shards() as f64 / self.data_shards as f64
    }
}

/// Encodes and decodes chunks as sets of fixed-size pieces
pub struct ErasureCoder {
    config: ErasureConfig,
    piece_size: usize,
    rs: ReedSolomon,
}

impl ErasureCoder {
    /// Create a new coder for the given config and piece size
    pub fn new(config: ErasureConfig, piece_size: usize) -> Result<Self, ErasureError> {
        let rs = ReedSolomon::new(config.data_shards, config.parity_shards)
            .map_err(|e| ErasureError::Coding(e.to_string()))?;

        Ok(Self {
            config,
            piece_size,
            rs,
        })
    }

    /// Plaintext bytes covered by one chunk at this coder's parameters
    pub fn chunk_plaintext_size(&self) -> usize {
        self.config.data_shards * self.piece_size
    }

    /// Get the config
    pub fn config(&self) -> ErasureConfig {
        self.config
    }

    /// Encode chunk plaintext into N pieces of `piece_size` bytes each.
    /// Plaintext shorter than the coding boundary is zero-padded.
    pub fn encode(&self, plaintext: &[u8]) -> Result<Vec<Vec<u8>>, ErasureError> {
        let boundary = self.chunk_plaintext_size();
        if plaintext.len() > boundary {
            return Err(ErasureError::ChunkTooLarge {
                len: plaintext.len(),
                max: boundary,
            });
        }

        let mut shards: Vec<Vec<u8>> = Vec::with_capacity(self.config.total_shards());

        for i in 0..self.config.data_shards {
            let start = (i * self.piece_size).min(plaintext.len());
            let end = ((i + 1) * self.piece_size).min(plaintext.len());

            let mut shard = plaintext[start..end].to_vec();
            shard.resize(self.piece_size, 0);
            shards.push(shard);
        }

        for _ in 0..self.config.parity_shards {
            shards.push(vec![0u8; self.piece_size]);
        }

        let mut shard_refs: Vec<&mut [u8]> = shards.iter_mut().map(|s| s.as_mut_slice()).collect();
        self.rs
            .encode(&mut shard_refs)
            .map_err(|e| ErasureError::Coding(e.to_string()))?;

        Ok(shards)
    }

    /// Decode pieces back to chunk plaintext of `plaintext_len` bytes.
    /// Missing pieces are passed as `None`; any D present pieces suffice.
    pub fn decode(
        &self,
        mut pieces: Vec<Option<Vec<u8>>>,
        plaintext_len: usize,
    ) -> Result<Vec<u8>, ErasureError> {
        if pieces.len() != self.config.total_shards() {
            return Err(ErasureError::Coding(format!(
                "expected {} piece slots, got {}",
                self.config.total_shards(),
                pieces.len()
            )));
        }

        let available = pieces.iter().filter(|p| p.is_some()).count();
        if available < self.config.data_shards {
            return Err(ErasureError::InsufficientPieces {
                have: available,
                need: self.config.data_shards,
            });
        }

        for (index, piece) in pieces.iter().enumerate() {
            if let Some(data) = piece {
                if data.len() != self.piece_size {
                    return Err(ErasureError::BadPieceSize {
                        index,
                        len: data.len(),
                        expected: self.piece_size,
                    });
                }
            }
        }

        self.rs
            .reconstruct(&mut pieces)
            .map_err(|e| ErasureError::Coding(e.to_string()))?;

        let mut result = Vec::with_capacity(plaintext_len);
        for piece in pieces.iter().take(self.config.data_shards) {
            match piece {
                Some(data) => result.extend_from_slice(data),
                None => return Err(ErasureError::Coding("reconstruction failed".into())),
            }
        }

        result.truncate(plaintext_len);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_erasure_config() {
        let config = ErasureConfig::new(10, 20).unwrap();

        assert_eq!(config.total_shards(), 30);
        assert_eq!(config.min_shards(), 10);
        assert_eq!(config.redundancy(), 3.0);

        assert!(ErasureConfig::new(0, 4).is_err());
        assert!(ErasureConfig::new(20, 11).is_err());
        assert!(ErasureConfig::new(1, 0).is_err());
    }

    #[test]
    fn test_encode_decode_no_loss() {
        let config = ErasureConfig::new(4, 2).unwrap();
        let coder = ErasureCoder::new(config, 64).unwrap();

        let original: Vec<u8> = (0..200).map(|i| (i % 256) as u8).collect();
        let pieces = coder.encode(&original).unwrap();

        assert_eq!(pieces.len(), 6);
        assert!(pieces.iter().all(|p| p.len() == 64));

        // Systematic code: the first data shards are the plaintext itself.
        assert_eq!(&pieces[0][..], &original[..64]);

        let slots: Vec<Option<Vec<u8>>> = pieces.into_iter().map(Some).collect();
        let decoded = coder.decode(slots, original.len()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_encode_decode_with_loss() {
        let config = ErasureConfig::new(4, 2).unwrap();
        let coder = ErasureCoder::new(config, 64).unwrap();

        let original: Vec<u8> = (0..250).map(|i| (i * 7 % 256) as u8).collect();
        let pieces = coder.encode(&original).unwrap();

        let mut slots: Vec<Option<Vec<u8>>> = pieces.into_iter().map(Some).collect();
        slots[1] = None;
        slots[3] = None;

        let decoded = coder.decode(slots, original.len()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_too_many_losses() {
        let config = ErasureConfig::new(4, 2).unwrap();
        let coder = ErasureCoder::new(config, 64).unwrap();

        let pieces = coder.encode(b"short chunk").unwrap();
        let mut slots: Vec<Option<Vec<u8>>> = pieces.into_iter().map(Some).collect();
        slots[0] = None;
        slots[2] = None;
        slots[4] = None;

        let result = coder.decode(slots, 11);
        assert!(matches!(
            result,
            Err(ErasureError::InsufficientPieces { have: 3, need: 4 })
        ));
    }

    #[test]
    fn test_short_chunk_is_padded() {
        let config = ErasureConfig::new(3, 1).unwrap();
        let coder = ErasureCoder::new(config, 32).unwrap();

        // One byte of plaintext still produces full-size pieces.
        let pieces = coder.encode(&[0xAB]).unwrap();
        assert!(pieces.iter().all(|p| p.len() == 32));

        let slots: Vec<Option<Vec<u8>>> = pieces.into_iter().map(Some).collect();
        let decoded = coder.decode(slots, 1).unwrap();
        assert_eq!(decoded, vec![0xAB]);
    }

    #[test]
    fn test_oversized_chunk_rejected() {
        let config = ErasureConfig::new(2, 1).unwrap();
        let coder = ErasureCoder::new(config, 16).unwrap();

        let result = coder.encode(&vec![0u8; 33]);
        assert!(matches!(result, Err(ErasureError::ChunkTooLarge { .. })));
    }
}
