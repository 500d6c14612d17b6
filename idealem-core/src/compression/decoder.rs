//! Token stream replay
//!
//! Mirrors the encoder's pool: raw blocks are appended until the pool is
//! full and then replace slot 0, overwrites target their slot directly, and
//! a resize flushes every buffer.

use super::buffer_pool::BufferPool;
use super::{CompressionMetadata, Token, RAW_MARKER};
use crate::{IdealemError, Result};

/// Rebuilds values from tokens
#[derive(Debug, Clone)]
pub struct Decoder {
    pool: BufferPool,
    output: Vec<f64>,
    position: usize,
}

impl Decoder {
    /// Create a decoder with the encoder's pool capacity
    pub fn new(num_buffers: usize) -> Self {
        Self {
            pool: BufferPool::new(num_buffers),
            output: Vec::new(),
            position: 0,
        }
    }

    /// Replay one token
    pub fn apply(&mut self, token: &Token) -> Result<()> {
        let position = self.position;
        self.position += 1;

        match token {
            Token::Hit(index) => {
                let index = *index as usize;
                if index >= self.pool.capacity() {
                    return Err(IdealemError::malformed(
                        position,
                        format!("buffer index {} outside pool of {}", index, self.pool.capacity()),
                    ));
                }
                let block = self.pool.get(index).ok_or_else(|| {
                    IdealemError::malformed(position, format!("buffer {} is empty", index))
                })?;
                self.output.extend_from_slice(block);
            }
            Token::Raw(block) => {
                self.pool.insert_or_overwrite(block);
                self.output.extend_from_slice(block);
            }
            Token::Overwrite { slot, block } => {
                if !self.pool.place(*slot as usize, block.clone(), block.len()) {
                    return Err(IdealemError::malformed(
                        position,
                        format!("overwrite slot {} outside pool of {}", slot, self.pool.capacity()),
                    ));
                }
                self.output.extend_from_slice(block);
            }
            Token::Resize(size) => {
                if *size == 0 {
                    return Err(IdealemError::malformed(position, "block size 0"));
                }
                self.pool.clear();
            }
        }
        Ok(())
    }

    /// Live buffers
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Values reconstructed so far
    pub fn output(&self) -> &[f64] {
        &self.output
    }

    /// Return exactly `original_length` values
    pub fn finish(mut self, original_length: usize) -> Result<Vec<f64>> {
        if self.output.len() < original_length {
            return Err(IdealemError::malformed(
                self.position,
                format!(
                    "stream yields {} values, expected {}",
                    self.output.len(),
                    original_length
                ),
            ));
        }
        self.output.truncate(original_length);
        Ok(self.output)
    }
}

/// Replay `tokens` with the settings recorded in `metadata`
pub fn decompress(tokens: &[Token], metadata: &CompressionMetadata) -> Result<Vec<f64>> {
    if metadata.num_buffers == 0 || metadata.num_buffers >= RAW_MARKER as usize {
        return Err(IdealemError::InvalidFormat(format!(
            "num_buffers {} cannot be replayed",
            metadata.num_buffers
        )));
    }

    let mut decoder = Decoder::new(metadata.num_buffers);
    for token in tokens {
        decoder.apply(token)?;
    }
    decoder.finish(metadata.original_length)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(num_buffers: usize, original_length: usize) -> CompressionMetadata {
        CompressionMetadata {
            block_size: 2,
            num_buffers,
            original_length,
            hit_ratio: 0.0,
            compression_ratio: 0.0,
        }
    }

    #[test]
    fn test_replay_mirrors_fifo() {
        let tokens = vec![
            Token::Raw(vec![1.0, 1.0]),
            Token::Raw(vec![2.0, 2.0]),
            Token::Hit(1),
            Token::Overwrite {
                slot: 0,
                block: vec![3.0, 3.0],
            },
            Token::Hit(0),
        ];
        let values = decompress(&tokens, &metadata(2, 10)).unwrap();
        assert_eq!(values, vec![1.0, 1.0, 2.0, 2.0, 2.0, 2.0, 3.0, 3.0, 3.0, 3.0]);
    }

    #[test]
    fn test_raw_on_full_pool_replaces_slot_zero() {
        let mut decoder = Decoder::new(1);
        decoder.apply(&Token::Raw(vec![1.0])).unwrap();
        decoder.apply(&Token::Raw(vec![2.0])).unwrap();
        assert_eq!(decoder.pool().len(), 1);
        assert_eq!(decoder.pool().get(0), Some([2.0].as_slice()));
    }

    #[test]
    fn test_resize_flushes_pool() {
        let tokens = vec![Token::Raw(vec![1.0, 2.0]), Token::Resize(3), Token::Hit(0)];
        let err = decompress(&tokens, &metadata(4, 5)).unwrap_err();
        assert!(matches!(err, IdealemError::MalformedStream { position: 2, .. }));
    }

    #[test]
    fn test_overwrite_pads_missing_slots() {
        let mut decoder = Decoder::new(4);
        decoder
            .apply(&Token::Overwrite {
                slot: 2,
                block: vec![7.0, 8.0],
            })
            .unwrap();
        assert_eq!(decoder.pool().len(), 3);
        assert_eq!(decoder.pool().get(1), Some([0.0, 0.0].as_slice()));
        assert_eq!(decoder.output(), &[7.0, 8.0]);
    }

    #[test]
    fn test_rejects_bad_references() {
        let out_of_range = vec![Token::Raw(vec![1.0]), Token::Hit(2)];
        assert!(decompress(&out_of_range, &metadata(2, 2)).unwrap_err().is_corruption());

        let bad_slot = vec![Token::Overwrite {
            slot: 2,
            block: vec![1.0],
        }];
        assert!(decompress(&bad_slot, &metadata(2, 1)).is_err());

        assert!(decompress(&[Token::Resize(0)], &metadata(2, 0)).is_err());
    }

    #[test]
    fn test_length_checks() {
        let tokens = vec![Token::Raw(vec![1.0, 2.0, 3.0])];
        assert_eq!(decompress(&tokens, &metadata(2, 2)).unwrap(), vec![1.0, 2.0]);
        assert!(matches!(
            decompress(&tokens, &metadata(2, 4)),
            Err(IdealemError::MalformedStream { .. })
        ));
        assert!(decompress(&tokens, &metadata(0, 3)).is_err());
    }
}
