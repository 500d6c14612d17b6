//! JSON wire format of the token stream
//!
//! A flat array mixing integers and float arrays:
//!
//! ```text
//! Hit(i)                 -> i
//! Raw(block)             -> 0xFD, [block]
//! Overwrite{slot, block} -> 0xFF, slot, 0xFD, [block]
//! Resize(n)              -> 0xFE, n
//! ```
//!
//! The reader also accepts the short overwrite form `0xFF, slot, [block]`.

use super::{Token, BLOCKSIZE_MARKER, OVERWRITE_MARKER, RAW_MARKER};
use crate::{IdealemError, Result};
use serde::de::{self, Deserializer};
use serde::ser::{self, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Token stream that serializes to the flat wire array
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodedStream(Vec<Token>);

#[derive(Serialize)]
#[serde(untagged)]
enum WireItem<'a> {
    Int(u32),
    Block(&'a [f64]),
}

impl EncodedStream {
    pub fn from_tokens(tokens: Vec<Token>) -> Self {
        Self(tokens)
    }

    pub fn tokens(&self) -> &[Token] {
        &self.0
    }

    /// Number of tokens
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of elements in the wire array
    pub fn wire_len(&self) -> usize {
        self.0
            .iter()
            .map(|token| match token {
                Token::Hit(_) => 1,
                Token::Raw(_) | Token::Resize(_) => 2,
                Token::Overwrite { .. } => 4,
            })
            .sum()
    }

    /// Serialize to the JSON wire array
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| IdealemError::InvalidFormat(e.to_string()))
    }

    /// Parse the JSON wire array
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let items: Vec<Value> =
            serde_json::from_slice(bytes).map_err(|e| IdealemError::InvalidFormat(e.to_string()))?;
        Self::from_values(&items)
    }

    /// Parse already decoded JSON elements
    pub fn from_values(items: &[Value]) -> Result<Self> {
        let mut tokens = Vec::new();
        let mut pos = 0;

        while pos < items.len() {
            let marker = expect_int(items, pos)?;
            match marker {
                OVERWRITE_MARKER => {
                    let slot = expect_int(items, pos + 1)?;
                    if slot >= RAW_MARKER {
                        return Err(IdealemError::malformed(
                            pos + 1,
                            format!("overwrite slot {} collides with a marker", slot),
                        ));
                    }
                    // Long form carries a raw marker before the block
                    let mut block_pos = pos + 2;
                    if items.get(block_pos).and_then(Value::as_u64) == Some(RAW_MARKER as u64) {
                        block_pos += 1;
                    }
                    let block = expect_block(items, block_pos)?;
                    tokens.push(Token::Overwrite { slot, block });
                    pos = block_pos + 1;
                }
                BLOCKSIZE_MARKER => {
                    let size = expect_int(items, pos + 1)?;
                    tokens.push(Token::Resize(size));
                    pos += 2;
                }
                RAW_MARKER => {
                    tokens.push(Token::Raw(expect_block(items, pos + 1)?));
                    pos += 2;
                }
                index if index < RAW_MARKER => {
                    tokens.push(Token::Hit(index));
                    pos += 1;
                }
                other => {
                    return Err(IdealemError::malformed(
                        pos,
                        format!("unknown marker {:#x}", other),
                    ));
                }
            }
        }

        Ok(Self(tokens))
    }
}

fn expect_int(items: &[Value], pos: usize) -> Result<u32> {
    let item = items
        .get(pos)
        .ok_or_else(|| IdealemError::malformed(pos, "stream ends inside a token"))?;
    item.as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| IdealemError::malformed(pos, format!("expected an integer, found {}", item)))
}

fn expect_block(items: &[Value], pos: usize) -> Result<Vec<f64>> {
    let item = items
        .get(pos)
        .ok_or_else(|| IdealemError::malformed(pos, "stream ends before a raw block"))?;
    let values = item
        .as_array()
        .ok_or_else(|| IdealemError::malformed(pos, format!("expected a raw block, found {}", item)))?;
    values
        .iter()
        .map(|v| {
            v.as_f64()
                .ok_or_else(|| IdealemError::malformed(pos, format!("non-numeric value {} in raw block", v)))
        })
        .collect()
}

impl Serialize for EncodedStream {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut items = Vec::with_capacity(self.wire_len());
        for token in &self.0 {
            match token {
                Token::Hit(index) => {
                    if *index >= RAW_MARKER {
                        return Err(ser::Error::custom(format!(
                            "buffer index {} collides with a marker",
                            index
                        )));
                    }
                    items.push(WireItem::Int(*index));
                }
                Token::Raw(block) => {
                    check_finite::<S>(block)?;
                    items.push(WireItem::Int(RAW_MARKER));
                    items.push(WireItem::Block(block));
                }
                Token::Overwrite { slot, block } => {
                    check_finite::<S>(block)?;
                    items.push(WireItem::Int(OVERWRITE_MARKER));
                    items.push(WireItem::Int(*slot));
                    items.push(WireItem::Int(RAW_MARKER));
                    items.push(WireItem::Block(block));
                }
                Token::Resize(size) => {
                    items.push(WireItem::Int(BLOCKSIZE_MARKER));
                    items.push(WireItem::Int(*size));
                }
            }
        }
        serializer.collect_seq(items)
    }
}

fn check_finite<S: Serializer>(block: &[f64]) -> std::result::Result<(), S::Error> {
    match block.iter().find(|v| !v.is_finite()) {
        Some(v) => Err(ser::Error::custom(format!("{} cannot be written as JSON", v))),
        None => Ok(()),
    }
}

impl<'de> Deserialize<'de> for EncodedStream {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let items = Vec::<Value>::deserialize(deserializer)?;
        Self::from_values(&items).map_err(de::Error::custom)
    }
}
