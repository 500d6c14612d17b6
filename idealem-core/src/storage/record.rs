//! Persisted compression records and their checksummed framing

use crate::compression::{CompressionMetadata, Compressed, EncodedStream};
use crate::{config, IdealemError, Result, TimeRange};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One compressed span of a device's series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressedRecord {
    /// Record identifier
    pub id: Uuid,
    /// Device the samples came from
    pub device_id: String,
    /// Replay metadata, compression ratio filled in
    pub metadata: CompressionMetadata,
    /// Token stream in wire form
    pub encoded_stream: EncodedStream,
    /// First and last sample timestamps
    pub time_range: TimeRange,
    /// When the record was created
    pub created_at: DateTime<Utc>,
}

impl CompressedRecord {
    /// Build a record from an encoder result.
    ///
    /// The compression ratio becomes `original_length * 8 / encoded JSON bytes`.
    pub fn new(device_id: &str, compressed: Compressed, time_range: TimeRange) -> Result<Self> {
        let stream_bytes = compressed.stream.to_json()?.len();
        let mut metadata = compressed.metadata;
        metadata.compression_ratio =
            (metadata.original_length * config::SAMPLE_BYTES) as f64 / stream_bytes.max(1) as f64;

        Ok(Self {
            id: Uuid::new_v4(),
            device_id: device_id.to_string(),
            metadata,
            encoded_stream: compressed.stream,
            time_range,
            created_at: Utc::now(),
        })
    }

    /// Serialize the record with length prefix and CRC checksum
    ///
    /// Format:
    /// - 4 bytes: length of everything after this field
    /// - N bytes: JSON payload
    /// - 4 bytes: CRC32 of the payload
    pub fn encode(&self) -> Result<Bytes> {
        let payload =
            serde_json::to_vec(self).map_err(|e| IdealemError::InvalidFormat(e.to_string()))?;

        let mut buf = BytesMut::with_capacity(payload.len() + 8);
        buf.put_u32_le((payload.len() + 4) as u32);
        buf.put_slice(&payload);
        buf.put_u32_le(crc32fast::hash(&payload));

        Ok(buf.freeze())
    }

    /// Deserialize a record, validating length and checksum
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 8 {
            return Err(IdealemError::Corruption("record too short".into()));
        }

        let mut cursor = data;
        let len = cursor.get_u32_le() as usize;
        if len < 4 || cursor.len() != len {
            return Err(IdealemError::Corruption(format!(
                "record length {} does not match {} bytes on disk",
                len,
                cursor.len()
            )));
        }

        let (payload, mut trailer) = cursor.split_at(len - 4);
        let expected = trailer.get_u32_le();
        let actual = crc32fast::hash(payload);
        if expected != actual {
            return Err(IdealemError::ChecksumMismatch { expected, actual });
        }

        serde_json::from_slice(payload).map_err(|e| IdealemError::Corruption(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::{CompressorConfig, Encoder};
    use crate::parse_timestamp;

    fn record() -> CompressedRecord {
        let values: Vec<f64> = (0..48).map(|i| (i % 12) as f64).collect();
        let compressed = Encoder::new(CompressorConfig::fixed(12, 4))
            .unwrap()
            .compress(&values)
            .unwrap();
        let range = TimeRange::new(
            parse_timestamp("2024-01-01T00:00:00").unwrap(),
            parse_timestamp("2024-01-01T03:55:00").unwrap(),
        )
        .unwrap();
        CompressedRecord::new("sensor-1", compressed, range).unwrap()
    }

    #[test]
    fn test_compression_ratio_from_wire_size() {
        let record = record();
        let wire = record.encoded_stream.to_json().unwrap();
        assert_eq!(
            record.metadata.compression_ratio,
            (48 * 8) as f64 / wire.len() as f64
        );
        assert!(record.metadata.compression_ratio > 1.0);
    }

    #[test]
    fn test_encode_decode() {
        let record = record();
        let bytes = record.encode().unwrap();
        assert_eq!(CompressedRecord::decode(&bytes).unwrap(), record);
    }

    #[test]
    fn test_checksum_validation() {
        let mut bytes = record().encode().unwrap().to_vec();
        bytes[10] ^= 0xFF;
        assert!(matches!(
            CompressedRecord::decode(&bytes),
            Err(IdealemError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_truncated_record() {
        let bytes = record().encode().unwrap();
        let err = CompressedRecord::decode(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(err.is_corruption());
    }
}
