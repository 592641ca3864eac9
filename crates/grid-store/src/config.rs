//! Configuration for archive writing and store access.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use zarrs::array::codec::bytes_to_bytes::blosc::{
    BloscCodec, BloscCompressionLevel, BloscCompressor, BloscShuffleMode,
};
use zarrs::array::codec::BytesToBytesCodecTraits;

use crate::error::StoreError;

/// Element size of the float32 data variables, used by the shuffle filter.
const F32_BYTES: usize = 4;

/// Configuration for the store adapter and archive writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Spatial chunk edge used when writing (lat, lon) dimensions.
    pub zarr_chunk_size: usize,

    /// Compression codec for written archives.
    pub zarr_compression: ZarrCompression,

    /// Compression level (1-9).
    pub zarr_compression_level: u8,

    /// Enable byte shuffle filter for better compression.
    pub zarr_shuffle: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            zarr_chunk_size: 64,
            zarr_compression: ZarrCompression::BloscZstd,
            zarr_compression_level: 3,
            zarr_shuffle: true,
        }
    }
}

impl StoreConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("ZARR_CHUNK_SIZE") {
            if let Ok(size) = val.parse() {
                config.zarr_chunk_size = size;
            }
        }

        if let Ok(val) = std::env::var("ZARR_COMPRESSION") {
            config.zarr_compression = ZarrCompression::from_str(&val);
        }

        if let Ok(val) = std::env::var("ZARR_COMPRESSION_LEVEL") {
            if let Ok(level) = val.parse() {
                config.zarr_compression_level = level;
            }
        }

        if let Ok(val) = std::env::var("ZARR_SHUFFLE") {
            config.zarr_shuffle = val.to_lowercase() == "true" || val == "1";
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.zarr_chunk_size == 0 {
            return Err("zarr_chunk_size must be > 0".to_string());
        }

        if self.zarr_compression_level == 0 || self.zarr_compression_level > 9 {
            return Err("zarr_compression_level must be 1-9".to_string());
        }

        Ok(())
    }

    /// Codec applied to float32 data variables, `None` when uncompressed.
    pub fn data_codec(&self) -> Result<Option<Arc<dyn BytesToBytesCodecTraits>>, StoreError> {
        let Some(compressor) = self.zarr_compression.blosc_compressor() else {
            return Ok(None);
        };
        let level = BloscCompressionLevel::try_from(self.zarr_compression_level).map_err(|_| {
            StoreError::ConfigError(format!(
                "invalid compression level {}",
                self.zarr_compression_level
            ))
        })?;
        let (shuffle, typesize) = if self.zarr_shuffle {
            (BloscShuffleMode::Shuffle, Some(F32_BYTES))
        } else {
            (BloscShuffleMode::NoShuffle, None)
        };
        let codec = BloscCodec::new(compressor, level, None, shuffle, typesize)
            .map_err(|e| StoreError::ConfigError(e.to_string()))?;
        Ok(Some(Arc::new(codec)))
    }

    /// Uncompressed configuration, mostly useful in tests.
    pub fn uncompressed() -> Self {
        Self {
            zarr_compression: ZarrCompression::None,
            ..Self::default()
        }
    }
}

/// Compression codec for Zarr archives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZarrCompression {
    /// No compression.
    None,
    /// Blosc with LZ4.
    BloscLz4,
    /// Blosc with Zstd (recommended).
    #[default]
    BloscZstd,
}

impl ZarrCompression {
    /// Parse from string (case-insensitive).
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "none" => Self::None,
            "lz4" | "blosc_lz4" => Self::BloscLz4,
            "zstd" | "blosc_zstd" => Self::BloscZstd,
            _ => Self::BloscZstd,
        }
    }

    /// Blosc compressor for this setting.
    pub fn blosc_compressor(&self) -> Option<BloscCompressor> {
        match self {
            Self::None => None,
            Self::BloscLz4 => Some(BloscCompressor::LZ4),
            Self::BloscZstd => Some(BloscCompressor::Zstd),
        }
    }

    /// Get the codec name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::BloscLz4 => "blosc_lz4",
            Self::BloscZstd => "blosc_zstd",
        }
    }
}

impl std::fmt::Display for ZarrCompression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.zarr_chunk_size, 64);
        assert_eq!(config.zarr_compression, ZarrCompression::BloscZstd);
        assert_eq!(config.zarr_compression_level, 3);
        assert!(config.zarr_shuffle);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = StoreConfig::default();
        config.zarr_chunk_size = 0;
        assert!(config.validate().is_err());

        config = StoreConfig::default();
        config.zarr_compression_level = 0;
        assert!(config.validate().is_err());

        config.zarr_compression_level = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zarr_compression_from_str() {
        assert_eq!(ZarrCompression::from_str("none"), ZarrCompression::None);
        assert_eq!(ZarrCompression::from_str("lz4"), ZarrCompression::BloscLz4);
        assert_eq!(
            ZarrCompression::from_str("BLOSC_ZSTD"),
            ZarrCompression::BloscZstd
        );
        assert_eq!(
            ZarrCompression::from_str("invalid"),
            ZarrCompression::BloscZstd
        );
    }

    #[test]
    fn test_data_codec_follows_settings() {
        assert!(StoreConfig::uncompressed().data_codec().unwrap().is_none());
        assert!(StoreConfig::default().data_codec().unwrap().is_some());

        let lz4 = StoreConfig {
            zarr_compression: ZarrCompression::BloscLz4,
            zarr_shuffle: false,
            ..StoreConfig::default()
        };
        assert!(lz4.data_codec().unwrap().is_some());

        let bad_level = StoreConfig {
            zarr_compression_level: 12,
            ..StoreConfig::default()
        };
        assert!(matches!(
            bad_level.data_codec(),
            Err(StoreError::ConfigError(_))
        ));
    }
}
