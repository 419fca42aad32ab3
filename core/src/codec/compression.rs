//! Selectable plaintext compression, applied before encryption on encode and undone
//! after decryption on decode.

use std::io::{Read, Write};

use crate::config::CompressionAlgorithm;
use crate::error::{EngineError, EngineResult};

pub fn compress(algorithm: CompressionAlgorithm, plaintext: &[u8]) -> EngineResult<Vec<u8>> {
    match algorithm {
        CompressionAlgorithm::Snappy => {
            let mut encoder = snap::raw::Encoder::new();
            encoder
                .compress_vec(plaintext)
                .map_err(|e| EngineError::CompressionError(e.to_string()))
        }
        CompressionAlgorithm::Gzip => {
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder
                .write_all(plaintext)
                .map_err(|e| EngineError::CompressionError(e.to_string()))?;
            encoder
                .finish()
                .map_err(|e| EngineError::CompressionError(e.to_string()))
        }
        CompressionAlgorithm::Lz4 => {
            let mut encoder = lz4_flex::frame::FrameEncoder::new(Vec::new());
            encoder
                .write_all(plaintext)
                .map_err(|e| EngineError::CompressionError(e.to_string()))?;
            encoder
                .finish()
                .map_err(|e| EngineError::CompressionError(e.to_string()))
        }
    }
}

pub fn decompress(algorithm: CompressionAlgorithm, compressed: &[u8]) -> EngineResult<Vec<u8>> {
    match algorithm {
        CompressionAlgorithm::Snappy => {
            let mut decoder = snap::raw::Decoder::new();
            decoder
                .decompress_vec(compressed)
                .map_err(|e| EngineError::CompressionError(e.to_string()))
        }
        CompressionAlgorithm::Gzip => {
            let mut decoder = flate2::read::GzDecoder::new(compressed);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| EngineError::CompressionError(e.to_string()))?;
            Ok(out)
        }
        CompressionAlgorithm::Lz4 => {
            let mut decoder = lz4_flex::frame::FrameDecoder::new(compressed);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| EngineError::CompressionError(e.to_string()))?;
            Ok(out)
        }
    }
}
