//! `Encode(Snapshot) -> blob`, `Decode(blob) -> Snapshot`.
//!
//! Blob envelope: `schemaByte:u8 | [keyId:u16-len-prefixed utf8 | nonce:bytes] | ciphertext`.
//! The bracketed section is present only when the schema byte's encryption bits are
//! non-zero; `ciphertext` holds the (optionally compressed) plaintext directly otherwise.
//! Compression, when enabled, is applied to the plaintext before encryption on encode and
//! undone after decryption on decode — so the bytes handed to the cipher are the
//! compressed form, never the raw JSON.

use crate::codec::compression::{compress, decompress};
use crate::codec::encryption::{open, seal, Keyring};
use crate::config::{CompressionAlgorithm, EncryptionAlgorithm, SecurityConfig};
use crate::error::{EngineError, EngineResult};
use crate::model::Snapshot;

const SCHEMA_VERSION: u8 = 1;

const COMPRESSION_MASK: u8 = 0b0000_0011;
const ENCRYPTION_SHIFT: u8 = 2;
const ENCRYPTION_MASK: u8 = 0b0000_1100;

fn compression_bits(algorithm: Option<CompressionAlgorithm>) -> u8 {
    match algorithm {
        None => 0,
        Some(CompressionAlgorithm::Snappy) => 1,
        Some(CompressionAlgorithm::Gzip) => 2,
        Some(CompressionAlgorithm::Lz4) => 3,
    }
}

fn compression_from_bits(bits: u8) -> EngineResult<Option<CompressionAlgorithm>> {
    match bits {
        0 => Ok(None),
        1 => Ok(Some(CompressionAlgorithm::Snappy)),
        2 => Ok(Some(CompressionAlgorithm::Gzip)),
        3 => Ok(Some(CompressionAlgorithm::Lz4)),
        _ => unreachable!("2-bit field"),
    }
}

fn encryption_bits(algorithm: Option<EncryptionAlgorithm>) -> u8 {
    match algorithm {
        None => 0,
        Some(EncryptionAlgorithm::Secretbox) => 1,
        Some(EncryptionAlgorithm::Aes256Gcm) => 2,
    }
}

fn encryption_from_bits(bits: u8) -> EngineResult<Option<EncryptionAlgorithm>> {
    match bits {
        0 => Ok(None),
        1 => Ok(Some(EncryptionAlgorithm::Secretbox)),
        2 => Ok(Some(EncryptionAlgorithm::Aes256Gcm)),
        other => Err(EngineError::CompressionError(format!(
            "unrecognized encryption schema bits {other}"
        ))),
    }
}

/// Encodes and decodes [`Snapshot`]s into the opaque blobs that both tiers store.
/// The engine never inspects the bytes this produces; only this type does.
pub struct SnapshotCodec {
    security: SecurityConfig,
    keyring: Keyring,
}

impl SnapshotCodec {
    pub fn new(security: SecurityConfig, keyring: Keyring) -> Self {
        SnapshotCodec { security, keyring }
    }

    pub fn encode(&self, snapshot: &Snapshot) -> EngineResult<Vec<u8>> {
        let json = serde_json::to_vec(snapshot)
            .map_err(|e| EngineError::ValidationError(format!("snapshot not serializable: {e}")))?;

        let compression = self.security.enable_compression.then_some(self.security.compression_algorithm);
        let plaintext = match compression {
            Some(algorithm) => compress(algorithm, &json)?,
            None => json,
        };

        let encryption = self.security.enable_encryption.then_some(self.security.encryption_algorithm);
        let schema = compression_bits(compression) | (encryption_bits(encryption) << ENCRYPTION_SHIFT);

        let mut out = Vec::with_capacity(plaintext.len() + 64);
        out.push(schema);

        match encryption {
            Some(algorithm) => {
                let sealed = seal(algorithm, &self.keyring, &plaintext)?;
                let key_id_bytes = sealed.key_id.as_bytes();
                out.extend_from_slice(&(key_id_bytes.len() as u16).to_be_bytes());
                out.extend_from_slice(key_id_bytes);
                out.extend_from_slice(&(sealed.nonce.len() as u16).to_be_bytes());
                out.extend_from_slice(&sealed.nonce);
                out.extend_from_slice(&sealed.ciphertext);
            }
            None => out.extend_from_slice(&plaintext),
        }

        Ok(out)
    }

    pub fn decode(&self, blob: &[u8]) -> EngineResult<Snapshot> {
        let (&schema, rest) = blob
            .split_first()
            .ok_or_else(|| EngineError::ValidationError("empty blob".into()))?;
        if schema >> 4 != 0 {
            // reserved high bits; accepted for forward compatibility, not yet meaningful.
        }

        let compression = compression_from_bits(schema & COMPRESSION_MASK)?;
        let encryption = encryption_from_bits((schema & ENCRYPTION_MASK) >> ENCRYPTION_SHIFT)?;

        let plaintext = match encryption {
            Some(algorithm) => {
                let (key_id, rest) = read_len_prefixed(rest)?;
                let key_id = String::from_utf8(key_id.to_vec())
                    .map_err(|_| EngineError::EncryptionError("key id not utf8".into()))?;
                let (nonce, ciphertext) = read_len_prefixed(rest)?;
                open(algorithm, &self.keyring, &key_id, nonce, ciphertext)?
            }
            None => rest.to_vec(),
        };

        let json = match compression {
            Some(algorithm) => decompress(algorithm, &plaintext)?,
            None => plaintext,
        };

        serde_json::from_slice(&json)
            .map_err(|e| EngineError::ValidationError(format!("corrupt snapshot bytes: {e}")))
    }

    pub fn schema_version(&self) -> u8 {
        SCHEMA_VERSION
    }
}

fn read_len_prefixed(buf: &[u8]) -> EngineResult<(&[u8], &[u8])> {
    if buf.len() < 2 {
        return Err(EngineError::ValidationError("truncated length prefix".into()));
    }
    let len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
    let buf = &buf[2..];
    if buf.len() < len {
        return Err(EngineError::ValidationError("truncated length-prefixed field".into()));
    }
    Ok(buf.split_at(len))
}
