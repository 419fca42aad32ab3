//! Authenticated encryption over the (optionally compressed) plaintext, plus the
//! cooperative key-rotation keyring.
//!
//! Key material never originates here: the caller hands the codec a [`Keyring`] built
//! from whatever secrets store it uses, and this module only ever sees raw key bytes.

use std::collections::BTreeMap;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce as AesNonce};
use rand::RngCore;
use xsalsa20poly1305::aead::generic_array::GenericArray;
use xsalsa20poly1305::{KeyInit as SecretboxKeyInit, XSalsa20Poly1305};

use crate::config::EncryptionAlgorithm;
use crate::error::{EngineError, EngineResult};

const AES_GCM_NONCE_LEN: usize = 12;
const SECRETBOX_NONCE_LEN: usize = 24;

/// `keyId → 32-byte key`. During a rotation window the caller keeps both the
/// newly-minted key and the previous one present so in-flight blobs encrypted under
/// the old key still decrypt.
#[derive(Clone, Debug, Default)]
pub struct Keyring {
    current_key_id: String,
    keys: BTreeMap<String, [u8; 32]>,
}

impl Keyring {
    pub fn new(current_key_id: impl Into<String>, current_key: [u8; 32]) -> Self {
        let current_key_id = current_key_id.into();
        let mut keys = BTreeMap::new();
        keys.insert(current_key_id.clone(), current_key);
        Keyring {
            current_key_id,
            keys,
        }
    }

    /// Keeps `key_id` decryptable without making it the key new writes are sealed under.
    pub fn add_previous(&mut self, key_id: impl Into<String>, key: [u8; 32]) {
        self.keys.insert(key_id.into(), key);
    }

    pub fn current_key_id(&self) -> &str {
        &self.current_key_id
    }

    fn get(&self, key_id: &str) -> EngineResult<&[u8; 32]> {
        self.keys
            .get(key_id)
            .ok_or_else(|| EngineError::EncryptionError(format!("unknown key id {key_id}")))
    }

    fn current(&self) -> &[u8; 32] {
        self.keys
            .get(&self.current_key_id)
            .expect("current_key_id always present in keys")
    }
}

pub struct Sealed {
    pub key_id: String,
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

pub fn seal(
    algorithm: EncryptionAlgorithm,
    keyring: &Keyring,
    plaintext: &[u8],
) -> EngineResult<Sealed> {
    let mut nonce = vec![0u8; nonce_len(algorithm)];
    rand::thread_rng().fill_bytes(&mut nonce);
    let key = keyring.current();

    let ciphertext = match algorithm {
        EncryptionAlgorithm::Aes256Gcm => {
            let cipher = Aes256Gcm::new(GenericArray::from_slice(key));
            cipher
                .encrypt(AesNonce::from_slice(&nonce), plaintext)
                .map_err(|e| EngineError::EncryptionError(e.to_string()))?
        }
        EncryptionAlgorithm::Secretbox => {
            let cipher = XSalsa20Poly1305::new(GenericArray::from_slice(key));
            cipher
                .encrypt(GenericArray::from_slice(&nonce), plaintext)
                .map_err(|e| EngineError::EncryptionError(e.to_string()))?
        }
    };

    Ok(Sealed {
        key_id: keyring.current_key_id().to_string(),
        nonce,
        ciphertext,
    })
}

/// Tries the key named by `key_id` only. During a rotation window the caller is
/// expected to have populated both the current and previous key under their own ids,
/// so a single lookup (rather than a try-every-key scan) is sufficient and avoids
/// spurious authentication attempts against unrelated keys.
pub fn open(
    algorithm: EncryptionAlgorithm,
    keyring: &Keyring,
    key_id: &str,
    nonce: &[u8],
    ciphertext: &[u8],
) -> EngineResult<Vec<u8>> {
    let key = keyring.get(key_id)?;

    match algorithm {
        EncryptionAlgorithm::Aes256Gcm => {
            let cipher = Aes256Gcm::new(GenericArray::from_slice(key));
            cipher
                .decrypt(AesNonce::from_slice(nonce), ciphertext)
                .map_err(|_| EngineError::EncryptionError("authentication tag mismatch".into()))
        }
        EncryptionAlgorithm::Secretbox => {
            let cipher = XSalsa20Poly1305::new(GenericArray::from_slice(key));
            cipher
                .decrypt(GenericArray::from_slice(nonce), ciphertext)
                .map_err(|_| EngineError::EncryptionError("authentication tag mismatch".into()))
        }
    }
}

fn nonce_len(algorithm: EncryptionAlgorithm) -> usize {
    match algorithm {
        EncryptionAlgorithm::Aes256Gcm => AES_GCM_NONCE_LEN,
        EncryptionAlgorithm::Secretbox => SECRETBOX_NONCE_LEN,
    }
}
