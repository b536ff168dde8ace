//! Session token codec.
//!
//! Tokens are AES-256-CBC (PKCS#7 padding) over the JSON form of a
//! [`SessionCredential`], hex-encoded for cookie transport. Key and IV are
//! fixed for the process lifetime, so equal credentials always produce equal
//! tokens.

use aes::Aes256;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

use super::config::{SessionKeyConfig, IV_LEN, KEY_LEN};
use super::types::SessionCredential;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Why a token could not be turned back into a credential.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid key material: {0}")]
    KeyMaterial(String),

    #[error("token is not valid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("decryption failed (bad padding or block length)")]
    Decrypt,

    #[error("decrypted payload is not UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("decrypted payload is not a credential: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("credential is missing {0}")]
    MissingField(&'static str),
}

/// Encodes, decodes and checks session tokens.
#[derive(Clone)]
pub struct SessionCodec {
    key: [u8; KEY_LEN],
    iv: [u8; IV_LEN],
    expected_audience: String,
}

impl SessionCodec {
    /// Build a codec from configured key material.
    pub fn new(
        keys: &SessionKeyConfig,
        expected_audience: impl Into<String>,
    ) -> Result<Self, CodecError> {
        keys.validate().map_err(CodecError::KeyMaterial)?;

        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(keys.private_key.as_bytes());
        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(keys.init_vector.as_bytes());

        Ok(Self {
            key,
            iv,
            expected_audience: expected_audience.into(),
        })
    }

    /// Audience tokens must carry to be accepted.
    pub fn expected_audience(&self) -> &str {
        &self.expected_audience
    }

    /// Seal a credential into an opaque hex token.
    pub fn encode(&self, credential: &SessionCredential) -> Result<String, CodecError> {
        let plaintext = serde_json::to_vec(credential)?;
        let ciphertext = Aes256CbcEnc::new((&self.key).into(), (&self.iv).into())
            .encrypt_padded_vec_mut::<Pkcs7>(&plaintext);
        Ok(hex::encode(ciphertext))
    }

    /// Open a token. Any corruption yields an error, never a panic.
    pub fn decode(&self, token: &str) -> Result<SessionCredential, CodecError> {
        let ciphertext = hex::decode(token)?;
        let plaintext = Aes256CbcDec::new((&self.key).into(), (&self.iv).into())
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| CodecError::Decrypt)?;
        let json = String::from_utf8(plaintext)?;
        let credential: SessionCredential = serde_json::from_str(&json)?;

        if credential.audience.is_empty() {
            return Err(CodecError::MissingField("audience"));
        }
        if credential.valid_until == 0 {
            return Err(CodecError::MissingField("validUntil"));
        }

        Ok(credential)
    }

    /// Whether a token carries a credential valid at `now`.
    ///
    /// Any decode failure counts as invalid.
    pub fn is_valid(&self, token: &str, now: DateTime<Utc>) -> bool {
        match self.decode(token) {
            Ok(credential) if credential.is_valid_at(&self.expected_audience, now) => true,
            Ok(credential) => {
                debug!(
                    audience = %credential.audience,
                    valid_until = credential.valid_until,
                    "Session token rejected"
                );
                false
            }
            Err(e) => {
                debug!(error = %e, token_len = token.len(), "Session token undecodable");
                false
            }
        }
    }
}
