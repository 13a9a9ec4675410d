use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::{Aes256Gcm, AesGcm};
use rand::{thread_rng, Rng};
use std::env;
use std::fmt;

/// Environment variable holding the 64-hex-character token key.
pub const KEY_ENV: &str = "TOKEN_ENCRYPTION_KEY";

const KEY_HEX_LEN: usize = 64;
const IV_LEN: usize = 12;
/// Tokens written by the previous platform used 16-byte IVs.
const LEGACY_IV_LEN: usize = 16;
const TAG_LEN: usize = 16;

type Aes256GcmLegacyIv = AesGcm<Aes256, U16>;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("TOKEN_ENCRYPTION_KEY environment variable not set")]
    MissingKey,
    #[error("TOKEN_ENCRYPTION_KEY must be 64 hex characters (256 bits), got {0} characters")]
    InvalidKeyLength(usize),
    #[error("TOKEN_ENCRYPTION_KEY is not valid hex")]
    InvalidKeyHex,
    #[error("Refusing to encrypt an empty token")]
    EmptyPlaintext,
    #[error("Encrypted token must have the form iv:authTag:ciphertext")]
    MalformedToken,
    #[error("Invalid hex in encrypted token: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("Invalid IV length: {0} bytes")]
    InvalidIvLength(usize),
    #[error("Invalid auth tag length: {0} bytes")]
    InvalidTagLength(usize),
    #[error("Encryption failed")]
    Encrypt,
    #[error("Decryption failed")]
    Decrypt,
    #[error("Decrypted token is not valid UTF-8")]
    InvalidUtf8,
}

/// AES-256-GCM cipher for OAuth tokens at rest.
///
/// Encrypted tokens are `iv:authTag:ciphertext`, each part hex-encoded.
#[derive(Clone)]
pub struct TokenCipher {
    key: [u8; 32],
}

impl fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCipher").finish_non_exhaustive()
    }
}

impl TokenCipher {
    pub fn from_hex(key_hex: &str) -> Result<Self, CryptoError> {
        let key_hex = key_hex.trim();
        if key_hex.len() != KEY_HEX_LEN {
            return Err(CryptoError::InvalidKeyLength(key_hex.len()));
        }
        let mut key = [0u8; 32];
        hex::decode_to_slice(key_hex, &mut key).map_err(|_| CryptoError::InvalidKeyHex)?;
        Ok(Self { key })
    }

    pub fn from_env() -> Result<Self, CryptoError> {
        let key_hex = env::var(KEY_ENV).map_err(|_| CryptoError::MissingKey)?;
        Self::from_hex(&key_hex)
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        if plaintext.is_empty() {
            return Err(CryptoError::EmptyPlaintext);
        }
        let cipher = Aes256Gcm::new_from_slice(&self.key).map_err(|_| CryptoError::Encrypt)?;

        let mut iv = [0u8; IV_LEN];
        thread_rng().fill(&mut iv);

        // aes-gcm appends the tag to the ciphertext
        let sealed = cipher
            .encrypt(GenericArray::from_slice(&iv), plaintext.as_bytes())
            .map_err(|_| CryptoError::Encrypt)?;
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);

        Ok(format!(
            "{}:{}:{}",
            hex::encode(iv),
            hex::encode(tag),
            hex::encode(ciphertext)
        ))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String, CryptoError> {
        let parts: Vec<&str> = encoded.split(':').collect();
        if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
            return Err(CryptoError::MalformedToken);
        }

        let iv = hex::decode(parts[0])?;
        let tag = hex::decode(parts[1])?;
        let mut payload = hex::decode(parts[2])?;
        if tag.len() != TAG_LEN {
            return Err(CryptoError::InvalidTagLength(tag.len()));
        }
        payload.extend_from_slice(&tag);

        let plaintext = match iv.len() {
            IV_LEN => Aes256Gcm::new_from_slice(&self.key)
                .map_err(|_| CryptoError::Decrypt)?
                .decrypt(GenericArray::from_slice(&iv), payload.as_slice()),
            LEGACY_IV_LEN => Aes256GcmLegacyIv::new_from_slice(&self.key)
                .map_err(|_| CryptoError::Decrypt)?
                .decrypt(GenericArray::from_slice(&iv), payload.as_slice()),
            other => return Err(CryptoError::InvalidIvLength(other)),
        }
        .map_err(|_| CryptoError::Decrypt)?;

        String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidUtf8)
    }
}

/// Encrypt a token with the key from `TOKEN_ENCRYPTION_KEY`.
pub fn encrypt_token(plaintext: &str) -> Result<String, CryptoError> {
    TokenCipher::from_env()?.encrypt(plaintext)
}

/// Decrypt a token produced by [`encrypt_token`].
pub fn decrypt_token(encoded: &str) -> Result<String, CryptoError> {
    TokenCipher::from_env()?.decrypt(encoded)
}
