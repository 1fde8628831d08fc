//! Per-repository symmetric encryption (§4.2): a passphrase is never
//! persisted; instead a key/IV pair and a "magic" proof are derived from
//! it. `EncVersion::V0` repositories never persist the derived key/IV at
//! all, and must re-derive it from the passphrase on every operation
//! (§9 open question: v0 support).

use aes::Aes128;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

pub const KEY_LEN: usize = 16;
pub const IV_LEN: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptError {
    #[error("wrong passphrase")]
    WrongPassphrase,
    #[error("unsupported encryption version: {0}")]
    UnsupportedEncVersion(u32),
    #[error("corrupt ciphertext")]
    Corrupt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncVersion {
    /// Legacy mode: key/iv are recomputed from the passphrase on every
    /// operation and never persisted.
    V0,
    /// Key/iv are derived once and persisted alongside the repository.
    V1,
}

impl EncVersion {
    pub fn from_u32(v: u32) -> Result<Self, CryptError> {
        match v {
            0 => Ok(EncVersion::V0),
            1 => Ok(EncVersion::V1),
            other => Err(CryptError::UnsupportedEncVersion(other)),
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            EncVersion::V0 => 0,
            EncVersion::V1 => 1,
        }
    }

    /// Whether a repository at this version persists its derived key/iv
    /// (§9 open question): only v1+ does.
    pub fn persists_key(self) -> bool {
        matches!(self, EncVersion::V1)
    }
}

#[derive(Clone)]
pub struct CryptContext {
    pub key: [u8; KEY_LEN],
    pub iv: [u8; IV_LEN],
}

/// Derives `(key, iv, magic_hex)` from `repo_id || passphrase` using
/// PBKDF2-HMAC-SHA256 with `iterations` rounds. The magic is the hex of a
/// key-sized digest, recomputed by `verify` to prove a passphrase without
/// ever storing it.
pub fn derive(
    repo_id: &str,
    passphrase: &str,
    version: EncVersion,
    iterations: u32,
) -> Result<(CryptContext, String), CryptError> {
    let _ = version; // the KDF inputs are the same across supported versions; only persistence differs
    let salt = repo_id.as_bytes();
    let mut derived = [0u8; KEY_LEN + IV_LEN];
    pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, iterations, &mut derived);
    let mut key = [0u8; KEY_LEN];
    let mut iv = [0u8; IV_LEN];
    key.copy_from_slice(&derived[..KEY_LEN]);
    iv.copy_from_slice(&derived[KEY_LEN..]);

    let mut magic_input = Vec::with_capacity(repo_id.len() + passphrase.len());
    magic_input.extend_from_slice(repo_id.as_bytes());
    magic_input.extend_from_slice(passphrase.as_bytes());
    let mut magic_bytes = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(&magic_input, b"magic", iterations, &mut magic_bytes);
    let magic_hex = hex::encode(magic_bytes);

    Ok((CryptContext { key, iv }, magic_hex))
}

/// Recomputes the magic for `passphrase` and compares it against
/// `stored_magic` in constant time.
pub fn verify(
    repo_id: &str,
    passphrase: &str,
    version: EncVersion,
    iterations: u32,
    stored_magic: &str,
) -> Result<bool, CryptError> {
    let (_, magic) = derive(repo_id, passphrase, version, iterations)?;
    let a = magic.as_bytes();
    let b = stored_magic.as_bytes();
    if a.len() != b.len() {
        return Ok(false);
    }
    Ok(bool::from(a.ct_eq(b)))
}

pub fn encrypt_block(buf: &[u8], key: &[u8; KEY_LEN], iv: &[u8; IV_LEN]) -> Vec<u8> {
    Aes128CbcEnc::new(key.into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(buf)
}

pub fn decrypt_block(
    buf: &[u8],
    key: &[u8; KEY_LEN],
    iv: &[u8; IV_LEN],
) -> Result<Vec<u8>, CryptError> {
    Aes128CbcDec::new(key.into(), iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(buf)
        .map_err(|_| CryptError::Corrupt)
}
