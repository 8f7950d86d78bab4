use aes::Aes128;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use thiserror::Error;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

const KEY_LEN: usize = 16;
const IV_LEN: usize = 16;
const BLOCK_LEN: usize = 16;

#[derive(Error, Debug)]
pub enum CipherError {
    #[error("ciphertext shorter than one iv plus one block")]
    TooShort,
    #[error("ciphertext length is not a multiple of the block size")]
    Misaligned,
    #[error("padding is invalid")]
    BadPadding,
}

/// Encrypts and decrypts frame payloads with a single 16-byte key, shared
/// by both directions and both endpoints.
#[derive(Clone)]
pub struct Cipher {
    key: [u8; KEY_LEN],
}

impl Cipher {
    /// Derive the key from a shared secret: right-pad with `'0'` until
    /// the length is a positive multiple of 16 bytes, then take the
    /// first 16 bytes.
    pub fn from_secret(secret: &str) -> Self {
        let mut padded = secret.as_bytes().to_vec();
        while padded.len() < KEY_LEN || padded.len() % KEY_LEN != 0 {
            padded.push(b'0');
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&padded[..KEY_LEN]);
        Cipher { key }
    }

    /// Encrypt `plaintext`, returning `iv || ciphertext`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);

        let ciphertext = Aes128CbcEnc::new(&self.key.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        let mut out = Vec::with_capacity(IV_LEN + ciphertext.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&ciphertext);
        out
    }

    /// Decrypt `iv || ciphertext` produced by [`Cipher::encrypt`] using
    /// the same key.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        if ciphertext.len() < IV_LEN + BLOCK_LEN {
            return Err(CipherError::TooShort);
        }
        let (iv, body) = ciphertext.split_at(IV_LEN);
        if body.len() % BLOCK_LEN != 0 {
            return Err(CipherError::Misaligned);
        }

        Aes128CbcDec::new(&self.key.into(), iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(body)
            .map_err(|_| CipherError::BadPadding)
    }
}
