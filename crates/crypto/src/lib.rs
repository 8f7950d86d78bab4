//! Symmetric frame cipher.
//!
//! AES-128 in CBC mode with PKCS#7 padding and a random IV prepended to
//! the ciphertext. No per-frame MAC: the threat model is passive
//! observation of mining traffic, and a MAC would add overhead the
//! original wire protocol never paid for.

mod cipher;

pub use cipher::*;
