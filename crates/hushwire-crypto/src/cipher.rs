//! AES-256-CTR stream cipher
//!
//! The counter block is the first 16 bytes of the message IV, big-endian.
//! Output length always equals input length.

use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;

use crate::kdf::DerivedKey;
use crate::keys::Iv;

type Aes256Ctr = Ctr128BE<Aes256>;

/// XOR the keystream for (`key`, `iv`) into `data` in place
pub fn apply_keystream(key: &DerivedKey<32>, iv: &Iv, data: &mut [u8]) {
    let block = iv.counter_block();
    let mut cipher = Aes256Ctr::new(key.as_bytes().into(), (&block).into());
    cipher.apply_keystream(data);
}

/// Encrypt `plaintext` into a new buffer
pub fn encrypt(key: &DerivedKey<32>, iv: &Iv, plaintext: &[u8]) -> Vec<u8> {
    let mut buf = plaintext.to_vec();
    apply_keystream(key, iv, &mut buf);
    buf
}

/// Decrypt `ciphertext` into a new buffer
pub fn decrypt(key: &DerivedKey<32>, iv: &Iv, ciphertext: &[u8]) -> Vec<u8> {
    encrypt(key, iv, ciphertext)
}
