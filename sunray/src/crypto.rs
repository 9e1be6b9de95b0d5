//! AES-128-GCM opener for encrypted input messages.
//!
//! The wire order inside an input message is tag first, then ciphertext.
//! Both sides ratchet the IV to the final 16 bytes of the tagged cipher
//! whenever the message is long enough, so a lost or forged message
//! desynchronizes the stream and every later open fails.

use aes_gcm::AesGcm;
use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes128;

use crate::error::{Error, Result};

pub const KEY_LEN: usize = 16;
pub const IV_LEN: usize = 16;
pub const TAG_LEN: usize = 16;

// Shorter tagged ciphers keep the previous IV.
const RATCHET_MIN_LEN: usize = TAG_LEN + IV_LEN;

type Cipher = AesGcm<Aes128, U16>;
type Nonce = aes_gcm::Nonce<U16>;

pub struct InputCipher {
    cipher: Cipher,
    iv: [u8; IV_LEN],
}

impl InputCipher {
    /// Key and initial IV come from the session credentials negotiated out
    /// of band.
    pub fn new(key: [u8; KEY_LEN], iv: [u8; IV_LEN]) -> Self {
        let cipher = Cipher::new(aes_gcm::Key::<Cipher>::from_slice(&key));
        InputCipher { cipher, iv }
    }

    /// Verifies and decrypts one tagged cipher, then ratchets the IV. A
    /// failed open leaves the IV untouched.
    pub fn open(&mut self, tagged_cipher: &[u8]) -> Result<Vec<u8>> {
        if tagged_cipher.len() < TAG_LEN {
            return Err(Error::ErrInputAuthFailed);
        }
        let (tag, ciphertext) = tagged_cipher.split_at(TAG_LEN);
        // The aead crate wants ciphertext || tag.
        let mut sealed = Vec::with_capacity(tagged_cipher.len());
        sealed.extend_from_slice(ciphertext);
        sealed.extend_from_slice(tag);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&self.iv), sealed.as_slice())
            .map_err(|_| Error::ErrInputAuthFailed)?;
        self.ratchet(tagged_cipher);
        Ok(plaintext)
    }

    /// Encrypts one plaintext into wire order. Mirrors `open` so a peer
    /// built on the same type stays IV-synchronized.
    pub fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&self.iv), plaintext)
            .map_err(|_| Error::ErrInputAuthFailed)?;
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);
        let mut tagged_cipher = Vec::with_capacity(sealed.len());
        tagged_cipher.extend_from_slice(tag);
        tagged_cipher.extend_from_slice(ciphertext);
        self.ratchet(&tagged_cipher);
        Ok(tagged_cipher)
    }

    fn ratchet(&mut self, tagged_cipher: &[u8]) {
        if tagged_cipher.len() >= RATCHET_MIN_LEN {
            self.iv
                .copy_from_slice(&tagged_cipher[tagged_cipher.len() - IV_LEN..]);
        }
    }
}
