//! Per-session secret keys and the MACs they produce.
//!
//! A session key is 32 random bytes shown to the agent once at registration.
//! Reviews are signed with a keyed BLAKE3 MAC. Every comparison of secret
//! material goes through `subtle` so timing does not leak matching prefixes.

use rand::RngCore;
use rand::rngs::OsRng;
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CryptoError, CryptoResult};

const KEY_LEN: usize = 32;
const MAC_LEN: usize = 32;

/// A session's secret key.
///
/// Zeroized on drop. `Debug` never prints the key material.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; KEY_LEN]);

impl SessionKey {
    /// Generate a fresh random key from the OS RNG.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKeyLength`] if the slice is not 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != KEY_LEN {
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_LEN,
                actual: bytes.len(),
            });
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    /// Decode a hex-encoded key as printed at registration.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidHexEncoding`] or
    /// [`CryptoError::InvalidKeyLength`].
    pub fn from_hex(s: &str) -> CryptoResult<Self> {
        let mut bytes = hex::decode(s.trim()).map_err(|_| CryptoError::InvalidHexEncoding)?;
        let key = Self::from_bytes(&bytes);
        bytes.zeroize();
        key
    }

    /// Hex encoding (sensitive: only for handing the key to its owner or storage).
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Constant-time check that `presented` is this key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyMismatch`] if the keys differ.
    pub fn verify_presented(&self, presented: &Self) -> CryptoResult<()> {
        if bool::from(self.0.ct_eq(&presented.0)) {
            Ok(())
        } else {
            Err(CryptoError::KeyMismatch)
        }
    }

    /// MAC `message` under this key.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Mac {
        Mac(*blake3::keyed_hash(&self.0, message).as_bytes())
    }

    /// Verify `mac` over `message` in constant time.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::SignatureVerificationFailed`] on mismatch.
    pub fn verify(&self, message: &[u8], mac: &Mac) -> CryptoResult<()> {
        let expected = self.sign(message);
        if bool::from(expected.0.ct_eq(&mac.0)) {
            Ok(())
        } else {
            Err(CryptoError::SignatureVerificationFailed)
        }
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey([REDACTED])")
    }
}

/// A keyed BLAKE3 MAC.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Mac([u8; MAC_LEN]);

impl Mac {
    /// Hex encoding, as stored on review rows.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Decode from hex.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not 32 bytes of hex.
    pub fn from_hex(s: &str) -> CryptoResult<Self> {
        let bytes = hex::decode(s).map_err(|_| CryptoError::InvalidHexEncoding)?;
        let arr: [u8; MAC_LEN] =
            bytes
                .as_slice()
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: MAC_LEN,
                    actual: bytes.len(),
                })?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Mac({})", &self.to_hex()[..16])
    }
}
