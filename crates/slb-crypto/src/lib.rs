//! SLB Crypto - session authentication primitives.
//!
//! This crate provides:
//! - [`SessionKey`]: per-session secret, zeroized on drop, never printed by `Debug`
//! - [`Mac`]: keyed BLAKE3 message authentication codes over review payloads,
//!   verified in constant time
//! - [`ContentHash`]: BLAKE3 hashing for the audit chain
//!
//! # Example
//!
//! ```
//! use slb_crypto::{ContentHash, SessionKey};
//!
//! let key = SessionKey::generate();
//! let mac = key.sign(b"req|approve");
//! assert!(key.verify(b"req|approve", &mac).is_ok());
//! assert!(key.verify(b"req|reject", &mac).is_err());
//!
//! let hash = ContentHash::hash(b"entry");
//! println!("Hash: {}", hash.to_hex());
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod error;
mod hash;
mod session_key;

pub use error::{CryptoError, CryptoResult};
pub use hash::ContentHash;
pub use session_key::{Mac, SessionKey};
