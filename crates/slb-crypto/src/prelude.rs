//! Prelude module - commonly used types for convenient import.
//!
//! Use `use slb_crypto::prelude::*;` to import all essential types.

pub use crate::{CryptoError, CryptoResult};

pub use crate::{Mac, SessionKey};

pub use crate::ContentHash;
