//! Crypto module: key management, signing, verification, hashing.
//!
//! - Keys: generation, encoded public keys, algorithm names
//! - Sign: the `SignatureService` capability and its Ed25519 implementation

pub mod keys;
pub mod sign;

pub use keys::{Keypair, PublicKey, DigestAlgorithm, KeyAlgorithm, SignatureAlgorithm};
pub use sign::{CryptoConfig, LocalSigner, SignatureService};
