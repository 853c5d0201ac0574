use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::utils::{Result, SimplexError};

/// Length of an encoded Ed25519 public key.
pub const PUBLIC_KEY_LENGTH: usize = 32;

/// Encoded public key. A plain value type: copies never alias.
///
/// The bytes are only checked for length on construction; curve validity is
/// checked by `SignatureService::public_key_from_bytes` and again on every
/// verification.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; PUBLIC_KEY_LENGTH]);

impl PublicKey {
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; PUBLIC_KEY_LENGTH] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_LENGTH] {
        self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

/// Local signing keypair.
#[derive(Clone)]
pub struct Keypair {
    signing: SigningKey,
}

impl Keypair {
    /// Generate a new random keypair
    pub fn generate() -> Self {
        Self { signing: SigningKey::generate(&mut OsRng) }
    }

    /// Construct from raw secret bytes
    pub fn from_secret_bytes(secret: &[u8]) -> Result<Self> {
        let arr: [u8; 32] = secret
            .try_into()
            .map_err(|_| SimplexError::IllegalState("secret key must be 32 bytes".into()))?;
        Ok(Self { signing: SigningKey::from_bytes(&arr) })
    }

    /// Get public key
    pub fn public(&self) -> PublicKey {
        PublicKey(self.signing.verifying_key().to_bytes())
    }

    /// Export secret as bytes
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing.to_bytes()
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair").field("public", &self.public()).finish_non_exhaustive()
    }
}

/// Decode and curve-check an encoded public key.
pub(crate) fn verifying_key(key: &PublicKey) -> std::result::Result<VerifyingKey, ed25519_dalek::SignatureError> {
    VerifyingKey::from_bytes(&key.0)
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '-' && *c != '_')
        .collect::<String>()
        .to_ascii_uppercase()
}

/// Message digest algorithms available for hashing blocks and bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Sha256,
    Sha384,
    Sha512,
    Blake3,
}

impl FromStr for DigestAlgorithm {
    type Err = SimplexError;

    fn from_str(s: &str) -> Result<Self> {
        match normalize(s).as_str() {
            "SHA256" => Ok(Self::Sha256),
            "SHA384" => Ok(Self::Sha384),
            "SHA512" => Ok(Self::Sha512),
            "BLAKE3" => Ok(Self::Blake3),
            _ => Err(SimplexError::IllegalState(format!("{s} algorithm not available"))),
        }
    }
}

/// Keypair generation algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    Ed25519,
}

impl FromStr for KeyAlgorithm {
    type Err = SimplexError;

    fn from_str(s: &str) -> Result<Self> {
        match normalize(s).as_str() {
            "ED25519" => Ok(Self::Ed25519),
            _ => Err(SimplexError::IllegalState(format!(
                "Could not generate a key pair for cryptographic operations: {s} algorithm not available"
            ))),
        }
    }
}

/// Signature algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    Ed25519,
}

impl SignatureAlgorithm {
    /// Parse for signing; failures surface as `Signing`.
    pub fn for_signing(s: &str) -> Result<Self> {
        Self::parse(s).ok_or_else(|| {
            SimplexError::Signing(format!("Unexpected error when generating a signature: {s} algorithm not available"))
        })
    }

    /// Parse for verification; failures surface as `Security`.
    pub fn for_verifying(s: &str) -> Result<Self> {
        Self::parse(s).ok_or_else(|| SimplexError::Security(format!("{s} algorithm not available")))
    }

    fn parse(s: &str) -> Option<Self> {
        match normalize(s).as_str() {
            "ED25519" => Some(Self::Ed25519),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_roundtrip_secret() {
        let kp = Keypair::generate();
        let restored = Keypair::from_secret_bytes(&kp.secret_bytes()).unwrap();
        assert_eq!(kp.public(), restored.public());
    }

    #[test]
    fn test_public_key_from_slice_checks_length() {
        assert!(PublicKey::from_slice(&[1u8; 31]).is_none());
        assert!(PublicKey::from_slice(&[1u8; 32]).is_some());
    }

    #[test]
    fn test_algorithm_names() {
        assert_eq!("SHA-512".parse::<DigestAlgorithm>().unwrap(), DigestAlgorithm::Sha512);
        assert_eq!("sha256".parse::<DigestAlgorithm>().unwrap(), DigestAlgorithm::Sha256);
        assert_eq!("BLAKE3".parse::<DigestAlgorithm>().unwrap(), DigestAlgorithm::Blake3);
        assert!("MD5".parse::<DigestAlgorithm>().is_err());
        assert_eq!("Ed25519".parse::<KeyAlgorithm>().unwrap(), KeyAlgorithm::Ed25519);
        assert!(matches!("EC".parse::<KeyAlgorithm>(), Err(SimplexError::IllegalState(_))));
        assert!(matches!(SignatureAlgorithm::for_signing("ECDSA"), Err(SimplexError::Signing(_))));
        assert!(matches!(SignatureAlgorithm::for_verifying("ECDSA"), Err(SimplexError::Security(_))));
    }
}
