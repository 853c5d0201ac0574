use ed25519_dalek::{Signature as DalekSig, Signer as DalekSigner, Verifier as DalekVerifier};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384, Sha512};
use tracing::debug;

use crate::consensus::types::Block;
use crate::crypto::keys::{self, DigestAlgorithm, KeyAlgorithm, Keypair, PublicKey, SignatureAlgorithm};
use crate::network::codec;
use crate::utils::{Result, SimplexError};

/// Algorithm names used by `LocalSigner`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    pub digest_algorithm: String,
    pub keypair_algorithm: String,
    pub signature_algorithm: String,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            digest_algorithm: "SHA-512".into(),
            keypair_algorithm: "Ed25519".into(),
            signature_algorithm: "Ed25519".into(),
        }
    }
}

/// Signing, verification and hashing capability consumed by the engines.
pub trait SignatureService: Send + Sync + 'static {
    /// Public half of the local keypair.
    fn public_key(&self) -> PublicKey;

    fn generate_key_pair(&self) -> Result<Keypair>;

    /// Sign with the local private key.
    fn generate_signature(&self, input: &[u8]) -> Result<Vec<u8>>;

    /// `Ok(false)` for a well-formed signature that does not verify;
    /// `Err(Security)` when the key or signature bytes are malformed.
    fn verify_signature(&self, input: &[u8], signature: &[u8], public_key: &PublicKey) -> Result<bool>;

    /// Lowercase hex digest.
    fn compute_bytes_hash(&self, input: &[u8]) -> Result<String>;

    fn public_key_from_bytes(&self, bytes: &[u8]) -> Result<PublicKey>;
}

impl dyn SignatureService {
    /// Hash of the block's canonical JSON encoding.
    pub fn compute_block_hash<T: Serialize>(&self, block: &Block<T>) -> Result<String> {
        let input = codec::to_bytes(block)
            .map_err(|e| SimplexError::IllegalState(format!("Error when computing block hash: {e}")))?;
        self.compute_bytes_hash(&input)
    }
}

/// Ed25519 signer holding the local node's keypair.
///
/// The keypair algorithm is checked when the signer is built; digest and
/// signature algorithm names are only checked when first used.
pub struct LocalSigner {
    keypair: Keypair,
    key_algorithm: KeyAlgorithm,
    digest_algorithm: String,
    signature_algorithm: String,
}

impl LocalSigner {
    pub fn new(config: &CryptoConfig) -> Result<Self> {
        let key_algorithm: KeyAlgorithm = config.keypair_algorithm.parse()?;
        let keypair = generate(key_algorithm);
        Ok(Self {
            keypair,
            key_algorithm,
            digest_algorithm: config.digest_algorithm.clone(),
            signature_algorithm: config.signature_algorithm.clone(),
        })
    }

    /// Build around an existing keypair (e.g. one loaded from disk).
    pub fn with_keypair(config: &CryptoConfig, keypair: Keypair) -> Result<Self> {
        let key_algorithm: KeyAlgorithm = config.keypair_algorithm.parse()?;
        Ok(Self {
            keypair,
            key_algorithm,
            digest_algorithm: config.digest_algorithm.clone(),
            signature_algorithm: config.signature_algorithm.clone(),
        })
    }
}

impl Default for LocalSigner {
    fn default() -> Self {
        let config = CryptoConfig::default();
        Self {
            keypair: Keypair::generate(),
            key_algorithm: KeyAlgorithm::Ed25519,
            digest_algorithm: config.digest_algorithm,
            signature_algorithm: config.signature_algorithm,
        }
    }
}

fn generate(algorithm: KeyAlgorithm) -> Keypair {
    match algorithm {
        KeyAlgorithm::Ed25519 => Keypair::generate(),
    }
}

impl SignatureService for LocalSigner {
    fn public_key(&self) -> PublicKey {
        self.keypair.public()
    }

    fn generate_key_pair(&self) -> Result<Keypair> {
        Ok(generate(self.key_algorithm))
    }

    fn generate_signature(&self, input: &[u8]) -> Result<Vec<u8>> {
        match SignatureAlgorithm::for_signing(&self.signature_algorithm)? {
            SignatureAlgorithm::Ed25519 => {
                let sig: DalekSig = self.keypair.signing_key().sign(input);
                Ok(sig.to_bytes().to_vec())
            }
        }
    }

    fn verify_signature(&self, input: &[u8], signature: &[u8], public_key: &PublicKey) -> Result<bool> {
        match SignatureAlgorithm::for_verifying(&self.signature_algorithm)? {
            SignatureAlgorithm::Ed25519 => {
                let pk = keys::verifying_key(public_key)
                    .map_err(|e| SimplexError::Security(format!("malformed public key: {e}")))?;
                let sig = DalekSig::from_slice(signature)
                    .map_err(|e| SimplexError::Security(format!("malformed signature: {e}")))?;
                match pk.verify(input, &sig) {
                    Ok(()) => Ok(true),
                    Err(e) => {
                        debug!("signature verification failed: {}", e);
                        Ok(false)
                    }
                }
            }
        }
    }

    fn compute_bytes_hash(&self, input: &[u8]) -> Result<String> {
        let algorithm: DigestAlgorithm = self.digest_algorithm.parse()?;
        let digest = match algorithm {
            DigestAlgorithm::Sha256 => hex::encode(Sha256::digest(input)),
            DigestAlgorithm::Sha384 => hex::encode(Sha384::digest(input)),
            DigestAlgorithm::Sha512 => hex::encode(Sha512::digest(input)),
            DigestAlgorithm::Blake3 => blake3::hash(input).to_hex().to_string(),
        };
        Ok(digest)
    }

    fn public_key_from_bytes(&self, bytes: &[u8]) -> Result<PublicKey> {
        let malformed = || {
            SimplexError::IllegalState("Could not convert encoded public key to a public key instance".into())
        };
        let key = PublicKey::from_slice(bytes).ok_or_else(malformed)?;
        match self.key_algorithm {
            KeyAlgorithm::Ed25519 => keys::verifying_key(&key).map_err(|_| malformed())?,
        };
        Ok(key)
    }
}
