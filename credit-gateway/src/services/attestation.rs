//! Input Proof Signing
//!
//! Signs the aggregate proof that binds a batch of ciphertext handles to one
//! (chain, contract, user) triple. The mock coprocessor signs with this key
//! and the dev chain verifies with its public half, the same way the
//! on-chain input verifier checks coprocessor signatures.
//!
//! Wire layout of a proof:
//!
//! ```text
//! num_handles (1) || num_signers (1) || handles (32 * n) || signatures (64 * m)
//! ```

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::types::{decode_hex, Address, ChainId, CiphertextHandle};

const SIGNATURE_LEN: usize = 64;
const HANDLE_LEN: usize = 32;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttestationError {
    #[error("invalid verifier key: {0}")]
    InvalidKey(String),
    #[error("malformed input proof: {0}")]
    Malformed(String),
    #[error("input proof handles do not match the submitted handles")]
    HandleMismatch,
    #[error("input proof signature does not verify for this chain, contract and user")]
    BadSignature,
}

/// The triple a proof is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProofBinding {
    pub chain_id: ChainId,
    pub contract: Address,
    pub user: Address,
}

/// Decoded input proof
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputProof {
    pub handles: Vec<CiphertextHandle>,
    pub signatures: Vec<[u8; SIGNATURE_LEN]>,
}

impl InputProof {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            2 + self.handles.len() * HANDLE_LEN + self.signatures.len() * SIGNATURE_LEN,
        );
        out.push(self.handles.len() as u8);
        out.push(self.signatures.len() as u8);
        for handle in &self.handles {
            out.extend_from_slice(handle.as_bytes());
        }
        for signature in &self.signatures {
            out.extend_from_slice(signature);
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, AttestationError> {
        let (&num_handles, rest) = bytes
            .split_first()
            .ok_or_else(|| AttestationError::Malformed("empty proof".into()))?;
        let (&num_signers, rest) = rest
            .split_first()
            .ok_or_else(|| AttestationError::Malformed("missing signer count".into()))?;

        let handles_len = num_handles as usize * HANDLE_LEN;
        let expected = handles_len + num_signers as usize * SIGNATURE_LEN;
        if rest.len() != expected {
            return Err(AttestationError::Malformed(format!(
                "expected {expected} body bytes, got {}",
                rest.len()
            )));
        }

        let (handle_bytes, signature_bytes) = rest.split_at(handles_len);
        let handles = handle_bytes
            .chunks_exact(HANDLE_LEN)
            .map(|chunk| {
                let mut handle = [0u8; HANDLE_LEN];
                handle.copy_from_slice(chunk);
                CiphertextHandle(handle)
            })
            .collect();
        let signatures = signature_bytes
            .chunks_exact(SIGNATURE_LEN)
            .map(|chunk| {
                let mut signature = [0u8; SIGNATURE_LEN];
                signature.copy_from_slice(chunk);
                signature
            })
            .collect();

        Ok(Self {
            handles,
            signatures,
        })
    }
}

/// Input verifier signing service
pub struct InputVerifierSigner {
    /// Coprocessor signing key (Ed25519)
    signing_key: SigningKey,
}

impl InputVerifierSigner {
    /// Create a new signer
    pub fn new(secret_key_bytes: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(secret_key_bytes),
        }
    }

    /// Load from a hex secret, or generate a random key for development
    pub fn from_hex(secret_hex: Option<&str>) -> Result<Self, AttestationError> {
        let secret_bytes: [u8; 32] = match secret_hex {
            Some(secret) => decode_hex(secret)
                .map_err(|e| AttestationError::InvalidKey(format!("invalid secret key hex: {e}")))?
                .try_into()
                .map_err(|_| AttestationError::InvalidKey("secret key must be 32 bytes".into()))?,
            None => rand::random(),
        };

        Ok(Self::new(&secret_bytes))
    }

    /// Get the verifier public key
    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Produce the aggregate proof for a batch of handles
    pub fn sign(&self, binding: &ProofBinding, handles: &[CiphertextHandle]) -> InputProof {
        let digest = Self::binding_digest(binding, handles);
        let signature = self.signing_key.sign(&digest);

        InputProof {
            handles: handles.to_vec(),
            signatures: vec![signature.to_bytes()],
        }
    }

    /// Digest covering the binding triple and every handle, in order
    fn binding_digest(binding: &ProofBinding, handles: &[CiphertextHandle]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(b"credit-gateway:input-proof:v1");
        hasher.update(binding.chain_id.to_be_bytes());
        hasher.update(binding.contract.as_bytes());
        hasher.update(binding.user.as_bytes());
        hasher.update([handles.len() as u8]);
        for handle in handles {
            hasher.update(handle.as_bytes());
        }
        hasher.finalize().into()
    }

    /// Check an encoded proof against the submitted handles and binding
    pub fn verify(
        public_key: &[u8; 32],
        proof: &[u8],
        binding: &ProofBinding,
        submitted: &[CiphertextHandle],
    ) -> Result<(), AttestationError> {
        let verifying_key = VerifyingKey::from_bytes(public_key)
            .map_err(|e| AttestationError::InvalidKey(e.to_string()))?;
        let decoded = InputProof::decode(proof)?;

        if decoded.handles != submitted {
            return Err(AttestationError::HandleMismatch);
        }

        let digest = Self::binding_digest(binding, &decoded.handles);
        let verified = decoded.signatures.iter().any(|bytes| {
            let signature = Signature::from_bytes(bytes);
            verifying_key.verify(&digest, &signature).is_ok()
        });

        if verified {
            Ok(())
        } else {
            Err(AttestationError::BadSignature)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding() -> ProofBinding {
        ProofBinding {
            chain_id: 31337,
            contract: Address([0xcc; 20]),
            user: Address([0xaa; 20]),
        }
    }

    fn handles() -> Vec<CiphertextHandle> {
        (0..6u8).map(|i| CiphertextHandle([i; 32])).collect()
    }

    #[test]
    fn test_sign_and_verify_proof() {
        let signer = InputVerifierSigner::new(&[1u8; 32]);
        let proof = signer.sign(&binding(), &handles()).encode();

        assert_eq!(proof.len(), 2 + 6 * 32 + 64);
        assert_eq!(
            InputVerifierSigner::verify(&signer.public_key(), &proof, &binding(), &handles()),
            Ok(())
        );
    }

    #[test]
    fn test_proof_is_bound_to_user_and_contract() {
        let signer = InputVerifierSigner::new(&[1u8; 32]);
        let proof = signer.sign(&binding(), &handles()).encode();

        let other_user = ProofBinding {
            user: Address([0xbb; 20]),
            ..binding()
        };
        assert_eq!(
            InputVerifierSigner::verify(&signer.public_key(), &proof, &other_user, &handles()),
            Err(AttestationError::BadSignature)
        );

        let other_contract = ProofBinding {
            contract: Address([0xdd; 20]),
            ..binding()
        };
        assert_eq!(
            InputVerifierSigner::verify(&signer.public_key(), &proof, &other_contract, &handles()),
            Err(AttestationError::BadSignature)
        );
    }

    #[test]
    fn test_reordered_handles_are_rejected() {
        let signer = InputVerifierSigner::new(&[1u8; 32]);
        let proof = signer.sign(&binding(), &handles()).encode();

        let mut swapped = handles();
        swapped.swap(0, 1);
        assert_eq!(
            InputVerifierSigner::verify(&signer.public_key(), &proof, &binding(), &swapped),
            Err(AttestationError::HandleMismatch)
        );
    }

    #[test]
    fn test_truncated_proof_is_malformed() {
        let signer = InputVerifierSigner::new(&[1u8; 32]);
        let proof = signer.sign(&binding(), &handles()).encode();

        assert!(matches!(
            InputProof::decode(&proof[..proof.len() - 1]),
            Err(AttestationError::Malformed(_))
        ));
        assert!(matches!(InputProof::decode(&[]), Err(AttestationError::Malformed(_))));
    }

    #[test]
    fn test_consistent_public_key() {
        let signer = InputVerifierSigner::new(&[42u8; 32]);
        assert_eq!(signer.public_key(), signer.public_key());

        let from_hex = InputVerifierSigner::from_hex(Some(&hex::encode([42u8; 32]))).unwrap();
        assert_eq!(from_hex.public_key(), signer.public_key());
        assert!(InputVerifierSigner::from_hex(Some("0x1234")).is_err());
    }
}
