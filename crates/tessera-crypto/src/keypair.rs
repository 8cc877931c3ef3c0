use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use tessera_core::TesseraError;

/// An Ed25519 keypair derived deterministically from a 32-byte seed.
///
/// The signing key zeroizes its secret material on drop.
#[derive(Clone)]
pub struct Keypair {
    signing: SigningKey,
    public: VerifyingKey,
}

impl Keypair {
    /// Derive from a 32-byte seed. The same seed always yields the same keys.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let signing = SigningKey::from_bytes(&seed);
        let public = signing.verifying_key();
        Self { signing, public }
    }

    pub fn public_bytes(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    pub fn public_hex(&self) -> String {
        hex::encode(self.public.to_bytes())
    }

    /// Sign `message`, returning the 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signing.sign(message).to_bytes().to_vec()
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Keypair({}…)", &self.public_hex()[..12])
    }
}

/// Verify an Ed25519 signature. Any parse failure or mismatch maps to
/// `InvalidSignature`.
pub fn verify_signature(
    pubkey: &[u8],
    message: &[u8],
    signature: &[u8],
) -> Result<(), TesseraError> {
    let pk_bytes: [u8; 32] = pubkey
        .try_into()
        .map_err(|_| TesseraError::InvalidSignature)?;
    let key = VerifyingKey::from_bytes(&pk_bytes).map_err(|_| TesseraError::InvalidSignature)?;
    let sig = Signature::from_slice(signature).map_err(|_| TesseraError::InvalidSignature)?;
    key.verify(message, &sig)
        .map_err(|_| TesseraError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_derivation_is_deterministic() {
        let a = Keypair::from_seed([7u8; 32]);
        let b = Keypair::from_seed([7u8; 32]);
        assert_eq!(a.public_bytes(), b.public_bytes());

        let c = Keypair::from_seed([8u8; 32]);
        assert_ne!(a.public_bytes(), c.public_bytes());
    }

    #[test]
    fn sign_verify_round_trip() {
        let kp = Keypair::from_seed([1u8; 32]);
        let sig = kp.sign(b"message");
        assert!(verify_signature(&kp.public_bytes(), b"message", &sig).is_ok());
        assert!(verify_signature(&kp.public_bytes(), b"other", &sig).is_err());
    }

    #[test]
    fn garbage_inputs_are_invalid_signature() {
        let kp = Keypair::from_seed([1u8; 32]);
        let sig = kp.sign(b"message");
        assert!(matches!(
            verify_signature(&[0u8; 5], b"message", &sig),
            Err(TesseraError::InvalidSignature)
        ));
        assert!(matches!(
            verify_signature(&kp.public_bytes(), b"message", &[0u8; 3]),
            Err(TesseraError::InvalidSignature)
        ));
    }
}
