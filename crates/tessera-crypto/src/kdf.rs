use argon2::{Algorithm, Argon2, Params, Version};

use tessera_core::constants::{ARGON_MEMORY_KIB, ARGON_PARALLELISM, ARGON_TIME_COST};
use tessera_core::params::Network;
use tessera_core::TesseraError;

/// Argon2id parameter profile.
///
/// `Protocol` carries the fixed consensus constants: every address on the
/// network is an image under exactly these parameters, so any deviation
/// produces addresses the rest of the network rejects. `Dev` is a fast
/// profile for tests and local tooling only.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KdfProfile {
    Protocol,
    Dev,
}

/// A memory-hard hasher bound to a profile at construction.
#[derive(Clone)]
pub struct Kdf {
    argon: Argon2<'static>,
    profile: KdfProfile,
}

impl Kdf {
    /// The protocol hasher. Valid on every network.
    pub fn protocol() -> Self {
        // Output length stays unpinned: address derivation takes 32 bytes,
        // wallet master-seed derivation 30, through the same hasher.
        let params = Params::new(ARGON_MEMORY_KIB, ARGON_TIME_COST, ARGON_PARALLELISM, None)
            .expect("protocol argon2 parameters are valid");
        Self {
            argon: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
            profile: KdfProfile::Protocol,
        }
    }

    /// Build a hasher for `profile` on `network`. The dev profile is
    /// rejected anywhere outside the `Dev` network label.
    pub fn new(profile: KdfProfile, network: Network) -> Result<Self, TesseraError> {
        match profile {
            KdfProfile::Protocol => Ok(Self::protocol()),
            KdfProfile::Dev => {
                if network != Network::Dev {
                    return Err(TesseraError::RuleViolation(
                        "dev argon2 profile is not permitted outside the dev network".into(),
                    ));
                }
                let params =
                    Params::new(8, 1, 1, None).expect("dev argon2 parameters are valid");
                Ok(Self {
                    argon: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
                    profile: KdfProfile::Dev,
                })
            }
        }
    }

    pub fn profile(&self) -> KdfProfile {
        self.profile
    }

    /// Argon2id of `password` under `salt`, producing `out_len` bytes.
    pub fn hash(&self, password: &[u8], salt: &[u8], out_len: usize) -> Result<Vec<u8>, TesseraError> {
        let mut out = vec![0u8; out_len];
        self.argon
            .hash_password_into(password, salt, &mut out)
            .map_err(|e| TesseraError::Malformed(format!("argon2: {e}")))?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::constants::ADDRESS_SALT;

    #[test]
    fn dev_profile_rejected_on_mainnet() {
        assert!(Kdf::new(KdfProfile::Dev, Network::Mainnet).is_err());
        assert!(Kdf::new(KdfProfile::Dev, Network::Testnet).is_err());
        assert!(Kdf::new(KdfProfile::Dev, Network::Dev).is_ok());
    }

    #[test]
    fn hash_is_deterministic() {
        let kdf = Kdf::new(KdfProfile::Dev, Network::Dev).unwrap();
        let a = kdf.hash(b"password", ADDRESS_SALT, 32).unwrap();
        let b = kdf.hash(b"password", ADDRESS_SALT, 32).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);

        let c = kdf.hash(b"passwore", ADDRESS_SALT, 32).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn output_length_respected() {
        let kdf = Kdf::new(KdfProfile::Dev, Network::Dev).unwrap();
        assert_eq!(kdf.hash(b"x", ADDRESS_SALT, 30).unwrap().len(), 30);
    }
}
