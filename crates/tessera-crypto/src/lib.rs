pub mod address;
pub mod hash;
pub mod kdf;
pub mod keypair;
pub mod pow;

pub use address::{derive_address, security_check};
pub use hash::{sha256, sha256_concat};
pub use kdf::Kdf;
pub use keypair::{verify_signature, Keypair};
pub use pow::{hash_meets_difficulty, leading_zero_bits};
