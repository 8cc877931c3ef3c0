use serde::{Deserialize, Serialize};

use tessera_core::types::Address;
use tessera_crypto::Keypair;

/// The persisted part of an account: enough to rederive the keys from the
/// wallet's master secret, never the keys themselves.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub address: Address,
    pub seed_modifier_hex: String,
}

/// A live account: the record plus the keypair rederived for this session.
#[derive(Debug)]
pub struct Account {
    pub record: AccountRecord,
    pub keypair: Keypair,
}

impl Account {
    pub fn address(&self) -> &Address {
        &self.record.address
    }
}
