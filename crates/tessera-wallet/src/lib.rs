pub mod account;
pub mod builder;
pub mod wallet;

pub use account::{Account, AccountRecord};
pub use builder::TransactionBuilder;
pub use wallet::Wallet;
