mod connection;
mod id;
mod provider;
mod transaction;

pub use connection::{AccountType, BankConnection, Ciphertext};
pub use id::Id;
pub use provider::Provider;
pub use transaction::{Category, Direction, Transaction};
