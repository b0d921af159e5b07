//! Transaction submission: nonce serialization and signed broadcast

pub mod nonce;
pub mod sender;

pub use nonce::NonceManager;
pub use sender::{Submitter, TransactionSender};
