// chain-types/src/lib.rs

//! Chain-level data structures consumed by the consensus and networking
//! crates: blocks, transactions, world state, and the pending-transaction
//! pool.
//!
//! State trie commitments, EVM execution, receipt storage, and fork/reorg
//! resolution are out of scope for this crate; `WorldState` only tracks
//! the balance/stake bookkeeping the staking module needs.

pub mod block;
pub mod chain;
pub mod mempool;
pub mod state;
pub mod transaction;
pub mod types;

pub use block::{Block, BlockHeader};
pub use chain::Blockchain;
pub use mempool::{PoolConfig, PoolMetrics, TransactionPool};
pub use state::{Account, WorldState};
pub use transaction::{Transaction, TransactionReceipt, TransactionType};
pub use types::*;

use crypto::Hash;

/// Result type for chain-level operations
pub type ChainResult<T> = Result<T, ChainError>;

/// Errors that can occur in chain-level operations
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("Invalid chain: {0}")]
    InvalidChain(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Insufficient balance")]
    InsufficientBalance,

    #[error("Nonce mismatch")]
    NonceMismatch,

    #[error("Block not found: {0}")]
    BlockNotFound(Hash),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(Hash),

    #[error("Cryptographic error: {0}")]
    CryptoError(#[from] crypto::CryptoError),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Duplicate transaction: {0}")]
    DuplicateTransaction(Hash),

    #[error("Transaction pool full")]
    PoolFull,

    #[error("Invalid signature")]
    InvalidSignature,
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_basic_imports() {}
}
