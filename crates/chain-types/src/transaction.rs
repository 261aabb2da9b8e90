// chain-types/src/transaction.rs

use crate::{types::*, ChainError, ChainResult};
use crypto::{hash::Hashable, Address, Hash, PublicKey, Signature};
use serde::{Deserialize, Serialize};

/// Transaction types recognized at the chain boundary.
///
/// The staking-module variants are the ones `ABCIAdapter::deliver_tx` routes
/// into the validator-set state machine by inspecting `tx_type` directly
/// (in a production chain this routing would instead inspect a `target`
/// address and leave tx bodies opaque, but the distinction is cosmetic for
/// this core). `Opaque` stands in for everything else a full node would
/// execute (transfers through the EVM, contract calls, ...) which is out of
/// scope here; the adapter passes it through unexamined.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TransactionType {
    /// Standard token transfer
    Transfer { to: Address, amount: Amount },
    /// Bond tokens and register as a validator
    Stake {
        pub_key: Vec<u8>,
        amount: StakeAmount,
        commission_rate: u16,
    },
    /// Fully unbond and remove a validator
    Unstake,
    /// Delegate stake to a validator
    Delegate { validator: Address, amount: StakeAmount },
    /// Withdraw a delegation
    Undelegate { validator: Address, amount: StakeAmount },
    /// Move a delegation from one validator to another
    Redelegate {
        from_validator: Address,
        to_validator: Address,
        amount: StakeAmount,
    },
    /// Claim accumulated staking rewards
    ClaimRewards { validator: Address },
    /// Anything outside the staking module (EVM calls, contract deploys, ...)
    Opaque { target: Address, data: Vec<u8> },
}

/// Complete transaction structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Sender's address
    pub from: Address,
    /// Transaction nonce (prevents replay attacks)
    pub nonce: Nonce,
    /// Type of transaction
    pub tx_type: TransactionType,
    /// Gas price willing to pay
    pub gas_price: GasPrice,
    /// Maximum gas to consume
    pub gas_limit: Gas,
    /// Transaction timestamp
    pub timestamp: Timestamp,
    /// Digital signature
    pub signature: Option<Signature>,
}

impl Transaction {
    /// Create a new unsigned transaction
    pub fn new(
        from: Address,
        nonce: Nonce,
        tx_type: TransactionType,
        gas_price: GasPrice,
        gas_limit: Gas,
    ) -> Self {
        Self {
            from,
            nonce,
            tx_type,
            gas_price,
            gas_limit,
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_secs(),
            signature: None,
        }
    }

    /// Sign the transaction
    pub fn sign(&mut self, keypair: &crypto::KeyPair) -> ChainResult<()> {
        let hash = self.hash_for_signing();
        let signature = keypair.sign(hash.as_bytes())?;
        self.signature = Some(signature);
        Ok(())
    }

    /// Verify transaction signature
    pub fn verify_signature(&self, public_key: &PublicKey) -> ChainResult<bool> {
        let signature = self
            .signature
            .as_ref()
            .ok_or(ChainError::InvalidTransaction("Missing signature".into()))?;

        let hash = self.hash_for_signing();
        Ok(public_key.verify(hash.as_bytes(), signature)?)
    }

    /// Calculate transaction hash
    pub fn hash(&self) -> Hash {
        let bytes = bincode::serialize(self).unwrap();
        bytes.hash()
    }

    /// Hash used for signing (excludes signature field)
    fn hash_for_signing(&self) -> Hash {
        let mut tx_copy = self.clone();
        tx_copy.signature = None;
        let bytes = bincode::serialize(&tx_copy).unwrap();
        bytes.hash()
    }

    /// Calculate transaction fee
    pub fn calculate_fee(&self, gas_used: Gas) -> Amount {
        Amount::from_u64(gas_used * self.gas_price)
    }

    /// True if this transaction belongs to the staking module and should be
    /// routed to the validator-set state machine rather than executed
    /// opaquely.
    pub fn is_staking_tx(&self) -> bool {
        !matches!(self.tx_type, TransactionType::Transfer { .. } | TransactionType::Opaque { .. })
    }

    /// Validate basic transaction properties
    pub fn validate_basic(&self) -> ChainResult<()> {
        if self.signature.is_none() {
            return Err(ChainError::InvalidTransaction("Missing signature".into()));
        }

        if self.gas_limit == 0 {
            return Err(ChainError::InvalidTransaction("Gas limit cannot be zero".into()));
        }

        if self.gas_price == 0 {
            return Err(ChainError::InvalidTransaction("Gas price cannot be zero".into()));
        }

        match &self.tx_type {
            TransactionType::Transfer { amount, .. } => {
                if amount.is_zero() {
                    return Err(ChainError::InvalidTransaction("Transfer amount cannot be zero".into()));
                }
            }
            TransactionType::Stake { amount, commission_rate, .. } => {
                if amount.is_zero() {
                    return Err(ChainError::InvalidTransaction("Stake amount cannot be zero".into()));
                }
                if *commission_rate > 10_000 {
                    return Err(ChainError::InvalidTransaction("Commission rate exceeds 100%".into()));
                }
            }
            TransactionType::Delegate { amount, .. } | TransactionType::Undelegate { amount, .. } => {
                if amount.is_zero() {
                    return Err(ChainError::InvalidTransaction("Delegation amount cannot be zero".into()));
                }
            }
            TransactionType::Redelegate { amount, from_validator, to_validator, .. } => {
                if amount.is_zero() {
                    return Err(ChainError::InvalidTransaction("Redelegation amount cannot be zero".into()));
                }
                if from_validator == to_validator {
                    return Err(ChainError::InvalidTransaction("Redelegation source and destination are identical".into()));
                }
            }
            TransactionType::Unstake | TransactionType::ClaimRewards { .. } => {}
            TransactionType::Opaque { data, .. } => {
                if data.is_empty() {
                    return Err(ChainError::InvalidTransaction("Opaque payload cannot be empty".into()));
                }
            }
        }

        Ok(())
    }

    /// Get the recipient/target address, if applicable
    pub fn recipient(&self) -> Option<Address> {
        match &self.tx_type {
            TransactionType::Transfer { to, .. } => Some(*to),
            TransactionType::Opaque { target, .. } => Some(*target),
            _ => None,
        }
    }

    /// Get transaction value, if applicable
    pub fn value(&self) -> Amount {
        match &self.tx_type {
            TransactionType::Transfer { amount, .. } => amount.clone(),
            TransactionType::Stake { amount, .. } => amount.clone(),
            TransactionType::Delegate { amount, .. } => amount.clone(),
            TransactionType::Undelegate { amount, .. } => amount.clone(),
            TransactionType::Redelegate { amount, .. } => amount.clone(),
            _ => Amount::zero(),
        }
    }
}

/// Transaction receipt after execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionReceipt {
    /// Transaction hash
    pub tx_hash: Hash,
    /// Block number where included
    pub block_number: BlockNumber,
    /// Sender address
    pub from: Address,
    /// Recipient address (if applicable)
    pub to: Option<Address>,
    /// Gas used
    pub gas_used: Gas,
    /// Execution status
    pub status: ExecutionStatus,
    /// Logs generated
    pub logs: Vec<Log>,
}

/// Execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Success,
    Failed,
    Reverted,
}

/// Event log emitted during execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<Hash>,
    pub data: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crypto::{KeyPair, SignatureScheme};

    #[test]
    fn test_transaction_creation() {
        let from = Address::zero();
        let to = Address::zero();
        let tx = Transaction::new(
            from,
            1,
            TransactionType::Transfer { to, amount: Amount::from_u64(100) },
            10,
            21000,
        );

        assert_eq!(tx.nonce, 1);
        assert_eq!(tx.gas_limit, 21000);
        assert!(!tx.is_staking_tx());
    }

    #[test]
    fn test_staking_tx_classification() {
        let tx = Transaction::new(
            Address::zero(),
            0,
            TransactionType::Delegate { validator: Address::zero(), amount: StakeAmount::from_u64(1) },
            1,
            1,
        );
        assert!(tx.is_staking_tx());
    }

    #[test]
    fn test_transaction_signing() {
        let keypair = KeyPair::generate(SignatureScheme::Ed25519).unwrap();
        let from = keypair.public_key().to_address();

        let mut tx = Transaction::new(
            from,
            1,
            TransactionType::Transfer { to: Address::zero(), amount: Amount::from_u64(100) },
            10,
            21000,
        );

        tx.sign(&keypair).unwrap();
        assert!(tx.signature.is_some());
        assert!(tx.verify_signature(keypair.public_key()).unwrap());
    }

    #[test]
    fn test_transaction_validation() {
        let keypair = KeyPair::generate(SignatureScheme::Ed25519).unwrap();
        let from = keypair.public_key().to_address();

        let mut tx = Transaction::new(
            from,
            1,
            TransactionType::Transfer { to: Address::zero(), amount: Amount::from_u64(100) },
            10,
            21000,
        );

        assert!(tx.validate_basic().is_err());

        tx.sign(&keypair).unwrap();
        assert!(tx.validate_basic().is_ok());
    }
}
