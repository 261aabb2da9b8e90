// consensus/src/adapter.rs

use crate::rewards::{self, RewardState};
use crate::slashing::SlashingManager;
use crate::validator::{ValidatorDescription, ValidatorSet};
use crate::{ConsensusError, ConsensusResult};
use chain_types::{Block, BlockNumber, StakeAmount};
use chain_types::transaction::{Transaction, TransactionType};
use crypto::Address;
use serde::{Deserialize, Serialize};

/// Consensus parameters handed down at genesis; these flow to the
/// application layer unexamined beyond the fields this core needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub block_max_bytes: u64,
    pub min_validator_stake: StakeAmount,
    pub max_validators: usize,
}

/// A genesis validator bond, as supplied to `InitChain`.
#[derive(Debug, Clone)]
pub struct GenesisValidator {
    pub operator: Address,
    pub pub_key: Vec<u8>,
    pub amount: StakeAmount,
    pub description: ValidatorDescription,
    pub commission: u16,
}

/// Summarizes a power change for the consensus layer, emitted by
/// `EndBlock` (spec §4.K).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorUpdate {
    pub address: Address,
    pub voting_power: StakeAmount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Uninitialized,
    AwaitingBeginBlock,
    InBlock,
    AwaitingCommit,
}

/// Drives the validator-set and reward/slashing state machines from the
/// committed-block lifecycle. One adapter per chain; `init_chain` may run
/// exactly once, after which every block must pass through `begin_block`,
/// zero or more `deliver_tx`, `end_block`, then `commit` in that order.
pub struct ABCIAdapter {
    validator_set: ValidatorSet,
    slashing: SlashingManager,
    reward_state: RewardState,
    phase: Phase,
}

impl ABCIAdapter {
    pub fn new(min_stake: StakeAmount, max_validators: usize) -> Self {
        Self {
            validator_set: ValidatorSet::new(min_stake, max_validators),
            slashing: SlashingManager::new(),
            reward_state: RewardState::new(),
            phase: Phase::Uninitialized,
        }
    }

    pub fn validator_set(&self) -> &ValidatorSet {
        &self.validator_set
    }

    pub fn reward_state(&self) -> &RewardState {
        &self.reward_state
    }

    /// Seeds the initial validator set and returns the first validator
    /// update batch for the consensus layer.
    pub fn init_chain(&mut self, genesis: Vec<GenesisValidator>) -> ConsensusResult<Vec<ValidatorUpdate>> {
        if self.phase != Phase::Uninitialized {
            return Err(ConsensusError::ValidationError("InitChain called more than once".into()));
        }
        for v in genesis {
            self.validator_set.stake(v.operator, v.pub_key, v.amount, v.description, v.commission)?;
        }
        self.phase = Phase::AwaitingBeginBlock;
        Ok(self.validator_updates())
    }

    /// Updates signing info for the previous block's active set, collects
    /// double-sign evidence, and runs the staking `BeginBlock` hook
    /// (downtime check, unbonding completion).
    pub fn begin_block(&mut self, block: &Block, signers: &[Address]) -> ConsensusResult<()> {
        if self.phase != Phase::AwaitingBeginBlock {
            return Err(ConsensusError::ValidationError("BeginBlock called out of sequence".into()));
        }
        self.validator_set.set_block_height(block.header.number);

        let active: Vec<Address> = self.validator_set.active_validators().iter().map(|v| v.address).collect();
        for address in active {
            let signed = signers.contains(&address);
            self.slashing.record_signing(address, signed);
            if let Some(validator) = self.validator_set.get_mut(&address) {
                if signed {
                    validator.blocks_signed += 1;
                } else {
                    validator.blocks_missed += 1;
                }
                if address == block.header.proposer {
                    validator.blocks_proposed += 1;
                }
                self.slashing.check_downtime(validator, block.header.number)?;
            }
        }

        self.validator_set.process_unbonding(block.header.number);
        self.phase = Phase::InBlock;
        Ok(())
    }

    /// Routes staking-module transactions into the validator-set state
    /// machine; everything else is opaque to this core (spec §4.K).
    pub fn deliver_tx(&mut self, tx: &Transaction) -> ConsensusResult<()> {
        if self.phase != Phase::InBlock {
            return Err(ConsensusError::ValidationError("DeliverTx called out of sequence".into()));
        }
        if !tx.is_staking_tx() {
            return Ok(());
        }

        let height = self.validator_set.block_height();
        match &tx.tx_type {
            TransactionType::Stake { pub_key, amount, commission_rate } => {
                self.validator_set.stake(tx.from, pub_key.clone(), amount.clone(), ValidatorDescription::default(), *commission_rate)?;
            }
            TransactionType::Unstake => {
                self.validator_set.unstake(&tx.from)?;
            }
            TransactionType::Delegate { validator, amount } => {
                self.validator_set.delegate(tx.from, *validator, amount.clone(), height)?;
            }
            TransactionType::Undelegate { validator, amount } => {
                self.validator_set.undelegate(&tx.from, validator, amount)?;
            }
            TransactionType::Redelegate { from_validator, to_validator, amount } => {
                self.validator_set.redelegate(tx.from, *from_validator, *to_validator, amount.clone(), height)?;
            }
            TransactionType::ClaimRewards { validator } => {
                if self.validator_set.contains(validator) {
                    let _ = self.reward_state.claim(&tx.from);
                }
            }
            TransactionType::Transfer { .. } | TransactionType::Opaque { .. } => unreachable!("filtered by is_staking_tx"),
        }
        Ok(())
    }

    /// Credits the block reward to its proposer (and delegators), then
    /// emits the validator-update set for the consensus layer.
    pub fn end_block(&mut self, height: BlockNumber, proposer: Address) -> ConsensusResult<Vec<ValidatorUpdate>> {
        if self.phase != Phase::InBlock {
            return Err(ConsensusError::ValidationError("EndBlock called out of sequence".into()));
        }
        if let Some(validator) = self.validator_set.get_mut(&proposer) {
            if validator.can_produce_blocks() {
                rewards::distribute_block_reward(validator, &mut self.reward_state, height)?;
            }
        }
        self.phase = Phase::AwaitingCommit;
        Ok(self.validator_updates())
    }

    /// Finalizes the block. This core holds no state-root computation of
    /// its own (that is `WorldState`'s job); `commit` only advances the
    /// sequencing gate so the next `begin_block` is accepted.
    pub fn commit(&mut self) -> ConsensusResult<()> {
        if self.phase != Phase::AwaitingCommit {
            return Err(ConsensusError::ValidationError("Commit called out of sequence".into()));
        }
        self.phase = Phase::AwaitingBeginBlock;
        Ok(())
    }

    fn validator_updates(&self) -> Vec<ValidatorUpdate> {
        self.validator_set
            .active_validators()
            .into_iter()
            .map(|v| ValidatorUpdate {
                address: v.address,
                voting_power: v.voting_power(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crypto::{KeyPair, SignatureScheme};

    fn addr() -> Address {
        KeyPair::generate(SignatureScheme::Ed25519).unwrap().public_key().to_address()
    }

    fn genesis(operator: Address, amount: u64) -> GenesisValidator {
        GenesisValidator {
            operator,
            pub_key: vec![],
            amount: StakeAmount::from_u64(amount),
            description: ValidatorDescription::default(),
            commission: 1000,
        }
    }

    #[test]
    fn test_init_chain_rejects_second_call() {
        let mut adapter = ABCIAdapter::new(StakeAmount::from_u64(1), 100);
        let op = addr();
        adapter.init_chain(vec![genesis(op, 1000)]).unwrap();
        assert!(adapter.init_chain(vec![]).is_err());
    }

    #[test]
    fn test_begin_block_before_init_chain_fails() {
        let mut adapter = ABCIAdapter::new(StakeAmount::from_u64(1), 100);
        let block = chain_types::Block::new(1, crypto::Hash::zero(), crypto::Hash::zero(), addr(), vec![], 1_000_000).unwrap();
        assert!(adapter.begin_block(&block, &[]).is_err());
    }

    #[test]
    fn test_full_block_lifecycle() {
        let mut adapter = ABCIAdapter::new(StakeAmount::from_u64(1), 100);
        let op = addr();
        adapter.init_chain(vec![genesis(op, 10_000)]).unwrap();

        let block = chain_types::Block::new(1, crypto::Hash::zero(), crypto::Hash::zero(), op, vec![], 1_000_000).unwrap();
        adapter.begin_block(&block, &[op]).unwrap();
        let updates = adapter.end_block(1, op).unwrap();
        adapter.commit().unwrap();

        assert_eq!(updates.len(), 1);
        assert!(!adapter.validator_set().get(&op).unwrap().accumulated_rewards.is_zero());
        assert!(!adapter.reward_state().total_distributed.is_zero());
    }

    #[test]
    fn test_deliver_tx_routes_stake() {
        let mut adapter = ABCIAdapter::new(StakeAmount::from_u64(1), 100);
        adapter.init_chain(vec![]).unwrap();

        let op = addr();
        let block = chain_types::Block::new(1, crypto::Hash::zero(), crypto::Hash::zero(), op, vec![], 1_000_000).unwrap();
        adapter.begin_block(&block, &[]).unwrap();

        let tx = Transaction::new(op, 0, TransactionType::Stake { pub_key: vec![], amount: StakeAmount::from_u64(5000), commission_rate: 0 }, 1, 1);
        adapter.deliver_tx(&tx).unwrap();

        assert!(adapter.validator_set().get(&op).is_some());
    }
}
