// consensus/src/validator.rs

use crate::{ConsensusError, ConsensusResult};
use chain_types::{Amount, StakeAmount, Timestamp};
use crypto::Address;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Validator lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidatorStatus {
    /// Registered but not currently carrying voting power (e.g. fully unbonded).
    Unbonded,
    /// Active and eligible to propose/sign blocks.
    Bonded,
    /// Self-stake is being withdrawn; still counted until the unbonding
    /// period completes (not separately timed in this core — see DESIGN.md).
    Unbonding,
    /// Penalized for misbehavior; excluded from proposing/signing until
    /// `jailed_until` is reached and `unjail` is called.
    Jailed,
}

/// Free-text identity fields a validator publishes alongside its keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidatorDescription {
    pub moniker: String,
    pub identity: String,
    pub website: String,
    pub security_contact: String,
    pub details: String,
}

/// A bond from a delegator account to a validator, sharing in rewards and
/// slashing proportional to `amount`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delegation {
    pub delegator: Address,
    pub validator: Address,
    pub amount: StakeAmount,
    pub accumulated_rewards: Amount,
    pub start_block: u64,
    pub end_block: Option<u64>,
}

impl Delegation {
    fn new(delegator: Address, validator: Address, amount: StakeAmount, start_block: u64) -> Self {
        Self {
            delegator,
            validator,
            amount,
            accumulated_rewards: Amount::zero(),
            start_block,
            end_block: None,
        }
    }
}

/// A registered validator: self-stake, delegations, status, and the
/// performance/reputation counters the selection formula and slashing
/// machinery read from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Validator {
    pub address: Address,
    pub pub_key: Vec<u8>,
    pub status: ValidatorStatus,
    pub commission: u16,
    pub self_stake: StakeAmount,
    pub delegations: Vec<Delegation>,
    pub description: ValidatorDescription,

    pub blocks_proposed: u64,
    pub blocks_signed: u64,
    pub blocks_missed: u64,
    pub uptime: u16,
    pub governance_votes: u32,
    pub accumulated_rewards: Amount,
    pub last_reward_block: u64,
    pub jailed_until: u64,
    pub slashing_count: u32,
    pub last_slashed_block: Option<u64>,
    pub registered_at: Timestamp,
}

impl Validator {
    fn new(address: Address, pub_key: Vec<u8>, self_stake: StakeAmount, commission: u16) -> Self {
        Self {
            address,
            pub_key,
            status: ValidatorStatus::Bonded,
            commission: commission.min(10_000),
            self_stake,
            delegations: Vec::new(),
            description: ValidatorDescription::default(),
            blocks_proposed: 0,
            blocks_signed: 0,
            blocks_missed: 0,
            uptime: 10_000,
            governance_votes: 0,
            accumulated_rewards: Amount::zero(),
            last_reward_block: 0,
            jailed_until: 0,
            slashing_count: 0,
            last_slashed_block: None,
            registered_at: current_timestamp(),
        }
    }

    /// `votingPower == selfStake + Sum delegation.amount` (invariant 1, spec §8).
    pub fn voting_power(&self) -> StakeAmount {
        self.delegations
            .iter()
            .fold(self.self_stake.clone(), |acc, d| {
                acc.checked_add(&d.amount).unwrap_or(acc)
            })
    }

    pub fn is_bonded(&self) -> bool {
        matches!(self.status, ValidatorStatus::Bonded)
    }

    pub fn is_jailed(&self) -> bool {
        matches!(self.status, ValidatorStatus::Jailed)
    }

    /// Eligible to be selected for proposing/signing.
    pub fn can_produce_blocks(&self) -> bool {
        self.is_bonded() && !self.voting_power().is_zero()
    }

    fn find_delegation(&self, delegator: &Address) -> Option<usize> {
        self.delegations.iter().position(|d| d.delegator == *delegator)
    }

    fn remove_delegation_if_empty(&mut self, idx: usize) {
        if self.delegations[idx].amount.is_zero() {
            self.delegations.remove(idx);
        }
    }
}

/// Manages the set of validators and every staking-module state transition
/// over them: `Stake`, `Unstake`, `Delegate`, `Undelegate`, `Redelegate`, and
/// per-epoch selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorSet {
    validators: HashMap<Address, Validator>,
    min_stake: StakeAmount,
    max_validators: usize,
    block_height: u64,
}

impl ValidatorSet {
    pub fn new(min_stake: StakeAmount, max_validators: usize) -> Self {
        Self {
            validators: HashMap::new(),
            min_stake,
            max_validators,
            block_height: 0,
        }
    }

    pub fn min_stake(&self) -> &StakeAmount {
        &self.min_stake
    }

    pub fn block_height(&self) -> u64 {
        self.block_height
    }

    pub fn set_block_height(&mut self, height: u64) {
        self.block_height = height;
    }

    pub fn get(&self, address: &Address) -> Option<&Validator> {
        self.validators.get(address)
    }

    pub fn get_mut(&mut self, address: &Address) -> Option<&mut Validator> {
        self.validators.get_mut(address)
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.validators.contains_key(address)
    }

    /// Derived view: `status == Bonded`, `votingPower > 0` (spec §3).
    pub fn active_validators(&self) -> Vec<&Validator> {
        self.validators
            .values()
            .filter(|v| v.can_produce_blocks())
            .collect()
    }

    pub fn all_validators(&self) -> Vec<&Validator> {
        self.validators.values().collect()
    }

    /// Derived view: total voting power of active validators.
    pub fn total_stake(&self) -> StakeAmount {
        self.active_validators()
            .iter()
            .fold(StakeAmount::zero(), |acc, v| {
                acc.checked_add(&v.voting_power()).unwrap_or(acc)
            })
    }

    pub fn count(&self) -> usize {
        self.validators.len()
    }

    pub fn active_count(&self) -> usize {
        self.active_validators().len()
    }

    /// `Stake(op, amount, pubKey, description, commission)` — spec §4.I.
    ///
    /// Preconditions: `amount >= min_stake`, no existing validator for `op`,
    /// active count < `max_validators`. Creates a single self-delegation
    /// equal to `amount`. The caller's balance debit happens in the ABCI
    /// adapter; this call only fails with `Invariant`/`Insufficient` kinds,
    /// never partially mutates the set.
    pub fn stake(
        &mut self,
        operator: Address,
        pub_key: Vec<u8>,
        amount: StakeAmount,
        description: ValidatorDescription,
        commission: u16,
    ) -> ConsensusResult<()> {
        if self.validators.contains_key(&operator) {
            return Err(ConsensusError::ValidatorAlreadyExists(operator.to_hex()));
        }
        if amount.inner() < self.min_stake.inner() {
            return Err(ConsensusError::InsufficientStake {
                required: to_u64(&self.min_stake),
                provided: to_u64(&amount),
            });
        }
        if self.active_count() >= self.max_validators {
            return Err(ConsensusError::ValidatorError(
                "maximum validator count reached".into(),
            ));
        }

        let mut validator = Validator::new(operator, pub_key, amount, commission);
        validator.description = description;
        self.validators.insert(operator, validator);
        Ok(())
    }

    /// `Unstake(op)` — removes the validator, returning its self-stake so
    /// the caller can re-credit the operator's balance (invariant 7, §8).
    /// Unbonding delay is not modeled in this core (see DESIGN.md).
    pub fn unstake(&mut self, operator: &Address) -> ConsensusResult<StakeAmount> {
        let validator = self
            .validators
            .remove(operator)
            .ok_or_else(|| ConsensusError::ValidatorNotFound(operator.to_hex()))?;
        Ok(validator.self_stake)
    }

    /// `Delegate(delegator, val, amount)` — spec §4.I.
    pub fn delegate(
        &mut self,
        delegator: Address,
        validator_addr: Address,
        amount: StakeAmount,
        block_height: u64,
    ) -> ConsensusResult<()> {
        let validator = self
            .validators
            .get_mut(&validator_addr)
            .ok_or_else(|| ConsensusError::ValidatorNotFound(validator_addr.to_hex()))?;

        match validator.find_delegation(&delegator) {
            Some(idx) => {
                let d = &mut validator.delegations[idx];
                d.amount = d
                    .amount
                    .checked_add(&amount)
                    .ok_or_else(|| ConsensusError::ValidatorError("delegation overflow".into()))?;
            }
            None => {
                validator
                    .delegations
                    .push(Delegation::new(delegator, validator_addr, amount, block_height));
            }
        }
        Ok(())
    }

    /// `Undelegate(delegator, val, amount)` — spec §4.I, invariant 8.
    /// Requires an existing delegation with `amount >= requested`; removes
    /// the delegation if it reaches zero. Returns the withdrawn amount so
    /// the caller can re-credit the delegator's balance.
    pub fn undelegate(
        &mut self,
        delegator: &Address,
        validator_addr: &Address,
        amount: &StakeAmount,
    ) -> ConsensusResult<StakeAmount> {
        let validator = self
            .validators
            .get_mut(validator_addr)
            .ok_or_else(|| ConsensusError::ValidatorNotFound(validator_addr.to_hex()))?;

        let idx = validator
            .find_delegation(delegator)
            .ok_or_else(|| ConsensusError::ValidatorError("delegation not found".into()))?;

        if validator.delegations[idx].amount.inner() < amount.inner() {
            return Err(ConsensusError::InsufficientStake {
                required: to_u64(amount),
                provided: to_u64(&validator.delegations[idx].amount),
            });
        }

        validator.delegations[idx].amount = validator.delegations[idx]
            .amount
            .checked_sub(amount)
            .ok_or_else(|| ConsensusError::ValidatorError("delegation underflow".into()))?;
        validator.remove_delegation_if_empty(idx);

        Ok(amount.clone())
    }

    /// `Redelegate` — `Undelegate` from `from` followed by `Delegate` into
    /// `to`; on the `Delegate` leg failing, compensates with a `Delegate`
    /// back into `from` so no stake is lost (transactional boundary, §7).
    pub fn redelegate(
        &mut self,
        delegator: Address,
        from_validator: Address,
        to_validator: Address,
        amount: StakeAmount,
        block_height: u64,
    ) -> ConsensusResult<()> {
        let withdrawn = self.undelegate(&delegator, &from_validator, &amount)?;

        if let Err(e) = self.delegate(delegator, to_validator, withdrawn.clone(), block_height) {
            // Compensate: restore the delegation at the source validator.
            let _ = self.delegate(delegator, from_validator, withdrawn, block_height);
            return Err(e);
        }
        Ok(())
    }

    pub fn process_unbonding(&mut self, current_height: u64) -> Vec<Address> {
        let mut completed = Vec::new();
        for (address, validator) in &mut self.validators {
            if matches!(validator.status, ValidatorStatus::Unbonding) && current_height >= validator.jailed_until {
                validator.status = ValidatorStatus::Unbonded;
                completed.push(*address);
            }
        }
        completed
    }
}

fn to_u64(amount: &StakeAmount) -> u64 {
    amount.inner().to_u64_digits().first().copied().unwrap_or(0)
}

fn current_timestamp() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crypto::{KeyPair, SignatureScheme};

    fn addr() -> Address {
        KeyPair::generate(SignatureScheme::Ed25519)
            .unwrap()
            .public_key()
            .to_address()
    }

    #[test]
    fn test_stake_creates_bonded_validator() {
        let mut set = ValidatorSet::new(StakeAmount::from_u64(1000), 100);
        let op = addr();
        set.stake(op, vec![1, 2, 3], StakeAmount::from_u64(5000), ValidatorDescription::default(), 500)
            .unwrap();

        let v = set.get(&op).unwrap();
        assert!(v.is_bonded());
        assert_eq!(v.voting_power(), StakeAmount::from_u64(5000));
    }

    #[test]
    fn test_stake_rejects_insufficient_amount() {
        let mut set = ValidatorSet::new(StakeAmount::from_u64(10_000), 100);
        let op = addr();
        let result = set.stake(op, vec![], StakeAmount::from_u64(5000), ValidatorDescription::default(), 0);
        assert!(result.is_err());
    }

    #[test]
    fn test_stake_delegate_undelegate_scenario_s1() {
        // S1 from spec §8: op stakes 1.5e18, delegator delegates 1e18, then
        // undelegates 0.5e18.
        let mut set = ValidatorSet::new(StakeAmount::from_u64(1), 100);
        let op = addr();
        let delegator = addr();

        set.stake(op, vec![], StakeAmount::from_u64(1_500_000_000_000_000_000), ValidatorDescription::default(), 500)
            .unwrap();
        set.delegate(delegator, op, StakeAmount::from_u64(1_000_000_000_000_000_000), 0)
            .unwrap();

        assert_eq!(
            set.get(&op).unwrap().voting_power(),
            StakeAmount::from_u64(2_500_000_000_000_000_000)
        );

        let withdrawn = set
            .undelegate(&delegator, &op, &StakeAmount::from_u64(500_000_000_000_000_000))
            .unwrap();
        assert_eq!(withdrawn, StakeAmount::from_u64(500_000_000_000_000_000));
        assert_eq!(
            set.get(&op).unwrap().voting_power(),
            StakeAmount::from_u64(2_000_000_000_000_000_000)
        );
    }

    #[test]
    fn test_redelegate_scenario_s2() {
        let mut set = ValidatorSet::new(StakeAmount::from_u64(1), 100);
        let v1 = addr();
        let v2 = addr();
        let delegator = addr();

        set.stake(v1, vec![], StakeAmount::from_u64(1_500_000_000_000_000_000), ValidatorDescription::default(), 0)
            .unwrap();
        set.stake(v2, vec![], StakeAmount::from_u64(1_500_000_000_000_000_000), ValidatorDescription::default(), 0)
            .unwrap();

        set.delegate(delegator, v1, StakeAmount::from_u64(1_000_000_000_000_000_000), 0)
            .unwrap();
        set.redelegate(delegator, v1, v2, StakeAmount::from_u64(500_000_000_000_000_000), 0)
            .unwrap();

        assert_eq!(set.get(&v1).unwrap().voting_power(), StakeAmount::from_u64(2_000_000_000_000_000_000));
        assert_eq!(set.get(&v2).unwrap().voting_power(), StakeAmount::from_u64(2_000_000_000_000_000_000));
    }

    #[test]
    fn test_undelegate_removes_zeroed_delegation() {
        let mut set = ValidatorSet::new(StakeAmount::from_u64(1), 100);
        let op = addr();
        let delegator = addr();

        set.stake(op, vec![], StakeAmount::from_u64(1000), ValidatorDescription::default(), 0).unwrap();
        set.delegate(delegator, op, StakeAmount::from_u64(500), 0).unwrap();
        set.undelegate(&delegator, &op, &StakeAmount::from_u64(500)).unwrap();

        assert!(set.get(&op).unwrap().delegations.is_empty());
    }

    #[test]
    fn test_unstake_returns_self_stake_and_removes_validator() {
        let mut set = ValidatorSet::new(StakeAmount::from_u64(1), 100);
        let op = addr();
        set.stake(op, vec![], StakeAmount::from_u64(1000), ValidatorDescription::default(), 0).unwrap();

        let returned = set.unstake(&op).unwrap();
        assert_eq!(returned, StakeAmount::from_u64(1000));
        assert!(set.get(&op).is_none());
    }
}
