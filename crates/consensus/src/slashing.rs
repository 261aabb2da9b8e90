// consensus/src/slashing.rs

use crate::validator::{Validator, ValidatorStatus};
use crate::{ConsensusError, ConsensusResult};
use chain_types::{BlockNumber, StakeAmount};
use crypto::Address;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Downtime is evaluated over a sliding window of this many blocks.
const DOWNTIME_WINDOW: usize = 100;
/// A validator is downtime-slashed once at least this fraction of the
/// window was missed.
const DOWNTIME_THRESHOLD: f64 = 0.5;

const DOUBLE_SIGN_RATIO_BP: u16 = 500; // 5%
const DOUBLE_SIGN_JAIL_BLOCKS: u64 = 20_000;
const DOWNTIME_RATIO_BP: u16 = 100; // 1%
const DOWNTIME_JAIL_BLOCKS: u64 = 10_000;

/// Kind of provable misbehavior a `SlashingEvent` records (spec §3 data
/// model). `Misbehavior` is an open-ended bucket for violations this core
/// does not give a fixed ratio/jail period to; callers supply both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlashingKind {
    DoubleSign,
    Downtime,
    Misbehavior,
}

/// A single slashing occurrence, appended to a validator's bounded history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlashingEvent {
    pub block_number: BlockNumber,
    pub kind: SlashingKind,
    pub amount: StakeAmount,
    pub reason: String,
}

/// Two distinct vote payloads signed by the same validator at the same
/// (height, round) — proof of double-signing. The payload bytes are not
/// interpreted further than byte-inequality (no round-state machine; spec
/// §9 Non-goals).
#[derive(Debug, Clone)]
pub struct DoubleSignEvidence {
    pub validator: Address,
    pub height: BlockNumber,
    pub round: u32,
    pub vote_a: Vec<u8>,
    pub vote_b: Vec<u8>,
}

impl DoubleSignEvidence {
    pub fn is_valid(&self) -> bool {
        self.vote_a != self.vote_b
    }
}

/// Tracks the last `DOWNTIME_WINDOW` signed/missed outcomes per validator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SigningWindow {
    outcomes: VecDeque<bool>,
}

impl SigningWindow {
    fn record(&mut self, signed: bool) {
        self.outcomes.push_back(signed);
        if self.outcomes.len() > DOWNTIME_WINDOW {
            self.outcomes.pop_front();
        }
    }

    fn missed_ratio(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        let missed = self.outcomes.iter().filter(|s| !**s).count();
        missed as f64 / self.outcomes.len() as f64
    }

    fn is_full(&self) -> bool {
        self.outcomes.len() >= DOWNTIME_WINDOW
    }

    fn reset(&mut self) {
        self.outcomes.clear();
    }
}

/// Slash/jail machinery over a `ValidatorSet` (spec §4.J). Holds the
/// sliding signing windows and the append-only slashing history; the
/// voting-power mutation itself lives on `Validator`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlashingManager {
    history: Vec<SlashingEvent>,
    windows: HashMap<Address, SigningWindow>,
}

impl SlashingManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a block's signing outcome for a validator (called from
    /// `ABCIAdapter::BeginBlock` per spec §4.K).
    pub fn record_signing(&mut self, address: Address, signed: bool) {
        self.windows.entry(address).or_default().record(signed);
    }

    /// Apply the 100-block downtime check; slashes and jails if at least
    /// half the window was missed, then resets the counter.
    pub fn check_downtime(&mut self, validator: &mut Validator, current_height: BlockNumber) -> ConsensusResult<Option<SlashingEvent>> {
        let window = self.windows.entry(validator.address).or_default();
        if !window.is_full() {
            return Ok(None);
        }
        if window.missed_ratio() < DOWNTIME_THRESHOLD {
            return Ok(None);
        }
        window.reset();

        let event = self.slash(validator, SlashingKind::Downtime, DOWNTIME_RATIO_BP, DOWNTIME_JAIL_BLOCKS, current_height, "downtime: >=50% missed in 100-block window".into())?;
        Ok(Some(event))
    }

    /// Slash for a verified double-sign evidence bundle.
    pub fn slash_double_sign(&mut self, validator: &mut Validator, evidence: &DoubleSignEvidence, current_height: BlockNumber) -> ConsensusResult<SlashingEvent> {
        if !evidence.is_valid() {
            return Err(ConsensusError::SlashingError("evidence does not prove double-signing".into()));
        }
        self.slash(
            validator,
            SlashingKind::DoubleSign,
            DOUBLE_SIGN_RATIO_BP,
            DOUBLE_SIGN_JAIL_BLOCKS,
            current_height,
            format!("double-sign at height {} round {}", evidence.height, evidence.round),
        )
    }

    /// General-purpose slash for misbehavior kinds with a caller-chosen
    /// ratio/jail period.
    pub fn slash_misbehavior(
        &mut self,
        validator: &mut Validator,
        ratio_bp: u16,
        jail_blocks: u64,
        current_height: BlockNumber,
        reason: String,
    ) -> ConsensusResult<SlashingEvent> {
        self.slash(validator, SlashingKind::Misbehavior, ratio_bp, jail_blocks, current_height, reason)
    }

    fn slash(
        &mut self,
        validator: &mut Validator,
        kind: SlashingKind,
        ratio_bp: u16,
        jail_blocks: u64,
        current_height: BlockNumber,
        reason: String,
    ) -> ConsensusResult<SlashingEvent> {
        let voting_power = validator.voting_power();
        let amount = StakeAmount::new((voting_power.inner() * ratio_bp as u64) / 10_000u64);

        if validator.self_stake.inner() < amount.inner() {
            // Cap the slash at the validator's own stake; delegations are
            // not independently reduced in this core.
            validator.self_stake = StakeAmount::zero();
        } else {
            validator.self_stake = validator
                .self_stake
                .checked_sub(&amount)
                .ok_or_else(|| ConsensusError::SlashingError("stake underflow".into()))?;
        }

        validator.slashing_count += 1;
        validator.last_slashed_block = Some(current_height);

        self.jail(validator, jail_blocks, current_height);

        let event = SlashingEvent {
            block_number: current_height,
            kind,
            amount,
            reason,
        };
        self.history.push(event.clone());
        Ok(event)
    }

    fn jail(&self, validator: &mut Validator, jail_blocks: u64, current_height: BlockNumber) {
        validator.status = ValidatorStatus::Jailed;
        validator.jailed_until = current_height + jail_blocks;
    }

    /// Restore a jailed validator to `Bonded` once `current_height >=
    /// jailed_until` (spec §4.J).
    pub fn unjail(&self, validator: &mut Validator, current_height: BlockNumber) -> ConsensusResult<()> {
        if !validator.is_jailed() {
            return Err(ConsensusError::ValidatorError("validator is not jailed".into()));
        }
        if current_height < validator.jailed_until {
            return Err(ConsensusError::ValidatorError(format!(
                "jailed until block {}, current height {}",
                validator.jailed_until, current_height
            )));
        }
        validator.status = ValidatorStatus::Bonded;
        Ok(())
    }

    pub fn history_for(&self, address: &Address) -> Vec<&SlashingEvent> {
        // SlashingEvent carries no validator address field by itself; the
        // caller tracks per-validator history via slashing_count/last_slashed_block
        // on Validator, this returns the full log for external reconciliation.
        let _ = address;
        self.history.iter().collect()
    }

    pub fn all_events(&self) -> &[SlashingEvent] {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::ValidatorDescription;
    use crypto::{KeyPair, SignatureScheme};

    fn test_validator(stake: u64) -> Validator {
        let mut set = crate::validator::ValidatorSet::new(StakeAmount::from_u64(1), 100);
        let addr = KeyPair::generate(SignatureScheme::Ed25519).unwrap().public_key().to_address();
        set.stake(addr, vec![], StakeAmount::from_u64(stake), ValidatorDescription::default(), 0).unwrap();
        set.get(&addr).unwrap().clone()
    }

    #[test]
    fn test_double_sign_slash_ratio_and_jail() {
        let mut manager = SlashingManager::new();
        let mut validator = test_validator(100_000);

        let evidence = DoubleSignEvidence {
            validator: validator.address,
            height: 10,
            round: 0,
            vote_a: vec![1],
            vote_b: vec![2],
        };

        let event = manager.slash_double_sign(&mut validator, &evidence, 10).unwrap();
        assert_eq!(event.amount, StakeAmount::from_u64(5000));
        assert_eq!(validator.self_stake, StakeAmount::from_u64(95_000));
        assert!(validator.is_jailed());
        assert_eq!(validator.jailed_until, 10 + 20_000);
    }

    #[test]
    fn test_double_sign_rejects_identical_votes() {
        let mut manager = SlashingManager::new();
        let mut validator = test_validator(100_000);
        let evidence = DoubleSignEvidence {
            validator: validator.address,
            height: 10,
            round: 0,
            vote_a: vec![1],
            vote_b: vec![1],
        };
        assert!(manager.slash_double_sign(&mut validator, &evidence, 10).is_err());
    }

    #[test]
    fn test_downtime_triggers_at_half_missed() {
        let mut manager = SlashingManager::new();
        let mut validator = test_validator(100_000);

        for i in 0..100 {
            manager.record_signing(validator.address, i % 2 == 0);
        }

        let event = manager.check_downtime(&mut validator, 500).unwrap();
        assert!(event.is_some());
        assert_eq!(validator.self_stake, StakeAmount::from_u64(99_000));
        assert!(validator.is_jailed());
        assert_eq!(validator.jailed_until, 500 + 10_000);
    }

    #[test]
    fn test_downtime_does_not_trigger_below_threshold() {
        let mut manager = SlashingManager::new();
        let mut validator = test_validator(100_000);

        for i in 0..100 {
            manager.record_signing(validator.address, i % 10 != 0);
        }

        let event = manager.check_downtime(&mut validator, 500).unwrap();
        assert!(event.is_none());
    }

    #[test]
    fn test_unjail_requires_height_reached() {
        let mut manager = SlashingManager::new();
        let mut validator = test_validator(100_000);
        let evidence = DoubleSignEvidence {
            validator: validator.address,
            height: 10,
            round: 0,
            vote_a: vec![1],
            vote_b: vec![2],
        };
        manager.slash_double_sign(&mut validator, &evidence, 10).unwrap();

        assert!(manager.unjail(&mut validator, 20_009).is_err());
        assert!(manager.unjail(&mut validator, 20_010).is_ok());
        assert!(validator.is_bonded());
    }
}
