// consensus/src/selection.rs

use crate::validator::Validator;
use chain_types::{NormalizedScore, StakeAmount, Timestamp};
use crypto::Address;

/// Blocks-per-year assumption used to decay slashing history, derived from
/// the 3-second target block time used throughout this core.
const BLOCKS_PER_YEAR: f64 = 10_512_000.0;
const SECONDS_PER_YEAR: f64 = 365.0 * 86_400.0;

/// Per-validator inputs the selection formula needs but this crate cannot
/// measure itself: response time comes from `NetworkDelayHandler`, community
/// votes and network-contribution points come from the governance/telemetry
/// surface. Callers assemble these per candidate before scoring.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExternalSignals {
    /// Response-time sub-score, already normalized to [0, 1000].
    pub response_time: NormalizedScore,
    /// Raw community-vote tally in `[-1000, 1000]`.
    pub community_votes: i32,
    /// Network-contribution points, capped at 1000 by the caller's source.
    pub network_contribution: u32,
}

/// Weighted composite score for validator selection (spec §4.I):
/// `score = 0.6*stakeScore + 0.3*performanceScore + 0.1*reputationScore`.
#[derive(Debug, Clone, Copy)]
pub struct ValidatorScore {
    pub address: Address,
    pub stake_score: NormalizedScore,
    pub performance_score: NormalizedScore,
    pub reputation_score: NormalizedScore,
    pub total: NormalizedScore,
}

/// Stake sub-score: this validator's share of the candidate set's total
/// voting power, mapped to [0, 1000].
fn stake_score(validator: &Validator, total_voting_power: &StakeAmount) -> NormalizedScore {
    if total_voting_power.is_zero() {
        return NormalizedScore::zero();
    }
    let power = to_f64(&validator.voting_power());
    let total = to_f64(total_voting_power);
    NormalizedScore::from_fraction(power / total)
}

/// Performance sub-score: missed 30%, signed 20%, proposed 15%, uptime 15%,
/// response-time 10%, governance 10% (spec §4.I).
fn performance_score(validator: &Validator, signals: &ExternalSignals) -> NormalizedScore {
    let attendance_total = (validator.blocks_signed + validator.blocks_missed).max(1) as f64;
    let missed_ratio = validator.blocks_missed as f64 / attendance_total;
    let signed_ratio = validator.blocks_signed as f64 / attendance_total;

    let proposal_total = (validator.blocks_proposed + validator.blocks_missed).max(1) as f64;
    let proposed_ratio = validator.blocks_proposed as f64 / proposal_total;

    let missed_score = (1.0 - missed_ratio) * 1000.0;
    let signed_score = signed_ratio * 1000.0;
    let proposed_score = proposed_ratio * 1000.0;
    let uptime_score = validator.uptime as f64 / 10.0;
    let response_time_score = signals.response_time.value() as f64;
    // Each governance vote is worth 100 points, saturating at 10 votes.
    let governance_score = (validator.governance_votes as f64 * 100.0).min(1000.0);

    let weighted = 0.30 * missed_score
        + 0.20 * signed_score
        + 0.15 * proposed_score
        + 0.15 * uptime_score
        + 0.10 * response_time_score
        + 0.10 * governance_score;

    NormalizedScore::new(weighted.round() as u32)
}

/// Reputation sub-score: slashing history 40% (decays 50% per year since
/// the last slash), age 30% (saturates at one year), community votes 20%
/// (mapped from [-1000,1000] to [0,1000]), network contribution 10% (spec
/// §4.I).
fn reputation_score(validator: &Validator, now: Timestamp, current_height: u64, signals: &ExternalSignals) -> NormalizedScore {
    // Each recorded slash contributes a 0.2 base penalty (capped at 1.0),
    // decaying by half every BLOCKS_PER_YEAR blocks since the last slash.
    let slash_history_score = match validator.last_slashed_block {
        Some(last) if validator.slashing_count > 0 => {
            let base_penalty = (validator.slashing_count as f64 * 0.2).min(1.0);
            let age_in_years = (current_height.saturating_sub(last)) as f64 / BLOCKS_PER_YEAR;
            let decayed = base_penalty * 0.5f64.powf(age_in_years);
            (1.0 - decayed).max(0.0) * 1000.0
        }
        _ => 1000.0,
    };

    let age_in_years = (now.saturating_sub(validator.registered_at)) as f64 / SECONDS_PER_YEAR;
    let age_score = age_in_years.min(1.0) * 1000.0;

    let community_votes_score = ((signals.community_votes.clamp(-1000, 1000) as f64) + 1000.0) / 2.0;
    let network_contribution_score = (signals.network_contribution as f64).min(1000.0);

    let weighted = 0.40 * slash_history_score
        + 0.30 * age_score
        + 0.20 * community_votes_score
        + 0.10 * network_contribution_score;

    NormalizedScore::new(weighted.round() as u32)
}

/// Score a single validator against the rest of the candidate set.
pub fn score_validator(
    validator: &Validator,
    total_voting_power: &StakeAmount,
    now: Timestamp,
    current_height: u64,
    signals: &ExternalSignals,
) -> ValidatorScore {
    let stake = stake_score(validator, total_voting_power);
    let performance = performance_score(validator, signals);
    let reputation = reputation_score(validator, now, current_height, signals);

    let total = 0.6 * stake.value() as f64 + 0.3 * performance.value() as f64 + 0.1 * reputation.value() as f64;

    ValidatorScore {
        address: validator.address,
        stake_score: stake,
        performance_score: performance,
        reputation_score: reputation,
        total: NormalizedScore::new(total.round() as u32),
    }
}

/// Select the top-K candidates by composite score, strictly descending;
/// ties broken by address for determinism.
pub fn select_top_k(
    candidates: &[&Validator],
    total_voting_power: &StakeAmount,
    now: Timestamp,
    current_height: u64,
    signals_for: impl Fn(&Address) -> ExternalSignals,
    k: usize,
) -> Vec<ValidatorScore> {
    let mut scores: Vec<ValidatorScore> = candidates
        .iter()
        .map(|v| score_validator(v, total_voting_power, now, current_height, &signals_for(&v.address)))
        .collect();

    scores.sort_by(|a, b| {
        b.total
            .value()
            .cmp(&a.total.value())
            .then_with(|| a.address.as_bytes().cmp(b.address.as_bytes()))
    });
    scores.truncate(k);
    scores
}

fn to_f64(amount: &StakeAmount) -> f64 {
    amount.inner().to_u64_digits().first().copied().unwrap_or(0) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::{ValidatorDescription, ValidatorSet};
    use crypto::{KeyPair, SignatureScheme};

    fn addr() -> Address {
        KeyPair::generate(SignatureScheme::Ed25519)
            .unwrap()
            .public_key()
            .to_address()
    }

    #[test]
    fn test_stake_score_proportional_to_share() {
        let mut set = ValidatorSet::new(StakeAmount::from_u64(1), 100);
        let a = addr();
        let b = addr();
        set.stake(a, vec![], StakeAmount::from_u64(3000), ValidatorDescription::default(), 0).unwrap();
        set.stake(b, vec![], StakeAmount::from_u64(1000), ValidatorDescription::default(), 0).unwrap();

        let total = set.total_stake();
        let va = set.get(&a).unwrap();
        let vb = set.get(&b).unwrap();

        let sa = stake_score(va, &total);
        let sb = stake_score(vb, &total);
        assert!(sa.value() > sb.value());
        assert_eq!(sa.value() + sb.value(), NormalizedScore::MAX);
    }

    #[test]
    fn test_select_top_k_orders_descending() {
        let mut set = ValidatorSet::new(StakeAmount::from_u64(1), 100);
        let addrs: Vec<_> = (0..5).map(|_| addr()).collect();
        for (i, a) in addrs.iter().enumerate() {
            set.stake(*a, vec![], StakeAmount::from_u64(1000 * (i as u64 + 1)), ValidatorDescription::default(), 0)
                .unwrap();
        }

        let total = set.total_stake();
        let candidates = set.active_validators();
        let top = select_top_k(&candidates, &total, 0, 0, |_| ExternalSignals::default(), 3);

        assert_eq!(top.len(), 3);
        assert!(top[0].total.value() >= top[1].total.value());
        assert!(top[1].total.value() >= top[2].total.value());
    }

    #[test]
    fn test_reputation_score_full_when_never_slashed() {
        let mut set = ValidatorSet::new(StakeAmount::from_u64(1), 100);
        let a = addr();
        set.stake(a, vec![], StakeAmount::from_u64(1000), ValidatorDescription::default(), 0).unwrap();
        let v = set.get(&a).unwrap();

        let score = reputation_score(v, 0, 0, &ExternalSignals::default());
        // age score is 0 at registration instant; slash history and
        // community votes/contribution default components still apply.
        assert!(score.value() > 0);
    }
}
