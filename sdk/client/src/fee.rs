//! Fee Calculation
//!
//! Mirrors the program's fee accounting so a quoted fee is accepted as is.
//!
//! ```text
//! top up  = 2 * hash_tx_comp + network_fee(amount) + commitment_hash_fee
//!           - base_commitment_subvention + lamports_per_tx
//!
//! send    = commitment_hash_fee + privacy_fee
//!           + (proof_base_tx_count + input_tx_count) * proof_tx_comp
//!           - proof_subvention
//!           (+ extra input txs needed to encode the fee itself)
//! ```
//!
//! Proof inputs are prepared on chain by adding every nonzero byte of every
//! public input into an accumulator, so the number of preparation
//! transactions depends on the bytes of the amount being paid, which in turn
//! includes the fee for those transactions. [`FeeCalculator::send_fee`]
//! solves that fixed point.

use elusiv_privacy::{ActivatedCommitment, CommitmentHash};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{ElusivError, Result};
use crate::token::{LAMPORTS_TOKEN_ID, TokenInfo};

/// Compute budget of one transaction
pub const MAX_CUS: u64 = 1_400_000;
/// Cost of adding one nonzero byte into the input accumulator
pub const ADD_MIXED_COST: u64 = 25_000;
/// Cost of finishing one nonzero input
pub const ADD_COST: u64 = 60_000;
/// Transactions per base commitment hash
pub const BASE_TX_PER_HASH: u64 = 2;
/// Transactions of the batched commitment hash, indexed by batching rate
pub const COMMITMENT_HASH_TX_COUNT: [u64; 5] = [24, 24, 25, 29, 37];

/// Placeholder for inputs assumed to be maximally entropic (2^253 - 1)
const SATURATED_INPUT: [u8; 32] = {
    let mut v = [0xffu8; 32];
    v[31] = 0x1f;
    v
};

/// Fee parameters read from the program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProgramFee {
    pub lamports_per_tx: u64,
    /// Basis points charged on top ups
    pub base_commitment_network_fee: u64,
    /// Basis points charged on sends
    pub proof_network_fee: u64,
    pub base_commitment_subvention: u64,
    pub proof_subvention: u64,
    pub warden_hash_tx_reward: u64,
    pub warden_proof_reward: u64,
    pub proof_base_tx_count: u64,
}

impl ProgramFee {
    pub fn hash_tx_compensation(&self) -> u64 {
        self.lamports_per_tx + self.warden_hash_tx_reward
    }

    pub fn proof_tx_compensation(&self) -> u64 {
        self.lamports_per_tx + self.warden_proof_reward
    }
}

/// A quoted fee, split so each part can be shown separately.
///
/// `tx_fee`, `token_acc_rent` and `extra_fee` are in lamports; `privacy_fee`
/// is in units of the token being moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fee {
    pub token_id: u16,
    pub tx_fee: u64,
    pub privacy_fee: u64,
    pub token_acc_rent: u64,
    pub extra_fee: u64,
    /// Price used to convert lamport parts, `None` for lamports
    pub lamports_per_token: Option<u64>,
}

impl Fee {
    /// Total lamport parts
    pub fn lamports(&self) -> u64 {
        self.tx_fee + self.token_acc_rent + self.extra_fee
    }

    /// Everything in units of the fee's token
    pub fn total_in_token(&self) -> Result<u64> {
        if self.token_id == LAMPORTS_TOKEN_ID {
            return Ok(self.lamports() + self.privacy_fee);
        }
        let price = self.lamports_per_token.ok_or(ElusivError::MissingPrice {
            token_id: self.token_id,
        })?;
        Ok(lamports_to_token(self.lamports(), price) + self.privacy_fee)
    }
}

/// Round up so the converted fee never pays less than the lamport cost
pub fn lamports_to_token(lamports: u64, lamports_per_token: u64) -> u64 {
    if lamports_per_token == 0 {
        return 0;
    }
    lamports.div_ceil(lamports_per_token)
}

/// Fee-relevant public inputs of a send proof
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendInputs {
    /// One root per input commitment, zero where it repeats the first
    pub roots: Vec<[u8; 32]>,
    pub nullifier_hashes: Vec<CommitmentHash>,
    pub recent_commitment_index: u32,
    pub token_id: u16,
}

impl SendInputs {
    /// Inputs of `count` commitments that are not known yet, as expensive as
    /// they can get
    pub fn worst_case(count: usize, recent_commitment_index: u32, token_id: u16) -> Self {
        Self {
            roots: (0..count)
                .map(|i| if i == 0 { SATURATED_INPUT } else { [0u8; 32] })
                .collect(),
            nullifier_hashes: vec![CommitmentHash(SATURATED_INPUT); count],
            recent_commitment_index,
            token_id,
        }
    }

    /// Inputs spending `commitments`
    pub fn spending(
        commitments: &[ActivatedCommitment],
        recent_commitment_index: u32,
        token_id: u16,
    ) -> Self {
        let first_root = commitments.first().map(|c| *c.root());
        Self {
            roots: commitments
                .iter()
                .enumerate()
                .map(|(i, c)| {
                    if i > 0 && Some(*c.root()) == first_root {
                        [0u8; 32]
                    } else {
                        *c.root()
                    }
                })
                .collect(),
            nullifier_hashes: commitments
                .iter()
                .map(|c| c.commitment().nullifier_hash())
                .collect(),
            recent_commitment_index,
            token_id,
        }
    }

    /// Inputs known before the fee, with the saturated placeholders for the
    /// hashed inputs and the next commitment
    fn fee_independent(&self, fee_version: u32) -> Vec<[u8; 32]> {
        let mut inputs = Vec::with_capacity(self.roots.len() + self.nullifier_hashes.len() + 5);
        inputs.extend(self.roots.iter().copied());
        inputs.extend(self.nullifier_hashes.iter().map(|h| h.0));
        inputs.push(SATURATED_INPUT);
        inputs.push(SATURATED_INPUT);
        inputs.push(u64_input(self.recent_commitment_index as u64));
        inputs.push(u64_input(fee_version as u64));
        inputs.push(u64_input(self.token_id as u64));
        inputs
    }
}

fn u64_input(v: u64) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[..8].copy_from_slice(&v.to_le_bytes());
    out
}

/// Number of input preparation transactions for `inputs`
pub fn input_preparation_tx_count(inputs: &[[u8; 32]]) -> u64 {
    let mut count = 0;
    let mut current = 0;

    let mut charge = |cost: u64| {
        if count == 0 || current + cost > MAX_CUS {
            count += 1;
            current = cost;
        } else {
            current += cost;
        }
    };

    for input in inputs {
        let mut nonzero = false;
        for byte in input {
            if *byte != 0 {
                nonzero = true;
                charge(ADD_MIXED_COST);
            }
        }
        if nonzero {
            charge(ADD_COST);
        }
    }
    count
}

/// Upper bound of extra transactions caused by one more fully nonzero input
fn max_extra_tx_count() -> u64 {
    (31 * ADD_MIXED_COST + ADD_COST).div_ceil(MAX_CUS)
}

fn basis_points(amount: u64, bps: u64) -> u64 {
    ((amount as u128 * bps as u128) / 10_000) as u64
}

pub struct FeeCalculator {
    program_fee: ProgramFee,
    min_batching_rate: u32,
    fee_version: u32,
}

impl FeeCalculator {
    pub fn new(program_fee: ProgramFee, min_batching_rate: u32, fee_version: u32) -> Result<Self> {
        if min_batching_rate as usize >= COMMITMENT_HASH_TX_COUNT.len() {
            return Err(ElusivError::TooLargeSize(format!(
                "batching rate {min_batching_rate} is not supported"
            )));
        }
        Ok(Self {
            program_fee,
            min_batching_rate,
            fee_version,
        })
    }

    pub fn program_fee(&self) -> &ProgramFee {
        &self.program_fee
    }

    /// Share of one batched commitment hash
    pub fn commitment_hash_fee(&self) -> u64 {
        let tx_count = COMMITMENT_HASH_TX_COUNT[self.min_batching_rate as usize];
        (tx_count * self.program_fee.hash_tx_compensation()).div_ceil(1 << self.min_batching_rate)
    }

    /// Lamport fee of a top up of `amount`
    pub fn topup_fee(&self, amount: u64) -> u64 {
        let f = &self.program_fee;
        (BASE_TX_PER_HASH * f.hash_tx_compensation()
            + basis_points(amount, f.base_commitment_network_fee)
            + self.commitment_hash_fee())
        .saturating_sub(f.base_commitment_subvention)
            + f.lamports_per_tx
    }

    pub fn privacy_fee(&self, amount: u64) -> u64 {
        basis_points(amount, self.program_fee.proof_network_fee)
    }

    /// Total fee of a send of `amount`
    pub fn send_fee(&self, amount: u64, inputs: &SendInputs) -> Result<u64> {
        self.send_fee_for_inputs(amount, &inputs.fee_independent(self.fee_version))
    }

    /// Fixed point over the fee's own contribution to the input size
    pub fn send_fee_for_inputs(&self, amount: u64, base_inputs: &[[u8; 32]]) -> Result<u64> {
        let f = &self.program_fee;
        let comp = f.proof_tx_compensation();
        let tx_count = input_preparation_tx_count(base_inputs);

        let base = (amount as u128
            + self.commitment_hash_fee() as u128
            + self.privacy_fee(amount) as u128
            + (f.proof_base_tx_count + tx_count) as u128 * comp as u128)
            .saturating_sub(f.proof_subvention as u128);

        let mut inputs = base_inputs.to_vec();
        inputs.push([0u8; 32]);

        for i in 0..=max_extra_tx_count() {
            let total = base + i as u128 * comp as u128;
            let total: u64 = total.try_into().map_err(|_| {
                ElusivError::TooLargeSize(format!("send total {total} exceeds u64"))
            })?;
            if let Some(last) = inputs.last_mut() {
                *last = u64_input(total);
            }
            let extra = input_preparation_tx_count(&inputs).saturating_sub(tx_count);
            debug!("Fee iteration {}: total {} needs {} extra txs", i, total, extra);
            if extra <= i {
                return Ok(total.saturating_sub(amount));
            }
        }

        Err(ElusivError::TooLargeSize(
            "send fee did not converge".to_string(),
        ))
    }

    /// Quote for a top up
    pub fn estimate_topup_fee(
        &self,
        amount: u64,
        token: &TokenInfo,
        lamports_per_token: Option<u64>,
    ) -> Result<Fee> {
        let fee = Fee {
            token_id: token.id,
            tx_fee: self.topup_fee(amount),
            privacy_fee: 0,
            token_acc_rent: 0,
            extra_fee: 0,
            lamports_per_token,
        };
        self.check_price(&fee)?;
        Ok(fee)
    }

    /// Quote for a send.
    ///
    /// `merge_inputs` is set when a merge has to run first; its fee is
    /// quoted as `extra_fee`.
    pub fn estimate_send_fee(
        &self,
        amount: u64,
        inputs: &SendInputs,
        token: &TokenInfo,
        recipient_has_token_account: bool,
        merge_inputs: Option<&SendInputs>,
        lamports_per_token: Option<u64>,
    ) -> Result<Fee> {
        let privacy_fee = self.privacy_fee(amount);
        let total = self.send_fee(amount, inputs)?;
        let extra_fee = match merge_inputs {
            Some(merge) => self.send_fee(0, merge)?,
            None => 0,
        };
        let token_acc_rent = if token.id != LAMPORTS_TOKEN_ID && !recipient_has_token_account {
            token.token_account_rent
        } else {
            0
        };

        let fee = Fee {
            token_id: token.id,
            tx_fee: total - privacy_fee.min(total),
            privacy_fee,
            token_acc_rent,
            extra_fee,
            lamports_per_token,
        };
        self.check_price(&fee)?;
        Ok(fee)
    }

    fn check_price(&self, fee: &Fee) -> Result<()> {
        if fee.token_id != LAMPORTS_TOKEN_ID && fee.lamports_per_token.is_none() {
            return Err(ElusivError::MissingPrice {
                token_id: fee.token_id,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::TokenRegistry;

    fn test_fee() -> ProgramFee {
        ProgramFee {
            lamports_per_tx: 5000,
            base_commitment_subvention: 10_000,
            proof_subvention: 40_000,
            proof_base_tx_count: 62,
            ..Default::default()
        }
    }

    fn calculator() -> FeeCalculator {
        FeeCalculator::new(test_fee(), 0, 0).unwrap()
    }

    fn send_inputs(nullifiers: u8) -> SendInputs {
        SendInputs {
            roots: (0..nullifiers)
                .map(|i| if i == 0 { [0x11; 32] } else { [0u8; 32] })
                .collect(),
            nullifier_hashes: (0..nullifiers)
                .map(|k| CommitmentHash([0x20 + k + 1; 32]))
                .collect(),
            recent_commitment_index: 1938,
            token_id: 0,
        }
    }

    #[test]
    fn test_input_tx_count() {
        assert_eq!(input_preparation_tx_count(&[]), 0);
        assert_eq!(input_preparation_tx_count(&[[0u8; 32]; 4]), 0);
        assert_eq!(input_preparation_tx_count(&[u64_input(1)]), 1);
        // 32 * 25k + 60k per saturated input, one input per tx
        assert_eq!(input_preparation_tx_count(&[[0x11; 32]]), 1);
        assert_eq!(input_preparation_tx_count(&[[0x11; 32]; 2]), 2);
        // 3 * 860k = 2.58M fits in two txs when split mid-input
        assert_eq!(input_preparation_tx_count(&[[0x11; 32]; 3]), 2);
    }

    #[test]
    fn test_send_fee_single_input() {
        assert_eq!(calculator().send_fee(1_000_000_000, &send_inputs(1)).unwrap(), 405_000);
    }

    #[test]
    fn test_send_fee_three_inputs() {
        assert_eq!(calculator().send_fee(1_000_000_000, &send_inputs(3)).unwrap(), 410_000);
    }

    #[test]
    fn test_send_fee_four_inputs() {
        assert_eq!(calculator().send_fee(1_000_000_000, &send_inputs(4)).unwrap(), 415_000);
    }

    #[test]
    fn test_worst_case_inputs() {
        let c = calculator();
        assert_eq!(
            c.send_fee(1_000_000_000, &SendInputs::worst_case(4, 1938, 0)).unwrap(),
            415_000
        );
        assert!(
            c.send_fee(1, &SendInputs::worst_case(2, 0, 0)).unwrap()
                >= c.send_fee(1, &send_inputs(2)).unwrap()
        );
    }

    #[test]
    fn test_fee_needs_extra_tx() {
        let one = u64_input(1);
        let base = [SATURATED_INPUT, SATURATED_INPUT, SATURATED_INPUT, one];
        assert_eq!(input_preparation_tx_count(&base), 2);
        // encoding the fee pushes the inputs into a third tx, paid by i = 1
        assert_eq!(
            calculator().send_fee_for_inputs(1_000_000_000, &base).unwrap(),
            405_000
        );
    }

    #[test]
    fn test_topup_fee() {
        // 2 * 5000 + 0 + 24 * 5000 - 10000 + 5000
        assert_eq!(calculator().topup_fee(1_000_000_000), 125_000);
    }

    #[test]
    fn test_commitment_hash_fee_batched() {
        let c = FeeCalculator::new(test_fee(), 2, 0).unwrap();
        assert_eq!(c.commitment_hash_fee(), (25 * 5000u64).div_ceil(4));
    }

    #[test]
    fn test_unsupported_batching_rate() {
        assert!(matches!(
            FeeCalculator::new(test_fee(), 5, 0),
            Err(ElusivError::TooLargeSize(_))
        ));
    }

    #[test]
    fn test_privacy_fee_basis_points() {
        let mut fee = test_fee();
        fee.proof_network_fee = 100;
        let c = FeeCalculator::new(fee, 0, 0).unwrap();
        assert_eq!(c.privacy_fee(1_000_000_000), 10_000_000);
        assert_eq!(c.privacy_fee(99), 0);
    }

    #[test]
    fn test_estimate_send_fee_parts() {
        let registry = TokenRegistry::default();
        let usdc = registry.by_symbol("USDC").unwrap();
        let c = calculator();

        let fee = c
            .estimate_send_fee(1_000_000_000, &send_inputs(1), usdc, false, None, Some(50))
            .unwrap();
        assert_eq!(fee.tx_fee, 405_000);
        assert_eq!(fee.token_acc_rent, usdc.token_account_rent);
        assert_eq!(fee.extra_fee, 0);

        assert!(matches!(
            c.estimate_send_fee(1, &send_inputs(1), usdc, true, None, None),
            Err(ElusivError::MissingPrice { token_id: 1 })
        ));
    }

    #[test]
    fn test_estimate_with_merge() {
        let registry = TokenRegistry::default();
        let sol = registry.by_id(0).unwrap();
        let fee = calculator()
            .estimate_send_fee(1_000_000_000, &send_inputs(1), sol, false, Some(&send_inputs(4)), None)
            .unwrap();
        assert_eq!(fee.token_acc_rent, 0);
        assert!(fee.extra_fee > 0);
        assert_eq!(fee.total_in_token().unwrap(), fee.tx_fee + fee.extra_fee);
    }
}
