//! UTXO selection with dust filtering and change suppression.
//!
//! All amounts are integer satoshis and all sizes integer vbytes. Fees are
//! `vsize * fee_rate` with no rounding step.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::types::UnspentOutput;

pub const SEGWIT_INPUT_VBYTES: u64 = 68;
pub const LEGACY_INPUT_VBYTES: u64 = 148;
pub const SEGWIT_OUTPUT_VBYTES: u64 = 31;
pub const LEGACY_OUTPUT_VBYTES: u64 = 34;
/// 10.5 vbytes of version, locktime, counts and segwit marker, rounded up.
pub const SEGWIT_OVERHEAD_VBYTES: u64 = 11;
pub const LEGACY_OVERHEAD_VBYTES: u64 = 10;

/// Smallest change output ever created, whatever the fee rate.
pub const MIN_CHANGE_SATS: u64 = 546;

pub fn input_vsize(segwit: bool) -> u64 {
    if segwit {
        SEGWIT_INPUT_VBYTES
    } else {
        LEGACY_INPUT_VBYTES
    }
}

pub fn output_vsize(segwit: bool) -> u64 {
    if segwit {
        SEGWIT_OUTPUT_VBYTES
    } else {
        LEGACY_OUTPUT_VBYTES
    }
}

/// Estimated virtual size of a transaction with `inputs` inputs and `outputs` outputs.
pub fn estimate_vsize(inputs: usize, outputs: usize, segwit: bool) -> u64 {
    let overhead = if segwit {
        SEGWIT_OVERHEAD_VBYTES
    } else {
        LEGACY_OVERHEAD_VBYTES
    };
    overhead
        .saturating_add(input_vsize(segwit).saturating_mul(inputs as u64))
        .saturating_add(output_vsize(segwit).saturating_mul(outputs as u64))
}

pub fn estimate_fee(inputs: usize, outputs: usize, segwit: bool, fee_rate: u64) -> u64 {
    estimate_vsize(inputs, outputs, segwit).saturating_mul(fee_rate)
}

/// Cost of spending one input at `fee_rate`; outputs worth no more than this are dust.
pub fn input_spend_cost(segwit: bool, fee_rate: u64) -> u64 {
    input_vsize(segwit).saturating_mul(fee_rate)
}

/// Change below this is folded into the fee instead of creating an output.
pub fn change_dust_threshold(segwit: bool, fee_rate: u64) -> u64 {
    input_spend_cost(segwit, fee_rate).max(MIN_CHANGE_SATS)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionRequest {
    pub target: u64,
    pub fee_rate: u64,
    pub segwit: bool,
}

impl SelectionRequest {
    pub fn new(target: u64, fee_rate: u64, segwit: bool) -> Result<Self, EngineError> {
        if target == 0 {
            return Err(EngineError::InvalidRequest(
                "target amount must be greater than zero".to_string(),
            ));
        }
        if fee_rate == 0 {
            return Err(EngineError::InvalidRequest(
                "fee rate must be greater than zero".to_string(),
            ));
        }
        Ok(SelectionRequest {
            target,
            fee_rate,
            segwit,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionResult {
    pub inputs: Vec<UnspentOutput>,
    pub total_input: u64,
    pub target: u64,
    pub fee: u64,
    pub change: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionStrategy {
    /// Accumulate the largest outputs first: fewest inputs, smallest fee.
    #[default]
    LargestFirst,
    /// Accumulate the smallest outputs first, consolidating the wallet.
    SmallestFirst,
    /// Take a single closely matching output if there is one, otherwise run
    /// both accumulators and keep the one with fewer inputs (ties go to
    /// largest-first).
    Optimal,
}

/// Stateless coin selector; cheap to build per call or share.
#[derive(Debug, Clone, Copy, Default)]
pub struct Selector {
    strategy: SelectionStrategy,
}

impl Selector {
    pub fn new(strategy: SelectionStrategy) -> Self {
        Selector { strategy }
    }

    /// Drops outputs that cost at least their own value to spend.
    pub fn filter_dust(
        &self,
        candidates: &[UnspentOutput],
        fee_rate: u64,
        segwit: bool,
    ) -> Vec<UnspentOutput> {
        let cost = input_spend_cost(segwit, fee_rate);
        let (usable, dust): (Vec<_>, Vec<_>) =
            candidates.iter().cloned().partition(|utxo| utxo.value > cost);
        if !dust.is_empty() {
            log::debug!(
                "dropped {} dust outputs (spend cost {} sats each)",
                dust.len(),
                cost
            );
        }
        usable
    }

    pub fn select(
        &self,
        candidates: &[UnspentOutput],
        request: &SelectionRequest,
    ) -> Result<SelectionResult, EngineError> {
        log::debug!(
            "selecting for {} sats at {} sat/vB from {} candidates ({:?})",
            request.target,
            request.fee_rate,
            candidates.len(),
            self.strategy
        );
        match self.strategy {
            SelectionStrategy::LargestFirst => accumulate(sorted(candidates, true), request),
            SelectionStrategy::SmallestFirst => accumulate(sorted(candidates, false), request),
            SelectionStrategy::Optimal => {
                if let Some(single) = close_single_match(candidates, request) {
                    return accumulate(vec![single], request);
                }
                let largest = accumulate(sorted(candidates, true), request)?;
                match accumulate(sorted(candidates, false), request) {
                    Ok(smallest) if smallest.inputs.len() < largest.inputs.len() => Ok(smallest),
                    _ => Ok(largest),
                }
            }
        }
    }
}

/// Independent re-check of a selection's arithmetic.
pub fn validate_selection(result: &SelectionResult, target: u64) -> Result<(), EngineError> {
    let fail = |reason: String| Err(EngineError::InvalidSelection(reason));

    if result.inputs.is_empty() {
        return fail("no inputs".to_string());
    }
    if result.target != target {
        return fail(format!("target {} does not match request {}", result.target, target));
    }
    let sum = result
        .inputs
        .iter()
        .try_fold(0u64, |acc, utxo| acc.checked_add(utxo.value));
    if sum != Some(result.total_input) {
        return fail(format!(
            "total input {} does not match the sum of inputs",
            result.total_input
        ));
    }
    if result.total_input < target {
        return fail(format!(
            "total input {} below target {}",
            result.total_input, target
        ));
    }
    let expected_change = (result.total_input - target).checked_sub(result.fee);
    if expected_change != Some(result.change) {
        return fail(format!(
            "total input {} - target {} - fee {} != change {}",
            result.total_input, target, result.fee, result.change
        ));
    }
    Ok(())
}

/// First output (in provider order) that alone covers the payment without a
/// change output and overshoots by more than [`MIN_CHANGE_SATS`] but less
/// than a tenth of the amount needed.
fn close_single_match<'a>(
    candidates: &'a [UnspentOutput],
    request: &SelectionRequest,
) -> Option<&'a UnspentOutput> {
    let needed = request
        .target
        .saturating_add(estimate_fee(1, 1, request.segwit, request.fee_rate));
    let found = candidates.iter().find(|utxo| {
        utxo.value.checked_sub(needed).is_some_and(|diff| {
            diff > MIN_CHANGE_SATS && diff.saturating_mul(10) < needed
        })
    });
    if let Some(utxo) = found {
        log::debug!("single output {} sats closely matches {} sats", utxo.value, needed);
    }
    found
}

// Stable sort: equal values keep provider order.
fn sorted(candidates: &[UnspentOutput], largest_first: bool) -> Vec<&UnspentOutput> {
    let mut pool: Vec<&UnspentOutput> = candidates.iter().collect();
    if largest_first {
        pool.sort_by(|a, b| b.value.cmp(&a.value));
    } else {
        pool.sort_by(|a, b| a.value.cmp(&b.value));
    }
    pool
}

fn accumulate(
    pool: Vec<&UnspentOutput>,
    request: &SelectionRequest,
) -> Result<SelectionResult, EngineError> {
    let &SelectionRequest {
        target,
        fee_rate,
        segwit,
    } = request;
    let mut inputs = Vec::new();
    let mut total: u64 = 0;

    for utxo in pool {
        inputs.push(utxo.clone());
        total = total.saturating_add(utxo.value);
        let n = inputs.len();

        let fee_with_change = estimate_fee(n, 2, segwit, fee_rate);
        if total >= target.saturating_add(fee_with_change) {
            let change = total - target - fee_with_change;
            if change < change_dust_threshold(segwit, fee_rate) {
                log::warn!(
                    "change of {} sats is below the dust threshold, adding it to the fee",
                    change
                );
                return Ok(finish(inputs, total, target, total - target, 0));
            }
            return Ok(finish(inputs, total, target, fee_with_change, change));
        }

        // Covered without a change output: the leftover is smaller than one
        // output's own cost, so it can only go to the fee.
        let fee_without_change = estimate_fee(n, 1, segwit, fee_rate);
        if total >= target.saturating_add(fee_without_change) {
            return Ok(finish(inputs, total, target, total - target, 0));
        }
    }

    let required = target.saturating_add(estimate_fee(inputs.len().max(1), 1, segwit, fee_rate));
    log::error!(
        "insufficient funds: need {} sats, have {} sats",
        required,
        total
    );
    Err(EngineError::InsufficientFunds {
        available: total,
        required,
    })
}

fn finish(
    inputs: Vec<UnspentOutput>,
    total_input: u64,
    target: u64,
    fee: u64,
    change: u64,
) -> SelectionResult {
    log::debug!(
        "selected {} inputs: total {} sats, fee {} sats, change {} sats",
        inputs.len(),
        total_input,
        fee,
        change
    );
    SelectionResult {
        inputs,
        total_input,
        target,
        fee,
        change,
    }
}
