//! Fee calculator for the platform/caregiver split
//!
//! Pure and deterministic. The platform fee rounds half-up to the nearest
//! minor unit; the caregiver amount is always the remainder so the split
//! reconciles exactly against the total.

use serde::{Deserialize, Serialize};

use crate::error::PayoutError;
use crate::PayoutResult;

/// Platform fee rate applied to every booking, in whole percent
pub const DEFAULT_FEE_RATE_PERCENT: u32 = 10;

/// Result of splitting a booking total between platform and caregiver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSplit {
    pub platform_fee_amount: i64,
    pub caregiver_amount: i64,
}

/// Split a booking total (integer minor units) at the given fee rate.
///
/// The caregiver amount is derived as `total - fee`, never computed
/// independently, so `platform_fee_amount + caregiver_amount == total_amount`
/// holds exactly for every input.
pub fn compute_split(total_amount: i64, fee_rate_percent: u32) -> PayoutResult<FeeSplit> {
    if total_amount < 0 {
        return Err(PayoutError::validation(format!(
            "total amount must be non-negative, got {}",
            total_amount
        )));
    }
    if fee_rate_percent > 100 {
        return Err(PayoutError::validation(format!(
            "fee rate must be at most 100 percent, got {}",
            fee_rate_percent
        )));
    }

    // Round half-up in minor units
    let platform_fee_amount = (total_amount * fee_rate_percent as i64 + 50) / 100;
    let caregiver_amount = total_amount - platform_fee_amount;

    Ok(FeeSplit {
        platform_fee_amount,
        caregiver_amount,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn even_total_splits_exactly() {
        // $242.00 at 10% -> fee $24.20, caregiver $217.80
        let split = compute_split(24200, 10).unwrap();
        assert_eq!(split.platform_fee_amount, 2420);
        assert_eq!(split.caregiver_amount, 21780);
        assert_eq!(split.platform_fee_amount + split.caregiver_amount, 24200);
    }

    #[test]
    fn uneven_total_rounds_half_up() {
        // 10% of 105 minor units is 10.5, rounds up to 11
        let split = compute_split(105, 10).unwrap();
        assert_eq!(split.platform_fee_amount, 11);
        assert_eq!(split.caregiver_amount, 94);

        // 10% of 104 is 10.4, rounds down to 10
        let split = compute_split(104, 10).unwrap();
        assert_eq!(split.platform_fee_amount, 10);
        assert_eq!(split.caregiver_amount, 94);
    }

    #[test]
    fn conservation_holds_for_awkward_totals() {
        for total in [0, 1, 3, 7, 33, 99, 101, 9999, 123457] {
            let split = compute_split(total, 10).unwrap();
            assert_eq!(
                split.platform_fee_amount + split.caregiver_amount,
                total,
                "split must reconcile for total {}",
                total
            );
        }
    }

    #[test]
    fn zero_total_yields_zero_split() {
        let split = compute_split(0, 10).unwrap();
        assert_eq!(split.platform_fee_amount, 0);
        assert_eq!(split.caregiver_amount, 0);
    }

    #[test]
    fn negative_total_is_rejected() {
        assert!(matches!(
            compute_split(-1, 10).unwrap_err(),
            PayoutError::Validation(_)
        ));
    }

    #[test]
    fn out_of_range_rate_is_rejected() {
        assert!(compute_split(100, 101).is_err());
    }

    #[test]
    fn full_rate_pays_platform_everything() {
        let split = compute_split(500, 100).unwrap();
        assert_eq!(split.platform_fee_amount, 500);
        assert_eq!(split.caregiver_amount, 0);
    }
}
