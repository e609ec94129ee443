use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::errors::ServiceError;

const MINOR_UNIT_SCALE: u32 = 2;
/// Largest accepted amount in major units.
pub const MAX_AMOUNT_MAJOR: i64 = 1_000_000_000_000;

/// Converts a positive amount with at most two decimal places to minor units.
pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    if amount <= Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "Amount must be greater than zero".to_string(),
        ));
    }
    if amount.normalize().scale() > MINOR_UNIT_SCALE {
        return Err(ServiceError::ValidationError(
            "Amount must have at most 2 decimal places".to_string(),
        ));
    }
    if amount > Decimal::from(MAX_AMOUNT_MAJOR) {
        return Err(too_large());
    }
    amount
        .checked_mul(Decimal::ONE_HUNDRED)
        .and_then(|minor| minor.to_i64())
        .ok_or_else(too_large)
}

fn too_large() -> ServiceError {
    ServiceError::ValidationError("Amount is too large".to_string())
}

pub fn from_minor_units(minor: i64) -> Decimal {
    Decimal::new(minor, MINOR_UNIT_SCALE)
}

/// Converts a sum of minor units, which may exceed `i64`, back to a decimal.
pub fn sum_to_decimal(minor: i128) -> Result<Decimal, ServiceError> {
    Decimal::try_from_i128_with_scale(minor, MINOR_UNIT_SCALE)
        .map_err(|e| ServiceError::InternalError(format!("Revenue total out of range: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    #[test]
    fn converts_between_major_and_minor_units() {
        assert_eq!(to_minor_units(dec!(100)).unwrap(), 10_000);
        assert_eq!(to_minor_units(dec!(12.5)).unwrap(), 1_250);
        assert_eq!(to_minor_units(dec!(0.01)).unwrap(), 1);
        assert_eq!(from_minor_units(1_250), dec!(12.50));
    }

    #[test]
    fn trailing_zeros_do_not_count_as_precision() {
        assert_eq!(to_minor_units(dec!(9.9900)).unwrap(), 999);
    }

    #[test]
    fn rejects_non_positive_and_sub_cent_amounts() {
        assert_matches!(to_minor_units(dec!(0)), Err(ServiceError::ValidationError(_)));
        assert_matches!(to_minor_units(dec!(-5)), Err(ServiceError::ValidationError(_)));
        assert_matches!(to_minor_units(dec!(1.005)), Err(ServiceError::ValidationError(_)));
    }

    #[test]
    fn sums_beyond_i64_stay_exact() {
        let two_large = i128::from(i64::MAX) * 2;
        assert_eq!(
            sum_to_decimal(two_large).unwrap(),
            dec!(184467440737095516.14)
        );
        assert_matches!(sum_to_decimal(i128::MAX), Err(ServiceError::InternalError(_)));
    }

    #[test]
    fn amounts_above_the_ceiling_are_rejected_not_overflowed() {
        assert_eq!(
            to_minor_units(Decimal::from(MAX_AMOUNT_MAJOR)).unwrap(),
            100_000_000_000_000
        );
        assert_matches!(
            to_minor_units(dec!(1000000000000.01)),
            Err(ServiceError::ValidationError(msg)) if msg == "Amount is too large"
        );
        assert_matches!(
            to_minor_units(Decimal::MAX),
            Err(ServiceError::ValidationError(msg)) if msg == "Amount is too large"
        );
        assert_matches!(
            to_minor_units(dec!(90000000000000000)),
            Err(ServiceError::ValidationError(_))
        );
    }
}
