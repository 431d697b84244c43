//! Dutch-auction price validation.
//!
//! Within one UTC day a sale price only moves down; across a day boundary it
//! resets to anything above the floor. Rejections are ordinary outcomes and
//! always carry the price the caller should keep.

use chrono::{DateTime, Utc};
use flashfood_core::{utc_day, ErrorCode};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum PriceRejection {
    #[error("price is not a finite number")]
    InvalidInput { kept: f64 },
    #[error("price {new} is below the minimum")]
    BelowMin { kept: f64, new: f64 },
    #[error("same-day drop {kept} -> {new} exceeds the allowed ratio")]
    DropExceeded { kept: f64, new: f64 },
    #[error("same-day rise {kept} -> {new} exceeds the allowed ratio")]
    RiseExceeded { kept: f64, new: f64 },
}

impl PriceRejection {
    /// Price to keep when this rejection is ignored.
    pub fn kept_price(&self) -> f64 {
        match *self {
            PriceRejection::InvalidInput { kept }
            | PriceRejection::BelowMin { kept, .. }
            | PriceRejection::DropExceeded { kept, .. }
            | PriceRejection::RiseExceeded { kept, .. } => kept,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            PriceRejection::InvalidInput { .. } => ErrorCode::InvalidInput,
            PriceRejection::BelowMin { .. } => ErrorCode::PriceBelowMin,
            PriceRejection::DropExceeded { .. } => ErrorCode::PriceDropExceeded,
            PriceRejection::RiseExceeded { .. } => ErrorCode::PriceRiseExceeded,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceValidator {
    pub max_drop_ratio: f64,
    pub max_rise_ratio: f64,
    pub min_price: f64,
    /// Below this old price the rise ratio is not checked.
    pub rise_guard_floor: f64,
}

impl Default for PriceValidator {
    fn default() -> Self {
        Self {
            max_drop_ratio: 0.5,
            max_rise_ratio: 5.0,
            min_price: 1.0,
            rise_guard_floor: 10.0,
        }
    }
}

impl PriceValidator {
    pub fn new(max_drop_ratio: f64, max_rise_ratio: f64, min_price: f64) -> Self {
        Self {
            max_drop_ratio,
            max_rise_ratio,
            min_price,
            ..Self::default()
        }
    }

    pub fn validate_update(
        &self,
        old_price: f64,
        new_price: f64,
        last_update: DateTime<Utc>,
    ) -> Result<f64, PriceRejection> {
        self.validate_update_at(old_price, new_price, last_update, Utc::now())
    }

    /// Returns the price to store, judged at `now`.
    pub fn validate_update_at(
        &self,
        old_price: f64,
        new_price: f64,
        last_update: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<f64, PriceRejection> {
        let kept = old_price;
        if !old_price.is_finite() || !new_price.is_finite() {
            return Err(PriceRejection::InvalidInput { kept });
        }
        if new_price < 0.0 || new_price < self.min_price {
            return Err(PriceRejection::BelowMin { kept, new: new_price });
        }

        if utc_day(last_update) != utc_day(now) {
            return Ok(new_price);
        }

        if old_price <= 0.0 {
            return Ok(new_price);
        }

        if new_price < old_price && new_price / old_price < self.max_drop_ratio {
            return Err(PriceRejection::DropExceeded { kept, new: new_price });
        }

        if new_price > old_price
            && old_price >= self.rise_guard_floor
            && new_price / old_price > self.max_rise_ratio
        {
            return Err(PriceRejection::RiseExceeded { kept, new: new_price });
        }

        Ok(new_price)
    }

    pub fn effective_price_at(
        &self,
        old_price: f64,
        new_price: f64,
        last_update: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> f64 {
        self.validate_update_at(old_price, new_price, last_update, now)
            .unwrap_or_else(|rejection| rejection.kept_price())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 10, 12, 0, 0).single().unwrap()
    }

    fn check(old: f64, new: f64, last: DateTime<Utc>) -> Result<f64, PriceRejection> {
        PriceValidator::default().validate_update_at(old, new, last, noon())
    }

    #[test]
    fn cross_day_trusts_any_price_above_floor() {
        let yesterday = noon() - Duration::days(1);
        assert_eq!(check(110.0, 48.0, yesterday), Ok(48.0));
        assert_eq!(check(48.0, 4800.0, yesterday), Ok(4800.0));
        assert_eq!(
            check(110.0, 0.5, yesterday),
            Err(PriceRejection::BelowMin { kept: 110.0, new: 0.5 })
        );
    }

    #[test]
    fn day_boundary_is_utc_midnight() {
        let late = Utc.with_ymd_and_hms(2026, 5, 9, 23, 59, 59).single().unwrap();
        let early = Utc.with_ymd_and_hms(2026, 5, 10, 0, 0, 0).single().unwrap();
        let v = PriceValidator::default();
        assert_eq!(v.validate_update_at(110.0, 48.0, late, early), Ok(48.0));
        assert!(v.validate_update_at(110.0, 48.0, early, noon()).is_err());
    }

    #[test]
    fn same_day_drop_limits() {
        let now = noon();
        assert_eq!(
            check(110.0, 48.0, now),
            Err(PriceRejection::DropExceeded { kept: 110.0, new: 48.0 })
        );
        assert_eq!(check(100.0, 70.0, now), Ok(70.0));
        assert_eq!(check(100.0, 50.0, now), Ok(50.0));
    }

    #[test]
    fn same_day_rises() {
        let now = noon();
        assert_eq!(check(48.0, 110.0, now), Ok(110.0));
        assert_eq!(
            check(48.0, 480.0, now),
            Err(PriceRejection::RiseExceeded { kept: 48.0, new: 480.0 })
        );
        assert_eq!(check(5.0, 50.0, now), Ok(50.0));
        assert_eq!(check(10.0, 50.0, now), Ok(50.0));
        assert!(check(10.0, 50.01, now).is_err());
        assert_eq!(check(20.0, 20.0, now), Ok(20.0));
    }

    #[test]
    fn bad_inputs_keep_old_price() {
        let now = noon();
        let nan = check(10.0, f64::NAN, now).unwrap_err();
        assert_eq!(nan.kept_price(), 10.0);
        assert_eq!(nan.code(), ErrorCode::InvalidInput);
        assert!(matches!(
            check(f64::INFINITY, 10.0, now),
            Err(PriceRejection::InvalidInput { .. })
        ));
        let negative = check(10.0, -1.0, now - Duration::days(3)).unwrap_err();
        assert_eq!(negative.code(), ErrorCode::PriceBelowMin);
        assert_eq!(negative.code().code(), 20001);
    }

    #[test]
    fn uninitialized_old_price_accepts_anything_above_floor() {
        let now = noon();
        assert_eq!(check(0.0, 25.0, now), Ok(25.0));
        assert!(check(0.0, 0.9, now).is_err());
    }

    #[test]
    fn tunables_are_honoured() {
        let v = PriceValidator::new(0.9, 1.5, 0.1);
        let now = noon();
        assert!(v.validate_update_at(100.0, 85.0, now, now).is_err());
        assert_eq!(v.validate_update_at(100.0, 95.0, now, now), Ok(95.0));
        assert!(v.validate_update_at(100.0, 160.0, now, now).is_err());
        assert_eq!(v.validate_update_at(100.0, 0.2, now - Duration::days(1), now), Ok(0.2));
        assert_eq!(v.effective_price_at(100.0, 10.0, now, now), 100.0);
    }
}
