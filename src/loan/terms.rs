//! Loan terms: the single canonical mapping between the enumerated loan
//! parameters and their numeric values. Nothing else derives these numbers.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::money::{Amount, ETH_DECIMALS};

/// Days per loan month
pub const DAYS_PER_MONTH: i64 = 30;

/// Interest rate tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum InterestRate {
    Low = 1,
    Standard = 2,
    High = 3,
    Premium = 4,
}

impl InterestRate {
    pub const ALL: [InterestRate; 4] = [
        InterestRate::Low,
        InterestRate::Standard,
        InterestRate::High,
        InterestRate::Premium,
    ];

    /// Flat rate applied to the principal (0.10 = 10%)
    pub fn rate(&self) -> Decimal {
        match self {
            InterestRate::Low => Decimal::new(5, 2),
            InterestRate::Standard => Decimal::new(10, 2),
            InterestRate::High => Decimal::new(15, 2),
            InterestRate::Premium => Decimal::new(20, 2),
        }
    }

    /// Storage ID
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(InterestRate::Low),
            2 => Some(InterestRate::Standard),
            3 => Some(InterestRate::High),
            4 => Some(InterestRate::Premium),
            _ => None,
        }
    }

    /// Look up the tier carrying exactly this rate
    pub fn from_rate(rate: Decimal) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.rate() == rate)
    }
}

impl fmt::Display for InterestRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.rate())
    }
}

impl TryFrom<i16> for InterestRate {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        InterestRate::from_id(value).ok_or(())
    }
}

/// Loan duration in months
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum LoanDuration {
    Quarter = 3,
    HalfYear = 6,
    Year = 12,
    TwoYears = 24,
}

impl LoanDuration {
    #[inline]
    pub fn months(&self) -> i16 {
        *self as i16
    }

    pub fn from_months(months: i16) -> Option<Self> {
        match months {
            3 => Some(LoanDuration::Quarter),
            6 => Some(LoanDuration::HalfYear),
            12 => Some(LoanDuration::Year),
            24 => Some(LoanDuration::TwoYears),
            _ => None,
        }
    }

    /// End of the loan term starting at `start`
    pub fn end_from(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        start + Duration::days(DAYS_PER_MONTH * self.months() as i64)
    }
}

impl TryFrom<i16> for LoanDuration {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        LoanDuration::from_months(value).ok_or(())
    }
}

/// Interest and total payable for a principal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoanQuote {
    pub principal: Amount,
    pub interest: Amount,
    pub total_payable: Amount,
}

/// Interest is rounded up to whole wei so the total stays payable on chain
pub fn quote(principal: Amount, rate: InterestRate) -> LoanQuote {
    let interest = (principal * rate.rate())
        .round_dp_with_strategy(ETH_DECIMALS, RoundingStrategy::ToPositiveInfinity);
    LoanQuote {
        principal,
        interest,
        total_payable: principal + interest,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_quote() {
        let q = quote(Decimal::from(5), InterestRate::Standard);
        assert_eq!(q.interest, Decimal::new(5, 1));
        assert_eq!(q.total_payable, Decimal::new(55, 1));
    }

    #[test]
    fn test_quote_rounds_to_wei() {
        let q = quote(Decimal::new(1, 18), InterestRate::Low);
        assert_eq!(q.interest, Decimal::new(1, 18));
        assert_eq!(q.total_payable, Decimal::new(2, 18));

        let q = quote(Decimal::new(123_456_789, 17), InterestRate::High);
        assert!(q.total_payable.scale() <= ETH_DECIMALS);
        assert!(crate::money::eth_to_wei(q.total_payable).is_ok());
    }

    #[test]
    fn test_rate_lookup() {
        assert_eq!(
            InterestRate::from_rate(Decimal::new(1, 1)),
            Some(InterestRate::Standard)
        );
        assert_eq!(InterestRate::from_rate(Decimal::new(7, 2)), None);
        assert_eq!(InterestRate::from_id(3), Some(InterestRate::High));
        assert_eq!(InterestRate::try_from(9), Err(()));
    }

    #[test]
    fn test_duration_end() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = LoanDuration::HalfYear.end_from(start);
        assert_eq!((end - start).num_days(), 180);
        assert_eq!(LoanDuration::from_months(12), Some(LoanDuration::Year));
        assert_eq!(LoanDuration::from_months(5), None);
    }
}
