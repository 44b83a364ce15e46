//! Money Conversion Module
//!
//! The ledger keeps every amount as a `Decimal` denominated in ether. The chain
//! speaks wei (`10^18` per ether). All conversions between the two MUST go
//! through this module so that no call site re-derives the scale.
//!
//! ## Design Principles
//! 1. Explicit Error Handling: no silent truncation of sub-wei precision
//! 2. Amounts crossing the chain boundary are never negative
//!
//! ## Usage
//! ```rust
//! use chain_ledger::money::{eth_to_wei, wei_to_eth};
//! use rust_decimal::Decimal;
//!
//! let wei = eth_to_wei(Decimal::new(15, 1)).unwrap(); // 1.5 ETH
//! assert_eq!(wei, 1_500_000_000_000_000_000u128);
//! assert_eq!(wei_to_eth(wei), Decimal::new(15, 1));
//! ```

use rust_decimal::prelude::*;
use thiserror::Error;

/// Decimal places of the chain's native unit (wei per ether = 10^18)
pub const ETH_DECIMALS: u32 = 18;

/// Ledger amount, denominated in ether
pub type Amount = Decimal;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Precision overflow: provided {provided} decimals, max allowed {max}")]
    PrecisionOverflow { provided: u32, max: u32 },

    #[error("Amount must not be negative")]
    Negative,

    #[error("Amount too large, would overflow")]
    Overflow,

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

fn wei_per_eth() -> Decimal {
    Decimal::from(10u64.pow(ETH_DECIMALS))
}

/// Convert an ether amount to wei
///
/// # Errors
/// * `Negative` - amount below zero
/// * `PrecisionOverflow` - more than 18 fractional digits
/// * `Overflow` - result does not fit in `u128`
pub fn eth_to_wei(amount: Amount) -> Result<u128, MoneyError> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(MoneyError::Negative);
    }

    let normalized = amount.normalize();
    if normalized.scale() > ETH_DECIMALS {
        return Err(MoneyError::PrecisionOverflow {
            provided: normalized.scale(),
            max: ETH_DECIMALS,
        });
    }

    // Split to keep the multiplication inside Decimal's 96-bit mantissa
    let whole = normalized.trunc();
    let frac = normalized - whole;

    let whole_wei = whole
        .to_u128()
        .and_then(|w| w.checked_mul(10u128.pow(ETH_DECIMALS)))
        .ok_or(MoneyError::Overflow)?;
    let frac_wei = (frac * wei_per_eth()).to_u128().ok_or(MoneyError::Overflow)?;

    whole_wei.checked_add(frac_wei).ok_or(MoneyError::Overflow)
}

/// Convert wei to an ether amount
///
/// Values beyond Decimal's range saturate to `Decimal::MAX`; no real chain
/// balance gets there.
pub fn wei_to_eth(wei: u128) -> Amount {
    let scale = 10u128.pow(ETH_DECIMALS);
    let whole = wei / scale;
    let frac = wei % scale;

    let whole = match Decimal::from_u128(whole) {
        Some(w) => w,
        None => return Decimal::MAX,
    };
    // frac < 10^18 always fits
    let frac = Decimal::from_i128_with_scale(frac as i128, ETH_DECIMALS);
    (whole + frac).normalize()
}

/// Parse a `0x`-prefixed hex quantity (JSON-RPC encoding) into wei
pub fn parse_hex_wei(quantity: &str) -> Result<u128, MoneyError> {
    let digits = quantity.trim_start_matches("0x");
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16).map_err(|e| {
        if digits.len() > 32 {
            MoneyError::Overflow
        } else {
            MoneyError::InvalidFormat(format!("bad hex quantity {}: {}", quantity, e))
        }
    })
}

/// Encode wei as a JSON-RPC hex quantity
pub fn format_hex_wei(wei: u128) -> String {
    format!("0x{:x}", wei)
}

/// Parse a client-supplied decimal string amount (e.g. "5.5")
///
/// Rejects empty input, explicit signs and more than 18 fractional digits.
pub fn parse_amount(amount_str: &str) -> Result<Amount, MoneyError> {
    let s = amount_str.trim();
    if s.is_empty() {
        return Err(MoneyError::InvalidFormat("empty string".into()));
    }
    if s.starts_with('-') {
        return Err(MoneyError::Negative);
    }
    if s.starts_with('+') {
        return Err(MoneyError::InvalidFormat("explicit sign not allowed".into()));
    }
    if let Some((_, frac)) = s.split_once('.')
        && frac.len() > ETH_DECIMALS as usize
    {
        return Err(MoneyError::PrecisionOverflow {
            provided: frac.len() as u32,
            max: ETH_DECIMALS,
        });
    }

    Decimal::from_str(s).map_err(|e| MoneyError::InvalidFormat(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eth_to_wei() {
        assert_eq!(eth_to_wei(Decimal::ONE).unwrap(), 1_000_000_000_000_000_000);
        assert_eq!(
            eth_to_wei(Decimal::new(55, 1)).unwrap(),
            5_500_000_000_000_000_000
        );
        assert_eq!(eth_to_wei(Decimal::ZERO).unwrap(), 0);
        // 1 wei
        assert_eq!(eth_to_wei(Decimal::new(1, 18)).unwrap(), 1);
    }

    #[test]
    fn test_eth_to_wei_rejects() {
        assert_eq!(eth_to_wei(Decimal::new(-1, 0)), Err(MoneyError::Negative));
        assert!(matches!(
            eth_to_wei(Decimal::new(1, 19)),
            Err(MoneyError::PrecisionOverflow { provided: 19, .. })
        ));
    }

    #[test]
    fn test_wei_to_eth() {
        assert_eq!(wei_to_eth(1_000_000_000_000_000_000), Decimal::ONE);
        assert_eq!(wei_to_eth(500_000_000_000_000_000), Decimal::new(5, 1));
        assert_eq!(wei_to_eth(0), Decimal::ZERO);
        assert_eq!(wei_to_eth(1), Decimal::new(1, 18));
    }

    #[test]
    fn test_hex_quantities() {
        assert_eq!(parse_hex_wei("0x0").unwrap(), 0);
        assert_eq!(parse_hex_wei("0xde0b6b3a7640000").unwrap(), 1_000_000_000_000_000_000);
        assert_eq!(format_hex_wei(1_000_000_000_000_000_000), "0xde0b6b3a7640000");
        assert!(parse_hex_wei("0xzz").is_err());
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("5.5").unwrap(), Decimal::new(55, 1));
        assert_eq!(parse_amount(" 10 ").unwrap(), Decimal::from(10));
        assert_eq!(parse_amount("-1"), Err(MoneyError::Negative));
        assert!(parse_amount("").is_err());
        assert!(parse_amount("+1").is_err());
        assert!(parse_amount("abc").is_err());
        assert!(matches!(
            parse_amount("0.0000000000000000001"),
            Err(MoneyError::PrecisionOverflow { .. })
        ));
    }
}
