//! Exact fixed-point arithmetic for token amounts and ETH values
//!
//! Token amounts are integers in the token's smallest unit. ETH-denominated values use an
//! 18 decimal scale (`ONE = 10^18`). Every division truncates toward zero. There is no
//! floating point anywhere on this path.

use std::str::FromStr;

use bigdecimal::BigDecimal;
use num_bigint::BigInt;
use num_traits::{Signed, Zero};

use crate::error::SettlementError;

/// Decimals of every ETH-denominated value
pub const WAD_DECIMALS: u8 = 18;

/// `10^exp`
pub fn pow10(exp: u32) -> BigInt {
    BigInt::from(10u8).pow(exp)
}

/// `ONE = 10^18`
pub fn one() -> BigInt {
    pow10(WAD_DECIMALS as u32)
}

/// ETH value of `amount` token units at `price` (ETH per whole token, 18 decimals)
///
/// `amount * 10^(18 - decimals) * price / ONE`, computed as `amount * price / 10^decimals`
/// which truncates identically and also covers tokens with more than 18 decimals.
pub fn to_eth(amount: &BigInt, price: &BigInt, decimals: u8) -> BigInt {
    amount * price / pow10(decimals as u32)
}

/// `a * b / c`, truncating. A zero denominator yields zero.
pub fn mul_div(a: &BigInt, b: &BigInt, c: &BigInt) -> BigInt {
    if c.is_zero() {
        return BigInt::zero();
    }
    a * b / c
}

/// `max(0, v)`
pub fn clamp_non_negative(v: BigInt) -> BigInt {
    if v.is_negative() {
        BigInt::zero()
    } else {
        v
    }
}

/// Parse a decimal string into an integer at `decimals` scale
///
/// Lossless: more fractional digits than `decimals` are only accepted when the excess
/// digits are zeros.
pub fn parse_units(s: &str, decimals: u8) -> Result<BigInt, SettlementError> {
    let invalid = || SettlementError::InvalidAmount {
        value: s.to_string(),
        decimals,
    };

    let value = BigDecimal::from_str(s.trim()).map_err(|_| invalid())?;
    let scaled = value.with_scale(decimals as i64);
    if scaled != value {
        return Err(invalid());
    }

    let (int, exponent) = scaled.into_bigint_and_exponent();
    debug_assert_eq!(exponent, decimals as i64);
    Ok(int)
}

/// Format an integer at `decimals` scale as a decimal string
///
/// Trailing fractional zeros are trimmed but one fractional digit is always kept,
/// so `10^18` at 18 decimals formats as `"1.0"`.
pub fn format_units(v: &BigInt, decimals: u8) -> String {
    let base = pow10(decimals as u32);
    let abs = v.abs();
    let int = &abs / &base;
    let frac = &abs % &base;

    let mut frac_digits = if decimals == 0 {
        String::new()
    } else {
        format!("{:0>width$}", frac.to_string(), width = decimals as usize)
    };
    while frac_digits.ends_with('0') {
        frac_digits.pop();
    }
    if frac_digits.is_empty() {
        frac_digits.push('0');
    }

    let sign = if v.is_negative() { "-" } else { "" };
    format!("{}{}.{}", sign, int, frac_digits)
}

pub fn parse_ether(s: &str) -> Result<BigInt, SettlementError> {
    parse_units(s, WAD_DECIMALS)
}

pub fn format_ether(v: &BigInt) -> String {
    format_units(v, WAD_DECIMALS)
}

/// Parse a raw integer string (smallest units)
pub fn parse_raw(s: &str) -> Result<BigInt, SettlementError> {
    BigInt::from_str(s.trim()).map_err(|_| SettlementError::InvalidAmount {
        value: s.to_string(),
        decimals: 0,
    })
}

/// Serde adapter storing a `BigInt` as a raw integer string
pub mod raw {
    use num_bigint::BigInt;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(v: &BigInt, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&v.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<BigInt, D::Error> {
        let s = String::deserialize(d)?;
        BigInt::from_str(&s).map_err(D::Error::custom)
    }

    pub mod option {
        use num_bigint::BigInt;
        use serde::{de::Error, Deserialize, Deserializer, Serializer};
        use std::str::FromStr;

        pub fn serialize<S: Serializer>(v: &Option<BigInt>, s: S) -> Result<S::Ok, S::Error> {
            match v {
                Some(v) => s.serialize_some(&v.to_string()),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<BigInt>, D::Error> {
            Option::<String>::deserialize(d)?
                .map(|s| BigInt::from_str(&s).map_err(D::Error::custom))
                .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn big(v: i128) -> BigInt {
        BigInt::from(v)
    }

    #[test]
    fn test_to_eth_scales_by_decimals() {
        // 2,000 USDC at 0.0005 ETH per USDC = 1 ETH
        let usdc = parse_units("2000", 6).unwrap();
        let price = parse_ether("0.0005").unwrap();
        assert_eq!(to_eth(&usdc, &price, 6), one());

        // 18 decimal token at price 1 is its own value
        let amount = parse_ether("3.25").unwrap();
        assert_eq!(to_eth(&amount, &one(), 18), amount);
    }

    #[test]
    fn test_to_eth_matches_wad_formula() {
        let amount = big(123_456_789);
        let price = big(987_654_321_987_654_321);
        for decimals in [0u8, 6, 8, 18] {
            let wad = &amount * pow10(18 - decimals as u32) * &price / one();
            assert_eq!(to_eth(&amount, &price, decimals), wad);
        }
    }

    #[test]
    fn test_truncation_toward_zero() {
        assert_eq!(mul_div(&big(61), &big(100), &big(600)), big(10));
        assert_eq!(mul_div(&big(-61), &big(100), &big(600)), big(-10));
        assert_eq!(mul_div(&big(5), &big(5), &big(0)), big(0));
    }

    #[test]
    fn test_parse_units() {
        assert_eq!(parse_units("1.5", 6).unwrap(), big(1_500_000));
        assert_eq!(parse_units("0.000001", 6).unwrap(), big(1));
        assert_eq!(parse_units("42", 0).unwrap(), big(42));
        assert_eq!(parse_units("-2.5", 1).unwrap(), big(-25));
        // excess zeros are harmless
        assert_eq!(parse_units("1.2300000", 2).unwrap(), big(123));
    }

    #[test]
    fn test_parse_units_rejects_lossy_input() {
        assert!(parse_units("0.0000001", 6).is_err());
        assert!(parse_units("abc", 18).is_err());
        assert!(parse_units("", 18).is_err());
    }

    #[test]
    fn test_format_units() {
        assert_eq!(format_units(&one(), 18), "1.0");
        assert_eq!(format_units(&big(0), 6), "0.0");
        assert_eq!(format_units(&big(1_500_000), 6), "1.5");
        assert_eq!(format_units(&big(1), 18), "0.000000000000000001");
        assert_eq!(format_units(&big(-25), 1), "-2.5");
        assert_eq!(format_units(&big(42), 0), "42.0");
    }

    #[test]
    fn test_format_parse_round_trip() {
        let values = [
            big(0),
            big(1),
            big(-1),
            big(999_999_999_999_999_999),
            big(1_000_000_000_000_000_000_000_001),
            big(-123_456_789_012_345_678_901),
        ];
        for v in values {
            for decimals in [0u8, 6, 8, 18, 24] {
                let s = format_units(&v, decimals);
                assert_eq!(parse_units(&s, decimals).unwrap(), v, "{} @ {}", s, decimals);
            }
        }
    }

    #[test]
    fn test_clamp_non_negative() {
        assert_eq!(clamp_non_negative(big(-5)), big(0));
        assert_eq!(clamp_non_negative(big(5)), big(5));
    }
}
