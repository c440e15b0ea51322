use std::{fmt::Display, str::FromStr};

use alloy::primitives::U256;
use serde::{Deserialize, Serialize};

/// The fixed two token universe tracked by the vault.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Token {
    /// The FLUX token
    Flux,
    /// The USDC stable coin
    Usdc,
}

impl Token {
    /// Every token, in a stable order.
    pub const ALL: [Token; 2] = [Token::Flux, Token::Usdc];

    /// Ticker symbol as reported by the chain and by webhook payloads.
    pub fn symbol(&self) -> &'static str {
        match self {
            Token::Flux => "FLUX",
            Token::Usdc => "USDC",
        }
    }
}

impl Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Token {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Token::ALL
            .into_iter()
            .find(|t| t.symbol().eq_ignore_ascii_case(s))
            .ok_or_else(|| anyhow::anyhow!("unknown token: {s}"))
    }
}

/// Returned when a token amount cannot be represented.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("{decimals} decimals cannot be represented")]
pub struct TokenAmountError {
    /// The requested number of decimals
    pub decimals: u8,
}

/// Convert an amount in the token's smallest unit into a decimal string.
///
/// The conversion is exact: `raw / 10^decimals` with trailing fractional zeros removed,
/// e.g. `5000000000000000000` with 18 decimals is `"5"` and `1500000` with 6 decimals is
/// `"1.5"`.
pub fn format_amount(raw: U256, decimals: u8) -> Result<String, TokenAmountError> {
    // 10^78 overflows 256 bits
    if decimals > 77 {
        return Err(TokenAmountError { decimals });
    }
    if decimals == 0 {
        return Ok(raw.to_string());
    }
    let base = U256::from(10u64).pow(U256::from(decimals));
    let (whole, frac) = raw.div_rem(base);
    if frac.is_zero() {
        return Ok(whole.to_string());
    }
    let frac = format!("{:0>width$}", frac.to_string(), width = decimals as usize);
    Ok(format!("{}.{}", whole, frac.trim_end_matches('0')))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_whole_amounts() {
        let raw = U256::from_str("5000000000000000000").unwrap();
        assert_eq!(format_amount(raw, 18).unwrap(), "5");
        assert_eq!(format_amount(U256::ZERO, 6).unwrap(), "0");
        assert_eq!(format_amount(U256::from(42u64), 0).unwrap(), "42");
    }

    #[test]
    fn formats_fractions_without_trailing_zeros() {
        assert_eq!(format_amount(U256::from(1_500_000u64), 6).unwrap(), "1.5");
        assert_eq!(format_amount(U256::from(1u64), 6).unwrap(), "0.000001");
        assert_eq!(format_amount(U256::from(123_456_789u64), 4).unwrap(), "12345.6789");
    }

    #[test]
    fn formats_values_beyond_u128() {
        let raw = U256::MAX;
        let formatted = format_amount(raw, 18).unwrap();
        assert!(formatted.starts_with("115792089237316195423570985008687907853269984665640564039457"));
        let err = format_amount(raw, 78).unwrap_err();
        assert_eq!(err, TokenAmountError { decimals: 78 });
        assert_eq!(err.to_string(), "78 decimals cannot be represented");
    }

    #[test]
    fn parses_symbols() {
        assert_eq!(Token::from_str("flux").unwrap(), Token::Flux);
        assert_eq!(Token::from_str("USDC").unwrap(), Token::Usdc);
        assert!(Token::from_str("ETH").is_err());
        assert_eq!(serde_json::to_string(&Token::Flux).unwrap(), "\"FLUX\"");
    }
}
