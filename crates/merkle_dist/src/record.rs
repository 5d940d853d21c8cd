//! Claim records and their canonical leaf encoding

use std::collections::BTreeMap;
use std::str::FromStr;

use alloy_primitives::{hex, keccak256, Address, B256, U256};
use alloy_sol_types::SolValue;
use serde::{Deserialize, Serialize};

use crate::error::MerkleError;

/// One token payout inside a claim record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenAmount {
    pub token: Address,
    pub amount: U256,
}

impl TokenAmount {
    /// Parse a token address and a raw (smallest unit) decimal amount
    pub fn parse(token: &str, amount: &str) -> Result<Self, MerkleError> {
        Ok(Self {
            token: parse_address(token)?,
            amount: U256::from_str_radix(amount, 10)
                .map_err(|_| MerkleError::InvalidAmount(amount.to_string()))?,
        })
    }
}

/// Final claim of one account, committed as a single merkle leaf
///
/// Serialized as `[index, "0x..", [["0x..", "<raw amount>"], ...]]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "RawRecord", try_from = "RawRecord")]
pub struct ClaimRecord {
    /// Position of the account in the distribution order. Never renumbered.
    pub index: u64,
    pub account: Address,
    /// Non-zero token payouts
    pub tokens: Vec<TokenAmount>,
}

#[derive(Serialize, Deserialize)]
struct RawRecord(u64, String, Vec<(String, String)>);

impl ClaimRecord {
    /// Build a record from an account address and `(token, raw amount)` pairs.
    /// Zero amounts are dropped.
    pub fn new(index: u64, account: &str, tokens: &[(String, String)]) -> Result<Self, MerkleError> {
        let mut parsed = Vec::with_capacity(tokens.len());
        for (token, amount) in tokens {
            let t = TokenAmount::parse(token, amount)?;
            if !t.amount.is_zero() {
                parsed.push(t);
            }
        }

        Ok(Self {
            index,
            account: parse_address(account)?,
            tokens: parsed,
        })
    }

    /// ABI parameter encoding of `(uint256 index, address account, (address,uint256)[] tokens)`
    pub fn encode(&self) -> Vec<u8> {
        let tokens: Vec<(Address, U256)> = self.tokens.iter().map(|t| (t.token, t.amount)).collect();
        (U256::from(self.index), self.account, tokens).abi_encode_params()
    }

    /// Leaf digest: keccak256 of the canonical encoding
    pub fn leaf(&self) -> B256 {
        keccak256(self.encode())
    }
}

impl From<ClaimRecord> for RawRecord {
    fn from(r: ClaimRecord) -> Self {
        RawRecord(
            r.index,
            hex::encode_prefixed(r.account.as_slice()),
            r.tokens
                .iter()
                .map(|t| (hex::encode_prefixed(t.token.as_slice()), t.amount.to_string()))
                .collect(),
        )
    }
}

impl TryFrom<RawRecord> for ClaimRecord {
    type Error = MerkleError;

    fn try_from(raw: RawRecord) -> Result<Self, Self::Error> {
        // Keep zero entries out of the leaf even if a hand-edited file carries them
        ClaimRecord::new(raw.0, &raw.1, &raw.2)
    }
}

fn parse_address(s: &str) -> Result<Address, MerkleError> {
    Address::from_str(s).map_err(|_| MerkleError::InvalidAddress(s.to_string()))
}

/// Total payout per token across a distribution
pub fn summary(records: &[ClaimRecord]) -> Result<BTreeMap<Address, U256>, MerkleError> {
    let mut totals: BTreeMap<Address, U256> = BTreeMap::new();

    for record in records {
        for t in &record.tokens {
            let total = totals.entry(t.token).or_insert(U256::ZERO);
            *total = total
                .checked_add(t.amount)
                .ok_or_else(|| MerkleError::Overflow(hex::encode_prefixed(t.token.as_slice())))?;
        }
    }

    Ok(totals)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACCOUNT: &str = "0x00000000000000000000000000000000000000aa";
    const WETH: &str = "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2";
    const USDC: &str = "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48";

    fn word(bytes: &[u8], i: usize) -> &[u8] {
        &bytes[i * 32..(i + 1) * 32]
    }

    #[test]
    fn test_zero_amounts_are_dropped() {
        let r = ClaimRecord::new(
            0,
            ACCOUNT,
            &[(WETH.to_string(), "0".to_string()), (USDC.to_string(), "15".to_string())],
        )
        .unwrap();

        assert_eq!(r.tokens.len(), 1);
        assert_eq!(r.tokens[0].amount, U256::from(15u64));
    }

    #[test]
    fn test_encoding_layout() {
        let r = ClaimRecord::new(7, ACCOUNT, &[(WETH.to_string(), "5".to_string())]).unwrap();
        let enc = r.encode();

        // 3 head words, array length, one (address, uint256) element
        assert_eq!(enc.len(), 6 * 32);
        assert_eq!(word(&enc, 0)[31], 7);
        assert_eq!(word(&enc, 1)[31], 0xaa);
        assert!(word(&enc, 1)[..12].iter().all(|b| *b == 0));
        // dynamic array offset = 3 words
        assert_eq!(word(&enc, 2)[31], 0x60);
        assert_eq!(word(&enc, 3)[31], 1);
        assert_eq!(&word(&enc, 4)[12..], Address::from_str(WETH).unwrap().as_slice());
        assert_eq!(word(&enc, 5)[31], 5);
    }

    #[test]
    fn test_json_shape() {
        let r = ClaimRecord::new(3, ACCOUNT, &[(USDC.to_string(), "1000000".to_string())]).unwrap();
        let json = serde_json::to_string(&r).unwrap();
        assert_eq!(
            json,
            format!("[3,\"{}\",[[\"{}\",\"1000000\"]]]", ACCOUNT, USDC)
        );

        let back: ClaimRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn test_invalid_inputs_rejected() {
        assert!(matches!(
            ClaimRecord::new(0, "0x1234", &[]),
            Err(MerkleError::InvalidAddress(_))
        ));
        assert!(matches!(
            ClaimRecord::new(0, ACCOUNT, &[(WETH.to_string(), "1.5".to_string())]),
            Err(MerkleError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_summary_totals() {
        let a = ClaimRecord::new(0, ACCOUNT, &[(WETH.to_string(), "5".to_string())]).unwrap();
        let b = ClaimRecord::new(
            1,
            ACCOUNT,
            &[(WETH.to_string(), "7".to_string()), (USDC.to_string(), "2".to_string())],
        )
        .unwrap();

        let totals = summary(&[a, b]).unwrap();
        assert_eq!(totals[&Address::from_str(WETH).unwrap()], U256::from(12u64));
        assert_eq!(totals[&Address::from_str(USDC).unwrap()], U256::from(2u64));
    }
}
