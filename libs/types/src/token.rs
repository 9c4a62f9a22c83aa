//! Tokens and token pairs

use crate::address::{Address, ChainId};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// An ERC-20 token as observed on one chain.
///
/// Identity is `(chain_id, address)`; symbol and decimals are descriptive and
/// never change once observed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
    pub chain_id: ChainId,
}

impl Token {
    pub fn new(chain_id: ChainId, address: Address, symbol: impl Into<String>, decimals: u8) -> Self {
        Self {
            address,
            symbol: symbol.into(),
            decimals,
            chain_id,
        }
    }

    pub fn key(&self) -> (ChainId, Address) {
        (self.chain_id, self.address)
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Token {}

impl Hash for Token {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

/// Token metadata as read from the token contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub symbol: String,
    pub decimals: u8,
}

/// A pair of tokens on one chain.
///
/// Conceptually unordered; operations that need a direction treat `token_a` as
/// the input side and `token_b` as the output side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenPair {
    pub token_a: Token,
    pub token_b: Token,
    pub chain_id: ChainId,
}

impl TokenPair {
    pub fn new(token_a: Token, token_b: Token) -> Self {
        let chain_id = token_a.chain_id;
        Self {
            token_a,
            token_b,
            chain_id,
        }
    }

    /// Same pair with the input side flipped
    pub fn reversed(&self) -> Self {
        Self {
            token_a: self.token_b.clone(),
            token_b: self.token_a.clone(),
            chain_id: self.chain_id,
        }
    }

    /// Direction-independent key: the two addresses in ascending order
    pub fn unordered_key(&self) -> (Address, Address) {
        let (a, b) = (self.token_a.address, self.token_b.address);
        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }

    pub fn contains(&self, token: &Address) -> bool {
        self.token_a.address == *token || self.token_b.address == *token
    }

    /// Human-readable `A/B` label used in logs and errors
    pub fn label(&self) -> String {
        format!("{}/{}", self.token_a.symbol, self.token_b.symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(byte: u8, symbol: &str) -> Token {
        Token::new(137, Address([byte; 20]), symbol, 6)
    }

    #[test]
    fn test_token_identity_ignores_symbol() {
        let a = token(1, "USDC");
        let mut b = a.clone();
        b.symbol = "USDC.e".into();
        assert_eq!(a, b);

        let other_chain = Token::new(1, Address([1; 20]), "USDC", 6);
        assert_ne!(a, other_chain);
    }

    #[test]
    fn test_unordered_key_is_direction_independent() {
        let pair = TokenPair::new(token(9, "USDT"), token(2, "USDC"));
        assert_eq!(pair.unordered_key(), pair.reversed().unordered_key());
        assert_eq!(pair.label(), "USDT/USDC");
        assert_eq!(pair.reversed().label(), "USDC/USDT");
    }
}
