//! Token Registry
//!
//! Tokens are identified on the wire by a `u16` id. The registry is a plain
//! value handed to whoever needs it; the default holds the tokens the
//! deployed program supports.

use serde::{Deserialize, Serialize};

pub const LAMPORTS_TOKEN_ID: u16 = 0;

/// Rent-exempt minimum of an SPL token account
pub const TOKEN_ACCOUNT_RENT: u64 = 2_039_280;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub id: u16,
    pub symbol: String,
    pub decimals: u8,
    /// SPL mint, `None` for lamports
    #[serde(default)]
    pub mint: Option<String>,
    /// Lamports needed to open a recipient token account
    #[serde(default)]
    pub token_account_rent: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRegistry {
    tokens: Vec<TokenInfo>,
}

impl TokenRegistry {
    pub fn new(tokens: Vec<TokenInfo>) -> Self {
        Self { tokens }
    }

    pub fn by_id(&self, id: u16) -> Option<&TokenInfo> {
        self.tokens.iter().find(|t| t.id == id)
    }

    pub fn by_symbol(&self, symbol: &str) -> Option<&TokenInfo> {
        self.tokens
            .iter()
            .find(|t| t.symbol.eq_ignore_ascii_case(symbol))
    }

    pub fn tokens(&self) -> &[TokenInfo] {
        &self.tokens
    }
}

impl Default for TokenRegistry {
    fn default() -> Self {
        Self::new(vec![
            TokenInfo {
                id: LAMPORTS_TOKEN_ID,
                symbol: "LAMPORTS".into(),
                decimals: 9,
                mint: None,
                token_account_rent: 0,
            },
            TokenInfo {
                id: 1,
                symbol: "USDC".into(),
                decimals: 6,
                mint: Some("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v".into()),
                token_account_rent: TOKEN_ACCOUNT_RENT,
            },
            TokenInfo {
                id: 2,
                symbol: "USDT".into(),
                decimals: 6,
                mint: Some("Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB".into()),
                token_account_rent: TOKEN_ACCOUNT_RENT,
            },
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_lookup() {
        let registry = TokenRegistry::default();
        assert_eq!(registry.by_id(0).unwrap().symbol, "LAMPORTS");
        assert_eq!(registry.by_symbol("usdt").unwrap().id, 2);
        assert!(registry.by_id(9).is_none());
    }

    #[test]
    fn test_substituted_registry() {
        let registry = TokenRegistry::new(vec![TokenInfo {
            id: 7,
            symbol: "TEST".into(),
            decimals: 2,
            mint: None,
            token_account_rent: 0,
        }]);
        assert!(registry.by_symbol("USDC").is_none());
        assert_eq!(registry.by_id(7).unwrap().decimals, 2);
    }
}
