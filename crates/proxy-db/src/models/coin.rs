use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use std::collections::HashMap;

/// A (chain, address) pair treated as a unique token.
///
/// `id` is always `{chain_id}_{lowercase(address)}`. A non-empty
/// `return_coins_id` marks this record as an alias: lookups resolve against
/// the target record with the id swapped back.
#[derive(Debug, Clone, Default, FromRow, Serialize, Deserialize)]
pub struct Coin {
    pub id: String,
    pub address: String,
    pub chain_id: String,
    pub symbol: Option<String>,
    pub name: Option<String>,
    pub coingecko_coin_id: Option<String>,
    pub coingecko_platforms: Option<Json<HashMap<String, String>>>,
    pub geckoterminal_network: Option<String>,
    pub decimals: Option<i32>,
    pub total_supply: Option<String>,
    /// Pinned preferred provider.
    pub price_source: Option<String>,
    /// Most recent provider that produced a price.
    pub last_price_source: Option<String>,
    /// Alias target: lookups for this id resolve against that record.
    pub return_coins_id: Option<String>,
}

impl Coin {
    /// Minimal record written when an adapter sees a coin for the first time.
    pub fn minimal(
        chain_id: &str,
        address: &str,
        symbol: Option<String>,
        name: Option<String>,
        decimals: Option<i32>,
        total_supply: Option<String>,
        price_source: &str,
    ) -> Self {
        Self {
            id: proxy_core::types::coin_id(chain_id, address),
            address: address.to_lowercase(),
            chain_id: chain_id.to_string(),
            symbol,
            name,
            decimals,
            total_supply,
            price_source: Some(price_source.to_string()),
            ..Default::default()
        }
    }

    /// Whether this record points at another coin's record.
    pub fn alias_target(&self) -> Option<&str> {
        match self.return_coins_id.as_deref() {
            Some(target) if !target.is_empty() && target != self.id => Some(target),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_normalizes_address() {
        let coin = Coin::minimal("1", "0xAbCd", None, None, Some(18), None, "geckoterminal");
        assert_eq!(coin.id, "1_0xabcd");
        assert_eq!(coin.address, "0xabcd");
        assert_eq!(coin.price_source.as_deref(), Some("geckoterminal"));
    }

    #[test]
    fn test_alias_target_ignores_self_and_empty() {
        let mut coin = Coin::minimal("1", "0xabc", None, None, None, None, "coingecko");
        assert_eq!(coin.alias_target(), None);
        coin.return_coins_id = Some(String::new());
        assert_eq!(coin.alias_target(), None);
        coin.return_coins_id = Some("1_0xabc".to_string());
        assert_eq!(coin.alias_target(), None);
        coin.return_coins_id = Some("56_0xdef".to_string());
        assert_eq!(coin.alias_target(), Some("56_0xdef"));
    }
}
