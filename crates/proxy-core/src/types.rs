use serde::{Deserialize, Serialize};

/// Upstream price source identifiers.
///
/// The string forms are stored in `coins.price_source` /
/// `coins.last_price_source` and must stay stable across deployments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    Coingecko,
    Geckoterminal,
    CoinGeckoOnChain,
    Defillama,
    DodoexRoute,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Coingecko => "coingecko",
            Source::Geckoterminal => "geckoterminal",
            Source::CoinGeckoOnChain => "coinGeckoOnChain",
            Source::Defillama => "defillama",
            Source::DodoexRoute => "dodoexRoute",
        }
    }

    pub fn parse(s: &str) -> Option<Source> {
        match s {
            "coingecko" => Some(Source::Coingecko),
            "geckoterminal" => Some(Source::Geckoterminal),
            "coinGeckoOnChain" => Some(Source::CoinGeckoOnChain),
            "defillama" => Some(Source::Defillama),
            "dodoexRoute" => Some(Source::DodoexRoute),
            _ => None,
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a batch price response.
///
/// `serial` preserves the caller's input index so concurrent fills cannot
/// permute the output array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceResult {
    #[serde(rename = "chainId")]
    pub chain_id: String,
    pub address: String,
    pub price: Option<String>,
    pub symbol: Option<String>,
    pub network: Option<String>,
    #[serde(rename = "date")]
    pub timestamp: String,
    pub serial: usize,
    #[serde(skip)]
    pub request_status: Option<String>,
}

impl PriceResult {
    /// Empty result for an input that produced no price.
    pub fn empty(chain_id: &str, address: &str, symbol: Option<String>, network: Option<String>) -> Self {
        Self {
            chain_id: chain_id.to_string(),
            address: address.to_string(),
            price: None,
            symbol,
            network,
            timestamp: "0".to_string(),
            serial: 0,
            request_status: None,
        }
    }

    pub fn has_price(&self) -> bool {
        matches!(self.price.as_deref(), Some(p) if !p.is_empty())
    }
}

/// Composite coin id: `{chainId}_{lowercase(address)}`.
pub fn coin_id(chain_id: &str, address: &str) -> String {
    format!("{}_{}", chain_id, address.to_lowercase())
}

/// Returns `Some` only for a non-empty element at `index`.
pub fn get_or_none(slice: &[String], index: usize) -> Option<String> {
    match slice.get(index) {
        Some(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Element at `index` or the empty string.
pub fn get_or_default(slice: &[String], index: usize) -> String {
    slice.get(index).cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coin_id_lowercases_address() {
        assert_eq!(
            coin_id("1", "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"),
            "1_0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2"
        );
    }

    #[test]
    fn test_source_roundtrip() {
        for s in [
            Source::Coingecko,
            Source::Geckoterminal,
            Source::CoinGeckoOnChain,
            Source::Defillama,
            Source::DodoexRoute,
        ] {
            assert_eq!(Source::parse(s.as_str()), Some(s));
        }
        assert_eq!(Source::parse("unknown"), None);
    }

    #[test]
    fn test_get_or_none_skips_empty() {
        let v = vec!["a".to_string(), String::new()];
        assert_eq!(get_or_none(&v, 0), Some("a".to_string()));
        assert_eq!(get_or_none(&v, 1), None);
        assert_eq!(get_or_none(&v, 5), None);
    }

    #[test]
    fn test_price_result_has_price() {
        let mut r = PriceResult::empty("1", "0xabc", None, None);
        assert!(!r.has_price());
        r.price = Some(String::new());
        assert!(!r.has_price());
        r.price = Some("1.5".to_string());
        assert!(r.has_price());
    }
}
