//! Symbol allow-list gate for the on-chain adapter.

use proxy_core::chains;

/// Shell-style wildcard match supporting `*` and `?`.
pub fn matches_pattern(pattern: &str, symbol: &str) -> bool {
    fn inner(p: &[u8], s: &[u8]) -> bool {
        match (p.first(), s.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                inner(&p[1..], s) || (!s.is_empty() && inner(p, &s[1..]))
            }
            (Some(b'?'), Some(_)) => inner(&p[1..], &s[1..]),
            (Some(pc), Some(sc)) if pc == sc => inner(&p[1..], &s[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), symbol.as_bytes())
}

/// Whether a symbol passes the configured allow-list.
pub fn is_symbol_allowed(symbol: &str) -> bool {
    if symbol.is_empty() {
        return false;
    }
    chains::allowed_token_patterns()
        .iter()
        .any(|pattern| matches_pattern(pattern, symbol))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_pattern_literal() {
        assert!(matches_pattern("DAI", "DAI"));
        assert!(!matches_pattern("DAI", "DAO"));
    }

    #[test]
    fn test_matches_pattern_wildcards() {
        assert!(matches_pattern("*USD*", "USDT"));
        assert!(matches_pattern("*USD*", "aUSDC"));
        assert!(matches_pattern("*BTC*", "WBTC"));
        assert!(matches_pattern("TON*", "TONCOIN"));
        assert!(!matches_pattern("TON*", "PROTON"));
        assert!(matches_pattern("?ETH", "WETH"));
        assert!(!matches_pattern("?ETH", "ETH"));
    }

    #[test]
    fn test_is_symbol_allowed_rejects_empty() {
        assert!(!is_symbol_allowed(""));
    }

    #[test]
    fn test_is_symbol_allowed_default_list() {
        // Defaults apply when no env override was loaded.
        assert!(is_symbol_allowed("USDT"));
        assert!(is_symbol_allowed("WETH"));
        assert!(!is_symbol_allowed("PEPE"));
    }
}
