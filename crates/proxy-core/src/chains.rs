use once_cell::sync::Lazy;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::sync::RwLock;
use tracing::{info, warn};

/// USDT contract used by the route quoter on one chain.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct UsdtAddress {
    pub address: String,
    pub decimal: u32,
}

/// Process-wide chain state loaded from the environment.
///
/// Read-mostly: initialised once at startup, replaced atomically on reload,
/// read under a read lock everywhere else.
#[derive(Debug, Default)]
pub struct ChainMaps {
    name_to_id: HashMap<String, String>,
    id_to_name: HashMap<String, String>,
    usdt_addresses: HashMap<String, UsdtAddress>,
    allowed_tokens: Vec<String>,
    refuse_chain_ids: HashMap<String, ()>,
}

static CHAINS: Lazy<RwLock<ChainMaps>> = Lazy::new(|| RwLock::new(ChainMaps::default()));

impl ChainMaps {
    /// Parse the `CHAIN_MAPPING` JSON (`{"ethereum": "1", ...}`).
    pub fn parse_chain_mapping(&mut self, raw: &str) -> serde_json::Result<usize> {
        let name_to_id: HashMap<String, String> = serde_json::from_str(raw)?;
        let mut id_to_name = HashMap::with_capacity(name_to_id.len());
        for (name, id) in &name_to_id {
            id_to_name.insert(id.clone(), name.clone());
        }
        let len = name_to_id.len();
        self.name_to_id = name_to_id;
        self.id_to_name = id_to_name;
        Ok(len)
    }

    /// Parse the `USDT_ADDRESSES` JSON (`{"1": {"address": "0x…", "decimal": 6}}`).
    pub fn parse_usdt_addresses(&mut self, raw: &str) -> serde_json::Result<usize> {
        self.usdt_addresses = serde_json::from_str(raw)?;
        Ok(self.usdt_addresses.len())
    }

    /// Parse the space-separated refuse list (`REFUSE_CHAIN_IDS`).
    pub fn parse_refuse_chain_ids(&mut self, raw: &str) {
        self.refuse_chain_ids = raw
            .split_whitespace()
            .map(|id| (id.to_string(), ()))
            .collect();
    }

    /// Parse the space-separated symbol allow-list (`GECKO_CHAIN_ALLOWED_TOKENS`).
    pub fn parse_allowed_tokens(&mut self, raw: &str) {
        self.allowed_tokens = raw.split_whitespace().map(|s| s.to_string()).collect();
    }
}

/// Default symbol allow-list for the coingecko-onchain adapter.
const DEFAULT_ALLOWED_TOKENS: &[&str] = &[
    "*USD*", "DAI", "*DODO", "JOJO", "*BTC*", "*ETH*", "*MATIC*", "*BNB*", "*AVAX", "*NEAR",
    "*XRP", "TON*", "*ARB", "ENS",
];

/// Load chain state from environment variables. Called once at startup.
pub fn load_from_env() {
    let mut maps = ChainMaps::default();
    maps.allowed_tokens = DEFAULT_ALLOWED_TOKENS.iter().map(|s| s.to_string()).collect();

    match env::var("CHAIN_MAPPING") {
        Ok(raw) => match maps.parse_chain_mapping(&raw) {
            Ok(len) => info!(chains = len, "CHAIN_MAPPING loaded"),
            Err(e) => warn!(error = %e, "Failed to parse CHAIN_MAPPING"),
        },
        Err(_) => warn!("CHAIN_MAPPING not set"),
    }

    match env::var("USDT_ADDRESSES") {
        Ok(raw) => match maps.parse_usdt_addresses(&raw) {
            Ok(len) => info!(chains = len, "USDT_ADDRESSES loaded"),
            Err(e) => warn!(error = %e, "Failed to parse USDT_ADDRESSES"),
        },
        Err(_) => warn!("USDT_ADDRESSES not set"),
    }

    if let Ok(raw) = env::var("REFUSE_CHAIN_IDS") {
        maps.parse_refuse_chain_ids(&raw);
        info!(chains = maps.refuse_chain_ids.len(), "REFUSE_CHAIN_IDS loaded");
    }

    if let Ok(raw) = env::var("GECKO_CHAIN_ALLOWED_TOKENS") {
        maps.parse_allowed_tokens(&raw);
        info!(tokens = maps.allowed_tokens.len(), "GECKO_CHAIN_ALLOWED_TOKENS loaded");
    }

    *CHAINS.write().expect("chain maps lock poisoned") = maps;
}

/// Replace the process-wide state (tests and admin reloads).
pub fn replace(maps: ChainMaps) {
    *CHAINS.write().expect("chain maps lock poisoned") = maps;
}

/// Resolve a network name or a chain-id string to a chain id.
pub fn chain_id_for(name_or_id: &str) -> Option<String> {
    let maps = CHAINS.read().expect("chain maps lock poisoned");
    if let Some(id) = maps.name_to_id.get(name_or_id) {
        return Some(id.clone());
    }
    if maps.id_to_name.contains_key(name_or_id) {
        return Some(name_or_id.to_string());
    }
    None
}

/// Resolve a chain id to its configured network name.
pub fn network_name(chain_id: &str) -> Option<String> {
    let maps = CHAINS.read().expect("chain maps lock poisoned");
    maps.id_to_name.get(chain_id).cloned()
}

/// USDT contract for the route quoter, if configured for this chain.
pub fn usdt_address(chain_id: &str) -> Option<UsdtAddress> {
    let maps = CHAINS.read().expect("chain maps lock poisoned");
    maps.usdt_addresses.get(chain_id).cloned()
}

/// Whether every request for this chain should be refused outright.
pub fn is_chain_refused(chain_id: &str) -> bool {
    let maps = CHAINS.read().expect("chain maps lock poisoned");
    maps.refuse_chain_ids.contains_key(chain_id)
}

/// Glob patterns gating the coingecko-onchain adapter.
pub fn allowed_token_patterns() -> Vec<String> {
    let maps = CHAINS.read().expect("chain maps lock poisoned");
    if maps.allowed_tokens.is_empty() {
        DEFAULT_ALLOWED_TOKENS.iter().map(|s| s.to_string()).collect()
    } else {
        maps.allowed_tokens.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chain_mapping_builds_both_directions() {
        let mut maps = ChainMaps::default();
        let len = maps
            .parse_chain_mapping(r#"{"ethereum": "1", "bsc-mainnet": "56"}"#)
            .unwrap();
        assert_eq!(len, 2);
        assert_eq!(maps.name_to_id.get("ethereum"), Some(&"1".to_string()));
        assert_eq!(maps.id_to_name.get("56"), Some(&"bsc-mainnet".to_string()));
    }

    #[test]
    fn test_parse_usdt_addresses() {
        let mut maps = ChainMaps::default();
        maps.parse_usdt_addresses(r#"{"1": {"address": "0xdac17f958d2ee523a2206206994597c13d831ec7", "decimal": 6}}"#)
            .unwrap();
        let usdt = maps.usdt_addresses.get("1").unwrap();
        assert_eq!(usdt.decimal, 6);
        assert!(usdt.address.starts_with("0xdac17"));
    }

    #[test]
    fn test_parse_refuse_chain_ids() {
        let mut maps = ChainMaps::default();
        maps.parse_refuse_chain_ids("128  321");
        assert!(maps.refuse_chain_ids.contains_key("128"));
        assert!(maps.refuse_chain_ids.contains_key("321"));
        assert!(!maps.refuse_chain_ids.contains_key("1"));
    }
}
