//! Request parameter completion and validation shared by the price routes.

use proxy_core::chains;

/// Fill in whichever of `chain_ids` / `networks` is missing using the chain
/// map, then validate that every array has `expected_len` entries.
pub fn complete_chains(
    addresses_len: usize,
    mut chain_ids: Vec<String>,
    mut networks: Vec<String>,
) -> Result<(Vec<String>, Vec<String>), String> {
    if chain_ids.is_empty() && !networks.is_empty() {
        chain_ids = Vec::with_capacity(networks.len());
        for network in &networks {
            match chains::chain_id_for(network) {
                Some(chain_id) => chain_ids.push(chain_id),
                None => return Err(format!("{} Unsupported network", network)),
            }
        }
    } else if networks.is_empty() && !chain_ids.is_empty() {
        networks = Vec::with_capacity(chain_ids.len());
        for chain_id in &chain_ids {
            match chains::network_name(chain_id) {
                Some(network) => networks.push(network),
                None => return Err(format!("{} Unsupported network", chain_id)),
            }
        }
    }

    if addresses_len != chain_ids.len() || addresses_len != networks.len() {
        return Err(
            "the lengths of the addresses and networks arrays must be the same".to_string(),
        );
    }
    Ok((chain_ids, networks))
}

/// Resolve a single network-or-chain-id pair the same way.
pub fn complete_chain_single(
    chain_id: &str,
    network: &str,
) -> Result<(String, String), String> {
    if chain_id.is_empty() && !network.is_empty() {
        match chains::chain_id_for(network) {
            Some(id) => Ok((id, network.to_string())),
            None => Err(format!("{} Unsupported network", network)),
        }
    } else if !chain_id.is_empty() {
        let network = chains::network_name(chain_id).unwrap_or_default();
        Ok((chain_id.to_string(), network))
    } else {
        Err("chainId or network is required".to_string())
    }
}

/// `"false"` strings flip the boolean defaults used by the GET handlers.
pub fn flag_or(value: Option<&str>, default: bool) -> bool {
    match value {
        Some(raw) => raw != "false",
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proxy_core::chains::ChainMaps;

    // One test touches the process-wide chain maps to avoid write races
    // between test threads.
    #[test]
    fn test_complete_chains_and_single() {
        let mut maps = ChainMaps::default();
        maps.parse_chain_mapping(r#"{"ethereum": "1", "bsc": "56"}"#)
            .unwrap();
        chains::replace(maps);

        // networks -> chain ids
        let (chain_ids, networks) = complete_chains(
            2,
            vec![],
            vec!["ethereum".to_string(), "bsc".to_string()],
        )
        .unwrap();
        assert_eq!(chain_ids, vec!["1", "56"]);
        assert_eq!(networks, vec!["ethereum", "bsc"]);

        // chain ids -> networks
        let (chain_ids, networks) =
            complete_chains(1, vec!["1".to_string()], vec![]).unwrap();
        assert_eq!(chain_ids, vec!["1"]);
        assert_eq!(networks, vec!["ethereum"]);

        // unknown network
        assert!(complete_chains(1, vec![], vec!["solana".to_string()]).is_err());

        // length mismatch
        assert!(complete_chains(2, vec!["1".to_string()], vec![]).is_err());

        let (chain_id, network) = complete_chain_single("", "ethereum").unwrap();
        assert_eq!(chain_id, "1");
        assert_eq!(network, "ethereum");
        assert!(complete_chain_single("", "").is_err());
    }

    #[test]
    fn test_flag_or() {
        assert!(flag_or(None, true));
        assert!(flag_or(Some("true"), true));
        assert!(flag_or(Some("1"), true));
        assert!(!flag_or(Some("false"), true));
    }
}
