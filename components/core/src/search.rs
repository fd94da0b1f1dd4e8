use std::str::FromStr;

use bitcoin::{Address, Network};
use regex::Regex;

/// How `POST /inscriptions`'s free-text `search` field was classified:
/// empty | inscription-id | inscription-number | address | ticker, in
/// that priority order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchKind {
    Empty,
    InscriptionId { tx_id: String, offset: i64 },
    InscriptionNumber(i64),
    Address(String),
    Ticker(String),
}

/// `txid` (64 hex chars) followed by `i<offset>`, e.g.
/// `a1b2...c3d4i0`.
fn inscription_id_regex() -> Regex {
    Regex::new(r"^(?P<txid>[0-9a-f]{64})i(?P<offset>[0-9]+)$").expect("static regex is valid")
}

/// Classifies a search term under the active network. Priority: empty,
/// then inscription-id, then inscription-number, then
/// address (network-scoped), then ticker as the catch-all.
pub fn classify_search(raw: &str, network: Network) -> SearchKind {
    let search = raw.trim();
    if search.is_empty() {
        return SearchKind::Empty;
    }
    if let Some(captures) = inscription_id_regex().captures(search) {
        let tx_id = captures["txid"].to_string();
        let offset: i64 = captures["offset"].parse().unwrap_or(0);
        return SearchKind::InscriptionId { tx_id, offset };
    }
    if let Ok(number) = search.parse::<i64>() {
        return SearchKind::InscriptionNumber(number);
    }
    if let Ok(address) = Address::from_str(search) {
        if address.is_valid_for_network(network) {
            return SearchKind::Address(search.to_string());
        }
    }
    SearchKind::Ticker(search.to_string())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn classifies_empty() {
        assert_eq!(classify_search("  ", Network::Bitcoin), SearchKind::Empty);
    }

    #[test]
    fn classifies_inscription_id() {
        let id = format!("{}i0", "a".repeat(64));
        match classify_search(&id, Network::Bitcoin) {
            SearchKind::InscriptionId { tx_id, offset } => {
                assert_eq!(tx_id, "a".repeat(64));
                assert_eq!(offset, 0);
            }
            other => panic!("expected InscriptionId, got {other:?}"),
        }
    }

    #[test]
    fn classifies_inscription_number() {
        assert_eq!(classify_search("12345", Network::Bitcoin), SearchKind::InscriptionNumber(12345));
    }

    #[test]
    fn classifies_address_on_matching_network() {
        let addr = "bcrt1qw508d6qejxtdg4y5r3zarvary0c5xw7kygt080";
        assert_eq!(classify_search(addr, Network::Regtest), SearchKind::Address(addr.to_string()));
    }

    #[test]
    fn falls_back_to_ticker() {
        assert_eq!(classify_search("ordi", Network::Bitcoin), SearchKind::Ticker("ordi".to_string()));
    }

    #[test]
    fn address_for_wrong_network_falls_back_to_ticker() {
        let addr = "bcrt1qw508d6qejxtdg4y5r3zarvary0c5xw7kygt080";
        match classify_search(addr, Network::Bitcoin) {
            SearchKind::Ticker(t) => assert_eq!(t, addr),
            other => panic!("expected Ticker fallback, got {other:?}"),
        }
    }
}
