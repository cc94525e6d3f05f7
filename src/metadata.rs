/// Metadata keys and the value encodings behind them.
///
/// Every node exposes a small metadata store over the admin protocol. Keys
/// and values are UTF-8 byte sequences on the wire; the three core keys map
/// to a cluster descriptor, a store-definition list, and a server-state
/// enum.
use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::Error;

pub const CLUSTER_KEY: &str = "cluster.xml";
pub const STORES_KEY: &str = "stores.xml";
pub const SERVER_STATE_KEY: &str = "server.state";

/// Operating mode a node reports through the `server.state` key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerState {
    NormalServer,
    RebalancingMasterServer,
    OfflineServer,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            ServerState::NormalServer => "NORMAL_SERVER",
            ServerState::RebalancingMasterServer => "REBALANCING_MASTER_SERVER",
            ServerState::OfflineServer => "OFFLINE_SERVER",
        };

        write!(f, "{}", value)
    }
}

impl FromStr for ServerState {
    type Err = Error;

    fn from_str(value: &str) -> Result<ServerState, Error> {
        match value {
            "NORMAL_SERVER" => Ok(ServerState::NormalServer),
            "REBALANCING_MASTER_SERVER" => Ok(ServerState::RebalancingMasterServer),
            "OFFLINE_SERVER" => Ok(ServerState::OfflineServer),
            other => Err(Error::InvalidMetadata(format!(
                "unknown server state {:?}",
                other
            ))),
        }
    }
}

/// One store's definition as carried in `stores.xml`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreDefinition {
    pub name: String,
    pub persistence: String,
    pub replication_factor: u32,
    pub required_reads: u32,
    pub required_writes: u32,
}

static STORE_BLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<store>(.*?)</store>").unwrap());
static STORE_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"<name>([^<]+)</name>").unwrap());
static STORE_PERSISTENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<persistence>([^<]+)</persistence>").unwrap());
static STORE_REPLICATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<replication-factor>(\d+)</replication-factor>").unwrap());
static STORE_REQUIRED_READS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<required-reads>(\d+)</required-reads>").unwrap());
static STORE_REQUIRED_WRITES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<required-writes>(\d+)</required-writes>").unwrap());

/// Serialize a store-definition list into its `stores.xml` form.
pub fn stores_to_xml(stores: &[StoreDefinition]) -> String {
    let mut xml = String::new();

    xml.push_str("<stores>\n");

    for store in stores {
        xml.push_str("  <store>\n");
        xml.push_str(&format!("    <name>{}</name>\n", store.name));
        xml.push_str(&format!(
            "    <persistence>{}</persistence>\n",
            store.persistence
        ));
        xml.push_str(&format!(
            "    <replication-factor>{}</replication-factor>\n",
            store.replication_factor
        ));
        xml.push_str(&format!(
            "    <required-reads>{}</required-reads>\n",
            store.required_reads
        ));
        xml.push_str(&format!(
            "    <required-writes>{}</required-writes>\n",
            store.required_writes
        ));
        xml.push_str("  </store>\n");
    }

    xml.push_str("</stores>\n");
    xml
}

/// Decode a `stores.xml` document. Same caveat as the cluster codec: this
/// is a string transcoder for documents of the shape we emit.
pub fn stores_from_xml(xml: &str) -> Result<Vec<StoreDefinition>, Error> {
    if !xml.contains("<stores>") {
        return Err(Error::InvalidMetadata(
            "store list has no <stores> root".to_string(),
        ));
    }

    let mut stores = Vec::new();

    for block in STORE_BLOCK.captures_iter(xml) {
        stores.push(parse_store(&block[1])?);
    }

    Ok(stores)
}

fn parse_store(block: &str) -> Result<StoreDefinition, Error> {
    let name = STORE_NAME
        .captures(block)
        .map(|captures| captures[1].to_string())
        .ok_or_else(|| Error::InvalidMetadata("store block has no name".to_string()))?;
    let persistence = STORE_PERSISTENCE
        .captures(block)
        .map(|captures| captures[1].to_string())
        .unwrap_or_else(|| "memory".to_string());

    Ok(StoreDefinition {
        name,
        persistence,
        replication_factor: capture_u32(&STORE_REPLICATION, block).unwrap_or(1),
        required_reads: capture_u32(&STORE_REQUIRED_READS, block).unwrap_or(1),
        required_writes: capture_u32(&STORE_REQUIRED_WRITES, block).unwrap_or(1),
    })
}

fn capture_u32(regex: &Regex, block: &str) -> Option<u32> {
    regex
        .captures(block)
        .and_then(|captures| captures[1].parse::<u32>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_state_round_trips_through_its_wire_strings() {
        for state in [
            ServerState::NormalServer,
            ServerState::RebalancingMasterServer,
            ServerState::OfflineServer,
        ] {
            assert_eq!(state.to_string().parse::<ServerState>().unwrap(), state);
        }

        assert!("DANCING_SERVER".parse::<ServerState>().is_err());
    }

    #[test]
    fn store_list_round_trips() {
        let stores = vec![
            StoreDefinition {
                name: "users".to_string(),
                persistence: "bdb".to_string(),
                replication_factor: 2,
                required_reads: 1,
                required_writes: 1,
            },
            StoreDefinition {
                name: "sessions".to_string(),
                persistence: "memory".to_string(),
                replication_factor: 1,
                required_reads: 1,
                required_writes: 1,
            },
        ];

        let decoded = stores_from_xml(&stores_to_xml(&stores)).unwrap();
        assert_eq!(decoded, stores);
    }

    #[test]
    fn empty_store_list_is_valid() {
        assert_eq!(stores_from_xml("<stores>\n</stores>\n").unwrap(), vec![]);
        assert!(stores_from_xml("junk").is_err());
    }
}
