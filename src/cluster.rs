/// Cluster topology snapshots.
///
/// A `Cluster` is an immutable description of the fleet; the client swaps
/// whole snapshots and never mutates nodes in place. The XML transcoder
/// here is a string codec for the `cluster.xml` metadata value, not a
/// general XML parser: it round-trips the documents this crate writes.
use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::Error;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    pub id: i32,
    pub host: String,
    /// Data-plane port.
    pub port: u16,
    /// Control-plane port this client talks to.
    pub admin_port: u16,
    pub partitions: Vec<i32>,
}

impl Node {
    pub fn new(id: i32, host: &str, port: u16, admin_port: u16, partitions: Vec<i32>) -> Node {
        Node {
            id,
            host: host.to_string(),
            port,
            admin_port,
            partitions,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cluster {
    name: String,
    nodes: Vec<Node>,
}

static SERVER_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<server>(.*?)</server>").unwrap());
static CLUSTER_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"<name>([^<]*)</name>").unwrap());
static NODE_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"<id>(\d+)</id>").unwrap());
static NODE_HOST: Lazy<Regex> = Lazy::new(|| Regex::new(r"<host>([^<]+)</host>").unwrap());
static NODE_PORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<socket-port>(\d+)</socket-port>").unwrap());
static NODE_ADMIN_PORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<admin-port>(\d+)</admin-port>").unwrap());
static NODE_PARTITIONS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<partitions>([^<]*)</partitions>").unwrap());

impl Cluster {
    pub fn new(name: &str, mut nodes: Vec<Node>) -> Cluster {
        nodes.sort_by_key(|node| node.id);

        Cluster {
            name: name.to_string(),
            nodes,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Look a node up by id. Asking for an id that is not part of the
    /// snapshot is a caller error.
    pub fn node(&self, id: i32) -> Result<&Node, Error> {
        self.nodes
            .iter()
            .find(|node| node.id == id)
            .ok_or(Error::NodeNotFound(id))
    }

    pub fn to_xml(&self) -> String {
        let mut xml = String::new();

        xml.push_str("<cluster>\n");
        xml.push_str(&format!("  <name>{}</name>\n", self.name));

        for node in &self.nodes {
            let partitions = node
                .partitions
                .iter()
                .map(|partition| partition.to_string())
                .collect::<Vec<String>>()
                .join(", ");

            xml.push_str("  <server>\n");
            xml.push_str(&format!("    <id>{}</id>\n", node.id));
            xml.push_str(&format!("    <host>{}</host>\n", node.host));
            xml.push_str(&format!("    <socket-port>{}</socket-port>\n", node.port));
            xml.push_str(&format!("    <admin-port>{}</admin-port>\n", node.admin_port));
            xml.push_str(&format!("    <partitions>{}</partitions>\n", partitions));
            xml.push_str("  </server>\n");
        }

        xml.push_str("</cluster>\n");
        xml
    }

    pub fn from_xml(xml: &str) -> Result<Cluster, Error> {
        let name = CLUSTER_NAME
            .captures(xml)
            .map(|captures| captures[1].to_string())
            .ok_or_else(|| Error::InvalidMetadata("cluster descriptor has no name".to_string()))?;

        let mut nodes = Vec::new();

        for block in SERVER_BLOCK.captures_iter(xml) {
            nodes.push(parse_node(&block[1])?);
        }

        if nodes.is_empty() {
            return Err(Error::InvalidMetadata(
                "cluster descriptor has no servers".to_string(),
            ));
        }

        Ok(Cluster::new(&name, nodes))
    }
}

fn parse_node(block: &str) -> Result<Node, Error> {
    let id = capture_int(&NODE_ID, block, "id")?;
    let host = NODE_HOST
        .captures(block)
        .map(|captures| captures[1].to_string())
        .ok_or_else(|| Error::InvalidMetadata("server block has no host".to_string()))?;
    let port = capture_int(&NODE_PORT, block, "socket-port")? as u16;
    let admin_port = capture_int(&NODE_ADMIN_PORT, block, "admin-port")? as u16;

    let partitions = match NODE_PARTITIONS.captures(block) {
        Some(captures) => {
            let list = captures[1].trim();

            if list.is_empty() {
                Vec::new()
            } else {
                list.split(',')
                    .map(|partition| {
                        partition.trim().parse::<i32>().map_err(|_| {
                            Error::InvalidMetadata(format!("bad partition id {:?}", partition))
                        })
                    })
                    .collect::<Result<Vec<i32>, Error>>()?
            }
        }
        None => Vec::new(),
    };

    Ok(Node {
        id,
        host,
        port,
        admin_port,
        partitions,
    })
}

fn capture_int(regex: &Regex, block: &str, field: &str) -> Result<i32, Error> {
    regex
        .captures(block)
        .and_then(|captures| captures[1].parse::<i32>().ok())
        .ok_or_else(|| Error::InvalidMetadata(format!("server block has no {}", field)))
}
