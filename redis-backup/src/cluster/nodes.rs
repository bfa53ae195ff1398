//! Cluster node addresses.

use crate::{BackupError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A `host:port` pair of one cluster node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeAddr {
    pub host: String,
    pub port: u16,
}

impl NodeAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Connection URL understood by the Redis client.
    pub fn url(&self) -> String {
        format!("redis://{}:{}/", self.host, self.port)
    }
}

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for NodeAddr {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| BackupError::Config(format!("invalid node address '{}', expected host:port", s)))?;
        if host.is_empty() {
            return Err(BackupError::Config(format!("invalid node address '{}': empty host", s)));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| BackupError::Config(format!("invalid port in node address '{}'", s)))?;
        Ok(Self::new(host, port))
    }
}

impl TryFrom<String> for NodeAddr {
    type Error = BackupError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<NodeAddr> for String {
    fn from(addr: NodeAddr) -> Self {
        addr.to_string()
    }
}

/// Parse a comma-separated node list such as `host1:7001,host2:7002`.
pub fn parse_node_list(list: &str) -> Result<Vec<NodeAddr>> {
    let nodes = list
        .split(',')
        .filter(|item| !item.trim().is_empty())
        .map(str::parse)
        .collect::<Result<Vec<NodeAddr>>>()?;
    if nodes.is_empty() {
        return Err(BackupError::Config("node list is empty".into()));
    }
    Ok(nodes)
}

/// Extract the reachable masters from a `CLUSTER NODES` reply.
///
/// Each line reads `<id> <ip:port@cport[,hostname]> <flags> ...`. Masters
/// flagged `fail`, `noaddr` or `handshake` are left out. An empty host (a node
/// that has not learned its own address yet) is replaced by `fallback_host`.
pub fn parse_cluster_masters(reply: &str, fallback_host: &str) -> Vec<NodeAddr> {
    let mut masters = Vec::new();
    for line in reply.lines() {
        let mut fields = line.split_whitespace();
        let (Some(_id), Some(addr), Some(flags)) = (fields.next(), fields.next(), fields.next()) else {
            continue;
        };

        let flags: Vec<&str> = flags.split(',').collect();
        if !flags.contains(&"master")
            || flags.iter().any(|f| matches!(*f, "fail" | "noaddr" | "handshake"))
        {
            continue;
        }

        let addr = addr.split(['@', ',']).next().unwrap_or_default();
        let Some((host, port)) = addr.rsplit_once(':') else {
            continue;
        };
        let Ok(port) = port.parse::<u16>() else {
            continue;
        };
        if port == 0 {
            continue;
        }
        let host = if host.is_empty() { fallback_host } else { host };
        masters.push(NodeAddr::new(host, port));
    }
    masters
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_node_list() {
        let nodes = parse_node_list("localhost:7001, 10.0.0.2:7002").unwrap();
        assert_eq!(nodes, vec![NodeAddr::new("localhost", 7001), NodeAddr::new("10.0.0.2", 7002)]);
    }

    #[test]
    fn test_parse_node_list_errors() {
        assert!(parse_node_list("").unwrap_err().is_config());
        assert!(parse_node_list("localhost").unwrap_err().is_config());
        assert!(parse_node_list("localhost:notaport").unwrap_err().is_config());
        assert!(parse_node_list(":7001").unwrap_err().is_config());
    }

    #[test]
    fn test_node_addr_serde() {
        let addr: NodeAddr = serde_json::from_str("\"redis-1:6379\"").unwrap();
        assert_eq!(addr, NodeAddr::new("redis-1", 6379));
        assert_eq!(serde_json::to_string(&addr).unwrap(), "\"redis-1:6379\"");
        assert_eq!(addr.url(), "redis://redis-1:6379/");
    }

    #[test]
    fn test_parse_cluster_masters() {
        let reply = "\
07c37dfeb235213a872192d90877d0cd55635b91 127.0.0.1:30004@31004,node-4 slave e7d1eecce10fd6bb5eb35b9f99a514335d9ba9ca 0 1426238317239 4 connected
67ed2db8d677e59ec4a4cefb06858cf2a1a89fa1 127.0.0.1:30002@31002 master - 0 1426238316232 2 connected 5461-10922
292f8b365bb7edb5e285caf0b7e6ddc7265d2f4f 127.0.0.1:30003@31003 master - 0 1426238318243 3 connected 10923-16383
e7d1eecce10fd6bb5eb35b9f99a514335d9ba9ca :30001@31001 myself,master - 0 0 1 connected 0-5460
6ec23923021cf3ffec47632106199cb7f496ce01 127.0.0.1:30005@31005 master,fail - 0 1426238316232 5 connected
";
        let masters = parse_cluster_masters(reply, "10.1.1.1");
        assert_eq!(
            masters,
            vec![
                NodeAddr::new("127.0.0.1", 30002),
                NodeAddr::new("127.0.0.1", 30003),
                NodeAddr::new("10.1.1.1", 30001),
            ]
        );
    }
}
