//! [`Keyspace`] backed by a live Redis Cluster.
//!
//! Key-addressed commands go through one cluster connection, which routes
//! them by slot. `SCAN` is not slot-addressed, so scanning uses a direct
//! connection to every master discovered via `CLUSTER NODES`.

use super::nodes::{parse_cluster_masters, NodeAddr};
use super::value;
use super::{Keyspace, ScanCursor, ScanPage};
use crate::config::ClusterConfig;
use crate::record::{ConsumerGroup, ScoredMember, StreamEntry};
use crate::{BackupError, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::cluster::ClusterClient;
use redis::cluster_async::ClusterConnection;
use redis::{Cmd, Value};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

pub struct RedisKeyspace {
    conn: ClusterConnection,
    masters: Vec<(NodeAddr, MultiplexedConnection)>,
}

impl RedisKeyspace {
    /// Connect to the cluster described by `config`.
    pub async fn connect(config: &ClusterConfig) -> Result<Self> {
        if config.nodes.is_empty() {
            return Err(BackupError::Config(format!(
                "no cluster nodes configured for profile '{}'",
                config.profile
            )));
        }

        let urls: Vec<String> = config.nodes.iter().map(NodeAddr::url).collect();
        let client = ClusterClient::new(urls)?;
        let conn = client.get_async_connection().await?;

        let master_addrs = discover_masters(&config.nodes).await?;
        let mut masters = Vec::with_capacity(master_addrs.len());
        for addr in master_addrs {
            let client = redis::Client::open(addr.url())?;
            let shard = client.get_multiplexed_async_connection().await?;
            masters.push((addr, shard));
        }

        info!(
            "Connected to cluster (profile: {}, {} masters)",
            config.profile,
            masters.len()
        );

        Ok(Self { conn, masters })
    }

    async fn query(&mut self, cmd: &Cmd) -> Result<Value> {
        let reply: Value = cmd.query_async(&mut self.conn).await?;
        Ok(reply)
    }
}

/// Ask the first reachable seed node for the current master set.
async fn discover_masters(seeds: &[NodeAddr]) -> Result<Vec<NodeAddr>> {
    let mut last_err = None;
    for seed in seeds {
        match cluster_nodes(seed).await {
            Ok(text) => {
                let masters = parse_cluster_masters(&text, &seed.host);
                if masters.is_empty() {
                    return Err(BackupError::Decode(format!(
                        "CLUSTER NODES on {} listed no healthy masters",
                        seed
                    )));
                }
                debug!("Discovered masters via {}: {:?}", seed, masters);
                return Ok(masters);
            }
            Err(e) => {
                warn!("Seed node {} unavailable: {}", seed, e);
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| BackupError::Config("no seed nodes given".into())))
}

async fn cluster_nodes(seed: &NodeAddr) -> Result<String> {
    let client = redis::Client::open(seed.url())?;
    let mut conn = client.get_multiplexed_async_connection().await?;
    let reply: Value = redis::cmd("CLUSTER").arg("NODES").query_async(&mut conn).await?;
    value::text(reply)
}

#[async_trait]
impl Keyspace for RedisKeyspace {
    async fn scan(&mut self, cursor: ScanCursor, pattern: &str, count: usize) -> Result<ScanPage> {
        let Some((addr, shard)) = self.masters.get_mut(cursor.shard) else {
            return Ok(ScanPage::default());
        };

        let reply: Value = redis::cmd("SCAN")
            .arg(cursor.position)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(shard)
            .await?;
        let value::ScanReply {
            cursor: position,
            keys,
            undecodable,
        } = value::scan_reply(reply)?;
        debug!("SCAN {} cursor {} -> {} keys", addr, cursor.position, keys.len());

        let next = if position != 0 {
            Some(ScanCursor {
                shard: cursor.shard,
                position,
            })
        } else if cursor.shard + 1 < self.masters.len() {
            Some(ScanCursor {
                shard: cursor.shard + 1,
                position: 0,
            })
        } else {
            None
        };

        Ok(ScanPage {
            keys,
            undecodable,
            next,
        })
    }

    async fn key_type(&mut self, key: &str) -> Result<String> {
        value::text(self.query(redis::cmd("TYPE").arg(key)).await?)
    }

    async fn pttl(&mut self, key: &str) -> Result<Option<u64>> {
        value::ttl(self.query(redis::cmd("PTTL").arg(key)).await?)
    }

    async fn exists(&mut self, key: &str) -> Result<bool> {
        Ok(value::integer(self.query(redis::cmd("EXISTS").arg(key)).await?)? > 0)
    }

    async fn delete(&mut self, key: &str) -> Result<()> {
        self.query(redis::cmd("DEL").arg(key)).await?;
        Ok(())
    }

    async fn pexpire(&mut self, key: &str, ttl_ms: u64) -> Result<()> {
        self.query(redis::cmd("PEXPIRE").arg(key).arg(ttl_ms)).await?;
        Ok(())
    }

    async fn get_string(&mut self, key: &str) -> Result<String> {
        value::text(self.query(redis::cmd("GET").arg(key)).await?)
    }

    async fn set_string(&mut self, key: &str, value: &str) -> Result<()> {
        self.query(redis::cmd("SET").arg(key).arg(value)).await?;
        Ok(())
    }

    async fn hash_get_all(&mut self, key: &str) -> Result<BTreeMap<String, String>> {
        value::hash(self.query(redis::cmd("HGETALL").arg(key)).await?)
    }

    async fn hash_set(&mut self, key: &str, fields: &BTreeMap<String, String>) -> Result<()> {
        let mut cmd = redis::cmd("HSET");
        cmd.arg(key);
        for (field, val) in fields {
            cmd.arg(field).arg(val);
        }
        self.query(&cmd).await?;
        Ok(())
    }

    async fn list_range_all(&mut self, key: &str) -> Result<Vec<String>> {
        value::text_list(self.query(redis::cmd("LRANGE").arg(key).arg(0).arg(-1)).await?)
    }

    async fn list_push(&mut self, key: &str, items: &[String]) -> Result<()> {
        self.query(redis::cmd("RPUSH").arg(key).arg(items)).await?;
        Ok(())
    }

    async fn set_members(&mut self, key: &str) -> Result<Vec<String>> {
        value::text_list(self.query(redis::cmd("SMEMBERS").arg(key)).await?)
    }

    async fn set_add(&mut self, key: &str, members: &[String]) -> Result<()> {
        self.query(redis::cmd("SADD").arg(key).arg(members)).await?;
        Ok(())
    }

    async fn zset_range_with_scores(&mut self, key: &str) -> Result<Vec<ScoredMember>> {
        value::scored_members(
            self.query(redis::cmd("ZRANGE").arg(key).arg(0).arg(-1).arg("WITHSCORES"))
                .await?,
        )
    }

    async fn zset_add(&mut self, key: &str, members: &[ScoredMember]) -> Result<()> {
        let mut cmd = redis::cmd("ZADD");
        cmd.arg(key);
        for (member, score) in members {
            cmd.arg(*score).arg(member);
        }
        self.query(&cmd).await?;
        Ok(())
    }

    async fn stream_range_all(&mut self, key: &str) -> Result<Vec<StreamEntry>> {
        value::stream_entries(self.query(redis::cmd("XRANGE").arg(key).arg("-").arg("+")).await?)
    }

    async fn stream_add(&mut self, key: &str, entry: &StreamEntry) -> Result<()> {
        let mut cmd = redis::cmd("XADD");
        cmd.arg(key).arg(entry.id());
        for (field, val) in entry.fields() {
            cmd.arg(field).arg(val);
        }
        self.query(&cmd).await?;
        Ok(())
    }

    async fn stream_groups(&mut self, key: &str) -> Result<Vec<ConsumerGroup>> {
        value::consumer_groups(self.query(redis::cmd("XINFO").arg("GROUPS").arg(key)).await?)
    }

    async fn stream_group_create(&mut self, key: &str, group: &ConsumerGroup) -> Result<()> {
        self.query(
            redis::cmd("XGROUP")
                .arg("CREATE")
                .arg(key)
                .arg(&group.name)
                .arg(&group.last_delivered_id)
                .arg("MKSTREAM"),
        )
        .await?;
        Ok(())
    }
}
