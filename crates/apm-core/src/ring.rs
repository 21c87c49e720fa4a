use crate::traits::ShardRouter;
use arc_swap::ArcSwap;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// 一致性哈希环
#[derive(Debug, Clone, Default)]
pub struct HashRing {
    virtual_nodes: usize,
    members: BTreeSet<String>,
    points: BTreeMap<u64, String>,
}

fn hash_key(key: &str) -> u64 {
    let digest = Sha256::digest(key.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

impl HashRing {
    pub fn new(virtual_nodes: usize) -> Self {
        Self {
            virtual_nodes: virtual_nodes.max(1),
            members: BTreeSet::new(),
            points: BTreeMap::new(),
        }
    }

    pub fn with_members<I, S>(virtual_nodes: usize, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ring = Self::new(virtual_nodes);
        for member in members {
            ring.add(member);
        }
        ring
    }

    pub fn add(&mut self, member: impl Into<String>) -> bool {
        let member = member.into();
        if !self.members.insert(member.clone()) {
            return false;
        }
        for i in 0..self.virtual_nodes {
            self.points
                .insert(hash_key(&format!("{}#{}", member, i)), member.clone());
        }
        true
    }

    pub fn remove(&mut self, member: &str) -> bool {
        if !self.members.remove(member) {
            return false;
        }
        self.points.retain(|_, m| m != member);
        true
    }

    /// 顺时针找到第一个虚拟节点
    pub fn get(&self, key: &str) -> Option<&str> {
        let h = hash_key(key);
        self.points
            .range(h..)
            .next()
            .or_else(|| self.points.iter().next())
            .map(|(_, m)| m.as_str())
    }

    pub fn members(&self) -> Vec<String> {
        self.members.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// 基于一致性哈希的路由器
///
/// 成员变化时整体替换哈希环并递增 epoch，查询路径无锁。
pub struct ConsistentHashRouter {
    ring: ArcSwap<HashRing>,
    epoch: AtomicU64,
    virtual_nodes: usize,
}

impl ConsistentHashRouter {
    pub fn new<I, S>(virtual_nodes: usize, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ring: ArcSwap::from_pointee(HashRing::with_members(virtual_nodes, members)),
            epoch: AtomicU64::new(0),
            virtual_nodes,
        }
    }

    /// 替换全部成员
    pub fn set_members<I, S>(&self, members: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ring = HashRing::with_members(self.virtual_nodes, members);
        let count = ring.len();
        self.ring.store(Arc::new(ring));
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        info!(members = count, epoch, "Shard ring updated");
    }

    pub fn add_member(&self, member: &str) -> bool {
        let mut ring = HashRing::clone(&self.ring.load());
        if !ring.add(member) {
            return false;
        }
        self.ring.store(Arc::new(ring));
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        info!(member = %member, epoch, "Evaluator joined shard ring");
        true
    }

    pub fn remove_member(&self, member: &str) -> bool {
        let mut ring = HashRing::clone(&self.ring.load());
        if !ring.remove(member) {
            return false;
        }
        self.ring.store(Arc::new(ring));
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        info!(member = %member, epoch, "Evaluator left shard ring");
        true
    }
}

impl ShardRouter for ConsistentHashRouter {
    fn route(&self, key: &str) -> Option<String> {
        self.ring.load().get(key).map(str::to_string)
    }

    fn members(&self) -> Vec<String> {
        self.ring.load().members()
    }

    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }
}
