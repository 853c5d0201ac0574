//! Player registry: known participants and their public keys.
//!
//! Ids keep their insertion order; leader election takes a sorted snapshot so
//! every node derives the same leader regardless of join order.
//!
//! The registry only holds players announced by the network layer. The local
//! player takes part in every round whether or not it was announced, so the
//! `*_including` views merge it in.

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::consensus::types::PlayerId;
use crate::crypto::PublicKey;

#[derive(Debug, Default)]
struct PlayerTable {
    keys: HashMap<PlayerId, PublicKey>,
    order: Vec<PlayerId>,
}

#[derive(Debug, Default)]
pub struct PlayerRegistry {
    inner: RwLock<PlayerTable>,
}

impl PlayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_players<I>(players: I) -> Self
    where
        I: IntoIterator<Item = (PlayerId, PublicKey)>,
    {
        let registry = Self::new();
        for (id, key) in players {
            registry.add_player(id, key);
        }
        registry
    }

    /// Insert or overwrite. Overwriting keeps the original position.
    pub fn add_player(&self, player_id: impl Into<PlayerId>, public_key: PublicKey) {
        let player_id = player_id.into();
        let mut table = self.inner.write();
        if table.keys.insert(player_id.clone(), public_key).is_none() {
            table.order.push(player_id);
        }
    }

    pub fn remove_player(&self, player_id: &str) -> Option<PublicKey> {
        let mut table = self.inner.write();
        let removed = table.keys.remove(player_id);
        if removed.is_some() {
            table.order.retain(|id| id != player_id);
        }
        removed
    }

    pub fn get_public_key(&self, player_id: &str) -> Option<PublicKey> {
        self.inner.read().keys.get(player_id).copied()
    }

    pub fn contains(&self, player_id: &str) -> bool {
        self.inner.read().keys.contains_key(player_id)
    }

    /// Ids in insertion order.
    pub fn player_ids(&self) -> Vec<PlayerId> {
        self.inner.read().order.clone()
    }

    /// Ids sorted lexicographically, for deterministic leader election.
    pub fn sorted_player_ids(&self) -> Vec<PlayerId> {
        let mut ids = self.player_ids();
        ids.sort();
        ids
    }

    /// Sorted ids with `local` merged in.
    pub fn sorted_ids_including(&self, local: &str) -> Vec<PlayerId> {
        let mut ids = self.player_ids();
        if !ids.iter().any(|id| id == local) {
            ids.push(local.to_string());
        }
        ids.sort();
        ids
    }

    /// Player count with `local` counted once.
    pub fn count_including(&self, local: &str) -> usize {
        let table = self.inner.read();
        table.order.len() + usize::from(!table.keys.contains_key(local))
    }

    pub fn len(&self) -> usize {
        self.inner.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
