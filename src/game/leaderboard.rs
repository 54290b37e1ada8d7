//! Leaderboard
//!
//! Cumulative per-player profit and games-played across rounds.
//! Mutated only at round finalization, under the engine lock; entries
//! are never deleted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::game::state::PlayerId;

/// Running totals for one player.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    /// Most recently seen display name.
    pub username: String,
    /// Sum of signed profits across all finished rounds.
    pub total_profit: f64,
    /// Number of rounds the player placed a bet in.
    pub games_played: u64,
}

/// A leaderboard row as exposed to queries.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LeaderboardRow {
    /// Player the row belongs to.
    pub player_id: PlayerId,
    /// Display name.
    pub username: String,
    /// Cumulative profit.
    pub total_profit: f64,
    /// Rounds played.
    pub games_played: u64,
}

/// Per-player aggregation across all rounds.
#[derive(Debug, Default)]
pub struct LeaderboardStore {
    entries: BTreeMap<PlayerId, LeaderboardEntry>,
}

impl LeaderboardStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one finished round's profit into a player's totals,
    /// inserting a fresh entry if the player is new.
    pub fn record(&mut self, player_id: &PlayerId, username: &str, profit: f64) {
        match self.entries.get_mut(player_id) {
            Some(entry) => {
                entry.total_profit += profit;
                entry.games_played += 1;
                entry.username = username.to_string();
            }
            None => {
                self.entries.insert(
                    player_id.clone(),
                    LeaderboardEntry {
                        username: username.to_string(),
                        total_profit: profit,
                        games_played: 1,
                    },
                );
            }
        }
    }

    /// Look up one player's totals.
    pub fn get(&self, player_id: &PlayerId) -> Option<&LeaderboardEntry> {
        self.entries.get(player_id)
    }

    /// The top `n` players by total profit, descending.
    pub fn top(&self, n: usize) -> Vec<LeaderboardRow> {
        let mut rows: Vec<LeaderboardRow> = self
            .entries
            .iter()
            .map(|(id, entry)| LeaderboardRow {
                player_id: id.clone(),
                username: entry.username.clone(),
                total_profit: entry.total_profit,
                games_played: entry.games_played,
            })
            .collect();

        rows.sort_by(|a, b| b.total_profit.total_cmp(&a.total_profit));
        rows.truncate(n);
        rows
    }

    /// Number of players tracked.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no player has finished a round yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregation_across_rounds() {
        let mut store = LeaderboardStore::new();
        let player = PlayerId::new("b");

        store.record(&player, "bob", -50.0);
        store.record(&player, "bob", 120.0);

        let entry = store.get(&player).unwrap();
        assert!((entry.total_profit - 70.0).abs() < 1e-9);
        assert_eq!(entry.games_played, 2);
    }

    #[test]
    fn test_top_orders_by_profit_descending() {
        let mut store = LeaderboardStore::new();
        store.record(&PlayerId::new("a"), "a", 10.0);
        store.record(&PlayerId::new("b"), "b", 250.0);
        store.record(&PlayerId::new("c"), "c", -40.0);
        store.record(&PlayerId::new("d"), "d", 90.0);

        let top = store.top(3);
        assert_eq!(top.len(), 3);
        assert_eq!(top[0].player_id, PlayerId::new("b"));
        assert_eq!(top[1].player_id, PlayerId::new("d"));
        assert_eq!(top[2].player_id, PlayerId::new("a"));
    }

    #[test]
    fn test_new_player_inserted_on_first_round() {
        let mut store = LeaderboardStore::new();
        assert!(store.is_empty());

        store.record(&PlayerId::new("a"), "alice", -25.0);
        assert_eq!(store.len(), 1);
        let entry = store.get(&PlayerId::new("a")).unwrap();
        assert_eq!(entry.total_profit, -25.0);
        assert_eq!(entry.games_played, 1);
        assert_eq!(entry.username, "alice");
    }
}
