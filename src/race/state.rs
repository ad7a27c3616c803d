//! Shared Race State
//!
//! The last known facts reported by the racers: positions, collected items,
//! visited rooms. Uses BTreeMap/BTreeSet for deterministic iteration order.
//!
//! Mutation is add/overwrite only; nothing is ever deleted during a race.
//! The state performs no game-rule validation; the maze/collision logic on
//! the client side is the authority on *when* these facts become true.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Mutex, PoisonError};

// =============================================================================
// PLAYER ID
// =============================================================================

/// Player identity within one race: 1 or 2, assigned in admission order.
///
/// Implements Ord for deterministic BTreeMap ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlayerId(pub u8);

impl PlayerId {
    /// Create from a raw identifier.
    pub const fn new(id: u8) -> Self {
        Self(id)
    }

    /// Get the raw identifier.
    pub const fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// RACE STATE
// =============================================================================

#[derive(Debug, Default)]
struct RaceStateInner {
    /// Last reported position per player.
    positions: BTreeMap<PlayerId, (f64, f64)>,
    /// Item identifiers removed from the world.
    collected_items: BTreeSet<String>,
    /// Room identifiers marked explored.
    visited_rooms: BTreeSet<i32>,
}

/// Race facts shared by every session handler.
///
/// Every operation takes the inner lock for a short, non-blocking critical
/// section and returns immediately, safe to call from any session task.
/// Created once per server process; a fresh race requires a fresh process.
#[derive(Debug, Default)]
pub struct RaceState {
    inner: Mutex<RaceStateInner>,
}

impl RaceState {
    /// Create an empty race state.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RaceStateInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Overwrite a player's last reported position.
    pub fn set_position(&self, player: PlayerId, x: f64, y: f64) {
        self.lock().positions.insert(player, (x, y));
    }

    /// Record an item as collected. Returns false if it already was.
    pub fn add_item(&self, item_id: &str) -> bool {
        self.lock().collected_items.insert(item_id.to_string())
    }

    /// Record a room as visited. Returns false if it already was.
    pub fn add_room(&self, room_id: i32) -> bool {
        self.lock().visited_rooms.insert(room_id)
    }

    /// A player's last reported position, if any.
    pub fn position(&self, player: PlayerId) -> Option<(f64, f64)> {
        self.lock().positions.get(&player).copied()
    }

    /// Whether an item has been collected.
    pub fn has_item(&self, item_id: &str) -> bool {
        self.lock().collected_items.contains(item_id)
    }

    /// Whether a room has been visited.
    pub fn has_room(&self, room_id: i32) -> bool {
        self.lock().visited_rooms.contains(&room_id)
    }

    /// Number of collected items.
    pub fn item_count(&self) -> usize {
        self.lock().collected_items.len()
    }

    /// Number of visited rooms.
    pub fn room_count(&self) -> usize {
        self.lock().visited_rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_position_overwrite() {
        let state = RaceState::new();
        let p1 = PlayerId::new(1);

        assert_eq!(state.position(p1), None);

        state.set_position(p1, 100.0, 200.0);
        assert_eq!(state.position(p1), Some((100.0, 200.0)));

        state.set_position(p1, 105.5, 200.0);
        assert_eq!(state.position(p1), Some((105.5, 200.0)));
    }

    #[test]
    fn test_positions_are_per_player() {
        let state = RaceState::new();
        state.set_position(PlayerId::new(1), 1.0, 2.0);
        state.set_position(PlayerId::new(2), 3.0, 4.0);

        assert_eq!(state.position(PlayerId::new(1)), Some((1.0, 2.0)));
        assert_eq!(state.position(PlayerId::new(2)), Some((3.0, 4.0)));
    }

    #[test]
    fn test_sets_are_monotonic() {
        let state = RaceState::new();

        assert!(state.add_item("key_1"));
        assert!(!state.add_item("key_1"));
        assert!(state.has_item("key_1"));
        assert_eq!(state.item_count(), 1);

        assert!(state.add_room(22));
        assert!(!state.add_room(22));
        assert!(state.has_room(22));
        assert_eq!(state.room_count(), 1);
    }

    #[test]
    fn test_concurrent_mutation() {
        let state = Arc::new(RaceState::new());

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let state = state.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        state.add_room(worker * 50 + i);
                        state.add_item(&format!("item_{worker}_{i}"));
                        state.set_position(PlayerId::new(1), worker as f64, i as f64);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("worker panicked");
        }

        assert_eq!(state.room_count(), 200);
        assert_eq!(state.item_count(), 200);
        for room in 0..200 {
            assert!(state.has_room(room));
        }
    }
}
