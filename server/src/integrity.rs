//! Anti-cheat heuristics, bounded state history and session bans.
//!
//! Every validated action is scored against independent heuristics; any
//! single trip records one suspicious event for the player. Reaching the
//! threshold bans the player for the rest of the process lifetime — there
//! is deliberately no decay or unban path.

use crate::visibility::VisibilityIndex;
use log::{debug, warn};
use shared::{
    CommandAction, Envelope, MessagePayload, PlayerId, Position, Resources, StateSync,
    HISTORY_LENGTH, RAPID_COMMAND_MAX, RAPID_COMMAND_WINDOW_MS, RESOURCE_SPIKE_THRESHOLD,
    SUSPICIOUS_THRESHOLD, SYNC_RESOURCE_EPSILON, TELEPORT_MAX_DISTANCE, UnitId,
};
use std::collections::{HashMap, VecDeque};

/// Position and health of one unit as the server last recorded it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitObservation {
    pub position: Position,
    pub health: i32,
}

/// One entry in a player's bounded state history.
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    pub timestamp: u64,
    pub resources: Resources,
    pub units: HashMap<UnitId, UnitObservation>,
    pub actions: Vec<String>,
}

/// Scores suspicious behavior per player and flips the sticky ban flag.
#[derive(Debug, Default)]
pub struct IntegrityMonitor {
    history: HashMap<PlayerId, VecDeque<StateSnapshot>>,
    suspicion: HashMap<PlayerId, u32>,
}

impl IntegrityMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends to the player's history ring, dropping the oldest snapshot
    /// once the window is full.
    pub fn add_snapshot(&mut self, player_id: &str, snapshot: StateSnapshot) {
        let history = self.history.entry(player_id.to_string()).or_default();
        history.push_back(snapshot);
        if history.len() > HISTORY_LENGTH {
            history.pop_front();
        }
    }

    pub fn history_len(&self, player_id: &str) -> usize {
        self.history.get(player_id).map_or(0, VecDeque::len)
    }

    pub fn suspicion_count(&self, player_id: &str) -> u32 {
        self.suspicion.get(player_id).copied().unwrap_or(0)
    }

    pub fn is_banned(&self, player_id: &str) -> bool {
        self.suspicion_count(player_id) >= SUSPICIOUS_THRESHOLD
    }

    /// Purges a disconnecting player's tracking state.
    pub fn remove_player(&mut self, player_id: &str) {
        self.history.remove(player_id);
        self.suspicion.remove(player_id);
    }

    fn record_suspicious(&mut self, player_id: &str, heuristic: &str) {
        let count = self.suspicion.entry(player_id.to_string()).or_insert(0);
        *count += 1;
        debug!(
            "Suspicious activity by {} ({}), count {}",
            player_id, heuristic, count
        );
        if *count == SUSPICIOUS_THRESHOLD {
            warn!("Player {} banned for suspicious activity", player_id);
        }
    }

    /// Scores one action against all heuristics. Returns false only once
    /// the player is banned; a suspicious-but-unbanned player stays active
    /// (the offending action is still rejected by later pipeline checks).
    pub fn validate_action(
        &mut self,
        player_id: &str,
        message: &Envelope,
        current_resources: &Resources,
        visibility: &VisibilityIndex,
        now_ms: u64,
    ) -> bool {
        let Some(history) = self.history.get(player_id) else {
            return true;
        };
        let Some(last) = history.back() else {
            return true;
        };

        let mut suspicious = false;

        // Rapid commands: more recorded actions inside the window than a
        // human could plausibly issue.
        let recent_actions: usize = history
            .iter()
            .filter(|snapshot| snapshot.timestamp > now_ms.saturating_sub(RAPID_COMMAND_WINDOW_MS))
            .map(|snapshot| snapshot.actions.len())
            .sum();
        if recent_actions > RAPID_COMMAND_MAX {
            suspicious = true;
        }

        // Resource spike: the ledger grew faster than any legitimate income
        // path allows since the last snapshot.
        if matches!(message.payload, MessagePayload::Resource(_)) {
            for ((_, current), (_, previous)) in current_resources
                .fields()
                .iter()
                .zip(last.resources.fields().iter())
            {
                if current - previous > RESOURCE_SPIKE_THRESHOLD {
                    suspicious = true;
                }
            }
        }

        if let MessagePayload::Command(action) = &message.payload {
            // Teleportation: a position-bearing command moved a unit further
            // than the per-tick maximum.
            if let (Some(unit_id), Some(claimed)) = (action.unit_id(), action.coordinates()) {
                if let Some(observed) = last.units.get(&unit_id) {
                    if observed.position.distance(&claimed) > TELEPORT_MAX_DISTANCE {
                        suspicious = true;
                    }
                }
            }

            // Visibility forgery: acting on a target the player cannot see.
            if let Some(target_id) = action.target_id() {
                if !visibility.validate_visibility_claim(player_id, &target_id) {
                    suspicious = true;
                }
            }
        }

        if suspicious {
            self.record_suspicious(player_id, message.payload.kind());
        }

        !self.is_banned(player_id)
    }

    /// Compares a client-submitted state against the server's last
    /// snapshot. Any divergence is itself a suspicious event.
    pub fn validate_state_sync(&mut self, player_id: &str, claim: &StateSync) -> bool {
        let Some(snapshot) = self
            .history
            .get(player_id)
            .and_then(|history| history.back())
            .cloned()
        else {
            return true;
        };

        let resources_match = snapshot
            .resources
            .fields()
            .iter()
            .zip(claim.resources.fields().iter())
            .all(|((_, server), (_, client))| (server - client).abs() < SYNC_RESOURCE_EPSILON);

        let units_match = snapshot.units.iter().all(|(id, observed)| {
            claim.units.get(id).map_or(false, |claimed| {
                claimed.position == observed.position && claimed.health == observed.health
            })
        });

        if !(resources_match && units_match) {
            self.record_suspicious(player_id, "sync");
            return false;
        }
        true
    }
}
