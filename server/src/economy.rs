//! Per-player resource ledgers and the tech research pipeline.
//!
//! All costed actions are gated here. Deductions are atomic: either every
//! named resource is decreased by exactly its cost or the ledger is left
//! untouched. Research is pay-on-start and completes strictly in FIFO
//! order, regardless of individual durations.

use log::{debug, info};
use shared::{tech_node, PlayerId, Resources};
use std::collections::{HashMap, VecDeque};

/// A queued research job.
#[derive(Debug, Clone, PartialEq)]
pub struct ResearchEntry {
    pub tech_id: String,
    pub started_ms: u64,
}

/// Resource ledger, completed-tech set and research queue per player.
#[derive(Debug, Default)]
pub struct Economy {
    resources: HashMap<PlayerId, Resources>,
    completed: HashMap<PlayerId, Vec<String>>,
    research: HashMap<PlayerId, VecDeque<ResearchEntry>>,
}

impl Economy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initialize_player(&mut self, player_id: &str) {
        self.resources
            .insert(player_id.to_string(), Resources::starting());
        self.completed.insert(player_id.to_string(), Vec::new());
        self.research.insert(player_id.to_string(), VecDeque::new());
        info!("Economy initialized for player {}", player_id);
    }

    pub fn remove_player(&mut self, player_id: &str) {
        self.resources.remove(player_id);
        self.completed.remove(player_id);
        self.research.remove(player_id);
    }

    pub fn get_resources(&self, player_id: &str) -> Option<Resources> {
        self.resources.get(player_id).copied()
    }

    /// Tech ids the player has completed, in completion order.
    pub fn get_tech_progress(&self, player_id: &str) -> Vec<String> {
        self.completed.get(player_id).cloned().unwrap_or_default()
    }

    /// Pending research jobs, head first.
    pub fn research_queue_len(&self, player_id: &str) -> usize {
        self.research.get(player_id).map_or(0, VecDeque::len)
    }

    pub fn can_afford(&self, player_id: &str, cost: &Resources) -> bool {
        self.resources
            .get(player_id)
            .map_or(false, |ledger| ledger.covers(cost))
    }

    /// Applies `cost` all-or-nothing. Returns false (ledger unchanged) if
    /// any single resource falls short.
    pub fn deduct_resources(&mut self, player_id: &str, cost: &Resources) -> bool {
        match self.resources.get_mut(player_id) {
            Some(ledger) if ledger.covers(cost) => {
                ledger.deduct(cost);
                true
            }
            _ => false,
        }
    }

    /// Credits income to a player's ledger.
    pub fn grant(&mut self, player_id: &str, amount: &Resources) {
        if let Some(ledger) = self.resources.get_mut(player_id) {
            ledger.credits += amount.credits;
            ledger.energy += amount.energy;
            ledger.intel += amount.intel;
            ledger.tech += amount.tech;
        }
    }

    /// A node is researchable when it exists, is not yet completed, all its
    /// prerequisites are completed and its cost is affordable.
    pub fn can_research(&self, player_id: &str, tech_id: &str) -> bool {
        let Some(node) = tech_node(tech_id) else {
            return false;
        };
        let Some(done) = self.completed.get(player_id) else {
            return false;
        };

        if done.iter().any(|id| id == tech_id) {
            return false;
        }
        if !node
            .requirements
            .iter()
            .all(|req| done.iter().any(|id| id == req))
        {
            return false;
        }

        self.can_afford(player_id, &node.cost)
    }

    /// Pays the node's full cost up front and enqueues the job. Nothing is
    /// refunded if the player disconnects before completion.
    pub fn start_research(&mut self, player_id: &str, tech_id: &str, now_ms: u64) -> bool {
        if !self.can_research(player_id, tech_id) {
            return false;
        }

        let node = match tech_node(tech_id) {
            Some(node) => node,
            None => return false,
        };
        if !self.deduct_resources(player_id, &node.cost) {
            return false;
        }

        if let Some(queue) = self.research.get_mut(player_id) {
            queue.push_back(ResearchEntry {
                tech_id: tech_id.to_string(),
                started_ms: now_ms,
            });
            info!("Player {} started researching {}", player_id, tech_id);
            return true;
        }
        false
    }

    /// Drains every completed entry from the head of the queue, in order.
    /// Stops at the first unfinished head: a cheap tech queued behind a slow
    /// one never completes early. Returns the tech ids completed this call.
    pub fn update_research(&mut self, player_id: &str, now_ms: u64) -> Vec<String> {
        let mut finished = Vec::new();

        let Some(queue) = self.research.get_mut(player_id) else {
            return finished;
        };

        while let Some(entry) = queue.front() {
            let Some(node) = tech_node(&entry.tech_id) else {
                // Stale id with no catalog entry cannot complete; drop it.
                queue.pop_front();
                continue;
            };

            if now_ms.saturating_sub(entry.started_ms) >= node.research_ms {
                if let Some(entry) = queue.pop_front() {
                    finished.push(entry.tech_id);
                }
            } else {
                break;
            }
        }

        if let Some(done) = self.completed.get_mut(player_id) {
            for tech_id in &finished {
                debug!("Player {} completed research {}", player_id, tech_id);
                done.push(tech_id.clone());
            }
        }

        finished
    }
}
