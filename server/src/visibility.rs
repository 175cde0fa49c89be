//! Fog-of-war index mapping map cells to the players that can observe them.
//!
//! The map is partitioned into fixed-size square cells. A unit's vision is
//! approximated as the square of cells within `ceil(vision_range / cell)`
//! Chebyshev radius of its own cell rather than an exact circle; cell
//! lookups stay O(1) at the cost of slightly generous corners.
//!
//! Cell membership is reference-counted per player so that two overlapping
//! units of the same owner do not cancel each other out when one moves away.

use shared::{PlayerId, Position, Unit, UnitId, GRID_CELL_SIZE};
use std::collections::HashMap;

type CellKey = (i32, i32);

/// Spatial index answering "who can see what" for the whole battlefield.
///
/// Holds only a denormalized read-mirror of units keyed by id; the state
/// authority owns the canonical unit maps.
#[derive(Debug, Default)]
pub struct VisibilityIndex {
    units: HashMap<UnitId, Unit>,
    grid: HashMap<CellKey, HashMap<PlayerId, u32>>,
}

fn cell_of(pos: &Position) -> CellKey {
    (
        pos.x.div_euclid(GRID_CELL_SIZE),
        pos.y.div_euclid(GRID_CELL_SIZE),
    )
}

fn affected_cells(pos: &Position, vision_range: i32) -> Vec<CellKey> {
    let radius = (vision_range + GRID_CELL_SIZE - 1) / GRID_CELL_SIZE;
    let (cx, cy) = cell_of(pos);

    let mut cells = Vec::with_capacity(((2 * radius + 1) * (2 * radius + 1)) as usize);
    for dx in -radius..=radius {
        for dy in -radius..=radius {
            cells.push((cx + dx, cy + dy));
        }
    }
    cells
}

impl VisibilityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn acquire(&mut self, owner: &str, pos: &Position, vision_range: i32) {
        for cell in affected_cells(pos, vision_range) {
            let viewers = self.grid.entry(cell).or_default();
            *viewers.entry(owner.to_string()).or_insert(0) += 1;
        }
    }

    fn release(&mut self, owner: &str, pos: &Position, vision_range: i32) {
        for cell in affected_cells(pos, vision_range) {
            if let Some(viewers) = self.grid.get_mut(&cell) {
                if let Some(count) = viewers.get_mut(owner) {
                    *count -= 1;
                    if *count == 0 {
                        viewers.remove(owner);
                    }
                }
                if viewers.is_empty() {
                    self.grid.remove(&cell);
                }
            }
        }
    }

    /// Registers or re-registers a unit. Memberships from the previous
    /// position are released before the new ones are added; skipping the
    /// release step would leak vision at stale positions forever.
    pub fn update_unit(&mut self, unit: &Unit) {
        if let Some(previous) = self.units.get(&unit.id) {
            let (owner, pos, range) = (
                previous.owner.clone(),
                previous.position,
                previous.vision_range,
            );
            self.release(&owner, &pos, range);
        }

        self.acquire(&unit.owner, &unit.position, unit.vision_range);
        self.units.insert(unit.id, unit.clone());
    }

    /// Deregisters a destroyed or despawned unit.
    pub fn remove_unit(&mut self, unit_id: &UnitId) {
        if let Some(unit) = self.units.remove(unit_id) {
            self.release(&unit.owner, &unit.position, unit.vision_range);
        }
    }

    /// Removes every unit belonging to a disconnecting player.
    pub fn remove_player(&mut self, player_id: &str) {
        let ids: Vec<UnitId> = self
            .units
            .values()
            .filter(|unit| unit.owner == player_id)
            .map(|unit| unit.id)
            .collect();
        for id in ids {
            self.remove_unit(&id);
        }
    }

    /// True if the cell containing `pos` is covered by any of the player's
    /// units' vision.
    pub fn is_visible(&self, pos: &Position, player_id: &str) -> bool {
        self.grid
            .get(&cell_of(pos))
            .map_or(false, |viewers| viewers.contains_key(player_id))
    }

    /// The units a player is allowed to perceive this tick: own units
    /// unconditionally, stealthed enemies never, everything else by cell
    /// membership.
    pub fn get_visible_units(&self, player_id: &str) -> Vec<Unit> {
        self.units
            .values()
            .filter(|unit| {
                if unit.owner == player_id {
                    return true;
                }
                if unit.stealthed {
                    return false;
                }
                self.is_visible(&unit.position, player_id)
            })
            .cloned()
            .collect()
    }

    /// Anti-cheat hook: a targeted action is only legal if the acting
    /// player's vision currently covers the target's cell.
    pub fn validate_visibility_claim(&self, player_id: &str, target_id: &UnitId) -> bool {
        match self.units.get(target_id) {
            Some(target) => self.is_visible(&target.position, player_id),
            None => false,
        }
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }
}
