//! The authoritative command arbiter and tick driver.
//!
//! `StateAuthority` owns the canonical per-player unit maps and the three
//! services that gate every mutation: the integrity monitor, the visibility
//! index and the economy. Commands pass a fixed pipeline — ban check,
//! integrity heuristics, visibility claim, game rules, cost — before any
//! state changes, so a rejected command is always a no-op.

use crate::economy::Economy;
use crate::integrity::{IntegrityMonitor, StateSnapshot, UnitObservation};
use crate::visibility::VisibilityIndex;
use log::{error, info, warn};
use shared::{
    tech_node, CommandAction, Direction, Envelope, PlayerId, Position, Resources, StateSync,
    StateUpdate, TechRequest, Unit, UnitId, UnitStatus, UnitType, ATTACK_COOLDOWN_MS,
    ATTACK_DAMAGE, DEPLOY_COOLDOWN_MS, DEPLOY_SPACING, MAX_UNITS_PER_PLAYER, MAX_UNITS_PER_TYPE,
};
use std::collections::HashMap;
use thiserror::Error;

/// Why a command was refused. These are business-rule outcomes, not faults;
/// the reason is relayed verbatim to the issuing client.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("player is banned")]
    Banned,
    #[error("action flagged by integrity checks")]
    Suspicious,
    #[error("target is not visible")]
    NotVisible,
    #[error("no game in progress for this player")]
    UnknownPlayer,
    #[error("unit not found")]
    UnknownUnit,
    #[error("no idle units of the requested type")]
    NoIdleUnits,
    #[error("coordinates are outside the map")]
    OutOfBounds,
    #[error("unit limit reached")]
    UnitCapReached,
    #[error("unit type limit reached")]
    TypeCapReached,
    #[error("action '{0}' is on cooldown")]
    Cooldown(&'static str),
    #[error("insufficient resources")]
    InsufficientResources,
    #[error("unknown tech")]
    UnknownTech,
    #[error("tech cannot be researched yet")]
    ResearchUnavailable,
    #[error("client state diverged from server state")]
    SyncMismatch,
}

/// Canonical per-player simulation state.
#[derive(Debug, Default)]
struct PlayerGame {
    units: HashMap<UnitId, Unit>,
    last_update_ms: u64,
}

/// Single authority over all game state for this process.
///
/// Services are plain owned fields constructed with the authority and
/// passed nowhere else; there is no ambient global state.
#[derive(Debug, Default)]
pub struct StateAuthority {
    games: HashMap<PlayerId, PlayerGame>,
    economy: Economy,
    visibility: VisibilityIndex,
    integrity: IntegrityMonitor,
    cooldowns: HashMap<PlayerId, HashMap<&'static str, u64>>,
}

fn cooldown_ms(action: &str) -> Option<u64> {
    match action {
        "deploy" => Some(DEPLOY_COOLDOWN_MS),
        "attack" => Some(ATTACK_COOLDOWN_MS),
        _ => None,
    }
}

impl StateAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn economy(&self) -> &Economy {
        &self.economy
    }

    pub fn economy_mut(&mut self) -> &mut Economy {
        &mut self.economy
    }

    pub fn visibility(&self) -> &VisibilityIndex {
        &self.visibility
    }

    pub fn integrity(&self) -> &IntegrityMonitor {
        &self.integrity
    }

    pub fn is_active(&self, player_id: &str) -> bool {
        self.games.contains_key(player_id)
    }

    pub fn unit_count(&self, player_id: &str) -> usize {
        self.games.get(player_id).map_or(0, |game| game.units.len())
    }

    pub fn get_unit(&self, player_id: &str, unit_id: &UnitId) -> Option<&Unit> {
        self.games
            .get(player_id)
            .and_then(|game| game.units.get(unit_id))
    }

    pub fn unit_ids(&self, player_id: &str) -> Vec<UnitId> {
        self.games
            .get(player_id)
            .map(|game| game.units.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Seeds the economy and an empty unit map for a new player.
    pub fn initialize_game(&mut self, player_id: &str) {
        self.economy.initialize_player(player_id);
        self.games
            .insert(player_id.to_string(), PlayerGame::default());
        info!("Game initialized for player {}", player_id);
    }

    /// Synchronously purges every trace of a player: units (with
    /// visibility deregistration), ledger, integrity history, cooldowns.
    pub fn remove_player(&mut self, player_id: &str) {
        if let Some(game) = self.games.remove(player_id) {
            for unit_id in game.units.keys() {
                self.visibility.remove_unit(unit_id);
            }
        }
        self.economy.remove_player(player_id);
        self.integrity.remove_player(player_id);
        self.cooldowns.remove(player_id);
        info!("Player {} removed from simulation", player_id);
    }

    /// Runs one command through the full validation pipeline and applies
    /// its mutation. All-or-nothing: any `Err` leaves the state untouched.
    pub fn process_command(
        &mut self,
        player_id: &str,
        envelope: &Envelope,
        action: &CommandAction,
        now_ms: u64,
    ) -> Result<(), Rejection> {
        if self.integrity.is_banned(player_id) {
            return Err(Rejection::Banned);
        }

        let resources: Resources = self
            .economy
            .get_resources(player_id)
            .ok_or(Rejection::UnknownPlayer)?;

        if !self
            .integrity
            .validate_action(player_id, envelope, &resources, &self.visibility, now_ms)
        {
            return Err(Rejection::Suspicious);
        }

        if let Some(target_id) = action.target_id() {
            if !self
                .visibility
                .validate_visibility_claim(player_id, &target_id)
            {
                warn!(
                    "Player {} acted on invisible target {}",
                    player_id, target_id
                );
                return Err(Rejection::NotVisible);
            }
        }

        self.check_rules(player_id, action, now_ms)?;

        match action {
            CommandAction::Deploy {
                unit_type,
                count,
                coordinates,
            } => self.apply_deploy(player_id, *unit_type, *count, *coordinates, now_ms)?,
            CommandAction::Move {
                unit_id,
                coordinates,
            } => self.apply_move(player_id, unit_id, *coordinates, now_ms)?,
            CommandAction::Attack { unit_id, target_id } => {
                self.apply_attack(player_id, unit_id, target_id, now_ms)?
            }
            CommandAction::Scout {
                unit_type,
                direction,
                count,
            } => self.apply_scout(player_id, *unit_type, *direction, *count, now_ms)?,
            CommandAction::Retreat { unit_id } => self.apply_retreat(player_id, unit_id)?,
        }

        if cooldown_ms(action.name()).is_some() {
            self.cooldowns
                .entry(player_id.to_string())
                .or_default()
                .insert(action.name(), now_ms);
        }

        let snapshot = self.snapshot_of(player_id, action.name(), now_ms);
        self.integrity.add_snapshot(player_id, snapshot);
        Ok(())
    }

    /// Static game rules: map bounds, unit caps, per-action cooldowns.
    /// Violations are ordinary rejections, not cheating.
    fn check_rules(
        &self,
        player_id: &str,
        action: &CommandAction,
        now_ms: u64,
    ) -> Result<(), Rejection> {
        if let Some(coordinates) = action.coordinates() {
            if !coordinates.in_bounds() {
                return Err(Rejection::OutOfBounds);
            }
        }

        if let Some(cooldown) = cooldown_ms(action.name()) {
            let last = self
                .cooldowns
                .get(player_id)
                .and_then(|stamps| stamps.get(action.name()));
            if let Some(&last_ms) = last {
                if now_ms.saturating_sub(last_ms) < cooldown {
                    return Err(Rejection::Cooldown(action.name()));
                }
            }
        }

        if let CommandAction::Deploy {
            unit_type, count, ..
        } = action
        {
            let game = self.games.get(player_id).ok_or(Rejection::UnknownPlayer)?;
            let total = game.units.len();
            if total + *count as usize > MAX_UNITS_PER_PLAYER {
                return Err(Rejection::UnitCapReached);
            }
            let of_type = game
                .units
                .values()
                .filter(|unit| unit.unit_type == *unit_type)
                .count();
            if of_type + *count as usize > MAX_UNITS_PER_TYPE {
                return Err(Rejection::TypeCapReached);
            }
        }

        Ok(())
    }

    /// Cost is deducted first, units are inserted second; a failed
    /// deduction deploys nothing.
    fn apply_deploy(
        &mut self,
        player_id: &str,
        unit_type: UnitType,
        count: u32,
        coordinates: Position,
        now_ms: u64,
    ) -> Result<(), Rejection> {
        let cost = unit_type.deploy_cost().scaled(count as f64);
        if !self.economy.deduct_resources(player_id, &cost) {
            return Err(Rejection::InsufficientResources);
        }

        let mut deployed = Vec::with_capacity(count as usize);
        for i in 0..count as i32 {
            // Batch deployments spread into a 3-wide grid around the drop point.
            let offset = Position::new(
                coordinates.x + (i % 3) * DEPLOY_SPACING,
                coordinates.y + (i / 3) * DEPLOY_SPACING,
            )
            .clamped();
            let unit = Unit::new(player_id.to_string(), unit_type, offset, now_ms);
            deployed.push(unit);
        }

        let game = self.games.get_mut(player_id).ok_or(Rejection::UnknownPlayer)?;
        for unit in &deployed {
            game.units.insert(unit.id, unit.clone());
        }
        for unit in &deployed {
            self.visibility.update_unit(unit);
            info!(
                "Deployed {} {} at ({}, {}) for {}",
                unit.unit_type.name(),
                unit.id,
                unit.position.x,
                unit.position.y,
                player_id
            );
        }
        Ok(())
    }

    fn apply_move(
        &mut self,
        player_id: &str,
        unit_id: &UnitId,
        coordinates: Position,
        now_ms: u64,
    ) -> Result<(), Rejection> {
        let game = self.games.get_mut(player_id).ok_or(Rejection::UnknownPlayer)?;
        let unit = game.units.get_mut(unit_id).ok_or(Rejection::UnknownUnit)?;

        let destination = coordinates.clamped();
        unit.position = destination;
        unit.destination = Some(destination);
        unit.status = UnitStatus::Moving;
        unit.last_updated = now_ms;

        let moved = unit.clone();
        self.visibility.update_unit(&moved);
        Ok(())
    }

    fn apply_attack(
        &mut self,
        player_id: &str,
        unit_id: &UnitId,
        target_id: &UnitId,
        now_ms: u64,
    ) -> Result<(), Rejection> {
        {
            let game = self.games.get_mut(player_id).ok_or(Rejection::UnknownPlayer)?;
            let attacker = game.units.get_mut(unit_id).ok_or(Rejection::UnknownUnit)?;
            attacker.status = UnitStatus::Attacking;
            attacker.target_id = Some(*target_id);
            attacker.last_updated = now_ms;
        }

        self.apply_damage(target_id, ATTACK_DAMAGE, now_ms);
        Ok(())
    }

    /// Deducts health from whichever player's map holds the target. A unit
    /// reaching zero health is destroyed exactly once: removed from its
    /// owner's map and deregistered from the visibility index.
    fn apply_damage(&mut self, target_id: &UnitId, amount: i32, now_ms: u64) {
        let mut destroyed = false;
        let mut survivor = None;

        for game in self.games.values_mut() {
            if let Some(unit) = game.units.get_mut(target_id) {
                unit.health -= amount;
                unit.last_updated = now_ms;
                if unit.is_destroyed() {
                    unit.status = UnitStatus::Destroyed;
                    info!("Unit {} destroyed", target_id);
                    game.units.remove(target_id);
                    destroyed = true;
                } else {
                    survivor = Some(unit.clone());
                }
                break;
            }
        }

        if destroyed {
            self.visibility.remove_unit(target_id);
        } else if let Some(unit) = survivor {
            self.visibility.update_unit(&unit);
        }
    }

    /// Sends up to `count` idle units of the given type sweeping toward a
    /// compass direction.
    fn apply_scout(
        &mut self,
        player_id: &str,
        unit_type: UnitType,
        direction: Direction,
        count: u32,
        now_ms: u64,
    ) -> Result<(), Rejection> {
        let game = self.games.get_mut(player_id).ok_or(Rejection::UnknownPlayer)?;
        let (dx, dy) = direction.offset();

        let idle: Vec<UnitId> = game
            .units
            .values()
            .filter(|unit| unit.unit_type == unit_type && unit.status == UnitStatus::Idle)
            .take(count as usize)
            .map(|unit| unit.id)
            .collect();

        if idle.is_empty() {
            return Err(Rejection::NoIdleUnits);
        }

        for unit_id in idle {
            if let Some(unit) = game.units.get_mut(&unit_id) {
                let destination =
                    Position::new(unit.position.x + dx, unit.position.y + dy).clamped();
                unit.destination = Some(destination);
                unit.status = UnitStatus::Scouting;
                unit.last_updated = now_ms;
            }
        }
        Ok(())
    }

    /// Explicit despawn: the unit leaves the field and its vision with it.
    fn apply_retreat(&mut self, player_id: &str, unit_id: &UnitId) -> Result<(), Rejection> {
        let game = self.games.get_mut(player_id).ok_or(Rejection::UnknownPlayer)?;
        game.units.remove(unit_id).ok_or(Rejection::UnknownUnit)?;
        self.visibility.remove_unit(unit_id);
        info!("Unit {} retreated off the field for {}", unit_id, player_id);
        Ok(())
    }

    fn snapshot_of(&self, player_id: &str, action: &str, now_ms: u64) -> StateSnapshot {
        let units = self
            .games
            .get(player_id)
            .map(|game| {
                game.units
                    .iter()
                    .map(|(id, unit)| {
                        (
                            *id,
                            UnitObservation {
                                position: unit.position,
                                health: unit.health,
                            },
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();

        StateSnapshot {
            timestamp: now_ms,
            resources: self.economy.get_resources(player_id).unwrap_or_default(),
            units,
            actions: vec![action.to_string()],
        }
    }

    /// Routes a research request. The cost is paid immediately on success.
    pub fn handle_tech(
        &mut self,
        player_id: &str,
        request: &TechRequest,
        now_ms: u64,
    ) -> Result<(), Rejection> {
        if self.integrity.is_banned(player_id) {
            return Err(Rejection::Banned);
        }
        if tech_node(&request.tech_id).is_none() {
            return Err(Rejection::UnknownTech);
        }
        if !self
            .economy
            .start_research(player_id, &request.tech_id, now_ms)
        {
            return Err(Rejection::ResearchUnavailable);
        }
        Ok(())
    }

    /// Checks a client's claimed state against the authoritative record.
    pub fn handle_sync(&mut self, player_id: &str, claim: &StateSync) -> Result<(), Rejection> {
        if self.integrity.is_banned(player_id) {
            return Err(Rejection::Banned);
        }
        if !self.integrity.validate_state_sync(player_id, claim) {
            return Err(Rejection::SyncMismatch);
        }
        Ok(())
    }

    /// Scores a resource report against the spike heuristic. The ledger is
    /// never mutated from client reports; income flows through the economy.
    pub fn handle_resource(
        &mut self,
        player_id: &str,
        envelope: &Envelope,
        now_ms: u64,
    ) -> Result<(), Rejection> {
        if self.integrity.is_banned(player_id) {
            return Err(Rejection::Banned);
        }
        let resources = self
            .economy
            .get_resources(player_id)
            .ok_or(Rejection::UnknownPlayer)?;
        if !self
            .integrity
            .validate_action(player_id, envelope, &resources, &self.visibility, now_ms)
        {
            return Err(Rejection::Banned);
        }
        Ok(())
    }

    /// One fixed-cadence slice: drain finished research, then compute each
    /// player's visible world. A player whose slice fails is skipped for
    /// this tick only; everyone else still gets their update.
    pub fn tick(&mut self, now_ms: u64) -> Vec<(PlayerId, StateUpdate)> {
        let players: Vec<PlayerId> = self.games.keys().cloned().collect();
        let mut updates = Vec::with_capacity(players.len());

        for player_id in players {
            self.economy.update_research(&player_id, now_ms);

            let Some(resources) = self.economy.get_resources(&player_id) else {
                error!("No ledger for active player {}, skipping tick slice", player_id);
                continue;
            };

            let update = StateUpdate {
                resources,
                units: self.visibility.get_visible_units(&player_id),
                tech_progress: self.economy.get_tech_progress(&player_id),
            };

            if let Some(game) = self.games.get_mut(&player_id) {
                game.last_update_ms = now_ms;
            }
            updates.push((player_id, update));
        }

        updates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::MessagePayload;

    fn command(client_id: &str, sequence: u64, action: CommandAction) -> (Envelope, CommandAction) {
        let envelope = Envelope {
            payload: MessagePayload::Command(action.clone()),
            timestamp: 0,
            signature: "sig".to_string(),
            client_id: client_id.to_string(),
            sequence,
        };
        (envelope, action)
    }

    fn run(
        authority: &mut StateAuthority,
        player: &str,
        sequence: u64,
        action: CommandAction,
        now_ms: u64,
    ) -> Result<(), Rejection> {
        let (envelope, action) = command(player, sequence, action);
        authority.process_command(player, &envelope, &action, now_ms)
    }

    fn deploy(unit_type: UnitType, count: u32, x: i32, y: i32) -> CommandAction {
        CommandAction::Deploy {
            unit_type,
            count,
            coordinates: Position::new(x, y),
        }
    }

    #[test]
    fn test_deploy_deducts_and_inserts() {
        let mut authority = StateAuthority::new();
        authority.initialize_game("p1");

        run(
            &mut authority,
            "p1",
            1,
            deploy(UnitType::Defender, 3, 10, 20),
            1000,
        )
        .unwrap();

        assert_eq!(authority.unit_count("p1"), 3);
        let ledger = authority.economy().get_resources("p1").unwrap();
        assert_eq!(ledger.credits, 400.0);
        assert_eq!(ledger.energy, 40.0);
        assert_eq!(authority.visibility().get_visible_units("p1").len(), 3);
        // One snapshot recorded for the command.
        assert_eq!(authority.integrity().history_len("p1"), 1);
    }

    #[test]
    fn test_deploy_rejects_unaffordable() {
        let mut authority = StateAuthority::new();
        authority.initialize_game("p1");

        // 6 tanks cost 2400 credits against a starting 1000.
        let result = run(&mut authority, "p1", 1, deploy(UnitType::Tank, 6, 10, 10), 1000);
        assert_eq!(result, Err(Rejection::InsufficientResources));
        assert_eq!(authority.unit_count("p1"), 0);
        assert_eq!(
            authority.economy().get_resources("p1").unwrap(),
            Resources::starting()
        );
    }

    #[test]
    fn test_deploy_rejects_out_of_bounds() {
        let mut authority = StateAuthority::new();
        authority.initialize_game("p1");
        let result = run(&mut authority, "p1", 1, deploy(UnitType::Scout, 1, 500, 10), 1000);
        assert_eq!(result, Err(Rejection::OutOfBounds));
    }

    #[test]
    fn test_deploy_type_cap() {
        let mut authority = StateAuthority::new();
        authority.initialize_game("p1");
        authority
            .economy_mut()
            .grant("p1", &Resources::new(10_000.0, 1000.0, 0.0, 0.0));

        run(&mut authority, "p1", 1, deploy(UnitType::Scout, 9, 10, 10), 1000).unwrap();

        let result = run(&mut authority, "p1", 2, deploy(UnitType::Scout, 7, 40, 40), 10_000);
        assert_eq!(result, Err(Rejection::TypeCapReached));
        assert_eq!(authority.unit_count("p1"), 9);
    }

    #[test]
    fn test_deploy_cooldown() {
        let mut authority = StateAuthority::new();
        authority.initialize_game("p1");

        run(&mut authority, "p1", 1, deploy(UnitType::Scout, 1, 10, 10), 1000).unwrap();

        let result = run(&mut authority, "p1", 2, deploy(UnitType::Scout, 1, 20, 20), 2000);
        assert_eq!(result, Err(Rejection::Cooldown("deploy")));

        run(&mut authority, "p1", 3, deploy(UnitType::Scout, 1, 20, 20), 3001).unwrap();
        assert_eq!(authority.unit_count("p1"), 2);
    }

    #[test]
    fn test_move_updates_position_and_visibility() {
        let mut authority = StateAuthority::new();
        authority.initialize_game("p1");
        run(&mut authority, "p1", 1, deploy(UnitType::Scout, 1, 10, 10), 1000).unwrap();
        let unit_id = authority.unit_ids("p1")[0];

        run(
            &mut authority,
            "p1",
            2,
            CommandAction::Move {
                unit_id,
                coordinates: Position::new(40, 40),
            },
            4000,
        )
        .unwrap();

        let unit = authority.get_unit("p1", &unit_id).unwrap();
        assert_eq!(unit.position, Position::new(40, 40));
        assert_eq!(unit.status, UnitStatus::Moving);
        assert!(authority.visibility().is_visible(&Position::new(40, 40), "p1"));
        assert!(!authority.visibility().is_visible(&Position::new(10, 10), "p1"));
    }

    #[test]
    fn test_move_unknown_unit() {
        let mut authority = StateAuthority::new();
        authority.initialize_game("p1");
        run(&mut authority, "p1", 1, deploy(UnitType::Scout, 1, 10, 10), 1000).unwrap();

        let result = run(
            &mut authority,
            "p1",
            2,
            CommandAction::Move {
                unit_id: UnitId::new_v4(),
                coordinates: Position::new(20, 20),
            },
            4000,
        );
        assert_eq!(result, Err(Rejection::UnknownUnit));
    }

    #[test]
    fn test_attack_damages_and_destroys_target() {
        let mut authority = StateAuthority::new();
        authority.initialize_game("p1");
        authority.initialize_game("p2");

        run(&mut authority, "p1", 1, deploy(UnitType::Scout, 1, 50, 50), 1000).unwrap();
        run(&mut authority, "p2", 1, deploy(UnitType::Drone, 1, 55, 55), 1000).unwrap();
        let attacker = authority.unit_ids("p1")[0];
        let target = authority.unit_ids("p2")[0];

        // Drone has 60 health; three 25-point hits destroy it.
        let mut now = 10_000;
        for sequence in 2..=3u64 {
            run(
                &mut authority,
                "p1",
                sequence,
                CommandAction::Attack {
                    unit_id: attacker,
                    target_id: target,
                },
                now,
            )
            .unwrap();
            now += ATTACK_COOLDOWN_MS;
        }
        assert_eq!(
            authority.get_unit("p2", &target).unwrap().health,
            60 - 2 * ATTACK_DAMAGE
        );

        run(
            &mut authority,
            "p1",
            4,
            CommandAction::Attack {
                unit_id: attacker,
                target_id: target,
            },
            now,
        )
        .unwrap();

        // Destroyed exactly once: gone from the map and from the index.
        assert!(authority.get_unit("p2", &target).is_none());
        assert_eq!(authority.unit_count("p2"), 0);
        assert!(!authority.visibility().validate_visibility_claim("p1", &target));

        // A further attack on the dead unit is an ordinary visibility
        // rejection (and a forgery suspicion).
        let result = run(
            &mut authority,
            "p1",
            5,
            CommandAction::Attack {
                unit_id: attacker,
                target_id: target,
            },
            now + ATTACK_COOLDOWN_MS,
        );
        assert_eq!(result, Err(Rejection::NotVisible));
        assert_eq!(authority.integrity().suspicion_count("p1"), 1);
    }

    #[test]
    fn test_attack_invisible_target_rejected_with_suspicion() {
        let mut authority = StateAuthority::new();
        authority.initialize_game("p1");
        authority.initialize_game("p2");

        run(&mut authority, "p1", 1, deploy(UnitType::Scout, 1, 10, 10), 1000).unwrap();
        // Far outside the scout's vision.
        run(&mut authority, "p2", 1, deploy(UnitType::Tank, 1, 90, 90), 1000).unwrap();
        let attacker = authority.unit_ids("p1")[0];
        let target = authority.unit_ids("p2")[0];

        let result = run(
            &mut authority,
            "p1",
            2,
            CommandAction::Attack {
                unit_id: attacker,
                target_id: target,
            },
            5000,
        );
        assert_eq!(result, Err(Rejection::NotVisible));
        assert_eq!(authority.integrity().suspicion_count("p1"), 1);
        // Target untouched.
        assert_eq!(authority.get_unit("p2", &target).unwrap().health, 200);
    }

    #[test]
    fn test_repeated_forgery_bans_player() {
        let mut authority = StateAuthority::new();
        authority.initialize_game("p1");
        run(&mut authority, "p1", 1, deploy(UnitType::Scout, 1, 10, 10), 1000).unwrap();
        let attacker = authority.unit_ids("p1")[0];

        let mut now = 10_000;
        for sequence in 2..=5u64 {
            let result = run(
                &mut authority,
                "p1",
                sequence,
                CommandAction::Attack {
                    unit_id: attacker,
                    target_id: UnitId::new_v4(),
                },
                now,
            );
            assert_eq!(result, Err(Rejection::NotVisible));
            now += ATTACK_COOLDOWN_MS;
        }
        assert_eq!(authority.integrity().suspicion_count("p1"), 4);
        assert!(!authority.integrity().is_banned("p1"));

        // The fifth forged action flips the ban.
        let result = run(
            &mut authority,
            "p1",
            6,
            CommandAction::Attack {
                unit_id: attacker,
                target_id: UnitId::new_v4(),
            },
            now,
        );
        assert_eq!(result, Err(Rejection::Suspicious));
        assert!(authority.integrity().is_banned("p1"));

        // Everything afterwards is rejected outright, even clean commands.
        let result = run(
            &mut authority,
            "p1",
            7,
            CommandAction::Move {
                unit_id: attacker,
                coordinates: Position::new(12, 12),
            },
            now + 5000,
        );
        assert_eq!(result, Err(Rejection::Banned));
    }

    #[test]
    fn test_scout_assigns_idle_units() {
        let mut authority = StateAuthority::new();
        authority.initialize_game("p1");
        run(&mut authority, "p1", 1, deploy(UnitType::Scout, 2, 10, 10), 1000).unwrap();

        run(
            &mut authority,
            "p1",
            2,
            CommandAction::Scout {
                unit_type: UnitType::Scout,
                direction: Direction::East,
                count: 2,
            },
            4000,
        )
        .unwrap();

        for unit_id in authority.unit_ids("p1") {
            let unit = authority.get_unit("p1", &unit_id).unwrap();
            assert_eq!(unit.status, UnitStatus::Scouting);
            let destination = unit.destination.unwrap();
            assert!(destination.x > unit.position.x);
        }

        // No idle units remain, so a second sweep is refused.
        let result = run(
            &mut authority,
            "p1",
            3,
            CommandAction::Scout {
                unit_type: UnitType::Scout,
                direction: Direction::West,
                count: 1,
            },
            8000,
        );
        assert_eq!(result, Err(Rejection::NoIdleUnits));
    }

    #[test]
    fn test_retreat_despawns_unit() {
        let mut authority = StateAuthority::new();
        authority.initialize_game("p1");
        run(&mut authority, "p1", 1, deploy(UnitType::Medic, 1, 30, 30), 1000).unwrap();
        let unit_id = authority.unit_ids("p1")[0];

        run(&mut authority, "p1", 2, CommandAction::Retreat { unit_id }, 4000).unwrap();
        assert_eq!(authority.unit_count("p1"), 0);
        assert!(!authority.visibility().is_visible(&Position::new(30, 30), "p1"));
    }

    #[test]
    fn test_tech_request_routes_to_economy() {
        let mut authority = StateAuthority::new();
        authority.initialize_game("p1");

        let request = TechRequest {
            tech_id: "energy_efficiency".to_string(),
        };
        authority.handle_tech("p1", &request, 1000).unwrap();
        assert_eq!(authority.economy().research_queue_len("p1"), 1);

        let unknown = TechRequest {
            tech_id: "warp_drive".to_string(),
        };
        assert_eq!(
            authority.handle_tech("p1", &unknown, 2000),
            Err(Rejection::UnknownTech)
        );

        // advanced_units needs tech the player does not have.
        let unaffordable = TechRequest {
            tech_id: "advanced_units".to_string(),
        };
        assert_eq!(
            authority.handle_tech("p1", &unaffordable, 3000),
            Err(Rejection::ResearchUnavailable)
        );
    }

    #[test]
    fn test_tick_emits_per_player_updates() {
        let mut authority = StateAuthority::new();
        authority.initialize_game("p1");
        authority.initialize_game("p2");
        run(&mut authority, "p1", 1, deploy(UnitType::Defender, 3, 10, 20), 1000).unwrap();

        let updates = authority.tick(2000);
        assert_eq!(updates.len(), 2);

        let p1_update = &updates.iter().find(|(id, _)| id == "p1").unwrap().1;
        assert_eq!(p1_update.units.len(), 3);
        assert_eq!(p1_update.resources.credits, 400.0);

        // p2 has no unit near (10, 20), so sees none of p1's defenders.
        let p2_update = &updates.iter().find(|(id, _)| id == "p2").unwrap().1;
        assert!(p2_update.units.is_empty());
    }

    #[test]
    fn test_tick_drains_research() {
        let mut authority = StateAuthority::new();
        authority.initialize_game("p1");
        let request = TechRequest {
            tech_id: "energy_efficiency".to_string(),
        };
        authority.handle_tech("p1", &request, 0).unwrap();

        let updates = authority.tick(10_000);
        assert!(updates[0].1.tech_progress.is_empty());

        let updates = authority.tick(45_000);
        assert_eq!(
            updates[0].1.tech_progress,
            vec!["energy_efficiency".to_string()]
        );
    }

    #[test]
    fn test_remove_player_purges_everything() {
        let mut authority = StateAuthority::new();
        authority.initialize_game("p1");
        run(&mut authority, "p1", 1, deploy(UnitType::Scout, 2, 10, 10), 1000).unwrap();

        authority.remove_player("p1");
        assert!(!authority.is_active("p1"));
        assert_eq!(authority.unit_count("p1"), 0);
        assert!(authority.economy().get_resources("p1").is_none());
        assert_eq!(authority.integrity().history_len("p1"), 0);
        assert!(!authority.visibility().is_visible(&Position::new(10, 10), "p1"));
    }

    #[test]
    fn test_command_for_uninitialized_player() {
        let mut authority = StateAuthority::new();
        let result = run(&mut authority, "ghost", 1, deploy(UnitType::Scout, 1, 10, 10), 1000);
        assert_eq!(result, Err(Rejection::UnknownPlayer));
    }
}
