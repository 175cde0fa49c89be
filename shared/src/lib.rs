//! Shared data model and wire protocol for the strategy-game backend.
//!
//! Everything that crosses the wire between the transport layer and the
//! authoritative server lives here: the message envelope with its replay
//! protection fields, the closed set of command variants produced by the
//! upstream command translator, and the unit/resource/tech data model the
//! simulation operates on.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

// Map and visibility tuning.
pub const GRID_CELL_SIZE: i32 = 10;
pub const MAX_COORDINATE: i32 = 100;

// Message gate tuning.
pub const MESSAGE_WINDOW_MS: u64 = 1000;
pub const TIMESTAMP_TOLERANCE_MS: u64 = 5000;

// Integrity monitor tuning.
pub const HISTORY_LENGTH: usize = 100;
pub const SUSPICIOUS_THRESHOLD: u32 = 5;
pub const RAPID_COMMAND_WINDOW_MS: u64 = 1000;
pub const RAPID_COMMAND_MAX: usize = 10;
pub const RESOURCE_SPIKE_THRESHOLD: f64 = 1000.0;
pub const TELEPORT_MAX_DISTANCE: f64 = 50.0;
pub const SYNC_RESOURCE_EPSILON: f64 = 0.01;

// Game rules.
pub const MAX_UNITS_PER_PLAYER: usize = 50;
pub const MAX_UNITS_PER_TYPE: usize = 15;
pub const DEPLOY_COOLDOWN_MS: u64 = 2000;
pub const ATTACK_COOLDOWN_MS: u64 = 1000;
pub const ATTACK_DAMAGE: i32 = 25;
pub const SCOUT_SWEEP_DISTANCE: i32 = 50;
pub const DEPLOY_SPACING: i32 = 2;

// Simulation cadence.
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 100;

/// Unique unit identifier within a game session.
pub type UnitId = Uuid;

/// Player identifier assigned at connect time.
pub type PlayerId = String;

/// Integer grid position on the battlefield.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Straight-line distance, used by the anti-teleport heuristic.
    pub fn distance(&self, other: &Position) -> f64 {
        let dx = (self.x - other.x) as f64;
        let dy = (self.y - other.y) as f64;
        (dx * dx + dy * dy).sqrt()
    }

    /// Clamps both axes onto the playable map.
    pub fn clamped(&self) -> Position {
        Position {
            x: self.x.clamp(0, MAX_COORDINATE),
            y: self.y.clamp(0, MAX_COORDINATE),
        }
    }

    pub fn in_bounds(&self) -> bool {
        (0..=MAX_COORDINATE).contains(&self.x) && (0..=MAX_COORDINATE).contains(&self.y)
    }
}

/// The closed set of deployable unit types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitType {
    Scout,
    Defender,
    Attacker,
    Engineer,
    Drone,
    Tank,
    SpecialOps,
    Medic,
}

impl UnitType {
    pub const ALL: [UnitType; 8] = [
        UnitType::Scout,
        UnitType::Defender,
        UnitType::Attacker,
        UnitType::Engineer,
        UnitType::Drone,
        UnitType::Tank,
        UnitType::SpecialOps,
        UnitType::Medic,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            UnitType::Scout => "scout",
            UnitType::Defender => "defender",
            UnitType::Attacker => "attacker",
            UnitType::Engineer => "engineer",
            UnitType::Drone => "drone",
            UnitType::Tank => "tank",
            UnitType::SpecialOps => "special_ops",
            UnitType::Medic => "medic",
        }
    }

    /// Resource cost to deploy a single unit of this type.
    pub fn deploy_cost(&self) -> Resources {
        match self {
            UnitType::Scout => Resources::new(100.0, 10.0, 0.0, 0.0),
            UnitType::Defender => Resources::new(200.0, 20.0, 0.0, 0.0),
            UnitType::Attacker => Resources::new(300.0, 30.0, 0.0, 0.0),
            UnitType::Engineer => Resources::new(200.0, 25.0, 0.0, 0.0),
            UnitType::Drone => Resources::new(150.0, 15.0, 0.0, 0.0),
            UnitType::Tank => Resources::new(400.0, 40.0, 0.0, 0.0),
            UnitType::SpecialOps => Resources::new(500.0, 50.0, 5.0, 0.0),
            UnitType::Medic => Resources::new(250.0, 20.0, 0.0, 0.0),
        }
    }

    /// Radius within which this unit reveals the map for its owner.
    pub fn vision_range(&self) -> i32 {
        match self {
            UnitType::Scout => 20,
            UnitType::Drone => 15,
            UnitType::SpecialOps => 12,
            _ => 10,
        }
    }

    pub fn max_health(&self) -> i32 {
        match self {
            UnitType::Tank => 200,
            UnitType::Defender => 150,
            UnitType::Drone => 60,
            _ => 100,
        }
    }

    /// Special ops units operate cloaked and are hidden from enemy view.
    pub fn is_stealthed(&self) -> bool {
        matches!(self, UnitType::SpecialOps)
    }
}

/// What a unit is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Idle,
    Moving,
    Attacking,
    Scouting,
    Retreating,
    Destroyed,
}

/// A single unit in the authoritative simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    pub owner: PlayerId,
    pub unit_type: UnitType,
    pub position: Position,
    pub health: i32,
    pub max_health: i32,
    pub vision_range: i32,
    pub stealthed: bool,
    pub status: UnitStatus,
    pub destination: Option<Position>,
    pub target_id: Option<UnitId>,
    pub last_updated: u64,
}

impl Unit {
    pub fn new(owner: PlayerId, unit_type: UnitType, position: Position, now_ms: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner,
            unit_type,
            position,
            health: unit_type.max_health(),
            max_health: unit_type.max_health(),
            vision_range: unit_type.vision_range(),
            stealthed: unit_type.is_stealthed(),
            status: UnitStatus::Idle,
            destination: None,
            target_id: None,
            last_updated: now_ms,
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.health <= 0
    }
}

/// Per-player resource ledger. Values never go negative.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Resources {
    pub credits: f64,
    pub energy: f64,
    pub intel: f64,
    pub tech: f64,
}

impl Resources {
    pub const fn new(credits: f64, energy: f64, intel: f64, tech: f64) -> Self {
        Self {
            credits,
            energy,
            intel,
            tech,
        }
    }

    /// Resources granted to every player at game start.
    pub const fn starting() -> Self {
        Resources::new(1000.0, 100.0, 0.0, 0.0)
    }

    /// True if every field covers the corresponding cost.
    pub fn covers(&self, cost: &Resources) -> bool {
        self.credits >= cost.credits
            && self.energy >= cost.energy
            && self.intel >= cost.intel
            && self.tech >= cost.tech
    }

    /// Subtracts `cost` from every field. Caller must check `covers` first.
    pub fn deduct(&mut self, cost: &Resources) {
        self.credits -= cost.credits;
        self.energy -= cost.energy;
        self.intel -= cost.intel;
        self.tech -= cost.tech;
    }

    /// Multiplies every field, for per-unit costs applied to a batch.
    pub fn scaled(&self, factor: f64) -> Resources {
        Resources::new(
            self.credits * factor,
            self.energy * factor,
            self.intel * factor,
            self.tech * factor,
        )
    }

    /// Named fields for iteration in heuristics and sync comparison.
    pub fn fields(&self) -> [(&'static str, f64); 4] {
        [
            ("credits", self.credits),
            ("energy", self.energy),
            ("intel", self.intel),
            ("tech", self.tech),
        ]
    }
}

/// A researchable upgrade in the static tech catalog.
#[derive(Debug, Clone, Copy)]
pub struct TechNode {
    pub id: &'static str,
    pub name: &'static str,
    pub cost: Resources,
    pub requirements: &'static [&'static str],
    pub unlocks: &'static [&'static str],
    pub research_ms: u64,
}

/// Static tech catalog, read-only at runtime.
pub const TECH_TREE: [TechNode; 4] = [
    TechNode {
        id: "advanced_units",
        name: "Advanced Units",
        cost: Resources::new(500.0, 0.0, 0.0, 50.0),
        requirements: &[],
        unlocks: &["special_ops", "tank"],
        research_ms: 60_000,
    },
    TechNode {
        id: "energy_efficiency",
        name: "Energy Efficiency",
        cost: Resources::new(300.0, 100.0, 0.0, 0.0),
        requirements: &[],
        unlocks: &["advanced_energy"],
        research_ms: 45_000,
    },
    TechNode {
        id: "drone_swarm",
        name: "Drone Swarm",
        cost: Resources::new(400.0, 0.0, 25.0, 0.0),
        requirements: &["advanced_units"],
        unlocks: &["drone_carrier"],
        research_ms: 30_000,
    },
    TechNode {
        id: "signal_intercept",
        name: "Signal Intercept",
        cost: Resources::new(250.0, 50.0, 0.0, 0.0),
        requirements: &[],
        unlocks: &["deep_scan"],
        research_ms: 20_000,
    },
];

pub fn tech_node(id: &str) -> Option<&'static TechNode> {
    TECH_TREE.iter().find(|node| node.id == id)
}

/// Compass direction for scouting sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    North,
    South,
    East,
    West,
}

impl Direction {
    /// Offset applied to a scouting unit's destination.
    pub fn offset(&self) -> (i32, i32) {
        match self {
            Direction::North => (0, -SCOUT_SWEEP_DISTANCE),
            Direction::South => (0, SCOUT_SWEEP_DISTANCE),
            Direction::East => (SCOUT_SWEEP_DISTANCE, 0),
            Direction::West => (-SCOUT_SWEEP_DISTANCE, 0),
        }
    }
}

/// A structured command produced by the upstream natural-language translator.
///
/// The set of actions is closed; anything the translator cannot express as
/// one of these variants never reaches the game state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandAction {
    Deploy {
        unit_type: UnitType,
        count: u32,
        coordinates: Position,
    },
    Move {
        unit_id: UnitId,
        coordinates: Position,
    },
    Attack {
        unit_id: UnitId,
        target_id: UnitId,
    },
    Scout {
        unit_type: UnitType,
        direction: Direction,
        count: u32,
    },
    Retreat {
        unit_id: UnitId,
    },
}

impl CommandAction {
    pub fn name(&self) -> &'static str {
        match self {
            CommandAction::Deploy { .. } => "deploy",
            CommandAction::Move { .. } => "move",
            CommandAction::Attack { .. } => "attack",
            CommandAction::Scout { .. } => "scout",
            CommandAction::Retreat { .. } => "retreat",
        }
    }

    /// Coordinates claimed by the command, if it carries any.
    pub fn coordinates(&self) -> Option<Position> {
        match self {
            CommandAction::Deploy { coordinates, .. } | CommandAction::Move { coordinates, .. } => {
                Some(*coordinates)
            }
            _ => None,
        }
    }

    /// The unit the command is issued to, if any.
    pub fn unit_id(&self) -> Option<UnitId> {
        match self {
            CommandAction::Move { unit_id, .. }
            | CommandAction::Attack { unit_id, .. }
            | CommandAction::Retreat { unit_id } => Some(*unit_id),
            _ => None,
        }
    }

    /// The unit the command targets, if any.
    pub fn target_id(&self) -> Option<UnitId> {
        match self {
            CommandAction::Attack { target_id, .. } => Some(*target_id),
            _ => None,
        }
    }
}

/// Client-claimed view of a unit, submitted in state-sync messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitClaim {
    pub position: Position,
    pub health: i32,
}

/// A client's claimed copy of its own state, checked against the server's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StateSync {
    pub resources: Resources,
    pub units: HashMap<UnitId, UnitClaim>,
}

/// A client-reported resource total, checked for implausible spikes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceReport {
    pub resources: Resources,
}

/// Request to start researching a tech node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechRequest {
    pub tech_id: String,
}

/// The typed payload of an inbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagePayload {
    Command(CommandAction),
    Sync(StateSync),
    Resource(ResourceReport),
    Tech(TechRequest),
    Chat(String),
}

impl MessagePayload {
    pub fn kind(&self) -> &'static str {
        match self {
            MessagePayload::Command(_) => "command",
            MessagePayload::Sync(_) => "sync",
            MessagePayload::Resource(_) => "resource",
            MessagePayload::Tech(_) => "tech",
            MessagePayload::Chat(_) => "chat",
        }
    }
}

/// An inbound message with its replay-protection fields.
///
/// The signature is carried as an opaque string; verifying it is the
/// transport layer's concern. The gate only enforces presence, sequence
/// monotonicity and timestamp freshness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub payload: MessagePayload,
    pub timestamp: u64,
    pub signature: String,
    pub client_id: PlayerId,
    pub sequence: u64,
}

/// Datagrams sent by clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientPacket {
    Connect { token: String },
    Message(Envelope),
    Disconnect,
}

/// Per-tick state visible to one player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    pub resources: Resources,
    pub units: Vec<Unit>,
    pub tech_progress: Vec<String>,
}

/// Datagrams sent by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerPacket {
    Connected { client_id: PlayerId },
    StateUpdate(StateUpdate),
    Chat { from: PlayerId, text: String },
    Rejected { reason: String },
    Disconnected { reason: String },
}
