//! # Strategy Game Server Library
//!
//! This library provides the authoritative backend for the networked
//! multiplayer strategy game. It owns the canonical game state, validates
//! every client message, and broadcasts per-player world views so that
//! clients render only what they are allowed to see.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! The server runs the definitive version of the game. Unit positions,
//! resource ledgers and research progress live only here; clients submit
//! intents and receive the server's filtered state updates.
//!
//! ### Message Integrity
//! Every inbound message passes a gate before any game logic runs:
//! session identity, monotonically increasing sequence numbers, timestamp
//! freshness and a per-client rate limit. Replays and floods are rejected
//! at the edge.
//!
//! ### Cheat Detection
//! Accepted messages are then scored against behavioral heuristics —
//! rapid command bursts, impossible resource growth, teleporting units and
//! actions on units the player cannot see. Repeat offenders are banned for
//! the rest of their session.
//!
//! ## Architecture Design
//!
//! ### Single-Threaded Event Loop
//! All game state is owned by one event loop that interleaves network
//! events with a fixed-cadence tick. Receiver and sender tasks only
//! shuttle datagrams over channels, so the simulation needs no locks and
//! behaves deterministically.
//!
//! ### UDP-Based Communication
//! Uses UDP sockets for low-latency communication. State updates are
//! regenerated every tick, so a lost datagram costs at most one tick of
//! staleness.
//!
//! ## Module Organization
//!
//! ### Gate Module (`gate`)
//! Session registry and per-message admission control: sequence ordering,
//! timestamp tolerance and rate limiting.
//!
//! ### Visibility Module (`visibility`)
//! Grid-based fog-of-war index answering which players can see which
//! cells, with per-player filtered unit views and target-claim checks.
//!
//! ### Economy Module (`economy`)
//! Per-player resource ledgers with atomic deductions, plus the FIFO
//! tech research pipeline.
//!
//! ### Integrity Module (`integrity`)
//! Rolling state-snapshot history, cheat heuristics, suspicion counting
//! and session bans.
//!
//! ### Authority Module (`authority`)
//! The command pipeline tying the above together: ban check, heuristics,
//! visibility claim, game rules, cost, then mutation — all-or-nothing.
//!
//! ### Network Module (`network`)
//! UDP socket management, packet routing and the main server loop.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Server;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new(
//!         "127.0.0.1:8080",
//!         Duration::from_millis(100), // 10Hz tick
//!     ).await?;
//!
//!     // Runs the main loop: admits connections, gates and routes
//!     // messages, advances the simulation and broadcasts per-player
//!     // state updates until shutdown.
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod authority;
pub mod economy;
pub mod gate;
pub mod integrity;
pub mod network;
pub mod visibility;
