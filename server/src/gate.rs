//! Inbound message validation: schema, replay protection, freshness and
//! per-client rate limiting.
//!
//! The gate sits in front of all game logic. It keeps per-client bookkeeping
//! only and never touches simulation state, so a rejected message has no
//! effect beyond the error returned to the sender.

use log::{debug, info};
use shared::{Envelope, PlayerId, MESSAGE_WINDOW_MS, TIMESTAMP_TOLERANCE_MS};
use std::collections::HashMap;
use thiserror::Error;

/// Reasons the gate drops a message before it reaches game logic.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum GateError {
    #[error("invalid connection token")]
    InvalidToken,
    #[error("invalid message format")]
    Malformed,
    #[error("unknown client")]
    UnknownClient,
    #[error("invalid message sequence")]
    Replayed,
    #[error("invalid message timestamp")]
    Stale,
    #[error("rate limit exceeded")]
    RateLimited,
}

/// Per-client tracking state, purged on disconnect.
#[derive(Debug)]
struct ClientRecord {
    last_sequence: u64,
    last_accepted_ms: Option<u64>,
    connected_at_ms: u64,
}

/// Validates every inbound message before it reaches the state authority.
#[derive(Debug, Default)]
pub struct MessageGate {
    clients: HashMap<PlayerId, ClientRecord>,
}

impl MessageGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection and hands out the client id used on every
    /// subsequent message. The token is opaque here; cryptographic
    /// verification belongs to the transport layer.
    pub fn handle_connect(&mut self, token: &str, now_ms: u64) -> Result<PlayerId, GateError> {
        if token.trim().is_empty() {
            return Err(GateError::InvalidToken);
        }

        let client_id = format!("{}-{}", token, now_ms);
        self.clients.insert(
            client_id.clone(),
            ClientRecord {
                last_sequence: 0,
                last_accepted_ms: None,
                connected_at_ms: now_ms,
            },
        );

        info!("Client {} connected", client_id);
        Ok(client_id)
    }

    /// Purges all tracking state for a client so long-running sessions do
    /// not accumulate stale records.
    pub fn handle_disconnect(&mut self, client_id: &str) {
        if self.clients.remove(client_id).is_some() {
            info!("Client {} disconnected", client_id);
        }
    }

    pub fn is_connected(&self, client_id: &str) -> bool {
        self.clients.contains_key(client_id)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Checks a message against all gate rules in order: schema, sequence,
    /// timestamp freshness, rate limit. Tracking state advances only when
    /// every rule passes, so a rejected message cannot burn a sequence
    /// number or reset the rate window.
    pub fn validate(&mut self, message: &Envelope, now_ms: u64) -> Result<(), GateError> {
        if message.client_id.is_empty() || message.signature.is_empty() {
            return Err(GateError::Malformed);
        }

        let record = self
            .clients
            .get_mut(&message.client_id)
            .ok_or(GateError::UnknownClient)?;

        if message.sequence <= record.last_sequence {
            debug!(
                "Replayed sequence {} from {} (last accepted {})",
                message.sequence, message.client_id, record.last_sequence
            );
            return Err(GateError::Replayed);
        }

        if now_ms.abs_diff(message.timestamp) > TIMESTAMP_TOLERANCE_MS {
            return Err(GateError::Stale);
        }

        if let Some(last_accepted) = record.last_accepted_ms {
            if now_ms.saturating_sub(last_accepted) < MESSAGE_WINDOW_MS {
                return Err(GateError::RateLimited);
            }
        }

        record.last_sequence = message.sequence;
        record.last_accepted_ms = Some(now_ms);
        Ok(())
    }

    /// Milliseconds a client has been connected, for diagnostics.
    pub fn connection_age_ms(&self, client_id: &str, now_ms: u64) -> Option<u64> {
        self.clients
            .get(client_id)
            .map(|record| now_ms.saturating_sub(record.connected_at_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::MessagePayload;

    fn envelope(client_id: &str, sequence: u64, timestamp: u64) -> Envelope {
        Envelope {
            payload: MessagePayload::Chat("hello".to_string()),
            timestamp,
            signature: "sig".to_string(),
            client_id: client_id.to_string(),
            sequence,
        }
    }

    #[test]
    fn test_connect_assigns_client_id() {
        let mut gate = MessageGate::new();
        let id = gate.handle_connect("alpha", 5000).unwrap();
        assert_eq!(id, "alpha-5000");
        assert!(gate.is_connected(&id));
        assert_eq!(gate.client_count(), 1);
    }

    #[test]
    fn test_connect_rejects_empty_token() {
        let mut gate = MessageGate::new();
        assert_eq!(gate.handle_connect("", 5000), Err(GateError::InvalidToken));
        assert_eq!(gate.handle_connect("   ", 5000), Err(GateError::InvalidToken));
    }

    #[test]
    fn test_accepts_increasing_sequences() {
        let mut gate = MessageGate::new();
        let id = gate.handle_connect("alpha", 0).unwrap();

        let mut now = 10_000;
        for sequence in [1, 2, 3] {
            assert!(gate.validate(&envelope(&id, sequence, now), now).is_ok());
            now += MESSAGE_WINDOW_MS;
        }
    }

    #[test]
    fn test_rejects_replayed_sequence() {
        let mut gate = MessageGate::new();
        let id = gate.handle_connect("alpha", 0).unwrap();

        assert!(gate.validate(&envelope(&id, 5, 10_000), 10_000).is_ok());

        let now = 10_000 + MESSAGE_WINDOW_MS;
        assert_eq!(
            gate.validate(&envelope(&id, 5, now), now),
            Err(GateError::Replayed)
        );
        assert_eq!(
            gate.validate(&envelope(&id, 3, now), now),
            Err(GateError::Replayed)
        );
    }

    #[test]
    fn test_rejects_stale_timestamp() {
        let mut gate = MessageGate::new();
        let id = gate.handle_connect("alpha", 0).unwrap();

        let now = 100_000;
        let old = now - TIMESTAMP_TOLERANCE_MS - 1;
        assert_eq!(
            gate.validate(&envelope(&id, 1, old), now),
            Err(GateError::Stale)
        );

        // Clock skew in the future direction is rejected too.
        let future = now + TIMESTAMP_TOLERANCE_MS + 1;
        assert_eq!(
            gate.validate(&envelope(&id, 1, future), now),
            Err(GateError::Stale)
        );

        // Inside the tolerance window is fine.
        assert!(gate
            .validate(&envelope(&id, 1, now - TIMESTAMP_TOLERANCE_MS), now)
            .is_ok());
    }

    #[test]
    fn test_rate_limit_single_slot_window() {
        let mut gate = MessageGate::new();
        let id = gate.handle_connect("alpha", 0).unwrap();

        assert!(gate.validate(&envelope(&id, 1, 10_000), 10_000).is_ok());

        // Second message inside the window is rejected.
        let inside = 10_000 + MESSAGE_WINDOW_MS - 1;
        assert_eq!(
            gate.validate(&envelope(&id, 2, inside), inside),
            Err(GateError::RateLimited)
        );

        // The rejection did not consume sequence 2.
        let after = 10_000 + MESSAGE_WINDOW_MS;
        assert!(gate.validate(&envelope(&id, 2, after), after).is_ok());
    }

    #[test]
    fn test_rejects_unknown_client() {
        let mut gate = MessageGate::new();
        assert_eq!(
            gate.validate(&envelope("ghost", 1, 1000), 1000),
            Err(GateError::UnknownClient)
        );
    }

    #[test]
    fn test_rejects_missing_fields() {
        let mut gate = MessageGate::new();
        let id = gate.handle_connect("alpha", 0).unwrap();

        let mut unsigned = envelope(&id, 1, 1000);
        unsigned.signature = String::new();
        assert_eq!(gate.validate(&unsigned, 1000), Err(GateError::Malformed));
    }

    #[test]
    fn test_disconnect_purges_state() {
        let mut gate = MessageGate::new();
        let id = gate.handle_connect("alpha", 0).unwrap();
        assert!(gate.validate(&envelope(&id, 1, 1000), 1000).is_ok());

        gate.handle_disconnect(&id);
        assert!(!gate.is_connected(&id));
        assert_eq!(gate.client_count(), 0);
        assert_eq!(
            gate.validate(&envelope(&id, 2, 3000), 3000),
            Err(GateError::UnknownClient)
        );
    }

    #[test]
    fn test_connection_age() {
        let mut gate = MessageGate::new();
        let id = gate.handle_connect("alpha", 1000).unwrap();
        assert_eq!(gate.connection_age_ms(&id, 4000), Some(3000));
        assert_eq!(gate.connection_age_ms("ghost", 4000), None);
    }
}
