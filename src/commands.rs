//! Writer actions and their user-facing outcomes.
//!
//! Writers submit one of three actions as JSON, tagged by `actionType`:
//!
//! ```json
//! { "actionType": "updatePlayer", "playerId": 3, "points": 50 }
//! { "actionType": "resetAll" }
//! { "actionType": "updateGameTitle", "gameTitle": "Final" }
//! ```
//!
//! Access control happens before this layer.

use crate::error::StoreError;
use crate::store::StateStore;
use crate::types::PlayerUpdate;
use serde::{Deserialize, Serialize};

/// A writer action.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "actionType", rename_all = "camelCase")]
pub enum AdminCommand {
    UpdatePlayer {
        #[serde(rename = "playerId")]
        player_id: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        points: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        health: Option<i64>,
        #[serde(rename = "isActive", default, skip_serializing_if = "Option::is_none")]
        is_active: Option<bool>,
    },
    ResetAll,
    UpdateGameTitle {
        #[serde(rename = "gameTitle")]
        game_title: String,
    },
}

/// Broad category of an outcome, for mapping onto a response status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Applied,
    Invalid,
    NotFound,
    WriteFailed,
    Failed,
}

/// Result of an action as shown to the writer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip)]
    pub kind: Option<OutcomeKind>,
}

impl CommandOutcome {
    fn applied(message: &str) -> Self {
        Self {
            success: true,
            message: message.to_string(),
            kind: Some(OutcomeKind::Applied),
        }
    }

    fn failed(kind: OutcomeKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            kind: Some(kind),
        }
    }

    /// Message for `invalid` actions.
    pub fn invalid() -> Self {
        Self::failed(OutcomeKind::Invalid, "Invalid action")
    }

    pub fn from_error(err: &StoreError) -> Self {
        match err {
            StoreError::PlayerNotFound(_) => Self::failed(OutcomeKind::NotFound, err.to_string()),
            e if e.is_write_failure() => {
                Self::failed(OutcomeKind::WriteFailed, "Failed to save game state")
            }
            _ => Self::failed(OutcomeKind::Failed, "An error occurred"),
        }
    }
}

impl AdminCommand {
    /// Decode an action from JSON.
    pub fn parse(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Apply the action through the store.
    pub fn apply(&self, store: &StateStore) -> CommandOutcome {
        let result = match self {
            AdminCommand::UpdatePlayer {
                player_id,
                name,
                points,
                health,
                is_active,
            } => {
                let update = PlayerUpdate {
                    name: name.clone(),
                    points: *points,
                    health: *health,
                    is_active: *is_active,
                };
                store
                    .update_player(*player_id, &update)
                    .map(|_| "Player updated successfully")
            }
            AdminCommand::ResetAll => store
                .reset_all_players()
                .map(|_| "All players reset successfully"),
            AdminCommand::UpdateGameTitle { game_title } => store
                .update_game_title(game_title.clone())
                .map(|_| "Game title updated successfully"),
        };

        match result {
            Ok(message) => CommandOutcome::applied(message),
            Err(e) => {
                tracing::warn!(command = ?self, error = %e, "admin command failed");
                CommandOutcome::from_error(&e)
            }
        }
    }
}

/// Decode and apply a JSON action.
pub fn execute(store: &StateStore, json: &str) -> CommandOutcome {
    match AdminCommand::parse(json) {
        Ok(command) => command.apply(store),
        Err(e) => {
            tracing::debug!(error = %e, "rejecting malformed admin command");
            CommandOutcome::invalid()
        }
    }
}
