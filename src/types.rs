//! Core types for the game state document.

use chrono::{DateTime, Duration, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Number of players in a freshly initialized document.
pub const DEFAULT_ROSTER_SIZE: u32 = 10;

/// Title of a freshly initialized document.
pub const DEFAULT_GAME_TITLE: &str = "1z10";

/// Health assigned on creation and on reset.
pub const FULL_HEALTH: i64 = 100;

/// Highest value returned by [`health_step`].
pub const MAX_HEALTH_STEP: u8 = 3;

/// UTC instant with millisecond precision, serialized as ISO-8601
/// (`2024-05-01T12:00:00.000Z`).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        Timestamp(Utc::now().trunc_subsecs(3))
    }

    /// Current time, or one millisecond past `prev` if the clock has not moved beyond it.
    pub fn now_after(prev: Option<Timestamp>) -> Self {
        let now = Self::now();
        match prev {
            Some(prev) if now <= prev => Timestamp(prev.0 + Duration::milliseconds(1)),
            _ => now,
        }
    }

    /// Parse an RFC 3339 / ISO-8601 string.
    pub fn parse(s: &str) -> Result<Self, chrono::ParseError> {
        let parsed = DateTime::parse_from_rfc3339(s)?;
        Ok(Timestamp(parsed.with_timezone(&Utc).trunc_subsecs(3)))
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    pub fn to_iso8601(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Timestamp(dt.trunc_subsecs(3))
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.to_iso8601())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_iso8601())
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_iso8601())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Timestamp::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// A single contestant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    /// Positive, unique within a document, never reassigned.
    pub id: u32,
    pub name: String,
    pub points: i64,
    /// Nominally 0..=100. Not validated.
    pub health: i64,
    /// `false` once eliminated.
    pub is_active: bool,
}

impl Player {
    /// A player with default numeric fields.
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            points: 0,
            health: FULL_HEALTH,
            is_active: true,
        }
    }

    /// Merge the fields present in `update`, leaving the rest untouched.
    pub fn apply(&mut self, update: &PlayerUpdate) {
        if let Some(ref name) = update.name {
            self.name = name.clone();
        }
        if let Some(points) = update.points {
            self.points = points;
        }
        if let Some(health) = update.health {
            self.health = health;
        }
        if let Some(is_active) = update.is_active {
            self.is_active = is_active;
        }
    }

    /// Restore points, health and active flag. Identity is kept.
    pub fn reset(&mut self) {
        self.points = 0;
        self.health = FULL_HEALTH;
        self.is_active = true;
    }

    /// Coarse 0..=3 health indicator.
    pub fn health_step(&self) -> u8 {
        health_step(self.health)
    }
}

/// Partial player update. Absent fields are left unchanged; the id cannot be changed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayerUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub points: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

impl PlayerUpdate {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn points(mut self, points: i64) -> Self {
        self.points = Some(points);
        self
    }

    pub fn health(mut self, health: i64) -> Self {
        self.health = Some(health);
        self
    }

    pub fn active(mut self, is_active: bool) -> Self {
        self.is_active = Some(is_active);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.points.is_none() && self.health.is_none() && self.is_active.is_none()
    }
}

/// The shared document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    /// Display order.
    pub players: Vec<Player>,
    /// Stamped by the store on every save.
    pub last_updated: Timestamp,
    pub game_title: String,
}

impl GameState {
    /// The document created when nothing has been persisted yet.
    pub fn initial() -> Self {
        Self {
            players: (1..=DEFAULT_ROSTER_SIZE)
                .map(|i| Player::new(i, format!("Player {}", i)))
                .collect(),
            last_updated: Timestamp::now(),
            game_title: DEFAULT_GAME_TITLE.to_string(),
        }
    }

    pub fn player(&self, id: u32) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn player_mut(&mut self, id: u32) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.id == id)
    }

    /// Returns the first id that appears more than once, if any.
    pub fn duplicate_id(&self) -> Option<u32> {
        let mut seen = std::collections::HashSet::with_capacity(self.players.len());
        self.players.iter().map(|p| p.id).find(|id| !seen.insert(*id))
    }

    pub fn active_players(&self) -> impl Iterator<Item = &Player> {
        self.players.iter().filter(|p| p.is_active)
    }
}

/// Map a health value to the 0..=3 step shown to viewers: `round(health / 100 * 3)`, clamped.
pub fn health_step(health: i64) -> u8 {
    let step = (health as f64 / FULL_HEALTH as f64 * MAX_HEALTH_STEP as f64).round();
    step.clamp(0.0, MAX_HEALTH_STEP as f64) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_initial_document() {
        let state = GameState::initial();
        assert_eq!(state.players.len(), 10);
        assert_eq!(state.game_title, "1z10");
        assert_eq!(state.players[0].name, "Player 1");
        assert_eq!(state.players[9].id, 10);
        assert!(state.players.iter().all(|p| p.health == 100 && p.points == 0 && p.is_active));
        assert_eq!(state.duplicate_id(), None);
    }

    #[test]
    fn test_wire_field_names() {
        let state = GameState::initial();
        let value = serde_json::to_value(&state).unwrap();
        assert!(value.get("lastUpdated").is_some());
        assert_eq!(value["gameTitle"], "1z10");
        assert_eq!(value["players"][0]["isActive"], true);
    }

    #[test]
    fn test_timestamp_format() {
        let ts = Timestamp::parse("2024-05-01T12:00:00.123456Z").unwrap();
        assert_eq!(ts.to_iso8601(), "2024-05-01T12:00:00.123Z");
        assert_eq!(serde_json::to_value(ts).unwrap(), json!("2024-05-01T12:00:00.123Z"));
    }

    #[test]
    fn test_now_after_is_strictly_later() {
        let far_future = Timestamp::parse("2999-01-01T00:00:00.000Z").unwrap();
        let next = Timestamp::now_after(Some(far_future));
        assert_eq!(next.to_iso8601(), "2999-01-01T00:00:00.001Z");
        assert!(Timestamp::now_after(None) <= Timestamp::now());
    }

    #[test]
    fn test_partial_update_merges_present_fields() {
        let mut player = Player::new(3, "Player 3");
        let update: PlayerUpdate = serde_json::from_value(json!({ "points": 50 })).unwrap();
        player.apply(&update);
        assert_eq!(player, Player { points: 50, ..Player::new(3, "Player 3") });
    }

    #[test]
    fn test_health_step() {
        assert_eq!(health_step(0), 0);
        assert_eq!(health_step(16), 0);
        assert_eq!(health_step(17), 1);
        assert_eq!(health_step(50), 2);
        assert_eq!(health_step(66), 2);
        assert_eq!(health_step(67), 2);
        assert_eq!(health_step(84), 3);
        assert_eq!(health_step(100), 3);
        assert_eq!(health_step(250), 3);
        assert_eq!(health_step(-40), 0);
    }

    #[test]
    fn test_duplicate_id() {
        let mut state = GameState::initial();
        state.players.push(Player::new(4, "Impostor"));
        assert_eq!(state.duplicate_id(), Some(4));
    }
}
