//! Player records and the registry that owns them.

use crate::protocol::{is_valid_nickname, RegistrationError};
use std::collections::HashMap;
use std::time::Instant;

/// A registered player. Holds no connection handle directly — only the
/// opaque `conn_id` that cross-references the client registry, breaking the
/// cyclic reference a direct handle would create.
#[derive(Debug, Clone)]
pub struct Player {
    pub nickname: String,
    pub position: i64,
    pub diff_points: i64,
    pub wa_streak: u32,
    pub is_ready: bool,
    pub is_disqualified: bool,
    pub pending_answer: Option<i64>,
    pub answer_time: Option<Instant>,
    pub conn_id: Option<u64>,
}

impl Player {
    fn new(nickname: String, conn_id: u64) -> Self {
        Self {
            nickname,
            position: 1,
            diff_points: 0,
            wa_streak: 0,
            is_ready: false,
            is_disqualified: false,
            pending_answer: None,
            answer_time: None,
            conn_id: Some(conn_id),
        }
    }
}

/// Holds every player in the lobby, keyed by nickname, plus their
/// registration order (needed so `pack_*` and round scoring iterate in the
/// order players joined, matching an insertion-ordered map).
pub struct PlayerRegistry {
    max_players: usize,
    players: HashMap<String, Player>,
    order: Vec<String>,
}

impl PlayerRegistry {
    pub fn new(max_players: usize) -> Self {
        Self {
            max_players,
            players: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn get(&self, nickname: &str) -> Option<&Player> {
        self.players.get(nickname)
    }

    pub fn get_mut(&mut self, nickname: &str) -> Option<&mut Player> {
        self.players.get_mut(nickname)
    }

    pub fn register(&mut self, nickname: &str, conn_id: u64) -> Result<&Player, RegistrationError> {
        if self.players.len() >= self.max_players {
            return Err(RegistrationError::LobbyFull);
        }
        if !is_valid_nickname(nickname) {
            return Err(RegistrationError::InvalidNickname);
        }
        if self.players.contains_key(nickname) {
            return Err(RegistrationError::DuplicateNickname);
        }

        let player = Player::new(nickname.to_string(), conn_id);
        self.order.push(nickname.to_string());
        self.players.insert(nickname.to_string(), player);
        Ok(self.players.get(nickname).expect("just inserted"))
    }

    pub fn remove(&mut self, nickname: &str) {
        self.players.remove(nickname);
        self.order.retain(|n| n != nickname);
    }

    pub fn set_ready(&mut self, nickname: &str, ready: bool) {
        if let Some(player) = self.players.get_mut(nickname) {
            player.is_ready = ready;
        }
    }

    pub fn record_answer(&mut self, nickname: &str, value: i64, timestamp: Instant) {
        if let Some(player) = self.players.get_mut(nickname) {
            player.pending_answer = Some(value);
            player.answer_time = Some(timestamp);
        }
    }

    /// Clears per-round state for every qualified player ahead of a new round.
    pub fn reset_round(&mut self) {
        for nickname in &self.order {
            if let Some(player) = self.players.get_mut(nickname) {
                if !player.is_disqualified {
                    player.pending_answer = None;
                    player.answer_time = None;
                    player.diff_points = 0;
                }
            }
        }
    }

    /// Applies a position delta, clamping the floor at 1, and adds the
    /// resulting change onto `diff_points`. A round can apply more than one
    /// delta to the same player (a correctness delta, then a fastest bonus);
    /// `diff_points` tracks their combined effect since `reset_round` last
    /// zeroed it, not just the most recent call.
    pub fn apply_delta(&mut self, nickname: &str, delta: i64) {
        if let Some(player) = self.players.get_mut(nickname) {
            let previous = player.position;
            player.position = (player.position + delta).max(1);
            player.diff_points += player.position - previous;
        }
    }

    /// Marks a single player disqualified immediately (used for mid-match
    /// disconnects) and clears its connection cross-reference.
    pub fn disqualify(&mut self, nickname: &str) {
        if let Some(player) = self.players.get_mut(nickname) {
            player.is_disqualified = true;
            player.conn_id = None;
        }
    }

    /// Disqualifies every qualified player with a 3+ wrong-answer streak,
    /// returning the ones just disqualified.
    pub fn disqualify_streakers(&mut self) -> Vec<Player> {
        let mut disqualified = Vec::new();
        for nickname in &self.order {
            if let Some(player) = self.players.get_mut(nickname) {
                if !player.is_disqualified && player.wa_streak >= 3 {
                    player.is_disqualified = true;
                    disqualified.push(player.clone());
                }
            }
        }
        disqualified
    }

    pub fn can_start(&self) -> bool {
        let count = self.players.len();
        (2..=self.max_players).contains(&count) && self.players.values().all(|p| p.is_ready)
    }

    /// Players in registration order.
    pub fn all(&self) -> Vec<&Player> {
        self.order
            .iter()
            .filter_map(|nickname| self.players.get(nickname))
            .collect()
    }

    /// Not-disqualified players, in registration order.
    pub fn qualified(&self) -> Vec<&Player> {
        self.all().into_iter().filter(|p| !p.is_disqualified).collect()
    }

    pub fn pack_lobby_info(&self) -> String {
        self.all()
            .iter()
            .map(|p| format!("{},{}", p.nickname, p.is_ready))
            .collect::<Vec<_>>()
            .join(";")
    }

    pub fn pack_round_info(&self) -> String {
        self.all()
            .iter()
            .map(|p| format!("{},{},{}", p.nickname, p.diff_points, p.position))
            .collect::<Vec<_>>()
            .join(";")
    }
}
