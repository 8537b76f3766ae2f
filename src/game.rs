//! The game controller: state machine, command handlers, and the round loop.
//!
//! Single-writer discipline is enforced by one `tokio::sync::Mutex` guarding
//! all mutable state. The lock is never held across an `.await` on socket
//! I/O or a timer; every broadcast/unicast here is a non-blocking channel
//! `try_send`, so holding the lock across one is cheap and safe.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio::time::sleep;

use crate::clients::{ClientRegistry, Outbox, OUTBOX_CAPACITY};
use crate::player::{Player, PlayerRegistry};
use crate::protocol::{CommandError, RegistrationError, WrongStateError};
use crate::question::{Question, QuestionGenerator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundState {
    Lobby,
    Processing,
    WaitingForAnswers,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub max_players: usize,
    pub race_length: i64,
    pub answer_time_limit: Duration,
    pub prepare_time_limit: Duration,
    pub operand_range: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_players: 10,
            race_length: 10,
            answer_time_limit: Duration::from_secs(30),
            prepare_time_limit: Duration::from_secs(10),
            operand_range: crate::question::DEFAULT_OPERAND_RANGE,
        }
    }
}

struct ControllerState {
    state: RoundState,
    round_index: u32,
    players: PlayerRegistry,
    clients: ClientRegistry,
    question_gen: QuestionGenerator,
}

/// Owns the whole lobby: exactly one instance exists per process, shared as
/// an `Arc` between the listener, every connection handler, and the round
/// loop task it spawns.
pub struct GameController {
    config: Config,
    inner: Mutex<ControllerState>,
}

impl GameController {
    pub fn new(config: Config) -> Self {
        let players = PlayerRegistry::new(config.max_players);
        let question_gen = QuestionGenerator::new(config.operand_range);
        Self {
            inner: Mutex::new(ControllerState {
                state: RoundState::Lobby,
                round_index: 0,
                players,
                clients: ClientRegistry::new(),
                question_gen,
            }),
            config,
        }
    }

    /// A controller whose question generator is seeded deterministically,
    /// so tests can predict the exact question (and therefore the correct
    /// answer) each round produces.
    #[cfg(test)]
    fn with_seed(config: Config, seed: u64) -> Self {
        let players = PlayerRegistry::new(config.max_players);
        let question_gen = QuestionGenerator::with_seed(seed, config.operand_range);
        Self {
            inner: Mutex::new(ControllerState {
                state: RoundState::Lobby,
                round_index: 0,
                players,
                clients: ClientRegistry::new(),
                question_gen,
            }),
            config,
        }
    }

    /// Registers a freshly accepted socket with the client registry,
    /// returning its connection id and the receive half of its outbox.
    pub async fn attach(&self) -> (u64, mpsc::Receiver<String>) {
        let (tx, rx): (Outbox, _) = mpsc::channel(OUTBOX_CAPACITY);
        let mut state = self.inner.lock().await;
        let conn_id = state.clients.attach(tx);
        (conn_id, rx)
    }

    /// Tears down a connection: unbinds it from the client registry and, if
    /// it had registered a player, removes (LOBBY) or disqualifies
    /// (in-match) that player and announces `PLAYER_LEFT`.
    pub async fn detach(&self, conn_id: u64) {
        let mut state = self.inner.lock().await;
        let Some(nickname) = state.clients.detach(conn_id) else {
            return;
        };

        match state.state {
            RoundState::Lobby => state.players.remove(&nickname),
            _ => state.players.disqualify(&nickname),
        }

        let except: HashSet<&str> = [nickname.as_str()].into_iter().collect();
        state.clients.broadcast(&format!("PLAYER_LEFT;{nickname}"), &except);
        info!("{nickname} disconnected");
    }

    pub async fn handle_register(&self, conn_id: u64, nickname: &str) -> Result<(), CommandError> {
        let mut state = self.inner.lock().await;

        if state.clients.is_bound(conn_id) {
            return Err(RegistrationError::AlreadyRegistered.into());
        }
        if state.state != RoundState::Lobby {
            return Err(WrongStateError::CannotRegister.into());
        }

        state.players.register(nickname, conn_id)?;
        state.clients.bind(conn_id, nickname);

        let lobby_info = state.players.pack_lobby_info();
        state
            .clients
            .unicast(conn_id, &format!("REGISTRATION_SUCCESS;{lobby_info}"));

        let except: HashSet<&str> = [nickname].into_iter().collect();
        state.clients.broadcast(&format!("PLAYER_JOINED;{nickname}"), &except);
        info!("{nickname} registered");
        Ok(())
    }

    /// Returns `Some(true)` if this READY started the match (so the caller
    /// can spawn the round loop), `Some(false)` otherwise.
    pub async fn handle_ready(&self, conn_id: u64) -> Result<bool, CommandError> {
        let mut state = self.inner.lock().await;
        if state.state != RoundState::Lobby {
            return Err(WrongStateError::CannotReady.into());
        }
        let nickname = state
            .clients
            .nickname_of(conn_id)
            .ok_or(WrongStateError::CannotReady)?;

        state.players.set_ready(&nickname, true);
        let except: HashSet<&str> = [nickname.as_str()].into_iter().collect();
        state.clients.broadcast(&format!("PLAYER_READY;{nickname}"), &except);

        if state.players.can_start() {
            state.state = RoundState::Processing;
            let msg = format!(
                "GAME_STARTING;{};{};{}",
                self.config.race_length,
                self.config.answer_time_limit.as_secs(),
                self.config.prepare_time_limit.as_secs()
            );
            state.clients.broadcast(&msg, &HashSet::new());
            info!("match starting");
            return Ok(true);
        }
        Ok(false)
    }

    pub async fn handle_unready(&self, conn_id: u64) -> Result<(), CommandError> {
        let mut state = self.inner.lock().await;
        if state.state != RoundState::Lobby {
            return Err(WrongStateError::CannotUnready.into());
        }
        let nickname = state
            .clients
            .nickname_of(conn_id)
            .ok_or(WrongStateError::CannotUnready)?;

        state.players.set_ready(&nickname, false);
        let except: HashSet<&str> = [nickname.as_str()].into_iter().collect();
        state.clients.broadcast(&format!("PLAYER_UNREADY;{nickname}"), &except);
        Ok(())
    }

    /// Sends a single line directly to one connection, bypassing the
    /// command handlers. Used by the connection task to deliver
    /// `<COMMAND>_FAILURE;<reason>` replies.
    pub async fn unicast(&self, conn_id: u64, message: &str) {
        let state = self.inner.lock().await;
        state.clients.unicast(conn_id, message);
    }

    pub async fn handle_answer(&self, conn_id: u64, value: i64) -> Result<(), CommandError> {
        let mut state = self.inner.lock().await;
        if state.state != RoundState::WaitingForAnswers {
            return Err(WrongStateError::NotAnswering.into());
        }
        let nickname = state
            .clients
            .nickname_of(conn_id)
            .ok_or(WrongStateError::NotAnswering)?;

        state.players.record_answer(&nickname, value, Instant::now());
        debug!("{nickname} answered {value}");
        Ok(())
    }

    /// Drives one match from first round to game over. Spawned as a
    /// background task the moment `handle_ready` reports the match started;
    /// exits on its own once the game-over broadcast goes out, so no
    /// external cancellation is needed.
    pub async fn run_round_loop(&self) {
        loop {
            let round_index = {
                let mut state = self.inner.lock().await;
                state.players.reset_round();
                state.round_index += 1;
                state.round_index
            };
            info!("round {round_index}: prepare");
            sleep(self.config.prepare_time_limit).await;

            let question = {
                let mut state = self.inner.lock().await;
                let question = state.question_gen.generate();
                let msg = format!("QUESTION;{round_index};{question}");
                state.clients.broadcast(&msg, &HashSet::new());
                state.state = RoundState::WaitingForAnswers;
                info!("round {round_index}: question {question} = {}", question.answer);
                question
            };
            sleep(self.config.answer_time_limit).await;

            let game_over = {
                let mut state = self.inner.lock().await;
                state.state = RoundState::Processing;
                self.score_round(&mut state, &question)
            };

            if game_over {
                break;
            }
        }
    }

    /// Scores every player's answer, applies the fastest bonus, disqualifies
    /// streakers, reports scores, and checks for game over. Returns whether
    /// the match just ended. Runs entirely under the caller's lock; no
    /// `.await` occurs inside, so holding the lock here is inexpensive.
    fn score_round(&self, state: &mut ControllerState, question: &Question) -> bool {
        let nicknames: Vec<String> = state.players.all().iter().map(|p| p.nickname.clone()).collect();
        let mut fastest: Option<(String, Instant)> = None;
        let mut fastest_bonus: i64 = 0;

        for nickname in &nicknames {
            let player = state.players.get(nickname).expect("just listed");
            let conn_id = player.conn_id;

            if player.is_disqualified {
                if let Some(id) = conn_id {
                    state.clients.unicast(id, &format!("ANSWER;{}", question.answer));
                }
                continue;
            }

            let correct = player
                .pending_answer
                .map(|submitted| state.question_gen.check(question, submitted))
                .unwrap_or(false);

            if correct {
                state.players.apply_delta(nickname, 1);
                state.players.get_mut(nickname).expect("just listed").wa_streak = 0;
                if let Some(id) = conn_id {
                    state.clients.unicast(id, &format!("ANSWER_CORRECT;{}", question.answer));
                }
                let answer_time = state.players.get(nickname).and_then(|p| p.answer_time);
                if let Some(t) = answer_time {
                    let is_fastest = fastest.as_ref().map(|(_, ft)| t < *ft).unwrap_or(true);
                    if is_fastest {
                        fastest = Some((nickname.clone(), t));
                    }
                }
            } else {
                state.players.apply_delta(nickname, -1);
                state.players.get_mut(nickname).expect("just listed").wa_streak += 1;
                fastest_bonus += 1;
                if let Some(id) = conn_id {
                    state.clients.unicast(id, &format!("ANSWER_INCORRECT;{}", question.answer));
                }
            }
        }

        if let Some((fastest_nick, _)) = &fastest {
            state.players.apply_delta(fastest_nick, fastest_bonus);
            info!("fastest player: {fastest_nick}, bonus {fastest_bonus}");
        }

        let disqualified = state.players.disqualify_streakers();
        if !disqualified.is_empty() {
            let names: Vec<&str> = disqualified.iter().map(|p| p.nickname.as_str()).collect();
            warn!("disqualified: {}", names.join(", "));
            state
                .clients
                .broadcast(&format!("DISQUALIFICATION;{}", names.join(";")), &HashSet::new());
        }

        let round_info = state.players.pack_round_info();
        let fastest_name = fastest.as_ref().map(|(n, _)| n.as_str()).unwrap_or("");
        state
            .clients
            .broadcast(&format!("SCORES;{fastest_name};{round_info}"), &HashSet::new());

        let qualified = state.players.qualified();
        let game_over = qualified.is_empty() || qualified.iter().any(|p| p.position >= self.config.race_length);

        if !game_over {
            return false;
        }

        let winner = Self::pick_winner(&qualified);
        let winner_name = winner.map(|p| p.nickname.as_str()).unwrap_or("");
        info!("game over, winner: {winner_name}");
        state.clients.broadcast(&format!("GAME_OVER;{winner_name}"), &HashSet::new());

        state.players = PlayerRegistry::new(self.config.max_players);
        state.question_gen = QuestionGenerator::new(self.config.operand_range);
        state.clients.unbind_all();
        state.state = RoundState::Lobby;
        state.round_index = 0;
        true
    }

    /// Highest position wins; ties go to whoever answered earliest this round.
    fn pick_winner<'a>(qualified: &[&'a Player]) -> Option<&'a Player> {
        qualified.iter().copied().fold(None, |best, candidate| match best {
            None => Some(candidate),
            Some(best) => {
                if candidate.position > best.position {
                    Some(candidate)
                } else if candidate.position == best.position {
                    match (candidate.answer_time, best.answer_time) {
                        (Some(ct), Some(bt)) if ct < bt => Some(candidate),
                        _ => Some(best),
                    }
                } else {
                    Some(best)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    fn test_config() -> Config {
        Config {
            max_players: 4,
            race_length: 3,
            answer_time_limit: Duration::from_millis(5),
            prepare_time_limit: Duration::from_millis(5),
            operand_range: 5,
        }
    }

    async fn register(controller: &GameController, nickname: &str) -> (u64, mpsc::Receiver<String>) {
        let (conn_id, rx) = controller.attach().await;
        controller.handle_register(conn_id, nickname).await.unwrap();
        (conn_id, rx)
    }

    /// Reads messages off an outbox until one starts with `prefix`, discarding
    /// everything before it. Lets a test wait for a specific broadcast without
    /// hardcoding every message ordinal that precedes it.
    async fn recv_until(rx: &mut mpsc::Receiver<String>, prefix: &str) -> String {
        loop {
            let msg = timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("timed out waiting for a message")
                .expect("outbox closed unexpectedly");
            if msg.starts_with(prefix) {
                return msg;
            }
        }
    }

    #[tokio::test]
    async fn register_then_ready_starts_match_at_two_players() {
        let controller = GameController::new(test_config());
        let (alice_id, _alice_rx) = register(&controller, "alice").await;
        let (bob_id, _bob_rx) = register(&controller, "bob").await;

        assert!(!controller.handle_ready(alice_id).await.unwrap());
        assert!(controller.handle_ready(bob_id).await.unwrap());
    }

    #[tokio::test]
    async fn answer_outside_waiting_state_is_rejected() {
        let controller = GameController::new(test_config());
        let (conn_id, _rx) = register(&controller, "alice").await;
        let err = controller.handle_answer(conn_id, 5).await.unwrap_err();
        assert_eq!(err, CommandError::WrongState(WrongStateError::NotAnswering));
    }

    #[tokio::test]
    async fn register_rejects_duplicate_and_already_registered() {
        let controller = GameController::new(test_config());
        let (conn_id, _rx) = register(&controller, "alice").await;

        let err = controller.handle_register(conn_id, "bob").await.unwrap_err();
        assert_eq!(err, CommandError::Registration(RegistrationError::AlreadyRegistered));

        let (other_conn, _rx2) = controller.attach().await;
        let err = controller.handle_register(other_conn, "alice").await.unwrap_err();
        assert_eq!(err, CommandError::Registration(RegistrationError::DuplicateNickname));
    }

    #[tokio::test]
    async fn disconnect_in_lobby_removes_player_and_frees_nickname() {
        let controller = GameController::new(test_config());
        let (conn_id, _rx) = register(&controller, "alice").await;
        controller.detach(conn_id).await;

        let (other_conn, _rx2) = controller.attach().await;
        controller.handle_register(other_conn, "alice").await.unwrap();
    }

    #[tokio::test]
    async fn full_match_runs_to_completion_and_resets_to_lobby() {
        let controller = GameController::new(test_config());
        let (alice_id, mut alice_rx) = register(&controller, "alice").await;
        let (bob_id, _bob_rx) = register(&controller, "bob").await;

        controller.handle_ready(alice_id).await.unwrap();
        let started = controller.handle_ready(bob_id).await.unwrap();
        assert!(started);

        controller.run_round_loop().await;

        let mut saw_game_over = false;
        while let Ok(msg) = alice_rx.try_recv() {
            if msg.starts_with("GAME_OVER") {
                saw_game_over = true;
            }
        }
        assert!(saw_game_over);

        // After reset, a fresh REGISTER on a brand new connection succeeds.
        let (new_conn, _rx) = controller.attach().await;
        controller.handle_register(new_conn, "alice").await.unwrap();
    }

    #[tokio::test]
    async fn correct_answer_scores_position_and_fastest_bonus() {
        let seed = 99;
        let mut config = test_config();
        config.race_length = 100;
        let expected = QuestionGenerator::with_seed(seed, config.operand_range).generate();

        let controller = Arc::new(GameController::with_seed(config, seed));
        let (alice_id, mut alice_rx) = register(&controller, "alice").await;
        let (bob_id, mut bob_rx) = register(&controller, "bob").await;
        controller.handle_ready(alice_id).await.unwrap();
        controller.handle_ready(bob_id).await.unwrap();

        let loop_ctrl = Arc::clone(&controller);
        let round_loop = tokio::spawn(async move { loop_ctrl.run_round_loop().await });

        recv_until(&mut alice_rx, "QUESTION").await;
        recv_until(&mut bob_rx, "QUESTION").await;

        // Alice answers correctly; bob answers wrong, so alice is also the
        // fastest (and only) correct answerer and collects the bonus.
        controller.handle_answer(alice_id, expected.answer).await.unwrap();
        controller.handle_answer(bob_id, expected.answer + 1000).await.unwrap();

        let alice_reply = recv_until(&mut alice_rx, "ANSWER_CORRECT").await;
        assert_eq!(alice_reply, format!("ANSWER_CORRECT;{}", expected.answer));
        let bob_reply = recv_until(&mut bob_rx, "ANSWER_INCORRECT").await;
        assert_eq!(bob_reply, format!("ANSWER_INCORRECT;{}", expected.answer));

        let scores = recv_until(&mut alice_rx, "SCORES").await;
        // alice: +1 correct, +1 fastest bonus (one wrong answerer) -> diff 2, position 3.
        // bob: -1 wrong, floored at 1 -> diff 0, position unchanged.
        assert_eq!(scores, "SCORES;alice;alice,2,3;bob,0,1");

        round_loop.abort();
    }

    #[tokio::test]
    async fn three_wrong_answers_in_a_row_trigger_disqualification() {
        let seed = 7;
        let mut config = test_config();
        config.race_length = 100;
        let mut shadow = QuestionGenerator::with_seed(seed, config.operand_range);

        let controller = Arc::new(GameController::with_seed(config, seed));
        let (alice_id, mut alice_rx) = register(&controller, "alice").await;
        let (bob_id, mut bob_rx) = register(&controller, "bob").await;
        controller.handle_ready(alice_id).await.unwrap();
        controller.handle_ready(bob_id).await.unwrap();

        let loop_ctrl = Arc::clone(&controller);
        let round_loop = tokio::spawn(async move { loop_ctrl.run_round_loop().await });

        for _ in 0..3 {
            let q = shadow.generate();
            recv_until(&mut alice_rx, "QUESTION").await;
            controller.handle_answer(alice_id, q.answer + 1000).await.unwrap();
            controller.handle_answer(bob_id, q.answer).await.unwrap();
            recv_until(&mut alice_rx, "ANSWER_INCORRECT").await;
        }

        let disqualification = recv_until(&mut bob_rx, "DISQUALIFICATION").await;
        assert_eq!(disqualification, "DISQUALIFICATION;alice");

        // Next round: alice is told the answer directly instead of being scored.
        let q4 = shadow.generate();
        recv_until(&mut alice_rx, "QUESTION").await;
        controller.handle_answer(bob_id, q4.answer).await.unwrap();
        let alice_told = recv_until(&mut alice_rx, "ANSWER;").await;
        assert_eq!(alice_told, format!("ANSWER;{}", q4.answer));

        round_loop.abort();
    }

    #[tokio::test]
    async fn mid_round_disconnect_disqualifies_without_removing_the_player() {
        let seed = 3;
        let mut config = test_config();
        config.race_length = 100;
        let q1 = QuestionGenerator::with_seed(seed, config.operand_range).generate();

        let controller = Arc::new(GameController::with_seed(config, seed));
        let (alice_id, _alice_rx) = register(&controller, "alice").await;
        let (bob_id, mut bob_rx) = register(&controller, "bob").await;
        controller.handle_ready(alice_id).await.unwrap();
        controller.handle_ready(bob_id).await.unwrap();

        let loop_ctrl = Arc::clone(&controller);
        let round_loop = tokio::spawn(async move { loop_ctrl.run_round_loop().await });

        recv_until(&mut bob_rx, "QUESTION").await;
        controller.handle_answer(bob_id, q1.answer).await.unwrap();
        controller.detach(alice_id).await;

        let left = recv_until(&mut bob_rx, "PLAYER_LEFT").await;
        assert_eq!(left, "PLAYER_LEFT;alice");

        // Alice is disqualified (skipped, no wrong-answer penalty) but stays
        // in the roster instead of being dropped from it.
        let scores = recv_until(&mut bob_rx, "SCORES").await;
        assert_eq!(scores, "SCORES;bob;alice,0,1;bob,1,2");

        round_loop.abort();
    }

    #[test]
    fn pick_winner_prefers_highest_position_then_earliest_answer() {
        let earlier = Instant::now();
        let later = earlier + Duration::from_millis(10);

        let make = |nickname: &str, position: i64, answer_time: Option<Instant>| Player {
            nickname: nickname.to_string(),
            position,
            diff_points: 0,
            wa_streak: 0,
            is_ready: true,
            is_disqualified: false,
            pending_answer: None,
            answer_time,
            conn_id: Some(1),
        };

        let alice = make("alice", 5, Some(later));
        let bob = make("bob", 5, Some(earlier));
        let carol = make("carol", 7, None);

        let outright = vec![&alice, &bob, &carol];
        assert_eq!(GameController::pick_winner(&outright).unwrap().nickname, "carol");

        let tied = vec![&alice, &bob];
        assert_eq!(GameController::pick_winner(&tied).unwrap().nickname, "bob");
    }
}
