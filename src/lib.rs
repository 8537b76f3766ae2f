//! # Math Race Server
//!
//! Authoritative server for a text-protocol, turn-based math racing game.
//! Any number of players register a nickname, ready up in a shared lobby,
//! and race each other to answer arithmetic questions correctly and fastest
//! across a fixed number of rounds.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative State
//! The server is the single source of truth for the lobby roster, each
//! player's position and streak, and the currently active question. Clients
//! only ever see what the server chooses to broadcast.
//!
//! ### Connection Lifecycle
//! Each accepted TCP connection is handled independently until it
//! registers, at which point it is cross-referenced to a `Player` by an
//! opaque connection id. Disconnects are detected from the read side and
//! reported back to the controller, which removes or disqualifies the
//! bound player as appropriate.
//!
//! ### Round Loop
//! Once enough players are ready, a single background task drives the match
//! round by round: a prepare window, a question broadcast, a fixed answer
//! window, scoring, and either another round or a game-over broadcast that
//! resets the lobby.
//!
//! ## Module Organization
//!
//! ### `question`
//! Arithmetic question generation and answer checking. Pure aside from its
//! RNG; deterministic when seeded, which is what the test suite uses.
//!
//! ### `protocol`
//! Wire frame parsing (`parse_line`) and the typed error taxonomy
//! (`RegistrationError`, `WrongStateError`, `ArgumentError`) that command
//! handlers report back to clients as `<COMMAND>_FAILURE;<reason>` replies.
//!
//! ### `player`
//! `Player` records and the `PlayerRegistry` that owns them in registration
//! order, including the scoring and disqualification rules.
//!
//! ### `clients`
//! `ClientRegistry`: tracks attached sockets, which nickname (if any) each
//! is bound to, and a bounded outbox per connection for backpressure.
//!
//! ### `game`
//! `GameController`: the state machine and round loop tying the above
//! together behind a single `tokio::sync::Mutex`.
//!
//! ### `connection`
//! The per-connection task: reads newline-delimited frames, dispatches them
//! to the controller, and drains the connection's outbox back to the socket.
//!
//! ## Concurrency Model
//!
//! All mutable state lives behind one `tokio::sync::Mutex` inside
//! `GameController`. The lock is only ever held across synchronous code —
//! never across an `.await` on socket I/O or a timer — so the round loop's
//! `sleep` calls and each connection's blocking reads never contend with
//! each other beyond the brief critical sections that touch shared state.

pub mod clients;
pub mod connection;
pub mod game;
pub mod player;
pub mod protocol;
pub mod question;
