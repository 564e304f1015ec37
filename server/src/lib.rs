//! # Room Server Library
//!
//! Authoritative server for the multiplayer platformer. It owns every room's
//! simulation, decides player indices and timing, and pushes one frame per
//! tick to each playing user.
//!
//! ## Architecture Design
//!
//! ### Single Event Loop
//! All server state (users, rooms, the stage cache) is owned by one task
//! that handles one [`network::ServerEvent`] at a time: a decoded message,
//! a connect or disconnect, a finished stage load, an expired stage or a
//! room tick. Nothing is shared between tasks, so no locking is needed.
//!
//! ### Connection Tasks
//! Each TCP connection gets a reader task that forwards framed payloads to
//! the loop and a writer task that drains the user's outbound queue. Sends
//! never block the loop.
//!
//! ### Timers
//! Room ticks and stage expiry are spawned timer tasks that post events
//! back into the loop. Their handles abort the task on cancel or drop.
//!
//! ## Module Organization
//!
//! - `config`: runtime settings
//! - `user`: connected users and their outbound queues
//! - `level_registry`: reference-counted stage cache and stage sources
//! - `lobby`: room membership, countdown and tick loop
//! - `session`: opcode dispatch for incoming messages
//! - `sync`: per-recipient frame encoding
//! - `state`: event handling on top of the registries
//! - `network`: accept loop, connection tasks and the event loop
//! - `timer`: cancellable timer handles
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::level_registry::FileStageSource;
//! use server::network::Server;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default();
//!     let source = Arc::new(FileStageSource::new(&config.stage_dir));
//!     let server = Server::bind(config, source).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod level_registry;
pub mod lobby;
pub mod network;
pub mod session;
pub mod state;
pub mod sync;
pub mod timer;
pub mod user;
