//! # Room Client Library
//!
//! Headless client for the multiplayer platformer. It joins or creates a
//! room, follows the countdown and then mirrors the server's simulation
//! while submitting one input byte per round trip.
//!
//! ## Architecture Overview
//!
//! ### Server Authority
//! The client never simulates. Every frame pushed by the server overwrites
//! the local player state, and block changes arrive as an edit list that
//! is replayed onto the mirror in order.
//!
//! ### Handshake
//! Requests made before the server echoes `WELCOME` are held back and sent
//! together once the echo arrives.
//!
//! ### Input
//! Input comes from the capture automata or from a recording, and can be
//! recorded again as it is sent. Submissions are paced against a round-trip
//! budget.
//!
//! ## Module Organization
//!
//! - `game`: the frame mirror
//! - `session`: request encoding and reply decoding
//! - `input`: live capture, replay, recording and pacing
//! - `network`: the connection and phase loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::{Client, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig {
//!         max_frames: Some(600),
//!         ..ClientConfig::default()
//!     };
//!     let summary = Client::new(config)?.run().await?;
//!     println!("{} frames, finished: {}", summary.frames, summary.finished);
//!     Ok(())
//! }
//! ```

pub mod game;
pub mod input;
pub mod network;
pub mod session;
