//! Server network layer: TCP accept loop, per-connection tasks and the
//! event loop that owns all server state.

use crate::config::ServerConfig;
use crate::level_registry::StageSource;
use crate::state::ServerState;
use crate::user::{Outbox, UserId, UserIdGenerator};
use bytes::Bytes;
use log::{debug, error, info, warn};
use shared::framing::{read_frame, write_frame, FrameConfig, FrameError};
use shared::stage::{StageError, StageTemplate};
use shared::HashToken;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Everything the event loop reacts to.
#[derive(Debug)]
pub enum ServerEvent {
    Connected { user: UserId, outbox: Outbox },
    Message { user: UserId, payload: Vec<u8> },
    Disconnected { user: UserId },
    LevelLoaded {
        level: HashToken,
        result: Result<StageTemplate, StageError>,
    },
    LevelExpired { level: HashToken, generation: u64 },
    LobbyTick { lobby: HashToken },
}

pub type EventSender = mpsc::UnboundedSender<ServerEvent>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("stage error: {0}")]
    Stage(#[from] StageError),
}

/// Main server coordinating connections and room simulation
pub struct Server {
    listener: TcpListener,
    state: ServerState,
    frame_config: FrameConfig,
    ids: Arc<UserIdGenerator>,

    // Communication channels
    events_tx: EventSender,
    events_rx: mpsc::UnboundedReceiver<ServerEvent>,
}

impl Server {
    pub async fn bind(
        config: ServerConfig,
        source: Arc<dyn StageSource>,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let state = ServerState::new(&config, source, events_tx.clone())?;

        Ok(Server {
            listener,
            state,
            frame_config: config.frame,
            ids: Arc::new(UserIdGenerator::new()),
            events_tx,
            events_rx,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the accept loop and processes events until the loop's channel
    /// closes.
    pub async fn run(self) -> io::Result<()> {
        let Server {
            listener,
            mut state,
            frame_config,
            ids,
            events_tx,
            mut events_rx,
        } = self;

        let acceptor = tokio::spawn(Self::accept_loop(listener, events_tx, ids, frame_config));

        while let Some(event) = events_rx.recv().await {
            state.handle_event(event);
        }

        acceptor.abort();
        Ok(())
    }

    async fn accept_loop(
        listener: TcpListener,
        events: EventSender,
        ids: Arc<UserIdGenerator>,
        frame_config: FrameConfig,
    ) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let user = ids.next_id();
                    debug!("Accepted {} from {}", user, addr);
                    if let Err(e) = Self::spawn_connection(user, stream, &events, &frame_config) {
                        warn!("Failed to set up {}: {}", user, e);
                    }
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                }
            }
        }
    }

    fn spawn_connection(
        user: UserId,
        stream: TcpStream,
        events: &EventSender,
        frame_config: &FrameConfig,
    ) -> io::Result<()> {
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        let (outbox, outbox_rx) = mpsc::unbounded_channel();

        // Registered before the reader starts so no message can overtake it.
        if events.send(ServerEvent::Connected { user, outbox }).is_err() {
            return Ok(());
        }

        tokio::spawn(Self::read_loop(
            user,
            reader,
            events.clone(),
            frame_config.clone(),
        ));
        tokio::spawn(Self::write_loop(user, writer, outbox_rx, frame_config.clone()));
        Ok(())
    }

    /// Forwards each framed payload to the event loop, then reports the
    /// disconnect.
    async fn read_loop(
        user: UserId,
        mut reader: OwnedReadHalf,
        events: EventSender,
        frame_config: FrameConfig,
    ) {
        loop {
            match read_frame(&mut reader, &frame_config).await {
                Ok(payload) => {
                    if events.send(ServerEvent::Message { user, payload }).is_err() {
                        return;
                    }
                }
                Err(FrameError::ConnectionClosed) => break,
                Err(e) => {
                    warn!("Read error from {}: {}", user, e);
                    break;
                }
            }
        }
        let _ = events.send(ServerEvent::Disconnected { user });
    }

    /// Drains the user's outbox onto the socket until the outbox is dropped.
    async fn write_loop(
        user: UserId,
        mut writer: OwnedWriteHalf,
        mut outbox: mpsc::UnboundedReceiver<Bytes>,
        frame_config: FrameConfig,
    ) {
        while let Some(message) = outbox.recv().await {
            if let Err(e) = write_frame(&mut writer, &message, &frame_config).await {
                debug!("Write to {} failed: {}", user, e);
                break;
            }
        }
    }
}
