use crate::game::{ClientGameState, FrameStatus};
use crate::input::{InputManager, Pacer, DEFAULT_ROUND_TRIP_BUDGET};
use crate::session::{ClientEvent, ClientSession, Countdown, Request, SessionError};
use log::{debug, error, info, warn};
use shared::framing::{read_frame, write_frame, FrameConfig, FrameError};
use shared::record::{RecordError, Recording};
use shared::wire::WireError;
use shared::HashToken;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_addr: String,
    /// Stage to create a room on, or to check before joining.
    pub stage: String,
    /// Room token to join instead of creating one.
    pub room: Option<String>,
    /// Recording to play back as input. Idle input when unset.
    pub replay: Option<PathBuf>,
    /// Where to save the input actually sent.
    pub record: Option<PathBuf>,
    pub round_trip_budget: Duration,
    /// How long the admin waits for joiners before starting.
    pub start_delay: Duration,
    /// Interval for room and countdown polls.
    pub poll_interval: Duration,
    /// Send `RESTART` after a finished run instead of disconnecting.
    pub restart_on_finish: bool,
    /// Disconnect after this many frames.
    pub max_frames: Option<u64>,
    /// Ask the server to move the goal once this many frames have arrived.
    pub goal_reset_at: Option<u64>,
    pub frame: FrameConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:8080".to_string(),
            stage: "demo".to_string(),
            room: None,
            replay: None,
            record: None,
            round_trip_budget: DEFAULT_ROUND_TRIP_BUDGET,
            start_delay: Duration::from_secs(2),
            poll_interval: Duration::from_millis(100),
            restart_on_finish: false,
            max_frames: None,
            goal_reset_at: None,
            frame: FrameConfig::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("recording error: {0}")]
    Record(#[from] RecordError),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("server does not know stage {0}")]
    UnknownStage(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Waiting in a forming room.
    Lobby,
    Countdown,
    Playing,
    Done,
}

/// What a finished run looked like from this client.
#[derive(Debug)]
pub struct ClientSummary {
    pub room: Option<HashToken>,
    pub player_index: Option<usize>,
    pub frames: u64,
    pub finished: bool,
    pub game: ClientGameState,
}

pub struct Client {
    config: ClientConfig,
    session: ClientSession,
    input: InputManager,
    pacer: Pacer,

    phase: Phase,
    room: Option<HashToken>,
    admin: bool,
    player_index: Option<usize>,
    start_at: Option<Instant>,
    next_input: Option<Instant>,
    frames: u64,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let mut input = match &config.replay {
            Some(path) => {
                let recording = Recording::load(path)?;
                info!("Replaying {} words from {}", recording.len(), path.display());
                InputManager::replay(&recording)
            }
            None => InputManager::live(),
        };
        if config.record.is_some() {
            input = input.with_recorder();
        }

        Ok(Client {
            pacer: Pacer::new(config.round_trip_budget),
            config,
            session: ClientSession::new(),
            input,
            phase: Phase::Lobby,
            room: None,
            admin: false,
            player_index: None,
            start_at: None,
            next_input: None,
            frames: 0,
        })
    }

    pub async fn run(mut self) -> Result<ClientSummary, ClientError> {
        let stream = TcpStream::connect(&self.config.server_addr).await?;
        stream.set_nodelay(true)?;
        info!("Connected to {}", self.config.server_addr);
        let (mut reader, mut writer) = stream.into_split();

        // Inbound frames are read on their own task so the select loop below
        // never holds a half-read frame across a timer branch.
        let (inbound_tx, mut inbound) = mpsc::unbounded_channel();
        let read_config = self.config.frame.clone();
        let reader_task = tokio::spawn(async move {
            loop {
                match read_frame(&mut reader, &read_config).await {
                    Ok(payload) => {
                        if inbound_tx.send(payload).is_err() {
                            break;
                        }
                    }
                    Err(FrameError::ConnectionClosed) => break,
                    Err(e) => {
                        error!("Error receiving message: {}", e);
                        break;
                    }
                }
            }
        });

        let stage = HashToken::new(&self.config.stage)?;
        self.session.request(Request::AskStage(stage));
        match &self.config.room {
            Some(room) => self.session.request(Request::ChooseRoom(HashToken::new(room)?)),
            None => self.session.request(Request::CreateRoom(stage)),
        }
        self.flush(&mut writer).await?;

        let mut poll = interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            if self.phase == Phase::Done {
                break Ok(());
            }

            tokio::select! {
                message = inbound.recv() => {
                    let Some(payload) = message else {
                        info!("Server closed the connection");
                        break Ok(());
                    };
                    if let Err(e) = self.on_message(&payload) {
                        break Err(e);
                    }
                }

                _ = poll.tick() => self.on_poll(),

                _ = sleep_until(self.start_at.unwrap_or_else(Instant::now)), if self.start_at.is_some() => {
                    self.start_at = None;
                    if let Some(room) = self.room {
                        info!("Starting room {}", room);
                        self.session.request(Request::StartRoom(room));
                    }
                }

                _ = sleep_until(self.next_input.unwrap_or_else(Instant::now)), if self.next_input.is_some() => {
                    if let Err(e) = self.send_input() {
                        break Err(e);
                    }
                }
            }

            if let Err(e) = self.flush(&mut writer).await {
                break Err(e);
            }
        };

        reader_task.abort();
        self.save_recording()?;
        result?;

        Ok(ClientSummary {
            room: self.room,
            player_index: self.player_index,
            frames: self.frames,
            finished: self.session.game().is_finished(),
            game: self.session.game().clone(),
        })
    }

    async fn flush(&mut self, writer: &mut OwnedWriteHalf) -> Result<(), ClientError> {
        if let Some(message) = self.session.take_outgoing() {
            write_frame(writer, &message, &self.config.frame).await?;
        }
        Ok(())
    }

    fn on_message(&mut self, payload: &[u8]) -> Result<(), ClientError> {
        for event in self.session.handle_message(payload)? {
            self.on_event(event)?;
        }
        Ok(())
    }

    fn on_event(&mut self, event: ClientEvent) -> Result<(), ClientError> {
        match event {
            ClientEvent::Welcome => debug!("Server welcomed us"),
            ClientEvent::StageInfo(None) => {
                return Err(ClientError::UnknownStage(self.config.stage.clone()));
            }
            ClientEvent::StageInfo(Some(stage)) => debug!("Stage {} available", stage),
            ClientEvent::WaitRoom { room, admin } => {
                if self.room != Some(room) {
                    info!("Waiting in room {} (admin: {})", room, admin);
                }
                self.room = Some(room);
                if admin && !self.admin && self.phase == Phase::Lobby {
                    self.start_at = Some(Instant::now() + self.config.start_delay);
                }
                self.admin = admin;
            }
            ClientEvent::StartRoom { room, player_index } => {
                if self.player_index.is_none() {
                    info!("Room {} started, playing as {}", room, player_index);
                }
                self.room = Some(room);
                self.player_index = Some(player_index);
                self.start_at = None;
                if self.phase == Phase::Lobby {
                    self.phase = Phase::Countdown;
                }
            }
            ClientEvent::Countdown(Countdown::Remaining(left)) => {
                debug!("Countdown: {:?} left", left);
            }
            ClientEvent::Countdown(Countdown::Started { player_count }) => {
                if self.phase == Phase::Countdown {
                    info!("Running with {} players", player_count);
                    self.phase = Phase::Playing;
                    self.next_input = Some(Instant::now());
                }
            }
            ClientEvent::Frame(FrameStatus::Running { progress }) => {
                self.frames += 1;
                if self.phase == Phase::Countdown {
                    self.phase = Phase::Playing;
                }
                if self.next_input.is_none() {
                    let now = Instant::now();
                    self.next_input = Some(now + self.pacer.next_delay(now));
                }
                if progress % 60 == 0 {
                    debug!("Progress {}", progress);
                }
                if self.config.goal_reset_at == Some(self.frames) {
                    info!("Requesting a goal reset");
                    self.input.request_goal_reset();
                }
                if self.config.max_frames.is_some_and(|max| self.frames >= max) {
                    info!("Frame limit reached");
                    self.phase = Phase::Done;
                }
            }
            ClientEvent::Frame(FrameStatus::Finished) => {
                self.frames += 1;
                info!("Run finished after {} frames", self.frames);
                if self.config.restart_on_finish {
                    self.session.request(Request::Restart);
                } else {
                    self.phase = Phase::Done;
                }
            }
        }
        Ok(())
    }

    fn on_poll(&mut self) {
        match (self.phase, self.room) {
            (Phase::Lobby, Some(room)) if !self.admin => {
                self.session.request(Request::WaitRoom(room));
            }
            (Phase::Countdown, Some(_)) => self.session.request(Request::GetStartCountdown),
            _ => {}
        }
    }

    fn send_input(&mut self) -> Result<(), ClientError> {
        self.next_input = None;
        let was_done = self.input.replay_done();
        let mask = self.input.next_mask()?;
        if self.input.replay_done() && !was_done {
            warn!("Replay exhausted, sending idle input from now on");
        }
        self.session.request(Request::Play(mask));
        self.pacer.mark_sent(Instant::now());
        Ok(())
    }

    fn save_recording(&mut self) -> Result<(), ClientError> {
        let (Some(path), Some(recording)) = (&self.config.record, self.input.take_recording()) else {
            return Ok(());
        };
        recording.save(path)?;
        info!("Saved {} input words to {}", recording.len(), path.display());
        Ok(())
    }
}
