//! Rooms: membership, start countdown and the fixed-rate tick loop.

use crate::network::{EventSender, ServerEvent};
use crate::timer::TimerHandle;
use crate::user::UserId;
use log::{debug, info};
use rand::Rng;
use shared::stage::{Stage, StageTemplate};
use shared::HashToken;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Timing shared by every room on the server.
#[derive(Debug, Clone)]
pub struct LobbySettings {
    pub tick_period: Duration,
    pub countdown: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartState {
    /// Forming: accepts joiners, waits for the admin to start.
    NotStarted,
    /// Simulation reached its terminal state; waits for a restart.
    Stopped,
    Countdown { since: Instant },
    Running,
}

/// What one tick did to the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing to simulate yet (or any more).
    Idle,
    Advanced,
    /// The simulation just reached its terminal state; the loop is cancelled.
    Finished,
}

#[derive(Debug)]
pub struct Lobby {
    id: HashToken,
    level: HashToken,
    template: Arc<StageTemplate>,
    users: Vec<UserId>,
    admin: UserId,
    stage: Option<Stage>,
    state: StartState,
    tick_handle: Option<TimerHandle>,
    settings: LobbySettings,
    events: EventSender,
}

impl Lobby {
    pub fn new(
        id: HashToken,
        level: HashToken,
        template: Arc<StageTemplate>,
        admin: UserId,
        settings: LobbySettings,
        events: EventSender,
    ) -> Self {
        Self {
            id,
            level,
            template,
            users: vec![admin],
            admin,
            stage: None,
            state: StartState::NotStarted,
            tick_handle: None,
            settings,
            events,
        }
    }

    pub fn id(&self) -> HashToken {
        self.id
    }

    /// Hash of the level this room holds a reference to.
    pub fn level(&self) -> HashToken {
        self.level
    }

    pub fn admin(&self) -> UserId {
        self.admin
    }

    pub fn is_admin(&self, user: UserId) -> bool {
        self.admin == user
    }

    pub fn users(&self) -> &[UserId] {
        &self.users
    }

    pub fn state(&self) -> StartState {
        self.state
    }

    pub fn is_ticking(&self) -> bool {
        self.tick_handle.is_some()
    }

    pub fn stage(&self) -> Option<&Stage> {
        self.stage.as_ref()
    }

    pub fn stage_mut(&mut self) -> Option<&mut Stage> {
        self.stage.as_mut()
    }

    /// Adds a joiner. Only forming rooms accept new users.
    pub fn add_user(&mut self, user: UserId) -> bool {
        if self.state != StartState::NotStarted || self.users.contains(&user) {
            return false;
        }
        self.users.push(user);
        true
    }

    /// Removes a user, promoting the next one if the admin left. Returns the
    /// number of users still in the room; at zero the tick loop is stopped.
    pub fn remove_user(&mut self, user: UserId) -> usize {
        self.users.retain(|u| *u != user);
        if self.admin == user {
            if let Some(next) = self.users.first() {
                info!("Room {}: {} promoted to admin", self.id, next);
                self.admin = *next;
            }
        }
        if self.users.is_empty() {
            self.stop_ticking();
        }
        self.users.len()
    }

    /// Builds the simulation, hands out player indices in membership order
    /// and starts the countdown. Returns `None` if the room already started.
    pub fn start(&mut self, now: Instant) -> Option<Vec<(UserId, usize)>> {
        if self.state != StartState::NotStarted {
            return None;
        }

        self.stage = Some(Stage::generate(
            Arc::clone(&self.template),
            self.users.len(),
        ));
        self.state = StartState::Countdown { since: now };
        info!("Room {} starting with {} players", self.id, self.users.len());
        self.restart();

        Some(
            self.users
                .iter()
                .enumerate()
                .map(|(index, user)| (*user, index))
                .collect(),
        )
    }

    /// Resets the simulation and arms the tick loop. No-op while a loop is
    /// already active or before the room started. Returns true if armed.
    pub fn restart(&mut self) -> bool {
        if self.tick_handle.is_some() {
            return false;
        }
        let Some(stage) = self.stage.as_mut() else {
            return false;
        };

        stage.reset();
        if self.state == StartState::Stopped {
            self.state = StartState::Running;
        }

        let id = self.id;
        self.tick_handle = Some(TimerHandle::every(
            self.settings.tick_period,
            self.events.clone(),
            move || ServerEvent::LobbyTick { lobby: id },
        ));
        debug!("Room {} tick loop armed", self.id);
        true
    }

    /// Value for a countdown poll: milliseconds left while counting down,
    /// the negated player count once the countdown is over.
    pub fn countdown_value(&self, now: Instant) -> i32 {
        let player_count = self
            .stage
            .as_ref()
            .map_or(self.users.len(), Stage::player_count) as i32;

        match self.state {
            StartState::NotStarted => wire_millis(self.settings.countdown),
            StartState::Countdown { since } => {
                let elapsed = now.saturating_duration_since(since);
                match self.settings.countdown.checked_sub(elapsed) {
                    Some(left) if !left.is_zero() => wire_millis(left),
                    _ => -player_count,
                }
            }
            StartState::Running | StartState::Stopped => -player_count,
        }
    }

    /// Runs one tick: leaves the countdown once it elapsed, then steps the
    /// simulation. The loop cancels itself on the terminal state.
    pub fn advance(&mut self, now: Instant) -> TickOutcome {
        if let StartState::Countdown { since } = self.state {
            if now.saturating_duration_since(since) < self.settings.countdown {
                return TickOutcome::Idle;
            }
            info!("Room {} running", self.id);
            self.state = StartState::Running;
        }
        if self.state != StartState::Running {
            return TickOutcome::Idle;
        }
        let Some(stage) = self.stage.as_mut() else {
            return TickOutcome::Idle;
        };

        stage.step(self.settings.tick_period.as_secs_f32());
        if !stage.is_finished() {
            return TickOutcome::Advanced;
        }

        info!("Room {} finished after {} ticks", self.id, stage.tick());
        self.state = StartState::Stopped;
        self.stop_ticking();
        TickOutcome::Finished
    }

    fn stop_ticking(&mut self) {
        if let Some(handle) = self.tick_handle.take() {
            handle.cancel();
        }
    }
}

/// All rooms on the server, keyed by room token.
#[derive(Debug)]
pub struct LobbyRegistry {
    lobbies: HashMap<HashToken, Lobby>,
    settings: LobbySettings,
    events: EventSender,
}

impl LobbyRegistry {
    pub fn new(settings: LobbySettings, events: EventSender) -> Self {
        Self {
            lobbies: HashMap::new(),
            settings,
            events,
        }
    }

    /// Opens a room under a fresh random token with `admin` as its only
    /// member. The caller has already acquired `level` for it.
    pub fn create(
        &mut self,
        level: HashToken,
        template: Arc<StageTemplate>,
        admin: UserId,
    ) -> HashToken {
        let id = self.fresh_token();
        let lobby = Lobby::new(
            id,
            level,
            template,
            admin,
            self.settings.clone(),
            self.events.clone(),
        );
        info!("Room {} created by {} on stage {}", id, admin, level);
        self.lobbies.insert(id, lobby);
        id
    }

    fn fresh_token(&self) -> HashToken {
        let mut rng = rand::thread_rng();
        loop {
            let name = format!("room-{:016x}", rng.gen::<u64>());
            if let Ok(token) = HashToken::new(&name) {
                if !self.lobbies.contains_key(&token) {
                    return token;
                }
            }
        }
    }

    pub fn get(&self, id: &HashToken) -> Option<&Lobby> {
        self.lobbies.get(id)
    }

    pub fn get_mut(&mut self, id: &HashToken) -> Option<&mut Lobby> {
        self.lobbies.get_mut(id)
    }

    pub fn remove(&mut self, id: &HashToken) -> Option<Lobby> {
        let lobby = self.lobbies.remove(id)?;
        info!("Room {} destroyed", id);
        Some(lobby)
    }

    pub fn len(&self) -> usize {
        self.lobbies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lobbies.is_empty()
    }
}

/// Milliseconds as sent in a countdown reply, saturating at `i32::MAX` so
/// a long countdown never reads as a negative player count.
fn wire_millis(duration: Duration) -> i32 {
    i32::try_from(duration.as_millis()).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    const TICK: Duration = Duration::from_millis(10);
    const COUNTDOWN: Duration = Duration::from_millis(3000);

    fn registry() -> (LobbyRegistry, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let settings = LobbySettings {
            tick_period: TICK,
            countdown: COUNTDOWN,
        };
        (LobbyRegistry::new(settings, tx), rx)
    }

    fn open(registry: &mut LobbyRegistry) -> HashToken {
        let level = HashToken::new("hills").unwrap();
        registry.create(level, Arc::new(StageTemplate::demo("hills")), UserId(1))
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_assigns_indices_in_join_order() {
        let (mut registry, _rx) = registry();
        let id = open(&mut registry);
        let lobby = registry.get_mut(&id).unwrap();
        assert!(lobby.add_user(UserId(2)));
        assert!(lobby.add_user(UserId(3)));
        assert!(!lobby.add_user(UserId(3)));

        let assignments = lobby.start(Instant::now()).unwrap();
        assert_eq!(
            assignments,
            vec![(UserId(1), 0), (UserId(2), 1), (UserId(3), 2)]
        );
        assert_eq!(lobby.stage().unwrap().player_count(), 3);
        assert!(lobby.is_ticking());

        assert!(lobby.start(Instant::now()).is_none());
        assert!(!lobby.add_user(UserId(4)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_then_negative_player_count() {
        let (mut registry, _rx) = registry();
        let id = open(&mut registry);
        let lobby = registry.get_mut(&id).unwrap();
        lobby.add_user(UserId(2));
        assert_eq!(lobby.countdown_value(Instant::now()), 3000);

        let started = Instant::now();
        lobby.start(started);
        assert_eq!(
            lobby.countdown_value(started + Duration::from_millis(1200)),
            1800
        );
        assert_eq!(lobby.countdown_value(started + COUNTDOWN), -2);
        assert_eq!(
            lobby.countdown_value(started + COUNTDOWN + Duration::from_secs(5)),
            -2
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_countdown_saturates() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let countdown = Duration::from_secs(40 * 24 * 3600);
        let mut registry = LobbyRegistry::new(
            LobbySettings {
                tick_period: TICK,
                countdown,
            },
            tx,
        );
        let id = open(&mut registry);
        let lobby = registry.get_mut(&id).unwrap();
        assert_eq!(lobby.countdown_value(Instant::now()), i32::MAX);

        let started = Instant::now();
        lobby.start(started);
        assert_eq!(lobby.countdown_value(started + TICK), i32::MAX);
        assert_eq!(
            lobby.countdown_value(started + countdown - Duration::from_millis(5)),
            5
        );
        assert_eq!(lobby.countdown_value(started + countdown), -1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_advance_waits_for_countdown() {
        let (mut registry, _rx) = registry();
        let id = open(&mut registry);
        let lobby = registry.get_mut(&id).unwrap();
        let started = Instant::now();
        lobby.start(started);

        assert_eq!(lobby.advance(started + TICK), TickOutcome::Idle);
        assert_eq!(lobby.stage().unwrap().tick(), 0);

        assert_eq!(lobby.advance(started + COUNTDOWN), TickOutcome::Advanced);
        assert_eq!(lobby.state(), StartState::Running);
        assert_eq!(lobby.stage().unwrap().tick(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_loop_posts_events() {
        let (mut registry, mut rx) = registry();
        let id = open(&mut registry);
        registry.get_mut(&id).unwrap().start(Instant::now());

        tokio::time::sleep(TICK * 3 + TICK / 2).await;
        let mut ticks = 0;
        while let Ok(event) = rx.try_recv() {
            assert!(matches!(event, ServerEvent::LobbyTick { lobby } if lobby == id));
            ticks += 1;
        }
        assert_eq!(ticks, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_state_stops_loop_until_restart() {
        let (mut registry, _rx) = registry();
        let id = open(&mut registry);
        let lobby = registry.get_mut(&id).unwrap();
        let started = Instant::now();
        lobby.start(started);

        // Drop the player straight onto the goal.
        {
            let stage = lobby.stage_mut().unwrap();
            let goal = stage.template().goal;
            let player = stage.player_mut(0).unwrap();
            player.x = goal.x;
            player.y = goal.y;
        }
        assert_eq!(lobby.advance(started + COUNTDOWN), TickOutcome::Finished);
        assert_eq!(lobby.state(), StartState::Stopped);
        assert!(!lobby.is_ticking());
        assert_eq!(lobby.advance(started + COUNTDOWN + TICK), TickOutcome::Idle);

        assert!(lobby.restart());
        assert!(!lobby.restart());
        assert_eq!(lobby.state(), StartState::Running);
        assert!(!lobby.stage().unwrap().is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_admin_promotion_and_teardown() {
        let (mut registry, _rx) = registry();
        let id = open(&mut registry);
        let lobby = registry.get_mut(&id).unwrap();
        lobby.add_user(UserId(2));
        lobby.start(Instant::now());

        assert_eq!(lobby.remove_user(UserId(1)), 1);
        assert!(lobby.is_admin(UserId(2)));
        assert!(lobby.is_ticking());

        assert_eq!(lobby.remove_user(UserId(2)), 0);
        assert!(!lobby.is_ticking());
        assert!(registry.remove(&id).is_some());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_room_tokens_are_unique() {
        let (mut registry, _rx) = registry();
        let a = open(&mut registry);
        let b = open(&mut registry);
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
    }
}
