//! Reference-counted stage cache with deferred reclamation
//!
//! Every stage the server knows about has one cache entry, keyed by its hash
//! token. An entry is in exactly one of three states:
//! - `Unresolved`: only the name is known, nothing is loaded
//! - `Loading`: a background load is in flight and callers are queued on it
//! - `Loaded`: the template is live and shared by `room_count` rooms
//!
//! When the last room releases a level, a destruction timer is armed. An
//! acquire that arrives before it fires cancels it and reuses the template.
//! Expiry drops the template and degrades the entry back to `Unresolved`.

use crate::network::{EventSender, ServerEvent};
use crate::timer::TimerHandle;
use log::{debug, error, info, warn};
use shared::stage::{StageError, StageTemplate};
use shared::HashToken;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// File extension of persisted stage templates.
pub const STAGE_EXTENSION: &str = "stage";

/// Where stage templates come from.
///
/// `load` is called on a blocking worker thread, never on the event loop.
pub trait StageSource: Send + Sync + 'static {
    fn names(&self) -> Result<Vec<String>, StageError>;
    fn load(&self, name: &str) -> Result<StageTemplate, StageError>;
}

/// Directory of `<name>.stage` files encoded with bincode.
#[derive(Debug, Clone)]
pub struct FileStageSource {
    dir: PathBuf,
}

impl FileStageSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", name, STAGE_EXTENSION))
    }

    /// Writes a template next to the others, creating the directory if needed.
    pub fn save(&self, template: &StageTemplate) -> Result<PathBuf, StageError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&template.name);
        fs::write(&path, template.to_bytes()?)?;
        Ok(path)
    }

    fn stage_name(path: &Path) -> Option<String> {
        if path.extension()? != STAGE_EXTENSION {
            return None;
        }
        path.file_stem()?.to_str().map(str::to_string)
    }
}

impl StageSource for FileStageSource {
    fn names(&self) -> Result<Vec<String>, StageError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!("Stage directory {} does not exist", self.dir.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            if let Some(name) = Self::stage_name(&entry?.path()) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    fn load(&self, name: &str) -> Result<StageTemplate, StageError> {
        let bytes = match fs::read(self.path_for(name)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StageError::UnknownStage(name.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        StageTemplate::from_bytes(&bytes)
    }
}

/// In-memory templates, used by tests and tooling.
#[derive(Debug, Clone, Default)]
pub struct MemoryStageSource {
    stages: HashMap<String, StageTemplate>,
}

impl MemoryStageSource {
    pub fn new(stages: impl IntoIterator<Item = StageTemplate>) -> Self {
        Self {
            stages: stages
                .into_iter()
                .map(|stage| (stage.name.clone(), stage))
                .collect(),
        }
    }
}

impl StageSource for MemoryStageSource {
    fn names(&self) -> Result<Vec<String>, StageError> {
        let mut names: Vec<String> = self.stages.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn load(&self, name: &str) -> Result<StageTemplate, StageError> {
        let stage = self
            .stages
            .get(name)
            .cloned()
            .ok_or_else(|| StageError::UnknownStage(name.to_string()))?;
        stage.validate()?;
        Ok(stage)
    }
}

/// A stage whose template is being built, with the callers waiting on it.
#[derive(Debug)]
struct LoadingStage<W> {
    name: String,
    waiters: Vec<W>,
}

/// A live, shared stage template.
#[derive(Debug)]
struct Level {
    name: String,
    template: Arc<StageTemplate>,
    room_count: usize,
    /// Armed while `room_count` is zero. The generation tells a current
    /// expiry apart from one queued by an already cancelled timer.
    destruction: Option<(u64, TimerHandle)>,
}

#[derive(Debug)]
enum CacheEntry<W> {
    Unresolved(String),
    Loading(LoadingStage<W>),
    Loaded(Level),
}

/// Coarse entry state, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelState {
    Unresolved,
    Loading,
    Loaded,
}

/// Result of [`LevelRegistry::acquire`].
#[derive(Debug)]
pub enum Acquire {
    /// The level was live; one reference has been taken.
    Ready(Arc<StageTemplate>),
    /// The caller was queued and will be handed back by `finish_load`.
    Pending,
    /// No stage with this hash exists.
    Unknown,
}

/// Result of [`LevelRegistry::finish_load`].
#[derive(Debug)]
pub enum LoadOutcome<W> {
    /// Each waiter now holds one reference to `template`.
    Loaded {
        template: Arc<StageTemplate>,
        waiters: Vec<W>,
    },
    Failed {
        waiters: Vec<W>,
    },
}

/// Stage cache keyed by hash token.
///
/// Generic over the waiter type so the server can queue whatever
/// continuation it needs to resume once a load completes.
pub struct LevelRegistry<W> {
    entries: HashMap<HashToken, CacheEntry<W>>,
    source: Arc<dyn StageSource>,
    events: EventSender,
    grace: Duration,
    next_generation: u64,
}

impl<W> LevelRegistry<W> {
    /// Seeds one unresolved entry per name the source reports.
    pub fn new(
        source: Arc<dyn StageSource>,
        events: EventSender,
        grace: Duration,
    ) -> Result<Self, StageError> {
        let mut entries = HashMap::new();
        for name in source.names()? {
            match HashToken::new(&name) {
                Ok(hash) => {
                    entries.insert(hash, CacheEntry::Unresolved(name));
                }
                Err(e) => warn!("Skipping stage {:?}: {}", name, e),
            }
        }
        info!("Level registry seeded with {} stages", entries.len());

        Ok(Self {
            entries,
            source,
            events,
            grace,
            next_generation: 0,
        })
    }

    pub fn contains(&self, hash: &HashToken) -> bool {
        self.entries.contains_key(hash)
    }

    pub fn state(&self, hash: &HashToken) -> Option<LevelState> {
        self.entries.get(hash).map(|entry| match entry {
            CacheEntry::Unresolved(_) => LevelState::Unresolved,
            CacheEntry::Loading(_) => LevelState::Loading,
            CacheEntry::Loaded(_) => LevelState::Loaded,
        })
    }

    /// Number of rooms holding the level, if it is loaded.
    pub fn room_count(&self, hash: &HashToken) -> Option<usize> {
        match self.entries.get(hash)? {
            CacheEntry::Loaded(level) => Some(level.room_count),
            _ => None,
        }
    }

    pub fn acquire(&mut self, hash: HashToken, waiter: W) -> Acquire {
        let Some(entry) = self.entries.get_mut(&hash) else {
            return Acquire::Unknown;
        };

        match entry {
            CacheEntry::Unresolved(name) => {
                let name = name.clone();
                info!("Loading stage {}", name);
                Self::spawn_load(
                    Arc::clone(&self.source),
                    self.events.clone(),
                    hash,
                    name.clone(),
                );
                *entry = CacheEntry::Loading(LoadingStage {
                    name,
                    waiters: vec![waiter],
                });
                Acquire::Pending
            }
            CacheEntry::Loading(loading) => {
                loading.waiters.push(waiter);
                Acquire::Pending
            }
            CacheEntry::Loaded(level) => {
                level.room_count += 1;
                if let Some((_, timer)) = level.destruction.take() {
                    timer.cancel();
                    info!("Stage {} reacquired before expiry", level.name);
                }
                Acquire::Ready(Arc::clone(&level.template))
            }
        }
    }

    fn spawn_load(source: Arc<dyn StageSource>, events: EventSender, hash: HashToken, name: String) {
        tokio::spawn(async move {
            let result = match tokio::task::spawn_blocking(move || source.load(&name)).await {
                Ok(result) => result,
                Err(e) => Err(StageError::Io(io::Error::other(e))),
            };
            let _ = events.send(ServerEvent::LevelLoaded {
                level: hash,
                result,
            });
        });
    }

    /// Resolves an in-flight load. Returns `None` if no load was pending for
    /// `hash`.
    pub fn finish_load(
        &mut self,
        hash: HashToken,
        result: Result<StageTemplate, StageError>,
    ) -> Option<LoadOutcome<W>> {
        let Some(entry) = self.entries.get_mut(&hash) else {
            warn!("Load finished for unknown stage {}", hash);
            return None;
        };
        if !matches!(entry, CacheEntry::Loading(_)) {
            warn!("Load finished for stage {} which was not loading", hash);
            return None;
        }

        // Placeholder only; every branch below overwrites the entry.
        let CacheEntry::Loading(loading) =
            std::mem::replace(entry, CacheEntry::Unresolved(String::new()))
        else {
            return None;
        };

        match result {
            Ok(template) => {
                let template = Arc::new(template);
                let mut level = Level {
                    name: loading.name,
                    template: Arc::clone(&template),
                    room_count: loading.waiters.len(),
                    destruction: None,
                };
                if level.room_count == 0 {
                    level.destruction = Some(self.arm_destruction(hash));
                }
                info!(
                    "Stage {} loaded for {} waiters",
                    level.name, level.room_count
                );
                self.entries.insert(hash, CacheEntry::Loaded(level));
                Some(LoadOutcome::Loaded {
                    template,
                    waiters: loading.waiters,
                })
            }
            Err(e) => {
                error!("Failed to load stage {}: {}", loading.name, e);
                self.entries
                    .insert(hash, CacheEntry::Unresolved(loading.name));
                Some(LoadOutcome::Failed {
                    waiters: loading.waiters,
                })
            }
        }
    }

    fn arm_destruction(&mut self, hash: HashToken) -> (u64, TimerHandle) {
        self.next_generation += 1;
        let generation = self.next_generation;
        let timer = TimerHandle::after(
            self.grace,
            self.events.clone(),
            ServerEvent::LevelExpired {
                level: hash,
                generation,
            },
        );
        (generation, timer)
    }

    /// Drops one room's reference. At zero the grace timer is armed.
    pub fn release(&mut self, hash: HashToken) {
        let armed = match self.entries.get_mut(&hash) {
            Some(CacheEntry::Loaded(level)) => {
                if level.room_count == 0 {
                    warn!("Release of stage {} with no references", level.name);
                    return;
                }
                level.room_count -= 1;
                level.room_count == 0
            }
            _ => {
                warn!("Release of stage {} which is not loaded", hash);
                return;
            }
        };

        if armed {
            let destruction = self.arm_destruction(hash);
            if let Some(CacheEntry::Loaded(level)) = self.entries.get_mut(&hash) {
                debug!("Stage {} idle, expires in {:?}", level.name, self.grace);
                level.destruction = Some(destruction);
            }
        }
    }

    /// Handles a fired destruction timer. Returns true if the template was
    /// dropped.
    pub fn expire(&mut self, hash: HashToken, generation: u64) -> bool {
        let Some(CacheEntry::Loaded(level)) = self.entries.get(&hash) else {
            return false;
        };
        let current = matches!(level.destruction, Some((g, _)) if g == generation);
        if !current || level.room_count != 0 {
            debug!("Ignoring stale expiry for stage {}", level.name);
            return false;
        }

        let name = level.name.clone();
        info!("Stage {} unloaded", name);
        self.entries.insert(hash, CacheEntry::Unresolved(name));
        true
    }
}
