//! Session cache: the authoritative view of live games and how reachable
//! each of their addresses is.
//!
//! All state lives inside a single actor task. `SessionCache` is a cheap
//! handle that posts commands to it and waits for the actor's reply, so a
//! returned `update_*` call has already been applied and notified. Reads
//! get a deep copy back. Probes run as detached tasks and report through the actor's
//! own result channel, so the actor never waits on the network.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crema_core::address::{AddressFilter, CandidateAddress};
use crema_core::game::{Game, GameId};

use crate::notifier::{Notifier, Subscription};
use crate::probe::{ConnectStatus, Probe};

/// Commands queued before `update_*` callers have to wait.
const COMMAND_QUEUE: usize = 256;

/// A game together with the probe state of each of its addresses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntry {
    pub game: Game,
    pub addrs: BTreeMap<CandidateAddress, ConnectStatus>,
}

impl CacheEntry {
    fn new(game: Game) -> Self {
        Self {
            game,
            addrs: BTreeMap::new(),
        }
    }

    /// Success if any address answered, Pending while any is still being
    /// checked, Failure otherwise (including no addresses at all).
    pub fn overall_status(&self) -> ConnectStatus {
        let statuses = || self.addrs.values().copied();
        if statuses().any(|s| s == ConnectStatus::Success) {
            ConnectStatus::Success
        } else if statuses().any(|s| s == ConnectStatus::Pending) {
            ConnectStatus::Pending
        } else {
            ConnectStatus::Failure
        }
    }
}

/// A change notification. `entry` is `None` when the game was deleted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheUpdate {
    pub id: GameId,
    pub entry: Option<CacheEntry>,
}

impl CacheUpdate {
    pub fn is_delete(&self) -> bool {
        self.entry.is_none()
    }
}

/// Independent copy of the whole cache.
pub type Snapshot = HashMap<GameId, CacheEntry>;

/// Acknowledges a mutation once the actor has applied it.
type Applied = oneshot::Sender<()>;

enum Command {
    UpdateAllGames(Vec<Game>, Applied),
    UpdateGame(Game, Applied),
    UpdateAddrs(GameId, Vec<CandidateAddress>, Applied),
    DeleteGame(GameId, Applied),
    Get(oneshot::Sender<Snapshot>),
}

struct ProbeResult {
    id: GameId,
    addr: CandidateAddress,
    attempt: u64,
    status: ConnectStatus,
}

// ── Handle ────────────────────────────────────────────────────────────────────

/// Handle to the cache actor. Clones talk to the same actor.
///
/// The actor stops once every handle is dropped.
#[derive(Clone)]
pub struct SessionCache {
    cmd_tx: mpsc::Sender<Command>,
    updates: Notifier<Arc<CacheUpdate>>,
}

impl SessionCache {
    /// Start the actor on the current runtime.
    pub fn spawn<P: Probe>(prober: Arc<P>, filter: AddressFilter) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE);
        let updates = Notifier::new();
        let (result_tx, result_rx) = mpsc::unbounded_channel();

        let actor = CacheActor {
            games: HashMap::new(),
            inflight: HashMap::new(),
            next_attempt: 0,
            prober,
            filter,
            updates: updates.clone(),
            result_tx,
        };
        tokio::spawn(actor.run(cmd_rx, result_rx));

        Self { cmd_tx, updates }
    }

    /// Replace the whole set of games. Games missing from `games` are deleted.
    pub async fn update_all_games(&self, games: Vec<Game>) {
        self.apply(|done| Command::UpdateAllGames(games, done)).await;
    }

    /// Insert or replace a single game record. Always notifies.
    pub async fn update_game(&self, game: Game) {
        self.apply(|done| Command::UpdateGame(game, done)).await;
    }

    /// Add candidate addresses to a known game and start probing them.
    pub async fn update_addrs(&self, id: GameId, addrs: Vec<CandidateAddress>) {
        self.apply(|done| Command::UpdateAddrs(id, addrs, done)).await;
    }

    pub async fn delete_game(&self, id: GameId) {
        self.apply(|done| Command::DeleteGame(id, done)).await;
    }

    /// Snapshot of the current state. Empty if the actor is gone.
    pub async fn get(&self) -> Snapshot {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Get(reply)).await;
        rx.await.unwrap_or_default()
    }

    pub fn register(&self) -> Subscription<Arc<CacheUpdate>> {
        self.updates.register()
    }

    pub fn unregister(&self, subscription: &Subscription<Arc<CacheUpdate>>) {
        self.updates.unregister(subscription);
    }

    pub fn subscriber_count(&self) -> usize {
        self.updates.subscriber_count()
    }

    async fn apply(&self, command: impl FnOnce(Applied) -> Command) {
        let (done, applied) = oneshot::channel();
        self.send(command(done)).await;
        let _ = applied.await;
    }

    async fn send(&self, cmd: Command) {
        if self.cmd_tx.send(cmd).await.is_err() {
            tracing::warn!("session cache actor is gone, command dropped");
        }
    }
}

// ── Actor ─────────────────────────────────────────────────────────────────────

struct CacheActor<P> {
    games: HashMap<GameId, CacheEntry>,
    /// Attempt number of the probe currently allowed to report per address.
    inflight: HashMap<(GameId, CandidateAddress), u64>,
    next_attempt: u64,
    prober: Arc<P>,
    filter: AddressFilter,
    updates: Notifier<Arc<CacheUpdate>>,
    result_tx: mpsc::UnboundedSender<ProbeResult>,
}

impl<P: Probe> CacheActor<P> {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<Command>,
        mut result_rx: mpsc::UnboundedReceiver<ProbeResult>,
    ) {
        tracing::debug!("session cache started");
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle(cmd),
                    None => break,
                },
                Some(result) = result_rx.recv() => self.apply_result(result),
            }
        }
        tracing::debug!(games = self.games.len(), "session cache stopped");
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::UpdateAllGames(games, done) => {
                self.update_all_games(games);
                let _ = done.send(());
            }
            Command::UpdateGame(game, done) => {
                self.upsert(game, true);
                let _ = done.send(());
            }
            Command::UpdateAddrs(id, addrs, done) => {
                self.update_addrs(id, addrs);
                let _ = done.send(());
            }
            Command::DeleteGame(id, done) => {
                self.delete(id);
                let _ = done.send(());
            }
            Command::Get(reply) => {
                let _ = reply.send(self.games.clone());
            }
        }
    }

    fn update_all_games(&mut self, games: Vec<Game>) {
        let mut seen = HashSet::with_capacity(games.len());
        for game in games {
            seen.insert(game.id);
            self.upsert(game, false);
        }
        let gone: Vec<GameId> = self
            .games
            .keys()
            .filter(|id| !seen.contains(id))
            .copied()
            .collect();
        for id in gone {
            self.delete(id);
        }
    }

    /// Store `game`, keeping any address state. Unless `always_notify`,
    /// an identical record is a no-op.
    fn upsert(&mut self, game: Game, always_notify: bool) {
        let id = game.id;
        match self.games.get_mut(&id) {
            Some(entry) => {
                if entry.game == game && !always_notify {
                    return;
                }
                entry.game = game;
            }
            None => {
                self.games.insert(id, CacheEntry::new(game));
            }
        }
        self.notify_changed(id);
    }

    fn update_addrs(&mut self, id: GameId, addrs: Vec<CandidateAddress>) {
        let Some(entry) = self.games.get_mut(&id) else {
            tracing::debug!(id, "addresses for unknown game ignored");
            return;
        };

        let mut fresh = Vec::new();
        for addr in addrs {
            if entry.addrs.contains_key(&addr) {
                continue;
            }
            if self.filter.should_skip(&addr) {
                tracing::trace!(id, %addr, "address filtered");
                continue;
            }
            entry.addrs.insert(addr.clone(), ConnectStatus::Pending);
            fresh.push(addr);
        }

        if fresh.is_empty() {
            return;
        }
        for addr in fresh {
            self.start_probe(id, addr);
        }
        self.notify_changed(id);
    }

    fn start_probe(&mut self, id: GameId, addr: CandidateAddress) {
        self.next_attempt += 1;
        let attempt = self.next_attempt;
        self.inflight.insert((id, addr.clone()), attempt);

        let prober = self.prober.clone();
        let result_tx = self.result_tx.clone();
        tokio::spawn(async move {
            let status = prober.check(&addr).await;
            let _ = result_tx.send(ProbeResult {
                id,
                addr,
                attempt,
                status,
            });
        });
    }

    fn apply_result(&mut self, result: ProbeResult) {
        let key = (result.id, result.addr);
        if self.inflight.get(&key) != Some(&result.attempt) {
            tracing::trace!(id = key.0, addr = %key.1, "stale probe result discarded");
            return;
        }
        self.inflight.remove(&key);

        let (id, addr) = key;
        let Some(status) = self.games.get_mut(&id).and_then(|e| e.addrs.get_mut(&addr)) else {
            return;
        };
        if *status != ConnectStatus::Pending {
            return;
        }
        *status = result.status;
        tracing::debug!(id, %addr, status = %result.status, "probe finished");
        self.notify_changed(id);
    }

    fn delete(&mut self, id: GameId) {
        if self.games.remove(&id).is_none() {
            return;
        }
        self.inflight.retain(|(game, _), _| *game != id);
        self.updates.notify(Arc::new(CacheUpdate { id, entry: None }));
    }

    fn notify_changed(&self, id: GameId) {
        if let Some(entry) = self.games.get(&id) {
            self.updates.notify(Arc::new(CacheUpdate {
                id,
                entry: Some(entry.clone()),
            }));
        }
    }
}
