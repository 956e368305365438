//! Teleport warmup engine.
//!
//! At most one pending teleport exists per player. A request either takes a
//! bypass straight to execution or arms a warmup: a movement check on a fixed
//! cadence plus a one-shot deadline, both owned by a single task so the
//! pending state needs no locks. Movement past the threshold cancels; a
//! request that survives to the deadline hands off.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::time;
use uuid::Uuid;
use waystone_engine::transform::Transform;

use crate::config::Config;
use crate::handoff::{Handoff, HandoffError};
use crate::location::ServerLocation;
use crate::notify::{Notification, Notifier};
use crate::session::{GameMode, SessionRegistry};

/// How a teleport request ended, reported to the completion callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TeleportOutcome {
    /// The position was applied, or the cross-server intent was published.
    Completed,
    /// Disqualified: movement, disconnect, replacement, or an explicit cancel.
    Cancelled,
    /// Precondition or transfer failure; the player did not move.
    Failed(FailureReason),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureReason {
    NoCurrentPosition,
    NoPreviousLocation,
    UnknownDestinationWorld,
    UnknownCurrentWorld,
    TransferRejected,
    BrokerUnavailable,
}

impl From<&HandoffError> for FailureReason {
    fn from(error: &HandoffError) -> Self {
        match error {
            HandoffError::NoCurrentPosition(_) => Self::NoCurrentPosition,
            HandoffError::UnknownDestinationWorld(_) => Self::UnknownDestinationWorld,
            HandoffError::UnknownCurrentWorld(_) => Self::UnknownCurrentWorld,
            HandoffError::TransferRejected(_) => Self::TransferRejected,
            HandoffError::PublishFailed(_) => Self::BrokerUnavailable,
        }
    }
}

/// Completion callback for a teleport request.
pub type Completion = Box<dyn FnOnce(TeleportOutcome) + Send + 'static>;

struct Pending {
    /// Generation guard: a stale warmup task must never remove its
    /// replacement's entry.
    seq: u64,
    cancel: oneshot::Sender<()>,
}

pub struct WarmupEngine {
    config: Arc<Config>,
    sessions: Arc<SessionRegistry>,
    handoff: Arc<Handoff>,
    notifier: Arc<dyn Notifier>,
    pending: DashMap<Uuid, Pending>,
    seq: AtomicU64,
}

impl WarmupEngine {
    pub fn new(
        config: Arc<Config>,
        sessions: Arc<SessionRegistry>,
        handoff: Arc<Handoff>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            sessions,
            handoff,
            notifier,
            pending: DashMap::new(),
            seq: AtomicU64::new(0),
        }
    }

    /// Request a teleport with warmup. Non-blocking; the outcome arrives on
    /// `on_complete`. Any teleport already pending for `player` is cancelled
    /// and replaced.
    pub fn request(
        self: &Arc<Self>,
        player: Uuid,
        destination: ServerLocation,
        on_complete: impl FnOnce(TeleportOutcome) + Send + 'static,
    ) {
        self.cancel(player);
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine.begin(player, destination, Box::new(on_complete)).await;
        });
    }

    /// Teleport without warmup. Still cancels any pending teleport first.
    pub fn request_instant(
        self: &Arc<Self>,
        player: Uuid,
        destination: ServerLocation,
        on_complete: impl FnOnce(TeleportOutcome) + Send + 'static,
    ) {
        self.cancel(player);
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine.execute(player, destination, Box::new(on_complete)).await;
        });
    }

    /// Cancel any pending teleport for `player`. Idempotent. A teleport whose
    /// deadline already fired is past cancelling.
    pub fn cancel(&self, player: Uuid) {
        if let Some((_, pending)) = self.pending.remove(&player) {
            let _ = pending.cancel.send(());
        }
    }

    pub fn has_pending(&self, player: Uuid) -> bool {
        self.pending.contains_key(&player)
    }

    async fn begin(self: Arc<Self>, player: Uuid, destination: ServerLocation, on_complete: Completion) {
        // A player with no live position cannot teleport; quiet no-op failure.
        let Some((start_world, start)) = self.sessions.position_of(player) else {
            tracing::warn!("teleport request for {player} with no current position");
            on_complete(TeleportOutcome::Failed(FailureReason::NoCurrentPosition));
            return;
        };

        if self.bypasses_warmup(player, &start_world) {
            self.execute(player, destination, on_complete).await;
            return;
        }

        self.notifier.notify(
            player,
            Notification::WarmupStarted { seconds: self.config.warmup.as_secs() },
        );

        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let (cancel_tx, cancel_rx) = oneshot::channel();
        if let Some(previous) = self.pending.insert(player, Pending { seq, cancel: cancel_tx }) {
            // Two requests raced between cancel and arm; the older one loses.
            let _ = previous.cancel.send(());
        }
        self.arm(player, seq, start_world, start, destination, cancel_rx, on_complete);
    }

    /// Bypass predicates, in order: creative mode; the no-warmup permission
    /// when mode information is unavailable; zero-warmup worlds.
    fn bypasses_warmup(&self, player: Uuid, world: &str) -> bool {
        let Some(session) = self.sessions.get(player) else {
            return false;
        };
        if session.game_mode == Some(GameMode::Creative) {
            return true;
        }
        if session.game_mode.is_none()
            && session.permissions.contains(&self.config.bypass_permission)
        {
            return true;
        }
        self.config.instant_worlds.iter().any(|instant| instant == world)
    }

    #[allow(clippy::too_many_arguments)]
    fn arm(
        self: Arc<Self>,
        player: Uuid,
        seq: u64,
        start_world: String,
        start: Transform,
        destination: ServerLocation,
        mut cancel_rx: oneshot::Receiver<()>,
        on_complete: Completion,
    ) {
        let check_every = self.config.check_interval;
        let threshold = self.config.movement_threshold;
        let warmup = self.config.warmup;

        tokio::spawn(async move {
            let deadline = time::sleep(warmup);
            tokio::pin!(deadline);
            let mut checks = time::interval(check_every);
            checks.tick().await; // first tick is immediate; arming was the check

            loop {
                tokio::select! {
                    // Replaced or explicitly cancelled. Whoever fired the
                    // cancel already removed the entry.
                    _ = &mut cancel_rx => {
                        if self.sessions.is_connected(player) {
                            self.notifier.notify(player, Notification::TeleportCancelled);
                        }
                        on_complete(TeleportOutcome::Cancelled);
                        return;
                    }
                    _ = checks.tick() => {
                        match self.sessions.position_of(player) {
                            Some((world, now))
                                if world == start_world
                                    && now.distance_to(&start) <= threshold => {}
                            Some(_) => {
                                // Moved past the threshold (or switched worlds).
                                self.remove_entry(player, seq);
                                self.notifier.notify(player, Notification::TeleportCancelled);
                                on_complete(TeleportOutcome::Cancelled);
                                return;
                            }
                            None => {
                                // Went offline mid-warmup: quiet cancel.
                                self.remove_entry(player, seq);
                                on_complete(TeleportOutcome::Cancelled);
                                return;
                            }
                        }
                    }
                    _ = &mut deadline => {
                        self.remove_entry(player, seq);
                        if self.sessions.is_connected(player) {
                            self.execute(player, destination, on_complete).await;
                        } else {
                            // Offline at the deadline: callback only, no
                            // handoff, no notification.
                            on_complete(TeleportOutcome::Cancelled);
                        }
                        return;
                    }
                }
            }
        });
    }

    fn remove_entry(&self, player: Uuid, seq: u64) {
        self.pending.remove_if(&player, |_, pending| pending.seq == seq);
    }

    /// Authorized teleport: hand off, then report. Failures are silent to the
    /// player (no position change, no notification) but carried in the outcome.
    async fn execute(&self, player: Uuid, destination: ServerLocation, on_complete: Completion) {
        match self.handoff.transfer(player, &destination).await {
            Ok(()) => {
                self.notifier.notify(player, Notification::TeleportComplete);
                on_complete(TeleportOutcome::Completed);
            }
            Err(e) => {
                tracing::warn!("teleport for {player} failed: {e}");
                on_complete(TeleportOutcome::Failed(FailureReason::from(&e)));
            }
        }
    }
}
