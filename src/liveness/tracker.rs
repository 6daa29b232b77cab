use crate::protocol::Channel;
use serde::Serialize;
use serde::ser::{SerializeMap, Serializer};
use std::ops::Index;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// State of one channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChannelState {
    /// Datagrams seen since startup. Never reset.
    pub received_count: u64,
    pub is_live: bool,
    #[serde(skip)]
    pub last_seen_at: Option<Instant>,
}

impl ChannelState {
    fn is_live_at(&self, now: Instant, window: Duration) -> bool {
        self.is_live
            && self
                .last_seen_at
                .is_some_and(|seen| now.saturating_duration_since(seen) < window)
    }
}

/// Consistent view of every channel at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerState {
    channels: [ChannelState; Channel::COUNT],
}

impl TrackerState {
    pub fn get(&self, channel: Channel) -> &ChannelState {
        &self.channels[channel.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (Channel, &ChannelState)> {
        Channel::ALL.into_iter().zip(self.channels.iter())
    }

    pub fn live_channels(&self) -> impl Iterator<Item = Channel> + '_ {
        self.iter()
            .filter(|(_, state)| state.is_live)
            .map(|(channel, _)| channel)
    }

    pub fn total_received(&self) -> u64 {
        self.channels.iter().map(|c| c.received_count).sum()
    }
}

impl Index<Channel> for TrackerState {
    type Output = ChannelState;

    fn index(&self, channel: Channel) -> &ChannelState {
        self.get(channel)
    }
}

impl Serialize for TrackerState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(Channel::COUNT))?;
        for (channel, state) in self.iter() {
            map.serialize_entry(channel.name(), state)?;
        }
        map.end()
    }
}

#[derive(Default)]
struct DecayTimer {
    // Bumped on every receipt; a timer only fires if its epoch is current.
    epoch: u64,
    handle: Option<AbortHandle>,
}

struct Inner {
    state: TrackerState,
    timers: [DecayTimer; Channel::COUNT],
}

// Lock order: the `updates` watch lock, then `inner`. Every mutation runs
// inside `send_if_modified`, so a reader holding a `subscribe()` borrow can
// still take `inner` through `snapshot()`.
struct Shared {
    inner: Mutex<Inner>,
    updates: watch::Sender<TrackerState>,
    live_window: Duration,
    runtime: Option<Handle>,
    shutdown: CancellationToken,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Every update is a handful of plain field writes made under the
        // lock, so a poisoned guard still holds a whole state.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Per-channel live/stale tracking with a decay timer per channel.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct LivenessTracker {
    shared: Arc<Shared>,
}

impl LivenessTracker {
    /// Creates a tracker with every channel stale and at zero.
    ///
    /// When called inside a tokio runtime, that runtime also runs the decay
    /// timers for receipts recorded from plain threads.
    pub fn new(live_window: Duration) -> Self {
        let (updates, _) = watch::channel(TrackerState::default());
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: TrackerState::default(),
                    timers: Default::default(),
                }),
                updates,
                live_window,
                runtime: Handle::try_current().ok(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Counts a datagram for `channel`, marks it live and rearms its decay.
    ///
    /// The decay timer runs on the current runtime, or on the one the
    /// tracker was created in. With neither, no timer is armed: subscribers
    /// never see the stale transition, but [`snapshot`](Self::snapshot)
    /// still reports staleness from the clock.
    pub fn record_received(&self, channel: Channel) {
        self.shared.updates.send_if_modified(|published| {
            let now = Instant::now();
            let mut guard = self.shared.lock();
            let inner = &mut *guard;

            let entry = &mut inner.state.channels[channel.index()];
            entry.received_count += 1;
            entry.last_seen_at = Some(now);
            entry.is_live = true;

            let timer = &mut inner.timers[channel.index()];
            timer.epoch = timer.epoch.wrapping_add(1);
            if let Some(previous) = timer.handle.take() {
                previous.abort();
            }
            if !self.shared.shutdown.is_cancelled() {
                match Handle::try_current()
                    .ok()
                    .or_else(|| self.shared.runtime.clone())
                {
                    Some(runtime) => {
                        let task = runtime.spawn(expire(
                            Arc::downgrade(&self.shared),
                            channel,
                            timer.epoch,
                            now + self.shared.live_window,
                            self.shared.shutdown.clone(),
                        ));
                        timer.handle = Some(task.abort_handle());
                    }
                    None => trace!(%channel, "no runtime, decay timer not armed"),
                }
            }

            *published = inner.state;
            true
        });
    }

    /// Returns the state of every channel, taken under a single lock.
    pub fn snapshot(&self) -> TrackerState {
        let now = Instant::now();
        let mut state = self.shared.lock().state;
        for entry in state.channels.iter_mut() {
            entry.is_live = entry.is_live_at(now, self.shared.live_window);
        }
        state
    }

    /// Change feed: yields a new state on every receipt and every decay.
    pub fn subscribe(&self) -> watch::Receiver<TrackerState> {
        self.shared.updates.subscribe()
    }

    /// Cancels every pending decay timer. Counts and flags are kept;
    /// later receipts are still counted but no longer arm timers.
    pub fn shutdown(&self) {
        self.shared.shutdown.cancel();
        let mut inner = self.shared.lock();
        for timer in inner.timers.iter_mut() {
            if let Some(handle) = timer.handle.take() {
                handle.abort();
            }
        }
    }

    /// Number of decay timers currently armed.
    pub fn pending_timers(&self) -> usize {
        self.shared
            .lock()
            .timers
            .iter()
            .filter(|t| t.handle.is_some())
            .count()
    }
}

async fn expire(
    shared: Weak<Shared>,
    channel: Channel,
    epoch: u64,
    deadline: Instant,
    shutdown: CancellationToken,
) {
    tokio::select! {
        _ = shutdown.cancelled() => return,
        _ = tokio::time::sleep_until(deadline) => {}
    }

    let Some(shared) = shared.upgrade() else {
        return;
    };
    let expired = shared.updates.send_if_modified(|published| {
        let mut guard = shared.lock();
        let inner = &mut *guard;

        let timer = &mut inner.timers[channel.index()];
        if timer.epoch != epoch {
            // A newer receipt replaced this timer after it had already woken.
            return false;
        }
        timer.handle = None;
        inner.state.channels[channel.index()].is_live = false;
        *published = inner.state;
        true
    });
    if expired {
        debug!(%channel, "channel stale");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    const WINDOW: Duration = Duration::from_millis(2000);

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn starts_stale_and_empty() {
        let tracker = LivenessTracker::new(WINDOW);
        let state = tracker.snapshot();
        for (_, entry) in state.iter() {
            assert_eq!(entry.received_count, 0);
            assert!(!entry.is_live);
            assert!(entry.last_seen_at.is_none());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn receipt_marks_live_and_counts_once() {
        let tracker = LivenessTracker::new(WINDOW);
        tracker.record_received(Channel::Heartbeat);

        let state = tracker.snapshot();
        assert!(state[Channel::Heartbeat].is_live);
        assert_eq!(state[Channel::Heartbeat].received_count, 1);
        assert_eq!(state.total_received(), 1);
        assert_eq!(tracker.pending_timers(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn decays_after_window_and_stays_stale() {
        let tracker = LivenessTracker::new(WINDOW);
        tracker.record_received(Channel::Heartbeat);

        sleep(ms(1999)).await;
        assert!(tracker.snapshot()[Channel::Heartbeat].is_live);

        sleep(ms(2)).await;
        assert!(!tracker.snapshot()[Channel::Heartbeat].is_live);
        assert_eq!(tracker.pending_timers(), 0);

        sleep(ms(10_000)).await;
        let state = tracker.snapshot();
        assert!(!state[Channel::Heartbeat].is_live);
        assert_eq!(state[Channel::Heartbeat].received_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn second_receipt_rearms_decay() {
        let tracker = LivenessTracker::new(WINDOW);
        let mut updates = tracker.subscribe();

        tracker.record_received(Channel::Gps);
        sleep(ms(500)).await;
        tracker.record_received(Channel::Gps);
        let _ = updates.borrow_and_update();

        // Past the first receipt's deadline: still live, and no stale
        // update was published.
        sleep(ms(1600)).await;
        assert!(tracker.snapshot()[Channel::Gps].is_live);
        assert!(!updates.has_changed().unwrap());

        sleep(ms(500)).await;
        assert!(!tracker.snapshot()[Channel::Gps].is_live);
        assert!(updates.has_changed().unwrap());
        assert_eq!(tracker.snapshot()[Channel::Gps].received_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn receipt_just_before_deadline_wins() {
        let tracker = LivenessTracker::new(WINDOW);
        tracker.record_received(Channel::Traffic);
        sleep(ms(1999)).await;
        tracker.record_received(Channel::Traffic);
        sleep(ms(2)).await;
        assert!(tracker.snapshot()[Channel::Traffic].is_live);
        sleep(ms(1998)).await;
        assert!(!tracker.snapshot()[Channel::Traffic].is_live);
    }

    #[tokio::test(start_paused = true)]
    async fn channels_decay_independently() {
        let tracker = LivenessTracker::new(WINDOW);
        tracker.record_received(Channel::Ahrs);
        sleep(ms(1000)).await;
        tracker.record_received(Channel::Uplink);

        sleep(ms(1500)).await;
        let state = tracker.snapshot();
        assert!(!state[Channel::Ahrs].is_live);
        assert!(state[Channel::Uplink].is_live);
        assert_eq!(state.live_channels().collect::<Vec<_>>(), vec![Channel::Uplink]);
        assert_eq!(state[Channel::Heartbeat], ChannelState::default());
    }

    #[tokio::test(start_paused = true)]
    async fn subscribers_see_live_then_stale() {
        let tracker = LivenessTracker::new(WINDOW);
        let mut updates = tracker.subscribe();

        tracker.record_received(Channel::Heartbeat);
        updates.changed().await.unwrap();
        assert!(updates.borrow_and_update()[Channel::Heartbeat].is_live);

        updates.changed().await.unwrap();
        assert!(!updates.borrow_and_update()[Channel::Heartbeat].is_live);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_pending_timers() {
        let tracker = LivenessTracker::new(WINDOW);
        for channel in Channel::ALL {
            tracker.record_received(channel);
        }
        assert_eq!(tracker.pending_timers(), Channel::COUNT);

        tracker.shutdown();
        assert_eq!(tracker.pending_timers(), 0);

        tracker.record_received(Channel::Gps);
        assert_eq!(tracker.pending_timers(), 0);
        assert_eq!(tracker.snapshot()[Channel::Gps].received_count, 2);

        // Staleness is still derived from the clock.
        sleep(ms(2500)).await;
        assert!(tracker.snapshot().live_channels().next().is_none());
    }

    #[test]
    fn snapshot_while_holding_a_subscription_borrow() {
        let tracker = LivenessTracker::new(WINDOW);
        let updates = tracker.subscribe();
        let (done_tx, done_rx) = std::sync::mpsc::channel();

        let reader = {
            let tracker = tracker.clone();
            let done = done_tx.clone();
            std::thread::spawn(move || {
                for _ in 0..1_000 {
                    let held = updates.borrow();
                    let state = tracker.snapshot();
                    assert_eq!(state.total_received(), held.total_received());
                    drop(held);
                }
                done.send("reader").unwrap();
            })
        };
        let writer = {
            let tracker = tracker.clone();
            std::thread::spawn(move || {
                for _ in 0..1_000 {
                    tracker.record_received(Channel::Heartbeat);
                }
                done_tx.send("writer").unwrap();
            })
        };

        for _ in 0..2 {
            done_rx
                .recv_timeout(Duration::from_secs(5))
                .expect("reader and writer should both finish");
        }
        reader.join().unwrap();
        writer.join().unwrap();
        assert_eq!(tracker.snapshot()[Channel::Heartbeat].received_count, 1_000);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn receipts_from_plain_threads_still_decay() {
        let tracker = LivenessTracker::new(ms(100));
        let mut updates = tracker.subscribe();

        let remote = tracker.clone();
        std::thread::spawn(move || remote.record_received(Channel::Ahrs))
            .join()
            .unwrap();
        assert_eq!(tracker.pending_timers(), 1);

        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                updates.changed().await.unwrap();
                let state = *updates.borrow_and_update();
                if state[Channel::Ahrs].received_count == 1 && !state[Channel::Ahrs].is_live {
                    break;
                }
            }
        })
        .await
        .expect("stale transition should be published");
        assert_eq!(tracker.pending_timers(), 0);
    }

    #[test]
    fn works_without_runtime() {
        let tracker = LivenessTracker::new(WINDOW);
        tracker.record_received(Channel::Uplink);
        assert_eq!(tracker.pending_timers(), 0);
        assert!(tracker.snapshot()[Channel::Uplink].is_live);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn snapshots_are_never_torn() {
        let tracker = LivenessTracker::new(WINDOW);
        let writer = {
            let tracker = tracker.clone();
            tokio::spawn(async move {
                for i in 0..2_000 {
                    tracker.record_received(Channel::ALL[i % Channel::COUNT]);
                    if i % 100 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            })
        };

        while !writer.is_finished() {
            let state = tracker.snapshot();
            for (_, entry) in state.iter() {
                assert_eq!(entry.received_count == 0, entry.last_seen_at.is_none());
                assert_eq!(entry.received_count > 0, entry.is_live);
            }
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();
        assert_eq!(tracker.snapshot().total_received(), 2_000);
    }

    #[test]
    fn serializes_as_channel_map() {
        let tracker = LivenessTracker::new(WINDOW);
        tracker.record_received(Channel::Traffic);
        let json = serde_json::to_value(tracker.snapshot()).unwrap();
        assert_eq!(json["traffic"]["received_count"], 1);
        assert_eq!(json["traffic"]["is_live"], true);
        assert_eq!(json["gps"]["received_count"], 0);
        assert!(json["gps"].get("last_seen_at").is_none());
    }
}
