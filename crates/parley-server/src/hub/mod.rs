//! Connection hub: the single coordinator that owns registry mutation and
//! routing decisions.
//!
//! Sessions talk to the hub through a cloneable [`HubHandle`], which feeds
//! [`HubEvent`]s into one channel drained by [`Hub::run`]. Because a single
//! task applies every register, unregister and route event in arrival order,
//! multi-step sequences such as "look up, enqueue, evict on overflow" never
//! interleave with another mutation.
//!
//! Backpressure contract: routing never waits on a receiver. Each target gets
//! one non-blocking enqueue attempt; a full queue evicts that target only.

pub mod handle;
pub mod registry;
pub mod stats;

pub use handle::{CloseReason, EnqueueError, SessionHandle};
pub use registry::Registry;
pub use stats::HubStats;

use parley_core::{Envelope, ParleyError, ParleyResult, UserId};
use stats::HubCounters;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Tunables for the hub.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of the hub's event channel.
    pub event_capacity: usize,
    /// Also deliver each routed envelope back to its sender's session.
    pub echo_to_sender: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            event_capacity: 256,
            echo_to_sender: false,
        }
    }
}

/// Requests processed by the coordinator.
#[derive(Debug)]
pub enum HubEvent {
    Register(Arc<SessionHandle>),
    Unregister(Arc<SessionHandle>),
    Route(Envelope),
    /// Acknowledged once every earlier event has been applied.
    Sync(oneshot::Sender<()>),
    /// Close every registered session and stop the coordinator.
    Shutdown(oneshot::Sender<()>),
}

/// The coordinator. Consumed by [`Hub::run`].
pub struct Hub {
    events: mpsc::Receiver<HubEvent>,
    registry: Arc<Registry>,
    counters: Arc<HubCounters>,
    echo_to_sender: bool,
}

/// Cloneable front-end to a running [`Hub`].
#[derive(Clone)]
pub struct HubHandle {
    events: mpsc::Sender<HubEvent>,
    registry: Arc<Registry>,
    counters: Arc<HubCounters>,
}

impl Hub {
    /// Create a hub and the handle used to reach it.
    pub fn new(config: HubConfig) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(config.event_capacity.max(1));
        let registry = Arc::new(Registry::new());
        let counters = Arc::new(HubCounters::default());
        let hub = Self {
            events: rx,
            registry: registry.clone(),
            counters: counters.clone(),
            echo_to_sender: config.echo_to_sender,
        };
        let handle = HubHandle {
            events: tx,
            registry,
            counters,
        };
        (hub, handle)
    }

    /// Drain events until a shutdown request arrives or every handle is
    /// dropped. Sessions still registered at exit are closed.
    pub async fn run(mut self) {
        debug!("hub started");
        let mut ack = None;
        while let Some(event) = self.events.recv().await {
            match event {
                HubEvent::Register(handle) => self.register(handle).await,
                HubEvent::Unregister(handle) => self.unregister(&handle).await,
                HubEvent::Route(envelope) => self.route(envelope).await,
                HubEvent::Sync(done) => {
                    let _ = done.send(());
                }
                HubEvent::Shutdown(done) => {
                    ack = Some(done);
                    break;
                }
            }
        }

        let remaining = self.registry.drain().await;
        for handle in &remaining {
            handle.close(CloseReason::Shutdown);
        }
        info!(closed = remaining.len(), "hub stopped");
        if let Some(done) = ack {
            let _ = done.send(());
        }
    }

    async fn register(&self, handle: Arc<SessionHandle>) {
        HubCounters::bump(&self.counters.registered);
        let user = handle.user();
        let session = handle.id();
        match self.registry.insert(handle).await {
            Some(old) if old.id() != session => {
                HubCounters::bump(&self.counters.replaced);
                old.close(CloseReason::Replaced);
                info!(user = %user, session = %session, replaced = %old.id(), "session replaced");
            }
            _ => debug!(user = %user, session = %session, "session registered"),
        }
    }

    async fn unregister(&self, handle: &SessionHandle) {
        if self.registry.remove_if_current(handle).await {
            HubCounters::bump(&self.counters.unregistered);
            debug!(user = %handle.user(), session = %handle.id(), "session unregistered");
        }
        handle.close(CloseReason::PeerClosed);
    }

    async fn route(&self, envelope: Envelope) {
        HubCounters::bump(&self.counters.routed);
        let receiver = envelope.receiver_id;
        let sender = envelope.sender_id;

        if self.echo_to_sender && sender != receiver {
            self.deliver(sender, envelope.clone()).await;
        }
        if !self.deliver(receiver, envelope).await {
            HubCounters::bump(&self.counters.dropped_offline);
            debug!(receiver = %receiver, "receiver offline, dropping message");
        }
    }

    /// Enqueue onto `user`'s session. Returns `false` if `user` has none.
    async fn deliver(&self, user: UserId, envelope: Envelope) -> bool {
        let Some(target) = self.registry.get(&user).await else {
            return false;
        };
        match target.try_enqueue(envelope) {
            Ok(()) => {
                HubCounters::bump(&self.counters.delivered);
            }
            Err(EnqueueError::Full) => {
                warn!(user = %user, session = %target.id(), "outbound queue full, evicting session");
                if self.registry.remove_if_current(&target).await {
                    HubCounters::bump(&self.counters.evicted);
                }
                target.close(CloseReason::SlowConsumer);
            }
            Err(EnqueueError::Closed) => {
                debug!(user = %user, session = %target.id(), "session closing, message dropped");
            }
        }
        true
    }
}

impl HubHandle {
    /// Register a session, replacing any existing session for its user.
    pub async fn register(&self, handle: Arc<SessionHandle>) -> ParleyResult<()> {
        self.events
            .send(HubEvent::Register(handle))
            .await
            .map_err(|_| ParleyError::Other("hub is not running".into()))
    }

    /// Unregister a session. A no-op if it was already removed or replaced.
    pub async fn unregister(&self, handle: Arc<SessionHandle>) {
        if self.events.send(HubEvent::Unregister(handle)).await.is_err() {
            debug!("hub stopped before unregister");
        }
    }

    /// Route an envelope to its receiver. Fire-and-forget.
    pub async fn route(&self, envelope: Envelope) {
        if self.events.send(HubEvent::Route(envelope)).await.is_err() {
            debug!("hub stopped, message not routed");
        }
    }

    /// Wait until every event sent before this call has been applied.
    pub async fn sync(&self) -> ParleyResult<()> {
        let (tx, rx) = oneshot::channel();
        self.events
            .send(HubEvent::Sync(tx))
            .await
            .map_err(|_| ParleyError::Other("hub is not running".into()))?;
        rx.await
            .map_err(|_| ParleyError::Other("hub stopped during sync".into()))
    }

    /// Stop the hub, closing every remaining session.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.events.send(HubEvent::Shutdown(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Whether `user` currently has a live session.
    pub async fn is_online(&self, user: &UserId) -> bool {
        self.registry.contains(user).await
    }

    /// Number of live sessions.
    pub async fn connected_count(&self) -> usize {
        self.registry.len().await
    }

    /// Read-only access to the registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn stats(&self) -> HubStats {
        self.counters.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::InboundFrame;
    use std::collections::HashMap;
    use std::time::Duration;

    fn start(config: HubConfig) -> (HubHandle, tokio::task::JoinHandle<()>) {
        let (hub, handle) = Hub::new(config);
        (handle, tokio::spawn(hub.run()))
    }

    fn message(from: UserId, to: UserId, text: &str) -> Envelope {
        Envelope::stamp(
            InboundFrame {
                receiver_id: to,
                payload: text.into(),
            },
            from,
        )
    }

    #[tokio::test]
    async fn second_registration_replaces_and_closes_first() {
        let (hub, _task) = start(HubConfig::default());
        let user = UserId::random();
        let (first, _rx1) = SessionHandle::new(user, 8);
        let (second, _rx2) = SessionHandle::new(user, 8);

        hub.register(first.clone()).await.unwrap();
        hub.register(second.clone()).await.unwrap();
        hub.sync().await.unwrap();

        assert_eq!(hub.connected_count().await, 1);
        assert_eq!(hub.registry().get(&user).await.unwrap().id(), second.id());
        assert_eq!(first.close_reason(), Some(CloseReason::Replaced));
        assert!(!second.is_closed());
        assert_eq!(hub.stats().replaced, 1);
    }

    #[tokio::test]
    async fn late_unregister_of_replaced_session_keeps_new_one() {
        let (hub, _task) = start(HubConfig::default());
        let user = UserId::random();
        let (first, _rx1) = SessionHandle::new(user, 8);
        let (second, _rx2) = SessionHandle::new(user, 8);

        hub.register(first.clone()).await.unwrap();
        hub.register(second.clone()).await.unwrap();
        hub.unregister(first.clone()).await;
        hub.sync().await.unwrap();

        assert!(hub.is_online(&user).await);
        assert!(!second.is_closed());
        assert_eq!(hub.stats().unregistered, 0);

        hub.unregister(second.clone()).await;
        hub.unregister(second.clone()).await;
        hub.sync().await.unwrap();
        assert!(!hub.is_online(&user).await);
        assert!(second.is_closed());
        assert_eq!(hub.stats().unregistered, 1);
    }

    #[tokio::test]
    async fn routes_to_receiver_in_order() {
        let (hub, _task) = start(HubConfig::default());
        let alice = UserId::random();
        let bob = UserId::random();
        let (bob_session, mut bob_rx) = SessionHandle::new(bob, 8);
        hub.register(bob_session).await.unwrap();

        for text in ["one", "two", "three"] {
            hub.route(message(alice, bob, text)).await;
        }
        hub.sync().await.unwrap();

        for expected in ["one", "two", "three"] {
            let env = bob_rx.try_recv().unwrap();
            assert_eq!(env.payload.as_text(), Some(expected));
            assert_eq!(env.sender_id, alice);
        }
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn routing_to_offline_user_is_a_noop() {
        let (hub, _task) = start(HubConfig::default());
        let alice = UserId::random();
        let (alice_session, mut alice_rx) = SessionHandle::new(alice, 8);
        hub.register(alice_session.clone()).await.unwrap();

        tokio::time::timeout(
            Duration::from_secs(1),
            hub.route(message(alice, UserId::random(), "anyone?")),
        )
        .await
        .unwrap();
        hub.sync().await.unwrap();

        let stats = hub.stats();
        assert_eq!(stats.dropped_offline, 1);
        assert_eq!(stats.delivered, 0);
        assert!(alice_rx.try_recv().is_err());
        assert!(!alice_session.is_closed());
    }

    #[tokio::test]
    async fn overflow_evicts_only_the_slow_receiver() {
        let (hub, _task) = start(HubConfig::default());
        let sender = UserId::random();
        let slow = UserId::random();
        let fast = UserId::random();
        let (slow_session, _slow_rx) = SessionHandle::new(slow, 2);
        let (fast_session, mut fast_rx) = SessionHandle::new(fast, 8);
        hub.register(slow_session.clone()).await.unwrap();
        hub.register(fast_session.clone()).await.unwrap();

        hub.route(message(sender, slow, "1")).await;
        hub.route(message(sender, slow, "2")).await;
        hub.sync().await.unwrap();
        assert!(hub.is_online(&slow).await);

        hub.route(message(sender, slow, "3")).await;
        hub.route(message(sender, fast, "hello")).await;
        hub.sync().await.unwrap();

        assert!(!hub.is_online(&slow).await);
        assert_eq!(slow_session.close_reason(), Some(CloseReason::SlowConsumer));
        assert_eq!(hub.stats().evicted, 1);

        assert!(hub.is_online(&fast).await);
        assert!(!fast_session.is_closed());
        assert_eq!(fast_rx.try_recv().unwrap().payload.as_text(), Some("hello"));

        // The evicted session's own unregister arrives later and is harmless.
        hub.unregister(slow_session).await;
        hub.sync().await.unwrap();
        assert_eq!(hub.stats().unregistered, 0);
    }

    #[tokio::test]
    async fn echo_to_sender_delivers_both_copies() {
        let (hub, _task) = start(HubConfig {
            echo_to_sender: true,
            ..HubConfig::default()
        });
        let alice = UserId::random();
        let bob = UserId::random();
        let (a, mut a_rx) = SessionHandle::new(alice, 8);
        let (b, mut b_rx) = SessionHandle::new(bob, 8);
        hub.register(a).await.unwrap();
        hub.register(b).await.unwrap();

        hub.route(message(alice, bob, "hi")).await;
        hub.sync().await.unwrap();

        let mine = a_rx.try_recv().unwrap();
        let theirs = b_rx.try_recv().unwrap();
        assert_eq!(mine.id, theirs.id);
        assert_eq!(hub.stats().delivered, 2);
    }

    #[tokio::test]
    async fn shutdown_closes_every_session() {
        let (hub, task) = start(HubConfig::default());
        let mut handles = Vec::new();
        for _ in 0..5 {
            let (handle, rx) = SessionHandle::new(UserId::random(), 1);
            hub.register(handle.clone()).await.unwrap();
            handles.push((handle, rx));
        }
        hub.shutdown().await;
        task.await.unwrap();

        for (handle, _rx) in &handles {
            assert_eq!(handle.close_reason(), Some(CloseReason::Shutdown));
        }
        assert!(hub.registry().is_empty().await);
        assert!(hub.register(handles[0].0.clone()).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_operations_leave_consistent_registry() {
        let (hub, _task) = start(HubConfig {
            event_capacity: 64,
            echo_to_sender: false,
        });
        let users: Vec<UserId> = (0..1000).map(|_| UserId::random()).collect();

        let mut tasks = Vec::new();
        for (i, user) in users.iter().copied().enumerate() {
            let hub = hub.clone();
            let peers = users.clone();
            tasks.push(tokio::spawn(async move {
                let mut receivers = Vec::new();
                let mut last = None;
                // Even indexes finish registered, odd ones finish unregistered.
                let rounds = 1 + i % 3;
                for round in 0..rounds {
                    let (handle, rx) = SessionHandle::new(user, 1024);
                    hub.register(handle.clone()).await.unwrap();
                    hub.route(message(user, peers[(i + round + 1) % peers.len()], "ping"))
                        .await;
                    if let Some(prev) = last.replace(handle) {
                        hub.unregister(prev).await;
                    }
                    receivers.push(rx);
                }
                let current = last.unwrap();
                let stays = i % 2 == 0;
                if !stays {
                    hub.unregister(current.clone()).await;
                }
                (user, stays, current, receivers)
            }));
        }

        let mut expected = HashMap::new();
        let mut keep_alive = Vec::new();
        for task in tasks {
            let (user, stays, current, receivers) = task.await.unwrap();
            expected.insert(user, (stays, current.id()));
            keep_alive.push(receivers);
        }
        hub.sync().await.unwrap();

        let online = expected.values().filter(|(stays, _)| *stays).count();
        assert_eq!(hub.connected_count().await, online);
        for (user, (stays, session)) in &expected {
            let entry = hub.registry().get(user).await;
            if *stays {
                assert_eq!(entry.map(|h| h.id()), Some(*session));
            } else {
                assert!(entry.is_none());
            }
        }
        assert_eq!(hub.stats().evicted, 0);
    }
}
