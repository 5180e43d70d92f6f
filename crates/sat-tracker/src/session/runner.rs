//! Session state machine
//!
//! `Idle -> Scheduled -> Running -> {Scheduled | Terminated}`. A scheduled cycle is a
//! deadline raced against the command channel, so a viewport update or disconnect always
//! cancels the pending timer. A running cycle is never interrupted; commands that arrived
//! while it ran are applied before anything is pushed or rescheduled.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::{sleep_until, Instant};
use uuid::Uuid;

use crate::engine::FeedEngine;
use crate::types::ViewportBounds;

use super::PushSink;

/// Lifecycle of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    /// Next cycle due at the given instant
    Scheduled(Instant),
    Running,
    Terminated,
}

/// Events delivered from the connection to its session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    UpdateViewport(ViewportBounds),
    Disconnect,
}

/// Counters reported when a session ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub cycles: usize,
    pub pushes: usize,
}

/// Command side of a session, held by the connection
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: Uuid,
    commands: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Replace the session's viewport and run a cycle immediately
    ///
    /// Returns `false` if the session has already terminated.
    pub fn update_viewport(&self, bounds: ViewportBounds) -> bool {
        self.commands.send(SessionCommand::UpdateViewport(bounds)).is_ok()
    }

    /// Ask the session to stop; no push happens after it observes this
    pub fn disconnect(&self) {
        let _ = self.commands.send(SessionCommand::Disconnect);
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Resolves once the session has terminated
    pub async fn closed(&self) {
        self.commands.closed().await
    }
}

/// Drives the update cycles of one connection
pub struct SessionRunner<S> {
    id: Uuid,
    engine: Arc<FeedEngine>,
    sink: S,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    state: SessionState,
    viewport: Option<ViewportBounds>,
    initial_delay: Duration,
    stats: SessionStats,
}

impl<S: PushSink> SessionRunner<S> {
    /// Create a new session in the `Idle` state
    pub fn new(engine: Arc<FeedEngine>, sink: S, initial_delay: Duration) -> (Self, SessionHandle) {
        let id = Uuid::new_v4();
        let (sender, receiver) = mpsc::unbounded_channel();
        let runner = Self {
            id,
            engine,
            sink,
            commands: receiver,
            state: SessionState::Idle,
            viewport: None,
            initial_delay,
            stats: SessionStats::default(),
        };
        let handle = SessionHandle {
            id,
            commands: sender,
        };
        (runner, handle)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run until disconnected, the push channel fails, or every handle is dropped
    pub async fn run(mut self) -> SessionStats {
        self.state = SessionState::Scheduled(Instant::now() + self.initial_delay);
        tracing::debug!("Session {} scheduled first cycle in {:?}", self.id, self.initial_delay);

        loop {
            let SessionState::Scheduled(deadline) = self.state else {
                break;
            };
            if deadline <= Instant::now() {
                self.run_cycle().await;
                continue;
            }

            let command = tokio::select! {
                biased;
                command = self.commands.recv() => Some(command),
                _ = sleep_until(deadline) => None,
            };

            match command {
                Some(command) => self.apply(command),
                None => self.run_cycle().await,
            }
        }

        self.release();
        self.sink.close().await;
        tracing::debug!(
            "Session {} ended after {} cycles, {} pushes",
            self.id,
            self.stats.cycles,
            self.stats.pushes
        );
        self.stats
    }

    /// `None` means every handle is gone, which is treated as a disconnect
    fn apply(&mut self, command: Option<SessionCommand>) {
        match command {
            Some(SessionCommand::UpdateViewport(bounds)) => {
                self.viewport = Some(bounds);
                if self.state != SessionState::Terminated {
                    self.state = SessionState::Scheduled(Instant::now());
                }
            }
            Some(SessionCommand::Disconnect) | None => self.release(),
        }
    }

    async fn run_cycle(&mut self) {
        self.state = SessionState::Running;
        self.stats.cycles += 1;

        // File reads and the propagation pass stay off the async workers
        let engine = Arc::clone(&self.engine);
        let viewport = self.viewport;
        let cycle = tokio::task::spawn_blocking(move || engine.run_cycle(viewport.as_ref(), Utc::now()));
        let outcome = match cycle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("Session {} cycle task failed: {}", self.id, e);
                self.release();
                return;
            }
        };

        loop {
            match self.commands.try_recv() {
                Ok(command) => self.apply(Some(command)),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.apply(None);
                    break;
                }
            }
        }
        if self.state == SessionState::Terminated {
            return;
        }

        if let Some(update) = outcome.update {
            if let Err(e) = self.sink.push(&update).await {
                tracing::warn!("Session {} push failed: {}", self.id, e);
                self.release();
                return;
            }
            self.stats.pushes += 1;
        }

        // A viewport update during the cycle already scheduled an immediate one
        if self.state == SessionState::Running {
            self.state = SessionState::Scheduled(Instant::now() + outcome.delay);
        }
    }

    /// Drop the viewport and stop accepting commands; safe to call repeatedly
    fn release(&mut self) {
        self.state = SessionState::Terminated;
        self.viewport = None;
        self.commands.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ElementRecord;
    use crate::config::TrackerConfig;
    use crate::engine::tests::{data_dir_on, engine, engine_with, fixed_propagator, FixedPropagator};
    use crate::error::{Error, Result};
    use crate::propagation::{EciPosition, Propagator};
    use crate::types::{LatLng, SatelliteUpdate};
    use async_trait::async_trait;
    use chrono::DateTime;
    use parking_lot::Mutex;

    /// Records when each snapshot was pushed
    #[derive(Clone, Default)]
    struct RecordingSink {
        pushes: Arc<Mutex<Vec<(Instant, SatelliteUpdate)>>>,
        fail: bool,
    }

    #[async_trait]
    impl PushSink for RecordingSink {
        async fn push(&mut self, update: &SatelliteUpdate) -> Result<()> {
            if self.fail {
                return Err(Error::internal("channel closed"));
            }
            self.pushes.lock().push((Instant::now(), update.clone()));
            Ok(())
        }
    }

    /// Sends a command through the session's own handle while its first cycle is running
    struct InterruptingPropagator {
        inner: FixedPropagator,
        handle: Arc<Mutex<Option<SessionHandle>>>,
        action: fn(&SessionHandle),
    }

    impl Propagator for InterruptingPropagator {
        fn propagate(&self, record: &ElementRecord, at: DateTime<Utc>) -> Result<EciPosition> {
            self.inner.propagate(record, at)
        }

        fn sidereal_time(&self, at: DateTime<Utc>) -> f64 {
            if let Some(handle) = self.handle.lock().take() {
                (self.action)(&handle);
            }
            self.inner.sidereal_time(at)
        }

        fn name(&self) -> &str {
            "interrupting"
        }
    }

    /// Catalog for today's date with `B` as the tracked satellite
    fn tracked_config(tmp: &tempfile::TempDir, slow: bool) -> TrackerConfig {
        let mut config: TrackerConfig =
            data_dir_on(tmp.path(), &["A", "B", "C"], Utc::now().date_naive());
        if slow {
            config.scheduler.delay_steps.clear();
            config.scheduler.max_delay_ms = 1000;
        }
        std::fs::write(&config.data.satellite_marker, "B").unwrap();
        config
    }

    fn tracked_engine(tmp: &tempfile::TempDir, slow: bool) -> Arc<FeedEngine> {
        Arc::new(engine(&tracked_config(tmp, slow), None))
    }

    /// Session whose first cycle runs `action` on its handle mid-cycle
    fn interrupted_session(
        tmp: &tempfile::TempDir,
        sink: RecordingSink,
        action: fn(&SessionHandle),
    ) -> (SessionRunner<RecordingSink>, SessionHandle) {
        let slot = Arc::new(Mutex::new(None));
        let propagator = InterruptingPropagator {
            inner: fixed_propagator(),
            handle: slot.clone(),
            action,
        };
        let engine = Arc::new(engine_with(&tracked_config(tmp, true), Arc::new(propagator), None));
        let (runner, handle) = SessionRunner::new(engine, sink, ms(200));
        *slot.lock() = Some(handle.clone());
        (runner, handle)
    }

    fn viewport() -> ViewportBounds {
        ViewportBounds::new(
            LatLng { lat: -10.0, lng: -10.0 },
            LatLng { lat: 10.0, lng: 10.0 },
        )
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_cycle_after_initial_delay_then_payload_cadence() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = RecordingSink::default();
        let pushes = sink.pushes.clone();
        let (runner, handle) = SessionRunner::new(tracked_engine(&tmp, false), sink, ms(200));

        let start = Instant::now();
        let task = tokio::spawn(runner.run());
        tokio::time::sleep(ms(260)).await;
        handle.disconnect();
        let stats = task.await.unwrap();

        let pushes = pushes.lock();
        let offsets: Vec<_> = pushes.iter().map(|(at, _)| *at - start).collect();
        // One satellite (the tracked one) maps to the 50ms step
        assert_eq!(offsets, vec![ms(200), ms(250)]);
        assert_eq!(pushes[0].1.connected_satellite.as_ref().unwrap().id, "B");
        assert_eq!(stats, SessionStats { cycles: 2, pushes: 2 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_viewport_update_preempts_pending_cycle() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = RecordingSink::default();
        let pushes = sink.pushes.clone();
        let (runner, handle) = SessionRunner::new(tracked_engine(&tmp, true), sink, ms(200));

        let start = Instant::now();
        let task = tokio::spawn(runner.run());
        tokio::time::sleep(ms(10)).await;
        assert!(handle.update_viewport(viewport()));
        tokio::time::sleep(ms(490)).await;
        handle.disconnect();
        task.await.unwrap();

        let pushes = pushes.lock();
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].0 - start, ms(10));
        let others: Vec<_> = pushes[0].1.other_satellites.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(others, vec!["A"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_pending_cycle() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = RecordingSink::default();
        let pushes = sink.pushes.clone();
        let (runner, handle) = SessionRunner::new(tracked_engine(&tmp, false), sink, ms(200));

        let task = tokio::spawn(runner.run());
        tokio::time::sleep(ms(10)).await;
        handle.disconnect();
        tokio::time::sleep(ms(1000)).await;

        let stats = task.await.unwrap();
        assert_eq!(stats, SessionStats::default());
        assert!(pushes.lock().is_empty());
        assert!(handle.is_closed());
        assert!(!handle.update_viewport(viewport()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_during_cycle_suppresses_push() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = RecordingSink::default();
        let pushes = sink.pushes.clone();
        let (runner, handle) = interrupted_session(&tmp, sink, SessionHandle::disconnect);

        let stats = tokio::spawn(runner.run()).await.unwrap();

        assert_eq!(stats, SessionStats { cycles: 1, pushes: 0 });
        assert!(pushes.lock().is_empty());
        assert!(handle.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_viewport_update_during_cycle_runs_next_cycle_immediately() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = RecordingSink::default();
        let pushes = sink.pushes.clone();
        let (runner, handle) = interrupted_session(&tmp, sink, |handle| {
            handle.update_viewport(viewport());
        });

        let start = Instant::now();
        let task = tokio::spawn(runner.run());
        tokio::time::sleep(ms(700)).await;
        handle.disconnect();
        let stats = task.await.unwrap();

        let pushes = pushes.lock();
        let offsets: Vec<_> = pushes.iter().map(|(at, _)| *at - start).collect();
        // The slow table would put the second cycle at 1200ms
        assert_eq!(offsets, vec![ms(200), ms(200)]);
        assert!(pushes[0].1.other_satellites.is_empty());
        let others: Vec<_> = pushes[1].1.other_satellites.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(others, vec!["A"]);
        assert_eq!(stats, SessionStats { cycles: 2, pushes: 2 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_failure_terminates_session() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = RecordingSink {
            fail: true,
            ..RecordingSink::default()
        };
        let (runner, handle) = SessionRunner::new(tracked_engine(&tmp, false), sink, ms(200));

        let task = tokio::spawn(runner.run());
        handle.closed().await;

        let stats = task.await.unwrap();
        assert_eq!(stats, SessionStats { cycles: 1, pushes: 0 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_every_handle_ends_session() {
        let tmp = tempfile::tempdir().unwrap();
        let (runner, handle) =
            SessionRunner::new(tracked_engine(&tmp, false), RecordingSink::default(), ms(200));
        assert_eq!(runner.state(), SessionState::Idle);

        let task = tokio::spawn(runner.run());
        drop(handle);
        let stats = task.await.unwrap();
        assert_eq!(stats.pushes, 0);
    }
}
