//! Coordinator: serialized owner of the agent directory
//!
//! The Coordinator owns the `AgentDirectory` and the status buffer handle.
//! Connections, the HTTP surface and tests talk to it via `CoordinatorHandle`
//! (clone-friendly). The main `run()` loop uses `tokio::select!` to:
//!   - Process operator requests (assign / clear / control / snapshot)
//!   - Process agent events (connect, disconnect, reports, completion, heartbeats)
//!   - Periodically sweep sessions with stale heartbeats
//!
//! Because only this loop touches the directory, a connect-triggered resync
//! can never interleave with a status report for the same run.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::{ControlAction, Run, RunStatus, StatusReport};
use crate::error::{FieldError, Result};
use crate::persistence::StatusBuffer;

use super::command::{
    AgentEvent, AgentLink, AgentMessage, ControlRequest, CoordinatorMessage, ObserverEvent,
};
use super::config::CoordinatorConfig;
use super::directory::{AgentDirectory, Binding};
use super::state::SessionSnapshot;

/// Clonable handle for connections and the HTTP surface
#[derive(Clone)]
pub struct CoordinatorHandle {
    control_tx: mpsc::Sender<ControlRequest>,
    agent_tx: mpsc::Sender<AgentEvent>,
    events_tx: broadcast::Sender<ObserverEvent>,
    buffer: Arc<StatusBuffer>,
    agent_channel_capacity: usize,
    resync_window: usize,
}

impl CoordinatorHandle {
    /// Register a new agent connection.
    ///
    /// Returns the link identity and the receiver of messages for that
    /// connection. A pending run binding is delivered on it as `resync`.
    pub async fn connect(
        &self,
        agent_id: &str,
    ) -> Result<(Uuid, mpsc::Receiver<CoordinatorMessage>)> {
        let (tx, rx) = mpsc::channel(self.agent_channel_capacity);
        let link = AgentLink::new(tx);
        let conn_id = link.conn_id;
        self.send_agent_event(AgentEvent::Connected {
            agent_id: agent_id.to_string(),
            link,
        })
        .await?;
        Ok((conn_id, rx))
    }

    pub async fn disconnect(&self, agent_id: &str, conn_id: Uuid) -> Result<()> {
        self.send_agent_event(AgentEvent::Disconnected {
            agent_id: agent_id.to_string(),
            conn_id,
        })
        .await
    }

    /// Forward a message received from an agent
    pub async fn agent_message(&self, agent_id: &str, message: AgentMessage) -> Result<()> {
        self.send_agent_event(AgentEvent::Message {
            agent_id: agent_id.to_string(),
            message,
        })
        .await
    }

    pub async fn report(&self, agent_id: &str, report: StatusReport) -> Result<()> {
        self.agent_message(agent_id, AgentMessage::StatusReport { report })
            .await
    }

    /// Bind a run to an agent; fails with `AgentBusy` if it already has one
    pub async fn assign(&self, agent_id: &str, run: Run, paused: bool) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send_control(ControlRequest::Assign {
            agent_id: agent_id.to_string(),
            run,
            paused,
            reply,
        })
        .await?;
        Self::await_reply(rx).await?
    }

    /// Unbind the agent's run; returns the cleared run id, if any
    pub async fn clear(&self, agent_id: &str) -> Result<Option<String>> {
        let (reply, rx) = oneshot::channel();
        self.send_control(ControlRequest::Clear {
            agent_id: agent_id.to_string(),
            reply,
        })
        .await?;
        Self::await_reply(rx).await?
    }

    /// Relay a control action to the run's owner.
    ///
    /// Returns `false` when no connected agent owns the run.
    pub async fn control(&self, run_id: &str, action: ControlAction) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.send_control(ControlRequest::Control {
            run_id: run_id.to_string(),
            action,
            reply,
        })
        .await?;
        Self::await_reply(rx).await?
    }

    pub async fn snapshot(&self) -> Result<Vec<SessionSnapshot>> {
        let (reply, rx) = oneshot::channel();
        self.send_control(ControlRequest::Snapshot { reply }).await?;
        Self::await_reply(rx).await
    }

    /// Recent reports of a run (cache first, then durable store)
    pub async fn recent_reports(&self, run_id: &str) -> Result<Vec<StatusReport>> {
        self.buffer.recent(run_id, self.resync_window).await
    }

    /// Subscribe to the observer stream
    pub fn subscribe(&self) -> broadcast::Receiver<ObserverEvent> {
        self.events_tx.subscribe()
    }

    pub fn buffer(&self) -> Arc<StatusBuffer> {
        self.buffer.clone()
    }

    async fn send_control(&self, request: ControlRequest) -> Result<()> {
        self.control_tx
            .send(request)
            .await
            .map_err(|_| FieldError::ChannelClosed("coordinator control channel closed".into()))
    }

    async fn send_agent_event(&self, event: AgentEvent) -> Result<()> {
        self.agent_tx
            .send(event)
            .await
            .map_err(|_| FieldError::ChannelClosed("coordinator agent channel closed".into()))
    }

    async fn await_reply<T>(rx: oneshot::Receiver<T>) -> Result<T> {
        rx.await
            .map_err(|_| FieldError::ChannelClosed("coordinator dropped reply".into()))
    }
}

pub struct Coordinator {
    config: CoordinatorConfig,
    directory: AgentDirectory,
    buffer: Arc<StatusBuffer>,
    resync_window: usize,
    events_tx: broadcast::Sender<ObserverEvent>,
    control_tx: mpsc::Sender<ControlRequest>,
    control_rx: mpsc::Receiver<ControlRequest>,
    agent_tx: mpsc::Sender<AgentEvent>,
    agent_rx: mpsc::Receiver<AgentEvent>,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig, buffer: Arc<StatusBuffer>, resync_window: usize) -> Self {
        let capacity = config.command_capacity.max(1);
        let (control_tx, control_rx) = mpsc::channel(capacity);
        let (agent_tx, agent_rx) = mpsc::channel(capacity);
        let (events_tx, _) = broadcast::channel(config.observer_capacity.max(1));

        Self {
            config,
            directory: AgentDirectory::new(),
            buffer,
            resync_window: resync_window.max(1),
            events_tx,
            control_tx,
            control_rx,
            agent_tx,
            agent_rx,
        }
    }

    /// Create a clonable handle
    pub fn handle(&self) -> CoordinatorHandle {
        CoordinatorHandle {
            control_tx: self.control_tx.clone(),
            agent_tx: self.agent_tx.clone(),
            events_tx: self.events_tx.clone(),
            buffer: self.buffer.clone(),
            agent_channel_capacity: self.config.agent_channel_capacity.max(1),
            resync_window: self.resync_window,
        }
    }

    /// Main coordinator loop: blocks until shutdown
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("coordinator starting main loop");

        let sweep_interval = tokio::time::Duration::from_millis(self.config.sweep_interval_ms.max(1));
        let mut sweep_tick = tokio::time::interval(sweep_interval);
        // Don't burst-fire missed ticks
        sweep_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                // Shutdown wins, then agent traffic: a caller's connect or
                // report is applied before any request it issues afterwards
                biased;

                // --- Shutdown signal ---
                _ = shutdown_rx.recv() => {
                    info!("coordinator: shutdown signal received");
                    self.shutdown().await;
                    break;
                }

                // --- Agent connections and traffic ---
                Some(event) = self.agent_rx.recv() => {
                    self.handle_agent_event(event).await;
                }

                // --- Operator requests ---
                Some(request) = self.control_rx.recv() => {
                    self.handle_control(request).await;
                }

                // --- Periodic: stale heartbeat sweep ---
                _ = sweep_tick.tick() => {
                    self.sweep();
                }
            }
        }

        info!("coordinator: main loop exited");
    }

    async fn handle_control(&mut self, request: ControlRequest) {
        match request {
            ControlRequest::Assign {
                agent_id,
                run,
                paused,
                reply,
            } => {
                let result = self.assign(&agent_id, run, paused).await;
                let _ = reply.send(result);
            }
            ControlRequest::Clear { agent_id, reply } => {
                let result = self.clear(&agent_id).await;
                let _ = reply.send(result);
            }
            ControlRequest::Control {
                run_id,
                action,
                reply,
            } => {
                let result = self.control(&run_id, action).await;
                let _ = reply.send(result);
            }
            ControlRequest::Snapshot { reply } => {
                let _ = reply.send(self.directory.snapshot());
            }
        }
    }

    async fn handle_agent_event(&mut self, event: AgentEvent) {
        match event {
            AgentEvent::Connected { agent_id, link } => {
                let binding = self.directory.connect(&agent_id, link.clone(), Utc::now());
                if let Some(Binding { run, paused }) = binding {
                    let recent_reports = self.recent_for_resync(&run.id).await;
                    debug!(
                        agent_id = %agent_id,
                        run_id = %run.id,
                        reports = recent_reports.len(),
                        "pushing resync payload"
                    );
                    self.send_to(
                        &agent_id,
                        &link,
                        CoordinatorMessage::Resync {
                            run,
                            paused,
                            recent_reports,
                        },
                    );
                }
                self.publish_directory();
            }
            AgentEvent::Disconnected { agent_id, conn_id } => {
                if self.directory.disconnect(&agent_id, conn_id, Utc::now()) {
                    self.publish_directory();
                }
            }
            AgentEvent::Message { agent_id, message } => {
                self.directory.touch(&agent_id, Utc::now());
                match message {
                    AgentMessage::StatusReport { report } => {
                        self.on_status_report(&agent_id, report).await;
                    }
                    AgentMessage::Completion { run_id } => {
                        self.on_completion(&agent_id, &run_id).await;
                    }
                    AgentMessage::Heartbeat => {}
                }
            }
        }
    }

    async fn assign(&mut self, agent_id: &str, run: Run, paused: bool) -> Result<()> {
        let Binding { run, paused } = self.directory.assign(agent_id, run, paused)?;

        // A run assigned again after being cleared resumes from its reports
        let recent_reports = self.recent_for_resync(&run.id).await;
        self.persist_run_status(&run.id, run.status).await;

        if let Some(link) = self.directory.link(agent_id).cloned() {
            self.send_to(
                agent_id,
                &link,
                CoordinatorMessage::Assign {
                    run,
                    paused,
                    recent_reports,
                },
            );
        }
        self.publish_directory();
        Ok(())
    }

    async fn clear(&mut self, agent_id: &str) -> Result<Option<String>> {
        let cleared = self.directory.clear(agent_id)?;
        if let Some(run_id) = &cleared {
            if let Some(link) = self.directory.link(agent_id).cloned() {
                self.send_to(agent_id, &link, CoordinatorMessage::Clear);
            }
            // Nobody drives the run any more; record it as aborted once its reports are durable
            self.flush_run(run_id).await;
            self.publish(ObserverEvent::RunStatus {
                run_id: run_id.clone(),
                status: RunStatus::Aborted,
            });
            self.persist_run_status(run_id, RunStatus::Aborted).await;
            self.publish_directory();
        }
        Ok(cleared)
    }

    async fn control(&mut self, run_id: &str, action: ControlAction) -> Result<bool> {
        let Some(dispatch) = self.directory.control(run_id, action)? else {
            return Ok(false);
        };

        let delivered = self.send_to(
            &dispatch.agent_id,
            &dispatch.link,
            CoordinatorMessage::Control {
                run_id: run_id.to_string(),
                action,
            },
        );

        if dispatch.changed {
            // A terminal status is recorded only after the run's reports are durable
            if dispatch.status.is_terminal() {
                self.flush_run(run_id).await;
            }
            self.publish(ObserverEvent::RunStatus {
                run_id: run_id.to_string(),
                status: dispatch.status,
            });
            self.persist_run_status(run_id, dispatch.status).await;
            self.publish_directory();
        }
        Ok(delivered)
    }

    async fn on_status_report(&mut self, agent_id: &str, report: StatusReport) {
        if report.agent_id != agent_id || !self.directory.accepts_report(agent_id, &report.run_id) {
            debug!(
                agent_id,
                run_id = %report.run_id,
                sequence = report.sequence,
                "dropping report for run not bound to this agent"
            );
            return;
        }

        self.publish(ObserverEvent::Report {
            report: report.clone(),
        });

        let run_id = report.run_id.clone();
        if let Err(e) = self.buffer.push(report).await {
            error!(run_id = %run_id, error = %e, "failed to persist report batch");
            self.publish(ObserverEvent::Error {
                message: e.to_string(),
                context: Some(format!("persist reports for run {}", run_id)),
            });
        }
    }

    async fn on_completion(&mut self, agent_id: &str, run_id: &str) {
        let Some(run) = self.directory.complete(agent_id, run_id) else {
            debug!(agent_id, run_id, "ignoring completion for unbound run");
            return;
        };

        self.flush_run(&run.id).await;
        self.publish(ObserverEvent::RunStatus {
            run_id: run.id.clone(),
            status: run.status,
        });
        self.persist_run_status(&run.id, run.status).await;
        self.publish_directory();
    }

    fn sweep(&mut self) {
        let timeout = chrono::Duration::milliseconds(self.config.heartbeat_timeout_ms as i64);
        let reclaim = chrono::Duration::milliseconds(self.config.session_reclaim_ms as i64);
        let outcome = self.directory.sweep(Utc::now(), timeout, reclaim);
        if !outcome.is_empty() {
            info!(
                disconnected = outcome.disconnected.len(),
                reclaimed = outcome.reclaimed.len(),
                "session sweep"
            );
            self.publish_directory();
        }
    }

    async fn shutdown(&mut self) {
        match self.buffer.flush_all().await {
            Ok(count) => info!(count, "flushed pending reports on shutdown"),
            Err(e) => {
                let pending = self.buffer.total_pending().await;
                error!(error = %e, pending, "failed to flush pending reports on shutdown");
            }
        }
    }

    async fn recent_for_resync(&self, run_id: &str) -> Vec<StatusReport> {
        match self.buffer.recent(run_id, self.resync_window).await {
            Ok(reports) => reports,
            Err(e) => {
                warn!(run_id, error = %e, "could not load recent reports; resync from start");
                self.publish(ObserverEvent::Error {
                    message: e.to_string(),
                    context: Some(format!("load recent reports for run {}", run_id)),
                });
                Vec::new()
            }
        }
    }

    async fn flush_run(&self, run_id: &str) {
        if let Err(e) = self.buffer.flush_run(run_id).await {
            error!(run_id, error = %e, "failed to flush reports");
            self.publish(ObserverEvent::Error {
                message: e.to_string(),
                context: Some(format!("flush reports for run {}", run_id)),
            });
        }
    }

    async fn persist_run_status(&self, run_id: &str, status: RunStatus) {
        if let Err(e) = self.buffer.sink().update_run_status(run_id, status).await {
            warn!(run_id, %status, error = %e, "failed to record run status");
            self.publish(ObserverEvent::Error {
                message: e.to_string(),
                context: Some(format!("record status {} for run {}", status, run_id)),
            });
        }
    }

    /// Queue a message on an agent link without blocking the loop
    fn send_to(&self, agent_id: &str, link: &AgentLink, message: CoordinatorMessage) -> bool {
        match link.tx.try_send(message) {
            Ok(()) => true,
            Err(e) => {
                warn!(agent_id, conn_id = %link.conn_id, error = %e, "agent link unavailable");
                false
            }
        }
    }

    fn publish_directory(&self) {
        self.publish(ObserverEvent::DirectoryChanged {
            agents: self.directory.snapshot(),
        });
    }

    fn publish(&self, event: ObserverEvent) {
        // No subscribers is fine
        let _ = self.events_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Coordinate, Environment, Route};
    use crate::persistence::store::MockReportSink;
    use crate::persistence::MemoryReportStore;

    fn run(id: &str) -> Run {
        Run::new(
            id,
            "route-1",
            Route::new(vec![Coordinate::new(0.0, 0.0), Coordinate::new(0.0, 1.0)]).unwrap(),
            20.0,
            8.0,
        )
    }

    fn report(run_id: &str, sequence: u64) -> StatusReport {
        StatusReport {
            timestamp: Utc::now(),
            run_id: run_id.to_string(),
            agent_id: "a1".to_string(),
            sequence,
            position: Coordinate::new(0.0, 0.1 * sequence as f64),
            altitude_m: 20.0,
            speed_mps: 8.0,
            battery_pct: 95.0,
            progress: 0.1 * sequence as f64,
            environment: Environment {
                temperature_c: 25.0,
                current_a: 12.0,
                voltage_v: 22.2,
            },
            scores: None,
        }
    }

    fn spawn(threshold: usize) -> (CoordinatorHandle, Arc<MemoryReportStore>, broadcast::Sender<()>) {
        let store = Arc::new(MemoryReportStore::new());
        let buffer = Arc::new(StatusBuffer::new(store.clone(), threshold));
        let coordinator = Coordinator::new(CoordinatorConfig::default(), buffer, 20);
        let handle = coordinator.handle();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        tokio::spawn(coordinator.run(shutdown_rx));
        (handle, store, shutdown_tx)
    }

    #[tokio::test]
    async fn test_assign_delivers_to_connected_agent() {
        let (handle, store, _shutdown) = spawn(20);
        let (_conn, mut rx) = handle.connect("a1").await.unwrap();

        handle.assign("a1", run("r1"), false).await.unwrap();
        match rx.recv().await.unwrap() {
            CoordinatorMessage::Assign { run, paused, recent_reports } => {
                assert_eq!(run.id, "r1");
                assert_eq!(run.status, RunStatus::Running);
                assert!(!paused);
                assert!(recent_reports.is_empty());
            }
            other => panic!("unexpected message: {:?}", other),
        }
        assert_eq!(store.run_status("r1").await, Some(RunStatus::Running));

        let err = handle.assign("a1", run("r2"), false).await.unwrap_err();
        assert!(matches!(err, FieldError::AgentBusy { .. }));
    }

    #[tokio::test]
    async fn test_reconnect_receives_resync_with_cached_reports() {
        let (handle, _store, _shutdown) = spawn(20);
        let (conn, _rx) = handle.connect("a1").await.unwrap();
        handle.assign("a1", run("r1"), false).await.unwrap();

        for seq in 1..=3 {
            handle.report("a1", report("r1", seq)).await.unwrap();
        }
        handle.disconnect("a1", conn).await.unwrap();

        let (_conn, mut rx) = handle.connect("a1").await.unwrap();
        match rx.recv().await.unwrap() {
            CoordinatorMessage::Resync { run, recent_reports, .. } => {
                assert_eq!(run.id, "r1");
                let seqs: Vec<u64> = recent_reports.iter().map(|r| r.sequence).collect();
                assert_eq!(seqs, vec![1, 2, 3]);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_control_for_disconnected_owner_is_noop() {
        let (handle, _store, _shutdown) = spawn(20);
        let (conn, _rx) = handle.connect("a1").await.unwrap();
        handle.assign("a1", run("r1"), false).await.unwrap();
        handle.disconnect("a1", conn).await.unwrap();

        assert!(!handle.control("r1", ControlAction::Pause).await.unwrap());
        assert!(!handle.control("unknown", ControlAction::Abort).await.unwrap());

        let agents = handle.snapshot().await.unwrap();
        assert_eq!(agents[0].run_id.as_deref(), Some("r1"));
        assert!(!agents[0].connected);
    }

    #[tokio::test]
    async fn test_completion_flushes_and_records_status() {
        let (handle, store, _shutdown) = spawn(20);
        let mut events = handle.subscribe();
        let (_conn, _rx) = handle.connect("a1").await.unwrap();
        handle.assign("a1", run("r1"), false).await.unwrap();

        handle.report("a1", report("r1", 1)).await.unwrap();
        handle
            .agent_message("a1", AgentMessage::Completion { run_id: "r1".into() })
            .await
            .unwrap();

        // Snapshot round-trips through the loop, so prior events are processed
        let agents = handle.snapshot().await.unwrap();
        assert!(agents[0].run_id.is_none());
        assert_eq!(store.run_status("r1").await, Some(RunStatus::Completed));
        assert_eq!(store.reports("r1").await.len(), 1);

        let mut saw_completed = false;
        while let Ok(event) = events.try_recv() {
            if let ObserverEvent::RunStatus { status, .. } = event {
                saw_completed |= status == RunStatus::Completed;
            }
        }
        assert!(saw_completed);
    }

    #[tokio::test]
    async fn test_reports_for_unbound_run_are_dropped() {
        let (handle, _store, _shutdown) = spawn(20);
        let (_conn, _rx) = handle.connect("a1").await.unwrap();
        handle.report("a1", report("r9", 1)).await.unwrap();
        handle.snapshot().await.unwrap();
        assert_eq!(handle.buffer().total_pending().await, 0);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_pending_reports() {
        let (handle, store, shutdown) = spawn(20);
        let (_conn, _rx) = handle.connect("a1").await.unwrap();
        handle.assign("a1", run("r1"), false).await.unwrap();
        handle.report("a1", report("r1", 1)).await.unwrap();
        handle.report("a1", report("r1", 2)).await.unwrap();
        handle.snapshot().await.unwrap();

        shutdown.send(()).unwrap();
        // Loop exits after flushing and drops its receivers
        while handle.snapshot().await.is_ok() {
            tokio::task::yield_now().await;
        }
        assert_eq!(store.reports("r1").await.len(), 2);
    }

    #[tokio::test]
    async fn test_clear_records_run_as_aborted() {
        let (handle, store, _shutdown) = spawn(20);
        let (_conn, _rx) = handle.connect("a1").await.unwrap();
        handle.assign("a1", run("r1"), false).await.unwrap();
        handle.report("a1", report("r1", 1)).await.unwrap();
        let mut events = handle.subscribe();

        assert_eq!(handle.clear("a1").await.unwrap().as_deref(), Some("r1"));
        assert_eq!(store.reports("r1").await.len(), 1);
        assert_eq!(store.run_status("r1").await, Some(RunStatus::Aborted));

        let mut saw_aborted = false;
        while let Ok(event) = events.try_recv() {
            if let ObserverEvent::RunStatus { run_id, status } = event {
                saw_aborted |= run_id == "r1" && status == RunStatus::Aborted;
            }
        }
        assert!(saw_aborted);
    }

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn test_shutdown_with_failing_store_still_exits() {
        let mut sink = MockReportSink::new();
        sink.expect_insert_batch()
            .returning(|_, _| Err(FieldError::Persistence("connection refused".into())));
        sink.expect_latest_report().returning(|_| Ok(None));
        sink.expect_update_run_status().returning(|_, _| Ok(()));

        let buffer = Arc::new(StatusBuffer::new(Arc::new(sink), 20));
        let coordinator = Coordinator::new(CoordinatorConfig::default(), buffer.clone(), 20);
        let handle = coordinator.handle();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let running = coordinator.run(shutdown_rx);
        assert_send(&running);
        let task = tokio::spawn(running);

        let (_conn, _rx) = handle.connect("a1").await.unwrap();
        handle.assign("a1", run("r1"), false).await.unwrap();
        handle.report("a1", report("r1", 1)).await.unwrap();
        handle.snapshot().await.unwrap();

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
        assert_eq!(buffer.total_pending().await, 1);
    }
}
