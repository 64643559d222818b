//! AgentWorker: per-agent tick loop
//!
//! Drives one `MotionStateMachine` and `ReportGenerator` on a fixed interval,
//! applies coordinator messages (assign, resync, clear, control) between
//! ticks and emits status reports, completion and heartbeats.
//!
//! The tick branch is disabled while the machine is not moving, so a paused
//! or idle agent does not wake up until a message arrives.

use tokio::sync::{broadcast, mpsc};
use tokio::time::{Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::{AppConfig, MotionConfig, TelemetryConfig};
use crate::coordinator::{AgentMessage, CoordinatorMessage};
use crate::domain::{ControlAction, Run, StatusReport};
use crate::error::{FieldError, Result};
use crate::motion::{
    Fluctuation, MotionPhase, MotionStateMachine, RandomFluctuation, ReportGenerator, TickOutcome,
};
use crate::scoring::{self, ScoringClient};

/// Timing of the worker loop
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub tick_interval_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub steps_per_segment: u32,
    pub climb_step_m: f64,
}

impl WorkerConfig {
    pub fn new(motion: &MotionConfig, heartbeat_interval_ms: u64) -> Self {
        Self {
            tick_interval_ms: motion.tick_interval_ms,
            heartbeat_interval_ms,
            steps_per_segment: motion.steps_per_segment,
            climb_step_m: motion.climb_step_m,
        }
    }
}

pub struct AgentWorker {
    agent_id: String,
    config: WorkerConfig,
    machine: MotionStateMachine,
    generator: ReportGenerator,
    scoring: Box<dyn ScoringClient>,
    run: Option<Run>,
}

impl AgentWorker {
    pub fn new(
        agent_id: impl Into<String>,
        config: WorkerConfig,
        telemetry: TelemetryConfig,
        fluctuation: Box<dyn Fluctuation>,
        scoring: Box<dyn ScoringClient>,
    ) -> Self {
        let agent_id = agent_id.into();
        Self {
            machine: MotionStateMachine::new(config.steps_per_segment, config.climb_step_m),
            generator: ReportGenerator::new(agent_id.clone(), telemetry, fluctuation),
            agent_id,
            config,
            scoring,
            run: None,
        }
    }

    /// Build a worker from application configuration
    pub fn from_config(agent_id: impl Into<String>, cfg: &AppConfig) -> Result<Self> {
        let fluctuation: Box<dyn Fluctuation> = match cfg.telemetry.seed {
            Some(seed) => Box::new(RandomFluctuation::seeded(seed)),
            None => Box::new(RandomFluctuation::from_entropy()),
        };
        Ok(Self::new(
            agent_id,
            WorkerConfig::new(&cfg.motion, cfg.agent.heartbeat_interval_ms),
            cfg.telemetry.clone(),
            fluctuation,
            scoring::from_config(&cfg.scoring)?,
        ))
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn phase(&self) -> MotionPhase {
        self.machine.phase()
    }

    pub fn machine(&self) -> &MotionStateMachine {
        &self.machine
    }

    pub fn run_id(&self) -> Option<&str> {
        self.run.as_ref().map(|r| r.id.as_str())
    }

    /// Apply a coordinator message
    pub fn handle_message(&mut self, message: CoordinatorMessage) -> Result<()> {
        match message {
            CoordinatorMessage::Assign {
                run,
                paused,
                recent_reports,
            } => self.bind(run, paused, &recent_reports),
            CoordinatorMessage::Resync {
                run,
                paused,
                recent_reports,
            } => {
                let same_run = self.run_id() == Some(run.id.as_str());
                if same_run && recent_reports.is_empty() {
                    debug!(agent_id = %self.agent_id, run_id = %run.id, "resync without reports; keeping local state");
                    if paused {
                        self.machine.pause();
                    }
                    return Ok(());
                }
                self.bind(run, paused, &recent_reports)
            }
            CoordinatorMessage::Clear => {
                info!(agent_id = %self.agent_id, run_id = ?self.run_id(), "assignment cleared");
                self.machine.abort();
                self.run = None;
                Ok(())
            }
            CoordinatorMessage::Control { run_id, action } => {
                if self.run_id() != Some(run_id.as_str()) {
                    debug!(agent_id = %self.agent_id, run_id = %run_id, %action, "control for another run ignored");
                    return Ok(());
                }
                match action {
                    ControlAction::Start => {
                        if self.machine.resume() {
                            info!(agent_id = %self.agent_id, run_id = %run_id, "resumed");
                        }
                    }
                    ControlAction::Pause => {
                        if self.machine.pause() {
                            info!(agent_id = %self.agent_id, run_id = %run_id, "paused");
                        }
                    }
                    ControlAction::Abort => {
                        warn!(agent_id = %self.agent_id, run_id = %run_id, "run aborted");
                        self.machine.abort();
                        self.run = None;
                    }
                }
                Ok(())
            }
        }
    }

    /// (Re)build the machine for `run`, resyncing from the newest report
    fn bind(&mut self, run: Run, paused: bool, recent_reports: &[StatusReport]) -> Result<()> {
        let last = recent_reports.iter().max_by_key(|r| r.sequence);

        self.machine.abort();
        self.run = None;
        let phase = self.machine.assign(&run, last, paused)?;
        self.generator.start_run(&run, last);

        info!(
            agent_id = %self.agent_id,
            run_id = %run.id,
            %phase,
            resumed_from = ?last.map(|r| r.sequence),
            "run bound"
        );
        self.run = Some(run);
        Ok(())
    }

    /// Advance one tick; returns the messages to send
    pub async fn tick(&mut self) -> Vec<AgentMessage> {
        let Some(run_id) = self.run.as_ref().map(|r| r.id.clone()) else {
            return Vec::new();
        };

        let outcome = self.machine.tick();
        if outcome == TickOutcome::Stalled {
            return Vec::new();
        }
        let Some(report) = self.generator.generate(&run_id, &self.machine) else {
            return Vec::new();
        };

        let scores = self.scoring.score(report.altitude_m).await;
        let mut out = vec![AgentMessage::StatusReport {
            report: report.with_scores(scores),
        }];

        if outcome == TickOutcome::Completed {
            info!(agent_id = %self.agent_id, run_id = %run_id, "route completed");
            out.push(AgentMessage::Completion { run_id });
            self.run = None;
        }
        out
    }

    /// Worker loop: runs until shutdown or the inbound channel closes
    pub async fn run(
        mut self,
        mut inbound: mpsc::Receiver<CoordinatorMessage>,
        outbound: mpsc::Sender<AgentMessage>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        info!(agent_id = %self.agent_id, "agent worker starting");

        let tick_dur = Duration::from_millis(self.config.tick_interval_ms.max(1));
        let heartbeat_dur = Duration::from_millis(self.config.heartbeat_interval_ms.max(1));
        let mut tick = tokio::time::interval(tick_dur);
        let mut heartbeat = tokio::time::interval(heartbeat_dur);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let moving = self.machine.phase().is_moving();

            tokio::select! {
                // Messages first so an abort lands before the next tick
                biased;

                msg = inbound.recv() => {
                    let Some(msg) = msg else {
                        info!(agent_id = %self.agent_id, "inbound channel closed");
                        break;
                    };
                    if let Err(e) = self.handle_message(msg) {
                        warn!(agent_id = %self.agent_id, error = %e, "rejected coordinator message");
                    }
                    if !moving && self.machine.phase().is_moving() {
                        // Next tick one full interval after (re)starting
                        tick.reset();
                    }
                }

                _ = shutdown_rx.recv() => {
                    info!(agent_id = %self.agent_id, "agent worker: shutdown signal received");
                    break;
                }

                _ = tick.tick(), if moving => {
                    for message in self.tick().await {
                        outbound.send(message).await.map_err(|_| {
                            FieldError::ChannelClosed("agent outbound channel closed".into())
                        })?;
                    }
                }

                _ = heartbeat.tick() => {
                    if outbound.send(AgentMessage::Heartbeat).await.is_err() {
                        break;
                    }
                }
            }
        }

        info!(agent_id = %self.agent_id, "agent worker stopped");
        Ok(())
    }
}
