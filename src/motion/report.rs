//! Status Report Generator
//!
//! Builds one report per tick from the motion state plus bounded random
//! fluctuations. Fluctuations are applied around the *current* value, so they
//! compound over time. All randomness goes through a single injectable
//! [`Fluctuation`] source so tests can run deterministically.

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::machine::{MotionPhase, MotionStateMachine};
use crate::config::TelemetryConfig;
use crate::domain::{Environment, Run, StatusReport};

/// Source of bounded, symmetric noise
pub trait Fluctuation: Send {
    /// Uniform sample in `[-range, range]`
    fn sample(&mut self, range: f64) -> f64;
}

/// RNG-backed fluctuation
pub struct RandomFluctuation {
    rng: StdRng,
}

impl RandomFluctuation {
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }
}

impl Fluctuation for RandomFluctuation {
    fn sample(&mut self, range: f64) -> f64 {
        if range <= 0.0 {
            return 0.0;
        }
        self.rng.gen_range(-range..=range)
    }
}

/// Always zero; for tests
pub struct NoFluctuation;

impl Fluctuation for NoFluctuation {
    fn sample(&mut self, _range: f64) -> f64 {
        0.0
    }
}

/// Current simulated telemetry values
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Telemetry {
    pub altitude_m: f64,
    pub speed_mps: f64,
    pub battery_pct: f64,
    pub temperature_c: f64,
    pub current_a: f64,
    pub voltage_v: f64,
}

pub struct ReportGenerator {
    agent_id: String,
    config: TelemetryConfig,
    fluctuation: Box<dyn Fluctuation>,
    telemetry: Telemetry,
    sequence: u64,
    /// Ascent ramp finished; altitude now only drifts
    ramped: bool,
}

impl ReportGenerator {
    pub fn new(
        agent_id: impl Into<String>,
        config: TelemetryConfig,
        fluctuation: Box<dyn Fluctuation>,
    ) -> Self {
        let telemetry = Telemetry {
            altitude_m: 0.0,
            speed_mps: 0.0,
            battery_pct: config.initial_battery_pct,
            temperature_c: config.initial_temperature_c,
            current_a: config.initial_current_a,
            voltage_v: config.initial_voltage_v,
        };
        Self {
            agent_id: agent_id.into(),
            config,
            fluctuation,
            telemetry,
            sequence: 0,
            ramped: false,
        }
    }

    pub fn telemetry(&self) -> Telemetry {
        self.telemetry
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Reset for a new run, or restore telemetry from the last known report.
    ///
    /// Restoring is the only way battery can go up.
    pub fn start_run(&mut self, run: &Run, last_report: Option<&StatusReport>) {
        match last_report {
            Some(report) => {
                self.telemetry = Telemetry {
                    altitude_m: report.altitude_m,
                    speed_mps: report.speed_mps,
                    battery_pct: report.battery_pct,
                    temperature_c: report.environment.temperature_c,
                    current_a: report.environment.current_a,
                    voltage_v: report.environment.voltage_v,
                };
                self.sequence = report.sequence;
                self.ramped = report.altitude_m >= run.target_altitude_m || report.progress > 0.0;
            }
            None => {
                self.telemetry = Telemetry {
                    altitude_m: 0.0,
                    speed_mps: run.target_speed_mps,
                    battery_pct: self.config.initial_battery_pct,
                    temperature_c: self.config.initial_temperature_c,
                    current_a: self.config.initial_current_a,
                    voltage_v: self.config.initial_voltage_v,
                };
                self.sequence = 0;
                self.ramped = false;
            }
        }
    }

    /// Build the report for the tick that just happened.
    ///
    /// Returns `None` when the machine has no position (idle).
    pub fn generate(&mut self, run_id: &str, machine: &MotionStateMachine) -> Option<StatusReport> {
        let position = machine.position()?;
        let cfg = &self.config;
        let t = &mut self.telemetry;

        // Sample order is fixed so seeded runs are reproducible
        let altitude_jitter = self.fluctuation.sample(cfg.altitude_jitter_m);
        let speed_jitter = self.fluctuation.sample(cfg.speed_jitter_mps);
        let temperature_jitter = self.fluctuation.sample(cfg.temperature_jitter_c);
        let current_jitter = self.fluctuation.sample(cfg.current_jitter_a);
        let voltage_jitter = self.fluctuation.sample(cfg.voltage_jitter_v);
        let battery_jitter = self.fluctuation.sample(cfg.battery_jitter_pct);

        match machine.phase() {
            MotionPhase::Ascending => {
                t.altitude_m = machine.altitude_m();
            }
            MotionPhase::Traversing => {
                if !self.ramped {
                    // Ramp finished on this tick, possibly the first one
                    t.altitude_m = machine.altitude_m();
                    self.ramped = true;
                }
                t.altitude_m = (t.altitude_m + altitude_jitter).max(0.0);
            }
            _ => {}
        }
        t.speed_mps = (t.speed_mps + speed_jitter).max(0.0);
        t.temperature_c += temperature_jitter;
        t.current_a = (t.current_a + current_jitter).max(0.0);
        t.voltage_v = (t.voltage_v + voltage_jitter).max(0.0);

        let drain = (cfg.battery_drain_pct + battery_jitter).max(0.0);
        t.battery_pct = (t.battery_pct - drain).max(0.0);

        self.sequence += 1;

        Some(StatusReport {
            timestamp: Utc::now(),
            run_id: run_id.to_string(),
            agent_id: self.agent_id.clone(),
            sequence: self.sequence,
            position,
            altitude_m: t.altitude_m,
            speed_mps: t.speed_mps,
            battery_pct: t.battery_pct,
            progress: machine.progress(),
            environment: Environment {
                temperature_c: t.temperature_c,
                current_a: t.current_a,
                voltage_v: t.voltage_v,
            },
            scores: None,
        })
    }
}
