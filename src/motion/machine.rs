//! Motion State Machine: resumable per-agent progress along a route
//!
//! Position is tracked as (segment index, step within segment) plus the
//! cumulative distance traveled. The machine can be rebuilt at any time from
//! a last-known coordinate by geometrically re-locating it on the route, so a
//! reconnecting agent never has to replay from zero.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::domain::{Coordinate, Run, StatusReport};
use crate::error::{FieldError, GeometryError, Result};
use crate::geometry::{self, RouteProjection};

/// Phase a paused machine returns to on resume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumePhase {
    Ascending,
    Traversing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "phase")]
pub enum MotionPhase {
    /// No run bound
    Idle,
    /// Climbing to target altitude before lateral motion
    Ascending,
    /// Advancing along the current segment
    Traversing,
    /// Frozen at the exact segment/step or altitude
    Paused { resume_to: ResumePhase },
    Completed,
}

impl MotionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            MotionPhase::Idle => "IDLE",
            MotionPhase::Ascending => "ASCENDING",
            MotionPhase::Traversing => "TRAVERSING",
            MotionPhase::Paused { .. } => "PAUSED",
            MotionPhase::Completed => "COMPLETED",
        }
    }

    /// Phases in which ticks move the agent
    pub fn is_moving(&self) -> bool {
        matches!(self, MotionPhase::Ascending | MotionPhase::Traversing)
    }
}

impl fmt::Display for MotionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Position-along-route counters
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MotionState {
    /// Index of the route point that begins the current segment
    pub segment_index: usize,
    /// Step within the current segment, 0..=steps_per_segment
    pub step: u32,
    pub distance_traveled_m: f64,
    /// Precomputed once per run
    pub total_distance_m: f64,
}

impl MotionState {
    /// Fraction of the route covered, clamped to [0, 1]
    pub fn progress(&self) -> f64 {
        if self.total_distance_m <= 0.0 {
            return 0.0;
        }
        (self.distance_traveled_m / self.total_distance_m).clamp(0.0, 1.0)
    }
}

/// Result of a single tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Altitude moved towards the target
    Climbing,
    /// Lateral position advanced
    Advanced,
    /// The route was finished on this tick. Returned exactly once per run.
    Completed,
    /// Nothing moved (idle, paused or already completed)
    Stalled,
}

pub struct MotionStateMachine {
    steps_per_segment: u32,
    climb_step_m: f64,
    phase: MotionPhase,
    route: Vec<Coordinate>,
    segment_lengths: Vec<f64>,
    /// Cumulative distance at the start of each segment
    segment_offsets: Vec<f64>,
    state: MotionState,
    altitude_m: f64,
    target_altitude_m: f64,
}

impl MotionStateMachine {
    pub fn new(steps_per_segment: u32, climb_step_m: f64) -> Self {
        Self {
            steps_per_segment: steps_per_segment.max(1),
            climb_step_m,
            phase: MotionPhase::Idle,
            route: Vec::new(),
            segment_lengths: Vec::new(),
            segment_offsets: Vec::new(),
            state: MotionState::default(),
            altitude_m: 0.0,
            target_altitude_m: 0.0,
        }
    }

    pub fn phase(&self) -> MotionPhase {
        self.phase
    }

    pub fn state(&self) -> MotionState {
        self.state
    }

    pub fn steps_per_segment(&self) -> u32 {
        self.steps_per_segment
    }

    pub fn altitude_m(&self) -> f64 {
        self.altitude_m
    }

    /// Progress fraction. A zero-length route reads as 1.0 once completed.
    pub fn progress(&self) -> f64 {
        if self.state.total_distance_m <= 0.0 {
            return if self.phase == MotionPhase::Completed {
                1.0
            } else {
                0.0
            };
        }
        self.state.progress()
    }

    /// Current position, interpolated within the current segment
    pub fn position(&self) -> Option<Coordinate> {
        let start = self.route.get(self.state.segment_index)?;
        match self.route.get(self.state.segment_index + 1) {
            Some(end) => {
                let fraction = self.state.step as f64 / self.steps_per_segment as f64;
                Some(start.lerp(end, fraction.min(1.0)))
            }
            None => Some(*start),
        }
    }

    /// Bind a run.
    ///
    /// With a last-known report the machine is resynced from it and, when that
    /// report carries progress, skips the ascent. With `paused` the machine
    /// waits for an explicit resume.
    pub fn assign(
        &mut self,
        run: &Run,
        last_report: Option<&StatusReport>,
        paused: bool,
    ) -> Result<MotionPhase> {
        if !matches!(self.phase, MotionPhase::Idle | MotionPhase::Completed) {
            return Err(FieldError::InvalidStateTransition {
                from: self.phase.to_string(),
                to: MotionPhase::Ascending.to_string(),
            });
        }

        let points = run.route.points();
        if points.is_empty() {
            return Err(GeometryError::EmptyRoute.into());
        }

        self.route = points.to_vec();
        self.segment_lengths = geometry::segment_lengths(points);
        self.segment_offsets = self
            .segment_lengths
            .iter()
            .scan(0.0, |acc, len| {
                let start = *acc;
                *acc += len;
                Some(start)
            })
            .collect();
        self.state = MotionState {
            total_distance_m: self.segment_lengths.iter().sum(),
            ..MotionState::default()
        };
        self.target_altitude_m = run.target_altitude_m;
        self.altitude_m = 0.0;
        self.phase = MotionPhase::Ascending;

        if let Some(report) = last_report {
            self.resync(report)?;
        }

        let active = if self.state.distance_traveled_m > 0.0
            || self.altitude_m >= self.target_altitude_m
        {
            ResumePhase::Traversing
        } else {
            ResumePhase::Ascending
        };
        self.phase = if paused {
            MotionPhase::Paused { resume_to: active }
        } else {
            match active {
                ResumePhase::Ascending => MotionPhase::Ascending,
                ResumePhase::Traversing => MotionPhase::Traversing,
            }
        };

        debug!(
            run_id = %run.id,
            phase = %self.phase,
            total_m = self.state.total_distance_m,
            "motion assigned"
        );
        Ok(self.phase)
    }

    /// Re-derive position from a last-known coordinate.
    ///
    /// The geometric result always wins over the in-memory counters.
    pub fn resync(&mut self, report: &StatusReport) -> Result<RouteProjection> {
        if self.phase == MotionPhase::Idle {
            return Err(FieldError::InvalidStateTransition {
                from: self.phase.to_string(),
                to: "RESYNC".to_string(),
            });
        }

        let projection = geometry::closest_point_on_route(&self.route, &report.position)?;
        let steps = self.steps_per_segment;
        let mut segment_index = projection.segment_index;
        let mut step = (projection.t * steps as f64).round() as u32;

        let segment_count = self.segment_lengths.len();
        if step >= steps && segment_index + 1 < segment_count {
            segment_index += 1;
            step = 0;
        }

        self.state.segment_index = segment_index;
        self.state.step = step.min(steps);
        self.state.distance_traveled_m = projection
            .distance_traveled_m
            .clamp(0.0, self.state.total_distance_m);
        self.altitude_m = report.altitude_m;

        if self.state.distance_traveled_m > 0.0 {
            self.phase = match self.phase {
                MotionPhase::Paused { .. } => MotionPhase::Paused {
                    resume_to: ResumePhase::Traversing,
                },
                MotionPhase::Ascending => MotionPhase::Traversing,
                other => other,
            };
        }

        debug!(
            segment = segment_index,
            step,
            distance_m = self.state.distance_traveled_m,
            "motion resynced"
        );
        Ok(projection)
    }

    /// Freeze at the current point. Returns false when already paused or not moving.
    pub fn pause(&mut self) -> bool {
        let resume_to = match self.phase {
            MotionPhase::Ascending => ResumePhase::Ascending,
            MotionPhase::Traversing => ResumePhase::Traversing,
            _ => return false,
        };
        self.phase = MotionPhase::Paused { resume_to };
        true
    }

    /// Continue from the preserved point. Returns false when not paused.
    pub fn resume(&mut self) -> bool {
        match self.phase {
            MotionPhase::Paused { resume_to } => {
                self.phase = match resume_to {
                    ResumePhase::Ascending => MotionPhase::Ascending,
                    ResumePhase::Traversing => MotionPhase::Traversing,
                };
                true
            }
            _ => false,
        }
    }

    /// Drop the run and all progress
    pub fn abort(&mut self) {
        self.phase = MotionPhase::Idle;
        self.route.clear();
        self.segment_lengths.clear();
        self.segment_offsets.clear();
        self.state = MotionState::default();
        self.altitude_m = 0.0;
        self.target_altitude_m = 0.0;
    }

    pub fn tick(&mut self) -> TickOutcome {
        match self.phase {
            MotionPhase::Ascending => {
                self.altitude_m = (self.altitude_m + self.climb_step_m).min(self.target_altitude_m);
                if self.altitude_m >= self.target_altitude_m {
                    self.phase = MotionPhase::Traversing;
                }
                TickOutcome::Climbing
            }
            MotionPhase::Traversing => self.advance(),
            _ => TickOutcome::Stalled,
        }
    }

    /// Move one step along the current segment.
    ///
    /// Reaching `steps_per_segment` rolls straight over to step 0 of the next
    /// segment, so `(i, steps)` is never stored except on the final segment.
    /// Both name the same point on the route.
    fn advance(&mut self) -> TickOutcome {
        let segment_count = self.segment_lengths.len();
        if self.state.total_distance_m <= 0.0 || segment_count == 0 {
            return self.complete();
        }

        let steps = self.steps_per_segment;
        let mut segment_index = self.state.segment_index;
        let mut step = self.state.step + 1;
        if step >= steps {
            if segment_index + 1 < segment_count {
                segment_index += 1;
                step = 0;
            } else {
                step = steps;
            }
        }

        let exact = self.segment_offsets[segment_index]
            + self.segment_lengths[segment_index] * step as f64 / steps as f64;
        self.state.segment_index = segment_index;
        self.state.step = step;
        // Never move backwards relative to a resynced distance
        self.state.distance_traveled_m = self
            .state
            .distance_traveled_m
            .max(exact)
            .min(self.state.total_distance_m);

        let at_end = segment_index + 1 == segment_count && step == steps;
        if at_end || self.state.distance_traveled_m >= self.state.total_distance_m {
            return self.complete();
        }
        TickOutcome::Advanced
    }

    fn complete(&mut self) -> TickOutcome {
        let last_segment = self.segment_lengths.len().saturating_sub(1);
        self.state.segment_index = last_segment;
        self.state.step = if self.segment_lengths.is_empty() {
            0
        } else {
            self.steps_per_segment
        };
        self.state.distance_traveled_m = self.state.total_distance_m;
        self.phase = MotionPhase::Completed;
        debug!(total_m = self.state.total_distance_m, "motion completed");
        TickOutcome::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Environment, Route};
    use chrono::Utc;

    fn run_on(points: Vec<Coordinate>, target_altitude_m: f64) -> Run {
        Run::new(
            "run-1",
            "route-1",
            Route::new(points).unwrap(),
            target_altitude_m,
            10.0,
        )
    }

    fn report_at(position: Coordinate, altitude_m: f64) -> StatusReport {
        StatusReport {
            timestamp: Utc::now(),
            run_id: "run-1".into(),
            agent_id: "agent-1".into(),
            sequence: 1,
            position,
            altitude_m,
            speed_mps: 10.0,
            battery_pct: 80.0,
            progress: 0.0,
            environment: Environment {
                temperature_c: 25.0,
                current_a: 10.0,
                voltage_v: 22.0,
            },
            scores: None,
        }
    }

    fn one_degree_run() -> Run {
        run_on(vec![Coordinate::new(0.0, 0.0), Coordinate::new(0.0, 1.0)], 0.0)
    }

    #[test]
    fn test_five_ticks_is_half_way() {
        let mut machine = MotionStateMachine::new(10, 5.0);
        let phase = machine.assign(&one_degree_run(), None, false).unwrap();
        assert_eq!(phase, MotionPhase::Traversing);

        for _ in 0..5 {
            assert_eq!(machine.tick(), TickOutcome::Advanced);
        }
        let state = machine.state();
        assert_eq!(state.segment_index, 0);
        assert_eq!(state.step, 5);
        assert!((machine.progress() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_ascends_before_moving() {
        let mut machine = MotionStateMachine::new(10, 5.0);
        let run = run_on(vec![Coordinate::new(0.0, 0.0), Coordinate::new(0.0, 1.0)], 12.0);
        assert_eq!(machine.assign(&run, None, false).unwrap(), MotionPhase::Ascending);

        assert_eq!(machine.tick(), TickOutcome::Climbing);
        assert_eq!(machine.altitude_m(), 5.0);
        assert_eq!(machine.tick(), TickOutcome::Climbing);
        assert_eq!(machine.tick(), TickOutcome::Climbing);
        assert_eq!(machine.altitude_m(), 12.0);
        assert_eq!(machine.phase(), MotionPhase::Traversing);
        assert_eq!(machine.state().step, 0);

        assert_eq!(machine.tick(), TickOutcome::Advanced);
        assert_eq!(machine.state().step, 1);
    }

    #[test]
    fn test_completes_exactly_once_at_full_progress() {
        let mut machine = MotionStateMachine::new(4, 5.0);
        let run = run_on(
            vec![
                Coordinate::new(0.0, 0.0),
                Coordinate::new(0.0, 0.1),
                Coordinate::new(0.1, 0.1),
            ],
            0.0,
        );
        machine.assign(&run, None, false).unwrap();

        let mut last_progress = 0.0;
        let mut completions = 0;
        for _ in 0..20 {
            match machine.tick() {
                TickOutcome::Completed => completions += 1,
                TickOutcome::Advanced => {}
                TickOutcome::Stalled => assert_eq!(machine.phase(), MotionPhase::Completed),
                TickOutcome::Climbing => panic!("unexpected climb"),
            }
            assert!(machine.progress() >= last_progress);
            last_progress = machine.progress();
        }
        assert_eq!(completions, 1);
        assert_eq!(machine.progress(), 1.0);
        assert_eq!(machine.position(), Some(Coordinate::new(0.1, 0.1)));
    }

    #[test]
    fn test_segment_rollover_resets_step() {
        let mut machine = MotionStateMachine::new(4, 5.0);
        let run = run_on(
            vec![
                Coordinate::new(0.0, 0.0),
                Coordinate::new(0.0, 0.1),
                Coordinate::new(0.1, 0.1),
            ],
            0.0,
        );
        machine.assign(&run, None, false).unwrap();
        for _ in 0..4 {
            machine.tick();
        }
        assert_eq!(machine.state().segment_index, 1);
        assert_eq!(machine.state().step, 0);
        assert_eq!(machine.position(), Some(Coordinate::new(0.0, 0.1)));
    }

    #[test]
    fn test_pause_resume_is_exact() {
        let mut machine = MotionStateMachine::new(10, 5.0);
        machine.assign(&one_degree_run(), None, false).unwrap();
        for _ in 0..3 {
            machine.tick();
        }

        assert!(machine.pause());
        assert!(!machine.pause());
        assert_eq!(machine.tick(), TickOutcome::Stalled);
        assert_eq!(machine.state().step, 3);

        assert!(machine.resume());
        assert!(!machine.resume());
        machine.tick();
        assert_eq!(machine.state().segment_index, 0);
        assert_eq!(machine.state().step, 4);
    }

    #[test]
    fn test_pause_during_ascent_preserves_altitude() {
        let mut machine = MotionStateMachine::new(10, 5.0);
        let run = run_on(vec![Coordinate::new(0.0, 0.0), Coordinate::new(0.0, 1.0)], 20.0);
        machine.assign(&run, None, false).unwrap();
        machine.tick();
        assert!(machine.pause());
        assert_eq!(
            machine.phase(),
            MotionPhase::Paused {
                resume_to: ResumePhase::Ascending
            }
        );
        machine.tick();
        assert_eq!(machine.altitude_m(), 5.0);
        machine.resume();
        machine.tick();
        assert_eq!(machine.altitude_m(), 10.0);
    }

    #[test]
    fn test_resync_reproduces_own_position() {
        let mut machine = MotionStateMachine::new(10, 5.0);
        let run = run_on(
            vec![
                Coordinate::new(0.0, 0.0),
                Coordinate::new(0.0, 0.1),
                Coordinate::new(0.1, 0.1),
            ],
            0.0,
        );
        machine.assign(&run, None, false).unwrap();
        for _ in 0..13 {
            machine.tick();
        }
        let before = machine.state();
        let report = report_at(machine.position().unwrap(), 30.0);

        let mut rebuilt = MotionStateMachine::new(10, 5.0);
        rebuilt.assign(&run, Some(&report), false).unwrap();
        let after = rebuilt.state();

        assert_eq!(after.segment_index, before.segment_index);
        assert!((after.step as i64 - before.step as i64).abs() <= 1);
        assert_eq!(rebuilt.phase(), MotionPhase::Traversing);
        assert_eq!(rebuilt.altitude_m(), 30.0);
    }

    #[test]
    fn test_resync_midpoint_of_two_segment_route() {
        // Two 100 km legs along the equator
        let leg = 100_000.0 / 111_194.93;
        let run = run_on(
            vec![
                Coordinate::new(0.0, 0.0),
                Coordinate::new(0.0, leg),
                Coordinate::new(0.0, 2.0 * leg),
            ],
            0.0,
        );
        let mut machine = MotionStateMachine::new(10, 5.0);
        machine
            .assign(&run, Some(&report_at(Coordinate::new(0.0, leg), 40.0)), false)
            .unwrap();

        let state = machine.state();
        assert!(state.segment_index <= 1);
        assert!((state.distance_traveled_m - 100_000.0).abs() < 50.0);
        assert!((machine.progress() - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_resync_with_zero_progress_keeps_ascent() {
        let run = run_on(vec![Coordinate::new(0.0, 0.0), Coordinate::new(0.0, 1.0)], 20.0);
        let mut machine = MotionStateMachine::new(10, 5.0);
        let phase = machine
            .assign(&run, Some(&report_at(Coordinate::new(0.0, 0.0), 10.0)), false)
            .unwrap();
        assert_eq!(phase, MotionPhase::Ascending);
        assert_eq!(machine.altitude_m(), 10.0);
    }

    #[test]
    fn test_assign_paused_waits_for_resume() {
        let mut machine = MotionStateMachine::new(10, 5.0);
        let phase = machine.assign(&one_degree_run(), None, true).unwrap();
        assert_eq!(
            phase,
            MotionPhase::Paused {
                resume_to: ResumePhase::Traversing
            }
        );
        assert_eq!(machine.tick(), TickOutcome::Stalled);
        assert!(machine.resume());
        assert_eq!(machine.tick(), TickOutcome::Advanced);
    }

    #[test]
    fn test_single_point_route_completes_immediately() {
        let mut machine = MotionStateMachine::new(10, 5.0);
        let run = run_on(vec![Coordinate::new(5.0, 5.0)], 0.0);
        machine.assign(&run, None, false).unwrap();
        assert_eq!(machine.tick(), TickOutcome::Completed);
        assert_eq!(machine.progress(), 1.0);
        assert_eq!(machine.tick(), TickOutcome::Stalled);
        assert_eq!(machine.position(), Some(Coordinate::new(5.0, 5.0)));
    }

    #[test]
    fn test_zero_length_route_completes_immediately() {
        let p = Coordinate::new(1.0, 1.0);
        let mut machine = MotionStateMachine::new(10, 5.0);
        machine.assign(&run_on(vec![p, p, p], 0.0), None, false).unwrap();
        assert_eq!(machine.tick(), TickOutcome::Completed);
        assert!(machine.progress().is_finite());
    }

    #[test]
    fn test_abort_discards_progress() {
        let mut machine = MotionStateMachine::new(10, 5.0);
        machine.assign(&one_degree_run(), None, false).unwrap();
        machine.tick();
        machine.abort();
        assert_eq!(machine.phase(), MotionPhase::Idle);
        assert_eq!(machine.state(), MotionState::default());
        assert!(machine.position().is_none());
        assert_eq!(machine.tick(), TickOutcome::Stalled);
    }

    #[test]
    fn test_assign_while_moving_is_rejected() {
        let mut machine = MotionStateMachine::new(10, 5.0);
        machine.assign(&one_degree_run(), None, false).unwrap();
        assert!(matches!(
            machine.assign(&one_degree_run(), None, false),
            Err(FieldError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn test_resync_while_idle_is_rejected() {
        let mut machine = MotionStateMachine::new(10, 5.0);
        let report = report_at(Coordinate::new(0.0, 0.0), 0.0);
        assert!(machine.resync(&report).is_err());
    }
}
