//! ScanEngine - drives a positioner and a network analyzer through a scan plan.
//!
//! The engine validates a plan, then runs it as a [`ScanSession`] on its own
//! Tokio task. For every grid point, in raster order, the session:
//!
//! 1. moves the positioner and checks the reported arrival against the
//!    configured tolerance,
//! 2. waits the plan's settle time,
//! 3. measures every polarization (averaging `averages` sweeps each),
//! 4. commits all samples of the point to the dataset at once and publishes
//!    a progress report.
//!
//! Driver failures are retried per the session's [`FaultPolicy`]. Pause is
//! honored between points; cancel interrupts the in-flight move via
//! `Positioner::stop` and discards the point being measured.
//!
//! # Usage
//!
//! ```rust,ignore
//! let engine = ScanEngine::new(EngineSettings::default());
//! let session = engine.start(definition, hardware, FaultPolicy::default())?;
//!
//! let mut events = session.subscribe();
//! while let Ok(event) = events.recv().await {
//!     println!("{}/{} points", event.completed_points, event.total_points);
//!     if event.state.is_terminal() {
//!         break;
//!     }
//! }
//!
//! let outcome = session.wait().await?;
//! println!("Finished {} with {} samples", outcome.state, outcome.dataset.len());
//! ```

use chrono::{DateTime, Utc};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, RwLock, RwLockReadGuard};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::fault_policy::{ExhaustionAction, FailureClass, FaultPolicy};
use super::plan::{GridPoint, PlanDefinition, Polarization, ScanPlan};
use super::progress::{ProgressEvent, ProgressReport};
use super::state::{FaultCause, FaultDescriptor, SessionState};
use crate::data::{PatternDataset, PointRecord, SampleRecord};
use crate::error::{AppResult, Axis, InstrumentError, PositionerError, ScanError};
use crate::hardware::{NetworkAnalyzer, Positioner};

/// Engine-wide settings shared by every session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Maximum deviation (degrees, per axis) between target and reported position
    pub arrival_tolerance_deg: f64,
    /// Capacity of each session's progress event channel
    pub event_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            arrival_tolerance_deg: 0.1,
            event_capacity: 256,
        }
    }
}

/// The devices a session drives.
#[derive(Clone)]
pub struct ScanHardware {
    /// Antenna positioner
    pub positioner: Arc<dyn Positioner>,
    /// Network analyzer
    pub analyzer: Arc<dyn NetworkAnalyzer>,
}

impl ScanHardware {
    /// Bundle a positioner and an analyzer.
    pub fn new(positioner: Arc<dyn Positioner>, analyzer: Arc<dyn NetworkAnalyzer>) -> Self {
        Self {
            positioner,
            analyzer,
        }
    }
}

impl std::fmt::Debug for ScanHardware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanHardware").finish_non_exhaustive()
    }
}

/// Final result of a session.
#[derive(Debug)]
pub struct ScanOutcome {
    /// Session identifier
    pub session_id: Uuid,
    /// Terminal state
    pub state: SessionState,
    /// Cause of an `Aborted` or `Faulted` ending
    pub fault: Option<FaultDescriptor>,
    /// Everything committed before the session ended
    pub dataset: PatternDataset,
    /// The devices, handed back for reuse
    pub hardware: ScanHardware,
}

/// Executes scan plans against hardware.
#[derive(Debug, Clone, Default)]
pub struct ScanEngine {
    settings: EngineSettings,
}

impl ScanEngine {
    /// Create an engine.
    pub fn new(settings: EngineSettings) -> Self {
        Self { settings }
    }

    /// Engine settings.
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Validate `definition` and start a session.
    ///
    /// An invalid definition returns [`ScanError::InvalidPlan`] before any
    /// hardware is commanded.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        &self,
        definition: PlanDefinition,
        hardware: ScanHardware,
        policy: FaultPolicy,
    ) -> AppResult<ScanSession> {
        let plan = ScanPlan::new(definition)?;
        Ok(self.start_plan(plan, hardware, policy))
    }

    /// Start a session for an already validated plan.
    ///
    /// The session is `Running` when this returns.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start_plan(
        &self,
        plan: ScanPlan,
        hardware: ScanHardware,
        policy: FaultPolicy,
    ) -> ScanSession {
        let id = Uuid::new_v4();
        let plan = Arc::new(plan);

        let mut report = ProgressReport::new(id, plan.total_points());
        report.state = SessionState::Running;
        let mut dataset = PatternDataset::new(id, Arc::clone(&plan));
        dataset.set_state(SessionState::Running);

        let shared = Arc::new(SessionShared {
            report: RwLock::new(report),
            dataset: RwLock::new(dataset),
        });
        let (control_tx, control_rx) = watch::channel(Control::Run);
        let (events, _) = broadcast::channel(self.settings.event_capacity.max(1));

        info!(
            session_id = %id,
            total_points = plan.total_points(),
            frequencies = plan.frequencies().len(),
            polarizations = plan.polarizations().len(),
            "Starting scan session"
        );

        let positioner = Arc::clone(&hardware.positioner);
        let runner = SessionRunner {
            id,
            plan: Arc::clone(&plan),
            hardware,
            policy,
            settings: self.settings.clone(),
            shared: Arc::clone(&shared),
            control: control_rx,
            events: events.clone(),
            started: Instant::now(),
            completed: 0,
            faulted_points: 0,
            consecutive_faults: 0,
            busy_time: Duration::ZERO,
            last_position: None,
            last_fault: None,
        };
        let worker = tokio::spawn(runner.run().instrument(info_span!("scan_session", session_id = %id)));

        ScanSession {
            id,
            plan,
            shared,
            control: control_tx,
            events,
            positioner,
            worker,
        }
    }

    /// Re-acquire one grid point of a finished session's dataset.
    ///
    /// Earlier samples at the point are replaced. Returns the point-level or
    /// session-level fault, if the new measurement was not clean; on a
    /// session-level fault the dataset is left unchanged.
    pub async fn remeasure_point(
        &self,
        dataset: &mut PatternDataset,
        azimuth: f64,
        elevation: f64,
        hardware: &ScanHardware,
        policy: &FaultPolicy,
    ) -> AppResult<Option<FaultDescriptor>> {
        let unknown = || ScanError::UnknownGridPoint {
            azimuth,
            elevation,
        };
        let plan = dataset.plan();
        let index = plan.point_index(azimuth, elevation).ok_or_else(unknown)?;
        let point = plan.grid_point(index).ok_or_else(unknown)?;

        info!(point = index, azimuth, elevation, "Re-measuring point");
        let (_control_tx, control) = watch::channel(Control::Run);
        let acquirer = PointAcquirer {
            plan,
            hardware,
            policy,
            settings: &self.settings,
            control: &control,
        };

        let outcome = acquirer.acquire(&point).await;
        match outcome {
            PointOutcome::Measured(measured) => {
                let fault = measured.record.fault.clone();
                dataset.remeasure_point(measured.record)?;
                Ok(fault)
            }
            PointOutcome::SessionFault(fault) => Ok(Some(fault)),
            PointOutcome::Cancelled => Ok(Some(
                FaultDescriptor::new(FaultCause::Cancelled, "re-measurement cancelled")
                    .at_point(&point),
            )),
        }
    }
}

/// Handle to a running (or finished) scan session.
pub struct ScanSession {
    id: Uuid,
    plan: Arc<ScanPlan>,
    shared: Arc<SessionShared>,
    control: watch::Sender<Control>,
    events: broadcast::Sender<ProgressEvent>,
    positioner: Arc<dyn Positioner>,
    worker: JoinHandle<SessionEnd>,
}

impl ScanSession {
    /// Session identifier.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Plan being executed.
    pub fn plan(&self) -> &ScanPlan {
        &self.plan
    }

    /// Latest published progress report.
    pub async fn progress(&self) -> ProgressReport {
        self.shared.report.read().await.clone()
    }

    /// Latest published session state.
    pub async fn state(&self) -> SessionState {
        self.shared.report.read().await.state
    }

    /// Subscribe to progress events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.events.subscribe()
    }

    /// Read access to the committed dataset.
    ///
    /// Only whole points are ever visible. Hold the guard briefly: the session
    /// waits for it before committing the next point.
    pub async fn dataset(&self) -> RwLockReadGuard<'_, PatternDataset> {
        self.shared.dataset.read().await
    }

    /// True once the session task has exited.
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Request a pause after the in-flight point.
    ///
    /// Valid while `Running` or `Paused`; pausing twice is a no-op.
    pub async fn pause(&self) -> AppResult<()> {
        let state = self.state().await;
        if !state.can_pause() {
            return Err(ScanError::InvalidTransition {
                operation: "pause",
                state,
            });
        }
        let requested = self.control.send_if_modified(|control| {
            if *control == Control::Run {
                *control = Control::Pause;
                true
            } else {
                false
            }
        });
        if requested {
            info!(session_id = %self.id, "Pause requested");
        }
        Ok(())
    }

    /// Resume a paused session from the next unprocessed point.
    ///
    /// Also withdraws a pause request the session has not honored yet.
    pub async fn resume(&self) -> AppResult<()> {
        let state = self.state().await;
        let pending = *self.control.borrow() == Control::Pause;
        if !(pending && state.can_pause()) {
            return Err(ScanError::InvalidTransition {
                operation: "resume",
                state,
            });
        }
        self.control.send_if_modified(|control| {
            if *control == Control::Pause {
                *control = Control::Run;
                true
            } else {
                false
            }
        });
        info!(session_id = %self.id, "Resume requested");
        Ok(())
    }

    /// Cancel the session.
    ///
    /// Halts the positioner immediately; the point being measured is discarded
    /// and the session ends `Aborted` with all earlier points kept.
    pub async fn cancel(&self) -> AppResult<()> {
        let state = self.state().await;
        if !state.can_cancel() {
            return Err(ScanError::InvalidTransition {
                operation: "cancel",
                state,
            });
        }
        let requested = self.control.send_if_modified(|control| {
            if *control == Control::Cancel {
                false
            } else {
                *control = Control::Cancel;
                true
            }
        });
        if requested {
            info!(session_id = %self.id, "Cancel requested");
            if let Err(err) = self.positioner.stop().await {
                warn!(session_id = %self.id, error = %err, "Positioner stop failed");
            }
        }
        Ok(())
    }

    /// Wait for the session to end and take its outcome.
    pub async fn wait(self) -> AppResult<ScanOutcome> {
        let ScanSession {
            id,
            shared,
            control,
            worker,
            ..
        } = self;

        let end = worker.await.map_err(|e| ScanError::Join(e.to_string()))?;
        drop(control);

        let dataset = shared.dataset.read().await.clone();
        Ok(ScanOutcome {
            session_id: id,
            state: end.state,
            fault: end.fault,
            dataset,
            hardware: end.hardware,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Run,
    Pause,
    Cancel,
}

struct SessionShared {
    report: RwLock<ProgressReport>,
    dataset: RwLock<PatternDataset>,
}

struct SessionEnd {
    state: SessionState,
    fault: Option<FaultDescriptor>,
    hardware: ScanHardware,
}

/// The acquisition loop, owned by the session task.
struct SessionRunner {
    id: Uuid,
    plan: Arc<ScanPlan>,
    hardware: ScanHardware,
    policy: FaultPolicy,
    settings: EngineSettings,
    shared: Arc<SessionShared>,
    control: watch::Receiver<Control>,
    events: broadcast::Sender<ProgressEvent>,
    started: Instant,
    completed: usize,
    faulted_points: usize,
    consecutive_faults: u32,
    busy_time: Duration,
    last_position: Option<(f64, f64)>,
    last_fault: Option<FaultDescriptor>,
}

impl SessionRunner {
    async fn run(mut self) -> SessionEnd {
        let mut cursor = 0;
        let (state, fault) = loop {
            if self.wait_while_paused().await == Control::Cancel {
                break self.cancelled(None);
            }
            let Some(point) = self.plan.grid_point(cursor) else {
                break (SessionState::Completed, None);
            };

            let point_started = Instant::now();
            let outcome = PointAcquirer {
                plan: &self.plan,
                hardware: &self.hardware,
                policy: &self.policy,
                settings: &self.settings,
                control: &self.control,
            }
            .acquire(&point)
            .await;

            let measured = match outcome {
                PointOutcome::Measured(measured) => measured,
                PointOutcome::Cancelled => break self.cancelled(Some(&point)),
                PointOutcome::SessionFault(fault) => break (SessionState::Faulted, Some(fault)),
            };

            if let Some(position) = measured.position {
                self.last_position = Some(position);
            }
            if measured.invalid_samples > 0 {
                warn!(
                    point = point.index,
                    invalid = measured.invalid_samples,
                    "Analyzer returned non-finite samples"
                );
                self.last_fault = Some(
                    FaultDescriptor::new(
                        FaultCause::InvalidSample,
                        format!("{} non-finite sample(s)", measured.invalid_samples),
                    )
                    .at_point(&point),
                );
            }

            let point_fault = measured.record.fault.clone();
            if let Err(err) = self.shared.dataset.write().await.commit_point(measured.record) {
                error!(point = point.index, error = %err, "Failed to commit point");
                break (
                    SessionState::Faulted,
                    Some(FaultDescriptor::new(FaultCause::Measurement, err.to_string()).at_point(&point)),
                );
            }

            match point_fault {
                Some(fault) => {
                    warn!(point = point.index, fault = %fault, "Point faulted");
                    self.faulted_points += 1;
                    self.consecutive_faults += 1;
                    self.last_fault = Some(fault);
                }
                None => {
                    debug!(
                        point = point.index,
                        azimuth = point.azimuth,
                        elevation = point.elevation,
                        "Point committed"
                    );
                    self.consecutive_faults = 0;
                }
            }

            self.completed = cursor + 1;
            self.busy_time += point_started.elapsed();
            self.publish(SessionState::Running).await;

            if let Some(limit) = self.policy.max_consecutive_faulted_points {
                if self.consecutive_faults >= limit {
                    break (
                        SessionState::Faulted,
                        Some(
                            FaultDescriptor::new(
                                FaultCause::RepeatedFaults,
                                format!("{} consecutive points faulted", self.consecutive_faults),
                            )
                            .at_point(&point),
                        ),
                    );
                }
            }

            cursor += 1;
        };

        self.finish(state, fault).await
    }

    /// Block while paused. Returns the control value that ended the wait.
    async fn wait_while_paused(&mut self) -> Control {
        let mut paused = false;
        loop {
            let control = *self.control.borrow_and_update();
            if control != Control::Pause {
                if paused && control == Control::Run {
                    info!(cursor = self.completed, "Session resumed");
                    self.publish(SessionState::Running).await;
                }
                return control;
            }
            if !paused {
                paused = true;
                info!(cursor = self.completed, "Session paused");
                self.publish(SessionState::Paused).await;
            }
            if self.control.changed().await.is_err() {
                // Session handle dropped while paused; nobody can resume.
                return Control::Cancel;
            }
        }
    }

    fn cancelled(&self, point: Option<&GridPoint>) -> (SessionState, Option<FaultDescriptor>) {
        let mut fault = FaultDescriptor::new(FaultCause::Cancelled, "session cancelled by operator");
        if let Some(point) = point {
            info!(point = point.index, "In-flight point discarded");
            fault = fault.at_point(point);
        }
        (SessionState::Aborted, Some(fault))
    }

    async fn finish(mut self, state: SessionState, fault: Option<FaultDescriptor>) -> SessionEnd {
        if state != SessionState::Completed {
            if let Err(err) = self.hardware.positioner.stop().await {
                warn!(error = %err, "Positioner stop failed");
            }
            if let Err(err) = self.hardware.analyzer.stop().await {
                warn!(error = %err, "Analyzer stop failed");
            }
        }
        if let Some(fault) = &fault {
            self.last_fault = Some(fault.clone());
        }

        self.shared.dataset.write().await.set_state(state);
        self.publish(state).await;

        match &fault {
            Some(fault) if state == SessionState::Faulted => error!(
                completed = self.completed,
                faulted = self.faulted_points,
                fault = %fault,
                "Scan session faulted"
            ),
            _ => info!(
                state = %state,
                completed = self.completed,
                faulted = self.faulted_points,
                "Scan session finished"
            ),
        }

        SessionEnd {
            state,
            fault,
            hardware: self.hardware,
        }
    }

    async fn publish(&self, state: SessionState) {
        let total = self.plan.total_points();
        let cut_len = self.plan.cut_len();
        let cut_progress = if self.completed == 0 {
            0.0
        } else {
            ((self.completed - 1) % cut_len + 1) as f64 / cut_len as f64
        };
        let estimated_remaining = (self.completed > 0).then(|| {
            let mean = self.busy_time.div_f64(self.completed as f64);
            mean.mul_f64(total.saturating_sub(self.completed) as f64)
        });

        let report = ProgressReport {
            session_id: self.id,
            state,
            completed_points: self.completed,
            total_points: total,
            faulted_points: self.faulted_points,
            current_angle: self.last_position,
            elapsed: self.started.elapsed(),
            estimated_remaining,
            cut_progress,
            last_fault: self.last_fault.clone(),
        };
        let event = report.event();
        *self.shared.report.write().await = report;
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// Result of one grid point.
enum PointOutcome {
    /// Point measured, fully or with a point-level fault
    Measured(MeasuredPoint),
    /// Cancel observed; nothing is committed
    Cancelled,
    /// A failure the policy escalates to the whole session
    SessionFault(FaultDescriptor),
}

struct MeasuredPoint {
    record: PointRecord,
    position: Option<(f64, f64)>,
    invalid_samples: usize,
}

/// Result of a retried driver call.
enum Attempt<T> {
    Done(T),
    Cancelled,
    Exhausted(Exhausted),
}

struct Exhausted {
    class: FailureClass,
    action: ExhaustionAction,
    message: String,
    calls: u32,
}

impl Exhausted {
    fn descriptor(&self, point: &GridPoint) -> FaultDescriptor {
        FaultDescriptor::new(self.class.into(), self.message.clone())
            .at_point(point)
            .with_attempts(self.calls)
    }
}

struct Sweep {
    values: Vec<Complex64>,
    valid: Vec<bool>,
    captured_at: DateTime<Utc>,
}

/// Per-point acquisition, shared by sessions and single-point re-measurement.
struct PointAcquirer<'a> {
    plan: &'a ScanPlan,
    hardware: &'a ScanHardware,
    policy: &'a FaultPolicy,
    settings: &'a EngineSettings,
    control: &'a watch::Receiver<Control>,
}

impl PointAcquirer<'_> {
    async fn acquire(&self, point: &GridPoint) -> PointOutcome {
        let position = match self.move_to(point).await {
            Attempt::Done(position) => position,
            Attempt::Cancelled => return PointOutcome::Cancelled,
            Attempt::Exhausted(exhausted) => {
                let fault = exhausted.descriptor(point);
                return match exhausted.action {
                    ExhaustionAction::AbortSession => PointOutcome::SessionFault(fault),
                    ExhaustionAction::SkipPoint => PointOutcome::Measured(MeasuredPoint {
                        record: PointRecord {
                            point: *point,
                            samples: Vec::new(),
                            fault: Some(fault),
                        },
                        position: None,
                        invalid_samples: 0,
                    }),
                };
            }
        };

        if !self.sleep_unless_cancelled(self.plan.settle_time()).await {
            return PointOutcome::Cancelled;
        }

        let mut samples = Vec::with_capacity(self.plan.samples_per_point());
        let mut point_fault = None;
        let mut invalid_samples = 0;
        for (polarization_index, polarization) in self.plan.polarizations().iter().enumerate() {
            match self.measure(point, polarization).await {
                Attempt::Done(sweep) => {
                    for (frequency_index, (value, valid)) in
                        sweep.values.into_iter().zip(sweep.valid).enumerate()
                    {
                        if !valid {
                            invalid_samples += 1;
                        }
                        samples.push(SampleRecord {
                            frequency_index,
                            polarization_index,
                            value,
                            valid,
                            captured_at: sweep.captured_at,
                        });
                    }
                }
                Attempt::Cancelled => return PointOutcome::Cancelled,
                Attempt::Exhausted(exhausted) => {
                    let fault = exhausted
                        .descriptor(point)
                        .with_polarization(polarization.label());
                    match exhausted.action {
                        ExhaustionAction::AbortSession => {
                            return PointOutcome::SessionFault(fault)
                        }
                        ExhaustionAction::SkipPoint if point_fault.is_none() => {
                            point_fault = Some(fault);
                        }
                        ExhaustionAction::SkipPoint => {}
                    }
                }
            }
        }

        PointOutcome::Measured(MeasuredPoint {
            record: PointRecord {
                point: *point,
                samples,
                fault: point_fault,
            },
            position: Some(position),
            invalid_samples,
        })
    }

    /// Move and verify arrival. Returns the reported position.
    async fn move_to(&self, point: &GridPoint) -> Attempt<(f64, f64)> {
        let positioner = &self.hardware.positioner;
        let tolerance = self.settings.arrival_tolerance_deg;

        self.retry(point, FailureClass::of_positioner, || async move {
            positioner.move_to(point.azimuth, point.elevation).await?;
            let (azimuth, elevation) = positioner.current_position().await?;
            if (azimuth - point.azimuth).abs() > tolerance {
                return Err(PositionerError::StallDetected {
                    axis: Axis::Azimuth,
                });
            }
            if (elevation - point.elevation).abs() > tolerance {
                return Err(PositionerError::StallDetected {
                    axis: Axis::Elevation,
                });
            }
            Ok::<_, PositionerError>((azimuth, elevation))
        })
        .await
    }

    /// Measure one polarization, averaging the plan's number of sweeps.
    async fn measure(&self, point: &GridPoint, polarization: &Polarization) -> Attempt<Sweep> {
        let analyzer = &self.hardware.analyzer;
        let frequencies = self.plan.frequencies();
        let mut sums = vec![Complex64::new(0.0, 0.0); frequencies.len()];
        let mut valid = vec![true; frequencies.len()];

        for _ in 0..self.plan.averages() {
            let sweep = self
                .retry(point, FailureClass::of_instrument, || async move {
                    let values = analyzer.measure(frequencies, polarization).await?;
                    if values.len() != frequencies.len() {
                        return Err(InstrumentError::MalformedResponse(format!(
                            "expected {} values, got {}",
                            frequencies.len(),
                            values.len()
                        )));
                    }
                    Ok::<_, InstrumentError>(values)
                })
                .await;

            let values = match sweep {
                Attempt::Done(values) => values,
                Attempt::Cancelled => return Attempt::Cancelled,
                Attempt::Exhausted(exhausted) => return Attempt::Exhausted(exhausted),
            };
            for (i, value) in values.into_iter().enumerate() {
                if value.re.is_finite() && value.im.is_finite() {
                    sums[i] += value;
                } else {
                    valid[i] = false;
                }
            }
        }

        let count = f64::from(self.plan.averages());
        let values = sums
            .into_iter()
            .zip(&valid)
            .map(|(sum, &ok)| {
                if ok {
                    sum / count
                } else {
                    Complex64::new(f64::NAN, f64::NAN)
                }
            })
            .collect();

        Attempt::Done(Sweep {
            values,
            valid,
            captured_at: Utc::now(),
        })
    }

    /// Call `op` until it succeeds, the failure's class runs out of retries,
    /// or cancel is requested. A result arriving after cancel is discarded.
    async fn retry<T, E, F, Fut>(
        &self,
        point: &GridPoint,
        classify: fn(&E) -> FailureClass,
        mut op: F,
    ) -> Attempt<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut calls = 0u32;
        loop {
            calls += 1;
            let result = op().await;
            if self.cancel_requested() {
                return Attempt::Cancelled;
            }
            let err = match result {
                Ok(value) => return Attempt::Done(value),
                Err(err) => err,
            };

            let class = classify(&err);
            let rule = self.policy.rule(class);
            let retries_used = calls - 1;
            if retries_used >= rule.retries {
                warn!(
                    point = point.index,
                    ?class,
                    calls,
                    error = %err,
                    "Retries exhausted"
                );
                return Attempt::Exhausted(Exhausted {
                    class,
                    action: rule.on_exhaustion,
                    message: err.to_string(),
                    calls,
                });
            }

            let delay = rule.delay_for(retries_used + 1);
            warn!(
                point = point.index,
                ?class,
                attempt = calls,
                error = %err,
                ?delay,
                "Driver call failed, retrying"
            );
            if !self.sleep_unless_cancelled(delay).await {
                return Attempt::Cancelled;
            }
        }
    }

    fn cancel_requested(&self) -> bool {
        *self.control.borrow() == Control::Cancel
    }

    /// Sleep for `duration`. Returns false if cancel arrived first.
    async fn sleep_unless_cancelled(&self, duration: Duration) -> bool {
        if self.cancel_requested() {
            return false;
        }
        if duration.is_zero() {
            return true;
        }
        let mut control = self.control.clone();
        tokio::select! {
            _ = sleep(duration) => true,
            _ = async move {
                let sender_alive = control.wait_for(|c| *c == Control::Cancel).await.is_ok();
                if !sender_alive {
                    std::future::pending::<()>().await;
                }
            } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::{AngleRange, FrequencySpec};
    use crate::hardware::{SimulatedAnalyzer, SimulatedPositioner};
    use tracing_test::traced_test;

    fn hardware() -> (Arc<SimulatedPositioner>, Arc<SimulatedAnalyzer>, ScanHardware) {
        let positioner = Arc::new(SimulatedPositioner::new());
        let analyzer = Arc::new(SimulatedAnalyzer::new());
        let hardware = ScanHardware::new(positioner.clone(), analyzer.clone());
        (positioner, analyzer, hardware)
    }

    #[test]
    fn default_settings() {
        let settings = EngineSettings::default();
        assert_eq!(settings.arrival_tolerance_deg, 0.1);
        assert_eq!(settings.event_capacity, 256);
    }

    #[tokio::test]
    async fn invalid_plan_never_touches_hardware() {
        let (positioner, analyzer, hardware) = hardware();
        let engine = ScanEngine::default();
        let definition = PlanDefinition::new(
            AngleRange::new(0.0, 90.0, 0.0),
            AngleRange::fixed(0.0),
            FrequencySpec::list([1e9]),
        );

        let err = engine
            .start(definition, hardware, FaultPolicy::default())
            .err()
            .unwrap();
        assert!(matches!(err, ScanError::InvalidPlan(_)));
        assert_eq!(positioner.move_count(), 0);
        assert_eq!(analyzer.measure_count(), 0);
    }

    #[tokio::test]
    async fn completed_session_rejects_control() {
        let (_, _, hardware) = hardware();
        let engine = ScanEngine::default();
        let definition = PlanDefinition::new(
            AngleRange::fixed(0.0),
            AngleRange::fixed(0.0),
            FrequencySpec::list([1e9]),
        );
        let session = engine
            .start(definition, hardware, FaultPolicy::default())
            .unwrap();

        while !session.is_finished() {
            tokio::task::yield_now().await;
        }
        assert_eq!(session.state().await, SessionState::Completed);
        assert!(matches!(
            session.pause().await,
            Err(ScanError::InvalidTransition { operation: "pause", .. })
        ));
        assert!(session.resume().await.is_err());
        assert!(session.cancel().await.is_err());

        let outcome = session.wait().await.unwrap();
        assert_eq!(outcome.state, SessionState::Completed);
        assert!(outcome.fault.is_none());
        assert_eq!(outcome.dataset.len(), 1);
    }

    #[tokio::test]
    async fn remeasure_replaces_faulted_point() {
        let (positioner, _, hardware) = hardware();
        let engine = ScanEngine::default();
        let definition = PlanDefinition::new(
            AngleRange::new(0.0, 90.0, 90.0),
            AngleRange::fixed(0.0),
            FrequencySpec::list([1e9, 2e9]),
        );
        let policy = FaultPolicy::default().without_backoff();
        positioner
            .queue_failures(std::iter::repeat(PositionerError::Timeout).take(4))
            .await;

        let session = engine.start(definition, hardware, policy.clone()).unwrap();
        let mut outcome = session.wait().await.unwrap();
        assert_eq!(outcome.state, SessionState::Completed);
        assert!(outcome.dataset.point_fault(0.0, 0.0).is_some());
        assert!(!outcome.dataset.is_point_complete(0.0, 0.0));

        let fault = engine
            .remeasure_point(&mut outcome.dataset, 0.0, 0.0, &outcome.hardware, &policy)
            .await
            .unwrap();
        assert!(fault.is_none());
        assert!(outcome.dataset.is_point_complete(0.0, 0.0));
        assert!(outcome.dataset.point_fault(0.0, 0.0).is_none());
        assert_eq!(outcome.dataset.len(), 4);

        let err = engine
            .remeasure_point(&mut outcome.dataset, 45.0, 0.0, &outcome.hardware, &policy)
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::UnknownGridPoint { .. }));
    }

    #[tokio::test]
    async fn dropping_paused_session_stops_positioner() {
        let positioner = Arc::new(SimulatedPositioner::new().with_move_time(Duration::from_millis(20)));
        let hardware = ScanHardware::new(positioner.clone(), Arc::new(SimulatedAnalyzer::new()));
        let definition = PlanDefinition::new(
            AngleRange::new(0.0, 270.0, 90.0),
            AngleRange::fixed(0.0),
            FrequencySpec::list([1e9]),
        );
        let session = ScanEngine::default()
            .start(definition, hardware, FaultPolicy::default())
            .unwrap();
        let mut events = session.subscribe();
        session.pause().await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while events.recv().await.unwrap().state != SessionState::Paused {}
        })
        .await
        .unwrap();
        assert_eq!(positioner.stop_count(), 0);
        drop(session);

        tokio::time::timeout(Duration::from_secs(2), async {
            while events.recv().await.unwrap().state != SessionState::Aborted {}
        })
        .await
        .unwrap();
        assert!(positioner.stop_count() >= 1);
    }

    #[traced_test]
    #[tokio::test]
    async fn logs_retries_and_point_faults() {
        let (positioner, _, hardware) = hardware();
        let definition = PlanDefinition::new(
            AngleRange::new(0.0, 90.0, 90.0),
            AngleRange::fixed(0.0),
            FrequencySpec::list([1e9]),
        );
        positioner
            .queue_failures([PositionerError::Timeout, PositionerError::Timeout])
            .await;
        let mut policy = FaultPolicy::default();
        policy.positioning = crate::experiment::RetryPolicy::skip_after(1, Duration::ZERO);

        let outcome = ScanEngine::default()
            .start(definition, hardware, policy)
            .unwrap()
            .wait()
            .await
            .unwrap();

        assert_eq!(outcome.state, SessionState::Completed);
        assert!(logs_contain("Driver call failed, retrying"));
        assert!(logs_contain("Retries exhausted"));
        assert!(logs_contain("Point faulted"));
        assert!(logs_contain("Scan session finished"));
    }
}
