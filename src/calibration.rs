//! Multi-phase pointer calibration.
//!
//! Calibration runs forward through the browser, recorder and player phases.
//! Each phase collects one normalized sample per target point and submits the
//! full set through the [`TaskLauncher`] before the backend opens the next
//! phase.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::ClientError;
use crate::launcher::TaskLauncher;
use crate::notify::{notify_error, NotificationKind, NotificationSink};
use crate::task::{TaskRequest, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CalibrationPhase {
    Browser,
    Recorder,
    Player,
}

impl CalibrationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Browser => "browser",
            Self::Recorder => "recorder",
            Self::Player => "player",
        }
    }

    pub fn next(&self) -> Option<Self> {
        match self {
            Self::Browser => Some(Self::Recorder),
            Self::Recorder => Some(Self::Player),
            Self::Player => None,
        }
    }

    /// Endpoint that asks the backend to open this phase.
    pub fn trigger_path(&self) -> Option<&'static str> {
        match self {
            Self::Browser => None,
            Self::Recorder => Some("/start_recorder_calibration"),
            Self::Player => Some("/start_player_calibration"),
        }
    }
}

impl fmt::Display for CalibrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationState {
    Collecting(CalibrationPhase),
    Done,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TargetPoint {
    pub label: String,
    pub x: f64,
    pub y: f64,
}

impl TargetPoint {
    pub fn new(label: impl Into<String>, x: f64, y: f64) -> Self {
        Self {
            label: label.into(),
            x,
            y,
        }
    }
}

/// Corners clockwise from the top left, then the center.
pub fn default_target_points() -> Vec<TargetPoint> {
    vec![
        TargetPoint::new("Top Left", 0.0, 0.0),
        TargetPoint::new("Top Right", 1.0, 0.0),
        TargetPoint::new("Bottom Right", 1.0, 1.0),
        TargetPoint::new("Bottom Left", 0.0, 1.0),
        TargetPoint::new("Center", 0.5, 0.5),
    ]
}

/// Capture surface bounding box in client coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl SurfaceRect {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.width / self.height
    }

    /// Maps client coordinates onto the surface, clamped into `[0, 1]`.
    pub fn normalize(&self, x: f64, y: f64) -> Result<CalibrationSample, ClientError> {
        let geometry = [self.left, self.top, self.width, self.height];
        if geometry.iter().any(|value| !value.is_finite()) || self.width <= 0.0 || self.height <= 0.0 {
            return Err(ClientError::validation(
                "capture surface must have a positive, finite size",
            ));
        }
        if !x.is_finite() || !y.is_finite() {
            return Err(ClientError::validation("pointer coordinates must be finite"));
        }
        Ok(CalibrationSample {
            x: ((x - self.left) / self.width).clamp(0.0, 1.0),
            y: ((y - self.top) / self.height).clamp(0.0, 1.0),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationSample {
    pub x: f64,
    pub y: f64,
}

impl CalibrationSample {
    pub fn is_normalized(&self) -> bool {
        (0.0..=1.0).contains(&self.x) && (0.0..=1.0).contains(&self.y)
    }
}

pub struct CalibrationMachine {
    launcher: Arc<TaskLauncher>,
    sink: Arc<dyn NotificationSink>,
    state: CalibrationState,
    targets: Vec<TargetPoint>,
    samples: Vec<CalibrationSample>,
    aspect_ratio: Option<f64>,
    handoff_url: Option<String>,
}

impl fmt::Debug for CalibrationMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CalibrationMachine")
            .field("state", &self.state)
            .field("samples", &self.samples)
            .field("handoff_url", &self.handoff_url)
            .finish_non_exhaustive()
    }
}

impl CalibrationMachine {
    pub fn new(launcher: Arc<TaskLauncher>, sink: Arc<dyn NotificationSink>) -> Self {
        Self::with_targets(launcher, sink, default_target_points())
    }

    pub fn with_targets(
        launcher: Arc<TaskLauncher>,
        sink: Arc<dyn NotificationSink>,
        targets: Vec<TargetPoint>,
    ) -> Self {
        Self {
            launcher,
            sink,
            state: CalibrationState::Collecting(CalibrationPhase::Browser),
            targets,
            samples: Vec::new(),
            aspect_ratio: None,
            handoff_url: None,
        }
    }

    pub fn state(&self) -> CalibrationState {
        self.state
    }

    pub fn phase(&self) -> Option<CalibrationPhase> {
        match self.state {
            CalibrationState::Collecting(phase) => Some(phase),
            CalibrationState::Done => None,
        }
    }

    pub fn targets(&self) -> &[TargetPoint] {
        &self.targets
    }

    pub fn samples(&self) -> &[CalibrationSample] {
        &self.samples
    }

    /// The target the next sample is recorded against.
    pub fn current_target(&self) -> Option<&TargetPoint> {
        self.phase()?;
        self.targets.get(self.samples.len())
    }

    /// URL the backend returned when it opened the current phase.
    pub fn handoff_url(&self) -> Option<&str> {
        self.handoff_url.as_deref()
    }

    pub fn is_phase_ready(&self) -> bool {
        self.phase().is_some() && !self.targets.is_empty() && self.samples.len() == self.targets.len()
    }

    /// Records a pointer position in client coordinates against `surface`.
    /// Returns the number of samples collected in the current phase.
    pub fn record_sample(
        &mut self,
        pointer: (f64, f64),
        surface: &SurfaceRect,
    ) -> Result<usize, ClientError> {
        let Some(phase) = self.phase() else {
            return Err(ClientError::validation("calibration is already complete"));
        };
        if self.samples.len() >= self.targets.len() {
            return Err(ClientError::validation(format!(
                "{phase} phase already has all {} samples",
                self.targets.len()
            )));
        }

        let sample = surface.normalize(pointer.0, pointer.1)?;
        self.samples.push(sample);
        self.aspect_ratio = Some(surface.aspect_ratio());
        debug!(phase = %phase, index = self.samples.len(), x = sample.x, y = sample.y, "calibration sample recorded");
        Ok(self.samples.len())
    }

    /// Submits the current phase once every target has a sample, then opens
    /// the next phase. On any failure the phase and its samples are kept.
    pub async fn submit_phase(&mut self) -> Result<CalibrationState, ClientError> {
        let phase = match self.ready_phase() {
            Ok(phase) => phase,
            Err(error) => {
                notify_error(self.sink.as_ref(), &error);
                return Err(error);
            }
        };

        let request = TaskRequest::Calibration {
            phase,
            samples: self.samples.clone(),
            aspect_ratio: self.aspect_ratio.unwrap_or(1.0),
        };
        let task = self.launcher.start_task(request).await?;
        self.launcher.finish(&task.id, TaskStatus::Completed);

        let Some(next) = phase.next() else {
            self.state = CalibrationState::Done;
            self.samples.clear();
            self.handoff_url = None;
            info!("calibration complete");
            self.sink
                .notify(NotificationKind::Success, "Calibration complete");
            return Ok(self.state);
        };

        let handoff_url = match self.launcher.open_calibration_phase(next).await {
            Ok(url) => url,
            Err(error) => {
                notify_error(self.sink.as_ref(), &error);
                return Err(error);
            }
        };

        self.state = CalibrationState::Collecting(next);
        self.samples.clear();
        self.handoff_url = handoff_url;
        info!(phase = %phase, next = %next, "calibration phase submitted");
        self.sink.notify(
            NotificationKind::Info,
            &format!("Calibration phase '{phase}' saved; continue with '{next}'"),
        );
        Ok(self.state)
    }

    fn ready_phase(&self) -> Result<CalibrationPhase, ClientError> {
        let Some(phase) = self.phase() else {
            return Err(ClientError::validation("calibration is already complete"));
        };
        if !self.is_phase_ready() {
            return Err(ClientError::validation(format!(
                "{phase} phase needs {} samples, has {}",
                self.targets.len(),
                self.samples.len()
            )));
        }
        Ok(phase)
    }

    /// Discards the samples of the current phase without submitting them.
    pub fn cancel(&mut self) -> usize {
        let discarded = self.samples.len();
        self.samples.clear();
        if discarded > 0 {
            debug!(discarded, "calibration samples discarded");
        }
        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::{default_target_points, CalibrationPhase, SurfaceRect};
    use crate::error::ClientError;

    #[test]
    fn normalization_is_relative_to_surface_and_clamped() {
        let surface = SurfaceRect::new(100.0, 50.0, 1280.0, 720.0);

        let center = surface.normalize(740.0, 410.0).expect("inside");
        assert_eq!((center.x, center.y), (0.5, 0.5));

        let outside = surface.normalize(0.0, 2000.0).expect("outside still maps");
        assert_eq!((outside.x, outside.y), (0.0, 1.0));
    }

    #[test]
    fn degenerate_surfaces_and_pointers_are_rejected() {
        let flat = SurfaceRect::new(0.0, 0.0, 1280.0, 0.0);
        assert!(matches!(flat.normalize(1.0, 1.0), Err(ClientError::Validation(_))));

        let surface = SurfaceRect::new(0.0, 0.0, 10.0, 10.0);
        assert!(matches!(
            surface.normalize(f64::NAN, 1.0),
            Err(ClientError::Validation(_))
        ));
    }

    #[test]
    fn phases_advance_forward_only() {
        assert_eq!(CalibrationPhase::Browser.next(), Some(CalibrationPhase::Recorder));
        assert_eq!(CalibrationPhase::Recorder.next(), Some(CalibrationPhase::Player));
        assert_eq!(CalibrationPhase::Player.next(), None);
        assert_eq!(CalibrationPhase::Browser.trigger_path(), None);
        assert_eq!(
            CalibrationPhase::Player.trigger_path(),
            Some("/start_player_calibration")
        );
    }

    #[test]
    fn default_targets_are_corners_then_center() {
        let labels: Vec<String> = default_target_points()
            .into_iter()
            .map(|target| target.label)
            .collect();
        assert_eq!(
            labels,
            ["Top Left", "Top Right", "Bottom Right", "Bottom Left", "Center"]
        );
    }
}
