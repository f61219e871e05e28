use std::path::PathBuf;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SensorConfig;
use crate::error::{ViewerError, ViewerResult};
use crate::events::OrientationSample;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorSupport {
    Unsupported,
    Available,
    /// Available, but samples flow only after an explicit user request.
    PermissionRequired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Prompt,
    Granted,
    Denied,
}

/// Source of device orientation samples.
pub trait OrientationSensor: Send {
    fn query_support(&self) -> SensorSupport;

    /// Ask the user for access. Must be driven by a user gesture on platforms
    /// that gate the sensor.
    fn request_permission(&mut self) -> PermissionState;

    /// Start delivering samples into `tx`. The returned handle stops delivery
    /// when dropped.
    fn subscribe(&mut self, tx: Sender<OrientationSample>) -> ViewerResult<SensorSubscription>;
}

/// Live sample delivery. Dropping it cancels the producing task.
#[derive(Debug)]
pub struct SensorSubscription {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SensorSubscription {
    fn spawn<F>(cancel: CancellationToken, fut: F) -> Self
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        Self {
            cancel,
            task: Some(tokio::spawn(fut)),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(|t| t.is_finished())
    }

    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.task.take();
    }
}

impl Drop for SensorSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Build the sensor described by the configuration.
pub fn sensor_from_config(cfg: &SensorConfig) -> Box<dyn OrientationSensor> {
    if let Some(path) = &cfg.replay {
        return Box::new(ReplaySensor::new(path.clone(), cfg.sample_interval, cfg.requires_permission));
    }
    if cfg.synthetic {
        return Box::new(SyntheticSensor::new(
            cfg.sample_interval,
            cfg.synthetic_seed,
            cfg.requires_permission,
        ));
    }
    Box::new(NullSensor)
}

/// Parse a JSON-lines recording. Blank lines and `#` comments are skipped.
pub fn parse_recording(text: &str) -> ViewerResult<Vec<OrientationSample>> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|l| serde_json::from_str::<OrientationSample>(l).map_err(ViewerError::from))
        .collect()
}

/// Replays a recorded orientation trace at a fixed interval.
#[derive(Debug)]
pub struct ReplaySensor {
    path: PathBuf,
    interval: Duration,
    permission: PermissionState,
}

impl ReplaySensor {
    pub fn new(path: PathBuf, interval: Duration, requires_permission: bool) -> Self {
        Self {
            path,
            interval,
            permission: if requires_permission {
                PermissionState::Prompt
            } else {
                PermissionState::Granted
            },
        }
    }
}

impl OrientationSensor for ReplaySensor {
    fn query_support(&self) -> SensorSupport {
        match self.permission {
            PermissionState::Granted => SensorSupport::Available,
            PermissionState::Prompt | PermissionState::Denied => SensorSupport::PermissionRequired,
        }
    }

    fn request_permission(&mut self) -> PermissionState {
        // A recording has nobody to refuse the prompt.
        self.permission = PermissionState::Granted;
        self.permission
    }

    fn subscribe(&mut self, tx: Sender<OrientationSample>) -> ViewerResult<SensorSubscription> {
        if self.permission != PermissionState::Granted {
            return Err(ViewerError::PermissionDenied("device orientation"));
        }
        let text = std::fs::read_to_string(&self.path)?;
        let samples = parse_recording(&text)?;
        info!(
            path = %self.path.display(),
            samples = samples.len(),
            "replaying orientation recording"
        );
        let cancel = CancellationToken::new();
        let interval = self.interval;
        let token = cancel.clone();
        Ok(SensorSubscription::spawn(cancel, async move {
            let mut ticker = tokio::time::interval(interval);
            for sample in samples {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                if tx.send(sample).await.is_err() {
                    debug!("orientation receiver closed");
                    return;
                }
            }
            debug!("orientation recording exhausted");
        }))
    }
}

/// Generates a gentle handheld sway for demos without a recording.
#[derive(Debug)]
pub struct SyntheticSensor {
    interval: Duration,
    seed: Option<u64>,
    permission: PermissionState,
}

impl SyntheticSensor {
    pub fn new(interval: Duration, seed: Option<u64>, requires_permission: bool) -> Self {
        Self {
            interval,
            seed,
            permission: if requires_permission {
                PermissionState::Prompt
            } else {
                PermissionState::Granted
            },
        }
    }
}

/// Sample at `t` seconds with a small jitter.
pub fn sway_sample(t: f32, jitter: (f32, f32, f32)) -> OrientationSample {
    OrientationSample::new(
        crate::motion::wrap_degrees(20.0 + 6.0 * (t * 0.4).sin() + jitter.0),
        80.0 + 8.0 * (t * 0.7).sin() + jitter.1,
        10.0 * (t * 0.55).cos() + jitter.2,
    )
}

impl OrientationSensor for SyntheticSensor {
    fn query_support(&self) -> SensorSupport {
        match self.permission {
            PermissionState::Granted => SensorSupport::Available,
            PermissionState::Prompt | PermissionState::Denied => SensorSupport::PermissionRequired,
        }
    }

    fn request_permission(&mut self) -> PermissionState {
        self.permission = PermissionState::Granted;
        self.permission
    }

    fn subscribe(&mut self, tx: Sender<OrientationSample>) -> ViewerResult<SensorSubscription> {
        if self.permission != PermissionState::Granted {
            return Err(ViewerError::PermissionDenied("device orientation"));
        }
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let interval = self.interval;
        info!(interval_ms = interval.as_millis() as u64, "synthetic orientation started");
        Ok(SensorSubscription::spawn(cancel, async move {
            let mut ticker = tokio::time::interval(interval);
            let start = tokio::time::Instant::now();
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                let t = start.elapsed().as_secs_f32();
                let jitter = (
                    rng.random_range(-0.4..0.4),
                    rng.random_range(-0.3..0.3),
                    rng.random_range(-0.3..0.3),
                );
                if tx.send(sway_sample(t, jitter)).await.is_err() {
                    return;
                }
            }
        }))
    }
}

/// A device without an orientation sensor.
#[derive(Debug, Default)]
pub struct NullSensor;

impl OrientationSensor for NullSensor {
    fn query_support(&self) -> SensorSupport {
        SensorSupport::Unsupported
    }

    fn request_permission(&mut self) -> PermissionState {
        PermissionState::Denied
    }

    fn subscribe(&mut self, _tx: Sender<OrientationSample>) -> ViewerResult<SensorSubscription> {
        warn!("orientation requested on a device without a sensor");
        Err(ViewerError::CapabilityUnavailable("device orientation"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tokio::sync::mpsc;

    #[test]
    fn parses_recording_with_comments() {
        let text = "# heading trace\n{\"heading\": 350, \"tilt-forward-back\": 80, \"tilt-left-right\": 2}\n\n{\"heading\": 5, \"tilt-forward-back\": 81, \"tilt-left-right\": 1}\n";
        let samples = parse_recording(text).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].heading, 5.0);
    }

    #[test]
    fn malformed_line_is_rejected() {
        assert!(parse_recording("{\"heading\": }").is_err());
    }

    #[test]
    fn null_sensor_is_capability_absent() {
        let (tx, _rx) = mpsc::channel(1);
        let err = NullSensor.subscribe(tx).unwrap_err();
        assert_eq!(err.class(), crate::error::FailureClass::CapabilityAbsent);
    }

    #[tokio::test]
    async fn replay_requires_grant_when_gated() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{{\"heading\": 10, \"tilt-forward-back\": 0, \"tilt-left-right\": 0}}").unwrap();
        let mut sensor = ReplaySensor::new(file.path().to_path_buf(), Duration::from_millis(1), true);
        assert_eq!(sensor.query_support(), SensorSupport::PermissionRequired);
        let (tx, mut rx) = mpsc::channel(4);
        assert!(sensor.subscribe(tx.clone()).is_err());
        assert_eq!(sensor.request_permission(), PermissionState::Granted);
        let _sub = sensor.subscribe(tx).unwrap();
        let sample = rx.recv().await.unwrap();
        assert_eq!(sample.heading, 10.0);
    }

    #[tokio::test]
    async fn dropping_subscription_stops_delivery() {
        let mut sensor = SyntheticSensor::new(Duration::from_millis(1), Some(7), false);
        let (tx, mut rx) = mpsc::channel(1);
        let sub = sensor.subscribe(tx).unwrap();
        assert!(rx.recv().await.is_some());
        drop(sub);
        // The producer exits and drops its sender once cancelled.
        while rx.recv().await.is_some() {}
    }
}
