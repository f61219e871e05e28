use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::RgbaImage;
use tokio::select;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::{CameraConfig, CameraPermission};
use crate::error::{ViewerError, ViewerResult};
use crate::events::CameraFrame;

/// A device camera delivering decoded frames.
pub trait CameraSource: Send {
    /// Whether every new frame is announced, so rendering can follow the
    /// camera instead of a fixed interval.
    fn delivers_frame_callbacks(&self) -> bool;

    fn start(&mut self, tx: Sender<CameraFrame>) -> ViewerResult<CameraStream>;
}

/// A running camera. Stopping releases the device; dropping stops it too.
#[derive(Debug)]
pub struct CameraStream {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl CameraStream {
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The feed delivered its last frame or was stopped.
    pub fn is_finished(&self) -> bool {
        self.is_stopped() || self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Idempotent.
    pub fn stop(&mut self) {
        if !self.cancel.is_cancelled() {
            debug!("camera stream stopping");
        }
        self.cancel.cancel();
        self.task.take();
    }
}

impl Drop for CameraStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub fn camera_from_config(cfg: &CameraConfig) -> Box<dyn CameraSource> {
    match (&cfg.source, cfg.permission) {
        (_, CameraPermission::Denied) => Box::new(DeniedCamera),
        (None, _) => Box::new(NoCamera),
        (Some(source), CameraPermission::Granted) => Box::new(FileCamera::new(
            source.clone(),
            cfg.frames_per_second,
            cfg.loop_frames,
        )),
    }
}

fn is_image(p: &Path) -> bool {
    matches!(
        p.extension()
            .and_then(OsStr::to_str)
            .map(|s| s.to_ascii_lowercase()),
        Some(ref e) if ["jpg", "jpeg", "png", "webp"].contains(&e.as_str())
    )
}

/// Image files under `source`, sorted by path. A file is its own single frame.
pub fn discover_frames(source: &Path) -> Vec<PathBuf> {
    if source.is_file() {
        return vec![source.to_path_buf()];
    }
    let mut frames: Vec<PathBuf> = WalkDir::new(source)
        .follow_links(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| is_image(p))
        .collect();
    frames.sort();
    frames
}

fn decode_rgba8(path: &Path) -> anyhow::Result<RgbaImage> {
    let img = image::ImageReader::open(path)?
        .with_guessed_format()?
        .decode()?;
    Ok(img.to_rgba8())
}

/// Plays a still image or a directory of frames as the camera feed.
#[derive(Debug)]
pub struct FileCamera {
    source: PathBuf,
    interval: Duration,
    loop_frames: bool,
}

impl FileCamera {
    pub fn new(source: PathBuf, frames_per_second: f32, loop_frames: bool) -> Self {
        let fps = if frames_per_second > 0.0 { frames_per_second } else { 30.0 };
        Self {
            source,
            interval: Duration::from_secs_f32(1.0 / fps),
            loop_frames,
        }
    }

    fn is_still(&self) -> bool {
        self.source.is_file()
    }
}

impl CameraSource for FileCamera {
    fn delivers_frame_callbacks(&self) -> bool {
        !self.is_still()
    }

    fn start(&mut self, tx: Sender<CameraFrame>) -> ViewerResult<CameraStream> {
        let frames = discover_frames(&self.source);
        if frames.is_empty() {
            return Err(ViewerError::Setup(format!(
                "no camera frames under {}",
                self.source.display()
            )));
        }
        info!(
            source = %self.source.display(),
            frames = frames.len(),
            "camera stream starting"
        );
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let interval = self.interval;
        let repeat = self.loop_frames && frames.len() > 1;
        let task = tokio::spawn(async move {
            run_frames(frames, interval, repeat, tx, token).await;
        });
        Ok(CameraStream {
            cancel,
            task: Some(task),
        })
    }
}

async fn run_frames(
    frames: Vec<PathBuf>,
    interval: Duration,
    repeat: bool,
    tx: Sender<CameraFrame>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut sequence = 0u64;
    loop {
        for path in &frames {
            select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            let p = path.clone();
            let decoded = tokio::task::spawn_blocking(move || decode_rgba8(&p)).await;
            let image = match decoded {
                Ok(Ok(image)) => image,
                Ok(Err(err)) => {
                    warn!(path = %path.display(), error = %err, "camera frame dropped");
                    continue;
                }
                Err(err) => {
                    warn!(error = %err, "camera decode task failed");
                    continue;
                }
            };
            sequence += 1;
            let frame = CameraFrame {
                sequence,
                captured_at: Instant::now(),
                image: Arc::new(image),
            };
            select! {
                _ = cancel.cancelled() => return,
                res = tx.send(frame) => {
                    if res.is_err() {
                        debug!("camera receiver closed");
                        return;
                    }
                }
            }
        }
        if !repeat {
            debug!(frames = sequence, "camera stream finished");
            return;
        }
    }
}

/// The user refused camera access.
#[derive(Debug, Default)]
pub struct DeniedCamera;

impl CameraSource for DeniedCamera {
    fn delivers_frame_callbacks(&self) -> bool {
        false
    }

    fn start(&mut self, _tx: Sender<CameraFrame>) -> ViewerResult<CameraStream> {
        Err(ViewerError::PermissionDenied("camera"))
    }
}

/// A device without a camera.
#[derive(Debug, Default)]
pub struct NoCamera;

impl CameraSource for NoCamera {
    fn delivers_frame_callbacks(&self) -> bool {
        false
    }

    fn start(&mut self, _tx: Sender<CameraFrame>) -> ViewerResult<CameraStream> {
        Err(ViewerError::CapabilityUnavailable("camera"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureClass;
    use image::Rgba;
    use tokio::sync::mpsc;

    #[test]
    fn discovers_sorted_images_only() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.png", "a.png", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let frames = discover_frames(dir.path());
        let names: Vec<_> = frames
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.png", "b.png"]);
    }

    #[test]
    fn denied_and_missing_cameras_are_classified() {
        let (tx, _rx) = mpsc::channel(1);
        assert_eq!(
            DeniedCamera.start(tx.clone()).unwrap_err().class(),
            FailureClass::PermissionDenied
        );
        assert_eq!(
            NoCamera.start(tx).unwrap_err().class(),
            FailureClass::CapabilityAbsent
        );
    }

    #[tokio::test]
    async fn streams_directory_frames_in_order() {
        let dir = tempfile::tempdir().unwrap();
        RgbaImage::from_pixel(4, 4, Rgba([255, 0, 0, 255]))
            .save(dir.path().join("0001.png"))
            .unwrap();
        RgbaImage::from_pixel(4, 4, Rgba([0, 255, 0, 255]))
            .save(dir.path().join("0002.png"))
            .unwrap();
        let mut camera = FileCamera::new(dir.path().to_path_buf(), 200.0, false);
        assert!(camera.delivers_frame_callbacks());
        let (tx, mut rx) = mpsc::channel(4);
        let stream = camera.start(tx).unwrap();
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(first.image.get_pixel(0, 0)[0], 255);
        assert_eq!(second.image.get_pixel(0, 0)[1], 255);
        assert!(rx.recv().await.is_none());
        // Without looping the feed ends after the last frame.
        tokio::time::timeout(Duration::from_secs(5), async {
            while !stream.is_finished() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
        assert!(!stream.is_stopped());
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let still = dir.path().join("still.png");
        RgbaImage::from_pixel(2, 2, Rgba([1, 1, 1, 255]))
            .save(&still)
            .unwrap();
        let mut camera = FileCamera::new(still, 30.0, true);
        assert!(!camera.delivers_frame_callbacks());
        let (tx, _rx) = mpsc::channel(1);
        let mut stream = camera.start(tx).unwrap();
        stream.stop();
        stream.stop();
        assert!(stream.is_stopped());
        assert!(stream.is_finished());
    }
}
