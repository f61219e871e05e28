//! Gallery persistence and user-facing downloads for captured frames.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use image::{ImageFormat, RgbaImage};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::CaptureConfig;
use crate::error::{ViewerError, ViewerResult};
use crate::events::Captured;

const DATA_URL_PREFIX: &str = "data:image/png;base64,";
const INDEX_FILE: &str = "gallery.jsonl";

/// One stored capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureEntry {
    pub id: u64,
    pub image_data_url: String,
    pub created_at: DateTime<Utc>,
    pub session_token: String,
}

impl CaptureEntry {
    pub fn png_bytes(&self) -> Option<Vec<u8>> {
        decode_data_url(&self.image_data_url)
    }
}

pub fn encode_png(image: &RgbaImage) -> ViewerResult<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

pub fn to_data_url(png: &[u8]) -> String {
    format!("{DATA_URL_PREFIX}{}", STANDARD.encode(png))
}

pub fn decode_data_url(url: &str) -> Option<Vec<u8>> {
    let payload = url.strip_prefix(DATA_URL_PREFIX)?;
    STANDARD.decode(payload).ok()
}

/// Append-only list of captures stored as JSON lines.
#[derive(Debug)]
pub struct Gallery {
    index: PathBuf,
    next_id: u64,
}

impl Gallery {
    pub fn open(dir: &Path) -> ViewerResult<Self> {
        fs::create_dir_all(dir)?;
        let index = dir.join(INDEX_FILE);
        let mut gallery = Self { index, next_id: 1 };
        let last = gallery.list()?.last().map_or(0, |e| e.id);
        gallery.next_id = last + 1;
        Ok(gallery)
    }

    pub fn append(&mut self, png: &[u8], session_token: &str) -> ViewerResult<CaptureEntry> {
        let entry = CaptureEntry {
            id: self.next_id,
            image_data_url: to_data_url(png),
            created_at: Utc::now(),
            session_token: session_token.to_string(),
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.index)?;
        file.write_all(line.as_bytes())?;
        self.next_id += 1;
        Ok(entry)
    }

    /// Entries in insertion order. Unreadable lines are skipped.
    pub fn list(&self) -> ViewerResult<Vec<CaptureEntry>> {
        let file = match fs::File::open(&self.index) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut entries = Vec::new();
        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<CaptureEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(err) => warn!(line = lineno + 1, error = %err, "skipping gallery entry"),
            }
        }
        Ok(entries)
    }

    /// Remove every entry. Ids keep increasing.
    pub fn clear(&mut self) -> ViewerResult<()> {
        match fs::remove_file(&self.index) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Writes PNGs under a suggested name without overwriting existing files.
#[derive(Debug, Clone)]
pub struct Downloads {
    dir: PathBuf,
    file_name: String,
}

impl Downloads {
    pub fn new(dir: PathBuf, file_name: String) -> Self {
        Self { dir, file_name }
    }

    pub fn save(&self, png: &[u8]) -> ViewerResult<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let suggested = Path::new(&self.file_name);
        let stem = suggested
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("capture");
        let ext = suggested.extension().and_then(|s| s.to_str()).unwrap_or("png");
        for n in 0u32.. {
            let name = if n == 0 {
                format!("{stem}.{ext}")
            } else {
                format!("{stem}-{n}.{ext}")
            };
            let path = self.dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => {
                    write_or_remove(&path, file, png)?;
                    return Ok(path);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(ViewerError::Setup("no free download name".into()))
    }
}

/// Write `bytes` to the freshly created `path`, deleting it again when the
/// write fails so no truncated file takes the name.
fn write_or_remove(path: &Path, mut out: impl Write, bytes: &[u8]) -> ViewerResult<()> {
    if let Err(err) = out.write_all(bytes).and_then(|()| out.flush()) {
        drop(out);
        if let Err(rm) = fs::remove_file(path) {
            warn!(path = %path.display(), error = %rm, "failed to remove partial download");
        }
        return Err(err.into());
    }
    Ok(())
}

/// Stores captured frames in the gallery and offers them as a download.
#[derive(Debug)]
pub struct CaptureSink {
    gallery: Gallery,
    downloads: Option<Downloads>,
    session_token: String,
}

impl CaptureSink {
    pub fn new(cfg: &CaptureConfig, session_token: impl Into<String>) -> ViewerResult<Self> {
        Ok(Self {
            gallery: Gallery::open(&cfg.gallery_dir)?,
            downloads: Some(Downloads::new(cfg.download_dir.clone(), cfg.file_name.clone())),
            session_token: session_token.into(),
        })
    }

    /// A sink that only records to the gallery.
    pub fn gallery_only(gallery: Gallery, session_token: impl Into<String>) -> Self {
        Self {
            gallery,
            downloads: None,
            session_token: session_token.into(),
        }
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    pub fn store(&mut self, image: &RgbaImage) -> ViewerResult<Captured> {
        let png = encode_png(image)?;
        let entry = self.gallery.append(&png, &self.session_token)?;
        let download = match &self.downloads {
            Some(d) => Some(d.save(&png)?),
            None => None,
        };
        info!(
            id = entry.id,
            bytes = png.len(),
            download = ?download,
            "capture stored"
        );
        Ok(Captured {
            id: entry.id,
            download,
        })
    }
}

/// Runs [`CaptureSink::store`] on the blocking pool so PNG encoding and file
/// writes stay off the render loop. Results arrive in completion order.
#[derive(Debug)]
pub struct CaptureWriter {
    sink: Arc<Mutex<CaptureSink>>,
    done_tx: mpsc::UnboundedSender<ViewerResult<Captured>>,
    done_rx: mpsc::UnboundedReceiver<ViewerResult<Captured>>,
    in_flight: usize,
}

impl CaptureWriter {
    pub fn new(sink: CaptureSink) -> Self {
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        Self {
            sink: Arc::new(Mutex::new(sink)),
            done_tx,
            done_rx,
            in_flight: 0,
        }
    }

    /// Queue `still` for storage. Must be called inside a tokio runtime.
    pub fn submit(&mut self, still: RgbaImage) {
        let sink = Arc::clone(&self.sink);
        let done = self.done_tx.clone();
        self.in_flight += 1;
        tokio::task::spawn_blocking(move || {
            let result = sink
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .store(&still);
            if done.send(result).is_err() {
                debug!("capture writer dropped before store finished");
            }
        });
    }

    /// Stores submitted but not yet collected.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Finished stores, without waiting.
    pub fn try_collect(&mut self) -> Vec<ViewerResult<Captured>> {
        let mut done = Vec::new();
        while let Ok(result) = self.done_rx.try_recv() {
            self.in_flight = self.in_flight.saturating_sub(1);
            done.push(result);
        }
        done
    }

    /// Wait until every submitted store has finished.
    pub async fn drain(&mut self) -> Vec<ViewerResult<Captured>> {
        let mut done = self.try_collect();
        while self.in_flight > 0 {
            let Some(result) = self.done_rx.recv().await else {
                break;
            };
            self.in_flight -= 1;
            done.push(result);
        }
        done
    }

    pub fn gallery_entries(&self) -> ViewerResult<Vec<CaptureEntry>> {
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .gallery()
            .list()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use tempfile::tempdir;

    #[test]
    fn data_url_round_trips_png() {
        let img = RgbaImage::from_pixel(3, 2, Rgba([1, 2, 3, 4]));
        let png = encode_png(&img).unwrap();
        let url = to_data_url(&png);
        assert!(url.starts_with("data:image/png;base64,"));
        let back = image::load_from_memory(&decode_data_url(&url).unwrap()).unwrap();
        assert_eq!(back.to_rgba8(), img);
    }

    #[test]
    fn gallery_lists_in_insertion_order_and_survives_reopen() {
        let dir = tempdir().unwrap();
        let mut g = Gallery::open(dir.path()).unwrap();
        g.append(b"first", "tok").unwrap();
        g.append(b"second", "tok").unwrap();
        let reopened = Gallery::open(dir.path()).unwrap();
        let entries = reopened.list().unwrap();
        assert_eq!(entries.iter().map(|e| e.id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(entries[1].png_bytes().unwrap(), b"second");
        assert_eq!(entries[0].session_token, "tok");
    }

    #[test]
    fn clear_empties_gallery() {
        let dir = tempdir().unwrap();
        let mut g = Gallery::open(dir.path()).unwrap();
        g.append(b"x", "t").unwrap();
        g.clear().unwrap();
        g.clear().unwrap();
        assert!(g.list().unwrap().is_empty());
        assert_eq!(g.append(b"y", "t").unwrap().id, 2);
    }

    #[test]
    fn downloads_never_overwrite() {
        let dir = tempdir().unwrap();
        let d = Downloads::new(dir.path().to_path_buf(), "myreal-ar.png".into());
        let a = d.save(b"a").unwrap();
        let b = d.save(b"b").unwrap();
        assert_eq!(a.file_name().unwrap(), "myreal-ar.png");
        assert_eq!(b.file_name().unwrap(), "myreal-ar-1.png");
        assert_eq!(fs::read(&a).unwrap(), b"a");
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failed_download_write_leaves_no_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("myreal-ar.png");
        fs::write(&path, b"").unwrap();
        assert!(write_or_remove(&path, BrokenPipe, b"png").is_err());
        assert!(!path.exists());
        let d = Downloads::new(dir.path().to_path_buf(), "myreal-ar.png".into());
        assert_eq!(d.save(b"ok").unwrap().file_name().unwrap(), "myreal-ar.png");
    }

    #[tokio::test]
    async fn writer_stores_off_thread_and_drains() {
        let dir = tempdir().unwrap();
        let sink = CaptureSink::gallery_only(Gallery::open(dir.path()).unwrap(), "tok");
        let mut writer = CaptureWriter::new(sink);
        writer.submit(RgbaImage::from_pixel(2, 2, Rgba([9, 9, 9, 255])));
        writer.submit(RgbaImage::from_pixel(2, 2, Rgba([7, 7, 7, 255])));
        assert_eq!(writer.in_flight(), 2);
        let done = writer.drain().await;
        assert_eq!(done.len(), 2);
        assert!(done.iter().all(Result::is_ok));
        assert_eq!(writer.in_flight(), 0);
        assert_eq!(writer.gallery_entries().unwrap().len(), 2);
    }
}
