//! Capture thread: frame source → rectifier → latest slot

use image::GrayImage;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::rectify::{Rectification, RectificationFailure, Rectifier};
use crate::comm::LatestSlot;
use crate::{Error, Result};

/// A raw camera frame
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: GrayImage,
    pub captured_at: Instant,
}

/// Camera abstraction
///
/// `capture` blocks for at most `timeout` and returns `Ok(None)` when no
/// frame arrived in that window.
pub trait FrameSource: Send {
    fn name(&self) -> &str {
        "camera"
    }

    /// Check the device before the session starts
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn capture(&mut self, timeout: Duration) -> Result<Option<Frame>>;

    /// Release the device
    fn close(&mut self) {}
}

/// What the capture thread publishes for each frame
#[derive(Debug, Clone)]
pub enum SensedFrame {
    Rectified {
        image: GrayImage,
        captured_at: Instant,
    },
    Failed {
        reason: RectificationFailure,
        captured_at: Instant,
    },
}

impl SensedFrame {
    pub fn captured_at(&self) -> Instant {
        match self {
            Self::Rectified { captured_at, .. } | Self::Failed { captured_at, .. } => *captured_at,
        }
    }

    /// Rectified image, if rectification succeeded
    pub fn image(&self) -> Option<&GrayImage> {
        match self {
            Self::Rectified { image, .. } => Some(image),
            Self::Failed { .. } => None,
        }
    }
}

/// Capture thread counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureStats {
    /// Frames received from the source
    pub frames: u64,
    /// Frames rectified and published
    pub rectified: u64,
    /// Frames whose rectification failed (also published)
    pub rectification_failures: u64,
    /// Capture calls that timed out
    pub timeouts: u64,
    /// Capture calls that returned an error
    pub source_errors: u64,
}

/// Handle to a running capture thread
///
/// Dropping the handle stops and joins the thread.
pub struct CaptureHandle {
    running: Arc<AtomicBool>,
    stats: Arc<Mutex<CaptureStats>>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureHandle {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> CaptureStats {
        *self.stats.lock()
    }

    /// Ask the thread to finish its current capture and exit
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    /// Stop and wait for the thread to finish
    pub fn join(mut self) -> Result<CaptureStats> {
        self.shutdown()?;
        Ok(self.stats())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.stop();
        if let Some(handle) = self.thread.take() {
            handle
                .join()
                .map_err(|_| Error::Sensor("capture thread panicked".into()))?;
        }
        Ok(())
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::error!("{}", e);
        }
    }
}

/// Spawns the sensing thread
pub struct CaptureWorker;

impl CaptureWorker {
    /// Run `source` through `rectifier` on a new thread, publishing every
    /// frame (rectified or not) into `slot`
    pub fn spawn<S, R>(
        mut source: S,
        mut rectifier: R,
        slot: Arc<LatestSlot<SensedFrame>>,
        frame_timeout: Duration,
    ) -> CaptureHandle
    where
        S: FrameSource + 'static,
        R: Rectifier + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(Mutex::new(CaptureStats::default()));

        let running_clone = running.clone();
        let stats_clone = stats.clone();

        let thread = thread::spawn(move || {
            let name = source.name().to_owned();
            tracing::debug!(source = %name, "capture: started");

            while running_clone.load(Ordering::Relaxed) {
                match source.capture(frame_timeout) {
                    Ok(Some(frame)) => {
                        let sensed = match rectifier.rectify(&frame.image) {
                            Rectification::Rectified(image) => {
                                stats_clone.lock().rectified += 1;
                                SensedFrame::Rectified {
                                    image,
                                    captured_at: frame.captured_at,
                                }
                            }
                            Rectification::Failed(reason) => {
                                stats_clone.lock().rectification_failures += 1;
                                tracing::trace!(?reason, "capture: rectification failed");
                                SensedFrame::Failed {
                                    reason,
                                    captured_at: frame.captured_at,
                                }
                            }
                        };
                        stats_clone.lock().frames += 1;
                        slot.publish(sensed);
                    }
                    Ok(None) => {
                        stats_clone.lock().timeouts += 1;
                    }
                    Err(e) => {
                        stats_clone.lock().source_errors += 1;
                        tracing::warn!(source = %name, "capture: {}", e);
                        // Avoid spinning on a source that fails immediately
                        thread::sleep(frame_timeout);
                    }
                }
            }

            source.close();
            tracing::debug!(source = %name, "capture: stopped");
        });

        CaptureHandle {
            running,
            stats,
            thread: Some(thread),
        }
    }
}
