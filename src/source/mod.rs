//! Frame sources.
//!
//! A `FrameSource` owns the connection to one video source and produces raw
//! RGB frames. Sources available:
//! - `stub://<name>` synthetic frames (always available, used in tests)
//! - `http(s)://` MJPEG streams (feature: ingest-mjpeg)
//!
//! Sources report their own health; the capture loop forces a reconnect
//! cycle when a source stops being healthy. Sources never see the bus or
//! the stats surface - rate gating and handoff belong to the capture layer.

#[cfg(feature = "ingest-mjpeg")]
pub mod mjpeg;
pub mod synthetic;

#[cfg(feature = "ingest-mjpeg")]
pub use mjpeg::MjpegSource;
pub use synthetic::SyntheticSource;

use anyhow::{anyhow, Result};

/// One decoded frame as produced by a source, at native resolution.
#[derive(Clone, Debug)]
pub struct SourceFrame {
    /// RGB8, `width * height * 3` bytes.
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Connection lifecycle and frame production for a single video source.
pub trait FrameSource: Send {
    /// (Re)establish the underlying connection. Called again after health
    /// loss; implementations must tolerate repeated calls.
    fn connect(&mut self) -> Result<()>;

    /// Read the next frame. Errors are transient from the capture loop's
    /// point of view; persistent trouble should surface via `is_healthy`.
    fn read_frame(&mut self) -> Result<SourceFrame>;

    /// Native frame rate, used to derive the frame-skip ratio. Sources that
    /// cannot know their producer's rate report the requested target rate,
    /// clamping the skip ratio to 1.
    fn native_fps(&self) -> f64;

    /// False forces the capture loop into a reconnect cycle.
    fn is_healthy(&self) -> bool;

    /// Release the underlying capture resource.
    fn close(&mut self) {}
}

/// Open a source for a URI. `fps_hint` is the stream's target rate, passed
/// to sources that cannot discover a native rate themselves.
pub fn open_source(uri: &str, fps_hint: u32) -> Result<Box<dyn FrameSource>> {
    if let Some(name) = uri.strip_prefix("stub://") {
        return Ok(Box::new(SyntheticSource::new(name, fps_hint)));
    }
    if uri.starts_with("http://") || uri.starts_with("https://") {
        #[cfg(feature = "ingest-mjpeg")]
        {
            return Ok(Box::new(mjpeg::MjpegSource::new(uri, fps_hint)?));
        }
        #[cfg(not(feature = "ingest-mjpeg"))]
        {
            return Err(anyhow!(
                "http sources require the ingest-mjpeg feature: {}",
                uri
            ));
        }
    }
    Err(anyhow!("unsupported source uri scheme: {}", uri))
}
