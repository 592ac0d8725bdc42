//! HTTP MJPEG frame source (feature: ingest-mjpeg).
//!
//! Ingests multipart MJPEG streams (IP cameras, ESP32-class boards) or
//! single-JPEG snapshot endpoints. JPEG decode happens in memory via the
//! `image` crate; frames are delivered at whatever rate the camera pushes,
//! with rate gating left to the capture layer.

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::time::{Duration, Instant};

use url::Url;

use super::{FrameSource, SourceFrame};

/// Upper bound for a single JPEG; anything larger is a corrupt stream.
const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;

pub struct MjpegSource {
    url: String,
    fps_hint: u32,
    stream: Option<HttpStream>,
    connected_at: Option<Instant>,
    last_frame_at: Option<Instant>,
}

enum HttpStream {
    Mjpeg(MjpegStream),
    SingleJpeg,
}

impl MjpegSource {
    pub fn new(uri: &str, fps_hint: u32) -> Result<Self> {
        let url = Url::parse(uri).context("parse mjpeg url")?;
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(anyhow!("unsupported mjpeg scheme '{}'", other)),
        }
        Ok(Self {
            url: uri.to_string(),
            fps_hint: fps_hint.max(1),
            stream: None,
            connected_at: None,
            last_frame_at: None,
        })
    }

    fn health_grace(&self) -> Duration {
        let base_ms = (1000 / self.fps_hint).saturating_mul(6);
        Duration::from_millis(base_ms.max(2_000) as u64)
    }
}

impl FrameSource for MjpegSource {
    fn connect(&mut self) -> Result<()> {
        let response = ureq::get(&self.url)
            .call()
            .context("connect to mjpeg http stream")?;
        let content_type = response.header("Content-Type").unwrap_or("");
        if content_type.to_lowercase().contains("multipart") {
            let reader = response.into_reader();
            self.stream = Some(HttpStream::Mjpeg(MjpegStream::new(reader)));
        } else {
            self.stream = Some(HttpStream::SingleJpeg);
        }
        self.connected_at = Some(Instant::now());
        self.last_frame_at = None;
        log::info!("MjpegSource: connected to {}", self.url);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<SourceFrame> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| anyhow!("mjpeg source not connected; call connect() first"))?;

        let jpeg_bytes = match stream {
            HttpStream::Mjpeg(stream) => stream.read_next_jpeg(),
            HttpStream::SingleJpeg => fetch_single_jpeg(&self.url),
        }?;

        let (pixels, width, height) = decode_jpeg(&jpeg_bytes)?;
        self.last_frame_at = Some(Instant::now());
        Ok(SourceFrame {
            pixels,
            width,
            height,
        })
    }

    fn native_fps(&self) -> f64 {
        // Push streams do not advertise a rate; report the target so the
        // skip ratio clamps to 1 and only the interval gate applies.
        self.fps_hint as f64
    }

    fn is_healthy(&self) -> bool {
        let Some(connected_at) = self.connected_at else {
            return false;
        };
        if self.stream.is_none() {
            return false;
        }
        match self.last_frame_at {
            Some(last) => last.elapsed() <= self.health_grace(),
            None => connected_at.elapsed() <= Duration::from_secs(5),
        }
    }

    fn close(&mut self) {
        self.stream = None;
        self.connected_at = None;
    }
}

struct MjpegStream {
    reader: Box<dyn Read + Send>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    fn new(reader: Box<dyn Read + Send>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    fn read_next_jpeg(&mut self) -> Result<Vec<u8>> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(frame);
            }

            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Err(anyhow!("mjpeg stream ended"));
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                // Keep the tail in case a marker straddles the cut.
                let keep = 2.min(self.buffer.len());
                let drain_len = self.buffer.len() - keep;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

/// Locate one complete JPEG (SOI..EOI inclusive) in the buffer.
fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end_rel = buffer[start..].windows(2).position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + end_rel + 2))
}

fn fetch_single_jpeg(url: &str) -> Result<Vec<u8>> {
    let response = ureq::get(url).call().context("fetch jpeg snapshot")?;
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_JPEG_BYTES as u64 + 1)
        .read_to_end(&mut bytes)
        .context("read jpeg snapshot body")?;
    if bytes.len() > MAX_JPEG_BYTES {
        return Err(anyhow!("jpeg snapshot exceeds max size"));
    }
    Ok(bytes)
}

fn decode_jpeg(bytes: &[u8]) -> Result<(Vec<u8>, u32, u32)> {
    if bytes.len() > MAX_JPEG_BYTES {
        return Err(anyhow!("jpeg frame exceeds max size"));
    }
    let image = image::load_from_memory_with_format(bytes, image::ImageFormat::Jpeg)
        .context("decode jpeg frame")?;
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();
    Ok((rgb.into_raw(), width, height))
}
