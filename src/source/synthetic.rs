//! Synthetic frame source (`stub://`).
//!
//! Generates deterministic pattern frames at a configurable native rate.
//! Used by tests and by deployments that want a camera-free smoke run.
//! Connect failures can be scripted to exercise reconnect paths.

use anyhow::{anyhow, Result};
use std::time::{Duration, Instant};

use super::{FrameSource, SourceFrame};

const DEFAULT_WIDTH: u32 = 64;
const DEFAULT_HEIGHT: u32 = 48;

pub struct SyntheticSource {
    name: String,
    native_fps: f64,
    width: u32,
    height: u32,
    frame_count: u64,
    scene_state: u8,
    connected: bool,
    /// Remaining connect attempts that will fail before one succeeds.
    connect_failures_left: u32,
    last_read_at: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(name: &str, fps_hint: u32) -> Self {
        Self {
            name: name.to_string(),
            native_fps: fps_hint.max(1) as f64,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            frame_count: 0,
            scene_state: 0,
            connected: false,
            connect_failures_left: 0,
            last_read_at: None,
        }
    }

    /// Override the simulated camera rate (frames are paced to this).
    pub fn with_native_fps(mut self, fps: f64) -> Self {
        self.native_fps = fps.max(1.0);
        self
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Fail the next `count` connect attempts before succeeding.
    pub fn failing_connects(mut self, count: u32) -> Self {
        self.connect_failures_left = count;
        self
    }

    /// Deterministic pattern mixing frame count, scene state and position.
    /// The scene shifts every 50 frames to simulate activity.
    fn generate_pixels(&mut self) -> Vec<u8> {
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let len = (self.width * self.height * 3) as usize;
        let mut pixels = vec![0u8; len];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        if self.connect_failures_left > 0 {
            self.connect_failures_left -= 1;
            return Err(anyhow!("synthetic source {}: connect refused", self.name));
        }
        self.connected = true;
        log::info!("SyntheticSource: connected to stub://{}", self.name);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<SourceFrame> {
        if !self.connected {
            return Err(anyhow!("synthetic source {} not connected", self.name));
        }

        // Pace reads to the simulated camera rate.
        let interval = Duration::from_secs_f64(1.0 / self.native_fps);
        if let Some(last) = self.last_read_at {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
        self.last_read_at = Some(Instant::now());

        self.frame_count += 1;
        let pixels = self.generate_pixels();
        Ok(SourceFrame {
            pixels,
            width: self.width,
            height: self.height,
        })
    }

    fn native_fps(&self) -> f64 {
        self.native_fps
    }

    fn is_healthy(&self) -> bool {
        self.connected
    }

    fn close(&mut self) {
        self.connected = false;
    }
}
