//! HTTP snapshot source.
//!
//! Fetches a single JPEG per read from cameras that expose a snapshot endpoint
//! (`http://camera/snapshot.jpg`). Every read is a fresh request, so frames are
//! never stale. Network and decode failures are missed frames.

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::time::Duration;

use crate::frame::Frame;

use super::{SourceStats, VideoSource};

const MAX_JPEG_BYTES: u64 = 5 * 1024 * 1024;

/// Configuration for an HTTP snapshot source.
#[derive(Clone, Debug)]
pub struct HttpSnapshotConfig {
    pub url: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for HttpSnapshotConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1/snapshot.jpg".to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

pub struct HttpSnapshotSource {
    config: HttpSnapshotConfig,
    redacted_url: String,
    agent: Option<ureq::Agent>,
    frame_count: u64,
    missed: u64,
    last_error: Option<String>,
}

impl HttpSnapshotSource {
    pub fn new(config: HttpSnapshotConfig) -> Self {
        let redacted_url = config
            .url
            .parse::<super::SourceDescriptor>()
            .map(|d| d.redacted())
            .unwrap_or_else(|_| "http://<invalid>".to_string());
        Self {
            config,
            redacted_url,
            agent: None,
            frame_count: 0,
            missed: 0,
            last_error: None,
        }
    }

    fn fetch(&self, agent: &ureq::Agent) -> Result<(Vec<u8>, u32, u32)> {
        let response = agent
            .get(&self.config.url)
            .call()
            .context("request snapshot")?;
        let mut jpeg = Vec::new();
        response
            .into_reader()
            .take(MAX_JPEG_BYTES + 1)
            .read_to_end(&mut jpeg)
            .context("read snapshot body")?;
        if jpeg.len() as u64 > MAX_JPEG_BYTES {
            return Err(anyhow!("snapshot exceeds {} bytes", MAX_JPEG_BYTES));
        }
        let image = image::load_from_memory(&jpeg).context("decode snapshot")?;
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();
        Ok((rgb.into_raw(), width, height))
    }
}

impl VideoSource for HttpSnapshotSource {
    fn descriptor(&self) -> String {
        self.redacted_url.clone()
    }

    fn open(&mut self) -> Result<()> {
        self.agent = Some(
            ureq::AgentBuilder::new()
                .timeout(self.config.timeout)
                .build(),
        );
        log::info!("HttpSnapshotSource: ready for {}", self.redacted_url);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        let agent = self
            .agent
            .clone()
            .ok_or_else(|| anyhow!("http snapshot source not opened"))?;
        match self.fetch(&agent) {
            Ok((pixels, width, height)) => {
                self.frame_count += 1;
                self.last_error = None;
                Ok(Some(Frame::new(pixels, width, height, self.frame_count)))
            }
            Err(err) => {
                log::debug!("HttpSnapshotSource: {}: {:#}", self.redacted_url, err);
                self.last_error = Some(format!("{:#}", err));
                self.missed += 1;
                Ok(None)
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        self.agent = None;
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.agent.is_some() && self.last_error.is_none()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            frames_missed: self.missed,
            descriptor: self.redacted_url.clone(),
        }
    }
}
