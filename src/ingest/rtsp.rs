//! RTSP frame source.
//!
//! This module provides `RtspSource` for IP cameras, decoded with GStreamer:
//! `rtspsrc ! decodebin ! videoconvert ! appsink`. The appsink keeps a single
//! buffer and drops older ones, so a read always returns the most recent frame
//! and never a backlog.
//!
//! Network streams never fail fatally. A stalled pull is a missed frame; an
//! error or EOS on the bus tears the pipeline down and the next read reconnects.

use anyhow::{Context, Result};
use gstreamer::prelude::*;
use std::time::{Duration, Instant};

use crate::frame::Frame;

use super::{SourceStats, VideoSource};

/// Configuration for an RTSP source.
#[derive(Clone, Debug)]
pub struct RtspConfig {
    /// RTSP URL (e.g., "rtsp://192.168.1.100:554/stream")
    pub url: String,
    /// How long a single pull may block before the read counts as missed.
    pub pull_timeout: Duration,
}

impl Default for RtspConfig {
    fn default() -> Self {
        Self {
            url: "rtsp://localhost:554/stream".to_string(),
            pull_timeout: Duration::from_millis(500),
        }
    }
}

/// RTSP frame source.
pub struct RtspSource {
    config: RtspConfig,
    redacted_url: String,
    pipeline: Option<Pipeline>,
    frame_count: u64,
    missed: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
}

struct Pipeline {
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
}

impl RtspSource {
    pub fn new(config: RtspConfig) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;
        let redacted_url = config
            .url
            .parse::<super::SourceDescriptor>()
            .map(|d| d.redacted())
            .unwrap_or_else(|_| "rtsp://<invalid>".to_string());
        Ok(Self {
            config,
            redacted_url,
            pipeline: None,
            frame_count: 0,
            missed: 0,
            last_frame_at: None,
            last_error: None,
        })
    }

    fn build_pipeline(&self) -> Result<Pipeline> {
        let pipeline_description = format!(
            "rtspsrc location={} latency=0 ! decodebin ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            self.config.url
        );
        let pipeline = gstreamer::parse::launch(&pipeline_description)
            .context("build RTSP pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow::anyhow!("RTSP pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow::anyhow!("appsink element has unexpected type"))?;

        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .build();
        appsink.set_caps(Some(&caps));
        appsink.set_max_buffers(1);
        appsink.set_drop(true);
        appsink.set_sync(false);

        pipeline
            .set_state(gstreamer::State::Playing)
            .context("set RTSP pipeline to Playing")?;

        Ok(Pipeline { pipeline, appsink })
    }

    fn teardown(&mut self) {
        if let Some(active) = self.pipeline.take() {
            let _ = active.pipeline.set_state(gstreamer::State::Null);
        }
    }

    /// Drain the bus; returns an error description if the pipeline died.
    fn poll_bus(&self) -> Option<String> {
        let active = self.pipeline.as_ref()?;
        let bus = active.pipeline.bus()?;
        while let Some(message) = bus.timed_pop(gstreamer::ClockTime::ZERO) {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    return Some(format!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    ));
                }
                MessageView::Eos(..) => return Some("gstreamer reached EOS".to_string()),
                _ => {}
            }
        }
        None
    }

    fn miss(&mut self, reason: String) -> Result<Option<Frame>> {
        log::debug!("RtspSource: {}: {}", self.redacted_url, reason);
        self.last_error = Some(reason);
        self.missed += 1;
        Ok(None)
    }
}

impl VideoSource for RtspSource {
    fn descriptor(&self) -> String {
        self.redacted_url.clone()
    }

    fn open(&mut self) -> Result<()> {
        self.teardown();
        self.pipeline = Some(self.build_pipeline()?);
        self.last_error = None;
        log::info!("RtspSource: connected to {}", self.redacted_url);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        if self.pipeline.is_none() {
            match self.build_pipeline() {
                Ok(pipeline) => {
                    log::info!("RtspSource: reconnected to {}", self.redacted_url);
                    self.pipeline = Some(pipeline);
                }
                Err(err) => return self.miss(format!("reconnect failed: {:#}", err)),
            }
        }

        if let Some(reason) = self.poll_bus() {
            self.teardown();
            return self.miss(reason);
        }

        let timeout = gstreamer::ClockTime::from_mseconds(self.config.pull_timeout.as_millis() as u64);
        let sample = match self.pipeline.as_ref() {
            Some(active) => active.appsink.try_pull_sample(timeout),
            None => None,
        };
        let Some(sample) = sample else {
            return self.miss("RTSP stream stalled".to_string());
        };

        let (pixels, width, height) = match sample_to_pixels(&sample) {
            Ok(decoded) => decoded,
            Err(err) => return self.miss(format!("{:#}", err)),
        };

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        self.last_error = None;
        Ok(Some(Frame::new(pixels, width, height, self.frame_count)))
    }

    fn close(&mut self) -> Result<()> {
        if self.pipeline.is_some() {
            self.teardown();
            log::info!("RtspSource: disconnected from {}", self.redacted_url);
        }
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        if self.pipeline.is_none() || self.last_error.is_some() {
            return false;
        }
        self.last_frame_at
            .map_or(true, |at| at.elapsed() <= Duration::from_secs(5))
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            frames_missed: self.missed,
            descriptor: self.redacted_url.clone(),
        }
    }
}

impl Drop for RtspSource {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn sample_to_pixels(sample: &gstreamer::Sample) -> Result<(Vec<u8>, u32, u32)> {
    let buffer = sample.buffer().context("RTSP sample missing buffer")?;
    let caps = sample.caps().context("RTSP sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse RTSP caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map RTSP buffer")?;
    let data = map.as_slice();

    if stride == row_bytes {
        return Ok((data.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("RTSP buffer row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
