//! Frame ingestion sources.
//!
//! This module provides the sources a feed can be backed by:
//! - Local capture devices via V4L2 (feature: ingest-v4l2)
//! - RTSP streams from IP cameras (feature: rtsp-gstreamer)
//! - HTTP JPEG snapshot endpoints (feature: ingest-http)
//! - Synthetic `stub://` sources (always available, used by tests and dry runs)
//!
//! Every source implements `VideoSource`. The descriptor is resolved into a
//! concrete backend once, at registration time; the control loop never branches on
//! source kind.
//!
//! `read_frame` distinguishes three outcomes:
//! - `Ok(Some(frame))`: the latest frame, exactly one per call
//! - `Ok(None)`: nothing available right now (stream hiccup, device busy)
//! - `Err(_)` carrying `SwitcherError::SourceFatal`: the source is gone for good
//!
//! Any other error is treated by the sampler like `Ok(None)`.

pub mod descriptor;
#[cfg(feature = "ingest-http")]
pub mod http;
#[cfg(feature = "rtsp-gstreamer")]
pub mod rtsp;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::Result;

use crate::error::SwitcherError;
use crate::frame::Frame;

pub use descriptor::{DescriptorValue, SourceDescriptor, StreamProtocol};
#[cfg(feature = "ingest-http")]
pub use http::{HttpSnapshotConfig, HttpSnapshotSource};
#[cfg(feature = "rtsp-gstreamer")]
pub use rtsp::{RtspConfig, RtspSource};
pub use synthetic::{SyntheticConfig, SyntheticSource, SyntheticStep};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::{V4l2Config, V4l2Source};

/// The video source capability consumed by the sampler.
pub trait VideoSource: Send {
    /// Human-readable descriptor with credentials redacted.
    fn descriptor(&self) -> String;

    /// Acquire the underlying device or stream.
    fn open(&mut self) -> Result<()>;

    /// Read the next frame. Advances the source by exactly one frame.
    fn read_frame(&mut self) -> Result<Option<Frame>>;

    /// Release the underlying device or stream. Must be safe to call twice.
    fn close(&mut self) -> Result<()>;

    /// Check if the source is healthy.
    fn is_healthy(&self) -> bool;

    /// Get frame statistics.
    fn stats(&self) -> SourceStats;
}

/// Statistics for a source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub frames_missed: u64,
    pub descriptor: String,
}

/// Construct (but do not open) the backend for a resolved descriptor.
///
/// Fails with `SwitcherError::Configuration` when the backend for the descriptor
/// was not compiled in.
pub fn build_source(feed: &str, descriptor: &SourceDescriptor) -> Result<Box<dyn VideoSource>> {
    match descriptor {
        SourceDescriptor::Synthetic { url } => {
            let config = SyntheticConfig::from_url(feed, url)?;
            Ok(Box::new(SyntheticSource::new(config)))
        }
        SourceDescriptor::LocalDevice { path } => build_local_device(feed, path),
        SourceDescriptor::NetworkStream {
            url,
            protocol: StreamProtocol::Rtsp,
        } => build_rtsp(feed, url),
        SourceDescriptor::NetworkStream {
            url,
            protocol: StreamProtocol::Http,
        } => build_http(feed, url),
    }
}

#[cfg(feature = "ingest-v4l2")]
fn build_local_device(_feed: &str, path: &str) -> Result<Box<dyn VideoSource>> {
    let config = V4l2Config {
        device: path.to_string(),
        ..V4l2Config::default()
    };
    Ok(Box::new(V4l2Source::new(config)))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn build_local_device(feed: &str, path: &str) -> Result<Box<dyn VideoSource>> {
    Err(SwitcherError::configuration(format!(
        "feed '{}': local device {} requires the ingest-v4l2 feature",
        feed, path
    ))
    .into())
}

#[cfg(feature = "rtsp-gstreamer")]
fn build_rtsp(_feed: &str, url: &url::Url) -> Result<Box<dyn VideoSource>> {
    let config = RtspConfig {
        url: url.to_string(),
        ..RtspConfig::default()
    };
    Ok(Box::new(RtspSource::new(config)?))
}

#[cfg(not(feature = "rtsp-gstreamer"))]
fn build_rtsp(feed: &str, _url: &url::Url) -> Result<Box<dyn VideoSource>> {
    Err(SwitcherError::configuration(format!(
        "feed '{}': RTSP streams require the rtsp-gstreamer feature",
        feed
    ))
    .into())
}

#[cfg(feature = "ingest-http")]
fn build_http(_feed: &str, url: &url::Url) -> Result<Box<dyn VideoSource>> {
    let config = HttpSnapshotConfig {
        url: url.to_string(),
        ..HttpSnapshotConfig::default()
    };
    Ok(Box::new(HttpSnapshotSource::new(config)))
}

#[cfg(not(feature = "ingest-http"))]
fn build_http(feed: &str, _url: &url::Url) -> Result<Box<dyn VideoSource>> {
    Err(SwitcherError::configuration(format!(
        "feed '{}': HTTP snapshot streams require the ingest-http feature",
        feed
    ))
    .into())
}
