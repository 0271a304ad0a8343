//! Synthetic `stub://` source.
//!
//! Produces scripted frames so the whole loop can run without cameras. The
//! script is the `pattern` query parameter, a comma-separated list cycled one
//! entry per read:
//!
//! - `3`: a well-formed frame carrying an occupancy marker of 3
//! - `-`: no frame this read
//! - `x`: a malformed frame (pixel buffer shorter than its dimensions)
//! - `!`: the device disappears; this and every later read fails fatally
//!
//! Example: `stub://porch?pattern=1,2,-,x&width=64&height=48`.
//!
//! The occupancy marker is only meaningful to `StubBackend`; real detectors see
//! an ordinary gradient image.

use anyhow::{anyhow, Result};
use url::Url;

use crate::error::SwitcherError;
use crate::frame::{Frame, RGB_CHANNELS};

use super::{SourceStats, VideoSource};

const DEFAULT_WIDTH: u32 = 32;
const DEFAULT_HEIGHT: u32 = 24;
const OCCUPANCY_MARKER: &[u8; 4] = b"OCC1";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyntheticStep {
    Occupancy(u32),
    Missing,
    Malformed,
    Fail,
}

impl SyntheticStep {
    fn parse(raw: &str) -> Result<Self, SwitcherError> {
        match raw.trim() {
            "-" => Ok(Self::Missing),
            "x" => Ok(Self::Malformed),
            "!" => Ok(Self::Fail),
            value => value.parse().map(Self::Occupancy).map_err(|_| {
                SwitcherError::configuration(format!("invalid synthetic pattern entry '{}'", value))
            }),
        }
    }
}

/// Configuration for a synthetic source.
#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    /// Feed name used in fatal errors.
    pub feed: String,
    pub descriptor: String,
    pub steps: Vec<SyntheticStep>,
    pub width: u32,
    pub height: u32,
}

impl SyntheticConfig {
    pub fn new(feed: &str, steps: Vec<SyntheticStep>) -> Self {
        Self {
            feed: feed.to_string(),
            descriptor: format!("stub://{}", feed),
            steps,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
        }
    }

    pub fn from_url(feed: &str, url: &Url) -> Result<Self, SwitcherError> {
        let mut config = Self::new(feed, vec![SyntheticStep::Occupancy(0)]);
        config.descriptor = url.to_string();
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "pattern" => {
                    config.steps = value
                        .split(',')
                        .map(SyntheticStep::parse)
                        .collect::<Result<Vec<_>, _>>()?;
                }
                "width" => config.width = parse_dimension(&key, &value)?,
                "height" => config.height = parse_dimension(&key, &value)?,
                other => {
                    return Err(SwitcherError::configuration(format!(
                        "unknown synthetic source parameter '{}'",
                        other
                    )))
                }
            }
        }
        if config.steps.is_empty() {
            return Err(SwitcherError::configuration("synthetic pattern is empty"));
        }
        Ok(config)
    }
}

fn parse_dimension(key: &str, value: &str) -> Result<u32, SwitcherError> {
    match value.parse::<u32>() {
        Ok(v) if (2..=4096).contains(&v) => Ok(v),
        _ => Err(SwitcherError::configuration(format!(
            "synthetic {} must be an integer in 2..=4096, got '{}'",
            key, value
        ))),
    }
}

/// Scripted frame source.
pub struct SyntheticSource {
    config: SyntheticConfig,
    position: usize,
    frame_count: u64,
    missed: u64,
    opened: bool,
    failed: bool,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            position: 0,
            frame_count: 0,
            missed: 0,
            opened: false,
            failed: false,
        }
    }

    fn removed(&self) -> anyhow::Error {
        SwitcherError::source_fatal(&self.config.feed, "synthetic device removed").into()
    }

    fn generate_pixels(&self, occupancy: u32) -> Vec<u8> {
        let pixel_count = self.config.width as usize * self.config.height as usize * RGB_CHANNELS;
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count) % 256) as u8;
        }
        if pixels.len() >= 8 {
            pixels[..4].copy_from_slice(OCCUPANCY_MARKER);
            pixels[4..8].copy_from_slice(&occupancy.to_le_bytes());
        }
        pixels
    }
}

impl VideoSource for SyntheticSource {
    fn descriptor(&self) -> String {
        self.config.descriptor.clone()
    }

    /// Synthetic sources are always "connected".
    fn open(&mut self) -> Result<()> {
        self.opened = true;
        log::info!("SyntheticSource: connected to {}", self.config.descriptor);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        if !self.opened {
            return Err(anyhow!("synthetic source {} not opened", self.config.descriptor));
        }
        if self.failed {
            return Err(self.removed());
        }

        // An empty script never yields a frame.
        let Some(&step) = self
            .config
            .steps
            .get(self.position % self.config.steps.len().max(1))
        else {
            self.missed += 1;
            return Ok(None);
        };
        self.position += 1;

        match step {
            SyntheticStep::Occupancy(count) => {
                self.frame_count += 1;
                let pixels = self.generate_pixels(count);
                Ok(Some(Frame::new(
                    pixels,
                    self.config.width,
                    self.config.height,
                    self.frame_count,
                )))
            }
            SyntheticStep::Missing => {
                self.missed += 1;
                Ok(None)
            }
            SyntheticStep::Malformed => {
                self.frame_count += 1;
                let mut pixels = self.generate_pixels(0);
                pixels.truncate(pixels.len() / 2);
                Ok(Some(Frame::new(
                    pixels,
                    self.config.width,
                    self.config.height,
                    self.frame_count,
                )))
            }
            SyntheticStep::Fail => {
                self.failed = true;
                Err(self.removed())
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        if self.opened {
            log::debug!("SyntheticSource: closed {}", self.config.descriptor);
        }
        self.opened = false;
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.opened && !self.failed
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            frames_missed: self.missed,
            descriptor: self.config.descriptor.clone(),
        }
    }
}

/// Recover the occupancy marker written by `SyntheticSource`.
pub fn read_occupancy_marker(pixels: &[u8]) -> Option<u32> {
    if pixels.len() < 8 || &pixels[..4] != OCCUPANCY_MARKER {
        return None;
    }
    let mut count = [0u8; 4];
    count.copy_from_slice(&pixels[4..8]);
    Some(u32::from_le_bytes(count))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(pattern: &str) -> SyntheticSource {
        let url = Url::parse(&format!("stub://test?pattern={}", pattern)).unwrap();
        let mut source = SyntheticSource::new(SyntheticConfig::from_url("test", &url).unwrap());
        source.open().unwrap();
        source
    }

    #[test]
    fn cycles_through_pattern() -> Result<()> {
        let mut source = source("1,-,3");

        let first = source.read_frame()?.expect("frame");
        assert_eq!(read_occupancy_marker(first.pixels()), Some(1));
        assert!(first.is_well_formed());

        assert!(source.read_frame()?.is_none());

        let third = source.read_frame()?.expect("frame");
        assert_eq!(read_occupancy_marker(third.pixels()), Some(3));

        let wrapped = source.read_frame()?.expect("frame");
        assert_eq!(read_occupancy_marker(wrapped.pixels()), Some(1));

        let stats = source.stats();
        assert_eq!(stats.frames_captured, 3);
        assert_eq!(stats.frames_missed, 1);
        Ok(())
    }

    #[test]
    fn malformed_step_yields_short_frame() -> Result<()> {
        let mut source = source("x");
        let frame = source.read_frame()?.expect("frame");
        assert!(!frame.is_well_formed());
        Ok(())
    }

    #[test]
    fn fail_step_is_permanent() {
        let mut source = source("!,1");
        for _ in 0..3 {
            let err = source.read_frame().unwrap_err();
            assert_eq!(
                crate::error::classify(&err).map(SwitcherError::code),
                Some("SOURCE_FATAL")
            );
        }
        assert!(!source.is_healthy());
    }

    #[test]
    fn empty_script_only_misses() -> Result<()> {
        let mut source = SyntheticSource::new(SyntheticConfig::new("empty", Vec::new()));
        source.open()?;
        for _ in 0..3 {
            assert!(source.read_frame()?.is_none());
        }
        assert_eq!(source.stats().frames_missed, 3);
        assert!(source.is_healthy());
        Ok(())
    }

    #[test]
    fn rejects_bad_parameters() {
        for raw in [
            "stub://a?pattern=1,two",
            "stub://a?pattern=",
            "stub://a?width=1",
            "stub://a?fps=10",
        ] {
            let url = Url::parse(raw).unwrap();
            assert!(SyntheticConfig::from_url("a", &url).is_err(), "{}", raw);
        }
    }

    #[test]
    fn marker_absent_on_foreign_pixels() {
        assert_eq!(read_occupancy_marker(&[0u8; 64]), None);
        assert_eq!(read_occupancy_marker(b"OCC"), None);
    }
}
