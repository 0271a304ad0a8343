//! Frame sampler: one read per tick, misses tolerated.
//!
//! Missing frames are expected on live feeds. They are logged at debug level on
//! the first miss of a run and then every `MISS_LOG_INTERVAL` consecutive misses.
//! Only a `SourceFatal` error from the source escapes; every other failure is a
//! miss.

use crate::error::{classify, SwitcherError};
use crate::frame::Frame;
use crate::ingest::VideoSource;

pub const MISS_LOG_INTERVAL: u64 = 100;

#[derive(Debug)]
pub struct FrameSampler {
    feed: String,
    frames: u64,
    consecutive_misses: u64,
    total_misses: u64,
    logged_misses: u64,
    last_miss: Option<SwitcherError>,
}

impl FrameSampler {
    pub fn new(feed: &str) -> Self {
        Self {
            feed: feed.to_string(),
            frames: 0,
            consecutive_misses: 0,
            total_misses: 0,
            logged_misses: 0,
            last_miss: None,
        }
    }

    pub fn feed(&self) -> &str {
        &self.feed
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn consecutive_misses(&self) -> u64 {
        self.consecutive_misses
    }

    pub fn total_misses(&self) -> u64 {
        self.total_misses
    }

    /// Misses that were written to the log.
    pub fn logged_misses(&self) -> u64 {
        self.logged_misses
    }

    /// The most recent miss, as a `TransientSample` error.
    pub fn last_miss(&self) -> Option<&SwitcherError> {
        self.last_miss.as_ref()
    }

    /// Advance `source` by exactly one frame.
    pub fn sample(&mut self, source: &mut dyn VideoSource) -> Result<Option<Frame>, SwitcherError> {
        match source.read_frame() {
            Ok(Some(frame)) => {
                if self.consecutive_misses > 0 {
                    log::debug!(
                        "feed '{}': frames resumed after {} missed",
                        self.feed,
                        self.consecutive_misses
                    );
                }
                self.consecutive_misses = 0;
                self.frames += 1;
                Ok(Some(frame))
            }
            Ok(None) => {
                self.miss("no frame available".to_string());
                Ok(None)
            }
            Err(err) => match classify(&err) {
                Some(SwitcherError::SourceFatal { reason, .. }) => {
                    Err(SwitcherError::source_fatal(&self.feed, reason.clone()))
                }
                _ => {
                    self.miss(format!("{:#}", err));
                    Ok(None)
                }
            },
        }
    }

    fn miss(&mut self, reason: String) {
        self.consecutive_misses += 1;
        self.total_misses += 1;
        let miss = SwitcherError::TransientSample {
            feed: self.feed.clone(),
            reason,
        };
        if self.consecutive_misses == 1 || self.consecutive_misses % MISS_LOG_INTERVAL == 0 {
            self.logged_misses += 1;
            log::debug!("{} ({} consecutive)", miss, self.consecutive_misses);
        }
        self.last_miss = Some(miss);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{SyntheticConfig, SyntheticSource, SyntheticStep};
    use anyhow::Result;

    fn opened(steps: Vec<SyntheticStep>) -> Result<SyntheticSource> {
        let mut source = SyntheticSource::new(SyntheticConfig::new("porch", steps));
        source.open()?;
        Ok(source)
    }

    #[test]
    fn misses_are_counted_and_reset_on_frame() -> Result<()> {
        let mut source = opened(vec![
            SyntheticStep::Missing,
            SyntheticStep::Missing,
            SyntheticStep::Occupancy(1),
        ])?;
        let mut sampler = FrameSampler::new("Porch");

        assert!(sampler.sample(&mut source)?.is_none());
        assert!(sampler.sample(&mut source)?.is_none());
        assert_eq!(sampler.consecutive_misses(), 2);
        assert_eq!(
            sampler.last_miss().map(SwitcherError::code),
            Some("TRANSIENT_SAMPLE")
        );

        assert!(sampler.sample(&mut source)?.is_some());
        assert_eq!(sampler.consecutive_misses(), 0);
        assert_eq!(sampler.total_misses(), 2);
        assert_eq!(sampler.frames(), 1);
        Ok(())
    }

    #[test]
    fn miss_log_is_rate_limited() -> Result<()> {
        let mut source = opened(vec![SyntheticStep::Missing])?;
        let mut sampler = FrameSampler::new("Porch");

        sampler.sample(&mut source)?;
        assert_eq!(sampler.logged_misses(), 1);
        for _ in 1..250 {
            sampler.sample(&mut source)?;
        }
        // 1st, 100th and 200th
        assert_eq!(sampler.total_misses(), 250);
        assert_eq!(sampler.logged_misses(), 3);
        Ok(())
    }

    #[test]
    fn miss_log_restarts_after_frames_resume() -> Result<()> {
        let mut steps = vec![SyntheticStep::Missing; 5];
        steps.push(SyntheticStep::Occupancy(1));
        steps.push(SyntheticStep::Missing);
        let mut source = opened(steps)?;
        let mut sampler = FrameSampler::new("Porch");

        for _ in 0..7 {
            sampler.sample(&mut source)?;
        }
        assert_eq!(sampler.consecutive_misses(), 1);
        assert_eq!(sampler.logged_misses(), 2);
        Ok(())
    }

    #[test]
    fn each_call_advances_exactly_one_frame() -> Result<()> {
        let mut source = opened(vec![
            SyntheticStep::Occupancy(1),
            SyntheticStep::Occupancy(2),
        ])?;
        let mut sampler = FrameSampler::new("Porch");
        let first = sampler.sample(&mut source)?.expect("frame");
        let second = sampler.sample(&mut source)?.expect("frame");
        assert_eq!(second.sequence, first.sequence + 1);
        Ok(())
    }

    #[test]
    fn fatal_errors_carry_the_feed_name() -> Result<()> {
        let mut source = opened(vec![SyntheticStep::Fail])?;
        let mut sampler = FrameSampler::new("Porch");
        let err = sampler.sample(&mut source).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, SwitcherError::SourceFatal { ref feed, .. } if feed == "Porch"));
        Ok(())
    }

    #[test]
    fn unopened_source_is_a_miss_not_a_fault() -> Result<()> {
        let mut source = SyntheticSource::new(SyntheticConfig::new("porch", vec![SyntheticStep::Occupancy(1)]));
        let mut sampler = FrameSampler::new("Porch");
        assert!(sampler.sample(&mut source)?.is_none());
        assert_eq!(sampler.total_misses(), 1);
        Ok(())
    }
}
