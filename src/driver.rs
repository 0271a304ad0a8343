//! Control loop driver.
//!
//! Each feed gets a worker thread that owns its source, samples one frame when
//! asked and scores it against the shared detector. The driver thread runs ticks
//! sequentially:
//!
//! 1. dispatch the tick number to every idle, enabled worker;
//! 2. collect one report per dispatched worker, waiting at most the call timeout;
//! 3. fold the occupancies into the decision window;
//! 4. advance the cooldown;
//! 5. if the window decided, hand the winner to the switch policy.
//!
//! A worker that misses the deadline stays busy until it reports; it is absent
//! from every tick in between and its late report is discarded. A worker whose
//! source fails fatally is disabled for the rest of the run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::aggregate::{DecisionAggregator, WindowOutcome};
use crate::config::{LoopSettings, SwitcherConfig};
use crate::controller::{build_controller, OutputController};
use crate::detect::{build_backend, SharedDetector};
use crate::error::SwitcherError;
use crate::ingest::{SourceStats, VideoSource};
use crate::occupancy::OccupancyScorer;
use crate::registry::SourceRegistry;
use crate::sampler::FrameSampler;
use crate::switch::{SwitchOutcome, SwitchPolicy};

const JOIN_POLL: Duration = Duration::from_millis(10);

// ----------------------------------------------------------------------------
// Shutdown
// ----------------------------------------------------------------------------

/// Cooperative stop flag, observed between ticks.
#[derive(Clone, Debug, Default)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

// ----------------------------------------------------------------------------
// Per-tick results
// ----------------------------------------------------------------------------

/// What one feed contributed to a tick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FeedReading {
    Occupancy(u32),
    /// The source had no frame.
    NoFrame,
    /// The detector failed; treated like `NoFrame`.
    DetectorFailed(SwitcherError),
    /// The source is gone; the feed is disabled from now on.
    SourceFatal(SwitcherError),
    /// No report before the call timeout.
    TimedOut,
    /// Still working on an earlier tick.
    Busy,
    /// Disabled earlier in the run.
    Disabled,
}

impl FeedReading {
    pub fn occupancy(&self) -> Option<u32> {
        match self {
            Self::Occupancy(count) => Some(*count),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct TickReport {
    pub tick: u64,
    /// One entry per feed, in registration order.
    pub readings: Vec<(String, FeedReading)>,
    pub window: WindowOutcome,
    /// Present only on ticks where the window decided.
    pub switch: Option<Result<SwitchOutcome, SwitcherError>>,
}

impl TickReport {
    pub fn reading(&self, feed: &str) -> Option<&FeedReading> {
        self.readings
            .iter()
            .find(|(name, _)| name == feed)
            .map(|(_, reading)| reading)
    }
}

/// Counters for the periodic health line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub ticks: u64,
    pub scored: u64,
    pub no_frame: u64,
    pub detector_failures: u64,
    pub timeouts: u64,
    pub busy: u64,
    pub stale_reports: u64,
    pub decisions: u64,
    pub empty_windows: u64,
    pub switches: u64,
    pub skipped_active: u64,
    pub skipped_cooldown: u64,
    pub actuator_failures: u64,
    pub disabled_feeds: u64,
}

// ----------------------------------------------------------------------------
// Feed workers
// ----------------------------------------------------------------------------

struct FeedReport {
    tick: u64,
    reading: FeedReading,
}

struct FeedWorker {
    name: String,
    descriptor: String,
    jobs: Option<Sender<u64>>,
    reports: Receiver<FeedReport>,
    join: Option<JoinHandle<SourceStats>>,
    in_flight: Option<u64>,
    disabled: Option<String>,
    last_occupancy: Option<u32>,
}

impl FeedWorker {
    fn spawn(
        name: String,
        source: Box<dyn VideoSource>,
        detector: SharedDetector,
        scorer: Arc<OccupancyScorer>,
    ) -> Result<Self> {
        let descriptor = source.descriptor();
        let (job_tx, job_rx) = mpsc::channel();
        let (report_tx, report_rx) = mpsc::channel();
        let thread_name = format!("feed:{}", name);
        let worker_name = name.clone();
        let join = std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || run_feed(worker_name, source, detector, scorer, job_rx, report_tx))
            .with_context(|| format!("spawn worker for feed '{}'", name))?;
        Ok(Self {
            name,
            descriptor,
            jobs: Some(job_tx),
            reports: report_rx,
            join: Some(join),
            in_flight: None,
            disabled: None,
            last_occupancy: None,
        })
    }

    fn disabled(name: String, descriptor: String, reason: String) -> Self {
        let (_, reports) = mpsc::channel();
        Self {
            name,
            descriptor,
            jobs: None,
            reports,
            join: None,
            in_flight: None,
            disabled: Some(reason),
            last_occupancy: None,
        }
    }

    fn disable(&mut self, reason: String) {
        self.jobs = None;
        self.in_flight = None;
        self.disabled = Some(reason);
    }

    /// Drop reports for ticks that already timed out. Returns how many.
    fn drain_stale(&mut self) -> u64 {
        let mut stale = 0;
        loop {
            match self.reports.try_recv() {
                Ok(report) => {
                    stale += 1;
                    if self.in_flight == Some(report.tick) {
                        self.in_flight = None;
                    }
                    if let FeedReading::SourceFatal(err) = report.reading {
                        log::error!("{}; feed disabled for this run", err);
                        self.disable(err.to_string());
                        break;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if self.in_flight.is_some() || self.jobs.is_some() {
                        log::warn!("feed '{}': worker exited; feed disabled", self.name);
                        self.disable("worker exited".to_string());
                    }
                    break;
                }
            }
        }
        stale
    }
}

fn run_feed(
    name: String,
    mut source: Box<dyn VideoSource>,
    detector: SharedDetector,
    scorer: Arc<OccupancyScorer>,
    jobs: Receiver<u64>,
    reports: Sender<FeedReport>,
) -> SourceStats {
    let mut sampler = FrameSampler::new(&name);
    while let Ok(tick) = jobs.recv() {
        let reading = match sampler.sample(source.as_mut()) {
            Ok(Some(frame)) => match scorer.score_shared(&detector, &frame) {
                Ok(count) => FeedReading::Occupancy(count),
                Err(err) => FeedReading::DetectorFailed(err),
            },
            Ok(None) => FeedReading::NoFrame,
            Err(err) => FeedReading::SourceFatal(err),
        };
        let fatal = matches!(reading, FeedReading::SourceFatal(_));
        if reports.send(FeedReport { tick, reading }).is_err() || fatal {
            break;
        }
    }
    if let Err(err) = source.close() {
        log::warn!("feed '{}': close failed: {:#}", name, err);
    }
    source.stats()
}

// ----------------------------------------------------------------------------
// Driver
// ----------------------------------------------------------------------------

pub struct ControlLoop {
    feeds: Vec<FeedWorker>,
    aggregator: DecisionAggregator,
    policy: SwitchPolicy,
    controller: Box<dyn OutputController>,
    settings: LoopSettings,
    tick: u64,
    stats: LoopStats,
    last_health_log: Instant,
    closed: bool,
}

impl ControlLoop {
    /// Build every collaborator from configuration.
    pub fn from_config(config: &SwitcherConfig) -> Result<Self> {
        let registry = SourceRegistry::from_config(config)?;
        let detector = build_backend(&config.detector)?;
        let controller = build_controller(&config.controller, &config.feed_names())?;
        let scorer = OccupancyScorer::new(&config.target_class, config.confidence_threshold);
        Self::new(config.timing.clone(), scorer, registry, detector, controller)
    }

    /// Open every registered source and start its worker.
    ///
    /// A source that fails to open is logged and disabled for the run. Fails with
    /// `SwitcherError::Configuration` when no source opens.
    pub fn new(
        settings: LoopSettings,
        scorer: OccupancyScorer,
        registry: SourceRegistry,
        detector: SharedDetector,
        controller: Box<dyn OutputController>,
    ) -> Result<Self> {
        let scorer = Arc::new(scorer);
        let mut feeds = Vec::with_capacity(registry.len());
        for (name, mut source) in registry.into_sources() {
            let descriptor = source.descriptor();
            match source.open() {
                Ok(()) => feeds.push(FeedWorker::spawn(
                    name,
                    source,
                    detector.clone(),
                    scorer.clone(),
                )?),
                Err(err) => {
                    log::error!(
                        "feed '{}': failed to open {}: {:#}; feed disabled for this run",
                        name,
                        descriptor,
                        err
                    );
                    feeds.push(FeedWorker::disabled(name, descriptor, format!("{:#}", err)));
                }
            }
        }
        if feeds.iter().all(|feed| feed.disabled.is_some()) {
            return Err(SwitcherError::configuration("no feed could be opened").into());
        }

        let policy = SwitchPolicy::new(settings.cooldown_ticks());
        log::info!(
            "control loop: {} feeds, target '{}' > {:.2}, window {} ticks every {:?}, cooldown {} ticks",
            feeds.len(),
            scorer.target_class(),
            scorer.threshold(),
            settings.window_ticks,
            settings.tick_interval,
            policy.cooldown_ticks()
        );
        let stats = LoopStats {
            disabled_feeds: feeds.iter().filter(|f| f.disabled.is_some()).count() as u64,
            ..LoopStats::default()
        };

        Ok(Self {
            feeds,
            aggregator: DecisionAggregator::new(settings.window_ticks),
            policy,
            controller,
            settings,
            tick: 0,
            stats,
            last_health_log: Instant::now(),
            closed: false,
        })
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    /// Names of feeds still taking part in decisions.
    pub fn active_feeds(&self) -> Vec<&str> {
        self.feeds
            .iter()
            .filter(|feed| feed.disabled.is_none())
            .map(|feed| feed.name.as_str())
            .collect()
    }

    pub fn cooldown_remaining(&self) -> u32 {
        self.policy.cooldown().remaining()
    }

    /// Run until `shutdown` is requested (or `max_ticks` ticks have run), then
    /// release every resource.
    pub fn run(&mut self, shutdown: &ShutdownSignal, max_ticks: Option<u64>) -> LoopStats {
        log::info!("control loop running");
        while !shutdown.is_requested() && max_ticks.map_or(true, |max| self.tick < max) {
            self.paced_tick();
        }
        if shutdown.is_requested() {
            log::info!("shutdown requested after {} ticks", self.tick);
        }
        self.shutdown()
    }

    /// Run exactly `ticks` ticks at the configured cadence.
    pub fn run_ticks(&mut self, ticks: u64) -> Vec<TickReport> {
        (0..ticks).map(|_| self.paced_tick()).collect()
    }

    fn paced_tick(&mut self) -> TickReport {
        let started = Instant::now();
        let report = self.tick();
        if self.last_health_log.elapsed() >= self.settings.stats_interval {
            self.log_health();
            self.last_health_log = Instant::now();
        }
        if let Some(rest) = self.settings.tick_interval.checked_sub(started.elapsed()) {
            std::thread::sleep(rest);
        }
        report
    }

    /// One tick without pacing.
    pub fn tick(&mut self) -> TickReport {
        self.tick += 1;
        self.stats.ticks += 1;
        let tick = self.tick;

        let readings = self.sample_feeds(tick);
        let occupancies: Vec<(String, u32)> = readings
            .iter()
            .filter_map(|(name, reading)| reading.occupancy().map(|count| (name.clone(), count)))
            .collect();

        for (name, reading) in &readings {
            if matches!(reading, FeedReading::SourceFatal(_) | FeedReading::Disabled)
                && self.aggregator.forget(name)
            {
                log::debug!("tick {}: '{}' dropped from the open window", tick, name);
            }
        }
        let window = self.aggregator.observe(occupancies);
        self.policy.tick();

        let switch = match &window {
            WindowOutcome::Decided(decision) => {
                self.stats.decisions += 1;
                log::debug!(
                    "tick {}: window decided for '{}' ({}) over {} feeds",
                    tick,
                    decision.winner,
                    decision.occupancy,
                    decision.snapshot.len()
                );
                Some(self.act_on(&decision.winner))
            }
            WindowOutcome::Empty => {
                self.stats.empty_windows += 1;
                log::debug!("tick {}: window closed with no scored feeds", tick);
                None
            }
            WindowOutcome::Accumulating { .. } => None,
        };

        TickReport {
            tick,
            readings,
            window,
            switch,
        }
    }

    fn act_on(&mut self, winner: &str) -> Result<SwitchOutcome, SwitcherError> {
        let result = self.policy.maybe_switch(self.controller.as_mut(), winner);
        match &result {
            Ok(SwitchOutcome::Switched { from, to }) => {
                self.stats.switches += 1;
                log::info!(
                    "switched output '{}' -> '{}' (cooldown {} ticks)",
                    from,
                    to,
                    self.policy.cooldown_ticks()
                );
            }
            Ok(SwitchOutcome::SkippedAlreadyActive) => {
                self.stats.skipped_active += 1;
                log::debug!("'{}' already live", winner);
            }
            Ok(SwitchOutcome::SkippedCooldown { remaining }) => {
                self.stats.skipped_cooldown += 1;
                log::debug!("switch to '{}' held: cooldown {} ticks", winner, remaining);
            }
            Err(err) => {
                self.stats.actuator_failures += 1;
                log::warn!("{}; retrying on the next decision", err);
            }
        }
        result
    }

    fn sample_feeds(&mut self, tick: u64) -> Vec<(String, FeedReading)> {
        let mut slots: Vec<Option<FeedReading>> = Vec::with_capacity(self.feeds.len());

        for feed in &mut self.feeds {
            if feed.disabled.is_none() {
                self.stats.stale_reports += feed.drain_stale();
                if feed.disabled.is_some() {
                    self.stats.disabled_feeds += 1;
                }
            }
            if feed.disabled.is_some() {
                slots.push(Some(FeedReading::Disabled));
                continue;
            }
            if feed.in_flight.is_some() {
                self.stats.busy += 1;
                slots.push(Some(FeedReading::Busy));
                continue;
            }
            let sent = feed.jobs.as_ref().is_some_and(|jobs| jobs.send(tick).is_ok());
            if sent {
                feed.in_flight = Some(tick);
                slots.push(None);
            } else {
                log::warn!("feed '{}': worker gone; feed disabled", feed.name);
                feed.disable("worker gone".to_string());
                self.stats.disabled_feeds += 1;
                slots.push(Some(FeedReading::Disabled));
            }
        }

        let deadline = Instant::now() + self.settings.call_timeout;
        let mut readings = Vec::with_capacity(self.feeds.len());
        for (feed, slot) in self.feeds.iter_mut().zip(slots) {
            let reading = match slot {
                Some(reading) => reading,
                None => collect(feed, tick, deadline, &mut self.stats),
            };
            match &reading {
                FeedReading::Occupancy(count) => {
                    self.stats.scored += 1;
                    feed.last_occupancy = Some(*count);
                }
                FeedReading::NoFrame => self.stats.no_frame += 1,
                FeedReading::DetectorFailed(err) => {
                    self.stats.detector_failures += 1;
                    log::debug!("feed '{}': {}", feed.name, err);
                }
                FeedReading::SourceFatal(err) => {
                    log::error!("{}; feed disabled for this run", err);
                    feed.disable(err.to_string());
                    self.stats.disabled_feeds += 1;
                }
                FeedReading::TimedOut => {
                    self.stats.timeouts += 1;
                    log::warn!(
                        "feed '{}': no report within {:?}; absent this tick",
                        feed.name,
                        self.settings.call_timeout
                    );
                }
                FeedReading::Busy | FeedReading::Disabled => {}
            }
            readings.push((feed.name.clone(), reading));
        }
        readings
    }

    fn log_health(&self) {
        let s = &self.stats;
        log::info!(
            "health: ticks={} scored={} no_frame={} detector_failures={} timeouts={} decisions={} switches={} held={} actuator_failures={} cooldown={}",
            s.ticks,
            s.scored,
            s.no_frame,
            s.detector_failures,
            s.timeouts,
            s.decisions,
            s.switches,
            s.skipped_cooldown,
            s.actuator_failures,
            self.policy.cooldown().remaining()
        );
        for feed in &self.feeds {
            match &feed.disabled {
                Some(reason) => log::info!("  feed '{}' disabled: {}", feed.name, reason),
                None => log::info!(
                    "  feed '{}' {} busy={} last_occupancy={:?}",
                    feed.name,
                    feed.descriptor,
                    feed.in_flight.is_some(),
                    feed.last_occupancy
                ),
            }
        }
    }

    /// Stop workers, close every source and the controller. Idempotent.
    pub fn shutdown(&mut self) -> LoopStats {
        if self.closed {
            return self.stats.clone();
        }
        self.closed = true;

        for feed in &mut self.feeds {
            feed.jobs = None;
        }
        let deadline = Instant::now() + self.settings.call_timeout;
        for feed in &mut self.feeds {
            let Some(join) = feed.join.take() else {
                continue;
            };
            while !join.is_finished() && Instant::now() < deadline {
                std::thread::sleep(JOIN_POLL);
            }
            if !join.is_finished() {
                log::warn!(
                    "feed '{}': worker still busy at shutdown; its source closes when it returns",
                    feed.name
                );
                continue;
            }
            match join.join() {
                Ok(stats) => log::info!(
                    "feed '{}' closed: frames={} missed={}",
                    feed.name,
                    stats.frames_captured,
                    stats.frames_missed
                ),
                Err(_) => log::warn!("feed '{}': worker panicked", feed.name),
            }
        }

        if let Err(err) = self.controller.close() {
            log::warn!("{} controller: close failed: {:#}", self.controller.name(), err);
        }
        self.log_health();
        log::info!("control loop stopped after {} ticks", self.tick);
        self.stats.clone()
    }
}

impl Drop for ControlLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn collect(feed: &mut FeedWorker, tick: u64, deadline: Instant, stats: &mut LoopStats) -> FeedReading {
    loop {
        let wait = deadline.saturating_duration_since(Instant::now());
        match feed.reports.recv_timeout(wait) {
            Ok(report) if report.tick == tick => {
                feed.in_flight = None;
                return report.reading;
            }
            Ok(_) => stats.stale_reports += 1,
            Err(RecvTimeoutError::Timeout) => return FeedReading::TimedOut,
            Err(RecvTimeoutError::Disconnected) => {
                log::warn!("feed '{}': worker exited; feed disabled", feed.name);
                feed.disable("worker exited".to_string());
                stats.disabled_feeds += 1;
                return FeedReading::Disabled;
            }
        }
    }
}
