//! Occupancy-driven scene switcher
//!
//! This crate implements a closed control loop that watches several camera feeds
//! and keeps the live output on whichever feed currently shows the most instances
//! of a target object class.
//!
//! # Architecture
//!
//! Each tick runs sense -> infer -> decide -> act:
//!
//! 1. **Sample**: every feed's source yields at most one frame; "no frame" is normal.
//! 2. **Score**: the detector runs on each frame and detections of the target class
//!    above the confidence threshold are counted.
//! 3. **Aggregate**: the latest count per feed is kept for a window of ticks; when
//!    the window closes the highest count wins (ties go to the first feed name).
//! 4. **Switch**: the winner goes live unless it already is or the cooldown since
//!    the last switch has not expired.
//!
//! Failures stay contained to their feed and tick. Only bad configuration stops
//! the process.
//!
//! # Module Structure
//!
//! - `ingest`: video sources (V4L2, RTSP, HTTP snapshots, synthetic `stub://`)
//! - `registry`, `sampler`: feed name -> source, one frame per tick
//! - `detect`, `occupancy`: detector backends and the detections -> count reduction
//! - `aggregate`, `switch`: decision windows and the cooldown/hysteresis policy
//! - `controller`: output controllers (in-memory, HTTP)
//! - `driver`: the control loop itself
//! - `config`, `error`: layered configuration and the failure taxonomy

pub mod aggregate;
pub mod config;
pub mod controller;
pub mod detect;
pub mod driver;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod occupancy;
pub mod registry;
pub mod sampler;
pub mod switch;

pub use aggregate::{Decision, DecisionAggregator, OccupancySnapshot, WindowOutcome};
pub use config::{ControllerSettings, DetectorSettings, LoopSettings, SwitcherConfig};
pub use controller::{build_controller, MemoryController, OutputController};
pub use detect::{build_backend, Detection, ObjectDetector, SharedDetector, StubBackend};
pub use driver::{ControlLoop, FeedReading, LoopStats, ShutdownSignal, TickReport};
pub use error::SwitcherError;
pub use frame::Frame;
pub use ingest::{SourceDescriptor, SourceStats, VideoSource};
pub use occupancy::OccupancyScorer;
pub use registry::{FeedHandle, SourceRegistry};
pub use sampler::FrameSampler;
pub use switch::{CooldownTimer, SwitchOutcome, SwitchPolicy};
