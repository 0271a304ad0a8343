//! Decision windows.
//!
//! The aggregator collects one reading per feed per tick into an
//! `OccupancySnapshot`. A newer reading overwrites the older one: the snapshot
//! models occupancy *now*, not a running sum. After `window` ticks the snapshot is
//! compared, a winner is emitted (if any feed was scored at all), and the window
//! starts over with an empty snapshot. Snapshots are never carried between windows.

use std::collections::BTreeMap;

pub const DEFAULT_WINDOW_TICKS: u32 = 20;

/// Feed name -> latest occupancy, for exactly one window.
///
/// Feeds that produced no score are absent, never zero.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OccupancySnapshot {
    entries: BTreeMap<String, u32>,
}

impl OccupancySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the feed's entry.
    pub fn record(&mut self, feed: impl Into<String>, occupancy: u32) {
        self.entries.insert(feed.into(), occupancy);
    }

    /// Drop the feed's entry, returning its occupancy if it had one.
    pub fn remove(&mut self, feed: &str) -> Option<u32> {
        self.entries.remove(feed)
    }

    pub fn get(&self, feed: &str) -> Option<u32> {
        self.entries.get(feed).copied()
    }

    pub fn contains(&self, feed: &str) -> bool {
        self.entries.contains_key(feed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in feed-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.entries.iter().map(|(name, count)| (name.as_str(), *count))
    }

    /// Highest occupancy; ties go to the lexicographically first feed name.
    pub fn leader(&self) -> Option<(&str, u32)> {
        let mut leader: Option<(&str, u32)> = None;
        for (name, count) in self.iter() {
            match leader {
                Some((_, best)) if count <= best => {}
                _ => leader = Some((name, count)),
            }
        }
        leader
    }
}

impl FromIterator<(String, u32)> for OccupancySnapshot {
    fn from_iter<I: IntoIterator<Item = (String, u32)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// A completed window with a winner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decision {
    pub winner: String,
    pub occupancy: u32,
    /// The window's final snapshot.
    pub snapshot: OccupancySnapshot,
}

/// What a tick did to the current window.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WindowOutcome {
    /// Window still open; `ticks` observed so far.
    Accumulating { ticks: u32 },
    /// Window closed with a winner.
    Decided(Decision),
    /// Window closed but no feed was scored in it. No decision.
    Empty,
}

impl WindowOutcome {
    pub fn decision(&self) -> Option<&Decision> {
        match self {
            Self::Decided(decision) => Some(decision),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct DecisionAggregator {
    window: u32,
    ticks: u32,
    snapshot: OccupancySnapshot,
}

impl DecisionAggregator {
    /// A window of zero ticks is treated as one.
    pub fn new(window: u32) -> Self {
        Self {
            window: window.max(1),
            ticks: 0,
            snapshot: OccupancySnapshot::new(),
        }
    }

    pub fn window(&self) -> u32 {
        self.window
    }

    pub fn ticks_in_window(&self) -> u32 {
        self.ticks
    }

    /// Snapshot under construction for the current window.
    pub fn snapshot(&self) -> &OccupancySnapshot {
        &self.snapshot
    }

    /// Drop a feed that has left the run from the open window.
    pub fn forget(&mut self, feed: &str) -> bool {
        self.snapshot.remove(feed).is_some()
    }

    /// Fold one tick of readings into the window.
    pub fn observe<I>(&mut self, readings: I) -> WindowOutcome
    where
        I: IntoIterator<Item = (String, u32)>,
    {
        for (feed, occupancy) in readings {
            self.snapshot.record(feed, occupancy);
        }
        self.ticks += 1;

        if self.ticks < self.window {
            return WindowOutcome::Accumulating { ticks: self.ticks };
        }

        self.ticks = 0;
        let snapshot = std::mem::take(&mut self.snapshot);
        let Some((winner, occupancy)) = snapshot.leader() else {
            return WindowOutcome::Empty;
        };
        let winner = winner.to_string();
        WindowOutcome::Decided(Decision {
            winner,
            occupancy,
            snapshot,
        })
    }
}

impl Default for DecisionAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_TICKS)
    }
}
