use std::time::Duration;

use anyhow::Result;

use scene_switcher::config::{CooldownSetting, LoopSettings, SwitcherConfig};
use scene_switcher::detect::{shared, StubBackend};
use scene_switcher::{
    ControlLoop, FeedReading, MemoryController, OccupancyScorer, ShutdownSignal, SourceRegistry,
    SwitchOutcome, SwitcherError, TickReport, WindowOutcome,
};

fn settings(window: u32, cooldown_ticks: u32) -> LoopSettings {
    LoopSettings {
        window_ticks: window,
        tick_interval: Duration::ZERO,
        cooldown: CooldownSetting::Ticks(cooldown_ticks),
        call_timeout: Duration::from_secs(5),
        stats_interval: Duration::from_secs(3600),
    }
}

fn control_loop(
    feeds: &[(&str, &str)],
    settings: LoopSettings,
    controller: &MemoryController,
) -> Result<ControlLoop> {
    let mut registry = SourceRegistry::new();
    for (name, pattern) in feeds {
        registry.register_location(name, &format!("stub://feed?pattern={}", pattern))?;
    }
    ControlLoop::new(
        settings,
        OccupancyScorer::new("cat", 0.5),
        registry,
        shared(StubBackend::new("cat")),
        Box::new(controller.clone()),
    )
}

fn winner(report: &TickReport) -> Option<&str> {
    report.window.decision().map(|d| d.winner.as_str())
}

#[test]
fn three_feeds_overwrite_within_window_and_absent_feed_is_not_zero() -> Result<()> {
    let controller = MemoryController::new("Feed2");
    let mut driver = control_loop(
        &[("Feed1", "1,2,2"), ("Feed2", "0,0,1"), ("Feed3", "-")],
        settings(3, 40),
        &controller,
    )?;

    let reports = driver.run_ticks(3);
    assert_eq!(reports[0].window, WindowOutcome::Accumulating { ticks: 1 });
    assert_eq!(reports[1].window, WindowOutcome::Accumulating { ticks: 2 });

    let decision = reports[2].window.decision().expect("window decided");
    assert_eq!(decision.winner, "Feed1");
    assert_eq!(decision.snapshot.get("Feed1"), Some(2));
    assert_eq!(decision.snapshot.get("Feed2"), Some(1));
    assert!(!decision.snapshot.contains("Feed3"));
    assert_eq!(decision.snapshot.len(), 2);
    assert_eq!(reports[2].reading("Feed3"), Some(&FeedReading::NoFrame));

    assert_eq!(
        reports[2].switch,
        Some(Ok(SwitchOutcome::Switched {
            from: "Feed2".to_string(),
            to: "Feed1".to_string()
        }))
    );
    assert_eq!(controller.active(), "Feed1");
    Ok(())
}

#[test]
fn winner_already_live_makes_no_set_call() -> Result<()> {
    let controller = MemoryController::new("Feed1");
    let mut driver = control_loop(&[("Feed1", "3"), ("Feed2", "1")], settings(2, 40), &controller)?;

    let reports = driver.run_ticks(6);
    let outcomes: Vec<_> = reports.iter().filter_map(|r| r.switch.clone()).collect();
    assert_eq!(outcomes, vec![Ok(SwitchOutcome::SkippedAlreadyActive); 3]);
    assert!(controller.set_calls().is_empty());
    assert_eq!(driver.cooldown_remaining(), 0);
    Ok(())
}

#[test]
fn cooldown_holds_thirty_nine_decisions_then_switches() -> Result<()> {
    let rest = vec!["0"; 60].join(",");
    let feed_b = format!("1,{}", rest);
    let feed_a = format!("0,{}", vec!["1"; 60].join(","));
    let controller = MemoryController::new("A");
    let mut driver = control_loop(&[("A", feed_a.as_str()), ("B", feed_b.as_str())], settings(1, 40), &controller)?;

    let reports = driver.run_ticks(41);
    assert!(matches!(
        reports[0].switch,
        Some(Ok(SwitchOutcome::Switched { ref to, .. })) if to == "B"
    ));
    for report in &reports[1..40] {
        assert_eq!(winner(report), Some("A"));
        assert!(
            matches!(report.switch, Some(Ok(SwitchOutcome::SkippedCooldown { .. }))),
            "tick {}: {:?}",
            report.tick,
            report.switch
        );
    }
    assert_eq!(
        reports[40].switch,
        Some(Ok(SwitchOutcome::Switched {
            from: "B".to_string(),
            to: "A".to_string()
        }))
    );
    assert_eq!(controller.set_calls(), vec!["B", "A"]);
    assert_eq!(controller.query_count(), 2);
    Ok(())
}

#[test]
fn failing_detector_feed_is_excluded_from_decision() -> Result<()> {
    let controller = MemoryController::new("Feed1");
    let mut driver = control_loop(
        &[("Feed1", "1"), ("Feed2", "x"), ("Feed3", "2")],
        settings(2, 40),
        &controller,
    )?;

    let reports = driver.run_ticks(2);
    for report in &reports {
        assert!(matches!(
            report.reading("Feed2"),
            Some(FeedReading::DetectorFailed(SwitcherError::Detector(_)))
        ));
    }
    let decision = reports[1].window.decision().expect("window decided");
    assert_eq!(decision.winner, "Feed3");
    assert!(!decision.snapshot.contains("Feed2"));
    assert_eq!(driver.stats().detector_failures, 2);
    assert_eq!(controller.active(), "Feed3");
    Ok(())
}

#[test]
fn window_with_no_frames_makes_no_decision() -> Result<()> {
    let controller = MemoryController::new("Feed1");
    let mut driver = control_loop(
        &[("Feed1", "-,-,-,1"), ("Feed2", "-")],
        settings(3, 0),
        &controller,
    )?;

    let reports = driver.run_ticks(6);
    assert_eq!(reports[2].window, WindowOutcome::Empty);
    assert!(reports[2].switch.is_none());
    // Only the second window reached the controller.
    assert_eq!(controller.query_count(), 1);

    let decision = reports[5].window.decision().expect("second window decided");
    assert_eq!(decision.winner, "Feed1");
    assert_eq!(decision.snapshot.len(), 1);
    assert_eq!(driver.stats().empty_windows, 1);
    Ok(())
}

#[test]
fn ties_go_to_first_feed_name() -> Result<()> {
    let controller = MemoryController::new("b-cam");
    let mut driver = control_loop(&[("b-cam", "2"), ("a-cam", "2")], settings(1, 0), &controller)?;

    for report in driver.run_ticks(5) {
        assert_eq!(winner(&report), Some("a-cam"));
    }
    assert_eq!(controller.set_calls(), vec!["a-cam"]);
    Ok(())
}

#[test]
fn removed_device_disables_only_its_feed() -> Result<()> {
    let controller = MemoryController::new("Porch");
    let mut driver = control_loop(&[("Garage", "5,!"), ("Porch", "1")], settings(2, 0), &controller)?;

    let reports = driver.run_ticks(4);
    assert!(matches!(
        reports[1].reading("Garage"),
        Some(FeedReading::SourceFatal(SwitcherError::SourceFatal { .. }))
    ));
    // Garage led the window until it died; its reading goes with it.
    let decision = reports[1].window.decision().expect("window decided");
    assert_eq!(decision.winner, "Porch");
    assert!(!decision.snapshot.contains("Garage"));
    assert_eq!(reports[1].switch, Some(Ok(SwitchOutcome::SkippedAlreadyActive)));

    assert_eq!(reports[2].reading("Garage"), Some(&FeedReading::Disabled));
    assert_eq!(winner(&reports[3]), Some("Porch"));
    assert!(controller.set_calls().is_empty());
    assert_eq!(controller.active(), "Porch");
    assert_eq!(driver.active_feeds(), vec!["Porch"]);
    Ok(())
}

#[test]
fn configured_loop_runs_to_tick_limit_and_releases_resources() -> Result<()> {
    let config = SwitcherConfig::from_toml_str(
        r#"
            [timing]
            window_ticks = 2
            tick_interval_ms = 1

            [controller]
            initial_output = "Porch"

            [feeds]
            "Porch" = "stub://porch?pattern=1"
            "Yard" = "stub://yard?pattern=3"
        "#,
    )?;
    let mut driver = ControlLoop::from_config(&config)?;

    let stats = driver.run(&ShutdownSignal::new(), Some(4));
    assert_eq!(stats.ticks, 4);
    assert_eq!(stats.decisions, 2);
    assert_eq!(stats.switches, 1);
    assert_eq!(stats.skipped_cooldown, 1);
    Ok(())
}
