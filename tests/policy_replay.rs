//! Policy engine scenarios and replay determinism through the public API.

use std::collections::BTreeSet;

use serde_json::json;

use gmv_ops::pipeline::PipelineContext;
use gmv_ops::policy::{
    Action, DecisionLog, EngineConfig, PolicyEngine, PolicyRisk, Signal, compare, replay_file,
};

const SIGNALS: &str = r#"{"step": "assembly", "signal": {"status": "failed", "error_type": "oom", "attempt": 1, "observed_at": "2024-06-01T08:00:00+00:00"}}
{"step": "checkv", "signal": {"status": "low_yield", "yield_count": 0, "observed_at": "2024-06-01T09:00:00+00:00"}}
{"step": "preprocess", "signal": {"status": "failed", "attempt": 2}}

{"step": "preprocess", "signal": {"status": "failed", "attempt": 3}}
{"step": "busco_filter", "signal": {"status": "success"}}
"#;

#[test]
fn oom_and_low_yield_scenarios() {
    let engine = PolicyEngine::new(EngineConfig {
        retry_limit: 2,
        low_yield_threshold: 5,
        ..EngineConfig::default()
    });

    let oom = engine.evaluate(
        "assembly",
        &Signal::new("failed").with("error_type", "oom").with_attempt(1),
    );
    assert_eq!(oom.action, Action::IncreaseResources);
    assert_eq!(oom.risk_level, PolicyRisk::Low);
    assert!(oom.auto_applied);

    let low = engine.evaluate("checkv", &Signal::new("low_yield").with("yield_count", 0));
    assert_eq!(low.action, Action::RelaxQualityThreshold);
    assert_eq!(low.risk_level, PolicyRisk::High);
    assert!(!low.auto_applied);
}

#[test]
fn replay_is_deterministic_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("signals.jsonl");
    std::fs::write(&path, SIGNALS).unwrap();

    let engine = PolicyEngine::default();
    let render = || -> Vec<String> {
        replay_file(&path, &engine)
            .unwrap()
            .iter()
            .map(|d| d.to_json_line().unwrap())
            .collect()
    };
    let first = render();
    assert_eq!(first.len(), 5);
    assert_eq!(first, render());

    let actions: Vec<Action> = replay_file(&path, &engine)
        .unwrap()
        .iter()
        .map(|d| d.action)
        .collect();
    assert_eq!(
        actions,
        [
            Action::IncreaseResources,
            Action::RelaxQualityThreshold,
            Action::Retry,
            Action::RequestManualReview,
            Action::Noop,
        ]
    );
}

#[test]
fn recorded_log_replays_without_divergence_until_config_changes() {
    let dir = tempfile::tempdir().unwrap();
    let signals = dir.path().join("signals.jsonl");
    std::fs::write(&signals, SIGNALS).unwrap();

    let engine = PolicyEngine::default();
    let log = DecisionLog::new(dir.path().join("agent/decisions.jsonl"));
    for decision in replay_file(&signals, &engine).unwrap() {
        log.append(&decision).unwrap();
    }
    let recorded = log.read_all().unwrap();

    let same = replay_file(&signals, &engine).unwrap();
    assert!(compare(&recorded, &same).unwrap().is_empty());

    // The decision log is itself valid replay input.
    assert_eq!(replay_file(log.path(), &engine).unwrap(), recorded);

    let permissive = PolicyEngine::new(EngineConfig {
        auto_apply_risk_levels: BTreeSet::from([PolicyRisk::Low, PolicyRisk::High]),
        ..EngineConfig::default()
    });
    let changed = replay_file(&signals, &permissive).unwrap();
    let diffs = compare(&recorded, &changed).unwrap();
    assert_eq!(diffs.len(), 1);
    assert_eq!(diffs[0].index, 1);
    assert_eq!(diffs[0].step, "checkv");
    assert_eq!(diffs[0].field, "auto_applied");
    assert_eq!(diffs[0].recorded, json!(false));
    assert_eq!(diffs[0].replayed, json!(true));
}

#[test]
fn pipeline_agent_section_drives_the_engine() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("pipeline.yaml");
    std::fs::write(
        &config,
        "execution:\n  run_id: demo\nagent:\n  retry_limit: 0\n  low_yield_threshold: 1\n",
    )
    .unwrap();
    let ctx = PipelineContext::load(&config, dir.path()).unwrap();
    let engine = PolicyEngine::new(ctx.engine.clone());

    let first_failure = engine.evaluate("qc", &Signal::new("failed"));
    assert_eq!(first_failure.action, Action::RequestManualReview);

    let one_survivor = engine.evaluate("checkv", &Signal::new("low_yield").with("yield_count", 1));
    assert_eq!(one_survivor.action, Action::Noop);

    assert!(ctx.decision_log_path().starts_with(dir.path().join("results/demo")));
}
