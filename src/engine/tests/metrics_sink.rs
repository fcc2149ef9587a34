//! The metrics sink is process-wide, so every test in the crate reports to
//! it. Assertions only look at evaluations of the probe principal.

use super::*;
use crate::metrics::{EvaluationPhases, EvaluationStats, MetricsSink, ReloadStats};
use crate::types::Entity;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};

const PROBE: &str = "User::\"metrics_probe\"";

#[derive(Default)]
struct TestMetricsSink {
    evaluations: Mutex<Vec<(EvaluationStats, EvaluationPhases)>>,
    reloads: AtomicUsize,
}

impl MetricsSink for TestMetricsSink {
    fn on_evaluation(&self, _stats: &EvaluationStats) {}

    fn on_reload(&self, _stats: &ReloadStats) {
        self.reloads.fetch_add(1, Ordering::Relaxed);
    }

    fn on_evaluation_phases(&self, stats: &EvaluationStats, phases: &EvaluationPhases) {
        if stats.principal_id == PROBE {
            self.evaluations
                .lock()
                .unwrap()
                .push((stats.clone(), phases.clone()));
        }
    }
}

fn test_sink() -> Arc<TestMetricsSink> {
    static SINK: OnceLock<Arc<TestMetricsSink>> = OnceLock::new();
    SINK.get_or_init(|| {
        let sink = Arc::new(TestMetricsSink::default());
        crate::metrics::set_sink(sink.clone());
        sink
    })
    .clone()
}

#[test]
fn test_metrics_track_evaluations() {
    let sink = test_sink();
    let reloads_before = sink.reloads.load(Ordering::Relaxed);

    let engine = schema_engine_from_policy(CONFIDENCE_POLICY);
    engine.reload_from_json(CONFIDENCE_POLICY).unwrap();
    assert!(sink.reloads.load(Ordering::Relaxed) >= reloads_before + 2);

    let probe = Entity::new(uid("User", "metrics_probe")).with_attr("department", "qa");
    let photo = Entity::new(uid("Photo", "VacationPhoto94.jpg"))
        .with_attr("private", false)
        .with_attr("tags", Value::set([]));
    let store = EntityStore::new_with_schema([probe, photo], &schema()).unwrap();

    let request = photo_request("metrics_probe", "view", "VacationPhoto94.jpg", "0.9");
    let response = engine.evaluate(&request, &store).unwrap();
    assert_deny(&response);

    let evaluations = sink.evaluations.lock().unwrap();
    let (stats, phases) = evaluations.last().expect("probe evaluation recorded");
    assert!(!stats.allowed);
    assert_eq!(stats.action_id, "Action::\"view\"");
    assert!(stats.reasons.is_empty());
    assert_eq!(stats.errors, 0);
    assert!(phases.total_ms >= phases.scope_ms + phases.conditions_ms);
    assert!(phases.validate_request_ms >= 0.0);
}
