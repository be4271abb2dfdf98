#![allow(clippy::unwrap_used, clippy::expect_used)]

use conductor_core::*;
use std::sync::{Arc, Mutex};

// ---------------------------------------------------------------------------
// 1. Failure classification
// ---------------------------------------------------------------------------

#[test]
fn every_failure_kind_has_one_class() {
    let transient = [
        FailureKind::RateLimit,
        FailureKind::Overload,
        FailureKind::Timeout,
        FailureKind::Network,
    ];
    let fatal = [
        FailureKind::Auth,
        FailureKind::MalformedRequest,
        FailureKind::ContentPolicy,
    ];
    for kind in transient {
        assert_eq!(kind.class(), FailureClass::Transient, "{kind}");
        assert!(kind.is_transient());
    }
    for kind in fatal {
        assert_eq!(kind.class(), FailureClass::Fatal, "{kind}");
        assert!(!kind.is_transient());
    }
}

#[test]
fn provider_error_display_and_class() {
    let err = ProviderError::timeout("no response after 60000ms");
    assert_eq!(err.kind, FailureKind::Timeout);
    assert_eq!(err.class(), FailureClass::Transient);
    assert_eq!(err.to_string(), "timeout error: no response after 60000ms");
}

// ---------------------------------------------------------------------------
// 2. Attempt history flows into the exhausted-chain error
// ---------------------------------------------------------------------------

#[test]
fn exhausted_fallback_reports_every_attempt() {
    let attempts = vec![
        AttemptRecord {
            target: "claude-sonnet".into(),
            outcome: AttemptOutcome::CircuitOpen,
        },
        AttemptRecord {
            target: "gpt-4o".into(),
            outcome: AttemptOutcome::Failed {
                error: ProviderError::new(FailureKind::Overload, "529"),
            },
        },
        AttemptRecord {
            target: "gemini-pro".into(),
            outcome: AttemptOutcome::OverBudget {
                estimated: 0.02,
                remaining: 0.01,
            },
        },
    ];
    let err = ConductorError::ExhaustedFallback {
        attempts: attempts.clone(),
    };
    let message = err.to_string();
    assert!(message.contains("claude-sonnet: circuit open"));
    assert!(message.contains("gpt-4o: overload error: 529"));
    assert!(message.contains("gemini-pro: estimated $0.0200 exceeds remaining $0.0100"));

    // the last real failure was transient, so the task may be retried
    assert!(!err.is_fatal());

    let json = serde_json::to_value(&attempts).unwrap();
    assert_eq!(json[0]["outcome"], "circuit_open");
    assert_eq!(json[1]["error"]["kind"], "overload");
    let back: Vec<AttemptRecord> = serde_json::from_value(json).unwrap();
    assert_eq!(back, attempts);
}

#[test]
fn fatal_errors_are_not_retried() {
    let auth = ConductorError::ExhaustedFallback {
        attempts: vec![AttemptRecord {
            target: "gpt-4o".into(),
            outcome: AttemptOutcome::Failed {
                error: ProviderError::new(FailureKind::Auth, "401"),
            },
        }],
    };
    assert!(auth.is_fatal());

    let budget = ConductorError::BudgetExceeded {
        required: 0.05,
        remaining: 0.0,
    };
    assert!(budget.is_fatal());
    assert!(budget.provider_error().is_none());

    let policy: ConductorError = ProviderError::new(FailureKind::ContentPolicy, "refused").into();
    assert!(policy.is_fatal());
    assert_eq!(
        policy.provider_error().map(|e| e.kind),
        Some(FailureKind::ContentPolicy)
    );

    let config = ConductorError::Config("max_workers must be at least 1".into());
    assert!(!config.is_fatal());
}

#[test]
fn graph_errors_name_their_tasks() {
    let deadlock = ConductorError::Deadlock {
        pending: vec!["a".into(), "b".into()],
    };
    assert_eq!(
        deadlock.to_string(),
        "Task deadlock: 2 pending task(s) can never become ready: a, b"
    );

    let unsatisfied = ConductorError::DependencyUnsatisfied {
        task: "report".into(),
        dependency: "fetch".into(),
    };
    assert!(unsatisfied.to_string().contains("'report'"));
    assert!(unsatisfied.to_string().contains("'fetch'"));
}

#[test]
fn conversions_from_foreign_errors() {
    let json: ConductorError = serde_json::from_str::<serde_json::Value>("{")
        .unwrap_err()
        .into();
    assert!(matches!(json, ConductorError::Json(_)));

    let toml: ConductorError = toml::from_str::<toml::Value>("= 1").unwrap_err().into();
    assert!(matches!(toml, ConductorError::Toml(_)));

    let io: ConductorError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
    assert!(io.to_string().starts_with("IO error"));
}

// ---------------------------------------------------------------------------
// 3. Event sinks
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Collect(Mutex<Vec<LifecycleEvent>>);

impl EventSink for Collect {
    fn emit(&self, event: &LifecycleEvent) {
        self.0.lock().unwrap().push(event.clone());
    }
}

#[test]
fn fanout_preserves_order_and_tracing_sink_accepts_everything() {
    let collected = Arc::new(Collect::default());
    let sink = FanoutSink::new()
        .with(Arc::new(TracingSink))
        .with(Arc::new(NullSink))
        .with(collected.clone());

    let events = vec![
        LifecycleEvent::TaskStarted {
            task: "fetch".into(),
            role: "fetcher".into(),
            iteration: 1,
        },
        LifecycleEvent::FallbackUsed {
            from: "claude-sonnet".into(),
            to: "gpt-4o".into(),
        },
        LifecycleEvent::BudgetExceeded {
            required: 0.02,
            remaining: 0.0,
        },
        LifecycleEvent::TaskFailed {
            task: "fetch".into(),
            role: "fetcher".into(),
            reason: "budget exceeded".into(),
            required: true,
        },
    ];
    for event in &events {
        sink.emit(event);
    }

    let seen = collected.0.lock().unwrap().clone();
    assert_eq!(seen, events);
    let names: Vec<_> = seen.iter().map(LifecycleEvent::name).collect();
    assert_eq!(
        names,
        vec!["task_started", "fallback_used", "budget_exceeded", "task_failed"]
    );
}
