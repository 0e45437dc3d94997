//! Session flow tests through the adaptive controller

mod helpers;

use btr_common::events::RectificationEvent;
use btr_engine::config::RectificationConfig;
use btr_engine::models::SessionState;
use btr_engine::predictors::{PredictorRegistry, ReasoningService, TechniquePredictor};
use btr_engine::session::{SessionController, SessionResult, SessionStore};
use btr_engine::types::{LifeEventAnswer, ReliabilityLevel};
use btr_common::events::EventBus;
use helpers::*;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_iteration_budget_exhausted_without_reaching_threshold() {
    // Agreeing spikes give full base and agreement; quality caps the score at 70
    let controller = controller(
        details_only_config(),
        spikes(&[("kp", 870), ("nadi", 870), ("tattva", 870)]),
    );
    let mut outcome = controller
        .create_session(sample_chart(), Some(rough_details()), Vec::new())
        .await
        .unwrap();
    let session_id = outcome.session_id;
    let mut scores = vec![outcome.result.as_ref().unwrap().score];

    while outcome.status == SessionState::AwaitingAnswers {
        let pending: Vec<String> = outcome.next_questions.iter().map(|q| q.id.to_string()).collect();
        outcome = controller
            .submit_answers(session_id, answer_all(&pending))
            .await
            .unwrap();
        scores.push(outcome.result.as_ref().unwrap().score);
    }

    assert_eq!(outcome.status, SessionState::Terminated);
    assert!(outcome.insufficient_confidence);
    assert_eq!(outcome.iteration_count, 5);
    assert_eq!(scores.len(), 5);
    assert!(scores.iter().all(|s| (60.0..=75.0).contains(s)), "scores {:?}", scores);

    let result = outcome.result.unwrap();
    assert_eq!(result.score, 70.0);
    assert_eq!(result.rectified_time, 870);
    assert_eq!(result.reliability_level, ReliabilityLevel::VeryHigh);

    match controller.get_result(session_id).await.unwrap() {
        SessionResult::Final {
            insufficient_confidence,
            result,
            iteration_count,
            ..
        } => {
            assert!(insufficient_confidence);
            assert_eq!(iteration_count, 5);
            assert_eq!(result.unwrap().score, 70.0);
        }
        other => panic!("expected final result, got {:?}", other),
    }
}

#[tokio::test]
async fn test_precise_input_with_agreement_completes() {
    let controller = controller(
        details_only_config(),
        spikes(&[("kp", 868), ("nadi", 870), ("tattva", 872)]),
    );
    let outcome = controller
        .create_session(sample_chart(), Some(precise_details()), Vec::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, SessionState::Completed);
    assert!(!outcome.insufficient_confidence);
    let result = outcome.result.unwrap();
    assert!(result.score >= 80.0, "score {}", result.score);
    assert_eq!(result.rectified_time, 870);
    let weight_sum: f64 = result.contributing_weights.values().sum();
    assert!((weight_sum - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_duplicate_submission_is_idempotent() {
    let controller = controller(RectificationConfig::default(), spikes(&[("kp", 600), ("nadi", 900)]));
    let created = controller
        .create_session(sample_chart(), None, Vec::new())
        .await
        .unwrap();
    let id = created.session_id;

    let answers = vec![
        LifeEventAnswer::new("marriage_date", "2011-02-14"),
        LifeEventAnswer::new("self_description", "Calm and reflective, usually up early in the morning"),
    ];
    let first = controller.submit_answers(id, answers.clone()).await.unwrap();
    let retry = controller.submit_answers(id, answers).await.unwrap();

    assert_eq!(first.iteration_count, 2);
    assert_eq!(retry.iteration_count, 2);
    let (a, b) = (first.result.unwrap(), retry.result.unwrap());
    assert_eq!(a.quality.completeness_fraction, b.quality.completeness_fraction);
    assert_eq!(a, b);
    assert_eq!(controller.snapshot(id).await.unwrap().answers.len(), 2);
}

#[tokio::test]
async fn test_aggregation_error_terminates_with_error() {
    let predictors: Vec<Arc<dyn TechniquePredictor>> =
        vec![Arc::new(SpikePredictor::new("kp", 870)), Arc::new(UnnormalizedPredictor)];
    let controller = controller(RectificationConfig::default(), predictors);
    let outcome = controller
        .create_session(sample_chart(), None, Vec::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, SessionState::Terminated);
    assert!(!outcome.insufficient_confidence);
    assert!(outcome.result.is_none());
    assert!(outcome.error.unwrap().contains("broken"));
    assert_eq!(outcome.iteration_count, 0);
}

#[tokio::test]
async fn test_slow_predictor_degrades_instead_of_failing() {
    let mut config = RectificationConfig::default();
    config.predictor_timeout_ms = 50;
    config.predictor_retry_attempts = 0;

    let event_bus = EventBus::new(64);
    let mut rx = event_bus.subscribe();
    let predictors: Vec<Arc<dyn TechniquePredictor>> = vec![
        Arc::new(SpikePredictor::new("kp", 860)),
        Arc::new(SpikePredictor::new("nadi", 880)),
        Arc::new(SpikePredictor::slow("tattva", 870, Duration::from_secs(5))),
    ];
    let controller = SessionController::new(
        config.clone(),
        registry(&config, predictors),
        Arc::new(SessionStore::new()),
        event_bus,
    );

    let outcome = controller
        .create_session(sample_chart(), None, Vec::new())
        .await
        .unwrap();
    let result = outcome.result.unwrap();
    assert_eq!(result.degraded_techniques, vec!["tattva".to_string()]);
    // Fallback estimates carry no agreement weight
    assert_eq!(result.agreement.pair_count, 1);
    assert_eq!(result.contributing_weights["tattva"], 0.0);

    let mut degraded = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let RectificationEvent::TechniqueDegraded { technique_id, reason, .. } = event {
            degraded.push((technique_id, reason));
        }
    }
    assert_eq!(degraded.len(), 1);
    assert_eq!(degraded[0].0, "tattva");
    assert!(degraded[0].1.contains("timed out"));
}

#[tokio::test]
async fn test_concurrent_submissions_are_serialized() {
    let controller = Arc::new(controller(
        RectificationConfig::default(),
        spikes(&[("kp", 600), ("nadi", 900)]),
    ));
    let created = controller
        .create_session(sample_chart(), None, Vec::new())
        .await
        .unwrap();
    let id = created.session_id;

    let tasks: Vec<_> = ["career_change", "lived_abroad"]
        .into_iter()
        .map(|question| {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move {
                controller
                    .submit_answers(id, vec![LifeEventAnswer::new(question, "yes")])
                    .await
            })
        })
        .collect();
    let mut iterations = Vec::new();
    for task in tasks {
        iterations.push(task.await.unwrap().unwrap().iteration_count);
    }
    iterations.sort();
    assert_eq!(iterations, vec![2, 3]);

    let session = controller.snapshot(id).await.unwrap();
    assert_eq!(session.iteration_count, 3);
    assert_eq!(session.answers.len(), 2);
}

#[tokio::test]
async fn test_default_predictors_are_deterministic() {
    let config = RectificationConfig::default();
    let registry = Arc::new(PredictorRegistry::with_defaults(&config, None).unwrap());
    let controller = SessionController::new(
        config,
        registry,
        Arc::new(SessionStore::new()),
        EventBus::new(64),
    );
    let seed = vec![
        LifeEventAnswer::new("marriage_date", "2011-02-14"),
        LifeEventAnswer::new("career_change", "yes"),
        LifeEventAnswer::new("temperament", "fiery"),
    ];

    let first = controller
        .create_session(sample_chart(), Some(precise_details()), seed.clone())
        .await
        .unwrap();
    let second = controller
        .create_session(sample_chart(), Some(precise_details()), seed)
        .await
        .unwrap();

    assert_ne!(first.session_id, second.session_id);
    let (a, b) = (first.result.unwrap(), second.result.unwrap());
    assert_eq!(a, b);
    assert!((0.0..=100.0).contains(&a.score));
    assert_eq!(a.contributing_weights.len(), 3);
    assert!(a.degraded_techniques.is_empty());
}

#[tokio::test]
async fn test_question_selection_targets_weakest_technique() {
    let config = RectificationConfig::default();
    let controller = SessionController::new(
        config.clone(),
        Arc::new(PredictorRegistry::with_defaults(&config, None).unwrap()),
        Arc::new(SessionStore::new()),
        EventBus::new(16),
    );
    let outcome = controller
        .create_session(sample_chart(), None, Vec::new())
        .await
        .unwrap();
    if outcome.status == SessionState::AwaitingAnswers {
        let result = outcome.result.as_ref().unwrap();
        let weakest = result
            .contributing_weights
            .iter()
            .min_by(|a, b| a.1.total_cmp(b.1).then_with(|| a.0.cmp(b.0)))
            .map(|(id, _)| id.clone())
            .unwrap();
        let registry = PredictorRegistry::with_defaults(&config, None).unwrap();
        let categories = &registry.sensitivities()[&weakest];
        assert!(categories.contains(&outcome.next_questions[0].category));
    }
}

#[tokio::test]
async fn test_reasoning_outage_keeps_technique_agreement() {
    let config = RectificationConfig::default();
    let seed = vec![
        LifeEventAnswer::new("marriage_date", "2011-02-14"),
        LifeEventAnswer::new("career_change", "yes"),
    ];
    let down: Arc<dyn ReasoningService> = Arc::new(UnreachableReasoning);
    let build = |reasoning: Option<(Arc<dyn ReasoningService>, usize)>| {
        SessionController::new(
            config.clone(),
            Arc::new(PredictorRegistry::with_defaults(&config, reasoning).unwrap()),
            Arc::new(SessionStore::new()),
            EventBus::new(64),
        )
    };

    let baseline = build(None)
        .create_session(sample_chart(), None, seed.clone())
        .await
        .unwrap()
        .result
        .unwrap();
    let outage = build(Some((down, 3)))
        .create_session(sample_chart(), None, seed)
        .await
        .unwrap()
        .result
        .unwrap();

    assert!(baseline.degraded_techniques.is_empty());
    assert_eq!(outage.degraded_techniques, vec!["kp", "nadi", "tattva"]);
    // Every technique still delivered its own peak
    assert_eq!(outage.agreement, baseline.agreement);
    assert!(!outage.agreement.insufficient_techniques);
    assert_eq!(outage.agreement.pair_count, 3);
    assert!((outage.score - baseline.score).abs() < 0.01);
}
