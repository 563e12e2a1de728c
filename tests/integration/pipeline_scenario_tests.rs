/*!
 * End-to-end pipeline scenarios with scripted providers.
 *
 * Every scenario runs the real orchestrator, executor, policy and ledger;
 * only the provider backends are scripted.
 */

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use novelwai::app_config::RetrySettings;
use novelwai::errors::FailureKind;
use novelwai::ledger::{AttemptOutcome, JobLedger, UnitStatus};
use novelwai::providers::{ScriptedOutcome, ScriptedProvider};
use novelwai::translation::prompts::Prompt;
use novelwai::translation::{
    Chapter, DocumentStatus, Glossary, GlossaryEntry, Orchestrator, Phase, PhaseSet,
    PipelineEvent, PipelineState, PromptBuilder, PromptTask, TermCategory, WorkUnit,
};

use crate::common::{
    calls_in_phase, create_temp_dir, init_test_logger, new_call_log, pipeline_config,
    scripted_registry, three_chapter_document,
};

fn orchestrator() -> Orchestrator {
    init_test_logger();
    Orchestrator::new(JobLedger::open_in_memory().unwrap())
}

/// (provider, succeeded) per attempt of one unit
async fn attempt_summary(
    ledger: &JobLedger,
    phase: Phase,
    unit_key: &str,
) -> Vec<(String, bool)> {
    ledger
        .attempts_for_unit("novel", phase, unit_key)
        .await
        .unwrap()
        .into_iter()
        .map(|a| (a.provider, a.outcome.is_success()))
        .collect()
}

fn unit_keys(calls: &[novelwai::providers::mock::ScriptedCall]) -> Vec<&str> {
    calls.iter().map(|c| c.unit_key.as_str()).collect()
}

#[tokio::test]
async fn test_rateLimitedChapter_shouldFallBackAndComplete() {
    let p1 = ScriptedProvider::named("p1").on_unit(
        Phase::Translate,
        "ch-2",
        [
            ScriptedOutcome::Fail(FailureKind::RateLimited),
            ScriptedOutcome::Fail(FailureKind::RateLimited),
        ],
    );
    let p2 = ScriptedProvider::named("p2");
    let orchestrator = orchestrator();

    let state = orchestrator
        .start_with_providers(
            three_chapter_document(),
            &pipeline_config(&["p1", "p2"], 2),
            PhaseSet::full(),
            &scripted_registry(vec![("p1", p1), ("p2", p2)]),
        )
        .await
        .unwrap();

    assert_eq!(state, PipelineState::Completed);
    let ledger = orchestrator.ledger();
    assert_eq!(
        attempt_summary(ledger, Phase::Translate, "ch-1").await,
        vec![("p1".to_string(), true)]
    );
    assert_eq!(
        attempt_summary(ledger, Phase::Translate, "ch-2").await,
        vec![
            ("p1".to_string(), false),
            ("p1".to_string(), false),
            ("p2".to_string(), true),
        ]
    );
    assert_eq!(
        attempt_summary(ledger, Phase::Translate, "ch-3").await,
        vec![("p1".to_string(), true)]
    );

    let document = orchestrator.load_document("novel").await.unwrap();
    assert!(document.chapters[1].translated_text.as_deref().unwrap().starts_with("[p2]"));

    let status = orchestrator.status("novel").await.unwrap();
    assert_eq!(status.status, DocumentStatus::Completed);
    assert_eq!(status.cost.per_provider["p2"].attempts, 1);
}

#[tokio::test]
async fn test_exhaustedChapter_shouldFailFastAndIdentifyUnit() {
    let log = new_call_log();
    let p1 = ScriptedProvider::named("p1")
        .with_call_log(log.clone())
        .always_on_unit(
            Phase::Translate,
            "ch-2",
            ScriptedOutcome::Fail(FailureKind::ServiceUnavailable),
        );
    let p2 = ScriptedProvider::named("p2")
        .with_call_log(log.clone())
        .always_on_unit(Phase::Translate, "ch-2", ScriptedOutcome::Fail(FailureKind::Timeout));
    let orchestrator = orchestrator();

    let state = orchestrator
        .start_with_providers(
            three_chapter_document(),
            &pipeline_config(&["p1", "p2"], 2),
            PhaseSet::full(),
            &scripted_registry(vec![("p1", p1), ("p2", p2)]),
        )
        .await
        .unwrap();

    let PipelineState::Failed {
        phase,
        failure: Some(failure),
        ..
    } = state
    else {
        panic!("expected a unit failure, got {}", state);
    };
    assert_eq!(phase, Phase::Translate);
    assert_eq!(failure.unit_key, "ch-2");
    let tried: Vec<(&str, u32, FailureKind)> = failure
        .trials
        .iter()
        .map(|t| (t.provider.as_str(), t.attempts, t.last_failure))
        .collect();
    assert_eq!(
        tried,
        vec![
            ("p1", 2, FailureKind::ServiceUnavailable),
            ("p2", 2, FailureKind::Timeout),
        ]
    );

    // ch-1 stays done, ch-3 was never dispatched
    let translate_calls = calls_in_phase(&log, Phase::Translate);
    assert!(!unit_keys(&translate_calls).contains(&"ch-3"));
    let history = orchestrator
        .ledger()
        .unit_history("novel", Phase::Translate, "ch-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(history.record.status, UnitStatus::Succeeded);

    // Attempts per unit never exceed providers x retries
    let mut per_unit: HashMap<(Phase, String), usize> = HashMap::new();
    for attempt in orchestrator.ledger().attempts_for_document("novel").await.unwrap() {
        *per_unit.entry((attempt.phase, attempt.unit_key)).or_default() += 1;
    }
    assert!(per_unit.values().all(|count| *count <= 2 * 2));
    assert_eq!(per_unit[&(Phase::Translate, "ch-2".to_string())], 4);
}

#[tokio::test]
async fn test_stopBetweenChapters_shouldPauseAndResumeAtNextChapter() {
    let log = new_call_log();
    let orchestrator = orchestrator();
    let stopper = orchestrator.clone();
    let p1 = ScriptedProvider::named("p1")
        .with_call_log(log.clone())
        .with_hook(move |call| {
            if call.phase == Phase::Translate && call.unit_key == "ch-1" {
                stopper.stop();
            }
        });
    let config = pipeline_config(&["p1"], 2);

    let state = orchestrator
        .start_with_providers(
            three_chapter_document(),
            &config,
            PhaseSet::full(),
            &scripted_registry(vec![("p1", p1)]),
        )
        .await
        .unwrap();

    assert_eq!(state, PipelineState::Paused { phase: Phase::Translate });
    assert_eq!(unit_keys(&calls_in_phase(&log, Phase::Translate)), vec!["ch-1"]);
    let history = orchestrator
        .ledger()
        .unit_history("novel", Phase::Translate, "ch-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(history.record.status, UnitStatus::Succeeded);
    assert!(
        !orchestrator
            .ledger()
            .is_phase_complete("novel", Phase::Translate)
            .await
            .unwrap()
    );

    let p1 = ScriptedProvider::named("p1").with_call_log(log.clone());
    let state = orchestrator
        .resume_with_providers("novel", &config, &scripted_registry(vec![("p1", p1)]))
        .await
        .unwrap();

    assert_eq!(state, PipelineState::Completed);
    assert_eq!(
        unit_keys(&calls_in_phase(&log, Phase::Translate)),
        vec!["ch-1", "ch-2", "ch-3"]
    );
    // The glossary phase was complete before the stop
    assert_eq!(calls_in_phase(&log, Phase::Glossary).len(), 3);
}

#[tokio::test]
async fn test_pauseDuringCall_shouldLetCallFinishAndResumeAtNextChapter() {
    let log = new_call_log();
    let orchestrator = orchestrator();
    let pauser = orchestrator.clone();
    // The delay keeps the ch-1 call in flight while the pause lands
    let p1 = ScriptedProvider::named("p1")
        .with_call_log(log.clone())
        .with_delay(Duration::from_millis(50))
        .with_hook(move |call| {
            if call.phase == Phase::Translate && call.unit_key == "ch-1" {
                assert!(pauser.pause());
            }
        });
    let config = pipeline_config(&["p1"], 2);

    let state = orchestrator
        .start_with_providers(
            three_chapter_document(),
            &config,
            PhaseSet::full().without_proofing(),
            &scripted_registry(vec![("p1", p1)]),
        )
        .await
        .unwrap();

    assert_eq!(state, PipelineState::Paused { phase: Phase::Translate });
    assert_eq!(
        attempt_summary(orchestrator.ledger(), Phase::Translate, "ch-1").await,
        vec![("p1".to_string(), true)]
    );
    assert_eq!(unit_keys(&calls_in_phase(&log, Phase::Translate)), vec!["ch-1"]);

    let p1 = ScriptedProvider::named("p1").with_call_log(log.clone());
    let state = orchestrator
        .resume_with_providers("novel", &config, &scripted_registry(vec![("p1", p1)]))
        .await
        .unwrap();

    assert_eq!(state, PipelineState::Completed);
    assert_eq!(
        unit_keys(&calls_in_phase(&log, Phase::Translate)),
        vec!["ch-1", "ch-2", "ch-3"]
    );
}

#[tokio::test]
async fn test_stopDuringBackoff_shouldPauseWithoutWaitingOutDelay() {
    let orchestrator = orchestrator();
    let p1 = ScriptedProvider::named("p1").always_on_unit(
        Phase::Glossary,
        "ch-1",
        ScriptedOutcome::Fail(FailureKind::RateLimited),
    );
    let config = pipeline_config(&["p1"], 3).with_retry(RetrySettings {
        max_retries_per_provider: 3,
        rate_limit_base_delay_ms: 30_000,
        max_delay_ms: 60_000,
        jitter_ratio: 0.0,
        ..RetrySettings::immediate(3)
    });

    let stopper = orchestrator.clone();
    let stop = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        stopper.stop()
    });

    let started = tokio::time::Instant::now();
    let state = orchestrator
        .start_with_providers(
            three_chapter_document(),
            &config,
            PhaseSet::full(),
            &scripted_registry(vec![("p1", p1)]),
        )
        .await
        .unwrap();

    assert!(stop.await.unwrap());
    assert_eq!(state, PipelineState::Paused { phase: Phase::Glossary });
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(
        attempt_summary(orchestrator.ledger(), Phase::Glossary, "ch-1").await,
        vec![("p1".to_string(), false)]
    );
}

#[tokio::test]
async fn test_wideWave_withFailingChapter_shouldFinishWaveAndNotDispatchNext() {
    let log = new_call_log();
    let p1 = ScriptedProvider::named("p1")
        .with_call_log(log.clone())
        .always_on_unit(Phase::Translate, "ch-1", ScriptedOutcome::Fail(FailureKind::AuthFailed));
    let mut config = pipeline_config(&["p1"], 2);
    config.concurrency.wave_size = 2;
    let orchestrator = orchestrator();

    let state = orchestrator
        .start_with_providers(
            three_chapter_document(),
            &config,
            PhaseSet::full(),
            &scripted_registry(vec![("p1", p1)]),
        )
        .await
        .unwrap();

    let PipelineState::Failed {
        phase,
        failure: Some(failure),
        ..
    } = state
    else {
        panic!("expected a unit failure, got {}", state);
    };
    assert_eq!(phase, Phase::Translate);
    assert_eq!(failure.unit_key, "ch-1");

    let mut translated = unit_keys(&calls_in_phase(&log, Phase::Translate))
        .into_iter()
        .map(str::to_string)
        .collect::<Vec<_>>();
    translated.sort();
    assert_eq!(translated, vec!["ch-1", "ch-2"]);

    let history = orchestrator
        .ledger()
        .unit_history("novel", Phase::Translate, "ch-2")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(history.record.status, UnitStatus::Succeeded);
}

#[tokio::test]
async fn test_failingProofUnit_shouldNotStopOtherProofUnits() {
    let log = new_call_log();
    let broken = ScriptedProvider::named("p1")
        .with_call_log(log.clone())
        .always_on_unit(
            Phase::Proof,
            "ch-1/style_drift",
            ScriptedOutcome::Fail(FailureKind::ServiceUnavailable),
        );
    let config = pipeline_config(&["p1"], 2);
    let orchestrator = orchestrator();

    let state = orchestrator
        .start_with_providers(
            three_chapter_document(),
            &config,
            PhaseSet::full(),
            &scripted_registry(vec![("p1", broken)]),
        )
        .await
        .unwrap();

    let PipelineState::Failed {
        phase,
        failure: Some(failure),
        ..
    } = state
    else {
        panic!("expected a unit failure, got {}", state);
    };
    assert_eq!(phase, Phase::Proof);
    assert_eq!(failure.unit_key, "ch-1/style_drift");

    // Eleven units succeed once, the broken one is tried twice
    let proof_calls = calls_in_phase(&log, Phase::Proof);
    assert_eq!(proof_calls.len(), 13);
    let mut distinct: Vec<&str> = unit_keys(&proof_calls);
    distinct.sort();
    distinct.dedup();
    assert_eq!(distinct.len(), 12);

    let fixed = ScriptedProvider::named("p1").with_call_log(log.clone());
    let state = orchestrator
        .resume_with_providers("novel", &config, &scripted_registry(vec![("p1", fixed)]))
        .await
        .unwrap();

    assert_eq!(state, PipelineState::Completed);
    let proof_calls = calls_in_phase(&log, Phase::Proof);
    assert_eq!(proof_calls.len(), 14);
    assert_eq!(proof_calls[13].unit_key, "ch-1/style_drift");
}

#[tokio::test]
async fn test_resumeAfterFailure_shouldNotRedispatchSucceededUnits() {
    let log = new_call_log();
    let broken = ScriptedProvider::named("p1")
        .with_call_log(log.clone())
        .always_on_unit(Phase::Translate, "ch-2", ScriptedOutcome::Fail(FailureKind::AuthFailed));
    let config = pipeline_config(&["p1"], 3);
    let orchestrator = orchestrator();

    let state = orchestrator
        .start_with_providers(
            three_chapter_document(),
            &config,
            PhaseSet::full().without_proofing(),
            &scripted_registry(vec![("p1", broken)]),
        )
        .await
        .unwrap();
    assert!(matches!(state, PipelineState::Failed { phase: Phase::Translate, .. }));
    // AuthFailed is not retried on the same provider
    assert_eq!(
        attempt_summary(orchestrator.ledger(), Phase::Translate, "ch-2").await,
        vec![("p1".to_string(), false)]
    );

    let fixed = ScriptedProvider::named("p1").with_call_log(log.clone());
    let state = orchestrator
        .resume_with_providers("novel", &config, &scripted_registry(vec![("p1", fixed)]))
        .await
        .unwrap();

    assert_eq!(state, PipelineState::Completed);
    assert_eq!(
        unit_keys(&calls_in_phase(&log, Phase::Translate)),
        vec!["ch-1", "ch-2", "ch-2", "ch-3"]
    );
    assert_eq!(calls_in_phase(&log, Phase::Glossary).len(), 3);
    assert_eq!(calls_in_phase(&log, Phase::Proof).len(), 0);
}

#[tokio::test]
async fn test_resumeAfterCrash_shouldBehaveLikeResumeAfterPause() {
    let dir = create_temp_dir().unwrap();
    let path = dir.path().join("ledger.db");
    let config = pipeline_config(&["p1"], 1);

    {
        let flaky = ScriptedProvider::named("p1").always_on_unit(
            Phase::Translate,
            "ch-2",
            ScriptedOutcome::Fail(FailureKind::ServiceUnavailable),
        );
        let orchestrator = Orchestrator::new(JobLedger::open(&path).unwrap());
        orchestrator
            .start_with_providers(
                three_chapter_document(),
                &config,
                PhaseSet::full().without_proofing(),
                &scripted_registry(vec![("p1", flaky)]),
            )
            .await
            .unwrap();

        // The process died mid-phase: the ledger still says Running
        orchestrator
            .ledger()
            .update_state("novel", &PipelineState::TranslateRunning)
            .await
            .unwrap();
    }

    let log = new_call_log();
    let orchestrator = Orchestrator::new(JobLedger::open(&path).unwrap());
    let p1 = ScriptedProvider::named("p1").with_call_log(log.clone());

    let state = orchestrator
        .resume_with_providers("novel", &config, &scripted_registry(vec![("p1", p1)]))
        .await
        .unwrap();

    assert_eq!(state, PipelineState::Completed);
    assert_eq!(unit_keys(&calls_in_phase(&log, Phase::Translate)), vec!["ch-2", "ch-3"]);
    assert_eq!(
        attempt_summary(orchestrator.ledger(), Phase::Translate, "ch-1").await.len(),
        1
    );
}

#[tokio::test]
async fn test_invalidRequest_shouldSendNextAttemptToDifferentProvider() {
    let p1 = ScriptedProvider::named("p1").on_unit(
        Phase::Glossary,
        "ch-1",
        [ScriptedOutcome::Fail(FailureKind::InvalidRequest)],
    );
    let p2 = ScriptedProvider::named("p2");
    let orchestrator = orchestrator();

    let state = orchestrator
        .start_with_providers(
            three_chapter_document(),
            &pipeline_config(&["p1", "p2"], 3),
            PhaseSet::glossary_only(),
            &scripted_registry(vec![("p1", p1), ("p2", p2)]),
        )
        .await
        .unwrap();

    assert_eq!(state, PipelineState::Completed);
    let attempts = orchestrator
        .ledger()
        .attempts_for_unit("novel", Phase::Glossary, "ch-1")
        .await
        .unwrap();
    assert_eq!(attempts.len(), 2);
    assert_eq!(
        attempts[0].outcome,
        AttemptOutcome::FatalFailure(FailureKind::InvalidRequest)
    );
    assert_eq!(attempts[1].provider, "p2");
}

#[tokio::test]
async fn test_truncatedTranslation_shouldBeRetriedInsteadOfAccepted() {
    let mut document = three_chapter_document();
    document.chapters[1].source_text = "第二章 林明拜师学艺，日夜苦练天剑诀。\n".repeat(300);
    let p1 = ScriptedProvider::named("p1").on_unit(
        Phase::Translate,
        "ch-2",
        [ScriptedOutcome::Reply("Chapter Two. Lin Ming trains.".to_string())],
    );
    let orchestrator = orchestrator();

    let state = orchestrator
        .start_with_providers(
            document,
            &pipeline_config(&["p1"], 2),
            PhaseSet::full().without_proofing(),
            &scripted_registry(vec![("p1", p1)]),
        )
        .await
        .unwrap();

    assert_eq!(state, PipelineState::Completed);
    let attempts = orchestrator
        .ledger()
        .attempts_for_unit("novel", Phase::Translate, "ch-2")
        .await
        .unwrap();
    assert_eq!(attempts.len(), 2);
    assert_eq!(
        attempts[0].outcome,
        AttemptOutcome::RetryableFailure(FailureKind::Unknown)
    );
    assert!(attempts[1].outcome.is_success());

    let document = orchestrator.load_document("novel").await.unwrap();
    let translated = document.chapters[1].translated_text.as_deref().unwrap();
    assert!(translated.starts_with("[p1] 第二章"));
}

#[tokio::test]
async fn test_glossaryPhase_rerunOnUnchangedChapters_shouldYieldSameMapping() {
    let script = || {
        ScriptedProvider::named("p1")
            .always_on_unit(
                Phase::Glossary,
                "ch-1",
                ScriptedOutcome::Reply(
                    r#"[{"term": "林明", "translation": "Lin Ming", "category": "name"},
                        {"term": "青云宗", "translation": "Azure Cloud Sect", "category": "place"}]"#
                        .to_string(),
                ),
            )
            .always_on_unit(
                Phase::Glossary,
                "ch-2",
                ScriptedOutcome::Reply(
                    r#"[{"term": "林明", "translation": "Lin Ming", "category": "name"}]"#.to_string(),
                ),
            )
    };
    let orchestrator = orchestrator();
    let config = pipeline_config(&["p1"], 2);

    orchestrator
        .start_with_providers(
            three_chapter_document(),
            &config,
            PhaseSet::glossary_only(),
            &scripted_registry(vec![("p1", script())]),
        )
        .await
        .unwrap();
    let first = orchestrator.ledger().get_glossary("novel").await.unwrap();

    orchestrator
        .start_with_providers(
            three_chapter_document(),
            &config,
            PhaseSet::glossary_only(),
            &scripted_registry(vec![("p1", script())]),
        )
        .await
        .unwrap();
    let second = orchestrator.ledger().get_glossary("novel").await.unwrap();

    assert_eq!(first.len(), 2);
    assert_eq!(first, second);
    let lin = first.iter().find(|e| e.source_term == "林明").unwrap();
    assert_eq!(lin.first_seen_chapter, "ch-1");
}

fn echo_glossary_use(prompt: &Prompt) -> String {
    if prompt.user.contains("林明 => Lin Ming") {
        "Lin Ming arrived.".to_string()
    } else {
        "No glossary.".to_string()
    }
}

#[tokio::test]
async fn test_skipGlossary_shouldPassSuppliedGlossaryToTranslation() {
    let glossary = Glossary::from_entries([GlossaryEntry::new(
        "林明",
        "Lin Ming",
        TermCategory::Name,
        "supplied",
    )]);
    let p1 = ScriptedProvider::named("p1").with_custom_response(echo_glossary_use);
    let orchestrator = orchestrator();

    let state = orchestrator
        .start_with_providers(
            three_chapter_document(),
            &pipeline_config(&["p1"], 1),
            PhaseSet::skip_glossary(glossary).without_proofing(),
            &scripted_registry(vec![("p1", p1)]),
        )
        .await
        .unwrap();

    assert_eq!(state, PipelineState::Completed);
    let document = orchestrator.load_document("novel").await.unwrap();
    let translations: Vec<&str> = document
        .chapters
        .iter()
        .map(|c| c.translated_text.as_deref().unwrap())
        .collect();
    // ch-3 does not mention the term, so no glossary section is sent
    assert_eq!(
        translations,
        vec!["Lin Ming arrived.", "Lin Ming arrived.", "No glossary."]
    );

    let status = orchestrator.status("novel").await.unwrap();
    assert_eq!(status.phase_progress(Phase::Glossary), (0, 0));
}

/// Sends only the chapter title for translation
struct TitlePrompts;

impl PromptBuilder for TitlePrompts {
    fn build_prompt(
        &self,
        unit: &WorkUnit,
        chapter: &Chapter,
        _glossary: &Glossary,
    ) -> anyhow::Result<Prompt> {
        let title = chapter.title.as_deref().unwrap_or(&chapter.id);
        Ok(Prompt::new(PromptTask::for_unit(unit), "Translate this title.", title)
            .for_unit(unit.key.as_str())
            .with_chapter_text(title))
    }
}

#[tokio::test]
async fn test_customPromptBuilder_shouldShapeEveryDispatchedPrompt() {
    let p1 = ScriptedProvider::named("p1");
    let orchestrator = orchestrator().with_prompt_builder(Arc::new(TitlePrompts));

    let state = orchestrator
        .start_with_providers(
            three_chapter_document(),
            &pipeline_config(&["p1"], 1),
            PhaseSet::full().without_proofing(),
            &scripted_registry(vec![("p1", p1)]),
        )
        .await
        .unwrap();

    assert_eq!(state, PipelineState::Completed);
    let document = orchestrator.load_document("novel").await.unwrap();
    let translations: Vec<&str> = document
        .chapters
        .iter()
        .map(|c| c.translated_text.as_deref().unwrap())
        .collect();
    assert_eq!(
        translations,
        vec!["[p1] Arrival", "[p1] The Master", "[p1] The Tournament"]
    );
}

#[tokio::test]
async fn test_subscribe_shouldReceiveStateChangesAndUnitResolutions() {
    let orchestrator = orchestrator();
    let mut events = orchestrator.subscribe();

    orchestrator
        .start_with_providers(
            three_chapter_document(),
            &pipeline_config(&["p1"], 1),
            PhaseSet::full().without_proofing(),
            &scripted_registry(vec![("p1", ScriptedProvider::named("p1"))]),
        )
        .await
        .unwrap();

    let mut states = Vec::new();
    let mut resolved = 0;
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.document_id(), "novel");
        match event {
            PipelineEvent::StateChanged { state, .. } => states.push(state),
            event if event.is_unit_resolved() => resolved += 1,
            _ => {}
        }
    }

    assert_eq!(
        states,
        vec![
            PipelineState::GlossaryPending,
            PipelineState::GlossaryRunning,
            PipelineState::TranslatePending,
            PipelineState::TranslateRunning,
            PipelineState::Completed,
        ]
    );
    assert_eq!(resolved, 6);
}

#[tokio::test]
async fn test_activeDocument_duringRun_shouldNameDocument() {
    let orchestrator = orchestrator();
    let observer = orchestrator.clone();
    let seen = Arc::new(parking_lot::Mutex::new(None));
    let sink = seen.clone();

    let p1 = ScriptedProvider::named("p1").with_hook(move |call| {
        if call.phase == Phase::Glossary && call.unit_key == "ch-1" {
            *sink.lock() = observer.active_document();
        }
    });

    orchestrator
        .start_with_providers(
            three_chapter_document(),
            &pipeline_config(&["p1"], 1),
            PhaseSet::glossary_only(),
            &scripted_registry(vec![("p1", p1)]),
        )
        .await
        .unwrap();

    assert_eq!(seen.lock().as_deref(), Some("novel"));
    assert!(orchestrator.active_document().is_none());
}

#[tokio::test]
async fn test_secondStartWhileRunning_shouldBeRejected() {
    let orchestrator = orchestrator();
    let config = pipeline_config(&["p1"], 1);
    let slow = ScriptedProvider::named("p1").with_delay(std::time::Duration::from_millis(20));
    let registry = scripted_registry(vec![("p1", slow)]);

    let mut other = three_chapter_document();
    other.id = "sequel".to_string();

    let (first, second) = tokio::join!(
        orchestrator.start_with_providers(
            three_chapter_document(),
            &config,
            PhaseSet::glossary_only(),
            &registry,
        ),
        orchestrator.start_with_providers(other, &config, PhaseSet::glossary_only(), &registry),
    );

    assert_eq!(first.unwrap(), PipelineState::Completed);
    assert!(matches!(
        second,
        Err(novelwai::OrchestrationError::AlreadyRunning(ref id)) if id == "novel"
    ));
    assert!(orchestrator.ledger().get_document("sequel").await.unwrap().is_none());
}
