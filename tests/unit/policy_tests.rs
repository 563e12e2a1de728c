/*!
 * Tests for the retry/fallback policy against scripted providers
 */

use tokio_util::sync::CancellationToken;

use novelwai::app_config::RetrySettings;
use novelwai::errors::FailureKind;
use novelwai::ledger::{AttemptOutcome, JobLedger};
use novelwai::providers::{ProviderHandle, ScriptedOutcome, ScriptedProvider};
use novelwai::translation::prompts::{Prompt, PromptBuilder, TemplatePromptBuilder};
use novelwai::translation::{DispatchOutcome, Document, Glossary, Phase, RetryPolicy, WorkUnit};

use crate::common::{new_call_log, registered_ledger, scripted_registry, three_chapter_document};

fn accept(text: &str) -> Result<String, String> {
    Ok(text.to_string())
}

fn first_translate_unit(document: &Document) -> (WorkUnit, Prompt) {
    let unit = document.work_units(Phase::Translate, &[]).remove(0);
    let chapter = document.chapter(&unit.chapter_id).unwrap();
    let prompt = TemplatePromptBuilder::new("zh", "en")
        .build_prompt(&unit, chapter, &Glossary::new())
        .unwrap();
    (unit, prompt)
}

async fn setup(
    providers: Vec<(&str, ScriptedProvider)>,
    max_retries: u32,
) -> (JobLedger, RetryPolicy, Vec<ProviderHandle>, WorkUnit, Prompt) {
    let document = three_chapter_document();
    let ledger = registered_ledger(&document, Phase::Translate).await.unwrap();
    let policy = RetryPolicy::new(ledger.clone(), &RetrySettings::immediate(max_retries));
    let candidates = scripted_registry(providers).candidates(None).unwrap();
    let (unit, prompt) = first_translate_unit(&document);
    (ledger, policy, candidates, unit, prompt)
}

#[tokio::test]
async fn test_dispatch_withTransientFailure_shouldRetrySameProvider() {
    let p1 = ScriptedProvider::named("p1").on_unit(
        Phase::Translate,
        "ch-1",
        [ScriptedOutcome::Fail(FailureKind::Timeout)],
    );
    let (ledger, policy, candidates, unit, prompt) = setup(vec![("p1", p1.clone())], 3).await;

    let outcome = policy
        .dispatch("novel", &unit, &prompt, &candidates, accept, &CancellationToken::new())
        .await
        .unwrap();

    match outcome {
        DispatchOutcome::Succeeded { provider, attempts, output } => {
            assert_eq!(provider, "p1");
            assert_eq!(attempts, 2);
            assert!(output.starts_with("[p1]"));
        }
        other => panic!("expected success, got {:?}", other),
    }

    let attempts = ledger
        .attempts_for_unit("novel", Phase::Translate, "ch-1")
        .await
        .unwrap();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].outcome, AttemptOutcome::from_failure(FailureKind::Timeout));
    assert_eq!(attempts[1].outcome, AttemptOutcome::Success);
    assert_eq!(attempts[1].sequence, 2);
}

#[tokio::test]
async fn test_dispatch_withAuthFailure_shouldFallBackWithoutRetrying() {
    let log = new_call_log();
    let p1 = ScriptedProvider::named("p1")
        .with_call_log(log.clone())
        .failing(FailureKind::AuthFailed);
    let p2 = ScriptedProvider::named("p2").with_call_log(log.clone());
    let (_ledger, policy, candidates, unit, prompt) = setup(vec![("p1", p1), ("p2", p2)], 3).await;

    let outcome = policy
        .dispatch("novel", &unit, &prompt, &candidates, accept, &CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(outcome, DispatchOutcome::Succeeded { ref provider, attempts: 2, .. } if provider == "p2"));
    let providers: Vec<String> = log.lock().iter().map(|c| c.provider.clone()).collect();
    assert_eq!(providers, vec!["p1", "p2"]);
}

#[tokio::test]
async fn test_dispatch_withEveryProviderFailing_shouldReportTrialsInOrder() {
    let p1 = ScriptedProvider::named("p1").failing(FailureKind::RateLimited);
    let p2 = ScriptedProvider::named("p2").failing(FailureKind::ServiceUnavailable);
    let (ledger, policy, candidates, unit, prompt) = setup(vec![("p1", p1), ("p2", p2)], 2).await;

    let outcome = policy
        .dispatch("novel", &unit, &prompt, &candidates, accept, &CancellationToken::new())
        .await
        .unwrap();

    let DispatchOutcome::Exhausted { trials } = outcome else {
        panic!("expected exhaustion");
    };
    assert_eq!(trials.len(), 2);
    assert_eq!(trials[0].provider, "p1");
    assert_eq!(trials[0].attempts, 2);
    assert_eq!(trials[0].last_failure, FailureKind::RateLimited);
    assert_eq!(trials[1].provider, "p2");
    assert_eq!(trials[1].last_failure, FailureKind::ServiceUnavailable);

    let sequences: Vec<u32> = ledger
        .attempts_for_unit("novel", Phase::Translate, "ch-1")
        .await
        .unwrap()
        .iter()
        .map(|a| a.sequence)
        .collect();
    assert_eq!(sequences, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn test_dispatch_withRejectedResponse_shouldRecordUnknownAndRetry() {
    let p1 = ScriptedProvider::named("p1").on_unit(
        Phase::Translate,
        "ch-1",
        [ScriptedOutcome::Reply("   ".to_string())],
    );
    let (ledger, policy, candidates, unit, prompt) = setup(vec![("p1", p1)], 3).await;

    let reject_blank = |text: &str| {
        if text.trim().is_empty() {
            Err("empty".to_string())
        } else {
            Ok(text.to_string())
        }
    };
    let outcome = policy
        .dispatch("novel", &unit, &prompt, &candidates, reject_blank, &CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(outcome, DispatchOutcome::Succeeded { attempts: 2, .. }));
    let attempts = ledger
        .attempts_for_unit("novel", Phase::Translate, "ch-1")
        .await
        .unwrap();
    assert_eq!(attempts[0].outcome.failure_kind(), Some(FailureKind::Unknown));
}

#[tokio::test]
async fn test_dispatch_withCancelledToken_shouldRecordNothing() {
    let p1 = ScriptedProvider::named("p1");
    let (ledger, policy, candidates, unit, prompt) = setup(vec![("p1", p1.clone())], 3).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = policy
        .dispatch("novel", &unit, &prompt, &candidates, accept, &cancel)
        .await
        .unwrap();

    assert_eq!(outcome, DispatchOutcome::Cancelled);
    assert_eq!(p1.call_count(), 0);
    assert_eq!(
        ledger.attempt_count("novel", Phase::Translate, "ch-1").await.unwrap(),
        0
    );
}

#[tokio::test]
async fn test_dispatch_secondInvocation_shouldContinueAttemptSequence() {
    let p1 = ScriptedProvider::named("p1").on_unit(
        Phase::Translate,
        "ch-1",
        [
            ScriptedOutcome::Fail(FailureKind::Timeout),
            ScriptedOutcome::Fail(FailureKind::Timeout),
        ],
    );
    let (ledger, policy, candidates, unit, prompt) = setup(vec![("p1", p1)], 2).await;
    let cancel = CancellationToken::new();

    let first = policy
        .dispatch("novel", &unit, &prompt, &candidates, accept, &cancel)
        .await
        .unwrap();
    assert!(matches!(first, DispatchOutcome::Exhausted { .. }));

    // A fresh budget per invocation; history keeps growing
    let second = policy
        .dispatch("novel", &unit, &prompt, &candidates, accept, &cancel)
        .await
        .unwrap();
    assert!(matches!(second, DispatchOutcome::Succeeded { attempts: 1, .. }));

    let attempts = ledger
        .attempts_for_unit("novel", Phase::Translate, "ch-1")
        .await
        .unwrap();
    assert_eq!(attempts.len(), 3);
    assert_eq!(attempts[2].sequence, 3);
    assert!(attempts[2].outcome.is_success());
}
