/*!
 * Tests for the job ledger through its public API, on disk
 */

use novelwai::errors::FailureKind;
use novelwai::ledger::{Attempt, AttemptOutcome, JobLedger, UnitStatus};
use novelwai::translation::{GlossaryEntry, Phase, PipelineState, TermCategory};
use tokio_test::{assert_err, assert_ok};

use crate::common::{create_temp_dir, register, three_chapter_document};

#[tokio::test]
async fn test_reopen_shouldKeepAttemptsStatusAndGlossary() {
    let dir = create_temp_dir().unwrap();
    let path = dir.path().join("ledger.db");
    let document = three_chapter_document();
    let units = document.work_units(Phase::Translate, &[]);

    {
        let ledger = JobLedger::open(&path).unwrap();
        register(&ledger, &document).await.unwrap();
        ledger.register_units("novel", &units).await.unwrap();

        let failed = Attempt::new(
            "novel",
            &units[0],
            1,
            "p1",
            AttemptOutcome::from_failure(FailureKind::ServiceUnavailable),
        );
        ledger.record_attempt(&failed).await.unwrap();
        let success = Attempt::new("novel", &units[0], 2, "p2", AttemptOutcome::Success);
        ledger.record_success(&success, "Chapter one.").await.unwrap();

        ledger
            .replace_glossary(
                "novel",
                vec![GlossaryEntry::new("林明", "Lin Ming", TermCategory::Name, "ch-1")],
            )
            .await
            .unwrap();
        ledger
            .update_state("novel", &PipelineState::Paused { phase: Phase::Translate })
            .await
            .unwrap();
    }

    let ledger = assert_ok!(JobLedger::open(&path));

    let record = ledger.get_document("novel").await.unwrap().unwrap();
    assert_eq!(record.state, PipelineState::Paused { phase: Phase::Translate });

    let history = ledger
        .unit_history("novel", Phase::Translate, "ch-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(history.record.status, UnitStatus::Succeeded);
    assert_eq!(history.record.output.as_deref(), Some("Chapter one."));
    assert_eq!(history.attempts.len(), 2);
    assert_eq!(history.attempts[0].provider, "p1");

    let pending: Vec<String> = ledger
        .pending_units("novel", Phase::Translate)
        .await
        .unwrap()
        .into_iter()
        .map(|u| u.unit_key)
        .collect();
    assert_eq!(pending, vec!["ch-2", "ch-3"]);

    let glossary = ledger.get_glossary("novel").await.unwrap();
    assert_eq!(glossary[0].translation, "Lin Ming");
}

#[tokio::test]
async fn test_listDocuments_shouldReturnEveryRegisteredDocument() {
    let ledger = JobLedger::open_in_memory().unwrap();
    let mut second = three_chapter_document();
    second.id = "sequel".to_string();

    register(&ledger, &three_chapter_document()).await.unwrap();
    register(&ledger, &second).await.unwrap();

    let mut ids: Vec<String> = ledger
        .list_documents()
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.id)
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["novel", "sequel"]);
}

#[tokio::test]
async fn test_registerDocument_twice_shouldFail() {
    let ledger = JobLedger::open_in_memory().unwrap();
    register(&ledger, &three_chapter_document()).await.unwrap();

    assert_err!(register(&ledger, &three_chapter_document()).await);
}

#[tokio::test]
async fn test_providerTotals_shouldSpanDocuments() {
    let ledger = JobLedger::open_in_memory().unwrap();
    let document = three_chapter_document();
    let units = document.work_units(Phase::Glossary, &[]);
    register(&ledger, &document).await.unwrap();
    ledger.register_units("novel", &units).await.unwrap();

    for (sequence, unit) in units.iter().enumerate() {
        let attempt = Attempt::new("novel", unit, 1, "p1", AttemptOutcome::Success);
        ledger.record_success(&attempt, "[]").await.unwrap();
        assert_eq!(sequence + 1, ledger.attempts_for_document("novel").await.unwrap().len());
    }

    let totals = ledger.provider_totals().await.unwrap();
    assert_eq!(totals["p1"].attempts, 3);
    assert_eq!(totals["p1"].successes, 3);
    assert!(!ledger.is_phase_complete("novel", Phase::Glossary).await.unwrap());
}
