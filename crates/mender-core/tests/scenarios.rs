//! End-to-end repair sessions against scripted capabilities

use mender_core::{MenderConfig, Orchestrator, SessionStatus};
use mender_ledger::diff::apply;
use mender_ledger::PatchSource;
use mender_repair::{ModelTask, PatternRule, PatternRules};
use mender_sandbox::{Classification, ErrorKind, Language};
use mender_test_utils::{
    fenced, index_error, sandbox_with, timeout, zero_division, ScriptedModel, ScriptedRunner, DIVIDE_BY_ZERO,
    HELLO, OFF_BY_ONE, OFF_BY_ONE_FIXED,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;

const DIVIDE_FIXED: &str = "total = 10\nprint(total / 1)\n";

const INTERPRETATION: &str = "Category: runtime\nAnalysis: the program divides by zero\nFix: divide by a non-zero value\n";

fn orchestrator(runner: Arc<ScriptedRunner>) -> Orchestrator {
    Orchestrator::new(MenderConfig::default())
        .unwrap()
        .with_sandbox(sandbox_with(runner))
}

#[tokio::test]
async fn test_off_by_one_fixed_by_rule() {
    let runner = Arc::new(ScriptedRunner::new().when("len(xs) + 1", index_error()));
    let orchestrator = orchestrator(Arc::clone(&runner));

    let id = orchestrator.submit(OFF_BY_ONE, Language::Python, None).unwrap();
    let session = orchestrator.wait(id).await.unwrap();

    assert_eq!(session.status, SessionStatus::Succeeded);
    assert_eq!(session.current_iteration, 1);
    assert_eq!(session.final_code.as_deref(), Some(OFF_BY_ONE_FIXED));

    let patches = session.ledger.patches();
    assert_eq!(patches.len(), 1);
    assert_eq!(patches[0].source, PatchSource::RuleBased);
    assert!(patches[0].applied);
    assert_eq!(patches[0].error_category, Some(ErrorKind::Index));
    assert_eq!((patches[0].from_version, patches[0].to_version), (0, 1));

    let versions = session.ledger.versions();
    assert_eq!(versions.len(), 2);
    assert_eq!(
        versions[0].outcome.as_ref().map(|o| o.classification),
        Some(Classification::Error)
    );
    assert!(versions[1].succeeded());
    assert_eq!(runner.calls(), vec![OFF_BY_ONE.to_string(), OFF_BY_ONE_FIXED.to_string()]);
}

#[tokio::test]
async fn test_generated_fix_on_first_try() {
    let runner = Arc::new(ScriptedRunner::new().when("/ 0", zero_division()));
    let model = Arc::new(
        ScriptedModel::new()
            .reply(ModelTask::Interpret, INTERPRETATION)
            .reply(ModelTask::Generate, fenced(DIVIDE_FIXED))
            .reply(ModelTask::Explain, "Replaced the zero divisor."),
    );
    let orchestrator = orchestrator(runner).with_model(model.clone());

    let id = orchestrator.submit(DIVIDE_BY_ZERO, Language::Python, None).unwrap();
    let session = orchestrator.wait(id).await.unwrap();

    assert_eq!(session.status, SessionStatus::Succeeded);
    let patches = session.ledger.patches();
    assert_eq!(patches.len(), 1);
    let patch = &patches[0];
    assert_eq!(patch.source, PatchSource::Generated);
    assert!(patch.applied);
    assert_eq!(patch.error_category, Some(ErrorKind::Runtime));
    assert_eq!(patch.fix_strategy.as_deref(), Some("divide by a non-zero value"));
    assert_eq!(patch.explanation.as_deref(), Some("Replaced the zero divisor."));
    assert!(patch.validation.as_ref().is_some_and(|o| o.is_success()));
    assert_eq!(session.final_code.as_deref(), Some(DIVIDE_FIXED));
    assert_eq!(model.count(ModelTask::Generate), 1);
}

#[tokio::test]
async fn test_endless_timeouts_exhaust_budget() {
    let runner = Arc::new(ScriptedRunner::new().otherwise(timeout()));
    let retry = PatternRule::new("retry", &[Language::Python], &[], ErrorKind::Runtime, |view| {
        Some((format!("{}# retry\n", view.code), "append a marker".to_string()))
    });
    let orchestrator = orchestrator(runner).with_rules(Arc::new(PatternRules::new(vec![retry])));

    let id = orchestrator.submit("while True:\n    pass\n", Language::Python, Some(3)).unwrap();
    let session = orchestrator.wait(id).await.unwrap();

    assert_eq!(session.status, SessionStatus::Exhausted);
    assert_eq!(session.current_iteration, 3);
    assert_eq!(session.ledger.patches().len(), 3);
    let numbers: Vec<u32> = session.ledger.versions().iter().map(|v| v.number).collect();
    assert_eq!(numbers, vec![0, 1, 2, 3]);
    assert!(session
        .ledger
        .versions()
        .iter()
        .all(|v| v.outcome.as_ref().map(|o| o.classification) == Some(Classification::Timeout)));
}

#[tokio::test]
async fn test_working_code_needs_no_patch() {
    let runner = Arc::new(ScriptedRunner::new());
    let orchestrator = orchestrator(runner);

    let id = orchestrator.submit(HELLO, Language::Python, None).unwrap();
    let session = orchestrator.wait(id).await.unwrap();

    assert_eq!(session.status, SessionStatus::Succeeded);
    assert!(session.ledger.patches().is_empty());
    assert_eq!(session.ledger.versions().len(), 1);
    assert_eq!(session.current_iteration, 0);
    assert_eq!(session.final_code.as_deref(), Some(HELLO));
    assert!(session.completed_at.is_some());
}

#[tokio::test]
async fn test_validator_rejects_twice_then_accepts() {
    let runner = Arc::new(
        ScriptedRunner::new()
            .when("/ 0", zero_division())
            .when("# bad", index_error()),
    );
    let model = Arc::new(
        ScriptedModel::new()
            .reply(ModelTask::Interpret, INTERPRETATION)
            .reply(ModelTask::Generate, fenced("total = 10\nprint(total / 2)  # bad 1\n"))
            .reply(ModelTask::Generate, fenced("total = 10\nprint(total / 3)  # bad 2\n"))
            .reply(ModelTask::Generate, fenced(DIVIDE_FIXED)),
    );
    let orchestrator = orchestrator(runner).with_model(model.clone());

    let id = orchestrator.submit(DIVIDE_BY_ZERO, Language::Python, None).unwrap();
    let session = orchestrator.wait(id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Succeeded);

    let patches = session.ledger.patches();
    let sources: Vec<PatchSource> = patches.iter().map(|p| p.source).collect();
    assert_eq!(
        sources,
        vec![
            PatchSource::Generated,
            PatchSource::GeneratedValidator,
            PatchSource::GeneratedValidator
        ]
    );
    let applied: Vec<bool> = patches.iter().map(|p| p.applied).collect();
    assert_eq!(applied, vec![false, false, true]);
    assert!(patches.iter().all(|p| p.from_version == 0 && p.to_version == 1));
    assert!(patches[..2]
        .iter()
        .all(|p| p.validation.as_ref().is_some_and(|o| o.error_kind() == Some(ErrorKind::Index))));

    // Rejected attempts never become versions
    assert_eq!(session.ledger.versions().len(), 2);
    let accepted = session.ledger.version(1).unwrap();
    assert_eq!(accepted.code, DIVIDE_FIXED);
    assert_eq!(apply(DIVIDE_BY_ZERO, &patches[2].diff).unwrap(), DIVIDE_FIXED);
    assert_eq!(model.count(ModelTask::Generate), 3);
}

#[tokio::test]
async fn test_rule_stage_takes_priority_over_model() {
    let runner = Arc::new(ScriptedRunner::new().when("len(xs) + 1", index_error()));
    let model = Arc::new(ScriptedModel::new());
    let orchestrator = orchestrator(runner).with_model(model.clone());

    let id = orchestrator.submit(OFF_BY_ONE, Language::Python, None).unwrap();
    let session = orchestrator.wait(id).await.unwrap();

    assert_eq!(session.status, SessionStatus::Succeeded);
    assert!(model.requests().is_empty());
}

#[tokio::test]
async fn test_no_rule_and_no_model_fails() {
    let runner = Arc::new(ScriptedRunner::new().when("/ 0", zero_division()));
    let orchestrator = orchestrator(runner);

    let id = orchestrator.submit(DIVIDE_BY_ZERO, Language::Python, None).unwrap();
    let session = orchestrator.wait(id).await.unwrap();

    assert_eq!(session.status, SessionStatus::Failed);
    assert!(session.ledger.patches().is_empty());
    assert_eq!(session.final_code.as_deref(), Some(DIVIDE_BY_ZERO));
    let last = session.ledger.traces().last().unwrap();
    assert!(last.event.message.starts_with("no patch produced"), "{}", last.event.message);
}

#[tokio::test]
async fn test_validator_retries_exhausted_fails_session() {
    let runner = Arc::new(
        ScriptedRunner::new()
            .when("/ 0", zero_division())
            .when("# bad", index_error()),
    );
    let model = Arc::new(
        ScriptedModel::new()
            .reply(ModelTask::Interpret, INTERPRETATION)
            .reply(ModelTask::Generate, fenced("print(1)  # bad 1\n"))
            .reply(ModelTask::Generate, fenced("print(2)  # bad 2\n"))
            .reply(ModelTask::Generate, fenced("print(3)  # bad 3\n")),
    );
    let orchestrator = orchestrator(runner).with_model(model);

    let id = orchestrator.submit(DIVIDE_BY_ZERO, Language::Python, None).unwrap();
    let session = orchestrator.wait(id).await.unwrap();

    assert_eq!(session.status, SessionStatus::Failed);
    assert_eq!(session.ledger.patches().len(), 3);
    assert!(session.ledger.patches().iter().all(|p| !p.applied));
    assert_eq!(session.ledger.versions().len(), 1);
}

#[tokio::test]
async fn test_repeated_code_is_accepted_with_warning() {
    let runner = Arc::new(ScriptedRunner::new().otherwise(zero_division()));
    let toggle = PatternRule::new("toggle", &[Language::Python], &[], ErrorKind::Runtime, |view| {
        let next = if view.code.contains("/ 0") {
            view.code.replace("/ 0", "/ zero")
        } else {
            view.code.replace("/ zero", "/ 0")
        };
        Some((next, "toggle the divisor".to_string()))
    });
    let orchestrator = orchestrator(runner).with_rules(Arc::new(PatternRules::new(vec![toggle])));

    let id = orchestrator.submit(DIVIDE_BY_ZERO, Language::Python, Some(2)).unwrap();
    let session = orchestrator.wait(id).await.unwrap();

    assert_eq!(session.status, SessionStatus::Exhausted);
    assert_eq!(session.ledger.versions()[2].code, DIVIDE_BY_ZERO);
    assert!(session
        .ledger
        .traces()
        .iter()
        .any(|r| r.event.message == "version 2 repeats the code of version 0"));
}
