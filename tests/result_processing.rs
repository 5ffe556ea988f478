//! Result processing at session end

mod common;

use std::fs;

use ats_protocol::NewMultiCommandRequest;
use ats_session::mock::MOCK_ARTIFACT_NAME;
use ats_session::orchestrator::ResultProcessingError;
use ats_session::state::{CommandState, ErrorReason, RequestState};
use ats_session::OrchestratorError;
use common::{id_of, request, Session};
use tempfile::TempDir;

fn names_in(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn test_output_layout_per_command() {
    let dir = TempDir::new().unwrap();
    let session = Session::new(dir.path(), "s1");
    session.results.write_artifact(true);
    let req = request(dir.path(), &["cts -m A", "cts -m B"]);

    session.start(req.clone());
    session.finish_last(1, 0);
    session.finish_last(1, 0);
    session.end().unwrap();

    for line in ["cts -m A", "cts -m B"] {
        let id = id_of(&req, line);
        let command_dir = session.output_dir().join("s1").join(&id);
        assert_eq!(names_in(&command_dir), vec!["logs", "results"]);
        assert_eq!(
            names_in(&command_dir.join("results")),
            vec![MOCK_ARTIFACT_NAME, "test_result.xml"]
        );

        let detail = session.runtime.latest().unwrap();
        let context = &detail.test_contexts[&id];
        assert_eq!(context.command_line, line);
        assert_eq!(context.test_resources.len(), 1);
        assert_eq!(context.test_resources[0].name, MOCK_ARTIFACT_NAME);
    }
}

#[test]
fn test_no_valid_result_fails_command() {
    let dir = TempDir::new().unwrap();
    let session = Session::new(dir.path(), "s1");
    let req = request(dir.path(), &["cts -m A", "cts -m B"]);
    session.results.no_result_for(&id_of(&req, "cts -m A"));

    session.start(req.clone());
    session.finish_last(1, 0);
    session.finish_last(1, 0);
    session.end().unwrap();

    let detail = session.runtime.latest().unwrap();
    assert_eq!(detail.state, RequestState::Error);
    assert_eq!(detail.error_reason, Some(ErrorReason::ResultProcessingError));
    let a = &detail.commands[&id_of(&req, "cts -m A")];
    assert_eq!(a.state, CommandState::Error);
    assert_eq!(a.error_message.as_deref(), Some("no valid test result"));
    assert_eq!(
        detail.commands[&id_of(&req, "cts -m B")].state,
        CommandState::Completed
    );
    assert!(!detail.test_contexts.contains_key(&id_of(&req, "cts -m A")));
}

#[test]
fn test_processor_failure_ends_request() {
    let dir = TempDir::new().unwrap();
    let session = Session::new(dir.path(), "s1");
    let req = request(dir.path(), &["cts -m A", "cts -m B"]);
    session
        .results
        .fail_for(&id_of(&req, "cts -m B"), "truncated test_result.xml");

    session.start(req.clone());
    session.finish_last(1, 0);
    session.finish_last(1, 0);
    let err = session.end().unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::ResultProcessing(ResultProcessingError::Parse { .. })
    ));

    let detail = session.runtime.latest().unwrap();
    assert_eq!(detail.state, RequestState::Error);
    assert_eq!(detail.error_reason, Some(ErrorReason::ResultProcessingError));
    assert!(detail.error_chain()[0].contains("truncated test_result.xml"));
    assert!(detail.commands.values().all(|c| c.is_terminal()));
    // cleanup still ran
    assert!(!dir.path().join("gen").join("session_s1").exists());
}

#[test]
fn test_unsupported_output_url() {
    let dir = TempDir::new().unwrap();
    let session = Session::new(dir.path(), "s1");
    let mut req = request(dir.path(), &["cts -m A"]);
    req.test_environment.output_file_upload_url = "gs://bucket/results".to_string();

    session.start(req);
    session.finish_last(1, 0);
    let err = session.end().unwrap_err();

    assert!(matches!(
        err,
        OrchestratorError::ResultProcessing(ResultProcessingError::UnsupportedOutputUrl(_))
    ));
    let detail = session.runtime.latest().unwrap();
    assert_eq!(detail.state, RequestState::Error);
    assert_eq!(detail.error_reason, Some(ErrorReason::ResultProcessingError));
}

#[test]
fn test_missing_archive_is_invalid_request() {
    let dir = TempDir::new().unwrap();
    let session = Session::new(dir.path(), "s1");
    let req = NewMultiCommandRequest {
        test_resources: Vec::new(),
        ..request(dir.path(), &["cts -m A"])
    };

    session.start(req.clone());

    let detail = session.runtime.latest().unwrap();
    assert_eq!(detail.state, RequestState::Error);
    assert_eq!(detail.error_reason, Some(ErrorReason::InvalidRequest));
    assert!(detail.error_chain()[0].contains("COMMAND_NOT_AVAILABLE"));
    assert_eq!(
        detail.commands[&id_of(&req, "cts -m A")].state,
        CommandState::Error
    );
    assert!(session.runtime.jobs().is_empty());
    assert!(session.runner.calls().is_empty());
}
