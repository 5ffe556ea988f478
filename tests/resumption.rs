//! Resumption after a coordinator restart
//!
//! A fresh coordinator picks up the published snapshot and the live jobs of
//! its session, then keeps sequencing where the previous one stopped.

mod common;

use ats_protocol::SessionRequest;
use ats_session::job::PRIMARY_JOB_PROPERTY;
use ats_session::mock::MockRuntime;
use ats_session::state::{CommandState, RequestDetail, RequestState};
use ats_session::SessionEvent;
use common::{id_of, request, Session};
use tempfile::TempDir;

/// A runtime holding everything `session` published and submitted.
fn restarted(session: &Session, session_id: &str) -> MockRuntime {
    MockRuntime::new(session_id)
        .with_last_output(session.runtime.latest().unwrap())
        .with_jobs(session.runtime.jobs())
}

#[test]
fn test_resume_mid_primary_phase() {
    let dir = TempDir::new().unwrap();
    let lines = ["cts -m A", "cts -m B", "cts -m C"];
    let req = request(dir.path(), &lines);

    let before = Session::new(dir.path(), "s1");
    before.start(req.clone());
    before.finish_last(1, 0);
    assert_eq!(before.runtime.jobs().len(), 2);

    let after = Session::with_runtime(dir.path(), restarted(&before, "s1"));
    after.finish_last(2, 0);

    let jobs = after.runtime.jobs();
    assert_eq!(jobs.len(), 3, "only C is submitted after the restart");
    assert_eq!(
        jobs[2].command_id_property(),
        Some(id_of(&req, "cts -m C").as_str())
    );

    after.finish_last(3, 0);
    assert_eq!(after.runtime.jobs().len(), 3);
    after.end().unwrap();

    let detail = after.runtime.latest().unwrap();
    assert_eq!(detail.state, RequestState::Completed);
    for (line, passed) in lines.iter().zip([1, 2, 3]) {
        let command = &detail.commands[&id_of(&req, line)];
        assert_eq!(command.state, CommandState::Completed);
        assert_eq!(command.attempts.len(), 1);
        assert_eq!(command.passed_test_count, passed);
    }
}

#[test]
fn test_untagged_primary_job_keeps_sequencing() {
    let dir = TempDir::new().unwrap();
    let req = request(dir.path(), &["cts -m A", "cts -m B"]);

    let before = Session::new(dir.path(), "s1");
    before.start(req.clone());
    let mut jobs = before.runtime.jobs();
    jobs[0].properties.remove(PRIMARY_JOB_PROPERTY);

    let runtime = MockRuntime::new("s1")
        .with_last_output(before.runtime.latest().unwrap())
        .with_jobs(jobs);
    let after = Session::with_runtime(dir.path(), runtime);
    after.finish_last(1, 0);

    let jobs = after.runtime.jobs();
    assert_eq!(jobs.len(), 2, "B follows the untagged primary job");
    assert_eq!(
        jobs[1].command_id_property(),
        Some(id_of(&req, "cts -m B").as_str())
    );
}

#[test]
fn test_snapshot_seq_keeps_advancing_after_restart() {
    let dir = TempDir::new().unwrap();
    let before = Session::new(dir.path(), "s1");
    before.start(request(dir.path(), &["cts -m A", "cts -m B"]));

    let mut persisted = before.runtime.latest().unwrap();
    persisted.seq = 1_000_000;
    let runtime = MockRuntime::new("s1")
        .with_last_output(persisted)
        .with_jobs(before.runtime.jobs());

    let after = Session::with_runtime(dir.path(), runtime);
    after.finish_last(1, 0);

    let published = after.runtime.published();
    assert!(!published.is_empty());
    assert!(published.iter().all(|d| d.seq > 1_000_000));
    assert!(published.windows(2).all(|w| w[0].seq < w[1].seq));
}

#[test]
fn test_repeated_session_starting_does_not_recreate_jobs() {
    let dir = TempDir::new().unwrap();
    let req = request(dir.path(), &["cts -m A", "cts -m B"]);

    let before = Session::new(dir.path(), "s1");
    before.start(req.clone());

    let after = Session::with_runtime(dir.path(), restarted(&before, "s1"));
    let published = after.runtime.published().len();
    after.start(req);

    assert_eq!(after.runtime.jobs().len(), 1);
    assert_eq!(after.runtime.published().len(), published + 1);
    assert_eq!(after.runtime.latest().unwrap().state, RequestState::Running);
}

#[test]
fn test_restart_in_secondary_phase_unmounts_archive() {
    let dir = TempDir::new().unwrap();
    let req = request(dir.path(), &["cts -m A"]);

    let before = Session::new(dir.path(), "s1");
    before.jobs.secondary_jobs_for("cts -m A", 1);
    before.start(req.clone());
    before.finish_last(2, 0);
    assert_eq!(before.runtime.jobs().len(), 2);

    let after = Session::with_runtime(dir.path(), restarted(&before, "s1"));
    after.finish_last(1, 0);
    after.end().unwrap();

    let programs: Vec<String> = after.runner.calls().into_iter().map(|c| c.program).collect();
    assert_eq!(programs, vec!["fusermount"]);
    assert!(!dir.path().join("gen").join("session_s1").exists());
    assert_eq!(after.runtime.latest().unwrap().state, RequestState::Completed);
}

#[test]
fn test_resumed_test_start_resolves_owner() {
    let dir = TempDir::new().unwrap();
    let req = request(dir.path(), &["cts -m A"]);

    let before = Session::new(dir.path(), "s1");
    before.start(req.clone());

    let after = Session::with_runtime(dir.path(), restarted(&before, "s1"));
    let job_id = after.last_job_id();
    let started = after.runtime.start_test(&job_id, "t1");
    after.send(started).unwrap();

    let detail = after.runtime.latest().unwrap();
    assert_eq!(
        detail.commands[&id_of(&req, "cts -m A")].state,
        CommandState::Running
    );
}

#[test]
fn test_snapshot_of_other_session_ignored() {
    let dir = TempDir::new().unwrap();
    let mut foreign = RequestDetail::new("other");
    foreign.fail(ats_session::state::ErrorReason::UnknownReason, "stale").unwrap();

    let session = Session::with_runtime(
        dir.path(),
        MockRuntime::new("s1").with_last_output(foreign),
    );
    session
        .send(SessionEvent::SessionStarting {
            request: SessionRequest::new_multi_command(request(dir.path(), &["cts -m A"])),
        })
        .unwrap();

    let detail = session.runtime.latest().unwrap();
    assert_eq!(detail.id, "s1");
    assert_eq!(detail.state, RequestState::Running);
    assert_eq!(session.runtime.jobs().len(), 1);
}
