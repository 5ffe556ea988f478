//! Primary and secondary job sequencing
//!
//! Primary jobs run one at a time in command order. Secondary jobs are
//! created and submitted together, once, after the last primary job ended.

use std::collections::HashSet;

use super::{apply_outcomes, RequestCoordinator, SessionState};
use crate::state::{CancelReason, ErrorReason, RequestState};

impl RequestCoordinator {
    /// Submit the next pending primary job. Jobs the runtime rejects fail
    /// their command and the next one is tried. Returns whether a job was
    /// submitted.
    pub(super) fn submit_next_primary(&self, state: &mut SessionState) -> bool {
        while let Some(job) = state.pending_primary.pop_front() {
            let job_id = job.id.clone();
            let owner = job.command_id_property().map(str::to_string);

            match self.runtime.add_job(job) {
                Ok(()) => {
                    state.running_primary += 1;
                    tracing::info!(job_id = %job_id, remaining = state.pending_primary.len(), "submitted primary job");
                    return true;
                }
                Err(e) => {
                    tracing::warn!(job_id = %job_id, error = %e, "primary job rejected");
                    let message = format!("failed to submit job {}: {}", job_id, e);
                    if let Some(command) = owner.and_then(|id| state.detail.commands.get_mut(&id)) {
                        command.fail(ErrorReason::UnknownReason, message.clone());
                    }
                    state
                        .detail
                        .append_error_message(ErrorReason::UnknownReason, &message);
                }
            }
        }
        false
    }

    /// Create and submit every secondary job. Runs at most once per request.
    pub(super) fn create_secondary_jobs(&self, state: &mut SessionState) {
        if state.secondary_created {
            tracing::debug!("secondary jobs already created");
            return;
        }
        state.secondary_created = true;
        let Some(request) = state.request.clone() else {
            return;
        };

        let creation = state.orchestrator.create_secondary_jobs(&request);
        apply_outcomes(&mut state.detail, &creation.outcomes, false);

        let count = creation.jobs.len();
        for job in creation.jobs {
            let job_id = job.id.clone();
            let owner = job.command_id_property().map(str::to_string);
            if let Err(e) = self.runtime.add_job(job) {
                tracing::warn!(job_id = %job_id, error = %e, "secondary job rejected");
                let message = format!("failed to submit job {}: {}", job_id, e);
                if let Some(command) = owner.and_then(|id| state.detail.commands.get_mut(&id)) {
                    command.fail(ErrorReason::UnknownReason, message.clone());
                }
                state
                    .detail
                    .append_error_message(ErrorReason::UnknownReason, &message);
            }
        }
        tracing::info!(count, "submitted secondary jobs");
    }

    /// Advance sequencing after the end of primary job `job_id`.
    pub(super) fn on_primary_job_ended(&self, state: &mut SessionState, job_id: &str) {
        if !state.primary_synced {
            self.resync_primary(state, Some(job_id));
        }
        state.running_primary = state.running_primary.saturating_sub(1);
        if state.running_primary > 0 {
            tracing::debug!(running = state.running_primary, "primary jobs still running");
            return;
        }

        if state.detail.state != RequestState::Running {
            let reason = state
                .detail
                .cancel_reason
                .unwrap_or(CancelReason::ExternalCancelRequest);
            self.drop_pending_primary(state, reason);
            return;
        }
        if !self.submit_next_primary(state) {
            self.create_secondary_jobs(state);
        }
    }

    /// Cancel the commands of every primary job not yet submitted.
    pub(super) fn drop_pending_primary(&self, state: &mut SessionState, reason: CancelReason) {
        for job in state.pending_primary.drain(..) {
            if let Some(command) = job
                .command_id_property()
                .and_then(|id| state.detail.commands.get_mut(id))
            {
                command.cancel(reason);
            }
        }
    }

    /// Re-derive the primary bookkeeping from the runtime's live jobs.
    ///
    /// Live primary jobs that have not finished count as running; the job
    /// whose end is being processed counts as running whatever its status.
    /// Pending jobs are recomputed and filtered against the commands that
    /// already have a live primary job.
    pub(super) fn resync_primary(&self, state: &mut SessionState, ending_job: Option<&str>) {
        state.primary_synced = true;
        let live = self.runtime.all_jobs();

        state.running_primary = live
            .iter()
            .filter(|j| j.is_primary())
            .filter(|j| !j.status.is_finished() || Some(j.id.as_str()) == ending_job)
            .count();
        state.secondary_created |= live.iter().any(|j| !j.is_primary());
        state.pending_primary.clear();

        if state.detail.state == RequestState::Running {
            if let Some(request) = state.request.clone() {
                let submitted: HashSet<&str> = live
                    .iter()
                    .filter(|j| j.is_primary())
                    .filter_map(|j| j.command_id_property())
                    .collect();
                let creation = state.orchestrator.create_primary_jobs(&request);
                let detail = &state.detail;
                state.pending_primary = creation
                    .jobs
                    .into_iter()
                    .filter(|job| {
                        job.command_id_property().is_some_and(|id| {
                            !submitted.contains(id)
                                && detail.commands.get(id).map_or(true, |c| !c.is_terminal())
                        })
                    })
                    .collect();
            }
        }
        tracing::info!(
            running = state.running_primary,
            pending = state.pending_primary.len(),
            secondary_created = state.secondary_created,
            "re-derived primary job bookkeeping"
        );
    }
}
