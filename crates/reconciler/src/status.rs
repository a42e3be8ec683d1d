//! Builder state derived from the Job's execution counters.

use k8s_openapi::api::batch::v1::Job;
use ko_core::KoBuilderState;

/// Execution counters reported on a Job's status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobCounters {
    pub active: i32,
    pub succeeded: i32,
    pub failed: i32,
}

impl JobCounters {
    pub const fn new(active: i32, succeeded: i32, failed: i32) -> Self {
        Self {
            active,
            succeeded,
            failed,
        }
    }

    /// Counters of `job`; missing fields count as zero.
    pub fn of(job: &Job) -> Self {
        job.status.as_ref().map_or_else(Self::default, |status| Self {
            active: status.active.unwrap_or(0),
            succeeded: status.succeeded.unwrap_or(0),
            failed: status.failed.unwrap_or(0),
        })
    }
}

/// Outcome of observing a Job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// State the builder should be in.
    pub state: KoBuilderState,
    /// Whether the Job has finished and should be removed.
    pub delete_job: bool,
}

/// Derive the builder state from job counters. First match wins, so
/// `succeeded` beats a simultaneous `failed`.
pub const fn transition(counters: JobCounters) -> Transition {
    let state = if counters.succeeded == 1 {
        KoBuilderState::Deployed
    } else if counters.failed == 1 {
        KoBuilderState::ErrorDeploying
    } else if counters.active == 1 {
        KoBuilderState::Deploying
    } else {
        KoBuilderState::Unknown
    };
    Transition {
        state,
        delete_job: state.is_terminal(),
    }
}

/// Whether a missing Job should be (re)created for a builder in `current`.
///
/// Only a builder that never ran or whose config was just revised gets a
/// job; a terminal outcome is left alone.
pub const fn should_create_job(current: Option<KoBuilderState>) -> bool {
    matches!(current, None | Some(KoBuilderState::Updated))
}
