use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Execution status shared by plan executions and node executions.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Queued,
    Running,
    AsyncWaiting,
    TaskWaiting,
    TimedWaiting,
    Paused,
    ApprovalWaiting,
    InputWaiting,
    InterventionWaiting,
    QueuedLicenseLimitReached,
    Discontinuing,
    Succeeded,
    Failed,
    Aborted,
    Expired,
    Errored,
    Skipped,
    IgnoreFailed,
}

pub const FINAL_STATUSES: &[Status] = &[
    Status::Succeeded,
    Status::Failed,
    Status::Aborted,
    Status::Expired,
    Status::Errored,
    Status::Skipped,
    Status::IgnoreFailed,
];

pub const POSITIVE_STATUSES: &[Status] = &[Status::Succeeded, Status::Skipped, Status::IgnoreFailed];

pub const BROKEN_STATUSES: &[Status] = &[Status::Failed, Status::Errored, Status::Expired, Status::Aborted];

pub const SUSPENDED_STATUSES: &[Status] = &[
    Status::Paused,
    Status::ApprovalWaiting,
    Status::InputWaiting,
    Status::InterventionWaiting,
];

/// Statuses of a node that is still making progress on its own.
pub const UNPAUSABLE_STATUSES: &[Status] = &[
    Status::Queued,
    Status::Running,
    Status::AsyncWaiting,
    Status::TaskWaiting,
    Status::TimedWaiting,
    Status::Discontinuing,
    Status::QueuedLicenseLimitReached,
];

/// Statuses a pause interrupt may be applied to.
pub const PAUSABLE_STATUSES: &[Status] = &[
    Status::Queued,
    Status::Running,
    Status::AsyncWaiting,
    Status::TaskWaiting,
    Status::TimedWaiting,
];

/// Statuses from which a node may be moved (back) to `Running`.
pub const RESUMABLE_STATUSES: &[Status] = &[
    Status::Queued,
    Status::Paused,
    Status::ApprovalWaiting,
    Status::InputWaiting,
    Status::InterventionWaiting,
    Status::QueuedLicenseLimitReached,
    Status::AsyncWaiting,
    Status::TaskWaiting,
    Status::TimedWaiting,
];

const ACTIVE_STATUSES: &[Status] = &[
    Status::Queued,
    Status::Running,
    Status::AsyncWaiting,
    Status::TaskWaiting,
    Status::TimedWaiting,
    Status::Discontinuing,
];

impl Status {
    pub fn is_final(self) -> bool {
        FINAL_STATUSES.contains(&self)
    }

    pub fn is_positive(self) -> bool {
        POSITIVE_STATUSES.contains(&self)
    }

    pub fn is_broken(self) -> bool {
        BROKEN_STATUSES.contains(&self)
    }

    pub fn is_suspended(self) -> bool {
        SUSPENDED_STATUSES.contains(&self)
    }

    pub fn is_unpausable(self) -> bool {
        UNPAUSABLE_STATUSES.contains(&self)
    }

    fn is_waiting(self) -> bool {
        matches!(self, Status::AsyncWaiting | Status::TaskWaiting | Status::TimedWaiting)
    }

    /// Whether the node state machine allows moving from `self` to `next`.
    ///
    /// Final statuses never move. Writing the current status again is not a
    /// transition and is rejected here as well, which keeps re-delivered
    /// updates from bumping the watermark.
    pub fn can_transition_to(self, next: Status) -> bool {
        if self.is_final() || self == next {
            return false;
        }
        match self {
            Status::Queued => {
                next == Status::Running
                    || next == Status::Paused
                    || next == Status::Discontinuing
                    || next.is_final()
            }
            Status::Running => next != Status::Queued,
            s if s.is_waiting() => next != Status::Queued && next != Status::QueuedLicenseLimitReached,
            s if s.is_suspended() => {
                next == Status::Running || next == Status::Discontinuing || next.is_suspended() || next.is_final()
            }
            Status::QueuedLicenseLimitReached => {
                next == Status::Running || next == Status::Discontinuing || next.is_final()
            }
            Status::Discontinuing => next.is_final(),
            _ => false,
        }
    }
}

/// Reduces the statuses of a plan's root executions into the plan's aggregate status.
pub fn calculate_status(statuses: &[Status]) -> Status {
    if statuses.is_empty() {
        return Status::Queued;
    }
    let any = |s: Status| statuses.contains(&s);

    if statuses.iter().any(|s| ACTIVE_STATUSES.contains(s)) {
        return Status::Running;
    }

    for suspended in [
        Status::InterventionWaiting,
        Status::ApprovalWaiting,
        Status::InputWaiting,
        Status::QueuedLicenseLimitReached,
        Status::Paused,
    ] {
        if any(suspended) {
            return suspended;
        }
    }

    for broken in [Status::Aborted, Status::Errored, Status::Failed, Status::Expired] {
        if any(broken) {
            return broken;
        }
    }

    if any(Status::IgnoreFailed) {
        Status::IgnoreFailed
    } else {
        Status::Succeeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn final_statuses_never_transition() {
        for from in FINAL_STATUSES {
            for to in Status::iter() {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be rejected");
            }
        }
    }

    #[test]
    fn license_limit_is_only_entered_from_running() {
        for from in Status::iter() {
            let allowed = from.can_transition_to(Status::QueuedLicenseLimitReached);
            assert_eq!(allowed, from == Status::Running, "unexpected result from {from}");
        }
        assert!(Status::QueuedLicenseLimitReached.can_transition_to(Status::Running));
    }

    #[test]
    fn suspended_statuses_resume_or_finish() {
        for from in SUSPENDED_STATUSES {
            assert!(from.can_transition_to(Status::Running));
            assert!(from.can_transition_to(Status::Aborted));
            assert!(!from.can_transition_to(Status::Queued));
        }
    }

    #[test]
    fn aggregate_status_examples() {
        use Status::*;
        assert_eq!(calculate_status(&[Succeeded, Succeeded]), Succeeded);
        assert_eq!(calculate_status(&[Succeeded, Running]), Running);
        assert_eq!(calculate_status(&[Succeeded, Failed]), Failed);
        assert_eq!(calculate_status(&[Paused]), Paused);
        assert_eq!(calculate_status(&[Paused, Running]), Running);
        assert_eq!(calculate_status(&[Failed, Aborted]), Aborted);
        assert_eq!(calculate_status(&[Succeeded, Skipped, IgnoreFailed]), IgnoreFailed);
        assert_eq!(calculate_status(&[ApprovalWaiting, Paused]), ApprovalWaiting);
        assert_eq!(calculate_status(&[]), Queued);
    }

    #[test]
    fn status_names_round_trip_through_strings() {
        assert_eq!(Status::QueuedLicenseLimitReached.to_string(), "QUEUED_LICENSE_LIMIT_REACHED");
        assert_eq!(Status::from_str("APPROVAL_WAITING").ok(), Some(Status::ApprovalWaiting));
        let json = serde_json::to_string(&Status::IgnoreFailed).unwrap_or_default();
        assert_eq!(json, "\"IGNORE_FAILED\"");
    }
}
