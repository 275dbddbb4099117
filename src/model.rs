//! Status state machines. The portal stores statuses as TEXT; every
//! transition is validated here rather than trusted from the caller.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeamStatus {
    Pending,
    Approved,
    NotCompleted,
    InProgress,
    ReadyForReview,
    ChangesRequired,
    Completed,
}

impl TeamStatus {
    pub fn parse(s: &str) -> Option<TeamStatus> {
        match s {
            "PENDING" => Some(TeamStatus::Pending),
            "APPROVED" => Some(TeamStatus::Approved),
            "NOT_COMPLETED" => Some(TeamStatus::NotCompleted),
            "IN_PROGRESS" => Some(TeamStatus::InProgress),
            "READY_FOR_REVIEW" => Some(TeamStatus::ReadyForReview),
            "CHANGES_REQUIRED" => Some(TeamStatus::ChangesRequired),
            "COMPLETED" => Some(TeamStatus::Completed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TeamStatus::Pending => "PENDING",
            TeamStatus::Approved => "APPROVED",
            TeamStatus::NotCompleted => "NOT_COMPLETED",
            TeamStatus::InProgress => "IN_PROGRESS",
            TeamStatus::ReadyForReview => "READY_FOR_REVIEW",
            TeamStatus::ChangesRequired => "CHANGES_REQUIRED",
            TeamStatus::Completed => "COMPLETED",
        }
    }

    fn is_working(&self) -> bool {
        matches!(
            self,
            TeamStatus::NotCompleted
                | TeamStatus::InProgress
                | TeamStatus::ReadyForReview
                | TeamStatus::ChangesRequired
        )
    }

    /// Declared transition table. PENDING only approves; the working
    /// states move freely among themselves and to COMPLETED; COMPLETED
    /// can reopen. Nothing returns to PENDING.
    pub fn can_transition(&self, to: TeamStatus) -> bool {
        if *self == to {
            return false;
        }
        match self {
            TeamStatus::Pending => to == TeamStatus::Approved,
            TeamStatus::Approved => to.is_working() || to == TeamStatus::Completed,
            s if s.is_working() => to.is_working() || to == TeamStatus::Completed,
            TeamStatus::Completed => {
                matches!(to, TeamStatus::InProgress | TeamStatus::ChangesRequired)
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewStatus {
    Pending,
    InProgress,
    Completed,
    ChangesRequired,
}

impl ReviewStatus {
    pub fn parse(s: &str) -> Option<ReviewStatus> {
        match s {
            "PENDING" => Some(ReviewStatus::Pending),
            "IN_PROGRESS" => Some(ReviewStatus::InProgress),
            "COMPLETED" => Some(ReviewStatus::Completed),
            "CHANGES_REQUIRED" => Some(ReviewStatus::ChangesRequired),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "PENDING",
            ReviewStatus::InProgress => "IN_PROGRESS",
            ReviewStatus::Completed => "COMPLETED",
            ReviewStatus::ChangesRequired => "CHANGES_REQUIRED",
        }
    }

    /// COMPLETED is terminal; a fresh review row supersedes it instead.
    /// PENDING may complete directly (single-sitting review).
    pub fn can_transition(&self, to: ReviewStatus) -> bool {
        match self {
            ReviewStatus::Pending => {
                matches!(to, ReviewStatus::InProgress | ReviewStatus::Completed)
            }
            ReviewStatus::InProgress => {
                matches!(to, ReviewStatus::Completed | ReviewStatus::ChangesRequired)
            }
            ReviewStatus::ChangesRequired => to == ReviewStatus::InProgress,
            ReviewStatus::Completed => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentMode {
    Online,
    Offline,
}

impl AssignmentMode {
    pub fn parse(s: &str) -> Option<AssignmentMode> {
        match s {
            "ONLINE" => Some(AssignmentMode::Online),
            "OFFLINE" => Some(AssignmentMode::Offline),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentMode::Online => "ONLINE",
            AssignmentMode::Offline => "OFFLINE",
        }
    }
}
