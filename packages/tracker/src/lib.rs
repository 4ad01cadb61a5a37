//! # Worklane Tracker
//!
//! The tracker core: the project approval workflow, the change-request
//! admission limiter, and the visibility resolver shared by every read
//! path. Transport and authentication live outside this crate; every
//! operation takes the acting identity as an explicit [`Actor`].

pub mod events;
pub mod manager;
pub mod visibility;

// Re-export main types from core
pub use worklane_core::{
    aggregate_approvals, AggregateDecision, Actor, ApprovalStatus, HeadApproval, IssueType,
    MemberRole, Project, ProjectCreateInput, ProjectMember, ProjectStatus, ProjectUpdateInput,
    Task, TaskCreateInput, TaskStatus, TaskUpdateInput, Ticket, TicketCreateInput, TicketStatus,
    TicketUpdateInput, User, UserCreateInput, UserRole, ValidationError, Vote,
};

// Re-export the manager surface
pub use manager::{TrackerError, TrackerManager, TrackerResult};

// Re-export visibility predicates
pub use visibility::{
    can_read_project_record, can_view_project, can_view_task, can_view_ticket, resolve,
    ResourceKind, ScopeFilter,
};

// Re-export side-effect interfaces
pub use events::{
    AuditEntry, AuditSink, Notification, NotificationSink, Severity, SideEffectError, SideEffects,
    TracingAuditSink, TracingNotificationSink,
};

// Re-export storage types and traits
pub use worklane_storage::{
    CascadeOutcome, ProjectFilter, SqliteStorage, StatusCommit, StorageConfig, StorageError,
    StorageProvider, StorageResult, TrackerStorage, VoteCommit,
};
