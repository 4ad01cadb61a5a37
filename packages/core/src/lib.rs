// ABOUTME: Core types, traits, and utilities for Worklane
// ABOUTME: Foundational package providing shared functionality across all Worklane packages

pub mod approval;
pub mod constants;
pub mod types;
pub mod utils;
pub mod validation;

// Re-export main types
pub use types::{
    Actor, ApprovalStatus, HeadApproval, IssueType, MemberRole, Project, ProjectCreateInput,
    ProjectMember, ProjectStatus, ProjectUpdateInput, Task, TaskCreateInput, TaskStatus,
    TaskUpdateInput, Ticket, TicketCreateInput, TicketStatus, TicketUpdateInput, User,
    UserCreateInput, UserRole, Vote,
};

// Re-export the approval fold
pub use approval::{aggregate_approvals, AggregateDecision};

// Re-export constants
pub use constants::{
    database_file, worklane_dir, DEFAULT_REJECTION_REASON, MAX_CHANGE_REQUESTS_PER_PROJECT,
};

// Re-export utilities
pub use utils::generate_entity_id;

// Re-export validation
pub use validation::{
    is_well_formed_id, truncate, validate_project_create, validate_project_update,
    validate_task_create, validate_ticket_create, validate_user_create, ValidationError,
};
