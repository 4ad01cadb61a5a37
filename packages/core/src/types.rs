// ABOUTME: Domain type definitions for the tracker
// ABOUTME: Users, projects, head approvals, members, tasks, and tickets

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Global role of a user account
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    Member,
}

impl Default for UserRole {
    fn default() -> Self {
        UserRole::Member
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserRole::Admin => write!(f, "admin"),
            UserRole::Member => write!(f, "member"),
        }
    }
}

/// Role of a user inside a single project
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Developer,
    Designer,
    Manager,
    Qa,
    Other,
}

impl Default for MemberRole {
    fn default() -> Self {
        MemberRole::Developer
    }
}

/// Status options for projects
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Draft,
    Pending,
    Approved,
    Rejected,
    Active,
    OnHold,
    Completed,
    Cancelled,
}

impl Default for ProjectStatus {
    fn default() -> Self {
        ProjectStatus::Pending
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProjectStatus::Draft => "draft",
            ProjectStatus::Pending => "pending",
            ProjectStatus::Approved => "approved",
            ProjectStatus::Rejected => "rejected",
            ProjectStatus::Active => "active",
            ProjectStatus::OnHold => "on_hold",
            ProjectStatus::Completed => "completed",
            ProjectStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Per-head vote state on a pending project
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl Default for ApprovalStatus {
    fn default() -> Self {
        ApprovalStatus::Pending
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApprovalStatus::Pending => write!(f, "pending"),
            ApprovalStatus::Approved => write!(f, "approved"),
            ApprovalStatus::Rejected => write!(f, "rejected"),
        }
    }
}

/// Task status options
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    ToDo,
    InProgress,
    InReview,
    Done,
}

impl Default for TaskStatus {
    fn default() -> Self {
        TaskStatus::ToDo
    }
}

/// Ticket status options
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    InProgress,
    Resolved,
    Rejected,
}

impl Default for TicketStatus {
    fn default() -> Self {
        TicketStatus::Open
    }
}

/// Classification of a ticket
///
/// Change requests are capacity-limited per project; bugs are not.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    Bug,
    ChangeRequest,
}

impl Default for IssueType {
    fn default() -> Self {
        IssueType::Bug
    }
}

/// A user account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub role: UserRole,
    pub department: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

/// The acting identity passed into every operation
///
/// Operations receive the actor explicitly rather than reading it from an
/// ambient auth context, so permission checks stay testable in isolation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub role: UserRole,
    pub department: Option<String>,
}

impl Actor {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

impl From<&User> for Actor {
    fn from(user: &User) -> Self {
        Actor {
            id: user.id.clone(),
            role: user.role,
            department: user.department.clone(),
        }
    }
}

/// One head's approval record
///
/// A project carries exactly one of these per project head once the
/// approvals have been initialized, keyed by head identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeadApproval {
    pub head: String,
    #[serde(default)]
    pub status: ApprovalStatus,
    #[serde(rename = "decidedAt")]
    pub decided_at: Option<DateTime<Utc>>,
    pub comment: Option<String>,
}

impl HeadApproval {
    pub fn pending(head: impl Into<String>) -> Self {
        HeadApproval {
            head: head.into(),
            status: ApprovalStatus::Pending,
            decided_at: None,
            comment: None,
        }
    }
}

/// A user's membership in a project
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectMember {
    pub user: String,
    #[serde(default)]
    pub role: MemberRole,
}

/// A project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub status: ProjectStatus,
    pub department: Option<String>,
    #[serde(rename = "createdBy")]
    pub created_by: String,
    pub assignee: Option<String>,
    #[serde(rename = "projectHeads")]
    pub project_heads: Vec<String>,
    pub approvals: Vec<HeadApproval>,
    pub members: Vec<ProjectMember>,
    #[serde(rename = "changeRequestsUsed")]
    pub change_requests_used: i64,
    #[serde(rename = "approvedAt")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(rename = "rejectionReason")]
    pub rejection_reason: Option<String>,
    #[serde(rename = "statusSetBy")]
    pub status_set_by: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

impl Project {
    /// Whether `user_id` is one of the project heads
    pub fn is_head(&self, user_id: &str) -> bool {
        self.project_heads.iter().any(|h| h == user_id)
    }

    /// Whether `user_id` appears in the member list
    pub fn is_member(&self, user_id: &str) -> bool {
        self.members.iter().any(|m| m.user == user_id)
    }
}

/// A task inside a project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(rename = "projectId")]
    pub project_id: String,
    pub title: String,
    pub description: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(rename = "assignedDeveloper")]
    pub assigned_developer: Option<String>,
    #[serde(rename = "createdBy")]
    pub created_by: String,
    #[serde(rename = "ticketsUsed")]
    pub tickets_used: i64,
    #[serde(rename = "maxTickets")]
    pub max_tickets: Option<i64>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

/// A ticket filed against a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    #[serde(rename = "taskId")]
    pub task_id: String,
    pub title: String,
    pub description: Option<String>,
    #[serde(rename = "issueType")]
    pub issue_type: IssueType,
    #[serde(default)]
    pub status: TicketStatus,
    #[serde(rename = "requestedBy")]
    pub requested_by: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a new user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCreateInput {
    pub name: String,
    pub email: String,
    pub role: Option<UserRole>,
    pub department: Option<String>,
}

/// Input for creating a new project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectCreateInput {
    pub name: String,
    pub description: Option<String>,
    pub department: Option<String>,
    pub assignee: Option<String>,
    #[serde(rename = "projectHeads")]
    pub project_heads: Vec<String>,
    #[serde(default)]
    pub members: Vec<ProjectMember>,
}

/// Input for updating an existing project
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectUpdateInput {
    pub name: Option<String>,
    pub description: Option<String>,
    pub department: Option<String>,
    pub assignee: Option<String>,
    pub members: Option<Vec<ProjectMember>>,
}

/// Input for creating a new task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCreateInput {
    #[serde(rename = "projectId")]
    pub project_id: String,
    pub title: String,
    pub description: Option<String>,
    #[serde(rename = "assignedDeveloper")]
    pub assigned_developer: Option<String>,
    #[serde(rename = "maxTickets")]
    pub max_tickets: Option<i64>,
}

/// Input for updating an existing task
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskUpdateInput {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    #[serde(rename = "assignedDeveloper")]
    pub assigned_developer: Option<String>,
}

/// Input for creating a new ticket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketCreateInput {
    #[serde(rename = "taskId")]
    pub task_id: String,
    pub title: String,
    pub description: Option<String>,
    #[serde(rename = "issueType")]
    pub issue_type: IssueType,
}

/// Input for updating an existing ticket
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TicketUpdateInput {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TicketStatus>,
}

/// The vote a project head casts
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Vote {
    Approve,
    Reject,
}

impl Vote {
    pub fn as_approval_status(self) -> ApprovalStatus {
        match self {
            Vote::Approve => ApprovalStatus::Approved,
            Vote::Reject => ApprovalStatus::Rejected,
        }
    }
}
