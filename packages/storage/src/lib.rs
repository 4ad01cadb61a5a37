use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use worklane_core::types::{
    Project, ProjectCreateInput, ProjectStatus, ProjectUpdateInput, Task, TaskCreateInput,
    TaskUpdateInput, Ticket, TicketCreateInput, TicketUpdateInput, User, UserCreateInput, Vote,
};

pub mod sqlite;

pub use sqlite::SqliteStorage;

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("Sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Record not found")]
    NotFound,
    #[error("Write conflict: {0}")]
    Conflict(String),
    #[error("Change request limit reached for project {0}")]
    LimitReached(String),
    #[error("Duplicate email: {0}")]
    DuplicateEmail(String),
    #[error("Invalid configuration format")]
    InvalidFormat,
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub provider: StorageProvider,
    pub enable_wal: bool,
    pub max_connections: u32,
    pub busy_timeout_seconds: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: StorageProvider::Sqlite {
                path: worklane_core::database_file(),
            },
            enable_wal: true,
            max_connections: 10,
            busy_timeout_seconds: 30,
        }
    }
}

impl StorageConfig {
    /// Configuration for an in-memory database, used by tests.
    ///
    /// A single connection is forced: every pooled connection to
    /// `sqlite::memory:` would otherwise get its own private database.
    pub fn in_memory() -> Self {
        Self {
            provider: StorageProvider::InMemory,
            enable_wal: false,
            max_connections: 1,
            busy_timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StorageProvider {
    Sqlite { path: PathBuf },
    InMemory,
}

/// Caller-supplied filter applied after the visibility scope
#[derive(Debug, Clone, Default)]
pub struct ProjectFilter {
    pub status: Option<ProjectStatus>,
    pub created_by: Option<String>,
    pub department: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Result of committing a head vote together with the recomputed aggregate
#[derive(Debug, Clone)]
pub struct VoteCommit {
    pub project: Project,
    pub previous_status: ProjectStatus,
    /// True exactly when this commit performed the first transition into
    /// `active` (the `approved_at` stamp).
    pub activated: bool,
}

/// Result of a direct administrative status write
#[derive(Debug, Clone)]
pub struct StatusCommit {
    pub project: Project,
    pub previous_status: ProjectStatus,
    pub activated: bool,
}

/// Result of an orchestrated cascade delete
#[derive(Debug, Clone, Default)]
pub struct CascadeOutcome {
    pub tasks_deleted: u64,
    pub tickets_deleted: u64,
}

/// Main storage trait that all storage implementations must implement
///
/// Multi-step operations (vote commit, admission, cascade deletes) are
/// trait methods rather than call sequences so an implementation can make
/// them atomic; the SQLite backend runs each inside one transaction.
#[async_trait]
pub trait TrackerStorage: Send + Sync {
    // Initialization
    async fn initialize(&self) -> StorageResult<()>;

    // Users
    async fn create_user(&self, input: UserCreateInput) -> StorageResult<User>;
    async fn get_user(&self, id: &str) -> StorageResult<Option<User>>;

    // Projects
    async fn create_project(
        &self,
        created_by: &str,
        input: ProjectCreateInput,
    ) -> StorageResult<Project>;
    async fn get_project(&self, id: &str) -> StorageResult<Option<Project>>;
    async fn list_projects(&self, filter: ProjectFilter) -> StorageResult<Vec<Project>>;
    async fn update_project(&self, id: &str, input: ProjectUpdateInput) -> StorageResult<Project>;
    /// Deletes a project and everything under it in one transaction.
    async fn delete_project_cascade(&self, id: &str) -> StorageResult<CascadeOutcome>;

    // Approval workflow
    /// Applies one head's vote and recomputes the aggregate status
    /// atomically. Missing approval rows are repaired from the current
    /// head list before the vote is applied.
    async fn submit_head_vote(
        &self,
        project_id: &str,
        head_id: &str,
        vote: Vote,
        comment: Option<String>,
    ) -> StorageResult<VoteCommit>;
    /// Direct status write for the admin override path; never consults
    /// approvals.
    async fn set_project_status(
        &self,
        project_id: &str,
        status: ProjectStatus,
        reason: Option<String>,
        set_by: &str,
    ) -> StorageResult<StatusCommit>;

    // Tasks
    async fn create_task(&self, created_by: &str, input: TaskCreateInput) -> StorageResult<Task>;
    async fn get_task(&self, id: &str) -> StorageResult<Option<Task>>;
    async fn list_tasks(&self, project_id: Option<&str>) -> StorageResult<Vec<Task>>;
    async fn update_task(&self, id: &str, input: TaskUpdateInput) -> StorageResult<Task>;
    /// Deletes a task and its tickets, releasing any change-request slots.
    async fn delete_task_cascade(&self, id: &str) -> StorageResult<CascadeOutcome>;

    // Tickets
    /// Inserts a ticket. For change requests the project-wide slot counter
    /// is claimed with a guarded increment in the same transaction; when
    /// no slot is free the insert fails with [`StorageError::LimitReached`].
    async fn create_ticket(
        &self,
        requested_by: &str,
        input: TicketCreateInput,
    ) -> StorageResult<Ticket>;
    async fn get_ticket(&self, id: &str) -> StorageResult<Option<Ticket>>;
    async fn list_tickets(&self, task_id: Option<&str>) -> StorageResult<Vec<Ticket>>;
    async fn update_ticket(&self, id: &str, input: TicketUpdateInput) -> StorageResult<Ticket>;
    /// Deletes a ticket, decrementing the task counter (floor 0) and
    /// releasing the project slot when it was a change request.
    async fn delete_ticket(&self, id: &str) -> StorageResult<()>;

    // Introspection
    async fn count_change_requests(&self, project_id: &str) -> StorageResult<i64>;
}
