use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{migrate::MigrateDatabase, Row};
use tracing::{debug, info};

use super::{
    CascadeOutcome, ProjectFilter, StatusCommit, StorageConfig, StorageError, StorageProvider,
    StorageResult, TrackerStorage, VoteCommit,
};
use worklane_core::types::{
    ApprovalStatus, HeadApproval, IssueType, MemberRole, Project, ProjectCreateInput,
    ProjectMember, ProjectStatus, ProjectUpdateInput, Task, TaskCreateInput, TaskStatus,
    TaskUpdateInput, Ticket, TicketCreateInput, TicketStatus, TicketUpdateInput, User,
    UserCreateInput, UserRole, Vote,
};
use worklane_core::{
    aggregate_approvals, generate_entity_id, AggregateDecision, DEFAULT_REJECTION_REASON,
    MAX_CHANGE_REQUESTS_PER_PROJECT,
};

/// SQLite implementation of TrackerStorage
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SqliteStorage instance
    pub async fn new(config: StorageConfig) -> StorageResult<Self> {
        let (database_url, max_connections) = match &config.provider {
            StorageProvider::Sqlite { path } => {
                // Ensure parent directory exists
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(StorageError::Io)?;
                }
                (format!("sqlite:{}", path.display()), config.max_connections)
            }
            // Pooled connections to :memory: each get a private database,
            // so the in-memory provider is pinned to one connection.
            StorageProvider::InMemory => ("sqlite::memory:".to_string(), 1),
        };

        // Create database if it doesn't exist
        if !sqlx::Sqlite::database_exists(&database_url)
            .await
            .map_err(StorageError::Sqlx)?
        {
            debug!("Creating database at: {}", database_url);
            sqlx::Sqlite::create_database(&database_url)
                .await
                .map_err(StorageError::Sqlx)?;
        }

        // Configure connection pool
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(config.busy_timeout_seconds))
            .connect(&database_url)
            .await
            .map_err(StorageError::Sqlx)?;

        // Configure SQLite settings (after pool creation, before migrations)
        if config.enable_wal {
            sqlx::query("PRAGMA journal_mode = WAL")
                .execute(&pool)
                .await
                .map_err(StorageError::Sqlx)?;
        }

        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await
            .map_err(StorageError::Sqlx)?;

        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&pool)
            .await
            .map_err(StorageError::Sqlx)?;

        let busy_timeout_ms = config.busy_timeout_seconds * 1000;
        sqlx::query(&format!("PRAGMA busy_timeout = {}", busy_timeout_ms))
            .execute(&pool)
            .await
            .map_err(StorageError::Sqlx)?;

        Ok(Self { pool })
    }

    /// Direct access to the underlying pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Classify a sqlx error, mapping lock contention to `Conflict`
    fn classify(e: sqlx::Error) -> StorageError {
        if let sqlx::Error::Database(ref db_err) = e {
            if let Some(code) = db_err.code() {
                // SQLITE_BUSY / SQLITE_LOCKED families
                if code == "5" || code == "6" || code == "261" || code == "517" {
                    return StorageError::Conflict(db_err.message().to_string());
                }
            }
        }
        StorageError::Sqlx(e)
    }

    fn parse_timestamp(value: &str, column: &str) -> StorageResult<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(value)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| StorageError::Database(format!("Invalid {} timestamp", column)))
    }

    fn parse_optional_timestamp(
        value: Option<String>,
        column: &str,
    ) -> StorageResult<Option<DateTime<Utc>>> {
        value
            .map(|v| Self::parse_timestamp(&v, column))
            .transpose()
    }

    fn project_status_to_string(status: &ProjectStatus) -> &'static str {
        match status {
            ProjectStatus::Draft => "draft",
            ProjectStatus::Pending => "pending",
            ProjectStatus::Approved => "approved",
            ProjectStatus::Rejected => "rejected",
            ProjectStatus::Active => "active",
            ProjectStatus::OnHold => "on_hold",
            ProjectStatus::Completed => "completed",
            ProjectStatus::Cancelled => "cancelled",
        }
    }

    fn parse_project_status(s: &str) -> ProjectStatus {
        match s {
            "draft" => ProjectStatus::Draft,
            "pending" => ProjectStatus::Pending,
            "approved" => ProjectStatus::Approved,
            "rejected" => ProjectStatus::Rejected,
            "active" => ProjectStatus::Active,
            "on_hold" => ProjectStatus::OnHold,
            "completed" => ProjectStatus::Completed,
            "cancelled" => ProjectStatus::Cancelled,
            _ => ProjectStatus::Pending,
        }
    }

    fn approval_status_to_string(status: &ApprovalStatus) -> &'static str {
        match status {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
        }
    }

    fn parse_approval_status(s: &str) -> ApprovalStatus {
        match s {
            "approved" => ApprovalStatus::Approved,
            "rejected" => ApprovalStatus::Rejected,
            _ => ApprovalStatus::Pending,
        }
    }

    fn task_status_to_string(status: &TaskStatus) -> &'static str {
        match status {
            TaskStatus::ToDo => "to_do",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::InReview => "in_review",
            TaskStatus::Done => "done",
        }
    }

    fn parse_task_status(s: &str) -> TaskStatus {
        match s {
            "in_progress" => TaskStatus::InProgress,
            "in_review" => TaskStatus::InReview,
            "done" => TaskStatus::Done,
            _ => TaskStatus::ToDo,
        }
    }

    fn ticket_status_to_string(status: &TicketStatus) -> &'static str {
        match status {
            TicketStatus::Open => "open",
            TicketStatus::InProgress => "in_progress",
            TicketStatus::Resolved => "resolved",
            TicketStatus::Rejected => "rejected",
        }
    }

    fn parse_ticket_status(s: &str) -> TicketStatus {
        match s {
            "in_progress" => TicketStatus::InProgress,
            "resolved" => TicketStatus::Resolved,
            "rejected" => TicketStatus::Rejected,
            _ => TicketStatus::Open,
        }
    }

    fn issue_type_to_string(issue_type: &IssueType) -> &'static str {
        match issue_type {
            IssueType::Bug => "bug",
            IssueType::ChangeRequest => "change_request",
        }
    }

    fn parse_issue_type(s: &str) -> IssueType {
        match s {
            "change_request" => IssueType::ChangeRequest,
            _ => IssueType::Bug,
        }
    }

    fn user_role_to_string(role: &UserRole) -> &'static str {
        match role {
            UserRole::Admin => "admin",
            UserRole::Member => "member",
        }
    }

    fn parse_user_role(s: &str) -> UserRole {
        match s {
            "admin" => UserRole::Admin,
            _ => UserRole::Member,
        }
    }

    fn member_role_to_string(role: &MemberRole) -> &'static str {
        match role {
            MemberRole::Developer => "developer",
            MemberRole::Designer => "designer",
            MemberRole::Manager => "manager",
            MemberRole::Qa => "qa",
            MemberRole::Other => "other",
        }
    }

    fn parse_member_role(s: &str) -> MemberRole {
        match s {
            "designer" => MemberRole::Designer,
            "manager" => MemberRole::Manager,
            "qa" => MemberRole::Qa,
            "other" => MemberRole::Other,
            _ => MemberRole::Developer,
        }
    }

    /// Convert a database row to a User
    fn row_to_user(row: &SqliteRow) -> StorageResult<User> {
        let role_str: String = row.try_get("role")?;
        let created_at_str: String = row.try_get("created_at")?;
        let updated_at_str: String = row.try_get("updated_at")?;

        Ok(User {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            email: row.try_get("email")?,
            role: Self::parse_user_role(&role_str),
            department: row.try_get("department")?,
            created_at: Self::parse_timestamp(&created_at_str, "created_at")?,
            updated_at: Self::parse_timestamp(&updated_at_str, "updated_at")?,
        })
    }

    /// Convert a project row plus its child rows to a Project
    fn row_to_project(
        row: &SqliteRow,
        project_heads: Vec<String>,
        approvals: Vec<HeadApproval>,
        members: Vec<ProjectMember>,
    ) -> StorageResult<Project> {
        let status_str: String = row.try_get("status")?;
        let created_at_str: String = row.try_get("created_at")?;
        let updated_at_str: String = row.try_get("updated_at")?;
        let approved_at_str: Option<String> = row.try_get("approved_at")?;

        Ok(Project {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            status: Self::parse_project_status(&status_str),
            department: row.try_get("department")?,
            created_by: row.try_get("created_by")?,
            assignee: row.try_get("assignee")?,
            project_heads,
            approvals,
            members,
            change_requests_used: row.try_get("change_requests_used")?,
            approved_at: Self::parse_optional_timestamp(approved_at_str, "approved_at")?,
            rejection_reason: row.try_get("rejection_reason")?,
            status_set_by: row.try_get("status_set_by")?,
            created_at: Self::parse_timestamp(&created_at_str, "created_at")?,
            updated_at: Self::parse_timestamp(&updated_at_str, "updated_at")?,
        })
    }

    fn row_to_approval(row: &SqliteRow) -> StorageResult<HeadApproval> {
        let status_str: String = row.try_get("status")?;
        let decided_at_str: Option<String> = row.try_get("decided_at")?;

        Ok(HeadApproval {
            head: row.try_get("head_id")?,
            status: Self::parse_approval_status(&status_str),
            decided_at: Self::parse_optional_timestamp(decided_at_str, "decided_at")?,
            comment: row.try_get("comment")?,
        })
    }

    fn row_to_task(row: &SqliteRow) -> StorageResult<Task> {
        let status_str: String = row.try_get("status")?;
        let created_at_str: String = row.try_get("created_at")?;
        let updated_at_str: String = row.try_get("updated_at")?;

        Ok(Task {
            id: row.try_get("id")?,
            project_id: row.try_get("project_id")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            status: Self::parse_task_status(&status_str),
            assigned_developer: row.try_get("assigned_developer")?,
            created_by: row.try_get("created_by")?,
            tickets_used: row.try_get("tickets_used")?,
            max_tickets: row.try_get("max_tickets")?,
            created_at: Self::parse_timestamp(&created_at_str, "created_at")?,
            updated_at: Self::parse_timestamp(&updated_at_str, "updated_at")?,
        })
    }

    fn row_to_ticket(row: &SqliteRow) -> StorageResult<Ticket> {
        let issue_type_str: String = row.try_get("issue_type")?;
        let status_str: String = row.try_get("status")?;
        let created_at_str: String = row.try_get("created_at")?;
        let updated_at_str: String = row.try_get("updated_at")?;

        Ok(Ticket {
            id: row.try_get("id")?,
            task_id: row.try_get("task_id")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            issue_type: Self::parse_issue_type(&issue_type_str),
            status: Self::parse_ticket_status(&status_str),
            requested_by: row.try_get("requested_by")?,
            created_at: Self::parse_timestamp(&created_at_str, "created_at")?,
            updated_at: Self::parse_timestamp(&updated_at_str, "updated_at")?,
        })
    }

    /// Load a project row's child tables and assemble the full document
    async fn hydrate_project(&self, row: SqliteRow) -> StorageResult<Project> {
        let id: String = row.try_get("id")?;

        let head_rows = sqlx::query(
            "SELECT user_id FROM project_heads WHERE project_id = ? ORDER BY position",
        )
        .bind(&id)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::Sqlx)?;
        let mut project_heads = Vec::with_capacity(head_rows.len());
        for head_row in &head_rows {
            project_heads.push(head_row.try_get("user_id")?);
        }

        let approval_rows = sqlx::query(
            "SELECT head_id, status, comment, decided_at FROM project_approvals WHERE project_id = ?",
        )
        .bind(&id)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::Sqlx)?;
        let mut approvals = Vec::with_capacity(approval_rows.len());
        for approval_row in &approval_rows {
            approvals.push(Self::row_to_approval(approval_row)?);
        }
        // Present approvals in head order
        approvals.sort_by_key(|a| {
            project_heads
                .iter()
                .position(|h| h == &a.head)
                .unwrap_or(usize::MAX)
        });

        let member_rows =
            sqlx::query("SELECT user_id, role FROM project_members WHERE project_id = ?")
                .bind(&id)
                .fetch_all(&self.pool)
                .await
                .map_err(StorageError::Sqlx)?;
        let mut members = Vec::with_capacity(member_rows.len());
        for member_row in &member_rows {
            let role_str: String = member_row.try_get("role")?;
            members.push(ProjectMember {
                user: member_row.try_get("user_id")?,
                role: Self::parse_member_role(&role_str),
            });
        }

        Self::row_to_project(&row, project_heads, approvals, members)
    }

    async fn fetch_project(&self, id: &str) -> StorageResult<Option<Project>> {
        let row = sqlx::query("SELECT * FROM projects WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::Sqlx)?;

        match row {
            Some(row) => Ok(Some(self.hydrate_project(row).await?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl TrackerStorage for SqliteStorage {
    async fn initialize(&self) -> StorageResult<()> {
        info!("Initializing SQLite storage with migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;

        sqlx::query("ANALYZE")
            .execute(&self.pool)
            .await
            .map_err(StorageError::Sqlx)?;

        info!("SQLite storage initialized successfully");
        Ok(())
    }

    async fn create_user(&self, input: UserCreateInput) -> StorageResult<User> {
        let id = generate_entity_id();
        let now = Utc::now();
        let role = input.role.unwrap_or_default();

        let result = sqlx::query(
            r#"
            INSERT INTO users (id, name, email, role, department, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&input.name)
        .bind(&input.email)
        .bind(Self::user_role_to_string(&role))
        .bind(&input.department)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!("Created user '{}' with ID {}", input.name, id);
                self.get_user(&id).await?.ok_or(StorageError::NotFound)
            }
            Err(sqlx::Error::Database(db_err)) => {
                // SQLite UNIQUE constraint violation
                if let Some(code) = db_err.code() {
                    if (code == "2067" || code == "1555") && db_err.message().contains("email") {
                        return Err(StorageError::DuplicateEmail(input.email));
                    }
                }
                Err(StorageError::Sqlx(sqlx::Error::Database(db_err)))
            }
            Err(e) => Err(Self::classify(e)),
        }
    }

    async fn get_user(&self, id: &str) -> StorageResult<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::Sqlx)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_user(&row)?)),
            None => Ok(None),
        }
    }

    async fn create_project(
        &self,
        created_by: &str,
        input: ProjectCreateInput,
    ) -> StorageResult<Project> {
        let id = generate_entity_id();
        let now = Utc::now();

        // Preserve head order while dropping duplicates
        let mut heads: Vec<&String> = Vec::new();
        for head in &input.project_heads {
            if !heads.contains(&head) {
                heads.push(head);
            }
        }

        let mut tx = self.pool.begin().await.map_err(Self::classify)?;

        sqlx::query(
            r#"
            INSERT INTO projects (
                id, name, description, status, department, created_by, assignee,
                change_requests_used, created_at, updated_at
            ) VALUES (?, ?, ?, 'pending', ?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&input.name)
        .bind(&input.description)
        .bind(&input.department)
        .bind(created_by)
        .bind(&input.assignee)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(Self::classify)?;

        for (position, head) in heads.iter().enumerate() {
            sqlx::query(
                "INSERT INTO project_heads (project_id, user_id, position) VALUES (?, ?, ?)",
            )
            .bind(&id)
            .bind(head)
            .bind(position as i64)
            .execute(&mut *tx)
            .await
            .map_err(Self::classify)?;

            sqlx::query(
                "INSERT INTO project_approvals (project_id, head_id, status) VALUES (?, ?, 'pending')",
            )
            .bind(&id)
            .bind(head)
            .execute(&mut *tx)
            .await
            .map_err(Self::classify)?;
        }

        for member in &input.members {
            sqlx::query(
                "INSERT OR IGNORE INTO project_members (project_id, user_id, role) VALUES (?, ?, ?)",
            )
            .bind(&id)
            .bind(&member.user)
            .bind(Self::member_role_to_string(&member.role))
            .execute(&mut *tx)
            .await
            .map_err(Self::classify)?;
        }

        tx.commit().await.map_err(Self::classify)?;

        debug!("Created project '{}' with ID {}", input.name, id);
        self.fetch_project(&id).await?.ok_or(StorageError::NotFound)
    }

    async fn get_project(&self, id: &str) -> StorageResult<Option<Project>> {
        self.fetch_project(id).await
    }

    async fn list_projects(&self, filter: ProjectFilter) -> StorageResult<Vec<Project>> {
        let mut where_conditions: Vec<&str> = vec!["1 = 1"];
        let mut query_params: Vec<String> = Vec::new();

        if let Some(status) = &filter.status {
            where_conditions.push("status = ?");
            query_params.push(Self::project_status_to_string(status).to_string());
        }

        if let Some(created_by) = &filter.created_by {
            where_conditions.push("created_by = ?");
            query_params.push(created_by.clone());
        }

        if let Some(department) = &filter.department {
            where_conditions.push("department = ?");
            query_params.push(department.clone());
        }

        let where_clause = where_conditions.join(" AND ");
        let limit_clause = filter
            .limit
            .map(|l| format!(" LIMIT {}", l))
            .unwrap_or_default();
        let offset_clause = filter
            .offset
            .map(|o| format!(" OFFSET {}", o))
            .unwrap_or_default();

        let query_str = format!(
            "SELECT * FROM projects WHERE {} ORDER BY created_at ASC, name ASC{}{}",
            where_clause, limit_clause, offset_clause
        );

        let mut query = sqlx::query(&query_str);
        for param in &query_params {
            query = query.bind(param);
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::Sqlx)?;

        let mut projects = Vec::new();
        for row in rows {
            projects.push(self.hydrate_project(row).await?);
        }

        debug!("Retrieved {} projects", projects.len());
        Ok(projects)
    }

    async fn update_project(&self, id: &str, input: ProjectUpdateInput) -> StorageResult<Project> {
        let mut query_parts = Vec::new();

        if input.name.is_some() {
            query_parts.push("name = ?");
        }
        if input.description.is_some() {
            query_parts.push("description = ?");
        }
        if input.department.is_some() {
            query_parts.push("department = ?");
        }
        if input.assignee.is_some() {
            query_parts.push("assignee = ?");
        }

        if query_parts.is_empty() && input.members.is_none() {
            return self.fetch_project(id).await?.ok_or(StorageError::NotFound);
        }

        query_parts.push("updated_at = ?");

        let query_str = format!("UPDATE projects SET {} WHERE id = ?", query_parts.join(", "));

        let mut tx = self.pool.begin().await.map_err(Self::classify)?;

        let mut query = sqlx::query(&query_str);
        if let Some(ref name) = input.name {
            query = query.bind(name);
        }
        if let Some(ref description) = input.description {
            query = query.bind(description);
        }
        if let Some(ref department) = input.department {
            query = query.bind(department);
        }
        if let Some(ref assignee) = input.assignee {
            query = query.bind(assignee);
        }
        query = query.bind(Utc::now().to_rfc3339()).bind(id);

        let result = query.execute(&mut *tx).await.map_err(Self::classify)?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }

        // Replace the member list wholesale when one was supplied
        if let Some(ref members) = input.members {
            sqlx::query("DELETE FROM project_members WHERE project_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(Self::classify)?;

            for member in members {
                sqlx::query(
                    "INSERT OR IGNORE INTO project_members (project_id, user_id, role) VALUES (?, ?, ?)",
                )
                .bind(id)
                .bind(&member.user)
                .bind(Self::member_role_to_string(&member.role))
                .execute(&mut *tx)
                .await
                .map_err(Self::classify)?;
            }
        }

        tx.commit().await.map_err(Self::classify)?;

        debug!("Updated project with ID {}", id);
        self.fetch_project(id).await?.ok_or(StorageError::NotFound)
    }

    async fn delete_project_cascade(&self, id: &str) -> StorageResult<CascadeOutcome> {
        let mut tx = self.pool.begin().await.map_err(Self::classify)?;

        let exists = sqlx::query("SELECT 1 FROM projects WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(Self::classify)?;
        if exists.is_none() {
            return Err(StorageError::NotFound);
        }

        let tickets_deleted = sqlx::query(
            "DELETE FROM tickets WHERE task_id IN (SELECT id FROM tasks WHERE project_id = ?)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(Self::classify)?
        .rows_affected();

        let tasks_deleted = sqlx::query("DELETE FROM tasks WHERE project_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(Self::classify)?
            .rows_affected();

        // Heads, approvals and members go with the project row
        sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(Self::classify)?;

        tx.commit().await.map_err(Self::classify)?;

        debug!(
            "Deleted project {} ({} tasks, {} tickets)",
            id, tasks_deleted, tickets_deleted
        );
        Ok(CascadeOutcome {
            tasks_deleted,
            tickets_deleted,
        })
    }

    async fn submit_head_vote(
        &self,
        project_id: &str,
        head_id: &str,
        vote: Vote,
        comment: Option<String>,
    ) -> StorageResult<VoteCommit> {
        let now = Utc::now();

        let mut tx = self.pool.begin().await.map_err(Self::classify)?;

        // Repair-on-read: every current head gets an approval row if one is
        // missing. This is also the transaction's first write, so racing
        // vote transactions serialize here before the aggregate is read.
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO project_approvals (project_id, head_id, status)
            SELECT project_id, user_id, 'pending' FROM project_heads WHERE project_id = ?
            "#,
        )
        .bind(project_id)
        .execute(&mut *tx)
        .await
        .map_err(Self::classify)?;

        let project_row =
            sqlx::query("SELECT status, approved_at FROM projects WHERE id = ?")
                .bind(project_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(Self::classify)?;
        let project_row = project_row.ok_or(StorageError::NotFound)?;
        let previous_status_str: String = project_row.try_get("status")?;
        let previous_status = Self::parse_project_status(&previous_status_str);
        let approved_at: Option<String> = project_row.try_get("approved_at")?;

        let existing = sqlx::query(
            "SELECT status, comment FROM project_approvals WHERE project_id = ? AND head_id = ?",
        )
        .bind(project_id)
        .bind(head_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Self::classify)?;
        let existing = existing.ok_or_else(|| {
            StorageError::Database(format!(
                "no approval record for head {} on project {}",
                head_id, project_id
            ))
        })?;

        let new_status = vote.as_approval_status();
        // The comment is part of the rejection record only
        let stored_comment = match vote {
            Vote::Reject => comment,
            Vote::Approve => None,
        };

        let existing_status = Self::parse_approval_status(&existing.try_get::<String, _>("status")?);
        let existing_comment: Option<String> = existing.try_get("comment")?;
        let vote_changed = existing_status != new_status || existing_comment != stored_comment;

        if vote_changed {
            sqlx::query(
                r#"
                UPDATE project_approvals SET status = ?, comment = ?, decided_at = ?
                WHERE project_id = ? AND head_id = ?
                "#,
            )
            .bind(Self::approval_status_to_string(&new_status))
            .bind(&stored_comment)
            .bind(now.to_rfc3339())
            .bind(project_id)
            .bind(head_id)
            .execute(&mut *tx)
            .await
            .map_err(Self::classify)?;
        }

        // Recompute the aggregate from every approval record
        let approval_rows = sqlx::query(
            "SELECT head_id, status, comment, decided_at FROM project_approvals WHERE project_id = ?",
        )
        .bind(project_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(Self::classify)?;
        let mut approvals = Vec::with_capacity(approval_rows.len());
        for approval_row in &approval_rows {
            approvals.push(Self::row_to_approval(approval_row)?);
        }

        let decision = aggregate_approvals(&approvals);
        let desired_status = match &decision {
            AggregateDecision::Approved => ProjectStatus::Active,
            AggregateDecision::Rejected { .. } => ProjectStatus::Rejected,
            AggregateDecision::Pending => previous_status,
        };

        let mut activated = false;
        if vote_changed || desired_status != previous_status {
            match &decision {
                AggregateDecision::Approved => {
                    activated = approved_at.is_none();
                    sqlx::query(
                        r#"
                        UPDATE projects
                        SET status = 'active',
                            rejection_reason = NULL,
                            approved_at = COALESCE(approved_at, ?),
                            updated_at = ?
                        WHERE id = ?
                        "#,
                    )
                    .bind(now.to_rfc3339())
                    .bind(now.to_rfc3339())
                    .bind(project_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(Self::classify)?;
                }
                AggregateDecision::Rejected { comment } => {
                    let reason = comment
                        .clone()
                        .unwrap_or_else(|| DEFAULT_REJECTION_REASON.to_string());
                    sqlx::query(
                        "UPDATE projects SET status = 'rejected', rejection_reason = ?, updated_at = ? WHERE id = ?",
                    )
                    .bind(reason)
                    .bind(now.to_rfc3339())
                    .bind(project_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(Self::classify)?;
                }
                AggregateDecision::Pending => {
                    sqlx::query("UPDATE projects SET updated_at = ? WHERE id = ?")
                        .bind(now.to_rfc3339())
                        .bind(project_id)
                        .execute(&mut *tx)
                        .await
                        .map_err(Self::classify)?;
                }
            }
        }

        tx.commit().await.map_err(Self::classify)?;

        let project = self
            .fetch_project(project_id)
            .await?
            .ok_or(StorageError::NotFound)?;

        debug!(
            "Vote by {} on project {}: {} -> {}",
            head_id, project_id, previous_status, project.status
        );
        Ok(VoteCommit {
            project,
            previous_status,
            activated,
        })
    }

    async fn set_project_status(
        &self,
        project_id: &str,
        status: ProjectStatus,
        reason: Option<String>,
        set_by: &str,
    ) -> StorageResult<StatusCommit> {
        let now = Utc::now();

        let mut tx = self.pool.begin().await.map_err(Self::classify)?;

        let project_row = sqlx::query("SELECT status, approved_at FROM projects WHERE id = ?")
            .bind(project_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(Self::classify)?;
        let project_row = project_row.ok_or(StorageError::NotFound)?;
        let previous_status_str: String = project_row.try_get("status")?;
        let previous_status = Self::parse_project_status(&previous_status_str);
        let approved_at: Option<String> = project_row.try_get("approved_at")?;

        let rejection_reason = match status {
            ProjectStatus::Rejected => {
                Some(reason.unwrap_or_else(|| DEFAULT_REJECTION_REASON.to_string()))
            }
            _ => None,
        };
        let activated = status == ProjectStatus::Active && approved_at.is_none();

        let approved_at_stamp = if status == ProjectStatus::Active {
            Some(now.to_rfc3339())
        } else {
            None
        };

        sqlx::query(
            r#"
            UPDATE projects
            SET status = ?,
                rejection_reason = ?,
                approved_at = COALESCE(approved_at, ?),
                status_set_by = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(Self::project_status_to_string(&status))
        .bind(&rejection_reason)
        .bind(&approved_at_stamp)
        .bind(set_by)
        .bind(now.to_rfc3339())
        .bind(project_id)
        .execute(&mut *tx)
        .await
        .map_err(Self::classify)?;

        tx.commit().await.map_err(Self::classify)?;

        let project = self
            .fetch_project(project_id)
            .await?
            .ok_or(StorageError::NotFound)?;

        debug!(
            "Status of project {} set to {} by {}",
            project_id, status, set_by
        );
        Ok(StatusCommit {
            project,
            previous_status,
            activated,
        })
    }

    async fn create_task(&self, created_by: &str, input: TaskCreateInput) -> StorageResult<Task> {
        let id = generate_entity_id();
        let now = Utc::now();

        let project = sqlx::query("SELECT 1 FROM projects WHERE id = ?")
            .bind(&input.project_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::Sqlx)?;
        if project.is_none() {
            return Err(StorageError::NotFound);
        }

        sqlx::query(
            r#"
            INSERT INTO tasks (
                id, project_id, title, description, status, assigned_developer,
                created_by, tickets_used, max_tickets, created_at, updated_at
            ) VALUES (?, ?, ?, ?, 'to_do', ?, ?, 0, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&input.project_id)
        .bind(&input.title)
        .bind(&input.description)
        .bind(&input.assigned_developer)
        .bind(created_by)
        .bind(input.max_tickets)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(Self::classify)?;

        debug!("Created task '{}' with ID {}", input.title, id);
        self.get_task(&id).await?.ok_or(StorageError::NotFound)
    }

    async fn get_task(&self, id: &str) -> StorageResult<Option<Task>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::Sqlx)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_task(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_tasks(&self, project_id: Option<&str>) -> StorageResult<Vec<Task>> {
        let rows = match project_id {
            Some(project_id) => {
                sqlx::query("SELECT * FROM tasks WHERE project_id = ? ORDER BY created_at ASC")
                    .bind(project_id)
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                sqlx::query("SELECT * FROM tasks ORDER BY created_at ASC")
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(StorageError::Sqlx)?;

        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(Self::row_to_task(&row)?);
        }
        Ok(tasks)
    }

    async fn update_task(&self, id: &str, input: TaskUpdateInput) -> StorageResult<Task> {
        let mut query_parts = Vec::new();

        if input.title.is_some() {
            query_parts.push("title = ?");
        }
        if input.description.is_some() {
            query_parts.push("description = ?");
        }
        if input.status.is_some() {
            query_parts.push("status = ?");
        }
        if input.assigned_developer.is_some() {
            query_parts.push("assigned_developer = ?");
        }

        if query_parts.is_empty() {
            return self.get_task(id).await?.ok_or(StorageError::NotFound);
        }

        query_parts.push("updated_at = ?");

        let query_str = format!("UPDATE tasks SET {} WHERE id = ?", query_parts.join(", "));

        let mut query = sqlx::query(&query_str);
        if let Some(ref title) = input.title {
            query = query.bind(title);
        }
        if let Some(ref description) = input.description {
            query = query.bind(description);
        }
        if let Some(ref status) = input.status {
            query = query.bind(Self::task_status_to_string(status));
        }
        if let Some(ref assigned_developer) = input.assigned_developer {
            query = query.bind(assigned_developer);
        }
        query = query.bind(Utc::now().to_rfc3339()).bind(id);

        let result = query.execute(&self.pool).await.map_err(Self::classify)?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }

        debug!("Updated task with ID {}", id);
        self.get_task(id).await?.ok_or(StorageError::NotFound)
    }

    async fn delete_task_cascade(&self, id: &str) -> StorageResult<CascadeOutcome> {
        let now = Utc::now();

        let mut tx = self.pool.begin().await.map_err(Self::classify)?;

        let task_row = sqlx::query("SELECT project_id FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(Self::classify)?;
        let task_row = task_row.ok_or(StorageError::NotFound)?;
        let project_id: String = task_row.try_get("project_id")?;

        let change_requests: i64 = sqlx::query(
            "SELECT COUNT(*) AS n FROM tickets WHERE task_id = ? AND issue_type = 'change_request'",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .map_err(Self::classify)?
        .try_get("n")?;

        let tickets_deleted = sqlx::query("DELETE FROM tickets WHERE task_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(Self::classify)?
            .rows_affected();

        sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(Self::classify)?;

        if change_requests > 0 {
            sqlx::query(
                r#"
                UPDATE projects
                SET change_requests_used = MAX(change_requests_used - ?, 0), updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(change_requests)
            .bind(now.to_rfc3339())
            .bind(&project_id)
            .execute(&mut *tx)
            .await
            .map_err(Self::classify)?;
        }

        tx.commit().await.map_err(Self::classify)?;

        debug!("Deleted task {} ({} tickets)", id, tickets_deleted);
        Ok(CascadeOutcome {
            tasks_deleted: 1,
            tickets_deleted,
        })
    }

    async fn create_ticket(
        &self,
        requested_by: &str,
        input: TicketCreateInput,
    ) -> StorageResult<Ticket> {
        let id = generate_entity_id();
        let now = Utc::now();

        let mut tx = self.pool.begin().await.map_err(Self::classify)?;

        let task_row = sqlx::query("SELECT project_id FROM tasks WHERE id = ?")
            .bind(&input.task_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(Self::classify)?;
        let task_row = task_row.ok_or(StorageError::NotFound)?;
        let project_id: String = task_row.try_get("project_id")?;

        if input.issue_type == IssueType::ChangeRequest {
            // Claim a change-request slot. The guarded increment is what
            // makes two racing creates unable to both pass the cap.
            let claimed = sqlx::query(
                r#"
                UPDATE projects
                SET change_requests_used = change_requests_used + 1, updated_at = ?
                WHERE id = ? AND change_requests_used < ?
                "#,
            )
            .bind(now.to_rfc3339())
            .bind(&project_id)
            .bind(MAX_CHANGE_REQUESTS_PER_PROJECT)
            .execute(&mut *tx)
            .await
            .map_err(Self::classify)?;

            if claimed.rows_affected() == 0 {
                return Err(StorageError::LimitReached(project_id));
            }
        }

        sqlx::query(
            r#"
            INSERT INTO tickets (
                id, task_id, title, description, issue_type, status,
                requested_by, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, 'open', ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&input.task_id)
        .bind(&input.title)
        .bind(&input.description)
        .bind(Self::issue_type_to_string(&input.issue_type))
        .bind(requested_by)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(Self::classify)?;

        sqlx::query("UPDATE tasks SET tickets_used = tickets_used + 1, updated_at = ? WHERE id = ?")
            .bind(now.to_rfc3339())
            .bind(&input.task_id)
            .execute(&mut *tx)
            .await
            .map_err(Self::classify)?;

        tx.commit().await.map_err(Self::classify)?;

        debug!("Created ticket '{}' with ID {}", input.title, id);
        self.get_ticket(&id).await?.ok_or(StorageError::NotFound)
    }

    async fn get_ticket(&self, id: &str) -> StorageResult<Option<Ticket>> {
        let row = sqlx::query("SELECT * FROM tickets WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::Sqlx)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_ticket(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_tickets(&self, task_id: Option<&str>) -> StorageResult<Vec<Ticket>> {
        let rows = match task_id {
            Some(task_id) => {
                sqlx::query("SELECT * FROM tickets WHERE task_id = ? ORDER BY created_at ASC")
                    .bind(task_id)
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                sqlx::query("SELECT * FROM tickets ORDER BY created_at ASC")
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(StorageError::Sqlx)?;

        let mut tickets = Vec::new();
        for row in rows {
            tickets.push(Self::row_to_ticket(&row)?);
        }
        Ok(tickets)
    }

    async fn update_ticket(&self, id: &str, input: TicketUpdateInput) -> StorageResult<Ticket> {
        let mut query_parts = Vec::new();

        if input.title.is_some() {
            query_parts.push("title = ?");
        }
        if input.description.is_some() {
            query_parts.push("description = ?");
        }
        if input.status.is_some() {
            query_parts.push("status = ?");
        }

        if query_parts.is_empty() {
            return self.get_ticket(id).await?.ok_or(StorageError::NotFound);
        }

        query_parts.push("updated_at = ?");

        let query_str = format!("UPDATE tickets SET {} WHERE id = ?", query_parts.join(", "));

        let mut query = sqlx::query(&query_str);
        if let Some(ref title) = input.title {
            query = query.bind(title);
        }
        if let Some(ref description) = input.description {
            query = query.bind(description);
        }
        if let Some(ref status) = input.status {
            query = query.bind(Self::ticket_status_to_string(status));
        }
        query = query.bind(Utc::now().to_rfc3339()).bind(id);

        let result = query.execute(&self.pool).await.map_err(Self::classify)?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }

        debug!("Updated ticket with ID {}", id);
        self.get_ticket(id).await?.ok_or(StorageError::NotFound)
    }

    async fn delete_ticket(&self, id: &str) -> StorageResult<()> {
        let now = Utc::now();

        let mut tx = self.pool.begin().await.map_err(Self::classify)?;

        let ticket_row = sqlx::query("SELECT task_id, issue_type FROM tickets WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(Self::classify)?;
        let ticket_row = ticket_row.ok_or(StorageError::NotFound)?;
        let task_id: String = ticket_row.try_get("task_id")?;
        let issue_type = Self::parse_issue_type(&ticket_row.try_get::<String, _>("issue_type")?);

        sqlx::query("DELETE FROM tickets WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(Self::classify)?;

        // Counter floors at zero even if deletes race
        sqlx::query(
            "UPDATE tasks SET tickets_used = MAX(tickets_used - 1, 0), updated_at = ? WHERE id = ?",
        )
        .bind(now.to_rfc3339())
        .bind(&task_id)
        .execute(&mut *tx)
        .await
        .map_err(Self::classify)?;

        if issue_type == IssueType::ChangeRequest {
            sqlx::query(
                r#"
                UPDATE projects
                SET change_requests_used = MAX(change_requests_used - 1, 0), updated_at = ?
                WHERE id = (SELECT project_id FROM tasks WHERE id = ?)
                "#,
            )
            .bind(now.to_rfc3339())
            .bind(&task_id)
            .execute(&mut *tx)
            .await
            .map_err(Self::classify)?;
        }

        tx.commit().await.map_err(Self::classify)?;

        debug!("Deleted ticket with ID {}", id);
        Ok(())
    }

    async fn count_change_requests(&self, project_id: &str) -> StorageResult<i64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n
            FROM tickets
            JOIN tasks ON tickets.task_id = tasks.id
            WHERE tasks.project_id = ? AND tickets.issue_type = 'change_request'
            "#,
        )
        .bind(project_id)
        .fetch_one(&self.pool)
        .await
        .map_err(StorageError::Sqlx)?;

        Ok(row.try_get("n")?)
    }
}
