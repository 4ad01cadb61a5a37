use crate::events::{Severity, SideEffects};
use crate::visibility::{
    can_read_project_record, can_view_project, can_view_task, can_view_ticket, resolve,
    ResourceKind, ScopeFilter,
};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use worklane_core::types::{
    Actor, Project, ProjectCreateInput, ProjectStatus, ProjectUpdateInput, Task, TaskCreateInput,
    TaskUpdateInput, Ticket, TicketCreateInput, TicketUpdateInput, User, UserCreateInput, Vote,
};
use worklane_core::validation::{
    validate_project_create, validate_project_update, validate_task_create, validate_ticket_create,
    validate_user_create, ValidationError,
};
use worklane_storage::{
    CascadeOutcome, ProjectFilter, StorageError, TrackerStorage, VoteCommit,
};

/// Tracker errors
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Storage error: {0}")]
    Storage(StorageError),
    #[error("Validation errors: {0:?}")]
    Validation(Vec<ValidationError>),
    #[error("{0} not found")]
    NotFound(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Change request limit reached for project {project_id}")]
    AdmissionLimitReached { project_id: String },
    #[error("Write conflict: {0}")]
    Conflict(String),
}

impl TrackerError {
    /// Machine-readable marker for callers that need to branch on the
    /// outcome without parsing messages.
    pub fn code(&self) -> &'static str {
        match self {
            TrackerError::Storage(_) => "internal",
            TrackerError::Validation(_) => "invalid_input",
            TrackerError::NotFound(_) => "not_found",
            TrackerError::Forbidden(_) => "forbidden",
            TrackerError::AdmissionLimitReached { .. } => "major_change_limit",
            TrackerError::Conflict(_) => "conflict",
        }
    }
}

impl From<StorageError> for TrackerError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound => TrackerError::NotFound("Resource".to_string()),
            StorageError::LimitReached(project_id) => {
                TrackerError::AdmissionLimitReached { project_id }
            }
            StorageError::Conflict(reason) => TrackerError::Conflict(reason),
            other => TrackerError::Storage(other),
        }
    }
}

pub type TrackerResult<T> = Result<T, TrackerError>;

/// The tracker's operation surface.
///
/// Every operation takes the acting identity explicitly and runs the same
/// control flow: visibility scope, then business rules, then the storage
/// commit, then fire-and-forget side effects.
pub struct TrackerManager {
    storage: Arc<dyn TrackerStorage>,
    effects: SideEffects,
}

impl TrackerManager {
    pub fn new(storage: Arc<dyn TrackerStorage>, effects: SideEffects) -> Self {
        Self { storage, effects }
    }

    /// Everyone a project transition concerns: creator, heads, members,
    /// and the assignee, deduplicated in that order.
    fn project_recipients(project: &Project) -> Vec<String> {
        let mut recipients = vec![project.created_by.clone()];
        for head in &project.project_heads {
            if !recipients.contains(head) {
                recipients.push(head.clone());
            }
        }
        for member in &project.members {
            if !recipients.contains(&member.user) {
                recipients.push(member.user.clone());
            }
        }
        if let Some(ref assignee) = project.assignee {
            if !recipients.contains(assignee) {
                recipients.push(assignee.clone());
            }
        }
        recipients
    }

    fn dispatch_vote_effects(&self, actor: &Actor, commit: &VoteCommit) {
        let project = &commit.project;
        self.effects.audit(
            &actor.id,
            "project.vote_cast",
            format!("project:{}", project.id),
            Some(format!("{} -> {}", commit.previous_status, project.status)),
        );

        if commit.activated {
            self.effects.notify(
                Self::project_recipients(project),
                "Project activated",
                format!("Project '{}' was approved by all project heads", project.name),
                Severity::Info,
            );
        } else if project.status == ProjectStatus::Rejected
            && commit.previous_status != ProjectStatus::Rejected
        {
            self.effects.notify(
                Self::project_recipients(project),
                "Project rejected",
                format!(
                    "Project '{}' was rejected: {}",
                    project.name,
                    project.rejection_reason.as_deref().unwrap_or("no reason given")
                ),
                Severity::Warning,
            );
        }
    }

    // ---- Users ----------------------------------------------------------

    pub async fn create_user(&self, input: UserCreateInput) -> TrackerResult<User> {
        let validation_errors = validate_user_create(&input);
        if !validation_errors.is_empty() {
            return Err(TrackerError::Validation(validation_errors));
        }

        let user = self.storage.create_user(input).await?;
        info!("Created user '{}' with ID {}", user.name, user.id);
        Ok(user)
    }

    /// Resolves a user ID to the capability value operations consume.
    pub async fn load_actor(&self, user_id: &str) -> TrackerResult<Actor> {
        let user = self
            .storage
            .get_user(user_id)
            .await?
            .ok_or_else(|| TrackerError::NotFound(format!("User {}", user_id)))?;
        Ok(Actor::from(&user))
    }

    // ---- Projects -------------------------------------------------------

    pub async fn create_project(
        &self,
        actor: &Actor,
        input: ProjectCreateInput,
    ) -> TrackerResult<Project> {
        let validation_errors = validate_project_create(&input);
        if !validation_errors.is_empty() {
            return Err(TrackerError::Validation(validation_errors));
        }

        let project = self.storage.create_project(&actor.id, input).await?;

        info!("Created project '{}' with ID {}", project.name, project.id);
        self.effects.audit(
            &actor.id,
            "project.created",
            format!("project:{}", project.id),
            None,
        );
        self.effects.notify(
            project.project_heads.clone(),
            "Approval requested",
            format!("Project '{}' is awaiting your approval", project.name),
            Severity::Info,
        );
        Ok(project)
    }

    pub async fn get_project(&self, actor: &Actor, id: &str) -> TrackerResult<Project> {
        let project = self
            .storage
            .get_project(id)
            .await?
            .ok_or_else(|| TrackerError::NotFound(format!("Project {}", id)))?;

        if !can_read_project_record(actor, &project) {
            return Err(TrackerError::Forbidden(format!(
                "no access to project {}",
                id
            )));
        }
        Ok(project)
    }

    pub async fn list_projects(
        &self,
        actor: &Actor,
        filter: ProjectFilter,
    ) -> TrackerResult<Vec<Project>> {
        let mut projects = self.storage.list_projects(filter).await?;

        if resolve(actor, ResourceKind::Project) == ScopeFilter::Relationships {
            projects.retain(|p| can_view_project(actor, p));
        }

        debug!("Retrieved {} projects for {}", projects.len(), actor.id);
        Ok(projects)
    }

    pub async fn update_project(
        &self,
        actor: &Actor,
        id: &str,
        updates: ProjectUpdateInput,
    ) -> TrackerResult<Project> {
        let validation_errors = validate_project_update(&updates);
        if !validation_errors.is_empty() {
            return Err(TrackerError::Validation(validation_errors));
        }

        let project = self
            .storage
            .get_project(id)
            .await?
            .ok_or_else(|| TrackerError::NotFound(format!("Project {}", id)))?;

        // Creator and heads may edit until the project is activated;
        // admins always may.
        if !actor.is_admin() {
            let related = project.created_by == actor.id || project.is_head(&actor.id);
            if !related {
                return Err(TrackerError::Forbidden(format!(
                    "no access to project {}",
                    id
                )));
            }
            if project.approved_at.is_some() {
                return Err(TrackerError::Forbidden(
                    "project can no longer be edited after activation".to_string(),
                ));
            }
        }

        let project = self.storage.update_project(id, updates).await?;
        info!("Updated project '{}' (ID: {})", project.name, project.id);
        self.effects.audit(
            &actor.id,
            "project.updated",
            format!("project:{}", project.id),
            None,
        );
        Ok(project)
    }

    pub async fn delete_project(&self, actor: &Actor, id: &str) -> TrackerResult<CascadeOutcome> {
        let project = self
            .storage
            .get_project(id)
            .await?
            .ok_or_else(|| TrackerError::NotFound(format!("Project {}", id)))?;

        if !actor.is_admin() && project.created_by != actor.id {
            return Err(TrackerError::Forbidden(
                "only the creator or an admin may delete a project".to_string(),
            ));
        }

        let outcome = match self.storage.delete_project_cascade(id).await {
            Err(StorageError::Conflict(reason)) => {
                debug!("Cascade delete hit a write conflict, retrying once: {}", reason);
                self.storage.delete_project_cascade(id).await?
            }
            other => other?,
        };

        info!(
            "Deleted project '{}' (ID: {}), {} tasks and {} tickets removed",
            project.name, id, outcome.tasks_deleted, outcome.tickets_deleted
        );
        self.effects.audit(
            &actor.id,
            "project.deleted",
            format!("project:{}", id),
            Some(format!(
                "{} tasks, {} tickets",
                outcome.tasks_deleted, outcome.tickets_deleted
            )),
        );
        Ok(outcome)
    }

    // ---- Approval workflow ----------------------------------------------

    /// Applies one project head's vote, or the admin override when the
    /// actor is an admin.
    pub async fn submit_project_vote(
        &self,
        actor: &Actor,
        project_id: &str,
        vote: Vote,
        comment: Option<String>,
    ) -> TrackerResult<Project> {
        let project = self
            .storage
            .get_project(project_id)
            .await?
            .ok_or_else(|| TrackerError::NotFound(format!("Project {}", project_id)))?;

        // An admin's vote is an override, not per-head bookkeeping
        if actor.is_admin() {
            let status = match vote {
                Vote::Approve => ProjectStatus::Active,
                Vote::Reject => ProjectStatus::Rejected,
            };
            return self
                .admin_set_project_status(actor, project_id, status, comment)
                .await;
        }

        if !project.is_head(&actor.id) {
            return Err(TrackerError::Forbidden(format!(
                "{} is not a project head of {}",
                actor.id, project_id
            )));
        }

        let commit = match self
            .storage
            .submit_head_vote(project_id, &actor.id, vote, comment.clone())
            .await
        {
            Err(StorageError::Conflict(reason)) => {
                debug!("Vote hit a write conflict, retrying once: {}", reason);
                self.storage
                    .submit_head_vote(project_id, &actor.id, vote, comment)
                    .await?
            }
            other => other?,
        };

        info!(
            "Vote by {} on project {}: {} -> {}",
            actor.id, project_id, commit.previous_status, commit.project.status
        );
        self.dispatch_vote_effects(actor, &commit);
        Ok(commit.project)
    }

    /// Admin-only direct status write, bypassing the voting protocol.
    pub async fn admin_set_project_status(
        &self,
        actor: &Actor,
        project_id: &str,
        status: ProjectStatus,
        reason: Option<String>,
    ) -> TrackerResult<Project> {
        if !actor.is_admin() {
            return Err(TrackerError::Forbidden(
                "only admins may set project status directly".to_string(),
            ));
        }

        let commit = match self
            .storage
            .set_project_status(project_id, status, reason.clone(), &actor.id)
            .await
        {
            Err(StorageError::Conflict(conflict)) => {
                debug!("Status write hit a write conflict, retrying once: {}", conflict);
                self.storage
                    .set_project_status(project_id, status, reason, &actor.id)
                    .await?
            }
            other => other?,
        };

        info!(
            "Admin {} set project {} status: {} -> {}",
            actor.id, project_id, commit.previous_status, commit.project.status
        );
        self.effects.audit(
            &actor.id,
            "project.status_overridden",
            format!("project:{}", project_id),
            Some(format!("{} -> {}", commit.previous_status, commit.project.status)),
        );

        if commit.activated {
            self.effects.notify(
                Self::project_recipients(&commit.project),
                "Project activated",
                format!("Project '{}' was activated", commit.project.name),
                Severity::Info,
            );
        } else if commit.project.status == ProjectStatus::Rejected
            && commit.previous_status != ProjectStatus::Rejected
        {
            self.effects.notify(
                Self::project_recipients(&commit.project),
                "Project rejected",
                format!(
                    "Project '{}' was rejected: {}",
                    commit.project.name,
                    commit
                        .project
                        .rejection_reason
                        .as_deref()
                        .unwrap_or("no reason given")
                ),
                Severity::Warning,
            );
        }
        Ok(commit.project)
    }

    // ---- Tasks ----------------------------------------------------------

    pub async fn create_task(&self, actor: &Actor, input: TaskCreateInput) -> TrackerResult<Task> {
        let validation_errors = validate_task_create(&input);
        if !validation_errors.is_empty() {
            return Err(TrackerError::Validation(validation_errors));
        }

        let project = self
            .storage
            .get_project(&input.project_id)
            .await?
            .ok_or_else(|| TrackerError::NotFound(format!("Project {}", input.project_id)))?;

        if !can_view_project(actor, &project) {
            return Err(TrackerError::Forbidden(format!(
                "no access to project {}",
                project.id
            )));
        }

        let task = self.storage.create_task(&actor.id, input).await?;
        info!("Created task '{}' with ID {}", task.title, task.id);
        self.effects
            .audit(&actor.id, "task.created", format!("task:{}", task.id), None);
        Ok(task)
    }

    pub async fn get_task(&self, actor: &Actor, id: &str) -> TrackerResult<Task> {
        let task = self
            .storage
            .get_task(id)
            .await?
            .ok_or_else(|| TrackerError::NotFound(format!("Task {}", id)))?;
        let project = self.storage.get_project(&task.project_id).await?;

        if !can_view_task(actor, &task, project.as_ref()) {
            return Err(TrackerError::Forbidden(format!("no access to task {}", id)));
        }
        Ok(task)
    }

    pub async fn list_tasks(
        &self,
        actor: &Actor,
        project_id: Option<&str>,
    ) -> TrackerResult<Vec<Task>> {
        let mut tasks = self.storage.list_tasks(project_id).await?;

        if resolve(actor, ResourceKind::Task) == ScopeFilter::Relationships {
            let projects = self.project_index().await?;
            tasks.retain(|t| can_view_task(actor, t, projects.get(&t.project_id)));
        }

        debug!("Retrieved {} tasks for {}", tasks.len(), actor.id);
        Ok(tasks)
    }

    pub async fn update_task(
        &self,
        actor: &Actor,
        id: &str,
        updates: TaskUpdateInput,
    ) -> TrackerResult<Task> {
        let task = self
            .storage
            .get_task(id)
            .await?
            .ok_or_else(|| TrackerError::NotFound(format!("Task {}", id)))?;
        let project = self.storage.get_project(&task.project_id).await?;

        if !can_view_task(actor, &task, project.as_ref()) {
            return Err(TrackerError::Forbidden(format!("no access to task {}", id)));
        }

        let task = self.storage.update_task(id, updates).await?;
        info!("Updated task '{}' (ID: {})", task.title, task.id);
        self.effects
            .audit(&actor.id, "task.updated", format!("task:{}", id), None);
        Ok(task)
    }

    pub async fn delete_task(&self, actor: &Actor, id: &str) -> TrackerResult<CascadeOutcome> {
        let task = self
            .storage
            .get_task(id)
            .await?
            .ok_or_else(|| TrackerError::NotFound(format!("Task {}", id)))?;
        let project = self.storage.get_project(&task.project_id).await?;

        if !can_view_task(actor, &task, project.as_ref()) {
            return Err(TrackerError::Forbidden(format!("no access to task {}", id)));
        }

        let outcome = match self.storage.delete_task_cascade(id).await {
            Err(StorageError::Conflict(reason)) => {
                debug!("Task delete hit a write conflict, retrying once: {}", reason);
                self.storage.delete_task_cascade(id).await?
            }
            other => other?,
        };

        info!(
            "Deleted task {} ({} tickets removed)",
            id, outcome.tickets_deleted
        );
        self.effects.audit(
            &actor.id,
            "task.deleted",
            format!("task:{}", id),
            Some(format!("{} tickets", outcome.tickets_deleted)),
        );
        Ok(outcome)
    }

    // ---- Tickets --------------------------------------------------------

    /// Creates a ticket, running admission control for change requests.
    ///
    /// Bug tickets are always admitted. Change requests must claim one of
    /// the project's slots; when none is free the operation fails with
    /// [`TrackerError::AdmissionLimitReached`], which callers can
    /// distinguish from plain validation failure via `code()`.
    pub async fn create_ticket(
        &self,
        actor: &Actor,
        input: TicketCreateInput,
    ) -> TrackerResult<Ticket> {
        let validation_errors = validate_ticket_create(&input);
        if !validation_errors.is_empty() {
            return Err(TrackerError::Validation(validation_errors));
        }

        let task = self
            .storage
            .get_task(&input.task_id)
            .await?
            .ok_or_else(|| TrackerError::NotFound(format!("Task {}", input.task_id)))?;
        let project = self.storage.get_project(&task.project_id).await?;

        if !can_view_task(actor, &task, project.as_ref()) {
            return Err(TrackerError::Forbidden(format!(
                "no access to task {}",
                task.id
            )));
        }

        let ticket = match self.storage.create_ticket(&actor.id, input.clone()).await {
            Err(StorageError::Conflict(reason)) => {
                debug!("Ticket insert hit a write conflict, retrying once: {}", reason);
                self.storage.create_ticket(&actor.id, input).await?
            }
            other => other?,
        };

        info!("Created ticket '{}' with ID {}", ticket.title, ticket.id);
        self.effects.audit(
            &actor.id,
            "ticket.created",
            format!("ticket:{}", ticket.id),
            None,
        );
        Ok(ticket)
    }

    pub async fn get_ticket(&self, actor: &Actor, id: &str) -> TrackerResult<Ticket> {
        let ticket = self
            .storage
            .get_ticket(id)
            .await?
            .ok_or_else(|| TrackerError::NotFound(format!("Ticket {}", id)))?;

        let task = self.storage.get_task(&ticket.task_id).await?;
        let project = match &task {
            Some(task) => self.storage.get_project(&task.project_id).await?,
            None => None,
        };

        if !can_view_ticket(actor, &ticket, task.as_ref(), project.as_ref()) {
            return Err(TrackerError::Forbidden(format!(
                "no access to ticket {}",
                id
            )));
        }
        Ok(ticket)
    }

    pub async fn list_tickets(
        &self,
        actor: &Actor,
        task_id: Option<&str>,
    ) -> TrackerResult<Vec<Ticket>> {
        let mut tickets = self.storage.list_tickets(task_id).await?;

        if resolve(actor, ResourceKind::Ticket) == ScopeFilter::Relationships {
            let projects = self.project_index().await?;
            let tasks: HashMap<String, Task> = self
                .storage
                .list_tasks(None)
                .await?
                .into_iter()
                .map(|t| (t.id.clone(), t))
                .collect();

            tickets.retain(|ticket| {
                let task = tasks.get(&ticket.task_id);
                let project = task.and_then(|t| projects.get(&t.project_id));
                can_view_ticket(actor, ticket, task, project)
            });
        }

        debug!("Retrieved {} tickets for {}", tickets.len(), actor.id);
        Ok(tickets)
    }

    pub async fn update_ticket(
        &self,
        actor: &Actor,
        id: &str,
        updates: TicketUpdateInput,
    ) -> TrackerResult<Ticket> {
        // Reuse the read gate; updating requires seeing the ticket
        self.get_ticket(actor, id).await?;

        let ticket = self.storage.update_ticket(id, updates).await?;
        info!("Updated ticket '{}' (ID: {})", ticket.title, ticket.id);
        self.effects
            .audit(&actor.id, "ticket.updated", format!("ticket:{}", id), None);
        Ok(ticket)
    }

    pub async fn delete_ticket(&self, actor: &Actor, id: &str) -> TrackerResult<()> {
        self.get_ticket(actor, id).await?;

        match self.storage.delete_ticket(id).await {
            Err(StorageError::Conflict(reason)) => {
                debug!("Ticket delete hit a write conflict, retrying once: {}", reason);
                self.storage.delete_ticket(id).await?;
            }
            other => other?,
        }

        info!("Deleted ticket with ID {}", id);
        self.effects
            .audit(&actor.id, "ticket.deleted", format!("ticket:{}", id), None);
        Ok(())
    }

    // ---- Helpers --------------------------------------------------------

    async fn project_index(&self) -> TrackerResult<HashMap<String, Project>> {
        Ok(self
            .storage
            .list_projects(ProjectFilter::default())
            .await?
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect())
    }
}
