// ABOUTME: Role- and relationship-scoped visibility resolver
// ABOUTME: Pure predicates deciding which records an actor may see or act on

use worklane_core::types::{Actor, Project, Task, Ticket};

/// The kind of resource a visibility question is about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Project,
    Task,
    Ticket,
}

/// The scope a list operation must apply for an actor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeFilter {
    /// No restriction; the actor sees the whole universe.
    Everything,
    /// Records must pass the relationship predicates below.
    Relationships,
}

/// Resolves the filter an actor gets for a resource kind.
///
/// Admins see everything. Everyone else is scoped to records they have a
/// relationship with; the per-record predicates decide which. The result
/// depends only on the inputs, and every clause is additive: gaining a
/// relationship can only widen what an actor sees.
pub fn resolve(actor: &Actor, _kind: ResourceKind) -> ScopeFilter {
    if actor.is_admin() {
        ScopeFilter::Everything
    } else {
        ScopeFilter::Relationships
    }
}

/// Whether `actor` may see `project` in list and act contexts.
///
/// Visible to the creator, any project head, any member, and the single
/// assignee.
pub fn can_view_project(actor: &Actor, project: &Project) -> bool {
    if actor.is_admin() {
        return true;
    }
    project.created_by == actor.id
        || project.is_head(&actor.id)
        || project.is_member(&actor.id)
        || project.assignee.as_deref() == Some(actor.id.as_str())
}

/// Whether `actor` may read `project` as a single record.
///
/// Single-record reads also honor the coarser department channel: an actor
/// in the project's department may read it without holding any direct
/// relationship.
pub fn can_read_project_record(actor: &Actor, project: &Project) -> bool {
    if can_view_project(actor, project) {
        return true;
    }
    match (&actor.department, &project.department) {
        (Some(a), Some(p)) => a == p,
        _ => false,
    }
}

/// Whether `actor` may see `task`.
///
/// Union of project transitivity and direct relationship: a task is
/// visible when its parent project is, but also when the actor is the
/// assigned developer or the task's creator even if the project is not.
pub fn can_view_task(actor: &Actor, task: &Task, project: Option<&Project>) -> bool {
    if actor.is_admin() {
        return true;
    }
    if task.assigned_developer.as_deref() == Some(actor.id.as_str())
        || task.created_by == actor.id
    {
        return true;
    }
    project.map(|p| can_view_project(actor, p)).unwrap_or(false)
}

/// Whether `actor` may see `ticket`.
///
/// Follows the parent task's rule, plus the requester always sees their
/// own ticket.
pub fn can_view_ticket(
    actor: &Actor,
    ticket: &Ticket,
    task: Option<&Task>,
    project: Option<&Project>,
) -> bool {
    if actor.is_admin() {
        return true;
    }
    if ticket.requested_by == actor.id {
        return true;
    }
    task.map(|t| can_view_task(actor, t, project)).unwrap_or(false)
}
