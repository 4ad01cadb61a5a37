// ABOUTME: Integration tests for orchestrated cascade deletes
// ABOUTME: Project and task deletion, orphan-free cleanup, slot reclamation

mod common;

use common::{admin, member, setup};
use pretty_assertions::assert_eq;
use worklane_tracker::{
    IssueType, ProjectCreateInput, TaskCreateInput, TicketCreateInput, TrackerError,
    TrackerStorage,
};

fn project_input(name: &str, heads: Vec<String>) -> ProjectCreateInput {
    ProjectCreateInput {
        name: name.to_string(),
        description: None,
        department: None,
        assignee: None,
        project_heads: heads,
        members: vec![],
    }
}

#[tokio::test]
async fn test_project_delete_cascades_tasks_and_tickets() {
    let ctx = setup().await;
    let owner = member(&ctx, "owner").await;
    let head = member(&ctx, "head").await;

    let project = ctx
        .manager
        .create_project(&owner, project_input("Doomed", vec![head.id.clone()]))
        .await
        .unwrap();

    let mut ticket_ids = Vec::new();
    let mut task_ids = Vec::new();
    for i in 0..2 {
        let task = ctx
            .manager
            .create_task(
                &owner,
                TaskCreateInput {
                    project_id: project.id.clone(),
                    title: format!("Task {}", i),
                    description: None,
                    assigned_developer: None,
                    max_tickets: None,
                },
            )
            .await
            .unwrap();
        let ticket = ctx
            .manager
            .create_ticket(
                &owner,
                TicketCreateInput {
                    task_id: task.id.clone(),
                    title: format!("Bug {}", i),
                    description: None,
                    issue_type: IssueType::Bug,
                },
            )
            .await
            .unwrap();
        task_ids.push(task.id);
        ticket_ids.push(ticket.id);
    }

    let outcome = ctx.manager.delete_project(&owner, &project.id).await.unwrap();
    assert_eq!(outcome.tasks_deleted, 2);
    assert_eq!(outcome.tickets_deleted, 2);

    // Nothing under the project survives
    for task_id in &task_ids {
        let gone = ctx.manager.get_task(&owner, task_id).await;
        assert!(matches!(gone, Err(TrackerError::NotFound(_))));
    }
    for ticket_id in &ticket_ids {
        let gone = ctx.manager.get_ticket(&owner, ticket_id).await;
        assert!(matches!(gone, Err(TrackerError::NotFound(_))));
    }
}

#[tokio::test]
async fn test_only_creator_or_admin_may_delete_project() {
    let ctx = setup().await;
    let owner = member(&ctx, "owner").await;
    let head = member(&ctx, "head").await;
    let root = admin(&ctx, "root").await;

    let project = ctx
        .manager
        .create_project(&owner, project_input("Guarded", vec![head.id.clone()]))
        .await
        .unwrap();

    // Even a project head is not enough
    let denied = ctx.manager.delete_project(&head, &project.id).await;
    assert!(matches!(denied, Err(TrackerError::Forbidden(_))));

    ctx.manager.delete_project(&root, &project.id).await.unwrap();

    let gone = ctx.manager.get_project(&root, &project.id).await;
    assert!(matches!(gone, Err(TrackerError::NotFound(_))));
}

#[tokio::test]
async fn test_task_delete_releases_change_request_slots() {
    let ctx = setup().await;
    let owner = member(&ctx, "owner").await;
    let head = member(&ctx, "head").await;

    let project = ctx
        .manager
        .create_project(&owner, project_input("Reclaim", vec![head.id.clone()]))
        .await
        .unwrap();
    let first_task = ctx
        .manager
        .create_task(
            &owner,
            TaskCreateInput {
                project_id: project.id.clone(),
                title: "Holder".to_string(),
                description: None,
                assigned_developer: None,
                max_tickets: None,
            },
        )
        .await
        .unwrap();
    let second_task = ctx
        .manager
        .create_task(
            &owner,
            TaskCreateInput {
                project_id: project.id.clone(),
                title: "Survivor".to_string(),
                description: None,
                assigned_developer: None,
                max_tickets: None,
            },
        )
        .await
        .unwrap();

    for i in 0..2 {
        ctx.manager
            .create_ticket(
                &owner,
                TicketCreateInput {
                    task_id: first_task.id.clone(),
                    title: format!("CR {}", i),
                    description: None,
                    issue_type: IssueType::ChangeRequest,
                },
            )
            .await
            .unwrap();
    }

    let outcome = ctx.manager.delete_task(&owner, &first_task.id).await.unwrap();
    assert_eq!(outcome.tickets_deleted, 2);

    // Both slots are free again for the remaining task
    for i in 0..2 {
        ctx.manager
            .create_ticket(
                &owner,
                TicketCreateInput {
                    task_id: second_task.id.clone(),
                    title: format!("New CR {}", i),
                    description: None,
                    issue_type: IssueType::ChangeRequest,
                },
            )
            .await
            .unwrap();
    }
    assert_eq!(ctx.storage.count_change_requests(&project.id).await.unwrap(), 2);
}

#[tokio::test]
async fn test_delete_missing_project_is_not_found() {
    let ctx = setup().await;
    let root = admin(&ctx, "root").await;

    let result = ctx.manager.delete_project(&root, "zzzzzzzz").await;
    assert!(matches!(result, Err(TrackerError::NotFound(_))));
}
