// ABOUTME: Integration tests for change-request admission control
// ABOUTME: Project-wide cap, slot release on delete, counter behavior, races

mod common;

use common::{member, setup, TestContext};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use worklane_tracker::{
    Actor, IssueType, ProjectCreateInput, SideEffects, SqliteStorage, StorageConfig,
    StorageProvider, Task, TaskCreateInput, TicketCreateInput, TrackerError, TrackerManager,
    TrackerStorage,
};

async fn project_with_tasks(ctx: &TestContext, owner: &Actor, task_count: usize) -> (String, Vec<Task>) {
    let head = member(ctx, "task-head").await;
    let project = ctx
        .manager
        .create_project(
            owner,
            ProjectCreateInput {
                name: "Capped project".to_string(),
                description: None,
                department: None,
                assignee: None,
                project_heads: vec![head.id],
                members: vec![],
            },
        )
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for i in 0..task_count {
        let task = ctx
            .manager
            .create_task(
                owner,
                TaskCreateInput {
                    project_id: project.id.clone(),
                    title: format!("Task {}", i + 1),
                    description: None,
                    assigned_developer: None,
                    max_tickets: None,
                },
            )
            .await
            .unwrap();
        tasks.push(task);
    }
    (project.id, tasks)
}

fn ticket_input(task_id: &str, title: &str, issue_type: IssueType) -> TicketCreateInput {
    TicketCreateInput {
        task_id: task_id.to_string(),
        title: title.to_string(),
        description: None,
        issue_type,
    }
}

#[tokio::test]
async fn test_change_request_cap_spans_whole_project() {
    let ctx = setup().await;
    let owner = member(&ctx, "owner").await;
    let (project_id, tasks) = project_with_tasks(&ctx, &owner, 2).await;

    // Two change requests on the first task exhaust the project's pool
    ctx.manager
        .create_ticket(&owner, ticket_input(&tasks[0].id, "CR one", IssueType::ChangeRequest))
        .await
        .unwrap();
    ctx.manager
        .create_ticket(&owner, ticket_input(&tasks[0].id, "CR two", IssueType::ChangeRequest))
        .await
        .unwrap();

    // A third on a different task is refused with the distinguished error
    let result = ctx
        .manager
        .create_ticket(&owner, ticket_input(&tasks[1].id, "CR three", IssueType::ChangeRequest))
        .await;

    match result {
        Err(e @ TrackerError::AdmissionLimitReached { .. }) => {
            assert_eq!(e.code(), "major_change_limit");
            if let TrackerError::AdmissionLimitReached { project_id: refused } = e {
                assert_eq!(refused, project_id);
            }
        }
        other => panic!("Expected limit error, got {:?}", other.map(|t| t.id)),
    }

    // Bug tickets stay uncapped
    let bug = ctx
        .manager
        .create_ticket(&owner, ticket_input(&tasks[1].id, "Bug", IssueType::Bug))
        .await
        .unwrap();
    assert_eq!(bug.issue_type, IssueType::Bug);

    assert_eq!(ctx.storage.count_change_requests(&project_id).await.unwrap(), 2);
}

#[tokio::test]
async fn test_deleting_change_request_releases_slot() {
    let ctx = setup().await;
    let owner = member(&ctx, "owner").await;
    let (_, tasks) = project_with_tasks(&ctx, &owner, 1).await;

    let first = ctx
        .manager
        .create_ticket(&owner, ticket_input(&tasks[0].id, "CR one", IssueType::ChangeRequest))
        .await
        .unwrap();
    ctx.manager
        .create_ticket(&owner, ticket_input(&tasks[0].id, "CR two", IssueType::ChangeRequest))
        .await
        .unwrap();

    let refused = ctx
        .manager
        .create_ticket(&owner, ticket_input(&tasks[0].id, "CR three", IssueType::ChangeRequest))
        .await;
    assert!(matches!(refused, Err(TrackerError::AdmissionLimitReached { .. })));

    ctx.manager.delete_ticket(&owner, &first.id).await.unwrap();

    // The freed slot admits a new change request
    ctx.manager
        .create_ticket(&owner, ticket_input(&tasks[0].id, "CR four", IssueType::ChangeRequest))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_tickets_used_tracks_creates_and_deletes() {
    let ctx = setup().await;
    let owner = member(&ctx, "owner").await;
    let (_, tasks) = project_with_tasks(&ctx, &owner, 1).await;

    let t1 = ctx
        .manager
        .create_ticket(&owner, ticket_input(&tasks[0].id, "Bug one", IssueType::Bug))
        .await
        .unwrap();
    ctx.manager
        .create_ticket(&owner, ticket_input(&tasks[0].id, "Bug two", IssueType::Bug))
        .await
        .unwrap();

    let task = ctx.manager.get_task(&owner, &tasks[0].id).await.unwrap();
    assert_eq!(task.tickets_used, 2);

    ctx.manager.delete_ticket(&owner, &t1.id).await.unwrap();
    let task = ctx.manager.get_task(&owner, &tasks[0].id).await.unwrap();
    assert_eq!(task.tickets_used, 1);
}

#[tokio::test]
async fn test_tickets_used_never_goes_negative() {
    let ctx = setup().await;
    let owner = member(&ctx, "owner").await;
    let (_, tasks) = project_with_tasks(&ctx, &owner, 1).await;

    let ticket = ctx
        .manager
        .create_ticket(&owner, ticket_input(&tasks[0].id, "Bug", IssueType::Bug))
        .await
        .unwrap();

    // Force the counter out of sync, as a racing decrement could
    sqlx::query("UPDATE tasks SET tickets_used = 0 WHERE id = ?")
        .bind(&tasks[0].id)
        .execute(ctx.storage.pool())
        .await
        .unwrap();

    ctx.manager.delete_ticket(&owner, &ticket.id).await.unwrap();

    let task = ctx.manager.get_task(&owner, &tasks[0].id).await.unwrap();
    assert_eq!(task.tickets_used, 0);
}

#[tokio::test]
async fn test_ticket_on_missing_task_is_not_found() {
    let ctx = setup().await;
    let owner = member(&ctx, "owner").await;

    let result = ctx
        .manager
        .create_ticket(&owner, ticket_input("zzzzzzzz", "Orphan", IssueType::Bug))
        .await;

    assert!(matches!(result, Err(TrackerError::NotFound(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_change_requests_never_exceed_cap() {
    // File-backed database so writers genuinely contend
    let temp_dir = tempfile::tempdir().unwrap();
    let config = StorageConfig {
        provider: StorageProvider::Sqlite {
            path: temp_dir.path().join("admission.db"),
        },
        enable_wal: true,
        max_connections: 5,
        busy_timeout_seconds: 10,
    };
    let storage = Arc::new(SqliteStorage::new(config).await.unwrap());
    storage.initialize().await.unwrap();
    let manager = Arc::new(TrackerManager::new(
        storage.clone() as Arc<dyn TrackerStorage>,
        SideEffects::logging(),
    ));

    let owner = {
        let user = manager
            .create_user(worklane_tracker::UserCreateInput {
                name: "owner".to_string(),
                email: "owner@example.com".to_string(),
                role: Some(worklane_tracker::UserRole::Member),
                department: None,
            })
            .await
            .unwrap();
        Actor::from(&user)
    };

    let project = manager
        .create_project(
            &owner,
            ProjectCreateInput {
                name: "Raced project".to_string(),
                description: None,
                department: None,
                assignee: None,
                project_heads: vec![owner.id.clone()],
                members: vec![],
            },
        )
        .await
        .unwrap();
    let task = manager
        .create_task(
            &owner,
            TaskCreateInput {
                project_id: project.id.clone(),
                title: "Raced task".to_string(),
                description: None,
                assigned_developer: None,
                max_tickets: None,
            },
        )
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..6 {
        let manager = manager.clone();
        let owner = owner.clone();
        let task_id = task.id.clone();
        handles.push(tokio::spawn(async move {
            manager
                .create_ticket(
                    &owner,
                    TicketCreateInput {
                        task_id,
                        title: format!("CR {}", i),
                        description: None,
                        issue_type: IssueType::ChangeRequest,
                    },
                )
                .await
        }));
    }

    let mut admitted: i64 = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => admitted += 1,
            Err(TrackerError::AdmissionLimitReached { .. }) => {}
            // Contention beyond the single internal retry surfaces as a
            // conflict; the invariant below is what matters
            Err(TrackerError::Conflict(_)) => {}
            Err(e) => panic!("Unexpected error: {}", e),
        }
    }

    assert!(admitted <= 2, "cap exceeded: {} admitted", admitted);
    let count = storage.count_change_requests(&project.id).await.unwrap();
    assert!(count <= 2, "cap exceeded in storage: {}", count);
    assert_eq!(count, admitted);
}
