// ABOUTME: Integration tests for the minimal user store
// ABOUTME: Actor loading and structural validation of user input

mod common;

use common::{member, setup};
use pretty_assertions::assert_eq;
use worklane_tracker::{TrackerError, UserCreateInput, UserRole};

#[tokio::test]
async fn test_load_actor_round_trip() {
    let ctx = setup().await;
    let actor = member(&ctx, "dana").await;

    let loaded = ctx.manager.load_actor(&actor.id).await.unwrap();
    assert_eq!(loaded, actor);
    assert_eq!(loaded.role, UserRole::Member);
}

#[tokio::test]
async fn test_load_actor_missing_user_is_not_found() {
    let ctx = setup().await;

    let result = ctx.manager.load_actor("zzzzzzzz").await;
    assert!(matches!(result, Err(TrackerError::NotFound(_))));
}

#[tokio::test]
async fn test_create_user_rejects_bad_email() {
    let ctx = setup().await;

    let result = ctx
        .manager
        .create_user(UserCreateInput {
            name: "Dana".to_string(),
            email: "not-an-email".to_string(),
            role: None,
            department: None,
        })
        .await;

    match result {
        Err(TrackerError::Validation(errors)) => {
            assert!(errors.iter().any(|e| e.field == "email"));
        }
        other => panic!("Expected validation failure, got {:?}", other.map(|u| u.id)),
    }
}
