// ABOUTME: Structural validation of operation inputs
// ABOUTME: Shape and required-field checks that run before any domain logic

use crate::types::{
    ProjectCreateInput, ProjectUpdateInput, TaskCreateInput, TicketCreateInput, UserCreateInput,
};
use regex::Regex;
use std::sync::OnceLock;

/// Validation errors for operation inputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }
}

fn entity_id_regex() -> &'static Regex {
    static ENTITY_ID: OnceLock<Regex> = OnceLock::new();
    ENTITY_ID.get_or_init(|| Regex::new("^[0-9A-Za-z]{8}$").expect("valid entity id pattern"))
}

/// Whether `id` has the shape of a generated entity ID
pub fn is_well_formed_id(id: &str) -> bool {
    entity_id_regex().is_match(id)
}

fn check_id(errors: &mut Vec<ValidationError>, field: &str, id: &str) {
    if !is_well_formed_id(id) {
        errors.push(ValidationError::new(
            field,
            format!("Malformed id: {}", id),
        ));
    }
}

/// Validates project data for creation
pub fn validate_project_create(data: &ProjectCreateInput) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if data.name.trim().is_empty() {
        errors.push(ValidationError::new("name", "Project name is required"));
    }

    if data.project_heads.is_empty() {
        errors.push(ValidationError::new(
            "projectHeads",
            "At least one project head is required",
        ));
    }

    for head in &data.project_heads {
        check_id(&mut errors, "projectHeads", head);
    }

    for member in &data.members {
        check_id(&mut errors, "members", &member.user);
    }

    if let Some(ref assignee) = data.assignee {
        check_id(&mut errors, "assignee", assignee);
    }

    errors
}

/// Validates project update data
pub fn validate_project_update(data: &ProjectUpdateInput) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if let Some(ref name) = data.name {
        if name.trim().is_empty() {
            errors.push(ValidationError::new("name", "Project name cannot be empty"));
        }
    }

    if let Some(ref members) = data.members {
        for member in members {
            check_id(&mut errors, "members", &member.user);
        }
    }

    if let Some(ref assignee) = data.assignee {
        check_id(&mut errors, "assignee", assignee);
    }

    errors
}

/// Validates task data for creation
pub fn validate_task_create(data: &TaskCreateInput) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if data.title.trim().is_empty() {
        errors.push(ValidationError::new("title", "Task title is required"));
    }

    check_id(&mut errors, "projectId", &data.project_id);

    if let Some(ref developer) = data.assigned_developer {
        check_id(&mut errors, "assignedDeveloper", developer);
    }

    if let Some(max_tickets) = data.max_tickets {
        if max_tickets < 0 {
            errors.push(ValidationError::new(
                "maxTickets",
                "Ticket budget cannot be negative",
            ));
        }
    }

    errors
}

/// Validates ticket data for creation
pub fn validate_ticket_create(data: &TicketCreateInput) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if data.title.trim().is_empty() {
        errors.push(ValidationError::new("title", "Ticket title is required"));
    }

    check_id(&mut errors, "taskId", &data.task_id);

    errors
}

/// Validates user data for creation
pub fn validate_user_create(data: &UserCreateInput) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if data.name.trim().is_empty() {
        errors.push(ValidationError::new("name", "User name is required"));
    }

    if data.email.trim().is_empty() {
        errors.push(ValidationError::new("email", "Email is required"));
    } else if !data.email.contains('@') {
        errors.push(ValidationError::new("email", "Email is not valid"));
    }

    errors
}

/// Truncates a string to a maximum length with ellipsis
pub fn truncate(text: &str, max_length: usize) -> String {
    if text.len() <= max_length {
        text.to_string()
    } else {
        format!("{}...", &text[..max_length.saturating_sub(3)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IssueType, ProjectMember};
    use crate::utils::generate_entity_id;

    fn create_input(heads: Vec<String>) -> ProjectCreateInput {
        ProjectCreateInput {
            name: "Billing revamp".to_string(),
            description: None,
            department: None,
            assignee: None,
            project_heads: heads,
            members: vec![],
        }
    }

    #[test]
    fn test_validate_project_create_valid() {
        let mut input = create_input(vec![generate_entity_id(), generate_entity_id()]);
        input.members = vec![ProjectMember {
            user: generate_entity_id(),
            role: Default::default(),
        }];

        assert!(validate_project_create(&input).is_empty());
    }

    #[test]
    fn test_validate_project_create_requires_heads() {
        let input = create_input(vec![]);

        let errors = validate_project_create(&input);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "projectHeads");
    }

    #[test]
    fn test_validate_project_create_rejects_malformed_head_id() {
        let input = create_input(vec!["not-an-id".to_string()]);

        let errors = validate_project_create(&input);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "projectHeads");
    }

    #[test]
    fn test_validate_project_create_empty_name() {
        let mut input = create_input(vec![generate_entity_id()]);
        input.name = "  ".to_string();

        let errors = validate_project_create(&input);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "name");
    }

    #[test]
    fn test_validate_ticket_create() {
        let input = TicketCreateInput {
            task_id: generate_entity_id(),
            title: "Crash on empty form".to_string(),
            description: None,
            issue_type: IssueType::Bug,
        };
        assert!(validate_ticket_create(&input).is_empty());

        let bad = TicketCreateInput {
            task_id: "nope".to_string(),
            title: "".to_string(),
            description: None,
            issue_type: IssueType::ChangeRequest,
        };
        let errors = validate_ticket_create(&bad);
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_validate_user_create_email() {
        let input = UserCreateInput {
            name: "Dana".to_string(),
            email: "dana.example.com".to_string(),
            role: None,
            department: None,
        };

        let errors = validate_user_create(&input);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "email");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world", 8), "hello...");
        assert_eq!(truncate("hi", 5), "hi");
        assert_eq!(truncate("", 5), "");
    }
}
