// ABOUTME: Pure aggregation of per-head approval records
// ABOUTME: Rejection dominates approval; unanimity is required to activate

use crate::types::{ApprovalStatus, HeadApproval};

/// Outcome of folding every head approval into one project-wide decision.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregateDecision {
    /// At least one head has not voted yet (or there are no records at all).
    Pending,
    /// Every head approved.
    Approved,
    /// At least one head rejected; carries the deciding vote's comment.
    Rejected { comment: Option<String> },
}

/// Folds head approvals into the project-wide decision.
///
/// A single rejection decides the whole project regardless of how many
/// other heads already approved (veto semantics, not majority vote). An
/// empty slice counts as pending: a project with uninitialized approvals
/// can never activate through the voting path.
pub fn aggregate_approvals(approvals: &[HeadApproval]) -> AggregateDecision {
    if let Some(veto) = approvals
        .iter()
        .find(|a| a.status == ApprovalStatus::Rejected)
    {
        return AggregateDecision::Rejected {
            comment: veto.comment.clone(),
        };
    }

    if !approvals.is_empty()
        && approvals
            .iter()
            .all(|a| a.status == ApprovalStatus::Approved)
    {
        AggregateDecision::Approved
    } else {
        AggregateDecision::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn entry(head: &str, status: ApprovalStatus) -> HeadApproval {
        HeadApproval {
            head: head.to_string(),
            status,
            decided_at: None,
            comment: None,
        }
    }

    #[rstest]
    #[case(vec![], AggregateDecision::Pending)]
    #[case(
        vec![entry("h1", ApprovalStatus::Pending)],
        AggregateDecision::Pending
    )]
    #[case(
        vec![entry("h1", ApprovalStatus::Approved), entry("h2", ApprovalStatus::Pending)],
        AggregateDecision::Pending
    )]
    #[case(
        vec![entry("h1", ApprovalStatus::Approved), entry("h2", ApprovalStatus::Approved)],
        AggregateDecision::Approved
    )]
    #[case(
        vec![entry("h1", ApprovalStatus::Approved), entry("h2", ApprovalStatus::Rejected)],
        AggregateDecision::Rejected { comment: None }
    )]
    #[case(
        vec![entry("h1", ApprovalStatus::Rejected), entry("h2", ApprovalStatus::Pending)],
        AggregateDecision::Rejected { comment: None }
    )]
    fn test_aggregate_approvals(
        #[case] approvals: Vec<HeadApproval>,
        #[case] expected: AggregateDecision,
    ) {
        assert_eq!(aggregate_approvals(&approvals), expected);
    }

    #[test]
    fn test_rejection_carries_deciding_comment() {
        let approvals = vec![
            entry("h1", ApprovalStatus::Approved),
            HeadApproval {
                head: "h2".to_string(),
                status: ApprovalStatus::Rejected,
                decided_at: None,
                comment: Some("scope is too large".to_string()),
            },
        ];

        assert_eq!(
            aggregate_approvals(&approvals),
            AggregateDecision::Rejected {
                comment: Some("scope is too large".to_string())
            }
        );
    }

    #[test]
    fn test_first_rejection_wins_when_several_rejected() {
        let approvals = vec![
            HeadApproval {
                head: "h1".to_string(),
                status: ApprovalStatus::Rejected,
                decided_at: None,
                comment: Some("first".to_string()),
            },
            HeadApproval {
                head: "h2".to_string(),
                status: ApprovalStatus::Rejected,
                decided_at: None,
                comment: Some("second".to_string()),
            },
        ];

        assert_eq!(
            aggregate_approvals(&approvals),
            AggregateDecision::Rejected {
                comment: Some("first".to_string())
            }
        );
    }
}
