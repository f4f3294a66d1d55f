// Permission policy for tool decisions
//
// Decides, from the session's permission mode, whether a tool-permission
// request needs a human at all. Structured questions always do.

use super::model::PermissionMode;
use crate::decision::{DecisionKind, DecisionRequest};
use tracing::debug;

/// Tools that only modify files inside the project
const EDIT_TOOLS: &[&str] = &["Edit", "Write", "MultiEdit", "NotebookEdit"];

/// Tools that have side effects beyond reading
const MUTATING_TOOLS: &[&str] = &["Edit", "Write", "MultiEdit", "NotebookEdit", "Bash", "KillShell"];

/// Outcome of the policy check
#[derive(Debug, Clone, PartialEq)]
pub enum PermissionCheck {
    /// Answer the worker immediately with allow
    Allow,

    /// Route to the window's presenter
    AskUser,

    /// Answer the worker immediately with deny and this reason
    Deny(String),
}

pub fn check_request(mode: PermissionMode, request: &DecisionRequest) -> PermissionCheck {
    if request.kind == DecisionKind::StructuredQuestion {
        return PermissionCheck::AskUser;
    }

    let tool = request.tool_name.as_deref().unwrap_or_default();
    let check = match mode {
        PermissionMode::BypassAll => PermissionCheck::Allow,
        PermissionMode::AcceptEdits if EDIT_TOOLS.contains(&tool) => PermissionCheck::Allow,
        PermissionMode::Plan if MUTATING_TOOLS.contains(&tool) => {
            PermissionCheck::Deny(format!("{} is not available in plan mode", tool))
        }
        _ => PermissionCheck::AskUser,
    };

    debug!(tool = tool, mode = ?mode, check = ?check, "Permission policy");
    check
}
