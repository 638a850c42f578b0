//! Request context passed to every database operation.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// Soft-deletion visibility for rows that carry a `deleted` flag.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ReadDeleted {
    /// Only live rows.
    #[default]
    No,
    /// Live and deleted rows.
    Yes,
    /// Only deleted rows.
    Only,
}

impl ReadDeleted {
    /// Whether a row with the given `deleted` flag is visible.
    pub fn allows(self, deleted: bool) -> bool {
        match self {
            Self::No => !deleted,
            Self::Yes => true,
            Self::Only => deleted,
        }
    }
}

/// Caller identity and query options for a single request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Correlation id for log lines.
    pub request_id: String,
    pub user_id: Option<String>,
    pub project_id: Option<String>,
    pub is_admin: bool,
    #[serde(default)]
    pub read_deleted: ReadDeleted,
}

impl RequestContext {
    /// Context for a regular project-scoped user.
    pub fn new(user_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            request_id: new_request_id(),
            user_id: Some(user_id.into()),
            project_id: Some(project_id.into()),
            is_admin: false,
            read_deleted: ReadDeleted::No,
        }
    }

    /// Unscoped admin context, used by maintenance tooling.
    pub fn admin() -> Self {
        Self {
            request_id: new_request_id(),
            user_id: None,
            project_id: None,
            is_admin: true,
            read_deleted: ReadDeleted::No,
        }
    }

    #[must_use]
    pub fn with_read_deleted(mut self, read_deleted: ReadDeleted) -> Self {
        self.read_deleted = read_deleted;
        self
    }

    /// Whether a row owned by `project_id` is visible to this context.
    ///
    /// Admins and contexts without a project see every row.
    pub fn can_see_project(&self, project_id: &str) -> bool {
        if self.is_admin {
            return true;
        }
        match self.project_id.as_deref() {
            Some(own) => own == project_id,
            None => true,
        }
    }
}

fn new_request_id() -> String {
    format!("req-{}", Uuid::new_v4())
}
