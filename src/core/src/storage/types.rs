use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Property name to value. Ordered so listings and wire payloads are deterministic.
pub type PropertyMap = BTreeMap<String, String>;

/// Well-known property names.
pub mod property {
    pub const EDITOR: &str = "editor";
    pub const PROJECT: &str = "project";
    pub const PROJECT_ID: &str = "projectId";
    pub const WORKING_DIR: &str = "working_directory";
    pub const CREATED: &str = "created";
    pub const LAST_USED: &str = "last_used";
    pub const LAST_RESUMED: &str = "last_resumed";
    pub const SUSPEND_TIMESTAMP: &str = "suspend_timestamp";
    pub const SUSPEND_SIZE: &str = "suspend_size";
    pub const USER_ID: &str = "user_id";
    pub const ACTIVITY_STATE: &str = "activity_state";
    pub const LABEL: &str = "label";
    pub const LAUNCH_PARAMETERS: &str = "launch_parameters";
    pub const R_VERSION: &str = "r_version";
    pub const R_VERSION_LABEL: &str = "r_version_label";
    pub const R_VERSION_HOME: &str = "r_version_home";
    pub const RUNNING: &str = "running";
    pub const EXECUTING: &str = "executing";
    pub const INITIAL: &str = "initial";
    pub const SAVE_PROMPT_REQUIRED: &str = "save_prompt_required";
    pub const LAST_STATE_UPDATED: &str = "last_state_updated";
    pub const BLOCKING_SUSPEND: &str = "blocking_suspend";
}

/// Editor value identifying the primary interactive-computing session kind.
/// An empty editor value is treated the same way.
pub const PRIMARY_EDITOR: &str = "RStudio";

/// The account that owns a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub username: String,
    pub user_id: i64,
}

impl SessionUser {
    pub fn new<S: Into<String>>(username: S, user_id: i64) -> Self {
        Self {
            username: username.into(),
            user_id,
        }
    }
}

/// Generate a fresh session id: the first 8 hex digits of a v4 UUID.
pub fn new_session_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}
