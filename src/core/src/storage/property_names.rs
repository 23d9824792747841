//! Translation between property names and backend identifiers.
//!
//! Each backend has its own fixed override table. Names without an override
//! pass through unchanged in both directions, so a backend never silently
//! drops a property it does not know about.

use crate::storage::types::property;

/// One entry of an override table.
#[derive(Debug, Clone, Copy)]
struct NameOverride {
    property: &'static str,
    backend: &'static str,
    /// Whether `backend` maps back to `property` when reading.
    reversible: bool,
}

const fn entry(property: &'static str, backend: &'static str) -> NameOverride {
    NameOverride {
        property,
        backend,
        reversible: true,
    }
}

const fn one_way(property: &'static str, backend: &'static str) -> NameOverride {
    NameOverride {
        property,
        backend,
        reversible: false,
    }
}

// `projectId` resolves to the `project` column, but that column reads back as `project`.
const DATABASE_OVERRIDES: &[NameOverride] = &[
    entry(property::EDITOR, "workbench"),
    one_way(property::PROJECT_ID, "project"),
];

const FILE_OVERRIDES: &[NameOverride] = &[
    entry(property::LAST_USED, "last-used"),
    entry(property::LAST_RESUMED, "last-resumed"),
    entry(property::SUSPEND_TIMESTAMP, "suspend-timestamp"),
    entry(property::SUSPEND_SIZE, "suspend-size"),
    entry(property::WORKING_DIR, "working-dir"),
    entry(property::ACTIVITY_STATE, "activity-state"),
    entry(property::LAUNCH_PARAMETERS, "launch-parameters"),
    entry(property::R_VERSION, "r-version"),
    entry(property::R_VERSION_LABEL, "r-version-label"),
    entry(property::R_VERSION_HOME, "r-version-home"),
    entry(property::SAVE_PROMPT_REQUIRED, "save-prompt-required"),
    entry(property::LAST_STATE_UPDATED, "last-state-updated"),
    entry(property::BLOCKING_SUSPEND, "blocking-suspend"),
    entry(property::PROJECT_ID, "project-id"),
];

/// Bidirectional name mapping for one backend.
#[derive(Debug, Clone, Copy)]
pub struct PropertyNameMapper {
    overrides: &'static [NameOverride],
}

impl PropertyNameMapper {
    /// Property name to database column name.
    pub const DATABASE: PropertyNameMapper = PropertyNameMapper {
        overrides: DATABASE_OVERRIDES,
    };

    /// Property name to file name inside a session's properties directory.
    pub const FILE: PropertyNameMapper = PropertyNameMapper {
        overrides: FILE_OVERRIDES,
    };

    pub fn to_backend<'a>(&self, property_name: &'a str) -> &'a str {
        self.overrides
            .iter()
            .find(|o| o.property == property_name)
            .map(|o| o.backend)
            .unwrap_or(property_name)
    }

    pub fn to_property<'a>(&self, backend_name: &'a str) -> &'a str {
        self.overrides
            .iter()
            .find(|o| o.reversible && o.backend == backend_name)
            .map(|o| o.property)
            .unwrap_or(backend_name)
    }
}
