use serde::{Deserialize, Serialize};

/// Maximum age of `READY` machines built from templates of one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiryRule {
    pub group: String,
    pub max_age_hours: u32,
}

/// Outcome of one expiry sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExpiryReport {
    /// Machines found past their group's limit.
    pub expired: Vec<String>,
    /// Of those, the ones a destroy was dispatched for.
    pub destroyed: Vec<String>,
}
