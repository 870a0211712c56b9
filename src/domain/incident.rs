use crate::domain::types::{IncidentType, Severity};
use serde::{Deserialize, Serialize};

/// Append-only audit entry. `model_id` is None for system-wide incidents;
/// `details` is an opaque JSON map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: i64,
    pub model_id: Option<i64>,
    pub incident_type: IncidentType,
    pub severity: Severity,
    pub message: String,
    pub details: serde_json::Value,
    pub resolved: bool,
    pub timestamp: i64,
}
