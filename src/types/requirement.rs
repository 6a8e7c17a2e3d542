//! Requirement records submitted for answering

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a requirement row owned by the storage collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequirementId(pub u64);

impl fmt::Display for RequirementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One RFP question to answer
///
/// Immutable once handed to a batch; the pipeline only ever reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requirement {
    pub id: RequirementId,

    /// Functional category (e.g. "Reporting", "Tax")
    pub category: String,

    /// The requirement text itself
    pub text: String,

    /// Name of the RFP this requirement came from
    #[serde(default)]
    pub rfp_name: Option<String>,

    /// Who uploaded the requirement
    #[serde(default)]
    pub uploaded_by: Option<String>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Requirement {
    /// Create a requirement with no source identifiers
    pub fn new(id: u64, category: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: RequirementId(id),
            category: category.into(),
            text: text.into(),
            rfp_name: None,
            uploaded_by: None,
            created_at: Utc::now(),
        }
    }

    /// Attach the originating RFP name
    pub fn with_rfp(mut self, rfp_name: impl Into<String>) -> Self {
        self.rfp_name = Some(rfp_name.into());
        self
    }
}
