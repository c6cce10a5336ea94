use serde::{Deserialize, Serialize};

/// A transient scout output, not yet a `Ticket`. Field names mirror the
/// scout's JSON schema verbatim (snake_case) since this struct is what
/// `serde_json` deserializes the scout subprocess's stdout into.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Proposal {
    pub category: String,
    pub title: String,
    pub description: String,
    pub files: Vec<String>,
    pub allowed_paths: Vec<String>,
    /// 0-100. `<= 0` is treated as an adversarial-review kill (§4.2 stage 3).
    pub confidence: i64,
    #[serde(default)]
    pub impact_score: Option<f64>,
    pub verification_commands: Vec<String>,
    pub acceptance_criteria: Vec<String>,
    pub rationale: String,
    pub estimated_complexity: String,
    #[serde(default)]
    pub target_symbols: Option<Vec<String>>,
}

impl Proposal {
    /// Required-field presence check for §4.2 stage 2 (schema validation).
    /// `serde`'s `Deserialize` already enforces most of this at parse
    /// time since the fields above are non-`Option`; this only re-checks
    /// the ones that can be syntactically present but semantically empty.
    pub fn passes_schema_validation(&self) -> bool {
        !self.category.trim().is_empty()
            && !self.title.trim().is_empty()
            && !self.description.trim().is_empty()
            && !self.allowed_paths.is_empty()
            && !self.files.is_empty()
            && !self.verification_commands.is_empty()
            && !self.acceptance_criteria.is_empty()
            && !self.rationale.trim().is_empty()
            && !self.estimated_complexity.trim().is_empty()
    }

    pub fn rank_score(&self) -> f64 {
        let impact = self.impact_score.unwrap_or(0.0);
        0.7 * (self.confidence as f64 / 100.0) + 0.3 * (impact / 10.0)
    }
}
