use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTolerance {
    Low,
    Medium,
    High,
}

impl Default for RiskTolerance {
    fn default() -> Self {
        Self::Medium
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasureDirection {
    Up,
    Down,
}

/// A goal's measurement block: a shell command whose stdout's *last*
/// numeric token is parsed, a target value, and the direction the value
/// should move to close the gap (§4.8 stage 6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Measure {
    pub cmd: String,
    pub target: f64,
    pub direction: MeasureDirection,
}

/// Named recipe parameterizing a scout invocation. Loaded from a built-in
/// table or from `.spin/formulas/<name>.yaml` via `spin_config`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Formula {
    pub name: String,
    pub version: Option<String>,
    pub description: Option<String>,
    pub scope: String,
    pub categories: Vec<String>,
    pub min_confidence: i64,
    pub max_prs: Option<u32>,
    pub max_time: Option<String>,
    pub custom_prompt: Option<String>,
    pub focus_areas: Vec<String>,
    pub exclude: Vec<String>,
    pub use_roadmap: bool,
    pub model: Option<String>,
    pub risk_tolerance: RiskTolerance,
    pub tags: Vec<String>,
    pub measure: Option<Measure>,
}

impl Formula {
    pub fn is_goal(&self) -> bool {
        self.measure.is_some()
    }
}
