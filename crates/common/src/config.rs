use serde::{Deserialize, Serialize};

/// Analyzer configuration shared across planner layers.
///
/// The analyzer itself is stateless; this struct is the only knob surface it
/// consumes. Sessions construct one per engine instance and hand the same
/// value to every analyzer invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Whether column/table/function name comparisons are case sensitive.
    ///
    /// When false (the default), names are compared with ASCII
    /// case-insensitive equality throughout resolution.
    #[serde(default)]
    pub case_sensitive_analysis: bool,

    /// Iteration cap for fixed-point rule batches.
    ///
    /// Reaching the cap is an internal error: it means a rule keeps changing
    /// the plan without converging.
    #[serde(default = "default_max_rule_iterations")]
    pub max_rule_iterations: usize,
}

fn default_max_rule_iterations() -> usize {
    100
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            case_sensitive_analysis: false,
            max_rule_iterations: default_max_rule_iterations(),
        }
    }
}
