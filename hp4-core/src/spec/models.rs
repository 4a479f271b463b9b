use serde::{Deserialize, Serialize};

/// One external program in the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSpec {
    /// Stage name, unique within the pipeline. Used verbatim to build link
    /// names.
    pub name: String,
    /// Executable path or name (resolved against PATH before spawning).
    pub command: String,
    /// Arguments passed to the executable in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

/// An ordered description of the stages forming one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSpec {
    /// Optional display name for the pipeline.
    #[serde(default)]
    pub pipeline: Option<String>,
    /// Stages in pipeline order; stage i's output feeds stage i+1's input.
    pub stages: Vec<StageSpec>,
}

/// Derived name for the link between two adjacent stages.
pub fn link_name(upstream: &str, downstream: &str) -> String {
    format!("{upstream}-to-{downstream}")
}

impl PipelineSpec {
    /// Names of the N-1 links connecting the N stages, in pipeline order.
    pub fn link_names(&self) -> Vec<String> {
        self.stages
            .windows(2)
            .map(|pair| link_name(&pair[0].name, &pair[1].name))
            .collect()
    }
}
