use crate::spec::models::PipelineSpec;

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;

/// Errors from loading or validating a pipeline specification
#[derive(Debug, Error)]
pub enum SpecError {
    #[error("failed to read pipeline spec: {0}")]
    Io(#[from] io::Error),

    #[error("invalid pipeline spec JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("pipeline spec has no stages")]
    Empty,

    #[error("stage at index {0} has an empty name")]
    EmptyName(usize),

    #[error("duplicate stage name '{0}'")]
    DuplicateStage(String),

    #[error("stage '{0}' has an empty command")]
    EmptyCommand(String),
}

pub struct SpecParser;

impl SpecParser {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<PipelineSpec, SpecError> {
        let content = fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    pub fn from_str(content: &str) -> Result<PipelineSpec, SpecError> {
        let spec: PipelineSpec = serde_json::from_str(content)?;
        validate(&spec)?;
        Ok(spec)
    }
}

/// Check the structural invariants the rest of the run relies on: at least
/// one stage, unique non-empty names, non-empty commands.
fn validate(spec: &PipelineSpec) -> Result<(), SpecError> {
    if spec.stages.is_empty() {
        return Err(SpecError::Empty);
    }

    let mut seen = HashSet::new();
    for (index, stage) in spec.stages.iter().enumerate() {
        if stage.name.is_empty() {
            return Err(SpecError::EmptyName(index));
        }
        if !seen.insert(stage.name.as_str()) {
            return Err(SpecError::DuplicateStage(stage.name.clone()));
        }
        if stage.command.is_empty() {
            return Err(SpecError::EmptyCommand(stage.name.clone()));
        }
    }
    Ok(())
}
