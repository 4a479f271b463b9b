// Pipeline Specification Module
// Data model and JSON loader for the ordered stage list

pub mod models;
pub mod parser;

pub use models::{link_name, PipelineSpec, StageSpec};
pub use parser::{SpecError, SpecParser};
