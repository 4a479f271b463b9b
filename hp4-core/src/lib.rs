// hp4 Core Library
// Pipeline process orchestration and byte-flow telemetry

pub mod error;
pub mod link;
pub mod run;
pub mod spec;
pub mod stage;
pub mod telemetry;

// Re-export commonly used types
pub use error::{RunError, RunResult};

// Re-export spec types
pub use spec::{link_name, PipelineSpec, SpecError, SpecParser, StageSpec};

// Re-export link types
pub use link::{relay, Link, LinkCounter};

// Re-export telemetry types
pub use telemetry::{Snapshot, TelemetryConfig, TelemetryEmitter, TelemetryHandle};

// Re-export run types
pub use run::{PipelineRun, RunOutcome, RunState, StageExit};

// Re-export stage types
pub use stage::{LinkConduit, StageManager, StageProcess};
