pub mod deadline;
pub mod tracing;
