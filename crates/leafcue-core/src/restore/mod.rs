/// Extent reconstruction: engine, output sinks and run reports
pub mod engine;
pub mod materialize;
pub mod report;

pub use engine::{
    Classified, ErrorPolicy, ExtentRestorer, PlanSource, ReadLength, RecordOutcome, RestoreEvent,
    RestoreOptions, WritePlan,
};

pub use materialize::{DirectoryMaterializer, Materializer, MemoryMaterializer, MemoryTree};

pub use report::{FileWrite, RecordFailure, RestoreReport};
