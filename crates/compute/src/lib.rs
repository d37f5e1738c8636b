pub mod calculator;
pub mod dependency;
pub mod error;
pub mod events;
pub mod worker;

pub use calculator::{CalculatedRecord, Calculator, PassthroughCalculator};
pub use dependency::{DependencyGraph, DependencyResolver, FieldDependency};
pub use error::CalcError;
pub use events::{CalculationEvent, ChannelEventSink, EventSink, LogEventSink};
pub use tabla_core::{RetryStrategy, WorkerConfig};
pub use worker::{CalculationWorker, WorkerStats};
