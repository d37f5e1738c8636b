pub mod config;
pub mod error;
pub mod field;
pub mod memory;
pub mod record;
pub mod store;
pub mod task;

pub use config::{Config, QueueConfig, RetryStrategy, WorkerConfig};
pub use error::*;
pub use field::*;
pub use memory::{MemoryFieldStore, MemoryRecordStore};
pub use record::*;
pub use store::{FieldStore, RecordStore};
pub use task::{Priority, Task};
