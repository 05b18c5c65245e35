pub mod config;
pub mod error;
pub mod record;
pub mod storage;

pub use config::{ConfigValues, ParamValue};
pub use error::{ErrorKind, StorageError};
pub use record::{Message, WireError};
pub use storage::{SegmentId, SegmentStorage, StorageContext, StorageFactory};
