pub mod lifecycle;

pub use lifecycle::{LifecycleService, LogEntryInput, StatusUpdate};
