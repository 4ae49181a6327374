pub mod queue;
pub mod worker;

pub use queue::DeleteQueue;
pub use worker::DeleteWorker;
