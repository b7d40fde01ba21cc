pub mod messages;
pub mod pool;
pub mod worker;

pub use messages::{HostMessage, WorkerMessage};
pub use pool::WorkerPoolManager;
pub use worker::StoreFactory;
