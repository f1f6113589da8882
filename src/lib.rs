#[macro_use]
extern crate log;

pub use error::{Error, Result};
pub use linked_queue::LinkedQueue;
pub use queue::{Queue, SyncQueue};
pub use run::Run;
pub use thread_pool::ThreadPool;

pub mod thread_pool;

mod error;
mod linked_queue;
mod queue;
mod run;
