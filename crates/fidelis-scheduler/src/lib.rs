pub mod queue;
pub mod scheduler;
pub mod worker;

pub use queue::*;
pub use scheduler::*;
pub use worker::*;
