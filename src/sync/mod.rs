//! Lock-free and low-level synchronization primitives shared by the stack.

pub mod queue;
pub mod semaphore;
pub mod table;

pub use queue::BdQueue;
pub use semaphore::Semaphore;
pub use table::{Insert, InsertPolicy, LockFreeTable};
