//! Default implementations of the [crate::scheduler::Scheduler] interface.

pub mod tokio;
