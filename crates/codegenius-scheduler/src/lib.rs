mod batch;
mod scheduler;

pub use scheduler::InferenceScheduler;
