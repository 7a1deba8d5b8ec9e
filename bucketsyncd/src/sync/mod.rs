pub mod backoff;
pub mod conflict;
pub mod engine;
pub mod index;
pub mod local_fs;
pub mod notifier;
pub mod paths;
pub mod queue;
pub mod quiescence;
pub mod remote;
pub mod scheduler;
pub mod transfer;
