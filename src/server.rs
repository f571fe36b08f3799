//! Server-side collaborators shared by the add-image path and the
//! replicator: the injection registry (C3) and a small worker-task
//! logging facade.

pub mod injection_registry;
pub mod worker_task;

pub use injection_registry::InjectionRegistry;
pub use worker_task::WorkerTask;
