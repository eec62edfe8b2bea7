//! Built-in plugins.

pub mod hashlib;
pub mod json;
pub mod progress;
pub mod workflow;

use std::sync::Arc;

use crate::service::Plugin;

/// Every plugin shipped with the worker binary.
pub fn builtin() -> Vec<Arc<dyn Plugin>> {
    vec![
        Arc::new(workflow::WorkflowPlugin),
        Arc::new(json::JsonPlugin),
        Arc::new(hashlib::HashlibPlugin),
        Arc::new(progress::ProgressPlugin),
    ]
}
