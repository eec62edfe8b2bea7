//! Plugins and the script-running workflow.
//!
//! A [`Plugin`] contributes one predeclared module to every script run and
//! may register engine-side functions (usually activities) on each worker.
//! The [`Service`] owns the plugin set and registers the workflow that
//! loads a script bundle and calls one of its functions.

mod run;

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::star::{self, Thread, Value};
use crate::worker::{RegisterWorkflowOptions, RegistrationError, Registry, RegistryExt};
use crate::workflow::{Ctx, Workflow, WorkflowError, WorkflowInfo};

pub use run::RunRequest;

/// Type name of the script-running workflow.
pub const RUN_WORKFLOW: &str = "starflow.run";

const CONTEXT_KEY: &str = "context";
const WORKFLOW_KEY: &str = "workflow";
const STORAGE_KEY: &str = "storage";

/* ===================== Plugins ===================== */

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PluginError {
    #[error("duplicate plugin id {0:?}")]
    DuplicateId(String),
}

/// Per-instance state shared by the plugin modules of one run.
pub type Storage = Rc<RefCell<IndexMap<String, Value>>>;

/// What a plugin learns about the run it creates a module for.
#[derive(Debug, Clone)]
pub struct RunInfo {
    pub info: WorkflowInfo,
    /// Dict of the environment the run was started with.
    pub environ: Value,
    pub storage: Storage,
}

pub trait Plugin: Send + Sync {
    /// Name of the predeclared module. Unique within a [`PluginSet`].
    fn id(&self) -> &'static str;

    /// Build the module for one run. Must not issue engine calls.
    fn create(&self, run: &RunInfo) -> Value;

    /// Register engine-side functions on a worker.
    fn register(&self, _registry: &mut dyn Registry) -> Result<(), RegistrationError> {
        Ok(())
    }
}

/// An ordered set of plugins with unique ids.
#[derive(Clone, Default)]
pub struct PluginSet {
    plugins: IndexMap<&'static str, Arc<dyn Plugin>>,
}

impl PluginSet {
    pub fn new(plugins: Vec<Arc<dyn Plugin>>) -> Result<Self, PluginError> {
        let mut set = IndexMap::new();
        for plugin in plugins {
            let id = plugin.id();
            if set.insert(id, plugin).is_some() {
                return Err(PluginError::DuplicateId(id.to_string()));
            }
        }
        Ok(Self { plugins: set })
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.plugins.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Plugin>> {
        self.plugins.values()
    }

    /// Run every plugin's registration against `registry`.
    pub fn register(&self, registry: &mut dyn Registry) -> Result<(), RegistrationError> {
        for plugin in self.iter() {
            plugin.register(registry)?;
        }
        Ok(())
    }

    /// The predeclared globals of one run.
    pub fn create(&self, run: &RunInfo) -> star::Predeclared {
        self.plugins
            .iter()
            .map(|(id, plugin)| (id.to_string(), plugin.create(run)))
            .collect()
    }
}

/* ===================== Service ===================== */

pub struct Service {
    plugins: Arc<PluginSet>,
    workflow: Arc<dyn Workflow>,
}

impl Service {
    pub fn new(plugins: PluginSet, workflow: Arc<dyn Workflow>) -> Self {
        Self {
            plugins: Arc::new(plugins),
            workflow,
        }
    }

    pub fn plugins(&self) -> &PluginSet {
        &self.plugins
    }

    /// Register the script workflow and every plugin's functions.
    pub fn register(&self, registry: &mut dyn Registry) -> Result<(), RegistrationError> {
        let plugins = self.plugins.clone();
        let workflow = self.workflow.clone();
        registry.register_workflow_with_options(
            move |ctx: Ctx, request: RunRequest| run::run(plugins.clone(), workflow.clone(), ctx, request),
            RegisterWorkflowOptions::named(RUN_WORKFLOW),
        )?;
        self.plugins.register(registry)
    }
}

/* ===================== Thread locals ===================== */

pub(crate) fn bind(thread: &Thread, ctx: Ctx, workflow: Arc<dyn Workflow>, storage: Storage) {
    thread.set_local(CONTEXT_KEY, ctx);
    thread.set_local(WORKFLOW_KEY, workflow);
    thread.set_local(STORAGE_KEY, storage);
}

/// The workflow context of the run executing on `thread`.
pub fn context(thread: &Thread) -> star::Result<Ctx> {
    thread
        .local::<Ctx>(CONTEXT_KEY)
        .ok_or_else(|| star::Error::value("not running inside a workflow"))
}

/// The workflow capability of the run executing on `thread`.
pub fn workflow(thread: &Thread) -> star::Result<Arc<dyn Workflow>> {
    thread
        .local::<Arc<dyn Workflow>>(WORKFLOW_KEY)
        .ok_or_else(|| star::Error::value("not running inside a workflow"))
}

/// The [`RunInfo::storage`] of the run executing on `thread`.
pub fn storage(thread: &Thread) -> star::Result<Storage> {
    thread
        .local::<Storage>(STORAGE_KEY)
        .ok_or_else(|| star::Error::value("not running inside a workflow"))
}

/* ===================== Errors ===================== */

/// Raise `err` into a script. The original error rides along as the
/// source, so an uncaught error converts back unchanged.
pub fn script_error(err: WorkflowError) -> star::Error {
    let reason = err.reason().to_string();
    let details = err.details();
    star::Error::native(err).with_reason(reason, details)
}

/// The workflow failure for an uncaught script error.
pub fn workflow_error(err: &star::Error) -> WorkflowError {
    if let Some(original) = err.downcast_source::<WorkflowError>() {
        return original.clone();
    }
    WorkflowError::custom(err.reason(), Some(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    impl Plugin for Named {
        fn id(&self) -> &'static str {
            self.0
        }

        fn create(&self, _run: &RunInfo) -> Value {
            Value::from(self.0)
        }
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let err = PluginSet::new(vec![Arc::new(Named("a")), Arc::new(Named("b")), Arc::new(Named("a"))])
            .err()
            .unwrap();
        assert_eq!(err, PluginError::DuplicateId("a".into()));
    }

    #[test]
    fn test_predeclared_follow_plugin_order() {
        let set = PluginSet::new(vec![Arc::new(Named("json")), Arc::new(Named("hashlib"))]).unwrap();
        assert_eq!(set.ids(), vec!["json", "hashlib"]);
    }

    #[test]
    fn test_errors_cross_the_script_boundary() {
        let original = WorkflowError::invalid_argument("unsupported key: foo");
        let raised = script_error(original.clone());
        assert_eq!(raised.reason(), "invalid-argument");
        assert_eq!(workflow_error(&raised), original);

        let failed = star::Error::fail("boom");
        assert_eq!(workflow_error(&failed).reason(), "Error");
    }
}
