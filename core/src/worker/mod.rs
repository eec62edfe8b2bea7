//! Workers, registration and backends.

mod handler;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::workflow::{Metadata, Workflow, WorkflowExecution};

pub use handler::{ActivityFn, ActivityHandler, FromPayloads, Input, WorkflowFn, WorkflowHandler};

/* ===================== Errors ===================== */

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistrationError {
    #[error("{kind} \"{name}\" is already registered")]
    AlreadyRegistered { kind: &'static str, name: String },

    #[error("cannot derive a name for {type_name}; pass an explicit name")]
    Unnamed { type_name: String },
}

/// Invalid worker configuration. Fatal at startup.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid location {location:?}: {message}")]
    InvalidLocation { location: String, message: String },

    #[error("unsupported transport scheme {0:?}")]
    UnsupportedScheme(String),

    #[error("no in-process frontend named {0:?}")]
    UnknownMemoryFrontend(String),

    #[error("database connection: {0}")]
    Database(String),
}

/* ===================== Registration ===================== */

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterWorkflowOptions {
    pub name: Option<String>,
    /// Register under the function's last path segment.
    pub enable_short_name: bool,
    pub disable_already_registered_check: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterActivityOptions {
    pub name: Option<String>,
    pub enable_short_name: bool,
    pub disable_already_registered_check: bool,
}

impl RegisterWorkflowOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }
}

impl RegisterActivityOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }
}

/// Erased registration surface implemented by workers.
pub trait Registry {
    fn register_workflow_handler(
        &mut self,
        name: String,
        handler: WorkflowHandler,
        options: &RegisterWorkflowOptions,
    ) -> Result<(), RegistrationError>;

    fn register_activity_handler(
        &mut self,
        name: String,
        handler: ActivityHandler,
        options: &RegisterActivityOptions,
    ) -> Result<(), RegistrationError>;
}

/// Typed registration on top of [`Registry`].
pub trait RegistryExt: Registry {
    fn register_workflow<F, Args>(&mut self, f: F) -> Result<(), RegistrationError>
    where
        F: WorkflowFn<Args>,
    {
        self.register_workflow_with_options(f, RegisterWorkflowOptions::default())
    }

    fn register_workflow_with_options<F, Args>(
        &mut self,
        f: F,
        options: RegisterWorkflowOptions,
    ) -> Result<(), RegistrationError>
    where
        F: WorkflowFn<Args>,
    {
        let name = registration_name::<F>(options.name.as_deref(), options.enable_short_name)?;
        self.register_workflow_handler(name, f.into_handler(), &options)
    }

    fn register_activity<F, Args>(&mut self, f: F) -> Result<(), RegistrationError>
    where
        F: ActivityFn<Args>,
    {
        self.register_activity_with_options(f, RegisterActivityOptions::default())
    }

    fn register_activity_with_options<F, Args>(
        &mut self,
        f: F,
        options: RegisterActivityOptions,
    ) -> Result<(), RegistrationError>
    where
        F: ActivityFn<Args>,
    {
        let name = registration_name::<F>(options.name.as_deref(), options.enable_short_name)?;
        self.register_activity_handler(name, f.into_handler(), &options)
    }
}

impl<R: Registry + ?Sized> RegistryExt for R {}

/// The name a function registers under: the explicit name, else its path
/// (or last path segment with `short`). Closures have no usable path.
pub fn registration_name<F>(explicit: Option<&str>, short: bool) -> Result<String, RegistrationError> {
    if let Some(name) = explicit {
        return Ok(name.to_string());
    }
    let type_name = std::any::type_name::<F>();
    if type_name.contains("{{closure}}") || type_name.contains('<') {
        return Err(RegistrationError::Unnamed {
            type_name: type_name.to_string(),
        });
    }
    if short {
        Ok(type_name.rsplit("::").next().unwrap_or(type_name).to_string())
    } else {
        Ok(type_name.to_string())
    }
}

/// A name-keyed handler table rejecting duplicates unless asked not to.
#[derive(Clone)]
pub struct HandlerTable<H> {
    kind: &'static str,
    handlers: HashMap<String, H>,
}

impl<H: Clone> HandlerTable<H> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            handlers: HashMap::new(),
        }
    }

    pub fn insert(&mut self, name: String, handler: H, allow_replace: bool) -> Result<(), RegistrationError> {
        if !allow_replace && self.handlers.contains_key(&name) {
            return Err(RegistrationError::AlreadyRegistered { kind: self.kind, name });
        }
        tracing::debug!(kind = self.kind, %name, "registered");
        self.handlers.insert(name, handler);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<H> {
        self.handlers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}

/* ===================== Worker & backend ===================== */

#[async_trait]
pub trait Worker: Registry + Send {
    /// Begin polling in the background.
    async fn start(&mut self) -> anyhow::Result<()>;

    /// Start and block until `stop` is cancelled, then shut down.
    async fn run(&mut self, stop: CancellationToken) -> anyhow::Result<()>;

    async fn stop(&mut self);
}

/// Builds workers for a workflow engine.
pub trait Backend: Send + Sync {
    /// `location` is `scheme://host[:port][/path]`; an unsupported scheme is
    /// a [`ConfigError`].
    fn register_worker(&self, location: &str, domain: &str, task_list: &str) -> Result<Box<dyn Worker>, ConfigError>;

    fn workflow(&self) -> Arc<dyn Workflow>;
}

/* ===================== Activity context ===================== */

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityInfo {
    pub activity_type: String,
    pub activity_id: String,
    pub workflow_execution: WorkflowExecution,
    pub domain: String,
    pub task_list: String,
    /// Starts at 1.
    pub attempt: u32,
}

/// Passed as the first argument of every activity.
#[derive(Debug, Clone)]
pub struct ActivityContext {
    info: ActivityInfo,
    headers: Metadata,
    cancel: CancellationToken,
}

impl ActivityContext {
    pub fn new(info: ActivityInfo, headers: Metadata, cancel: CancellationToken) -> Self {
        Self { info, headers, cancel }
    }

    pub fn info(&self) -> &ActivityInfo {
        &self.info
    }

    /// Metadata propagated from the scheduling workflow.
    pub fn headers(&self) -> &Metadata {
        &self.headers
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{Ctx, WorkflowError};

    #[derive(Default)]
    struct Table {
        workflows: Vec<String>,
        activities: HandlerTable<ActivityHandler>,
    }

    impl Registry for Table {
        fn register_workflow_handler(
            &mut self,
            name: String,
            _handler: WorkflowHandler,
            _options: &RegisterWorkflowOptions,
        ) -> Result<(), RegistrationError> {
            self.workflows.push(name);
            Ok(())
        }

        fn register_activity_handler(
            &mut self,
            name: String,
            handler: ActivityHandler,
            options: &RegisterActivityOptions,
        ) -> Result<(), RegistrationError> {
            self.activities
                .insert(name, handler, options.disable_already_registered_check)
        }
    }

    impl Default for HandlerTable<ActivityHandler> {
        fn default() -> Self {
            HandlerTable::new("activity")
        }
    }

    async fn greet(_ctx: Ctx, name: String) -> Result<String, WorkflowError> {
        Ok(format!("hello {name}"))
    }

    async fn shout(_ctx: ActivityContext, text: String) -> Result<String, WorkflowError> {
        Ok(text.to_uppercase())
    }

    #[test]
    fn test_names_derive_from_function_path() {
        let mut table = Table::default();
        table.register_workflow(greet).unwrap();
        table
            .register_workflow_with_options(
                greet,
                RegisterWorkflowOptions {
                    enable_short_name: true,
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(table.workflows[0].ends_with("worker::tests::greet"));
        assert_eq!(table.workflows[1], "greet");
    }

    #[test]
    fn test_closures_need_explicit_names() {
        let mut table = Table::default();
        let err = table
            .register_activity(|_ctx: ActivityContext, x: i64| async move { Ok::<_, WorkflowError>(x) })
            .unwrap_err();
        assert!(matches!(err, RegistrationError::Unnamed { .. }));

        table
            .register_activity_with_options(
                |_ctx: ActivityContext, x: i64| async move { Ok::<_, WorkflowError>(x) },
                RegisterActivityOptions::named("identity"),
            )
            .unwrap();
        assert_eq!(table.activities.names(), vec!["identity"]);
    }

    #[test]
    fn test_duplicate_activity_is_rejected_unless_disabled() {
        let mut table = Table::default();
        table.register_activity_with_options(shout, RegisterActivityOptions::named("shout")).unwrap();

        let err = table
            .register_activity_with_options(shout, RegisterActivityOptions::named("shout"))
            .unwrap_err();
        assert_eq!(
            err,
            RegistrationError::AlreadyRegistered {
                kind: "activity",
                name: "shout".into()
            }
        );

        table
            .register_activity_with_options(
                shout,
                RegisterActivityOptions {
                    name: Some("shout".into()),
                    disable_already_registered_check: true,
                    ..Default::default()
                },
            )
            .unwrap();
    }

    #[tokio::test]
    async fn test_activity_handler_decodes_and_encodes() {
        let handler = ActivityFn::into_handler(shout);
        let converter = crate::codec::DataConverter::new();
        let input = Input {
            name: "shout".into(),
            payloads: vec![converter.encode("shout", &"hey").unwrap()],
            converter: converter.clone(),
        };
        let ctx = ActivityContext::new(
            ActivityInfo {
                activity_type: "shout".into(),
                activity_id: "0".into(),
                workflow_execution: WorkflowExecution {
                    id: "wf".into(),
                    run_id: "run".into(),
                },
                domain: "default".into(),
                task_list: "default".into(),
                attempt: 1,
            },
            Metadata::new(),
            CancellationToken::new(),
        );
        let payload = handler(ctx, input).await.unwrap();
        let out: String = converter.decode("shout", &payload).unwrap();
        assert_eq!(out, "HEY");
    }
}
