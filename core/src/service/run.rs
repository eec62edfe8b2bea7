//! The `starflow.run` workflow: load a script bundle and call a function.

use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::{bind, workflow_error, PluginSet, RunInfo};
use crate::star::{self, Args, FileLoader, Key, Loader, Thread, Value};
use crate::workflow::{Ctx, Workflow, WorkflowError};

/// Input of the script workflow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunRequest {
    /// Bundle files keyed by path, e.g. `/app.star`.
    pub files: BTreeMap<String, String>,
    pub path: String,
    pub function: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Vec<(String, Value)>,
    #[serde(default)]
    pub environ: BTreeMap<String, String>,
}

pub(super) async fn run(
    plugins: Arc<PluginSet>,
    workflow: Arc<dyn Workflow>,
    ctx: Ctx,
    request: RunRequest,
) -> Result<Value, WorkflowError> {
    let info = workflow.info(&ctx);
    let environ = request
        .environ
        .into_iter()
        .map(|(k, v)| (Key::String(k), Value::String(v)))
        .collect::<IndexMap<_, _>>();
    let run_info = RunInfo {
        info: info.clone(),
        environ: Value::dict(environ),
        storage: Default::default(),
    };
    let predeclared = Rc::new(plugins.create(&run_info));
    let loader = Rc::new(FileLoader::new(request.files, predeclared));

    let print_ctx = ctx.clone();
    let print_workflow = workflow.clone();
    let thread = Thread::new(info.execution.id.clone())
        .with_loader(loader.clone())
        .with_print(move |thread, msg| {
            if !print_workflow.is_replaying(&print_ctx) {
                tracing::info!(thread = %thread.name(), "{}", msg);
            }
        });
    bind(&thread, ctx.clone(), workflow.clone(), run_info.storage.clone());

    if !workflow.is_replaying(&ctx) {
        tracing::debug!(
            workflow_id = %info.execution.id,
            path = %request.path,
            function = %request.function,
            "running script"
        );
    }

    let module = loader
        .load(&thread, &request.path)
        .await
        .map_err(|e| workflow_error(&e))?;
    let function = module.exported(&request.function).cloned().ok_or_else(|| {
        WorkflowError::invalid_argument(format!("{} has no function {:?}", request.path, request.function))
    })?;
    star::call(&thread, function, Args::with_named(request.args, request.kwargs))
        .await
        .map_err(|e| workflow_error(&e))
}
