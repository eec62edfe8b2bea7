//! The `workflow` module: activities and child workflows from scripts.
//!
//! ```text
//! result = workflow.execute_activity("resize", image, task_list="gpu")
//! raw = workflow.execute_workflow("report", month, domain="finance", as_bytes=True)
//! ```
//!
//! Keyword options are applied left to right to a context derived for the
//! one call. Validation happens before the engine is asked for anything.

use std::any::Any;

use futures::future::LocalBoxFuture;

use crate::codec::Payload;
use crate::service::{self, Plugin, RunInfo};
use crate::star::attr::{self, Property};
use crate::star::{self, Args, Builtin, BuiltinDef, HasAttrs, Thread, Value};
use crate::workflow::{Ctx, Future, Workflow, WorkflowError, WorkflowInfo};

pub const PLUGIN_ID: &str = "workflow";

pub struct WorkflowPlugin;

impl Plugin for WorkflowPlugin {
    fn id(&self) -> &'static str {
        PLUGIN_ID
    }

    fn create(&self, run: &RunInfo) -> Value {
        Value::object(Module { info: run.info.clone() })
    }
}

#[derive(Debug)]
pub struct Module {
    info: WorkflowInfo,
}

static BUILTINS: &[BuiltinDef] = &[
    BuiltinDef::asynchronous("execute_activity", execute_activity),
    BuiltinDef::asynchronous("execute_workflow", execute_workflow),
];

static PROPERTIES: &[(&str, Property<Module>)] = &[
    ("execution_id", execution_id),
    ("execution_run_id", execution_run_id),
];

impl HasAttrs for Module {
    fn type_name(&self) -> &'static str {
        PLUGIN_ID
    }

    fn attr(&self, name: &str) -> star::Result<Option<Value>> {
        attr::try_attr(self, name, BUILTINS, PROPERTIES)
    }

    fn attr_names(&self) -> Vec<String> {
        attr::attr_names(BUILTINS, PROPERTIES)
    }

    fn repr(&self) -> String {
        PLUGIN_ID.to_string()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn execution_id(module: &Module) -> star::Result<Value> {
    Ok(Value::string(&module.info.execution.id))
}

fn execution_run_id(module: &Module) -> star::Result<Value> {
    Ok(Value::string(&module.info.execution.run_id))
}

/* ===================== Calls ===================== */

#[derive(Clone, Copy, PartialEq, Eq)]
enum Target {
    Activity,
    Workflow,
}

impl Target {
    fn builtin(self) -> &'static str {
        match self {
            Target::Activity => "execute_activity",
            Target::Workflow => "execute_workflow",
        }
    }
}

fn execute_activity<'a>(thread: &'a Thread, _b: &'a Builtin, args: Args) -> LocalBoxFuture<'a, star::Result<Value>> {
    Box::pin(execute(thread, Target::Activity, args))
}

fn execute_workflow<'a>(thread: &'a Thread, _b: &'a Builtin, args: Args) -> LocalBoxFuture<'a, star::Result<Value>> {
    Box::pin(execute(thread, Target::Workflow, args))
}

/// Log a rejected or failed call and hand it back to the script.
fn reject(workflow: &dyn Workflow, ctx: &Ctx, call: &str, err: WorkflowError) -> star::Error {
    if !workflow.is_replaying(ctx) {
        tracing::error!(reason = %err.reason(), call, error = %err, "builtin-error");
    }
    service::script_error(err)
}

fn option_str(call: &str, key: &str, value: &Value) -> Result<String, WorkflowError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| {
            WorkflowError::invalid_argument(format!(
                "{}: {} must be a string, got {}",
                call,
                key,
                value.type_name()
            ))
        })
}

fn option_bool(call: &str, key: &str, value: &Value) -> Result<bool, WorkflowError> {
    match value {
        Value::Bool(b) => Ok(*b),
        other => Err(WorkflowError::invalid_argument(format!(
            "{}: {} must be a bool, got {}",
            call,
            key,
            other.type_name()
        ))),
    }
}

struct Call {
    ctx: Ctx,
    name: String,
    payloads: Vec<Payload>,
    as_bytes: bool,
}

/// Validate the arguments and derive the per-call context.
fn prepare(workflow: &dyn Workflow, ctx: &Ctx, target: Target, args: Args) -> Result<Call, WorkflowError> {
    let builtin = target.builtin();
    let Args { positional, named } = args;
    let mut positional = positional.into_iter();
    let name = match positional.next() {
        Some(Value::String(name)) => name,
        Some(other) => {
            return Err(WorkflowError::invalid_argument(format!(
                "{}: first argument must be a string, got {}",
                builtin,
                other.type_name()
            )))
        }
        None => return Err(WorkflowError::invalid_argument(format!("{}: missing name", builtin))),
    };

    let mut ctx = ctx.clone();
    let mut as_bytes = false;
    for (key, value) in &named {
        match (key.as_str(), target) {
            ("task_list", Target::Activity) => {
                ctx = workflow.with_task_list(&ctx, &option_str(builtin, key, value)?);
            }
            ("task_list", Target::Workflow) => {
                ctx = workflow.with_workflow_task_list(&ctx, &option_str(builtin, key, value)?);
            }
            ("domain", Target::Workflow) => {
                ctx = workflow.with_workflow_domain(&ctx, &option_str(builtin, key, value)?);
            }
            ("as_bytes", _) => as_bytes = option_bool(builtin, key, value)?,
            ("headers", _) => {
                return Err(WorkflowError::unimplemented(format!("{}: headers", builtin)));
            }
            (other, _) => {
                return Err(WorkflowError::invalid_argument(format!("unsupported key: {}", other)));
            }
        }
    }

    let converter = workflow.data_converter();
    let payloads = positional
        .map(|arg| converter.encode(&name, &arg))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Call {
        ctx,
        name,
        payloads,
        as_bytes,
    })
}

async fn execute(thread: &Thread, target: Target, args: Args) -> star::Result<Value> {
    let ctx = service::context(thread)?;
    let workflow = service::workflow(thread)?;
    let builtin = target.builtin();

    let call = prepare(workflow.as_ref(), &ctx, target, args)
        .map_err(|e| reject(workflow.as_ref(), &ctx, builtin, e))?;
    let result = match target {
        Target::Activity => {
            let future = workflow.execute_activity(&call.ctx, &call.name, call.payloads);
            resolve(workflow.as_ref(), &call.ctx, future.as_ref(), &call.name, call.as_bytes).await
        }
        Target::Workflow => {
            let future = workflow.execute_child_workflow(&call.ctx, &call.name, call.payloads);
            resolve(workflow.as_ref(), &call.ctx, future.as_future(), &call.name, call.as_bytes).await
        }
    };
    result.map_err(|e| reject(workflow.as_ref(), &ctx, builtin, e))
}

async fn resolve(
    workflow: &dyn Workflow,
    ctx: &Ctx,
    future: &dyn Future,
    name: &str,
    as_bytes: bool,
) -> Result<Value, WorkflowError> {
    let payload = future.get(ctx).await?;
    let converter = workflow.data_converter();
    if as_bytes {
        Ok(Value::Bytes(converter.to_bytes(name, &payload)))
    } else {
        Ok(converter.decode::<Value>(name, &payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::WorkflowExecution;

    fn module() -> Module {
        Module {
            info: WorkflowInfo {
                execution: WorkflowExecution {
                    id: "wf-1".into(),
                    run_id: "run-1".into(),
                },
                workflow_type: "starflow.run".into(),
                domain: "default".into(),
                task_list: "tl".into(),
            },
        }
    }

    #[test]
    fn test_every_listed_name_resolves() {
        let module = module();
        let names = module.attr_names();
        assert_eq!(
            names,
            vec!["execute_activity", "execute_workflow", "execution_id", "execution_run_id"]
        );
        for name in names {
            assert!(module.attr(&name).unwrap().is_some(), "{name} did not resolve");
        }
    }

    #[test]
    fn test_properties_read_execution() {
        let module = module();
        assert_eq!(module.attr("execution_id").unwrap(), Some(Value::from("wf-1")));
        assert_eq!(module.attr("execution_run_id").unwrap(), Some(Value::from("run-1")));
        assert_eq!(module.attr("nope").unwrap(), None);
    }
}
