//! The `progress` module: scripts report how far they got, clients ask
//! with the `progress` query.
//!
//! ```text
//! progress.report({"done": 3, "total": 10})
//! ```

use std::any::Any;
use std::rc::Rc;

use crate::codec::Payload;
use crate::service::{self, Plugin, RunInfo, Storage};
use crate::star::attr::{self, Property};
use crate::star::{self, Args, Builtin, BuiltinDef, HasAttrs, Thread, Value};
use crate::workflow::WorkflowError;

pub const PLUGIN_ID: &str = "progress";

/// Name of the query answering the last reported value.
pub const QUERY_NAME: &str = "progress";

const STORAGE_KEY: &str = "progress";

pub struct ProgressPlugin;

impl Plugin for ProgressPlugin {
    fn id(&self) -> &'static str {
        PLUGIN_ID
    }

    fn create(&self, run: &RunInfo) -> Value {
        Value::object(Module {
            storage: run.storage.clone(),
        })
    }
}

#[derive(Debug)]
pub struct Module {
    storage: Storage,
}

static BUILTINS: &[BuiltinDef] = &[BuiltinDef::sync("report", report)];

static PROPERTIES: &[(&str, Property<Module>)] = &[("current", current)];

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

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn current(module: &Module) -> star::Result<Value> {
    Ok(module.storage.borrow().get(STORAGE_KEY).cloned().unwrap_or(Value::None))
}

fn report(thread: &Thread, _b: &Builtin, args: Args) -> star::Result<Value> {
    args.expect("report", 1, 1)?;
    let storage = service::storage(thread)?;
    let first = storage
        .borrow_mut()
        .insert(STORAGE_KEY.to_string(), args.positional[0].clone())
        .is_none();
    if first {
        let ctx = service::context(thread)?;
        let workflow = service::workflow(thread)?;
        let converter = workflow.data_converter().clone();
        let handler = Rc::new(move |_args: &[Payload]| -> Result<Payload, WorkflowError> {
            let value = storage.borrow().get(STORAGE_KEY).cloned().unwrap_or(Value::None);
            Ok(converter.encode(QUERY_NAME, &value)?)
        });
        workflow
            .set_query_handler(&ctx, QUERY_NAME, handler)
            .map_err(service::script_error)?;
    }
    Ok(Value::None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use std::cell::RefCell;

    #[test]
    fn test_current_reads_shared_storage() {
        let storage: Storage = Rc::new(RefCell::new(IndexMap::new()));
        let module = Module {
            storage: storage.clone(),
        };
        assert_eq!(module.attr("current").unwrap(), Some(Value::None));

        storage.borrow_mut().insert(STORAGE_KEY.into(), Value::Int(7));
        assert_eq!(module.attr("current").unwrap(), Some(Value::Int(7)));
        assert_eq!(module.attr_names(), vec!["current", "report"]);
    }
}
