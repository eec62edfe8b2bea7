use std::sync::Arc;

use futures::future::LocalBoxFuture;
use maplit::btreemap;
use serde_json::Value as Json;

use super::*;
use crate::plugin::{hashlib::HashlibPlugin, json::JsonPlugin, progress::ProgressPlugin, workflow::WorkflowPlugin};
use crate::service::{self, Plugin, RunInfo};
use crate::star::attr::{self, Property};
use crate::star::{self as script, Args, Builtin, BuiltinDef, HasAttrs, Thread};
use crate::worker::{ActivityContext, RegisterActivityOptions, RegisterWorkflowOptions, Registry, RegistryExt};
use crate::workflow::{get_as, Ctx, INVALID_ARGUMENT, UNIMPLEMENTED};

/* ===================== Test plugin ===================== */

struct TestPlugin;

impl Plugin for TestPlugin {
    fn id(&self) -> &'static str {
        "testplugin"
    }

    fn create(&self, _run: &RunInfo) -> Value {
        Value::object(TestModule)
    }

    fn register(&self, registry: &mut dyn Registry) -> Result<(), RegistrationError> {
        registry.register_activity_with_options(stringify_activity, RegisterActivityOptions::named("stringify_activity"))?;
        registry.register_activity_with_options(current_task_list, RegisterActivityOptions::named("current_task_list"))?;
        registry.register_workflow_with_options(echo_workflow, RegisterWorkflowOptions::named("echo_workflow"))
    }
}

async fn current_task_list(ctx: ActivityContext) -> Result<String, WorkflowError> {
    Ok(ctx.info().task_list.clone())
}

async fn echo_workflow(_ctx: Ctx, value: Json) -> Result<Json, WorkflowError> {
    Ok(value)
}

async fn stringify_activity(ctx: ActivityContext, args: Json) -> Result<String, WorkflowError> {
    let args: Value = serde_json::from_value(args).map_err(|e| WorkflowError::Codec(e.to_string()))?;
    tracing::info!(attempt = ctx.info().attempt, args = %args.repr(), "stringify_activity");
    Ok(args.repr())
}

#[derive(Debug)]
struct TestModule;

static BUILTINS: &[BuiltinDef] = &[BuiltinDef::asynchronous("stringify", stringify)];

static PROPERTIES: &[(&str, Property<TestModule>)] = &[];

impl HasAttrs for TestModule {
    fn type_name(&self) -> &'static str {
        "testplugin"
    }

    fn attr(&self, name: &str) -> script::Result<Option<Value>> {
        attr::try_attr(self, name, BUILTINS, PROPERTIES)
    }

    fn attr_names(&self) -> Vec<String> {
        attr::attr_names(BUILTINS, PROPERTIES)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Runs `stringify_activity` on the call's arguments as one tuple.
fn stringify<'a>(thread: &'a Thread, _b: &'a Builtin, args: Args) -> LocalBoxFuture<'a, script::Result<Value>> {
    Box::pin(async move {
        let ctx = service::context(thread)?;
        let workflow = service::workflow(thread)?;
        let converter = workflow.data_converter();
        let input = converter
            .encode("stringify_activity", &Value::tuple(args.positional))
            .map_err(|e| service::script_error(e.into()))?;
        let future = workflow.execute_activity(&ctx, "stringify_activity", vec![input]);
        let out: String = get_as(future.as_ref(), &ctx, converter, "stringify_activity")
            .await
            .map_err(service::script_error)?;
        Ok(Value::String(out))
    })
}

/* ===================== Helpers ===================== */

fn env(plugins: Vec<Arc<dyn Plugin>>) -> TestEnvironment {
    TestEnvironment::new(TestEnvironmentParams {
        root_directory: PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/testdata")),
        plugins,
    })
    .unwrap()
}

fn full_env() -> TestEnvironment {
    env(vec![
        Arc::new(WorkflowPlugin),
        Arc::new(JsonPlugin),
        Arc::new(HashlibPlugin),
        Arc::new(ProgressPlugin),
        Arc::new(TestPlugin),
    ])
}

fn workflow_failure(env: &TestEnvironment) -> WorkflowError {
    match env.get_result::<Value>() {
        Err(TestError::Workflow(err)) => err,
        other => panic!("expected workflow failure, got {:?}", other),
    }
}

/* ===================== Scenarios ===================== */

#[test]
fn test_plus() {
    let mut env = env(vec![Arc::new(TestPlugin)]);
    env.execute_function("/app.star", "plus", vec![Value::Int(2), Value::Int(3)], vec![]);
    assert_eq!(env.get_result::<i64>().unwrap(), 5);
    env.assert_expectations();
}

#[test]
fn test_plugin_function() {
    let mut env = env(vec![Arc::new(TestPlugin)]);
    env.execute_function("/app.star", "stringify", vec![Value::from("foo"), Value::Int(100)], vec![]);
    assert_eq!(env.get_result::<String>().unwrap(), r#"("foo", 100)"#);
    assert_eq!(env.activity_calls("stringify_activity"), 1);
    env.assert_expectations();
}

#[test]
fn test_unsupported_option_never_calls_activity() {
    let mut env = full_env();
    env.on_activity("stringify_activity").never();
    env.execute_function("/app.star", "unsupported_option", vec![], vec![]);

    let err = workflow_failure(&env);
    assert_eq!(err.reason(), INVALID_ARGUMENT);
    assert_eq!(err.details().as_deref(), Some("unsupported key: foo"));
    assert_eq!(env.activity_calls("stringify_activity"), 0);
    env.assert_expectations();
}

#[test]
fn test_duplicate_plugin_ids_are_rejected() {
    let result = TestEnvironment::new(TestEnvironmentParams {
        root_directory: PathBuf::from("does-not-matter"),
        plugins: vec![Arc::new(TestPlugin), Arc::new(TestPlugin)],
    });
    match result {
        Err(TestError::Plugin(PluginError::DuplicateId(id))) => assert_eq!(id, "testplugin"),
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("duplicate plugins accepted"),
    }
}

/* ===================== Bridge ===================== */

#[test]
fn test_headers_option_is_unimplemented() {
    let mut env = full_env();
    env.execute_function("/app.star", "with_headers", vec![], vec![]);
    assert_eq!(workflow_failure(&env).reason(), UNIMPLEMENTED);
    assert_eq!(env.activity_calls("stringify_activity"), 0);
}

#[test]
fn test_headers_option_leaves_no_task_list_behind() {
    let mut env = full_env();
    env.execute_function("/app.star", "headers_then_default", vec![], vec![]);
    let result = env.get_result::<Value>().unwrap();
    assert_eq!(result, Value::tuple(vec![Value::from(UNIMPLEMENTED), Value::from(TASK_LIST)]));
    assert_eq!(env.activity_calls("current_task_list"), 1);
}

#[test]
fn test_task_list_option_applies_to_one_call() {
    let mut env = full_env();
    env.execute_function("/app.star", "task_lists", vec![], vec![]);
    let result = env.get_result::<Value>().unwrap();
    assert_eq!(result, Value::tuple(vec![Value::from("gpu"), Value::from(TASK_LIST)]));
    env.assert_expectations();
}

#[test]
fn test_as_bytes_returns_raw_payload() {
    let mut env = full_env();
    env.execute_function("/app.star", "task_list_bytes", vec![], vec![]);
    let result = env.get_result::<Value>().unwrap();
    assert_eq!(result, Value::Bytes(format!("\"{}\"", TASK_LIST).into_bytes()));
    assert_eq!(env.get_result::<Vec<u8>>().unwrap(), b"\"starflow-test\"".to_vec());
}

#[test]
fn test_execute_workflow_runs_child() {
    let mut env = full_env();
    env.execute_function("/app.star", "echo_child", vec![Value::Int(7)], vec![]);
    assert_eq!(env.get_result::<i64>().unwrap(), 7);
    env.assert_expectations();
}

#[test]
fn test_mocked_activity_on_another_task_list() {
    let mut env = full_env();
    env.on_activity("charge")
        .with_args(vec![Value::Int(100)])
        .returns(Value::from("r-1"))
        .once();
    env.execute_function("/app.star", "charge", vec![Value::Int(100)], vec![]);
    assert_eq!(env.get_result::<String>().unwrap(), "receipt: r-1");
    env.assert_expectations();
}

#[test]
fn test_activity_error_is_catchable() {
    let mut env = full_env();
    env.on_activity("charge")
        .returns_error(WorkflowError::custom("card-declined", None))
        .once();
    env.execute_function("/app.star", "charge_or_reason", vec![Value::Int(5)], vec![]);
    assert_eq!(env.get_result::<String>().unwrap(), "card-declined");
    env.assert_expectations();
}

#[test]
#[should_panic(expected = "unexpected call charge")]
fn test_unmatched_arguments_fail_expectations() {
    let mut env = full_env();
    env.on_activity("charge").with_args(vec![Value::Int(1)]).never();
    env.execute_function("/app.star", "charge", vec![Value::Int(2)], vec![]);
    assert!(env.get_result::<String>().is_err());
    env.assert_expectations();
}

#[test]
fn test_execution_properties() {
    let mut env = full_env();
    env.execute_function("/app.star", "ids", vec![], vec![]);
    let ids = env.get_result::<Value>().unwrap();
    let Value::Tuple(items) = ids else {
        panic!("expected tuple, got {ids:?}");
    };
    assert!(items[0].as_str().unwrap().starts_with("test-"));
    assert!(!items[1].as_str().unwrap().is_empty());
}

/* ===================== Harness ===================== */

#[test]
fn test_result_type_mismatch_is_a_decode_error() {
    let mut env = env(vec![]);
    env.execute_function("/app.star", "plus", vec![Value::Int(2), Value::Int(3)], vec![]);
    assert!(matches!(env.get_result::<String>(), Err(TestError::Decode(_))));
}

#[test]
fn test_result_before_execution() {
    let env = env(vec![]);
    assert_eq!(env.get_result::<i64>().unwrap_err(), TestError::NotExecuted);
}

#[test]
fn test_keyword_arguments_reach_the_function() {
    let mut env = env(vec![]);
    env.execute_function(
        "/app.star",
        "greet",
        vec![Value::from("ada")],
        vec![("greeting".into(), Value::from("hi"))],
    );
    assert_eq!(env.get_result::<String>().unwrap(), "hi, ada");
}

#[test]
fn test_missing_function() {
    let mut env = env(vec![]);
    env.execute_function("/app.star", "nope", vec![], vec![]);
    assert_eq!(workflow_failure(&env).reason(), INVALID_ARGUMENT);
}

#[test]
fn test_progress_query() {
    let mut env = full_env();
    env.set_environ(btreemap! { "STAGE".to_string() => "test".to_string() });
    env.execute_function("/app.star", "report_progress", vec![Value::Int(3)], vec![]);
    let current = env.get_result::<Value>().unwrap();
    assert_eq!(current.repr(), r#"{"done": 3, "total": 3}"#);
    assert_eq!(env.query("progress", vec![]).unwrap(), current);
}

#[test]
fn test_json_and_hashlib() {
    let mut env = full_env();
    let doc = script::from_json(serde_json::json!({"a": 1})).unwrap();
    env.execute_function("/app.star", "fingerprint", vec![doc], vec![]);
    assert_eq!(
        env.get_result::<String>().unwrap(),
        "015abd7f5cc57a2dd94b7590f04ad8084273905ee33ec5cebeae62276a97f862"
    );
}
