//! Activity expectations.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::Value as Json;

use crate::backend::to_failure;
use crate::codec::{DataConverter, Payload};
use crate::engine::Failure;
use crate::star::Value;
use crate::workflow::WorkflowError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Times {
    AtLeastOnce,
    Exactly(usize),
}

#[derive(Debug, Clone)]
struct Expectation {
    activity: String,
    args: Option<Vec<Json>>,
    result: Result<Json, WorkflowError>,
    times: Times,
    calls: usize,
}

impl Expectation {
    fn matches(&self, activity: &str, args: &[Json]) -> bool {
        self.activity == activity && self.args.as_deref().map_or(true, |want| want == args)
    }

    fn exhausted(&self) -> bool {
        matches!(self.times, Times::Exactly(n) if self.calls >= n)
    }
}

/// Expectations and observed calls of one environment.
#[derive(Debug, Default)]
pub(super) struct MockState {
    expectations: Vec<Expectation>,
    calls: Vec<(String, Vec<Json>)>,
    failures: Vec<String>,
}

/// Wire form of a script value, as activity payloads carry it.
fn wire(value: &Value) -> Json {
    serde_json::to_value(value).unwrap_or(Json::Null)
}

impl MockState {
    pub(super) fn add(&mut self, activity: &str) -> usize {
        self.expectations.push(Expectation {
            activity: activity.to_string(),
            args: None,
            result: Ok(Json::Null),
            times: Times::AtLeastOnce,
            calls: 0,
        });
        self.expectations.len() - 1
    }

    fn is_mocked(&self, activity: &str) -> bool {
        self.expectations.iter().any(|e| e.activity == activity)
    }

    /// Record a call. Returns the canned result for mocked activities and
    /// `None` when the registered implementation should run.
    pub(super) fn call(
        &mut self,
        activity: &str,
        input: &[Payload],
        converter: &DataConverter,
    ) -> Option<Result<Payload, Failure>> {
        let args: Vec<Json> = input
            .iter()
            .map(|p| converter.decode::<Json>(activity, p).unwrap_or(Json::Null))
            .collect();
        self.calls.push((activity.to_string(), args.clone()));
        if !self.is_mocked(activity) {
            return None;
        }

        let candidate = self
            .expectations
            .iter_mut()
            .filter(|e| e.matches(activity, &args))
            .find(|e| !e.exhausted());
        if let Some(expectation) = candidate {
            expectation.calls += 1;
            let result = match expectation.result.clone() {
                Ok(json) => converter
                    .encode(activity, &json)
                    .map_err(|e| Failure::Generic(e.to_string())),
                Err(err) => Err(to_failure(err)),
            };
            return Some(result);
        }

        let message = if self.expectations.iter().any(|e| e.matches(activity, &args)) {
            format!("{} called more times than expected with {:?}", activity, args)
        } else {
            format!("unexpected call {}{:?}", activity, args)
        };
        tracing::warn!(%message, "mock mismatch");
        self.failures.push(message.clone());
        Some(Err(Failure::Generic(message)))
    }

    pub(super) fn calls(&self, activity: &str) -> usize {
        self.calls.iter().filter(|(name, _)| name == activity).count()
    }

    /// Mismatched calls followed by unmet counts.
    pub(super) fn problems(&self) -> Vec<String> {
        let mut problems = self.failures.clone();
        for e in &self.expectations {
            match e.times {
                Times::Exactly(n) if e.calls != n => problems.push(format!(
                    "expected {} to be called {} times, got {}",
                    e.activity, n, e.calls
                )),
                Times::AtLeastOnce if e.calls == 0 => {
                    problems.push(format!("expected {} to be called, it never was", e.activity))
                }
                _ => {}
            }
        }
        problems
    }
}

/// Builder returned by `TestEnvironment::on_activity`.
///
/// ```ignore
/// env.on_activity("charge").with_args(vec![Value::Int(100)]).returns(Value::from("ok")).once();
/// ```
pub struct ActivityMock {
    state: Rc<RefCell<MockState>>,
    index: usize,
}

impl ActivityMock {
    pub(super) fn new(state: Rc<RefCell<MockState>>, activity: &str) -> Self {
        let index = state.borrow_mut().add(activity);
        Self { state, index }
    }

    fn update(self, f: impl FnOnce(&mut Expectation)) -> Self {
        if let Some(e) = self.state.borrow_mut().expectations.get_mut(self.index) {
            f(e);
        }
        self
    }

    /// Only match calls with exactly these arguments.
    pub fn with_args(self, args: Vec<Value>) -> Self {
        let args = args.iter().map(wire).collect();
        self.update(|e| e.args = Some(args))
    }

    pub fn returns(self, value: Value) -> Self {
        let json = wire(&value);
        self.update(|e| e.result = Ok(json))
    }

    pub fn returns_error(self, err: WorkflowError) -> Self {
        self.update(|e| e.result = Err(err))
    }

    pub fn times(self, n: usize) -> Self {
        self.update(|e| e.times = Times::Exactly(n))
    }

    pub fn once(self) -> Self {
        self.times(1)
    }

    pub fn never(self) -> Self {
        self.times(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> Rc<RefCell<MockState>> {
        Rc::new(RefCell::new(MockState::default()))
    }

    #[test]
    fn test_matching_call_consumes_expectation() {
        let state = state();
        let converter = DataConverter::new();
        ActivityMock::new(state.clone(), "charge")
            .with_args(vec![Value::Int(100)])
            .returns(Value::from("ok"))
            .once();

        let input = vec![converter.encode("charge", &100).unwrap()];
        let result = state.borrow_mut().call("charge", &input, &converter).unwrap().unwrap();
        assert_eq!(converter.decode::<String>("charge", &result).unwrap(), "ok");
        assert!(state.borrow().problems().is_empty());

        let extra = state.borrow_mut().call("charge", &input, &converter).unwrap();
        assert!(extra.is_err());
        assert_eq!(state.borrow().problems().len(), 1);
        assert_eq!(state.borrow().calls("charge"), 2);
    }

    #[test]
    fn test_unmocked_activity_runs_for_real() {
        let state = state();
        let converter = DataConverter::new();
        assert!(state.borrow_mut().call("free", &[], &converter).is_none());
        assert_eq!(state.borrow().calls("free"), 1);
    }

    #[test]
    fn test_unmet_counts_are_reported() {
        let state = state();
        ActivityMock::new(state.clone(), "a").times(2);
        ActivityMock::new(state.clone(), "b");
        ActivityMock::new(state.clone(), "c").never();
        let problems = state.borrow().problems();
        assert_eq!(problems.len(), 2);
        assert!(problems[0].contains("a to be called 2 times"));
        assert!(problems[1].contains("b to be called"));
    }

    #[test]
    fn test_error_results_become_failures() {
        let state = state();
        let converter = DataConverter::new();
        ActivityMock::new(state.clone(), "charge").returns_error(WorkflowError::custom("declined", None));
        let result = state.borrow_mut().call("charge", &[], &converter).unwrap();
        assert_eq!(result.unwrap_err().reason(), "declined");
    }
}
