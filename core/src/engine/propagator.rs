use super::context::Context;
use super::history::Headers;

/// Carries context values across workflow, activity and child boundaries.
///
/// `inject` runs when a workflow schedules an activity or starts a child;
/// `extract` runs when an execution starts, on the headers it was started
/// with.
pub trait ContextPropagator: Send + Sync {
    fn inject(&self, ctx: &Context, headers: &mut Headers);

    fn extract(&self, ctx: Context, headers: &Headers) -> Context;
}
