//! Actions
//!
//! Named units of intent processed through registered pipelines. The
//! [`Dispatcher`] owns the queue; [`Pipeline`]s describe what happens when an
//! action of a given type comes up.

mod dispatcher;
mod pipeline;

pub use dispatcher::Dispatcher;
pub use pipeline::{
    Action, ActionContext, Capability, Guard, Handler, Pipeline, PipelineOptions, Transform,
};
