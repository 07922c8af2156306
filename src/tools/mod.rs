//! 工具层：处理器调用契约、执行适配器与信念解析器

pub mod executor;
pub mod registry;
pub mod resolvers;

pub use executor::{prepare_params, resolve_route, unwrap_envelope, ToolExecutor, ToolOutcome};
pub use registry::{
    wrap_envelope, FnHandler, Handler, HandlerInvoker, HandlerRegistry, HandlerResponse, InvokeError,
};
pub use resolvers::BeliefResolvers;
