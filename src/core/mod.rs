//! 核心编排层：请求上下文、步骤与调度、错误与恢复、过程事件、主控编排器

pub mod context;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod recovery;
pub mod step;

pub use context::{Plan, RequestContext, RunRequest, RunResponse};
pub use dispatcher::{DispatchOutcome, Dispatcher, GuardTrip, StepRunner};
pub use error::{AgentError, FaultKind, RecoveryAction};
pub use events::{AgentEvent, EventSink, ProgressEvent};
pub use orchestrator::{interpret_answer, ConfirmAnswer, Orchestrator, OrchestratorBuilder};
pub use recovery::RecoveryEngine;
pub use step::{Step, StepResult};
