//! 执行层：上下文组装、函数调用循环、多步计划、运行事件与监督者

pub mod context;
pub mod events;
pub mod loop_;
pub mod planner;
pub mod supervisor;

pub use context::{AssembledContext, ContextAssembler, ContextLayer, LayerKind, RetryContext, NO_CONTEXT_FOUND};
pub use events::{EventSink, SupervisorEvent};
pub use loop_::{generate_config, LoopOutcome, LoopSession, LoopState, DEFAULT_MAX_TURNS};
pub use planner::{
    parse_plan, plan_schema, step_prompt, PlanDocument, PlanOutcome, PlanRunner, PlanStepSpec, StepStatus,
    WorkflowStep,
};
pub use supervisor::{RunHandle, RunRequest, Supervisor, SupervisorSettings};
