// Flowline engine: queue, runtime, orchestrator

pub mod config;
pub mod executors;
pub mod orchestrator;
pub mod queue;
pub mod runtime;

pub use config::EngineConfig;
pub use executors::{
    ExecutorRegistry, FailingExecutor, MockAgentExecutor, MockToolExecutor, NodeExecutor,
    PassthroughExecutor,
};
pub use orchestrator::{ExecutionTenantRegistry, Orchestrator};
pub use queue::{CompletionHandler, JobProcessor, JobQueue};
pub use runtime::NodeRuntime;
