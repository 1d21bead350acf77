// Deploy pipeline: queueing, batching, squashing, execution

mod batcher;
mod queue;
mod runner;

pub use batcher::DeployBatcher;
pub use queue::{DeployQueue, QueueOptions};
pub use runner::{CommandOutput, DeployRunner, ShellRunner, Tool};
