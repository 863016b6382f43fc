pub mod dag;
pub mod executor;
pub mod job_tree;
pub mod step_executor;

pub use dag::WorkflowDag;
pub use executor::WorkflowExecutor;
pub use job_tree::{JobTree, JobTreeStatus};
pub use step_executor::{StepExecutor, StepResult};
