pub mod completion;
pub mod context;
pub mod engine;
pub mod error;
pub mod invocation_result;
pub mod loader;
pub mod logs;
pub mod registry;
pub mod samples;

pub use completion::{CompletionSignal, Done};
pub use context::{ContextMetadata, ContextOptions, InvocationContext};
pub use engine::{run, Invocation, InvocationState};
pub use error::{HarnessError, HarnessResult, ProtocolViolation};
pub use invocation_result::InvocationResult;
pub use loader::{HandlerReference, InvocationParams, InvocationRequest};
pub use registry::{HandlerFuture, HandlerRegistry, HandlerShape, IntoHandlerShape};
