pub mod behavior;
pub mod bounded;
pub mod context;
pub mod executor;

pub use behavior::{
    AuditBehavior, BehaviorChain, BehaviorChainBuilder, BehaviorFuture, CallBehavior, CallInfo,
    TranslationBehavior, ValidationBehavior,
};
pub use bounded::{AdmissionPolicy, AdmissionStats, BoundedExecutor};
pub use context::{CallContext, Session, StoreSession};
pub use executor::{Executor, ExecutorStats, TaskHandle};
