use std::sync::Arc;
use std::time::Instant;

use futures::future::{self, BoxFuture};
use log::{debug, warn};

use crate::core::work::{FailureKind, WorkFailure};
use crate::core::Principal;

/// Erased future produced by wrapping a unit of work
pub type BehaviorFuture<'a> = BoxFuture<'a, Result<(), WorkFailure>>;

/// Facts about the call being wrapped, shared by every behavior
#[derive(Debug, Clone)]
pub struct CallInfo {
    pub description: String,
    pub principal: Principal,
    pub nested: bool,
}

impl CallInfo {
    pub(crate) fn new(description: &str, principal: &Principal, nested: bool) -> Self {
        Self {
            description: description.to_string(),
            principal: principal.clone(),
            nested,
        }
    }
}

/// One cross-cutting layer around every privileged call
///
/// A behavior either returns `next` (possibly decorated) or a ready
/// failure to veto the call before the work body runs.
pub trait CallBehavior: Send + Sync {
    /// Name of the behavior for debugging
    fn name(&self) -> &'static str;

    fn wrap<'a>(&'a self, call: &'a CallInfo, next: BehaviorFuture<'a>) -> BehaviorFuture<'a>;
}

/// Ordered, statically composed list of behaviors
///
/// Registration order is wrapping order: the first registered behavior
/// is the outermost layer. The composition is fixed when the chain is
/// built, there is no runtime proxying involved.
#[derive(Clone)]
pub struct BehaviorChain {
    behaviors: Arc<Vec<Arc<dyn CallBehavior>>>,
}

impl BehaviorChain {
    pub fn builder() -> BehaviorChainBuilder {
        BehaviorChainBuilder {
            behaviors: Vec::new(),
        }
    }

    /// The default stack: translation around audit around validation
    pub fn standard() -> Self {
        Self::builder()
            .register(TranslationBehavior)
            .register(AuditBehavior)
            .register(ValidationBehavior)
            .build()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.behaviors.iter().map(|b| b.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.behaviors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.behaviors.is_empty()
    }

    pub(crate) fn apply<'a>(
        &'a self,
        call: &'a CallInfo,
        terminal: BehaviorFuture<'a>,
    ) -> BehaviorFuture<'a> {
        let mut wrapped = terminal;
        for behavior in self.behaviors.iter().rev() {
            wrapped = behavior.wrap(call, wrapped);
        }
        wrapped
    }
}

pub struct BehaviorChainBuilder {
    behaviors: Vec<Arc<dyn CallBehavior>>,
}

impl BehaviorChainBuilder {
    pub fn register(mut self, behavior: impl CallBehavior + 'static) -> Self {
        self.behaviors.push(Arc::new(behavior));
        self
    }

    pub fn build(self) -> BehaviorChain {
        BehaviorChain {
            behaviors: Arc::new(self.behaviors),
        }
    }
}

/// Vetoes calls with malformed descriptions or principals before the
/// work body runs
pub struct ValidationBehavior;

impl CallBehavior for ValidationBehavior {
    fn name(&self) -> &'static str {
        "validation"
    }

    fn wrap<'a>(&'a self, call: &'a CallInfo, next: BehaviorFuture<'a>) -> BehaviorFuture<'a> {
        if call.description.trim().is_empty() {
            return Box::pin(future::ready(Err(WorkFailure::fatal(
                "rejected by validation: work description is empty",
            ))));
        }

        if let Err(reason) = call.principal.validate() {
            return Box::pin(future::ready(Err(WorkFailure::fatal(format!(
                "rejected by validation: {reason}"
            )))));
        }

        next
    }
}

/// Logs begin and end of every call with its outcome and duration
pub struct AuditBehavior;

impl CallBehavior for AuditBehavior {
    fn name(&self) -> &'static str {
        "audit"
    }

    fn wrap<'a>(&'a self, call: &'a CallInfo, next: BehaviorFuture<'a>) -> BehaviorFuture<'a> {
        Box::pin(async move {
            let started = Instant::now();
            debug!(
                "call begin: {} (principal={}, nested={})",
                call.description, call.principal, call.nested
            );

            let result = next.await;

            let elapsed_ms = started.elapsed().as_millis();
            match &result {
                Ok(()) => debug!("call end: {} ({elapsed_ms}ms)", call.description),
                Err(failure) => warn!(
                    "call failed: {} after {elapsed_ms}ms: {failure}",
                    call.description
                ),
            }
            result
        })
    }
}

/// Appends the call description to recoverable failures so the
/// internal error handed to the caller names what was running
pub struct TranslationBehavior;

impl CallBehavior for TranslationBehavior {
    fn name(&self) -> &'static str {
        "translation"
    }

    fn wrap<'a>(&'a self, call: &'a CallInfo, next: BehaviorFuture<'a>) -> BehaviorFuture<'a> {
        Box::pin(async move {
            match next.await {
                Err(failure) if failure.kind() == FailureKind::Recoverable => {
                    Err(failure.with_context(&call.description))
                }
                other => other,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn call() -> CallInfo {
        CallInfo::new("test call", &Principal::new("alice"), false)
    }

    struct Recording {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl CallBehavior for Recording {
        fn name(&self) -> &'static str {
            self.label
        }

        fn wrap<'a>(&'a self, _call: &'a CallInfo, next: BehaviorFuture<'a>) -> BehaviorFuture<'a> {
            Box::pin(async move {
                self.log.lock().unwrap().push(format!("{}:enter", self.label));
                let result = next.await;
                self.log.lock().unwrap().push(format!("{}:exit", self.label));
                result
            })
        }
    }

    #[tokio::test]
    async fn test_registration_order_is_wrapping_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = BehaviorChain::builder()
            .register(Recording {
                label: "outer",
                log: log.clone(),
            })
            .register(Recording {
                label: "inner",
                log: log.clone(),
            })
            .build();

        let info = call();
        let terminal: BehaviorFuture<'_> = Box::pin(async {
            log.lock().unwrap().push("work".to_string());
            Ok(())
        });
        chain.apply(&info, terminal).await.unwrap();

        let entries = log.lock().unwrap().clone();
        assert_eq!(
            entries,
            vec!["outer:enter", "inner:enter", "work", "inner:exit", "outer:exit"]
        );
    }

    #[tokio::test]
    async fn test_validation_vetoes_before_work_runs() {
        let ran = Arc::new(Mutex::new(false));
        let chain = BehaviorChain::builder().register(ValidationBehavior).build();

        let info = CallInfo::new("   ", &Principal::new("alice"), false);
        let ran_flag = ran.clone();
        let terminal: BehaviorFuture<'_> = Box::pin(async move {
            *ran_flag.lock().unwrap() = true;
            Ok(())
        });

        let failure = chain.apply(&info, terminal).await.unwrap_err();
        assert_eq!(failure.kind(), FailureKind::Fatal);
        assert!(failure.message().contains("description"));
        assert!(!*ran.lock().unwrap());
    }

    #[tokio::test]
    async fn test_validation_rejects_bad_principal() {
        let chain = BehaviorChain::builder().register(ValidationBehavior).build();
        let info = CallInfo::new("good description", &Principal::new(""), false);
        let terminal: BehaviorFuture<'_> = Box::pin(future::ready(Ok(())));

        let failure = chain.apply(&info, terminal).await.unwrap_err();
        assert!(failure.message().contains("rejected by validation"));
    }

    #[tokio::test]
    async fn test_translation_contextualizes_recoverable_only() {
        let chain = BehaviorChain::builder().register(TranslationBehavior).build();
        let info = call();

        let terminal: BehaviorFuture<'_> =
            Box::pin(future::ready(Err(WorkFailure::recoverable("no such row"))));
        let failure = chain.apply(&info, terminal).await.unwrap_err();
        assert!(failure.message().contains("no such row"));
        assert!(failure.message().contains("test call"));

        let terminal: BehaviorFuture<'_> =
            Box::pin(future::ready(Err(WorkFailure::fatal("bug"))));
        let failure = chain.apply(&info, terminal).await.unwrap_err();
        assert_eq!(failure.message(), "bug");
    }

    #[tokio::test]
    async fn test_standard_chain_order() {
        let chain = BehaviorChain::standard();
        assert_eq!(chain.names(), vec!["translation", "audit", "validation"]);
        assert_eq!(chain.len(), 3);
        assert!(!chain.is_empty());
    }
}
