use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use log::info;

use crate::core::{CoreError, Result};
use crate::readonly::ReadOnlyStatus;

type ComponentHandle = Arc<dyn Any + Send + Sync>;
type FallbackFactory = Box<dyn FnOnce() -> ComponentHandle + Send>;

/// Declaration of one assembly component
///
/// Components that write to the database or the repository say so
/// here, and may declare a factory for a read-only replacement that
/// the guard resolves at most once.
pub struct ComponentSpec {
    name: String,
    handle: ComponentHandle,
    needs_db_writes: bool,
    needs_repo_writes: bool,
    read_only_fallback: Option<FallbackFactory>,
    depends_on: Vec<String>,
}

impl ComponentSpec {
    pub fn new<T: Send + Sync + 'static>(name: &str, component: Arc<T>) -> Self {
        Self {
            name: name.to_string(),
            handle: component,
            needs_db_writes: false,
            needs_repo_writes: false,
            read_only_fallback: None,
            depends_on: Vec::new(),
        }
    }

    /// Mark the component as needing database writes
    pub fn needs_db_writes(mut self) -> Self {
        self.needs_db_writes = true;
        self
    }

    /// Mark the component as needing repository writes
    pub fn needs_repo_writes(mut self) -> Self {
        self.needs_repo_writes = true;
        self
    }

    /// Declare a dependency on another component by name
    pub fn depends_on(mut self, name: &str) -> Self {
        self.depends_on.push(name.to_string());
        self
    }

    /// Factory for the read-only replacement, invoked at most once if
    /// the guard decides to substitute
    pub fn read_only_fallback<T, F>(mut self, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Arc<T> + Send + 'static,
    {
        self.read_only_fallback = Some(Box::new(move || -> ComponentHandle { factory() }));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn requires_db_writes(&self) -> bool {
        self.needs_db_writes
    }

    pub fn requires_repo_writes(&self) -> bool {
        self.needs_repo_writes
    }
}

/// Mutable set of component declarations, in declaration order
pub struct ComponentRegistry {
    entries: Vec<ComponentSpec>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn declare(&mut self, spec: ComponentSpec) -> Result<()> {
        if self.entries.iter().any(|entry| entry.name == spec.name) {
            return Err(CoreError::Registry(format!(
                "component '{}' is already declared",
                spec.name
            )));
        }
        self.entries.push(spec);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|entry| entry.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|entry| entry.name.as_str()).collect()
    }

    /// Freeze the registry into its assembled form
    ///
    /// Every declared dependency must resolve to a component that is
    /// still present. A reference to one the guard removed fails here,
    /// loudly and by name, instead of surfacing later as a missing
    /// lookup at runtime.
    pub fn assemble(self) -> Result<AssembledComponents> {
        let known: HashSet<&str> = self.entries.iter().map(|e| e.name.as_str()).collect();

        for entry in &self.entries {
            for dep in &entry.depends_on {
                if !known.contains(dep.as_str()) {
                    return Err(CoreError::Registry(format!(
                        "component '{}' requires '{}', which is not registered",
                        entry.name, dep
                    )));
                }
            }
        }

        let components = self
            .entries
            .into_iter()
            .map(|entry| (entry.name, entry.handle))
            .collect();
        Ok(AssembledComponents { components })
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardMode {
    /// Remove components the deployment cannot support
    Prune,
    /// Swap in declared read-only fallbacks, removing only components
    /// without one
    Substitute,
}

/// What a guard sweep did to the registry
#[derive(Debug, Clone, Default)]
pub struct GuardReport {
    pub removed: Vec<String>,
    pub substituted: Vec<String>,
}

impl GuardReport {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.substituted.is_empty()
    }
}

impl fmt::Display for GuardReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "guard: removed {:?}, substituted {:?}",
            self.removed, self.substituted
        )
    }
}

/// One-shot sweep that reconciles the registry with the read-only flags
///
/// `apply` consumes the guard, so a given guard can only ever rewrite
/// one registry once. The outcome is deterministic for a given status
/// and set of declarations.
pub struct RegistryGuard {
    status: ReadOnlyStatus,
    mode: GuardMode,
}

impl RegistryGuard {
    pub fn pruning(status: ReadOnlyStatus) -> Self {
        Self {
            status,
            mode: GuardMode::Prune,
        }
    }

    pub fn substituting(status: ReadOnlyStatus) -> Self {
        Self {
            status,
            mode: GuardMode::Substitute,
        }
    }

    pub fn apply(self, registry: &mut ComponentRegistry) -> GuardReport {
        let mut report = GuardReport::default();

        registry.entries.retain_mut(|entry| {
            let conflicted = (entry.needs_db_writes && self.status.is_db_read_only())
                || (entry.needs_repo_writes && self.status.is_repo_read_only());
            if !conflicted {
                return true;
            }

            if self.mode == GuardMode::Substitute {
                if let Some(factory) = entry.read_only_fallback.take() {
                    entry.handle = factory();
                    entry.needs_db_writes = false;
                    entry.needs_repo_writes = false;
                    info!("component '{}' substituted with its read-only variant", entry.name);
                    report.substituted.push(entry.name.clone());
                    return true;
                }
            }

            info!(
                "component '{}' removed: needs writes this deployment cannot make",
                entry.name
            );
            report.removed.push(entry.name.clone());
            false
        });

        report
    }
}

/// Immutable component set produced by [`ComponentRegistry::assemble`]
pub struct AssembledComponents {
    components: HashMap<String, ComponentHandle>,
}

impl fmt::Debug for AssembledComponents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssembledComponents")
            .field("names", &self.names())
            .finish()
    }
}

impl AssembledComponents {
    /// Typed lookup by name
    pub fn get<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>> {
        let handle = self.components.get(name).ok_or_else(|| {
            CoreError::Registry(format!("component '{name}' is not registered"))
        })?;

        handle.clone().downcast::<T>().map_err(|_| {
            CoreError::Registry(format!(
                "component '{name}' has a different type than requested"
            ))
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.components.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.components.keys().map(String::as_str).collect()
    }
}
