use std::fmt;

/// Identity under which a piece of privileged work runs
///
/// Carries the session owner plus the group and event-type labels that
/// the identity provider attaches to every call made on its behalf.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Principal {
    /// Login name of the acting user
    pub name: String,

    /// Group the call is billed to
    pub group: String,

    /// Event-type label recorded against the call
    pub event_type: String,
}

impl Principal {
    /// Create a principal with the default system group and event type
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            group: "system".to_string(),
            event_type: "Internal".to_string(),
        }
    }

    /// The administrative principal used for boot-time repairs
    pub fn root() -> Self {
        Self::new("root").event_type("Bootstrap")
    }

    /// Set the group
    pub fn group(mut self, group: &str) -> Self {
        self.group = group.to_string();
        self
    }

    /// Set the event-type label
    pub fn event_type(mut self, event_type: &str) -> Self {
        self.event_type = event_type.to_string();
        self
    }

    /// Validate that no label is empty
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Principal name cannot be empty".to_string());
        }

        if self.group.trim().is_empty() {
            return Err("Principal group cannot be empty".to_string());
        }

        if self.event_type.trim().is_empty() {
            return Err("Principal event type cannot be empty".to_string());
        }

        Ok(())
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}/{}", self.name, self.group, self.event_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_defaults() {
        let p = Principal::new("alice");
        assert_eq!(p.name, "alice");
        assert_eq!(p.group, "system");
        assert_eq!(p.event_type, "Internal");
    }

    #[test]
    fn test_builder_pattern() {
        let p = Principal::new("bob").group("staff").event_type("Upload");
        assert_eq!(p.group, "staff");
        assert_eq!(p.event_type, "Upload");
    }

    #[test]
    fn test_root_principal() {
        let p = Principal::root();
        assert_eq!(p.name, "root");
        assert_eq!(p.event_type, "Bootstrap");
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_validate() {
        assert!(Principal::new("alice").validate().is_ok());
        assert!(Principal::new("").validate().is_err());
        assert!(Principal::new("alice").group("  ").validate().is_err());
        assert!(Principal::new("alice").event_type("").validate().is_err());
    }

    #[test]
    fn test_display() {
        let p = Principal::new("alice").group("lab").event_type("Import");
        assert_eq!(p.to_string(), "alice@lab/Import");
    }
}
