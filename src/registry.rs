use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::OnceLock;
use thiserror::Error;

/// Lookup failure: the kind tag has no registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown shape kind `{0}`")]
pub struct UnknownShapeKind(pub String);

/// Where a shape may appear in a flow. Drives the validator's boundary checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeCategory {
    Entry,
    Terminal,
    Intermediate,
}

/// Selects the renderer for a shape kind.
///
/// Rendering is a closed, tagged-variant concern: each variant corresponds to
/// one fixed XML body with allow-list field substitution, never a general
/// templating engine. Adding a kind means adding a variant plus a registry
/// entry — the assembler and validator stay untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeTemplate {
    Start,
    Stop,
    ReturnDocuments,
    Map,
    Message,
    Connector,
    Decision,
}

/// Everything the assembler and validator need to know about one shape kind.
#[derive(Debug, Clone)]
pub struct ShapeDescriptor {
    pub category: ShapeCategory,
    /// Config fields that must be present after reference resolution.
    pub required_fields: Vec<String>,
    /// Field values merged underneath the caller-supplied config.
    pub defaults: Vec<(String, Value)>,
    /// Display label used when the shape supplies none.
    pub default_label: String,
    pub template: ShapeTemplate,
}

/// Registry of supported shape kinds.
///
/// The builtin registry is read-only process-wide state, populated once and
/// never mutated at runtime. Custom registries can be built for tests or to
/// extend the supported kinds.
#[derive(Debug, Clone, Default)]
pub struct ShapeRegistry {
    shapes: HashMap<String, ShapeDescriptor>,
}

impl ShapeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor for a kind tag. Replaces any existing entry.
    pub fn register(&mut self, kind: impl Into<String>, descriptor: ShapeDescriptor) {
        self.shapes.insert(kind.into(), descriptor);
    }

    pub fn lookup(&self, kind: &str) -> Result<&ShapeDescriptor, UnknownShapeKind> {
        self.shapes
            .get(kind)
            .ok_or_else(|| UnknownShapeKind(kind.to_string()))
    }

    pub fn has(&self, kind: &str) -> bool {
        self.shapes.contains_key(kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ShapeDescriptor)> {
        self.shapes.iter()
    }

    /// The process-wide builtin registry, populated once.
    pub fn builtin() -> &'static ShapeRegistry {
        static BUILTIN: OnceLock<ShapeRegistry> = OnceLock::new();
        BUILTIN.get_or_init(build_builtin)
    }
}

fn build_builtin() -> ShapeRegistry {
    let mut reg = ShapeRegistry::new();
    reg.register(
        "start",
        ShapeDescriptor {
            category: ShapeCategory::Entry,
            required_fields: vec![],
            defaults: vec![],
            default_label: "Start".to_string(),
            template: ShapeTemplate::Start,
        },
    );
    reg.register(
        "stop",
        ShapeDescriptor {
            category: ShapeCategory::Terminal,
            required_fields: vec![],
            defaults: vec![("continue".to_string(), json!("true"))],
            default_label: "Stop".to_string(),
            template: ShapeTemplate::Stop,
        },
    );
    reg.register(
        "return",
        ShapeDescriptor {
            category: ShapeCategory::Terminal,
            required_fields: vec![],
            defaults: vec![("label".to_string(), json!(""))],
            default_label: "Return Documents".to_string(),
            template: ShapeTemplate::ReturnDocuments,
        },
    );
    reg.register(
        "map",
        ShapeDescriptor {
            category: ShapeCategory::Intermediate,
            required_fields: vec!["map_id".to_string()],
            defaults: vec![],
            default_label: "Map".to_string(),
            template: ShapeTemplate::Map,
        },
    );
    reg.register(
        "message",
        ShapeDescriptor {
            category: ShapeCategory::Intermediate,
            required_fields: vec!["message_text".to_string()],
            defaults: vec![],
            default_label: "Message".to_string(),
            template: ShapeTemplate::Message,
        },
    );
    reg.register(
        "connector",
        ShapeDescriptor {
            category: ShapeCategory::Intermediate,
            required_fields: vec!["connector_id".to_string(), "operation".to_string()],
            defaults: vec![("object_type".to_string(), json!(""))],
            default_label: "Connector".to_string(),
            template: ShapeTemplate::Connector,
        },
    );
    reg.register(
        "decision",
        ShapeDescriptor {
            category: ShapeCategory::Intermediate,
            required_fields: vec!["expression".to_string()],
            defaults: vec![],
            default_label: "Decision".to_string(),
            template: ShapeTemplate::Decision,
        },
    );
    reg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup() {
        let reg = ShapeRegistry::builtin();
        let start = reg.lookup("start").unwrap();
        assert_eq!(start.category, ShapeCategory::Entry);
        let stop = reg.lookup("stop").unwrap();
        assert_eq!(stop.category, ShapeCategory::Terminal);
        let map = reg.lookup("map").unwrap();
        assert_eq!(map.category, ShapeCategory::Intermediate);
        assert_eq!(map.required_fields, vec!["map_id".to_string()]);
    }

    #[test]
    fn test_unknown_kind_fails() {
        let reg = ShapeRegistry::builtin();
        let err = reg.lookup("teleport").unwrap_err();
        assert_eq!(err, UnknownShapeKind("teleport".to_string()));
        assert!(err.to_string().contains("teleport"));
    }

    #[test]
    fn test_builtin_is_shared() {
        let a = ShapeRegistry::builtin() as *const ShapeRegistry;
        let b = ShapeRegistry::builtin() as *const ShapeRegistry;
        assert_eq!(a, b);
    }

    #[test]
    fn test_connector_defaults() {
        let reg = ShapeRegistry::builtin();
        let connector = reg.lookup("connector").unwrap();
        assert!(connector
            .defaults
            .iter()
            .any(|(k, v)| k == "object_type" && v.as_str() == Some("")));
    }

    #[test]
    fn test_builtin_kind_set() {
        let kinds: std::collections::BTreeSet<&str> = ShapeRegistry::builtin()
            .iter()
            .map(|(kind, _)| kind.as_str())
            .collect();
        let expected: std::collections::BTreeSet<&str> =
            ["start", "stop", "return", "map", "message", "connector", "decision"]
                .into_iter()
                .collect();
        assert_eq!(kinds, expected);
    }

    #[test]
    fn test_custom_kind_registration() {
        let mut reg = ShapeRegistry::builtin().clone();
        reg.register(
            "notify",
            ShapeDescriptor {
                category: ShapeCategory::Intermediate,
                required_fields: vec!["channel".to_string()],
                defaults: vec![],
                default_label: "Notify".to_string(),
                template: ShapeTemplate::Message,
            },
        );
        assert!(reg.has("notify"));
        // The builtin registry is untouched.
        assert!(!ShapeRegistry::builtin().has("notify"));
    }
}
