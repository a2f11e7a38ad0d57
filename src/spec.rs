use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

// ── Helper defaults for serde ──

fn default_folder() -> String {
    "Home".to_string()
}

fn default_workload() -> String {
    "general".to_string()
}

/// Kind-specific field name → value mapping.
pub type FieldMap = serde_json::Map<String, Value>;

// ── Shapes and flows ──

/// One node in a flow. `kind` is resolved against the shape registry;
/// `config` carries the kind-specific fields (identifiers, expressions,
/// message text, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShapeSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(default, rename = "userlabel", skip_serializing_if = "Option::is_none")]
    pub user_label: Option<String>,
    #[serde(default)]
    pub config: FieldMap,
}

/// The ordered shape sequence inside one process-like component, plus the
/// process-level envelope attributes. Linear topology only: each shape
/// implicitly connects to its successor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowSpec {
    pub shapes: Vec<ShapeSpec>,
    #[serde(flatten)]
    pub settings: ProcessSettings,
}

/// Process attributes rendered on the document envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessSettings {
    pub allow_simultaneous: bool,
    pub enable_user_log: bool,
    pub process_log_on_error_only: bool,
    pub purge_data_immediately: bool,
    pub update_run_dates: bool,
    pub workload: String,
}

impl Default for ProcessSettings {
    fn default() -> Self {
        Self {
            allow_simultaneous: false,
            enable_user_log: false,
            process_log_on_error_only: false,
            purge_data_immediately: false,
            update_run_dates: false,
            workload: default_workload(),
        }
    }
}

// ── Components ──

/// Creatable component categories in the platform's object model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    Process,
    Map,
    Connection,
    Connector,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ComponentKind::Process => "process",
            ComponentKind::Map => "map",
            ComponentKind::Connection => "connection",
            ComponentKind::Connector => "connector",
        };
        f.write_str(s)
    }
}

/// Kind-specific payload: a flow for process-like kinds, a flat field map
/// for everything else.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ComponentConfig {
    Flow(FlowSpec),
    Fields(FieldMap),
}

impl Default for ComponentConfig {
    fn default() -> Self {
        ComponentConfig::Fields(FieldMap::new())
    }
}

impl ComponentConfig {
    pub fn as_flow(&self) -> Option<&FlowSpec> {
        match self {
            ComponentConfig::Flow(flow) => Some(flow),
            ComponentConfig::Fields(_) => None,
        }
    }

    pub fn as_fields(&self) -> Option<&FieldMap> {
        match self {
            ComponentConfig::Fields(fields) => Some(fields),
            ComponentConfig::Flow(_) => None,
        }
    }
}

/// One unit of creation: envelope fields, kind-specific payload, and the
/// names of other components that must exist first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ComponentKind,
    #[serde(default = "default_folder")]
    pub folder_name: String,
    /// Platform folder identifier. Usually resolved from `folder_name` by
    /// the orchestrator; may be supplied directly to skip resolution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub config: ComponentConfig,
}

impl ComponentSpec {
    pub fn flow(&self) -> Option<&FlowSpec> {
        self.config.as_flow()
    }

    /// Dependencies implied by reference placeholders (`*_ref` fields) in
    /// the payload, in encounter order.
    pub fn implied_dependencies(&self) -> Vec<String> {
        let mut found = Vec::new();
        let mut scan = |fields: &FieldMap| {
            for reference in REFERENCE_FIELDS {
                if let Some(Value::String(name)) = fields.get(reference.ref_field) {
                    if !found.contains(name) {
                        found.push(name.clone());
                    }
                }
            }
        };
        match &self.config {
            ComponentConfig::Flow(flow) => {
                for shape in &flow.shapes {
                    scan(&shape.config);
                }
            }
            ComponentConfig::Fields(fields) => scan(fields),
        }
        found
    }

    /// Declared dependencies followed by implied ones, deduplicated,
    /// preserving declaration order.
    pub fn all_dependencies(&self) -> Vec<String> {
        let mut deps = self.dependencies.clone();
        for implied in self.implied_dependencies() {
            if !deps.contains(&implied) {
                deps.push(implied);
            }
        }
        deps
    }
}

// ── Reference placeholders ──

/// A reference placeholder field and the identifier field it resolves to.
#[derive(Debug, Clone, Copy)]
pub struct ReferenceField {
    pub ref_field: &'static str,
    pub id_field: &'static str,
    pub kind: ComponentKind,
}

/// Supported symbolic reference fields. The orchestrator rewrites each
/// `ref_field` naming a component into the matching `id_field` carrying its
/// platform identifier before the document is rendered.
pub const REFERENCE_FIELDS: &[ReferenceField] = &[
    ReferenceField {
        ref_field: "map_ref",
        id_field: "map_id",
        kind: ComponentKind::Map,
    },
    ReferenceField {
        ref_field: "connector_ref",
        id_field: "connector_id",
        kind: ComponentKind::Connector,
    },
    ReferenceField {
        ref_field: "connection_ref",
        id_field: "connection_id",
        kind: ComponentKind::Connection,
    },
    ReferenceField {
        ref_field: "subprocess_ref",
        id_field: "process_id",
        kind: ComponentKind::Process,
    },
];

// ── Parsing ──

#[derive(Debug, Deserialize)]
struct BatchSpecYaml {
    components: Vec<ComponentSpec>,
}

#[derive(Debug, Deserialize)]
struct ProcessShorthandYaml {
    name: String,
    #[serde(default = "default_folder")]
    folder_name: String,
    #[serde(default)]
    folder_id: Option<String>,
    #[serde(default)]
    description: String,
    shapes: Vec<ShapeSpec>,
    #[serde(flatten)]
    settings: ProcessSettings,
}

/// Parse one component specification from YAML.
///
/// Validation is NOT performed here — the assembler validates flows, and the
/// orchestrator checks dependencies across a batch.
pub fn parse_component_yaml(yaml_str: &str) -> Result<ComponentSpec, serde_yaml::Error> {
    serde_yaml::from_str(yaml_str)
}

/// Parse a multi-component batch (`components:` list) from YAML.
pub fn parse_batch_yaml(yaml_str: &str) -> Result<Vec<ComponentSpec>, serde_yaml::Error> {
    let batch: BatchSpecYaml = serde_yaml::from_str(yaml_str)?;
    Ok(batch.components)
}

/// Parse the single-process shorthand (name + shapes at top level) used by
/// the authoring surface for processes without dependencies.
pub fn parse_process_yaml(yaml_str: &str) -> Result<ComponentSpec, serde_yaml::Error> {
    let shorthand: ProcessShorthandYaml = serde_yaml::from_str(yaml_str)?;
    Ok(ComponentSpec {
        name: shorthand.name,
        kind: ComponentKind::Process,
        folder_name: shorthand.folder_name,
        folder_id: shorthand.folder_id,
        description: shorthand.description,
        dependencies: Vec::new(),
        config: ComponentConfig::Flow(FlowSpec {
            shapes: shorthand.shapes,
            settings: shorthand.settings,
        }),
    })
}
