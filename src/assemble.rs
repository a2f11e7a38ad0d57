use crate::layout::{LayoutConfig, Point};
use crate::registry::{ShapeRegistry, ShapeTemplate};
use crate::spec::{ComponentConfig, ComponentKind, ComponentSpec, FieldMap, ShapeSpec};
use crate::validate::{validate_flow, FlowValidationError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write;
use thiserror::Error;

/// The assembled platform document: envelope fields plus the rendered XML.
/// Immutable once returned; the create collaborator consumes it as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredDocument {
    pub name: String,
    pub kind: ComponentKind,
    pub folder_name: String,
    pub folder_id: Option<String>,
    pub description: String,
    pub xml: String,
}

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error(transparent)]
    Validation(#[from] FlowValidationError),
    #[error("component `{name}` has kind `{kind}` but no flow payload")]
    MissingFlow { name: String, kind: ComponentKind },
    #[error("component `{name}` has kind `{kind}` but carries a flow payload")]
    UnexpectedFlow { name: String, kind: ComponentKind },
    #[error("document rendering failed: {0}")]
    Render(#[from] std::fmt::Error),
}

/// Assemble one component specification into a platform document.
///
/// For flow-bearing kinds this validates the flow (propagating the failure
/// unchanged), computes positions, merges registry defaults under the
/// caller-supplied config, derives each shape's outbound connection (the
/// next shape's name, none for the terminal shape), and renders shape bodies
/// inside the component envelope. Non-flow kinds are a direct
/// field-merge-and-render with no layout step.
///
/// Pure transform: identical input yields byte-identical output. The
/// platform is never contacted here.
pub fn assemble(
    spec: &ComponentSpec,
    registry: &ShapeRegistry,
    layout: &LayoutConfig,
) -> Result<StructuredDocument, AssemblyError> {
    let xml = match (&spec.kind, &spec.config) {
        (ComponentKind::Process, ComponentConfig::Flow(flow)) => {
            validate_flow(flow, registry)?;
            let positions = layout.linear_layout(flow.shapes.len());

            let mut shapes_xml = String::new();
            for (i, shape) in flow.shapes.iter().enumerate() {
                let next = flow.shapes.get(i + 1).map(|s| s.name.as_str());
                render_shape(
                    &mut shapes_xml,
                    shape,
                    registry,
                    positions[i],
                    next,
                    layout,
                )?;
            }

            let mut xml = String::new();
            writeln!(xml, r#"<?xml version="1.0" encoding="UTF-8"?>"#)?;
            writeln!(
                xml,
                r#"<bns:Component xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance""#
            )?;
            writeln!(
                xml,
                r#"               xmlns:bns="http://api.platform.boomi.com/""#
            )?;
            writeln!(xml, r#"               name="{}""#, xml_escape(&spec.name))?;
            writeln!(xml, r#"               type="process""#)?;
            write!(
                xml,
                r#"               folderName="{}""#,
                xml_escape(&spec.folder_name)
            )?;
            if let Some(folder_id) = spec.folder_id.as_deref().filter(|id| !id.is_empty()) {
                write!(xml, "\n               folderId=\"{}\"", xml_escape(folder_id))?;
            }
            writeln!(xml, ">")?;
            writeln!(xml, "  <bns:encryptedValues/>")?;
            writeln!(
                xml,
                "  <bns:description>{}</bns:description>",
                xml_escape(&spec.description)
            )?;
            writeln!(xml, "  <bns:object>")?;
            let s = &flow.settings;
            writeln!(xml, r#"    <process xmlns="""#)?;
            writeln!(
                xml,
                r#"             allowSimultaneous="{}""#,
                s.allow_simultaneous
            )?;
            writeln!(xml, r#"             enableUserLog="{}""#, s.enable_user_log)?;
            writeln!(
                xml,
                r#"             processLogOnErrorOnly="{}""#,
                s.process_log_on_error_only
            )?;
            writeln!(
                xml,
                r#"             purgeDataImmediately="{}""#,
                s.purge_data_immediately
            )?;
            writeln!(
                xml,
                r#"             updateRunDates="{}""#,
                s.update_run_dates
            )?;
            writeln!(xml, r#"             workload="{}">"#, xml_escape(&s.workload))?;
            writeln!(xml, "      <shapes>")?;
            xml.push_str(&shapes_xml);
            writeln!(xml, "      </shapes>")?;
            writeln!(xml, "    </process>")?;
            writeln!(xml, "  </bns:object>")?;
            writeln!(xml, "  <bns:processOverrides/>")?;
            write!(xml, "</bns:Component>")?;
            xml
        }
        (ComponentKind::Process, ComponentConfig::Fields(_)) => {
            return Err(AssemblyError::MissingFlow {
                name: spec.name.clone(),
                kind: spec.kind,
            });
        }
        (_, ComponentConfig::Flow(_)) => {
            return Err(AssemblyError::UnexpectedFlow {
                name: spec.name.clone(),
                kind: spec.kind,
            });
        }
        (_, ComponentConfig::Fields(fields)) => render_flat(spec, fields)?,
    };

    Ok(StructuredDocument {
        name: spec.name.clone(),
        kind: spec.kind,
        folder_name: spec.folder_name.clone(),
        folder_id: spec.folder_id.clone(),
        description: spec.description.clone(),
        xml,
    })
}

/// Envelope-only rendering for non-flow kinds: the body is a single element
/// named after the kind, carrying the payload fields as attributes.
fn render_flat(spec: &ComponentSpec, fields: &FieldMap) -> Result<String, AssemblyError> {
    let mut xml = String::new();
    writeln!(xml, r#"<?xml version="1.0" encoding="UTF-8"?>"#)?;
    writeln!(
        xml,
        r#"<bns:Component xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance""#
    )?;
    writeln!(
        xml,
        r#"               xmlns:bns="http://api.platform.boomi.com/""#
    )?;
    writeln!(xml, r#"               name="{}""#, xml_escape(&spec.name))?;
    writeln!(xml, r#"               type="{}""#, spec.kind)?;
    write!(
        xml,
        r#"               folderName="{}""#,
        xml_escape(&spec.folder_name)
    )?;
    if let Some(folder_id) = spec.folder_id.as_deref().filter(|id| !id.is_empty()) {
        write!(xml, "\n               folderId=\"{}\"", xml_escape(folder_id))?;
    }
    writeln!(xml, ">")?;
    writeln!(xml, "  <bns:encryptedValues/>")?;
    writeln!(
        xml,
        "  <bns:description>{}</bns:description>",
        xml_escape(&spec.description)
    )?;
    writeln!(xml, "  <bns:object>")?;
    write!(xml, r#"    <{} xmlns="""#, spec.kind)?;
    for (field, value) in fields {
        write!(
            xml,
            r#" {}="{}""#,
            xml_escape(field),
            xml_escape(&value_text(value))
        )?;
    }
    writeln!(xml, "/>")?;
    writeln!(xml, "  </bns:object>")?;
    write!(xml, "</bns:Component>")?;
    Ok(xml)
}

fn render_shape(
    xml: &mut String,
    shape: &ShapeSpec,
    registry: &ShapeRegistry,
    position: Point,
    next: Option<&str>,
    layout: &LayoutConfig,
) -> Result<(), AssemblyError> {
    // The validator has already resolved every kind.
    let descriptor = registry
        .lookup(&shape.kind)
        .map_err(|source| FlowValidationError::UnknownKind {
            shape: shape.name.clone(),
            source,
        })?;

    let config = merged_config(shape, &descriptor.defaults);
    let label = shape
        .user_label
        .as_deref()
        .filter(|l| !l.is_empty())
        .unwrap_or(&descriptor.default_label);

    writeln!(
        xml,
        r#"        <shape shapetype="{}" name="{}" userlabel="{}" x="{}" y="{}">"#,
        xml_escape(&shape.kind),
        xml_escape(&shape.name),
        xml_escape(label),
        position.x,
        position.y
    )?;

    writeln!(xml, "          <configuration>")?;
    render_configuration(xml, descriptor.template, &config)?;
    writeln!(xml, "          </configuration>")?;

    writeln!(xml, "          <dragpoints>")?;
    if let Some(to_shape) = next {
        let drag = layout.connection_point(position);
        writeln!(
            xml,
            r#"            <dragpoint name="{}.dragpoint1" toShape="{}" x="{}" y="{}"/>"#,
            xml_escape(&shape.name),
            xml_escape(to_shape),
            drag.x,
            drag.y
        )?;
    }
    writeln!(xml, "          </dragpoints>")?;
    writeln!(xml, "        </shape>")?;
    Ok(())
}

/// Per-kind configuration bodies. Strict allow-list substitution: only the
/// fields each variant names are rendered, everything else is ignored.
fn render_configuration(
    xml: &mut String,
    template: ShapeTemplate,
    config: &FieldMap,
) -> Result<(), AssemblyError> {
    let get = |field: &str| config.get(field).map(value_text).unwrap_or_default();
    match template {
        ShapeTemplate::Start => {
            writeln!(xml, "            <noaction/>")?;
        }
        ShapeTemplate::Stop => {
            writeln!(
                xml,
                r#"            <stop continue="{}"/>"#,
                xml_escape(&get("continue"))
            )?;
        }
        ShapeTemplate::ReturnDocuments => {
            writeln!(
                xml,
                r#"            <returndocuments label="{}"/>"#,
                xml_escape(&get("label"))
            )?;
        }
        ShapeTemplate::Map => {
            writeln!(
                xml,
                r#"            <map mapId="{}"/>"#,
                xml_escape(&get("map_id"))
            )?;
        }
        ShapeTemplate::Message => {
            writeln!(
                xml,
                "            <message>{}</message>",
                xml_escape(&get("message_text"))
            )?;
        }
        ShapeTemplate::Connector => {
            writeln!(
                xml,
                r#"            <connectoraction connectorId="{}" operation="{}" objectType="{}"/>"#,
                xml_escape(&get("connector_id")),
                xml_escape(&get("operation")),
                xml_escape(&get("object_type"))
            )?;
        }
        ShapeTemplate::Decision => {
            writeln!(
                xml,
                r#"            <decision expression="{}"/>"#,
                xml_escape(&get("expression"))
            )?;
        }
    }
    Ok(())
}

/// Registry defaults merged underneath the caller-supplied config.
fn merged_config(shape: &ShapeSpec, defaults: &[(String, Value)]) -> FieldMap {
    let mut merged = FieldMap::new();
    for (field, value) in defaults {
        merged.insert(field.clone(), value.clone());
    }
    for (field, value) in &shape.config {
        merged.insert(field.clone(), value.clone());
    }
    merged
}

/// Attribute text for a config value. Strings render bare; booleans and
/// numbers use their canonical form.
fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn xml_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{FlowSpec, ProcessSettings};
    use serde_json::json;

    fn shape(kind: &str, name: &str, fields: &[(&str, &str)]) -> ShapeSpec {
        let mut config = FieldMap::new();
        for (k, v) in fields {
            config.insert(k.to_string(), json!(v));
        }
        ShapeSpec {
            kind: kind.to_string(),
            name: name.to_string(),
            user_label: None,
            config,
        }
    }

    fn process_spec(name: &str, shapes: Vec<ShapeSpec>) -> ComponentSpec {
        ComponentSpec {
            name: name.to_string(),
            kind: ComponentKind::Process,
            folder_name: "Home".to_string(),
            folder_id: None,
            description: String::new(),
            dependencies: vec![],
            config: ComponentConfig::Flow(FlowSpec {
                shapes,
                settings: ProcessSettings::default(),
            }),
        }
    }

    fn assemble_default(spec: &ComponentSpec) -> Result<StructuredDocument, AssemblyError> {
        assemble(spec, ShapeRegistry::builtin(), &LayoutConfig::default())
    }

    #[test]
    fn test_shape_count_and_connections() {
        let spec = process_spec(
            "ETL",
            vec![
                shape("start", "start", &[]),
                shape("map", "transform", &[("map_id", "abc-123")]),
                shape("stop", "end", &[]),
            ],
        );
        let doc = assemble_default(&spec).unwrap();
        assert_eq!(doc.xml.matches("<shape ").count(), 3);
        // N-1 connections, each targeting the following shape.
        assert_eq!(doc.xml.matches("<dragpoint ").count(), 2);
        assert!(doc.xml.contains(r#"toShape="transform""#));
        assert!(doc.xml.contains(r#"toShape="end""#));
        assert!(!doc.xml.contains(r#"toShape="start""#));
    }

    #[test]
    fn test_x_coordinates_strictly_increase() {
        let layout = LayoutConfig::default();
        let spec = process_spec(
            "Wide",
            vec![
                shape("start", "start", &[]),
                shape("message", "m1", &[("message_text", "a")]),
                shape("message", "m2", &[("message_text", "b")]),
                shape("stop", "end", &[]),
            ],
        );
        let doc = assemble(&spec, ShapeRegistry::builtin(), &layout).unwrap();
        let xs: Vec<f64> = doc
            .xml
            .lines()
            .filter(|l| l.trim_start().starts_with("<shape "))
            .map(|l| {
                let rest = l.split(r#" x=""#).nth(1).unwrap();
                rest.split('"').next().unwrap().parse().unwrap()
            })
            .collect();
        assert_eq!(xs.len(), 4);
        assert!(xs.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_assemble_is_idempotent() {
        let spec = process_spec(
            "Stable",
            vec![
                shape("start", "start", &[]),
                shape("connector", "push", &[("connector_id", "c-1"), ("operation", "upsert")]),
                shape("return", "end", &[]),
            ],
        );
        let a = assemble_default(&spec).unwrap();
        let b = assemble_default(&spec).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.xml, b.xml);
    }

    #[test]
    fn test_validation_failure_propagates_unchanged() {
        let spec = process_spec(
            "Broken",
            vec![
                shape("start", "start", &[]),
                shape("map", "transform", &[]),
                shape("stop", "end", &[]),
            ],
        );
        match assemble_default(&spec).unwrap_err() {
            AssemblyError::Validation(FlowValidationError::MissingRequiredField {
                shape,
                field,
            }) => {
                assert_eq!(shape, "transform");
                assert_eq!(field, "map_id");
            }
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn test_stop_default_continue_rendered() {
        let spec = process_spec(
            "Defaults",
            vec![shape("start", "start", &[]), shape("stop", "end", &[])],
        );
        let doc = assemble_default(&spec).unwrap();
        assert!(doc.xml.contains(r#"<stop continue="true"/>"#));
    }

    #[test]
    fn test_caller_config_overrides_defaults() {
        let spec = process_spec(
            "Override",
            vec![
                shape("start", "start", &[]),
                shape("stop", "end", &[("continue", "false")]),
            ],
        );
        let doc = assemble_default(&spec).unwrap();
        assert!(doc.xml.contains(r#"<stop continue="false"/>"#));
    }

    #[test]
    fn test_envelope_settings_and_folder() {
        let mut spec = process_spec(
            "Tuned",
            vec![shape("start", "start", &[]), shape("stop", "end", &[])],
        );
        spec.folder_name = "Integrations/Prod".to_string();
        spec.folder_id = Some("folder-9".to_string());
        spec.description = "Nightly sync".to_string();
        if let ComponentConfig::Flow(flow) = &mut spec.config {
            flow.settings.allow_simultaneous = true;
            flow.settings.workload = "low_latency".to_string();
        }
        let doc = assemble_default(&spec).unwrap();
        assert!(doc.xml.contains(r#"folderName="Integrations/Prod""#));
        assert!(doc.xml.contains(r#"folderId="folder-9""#));
        assert!(doc.xml.contains(r#"allowSimultaneous="true""#));
        assert!(doc.xml.contains(r#"workload="low_latency""#));
        assert!(doc.xml.contains("<bns:description>Nightly sync</bns:description>"));
    }

    #[test]
    fn test_folder_id_attribute_omitted_when_absent() {
        let spec = process_spec(
            "NoFolder",
            vec![shape("start", "start", &[]), shape("stop", "end", &[])],
        );
        let doc = assemble_default(&spec).unwrap();
        assert!(!doc.xml.contains("folderId"));
    }

    #[test]
    fn test_non_flow_kind_renders_fields() {
        let mut fields = FieldMap::new();
        fields.insert("host".to_string(), json!("crm.example.com"));
        fields.insert("port".to_string(), json!(443));
        let spec = ComponentSpec {
            name: "CRM".to_string(),
            kind: ComponentKind::Connection,
            folder_name: "Home".to_string(),
            folder_id: None,
            description: String::new(),
            dependencies: vec![],
            config: ComponentConfig::Fields(fields),
        };
        let doc = assemble_default(&spec).unwrap();
        assert!(doc.xml.contains(r#"type="connection""#));
        assert!(doc.xml.contains(r#"host="crm.example.com""#));
        assert!(doc.xml.contains(r#"port="443""#));
        assert!(!doc.xml.contains("<shapes>"));
    }

    #[test]
    fn test_process_without_flow_rejected() {
        let spec = ComponentSpec {
            name: "Empty".to_string(),
            kind: ComponentKind::Process,
            folder_name: "Home".to_string(),
            folder_id: None,
            description: String::new(),
            dependencies: vec![],
            config: ComponentConfig::Fields(FieldMap::new()),
        };
        assert!(matches!(
            assemble_default(&spec).unwrap_err(),
            AssemblyError::MissingFlow { .. }
        ));
    }

    #[test]
    fn test_flow_on_non_process_rejected() {
        let spec = ComponentSpec {
            kind: ComponentKind::Map,
            ..process_spec("Odd", vec![shape("start", "s", &[]), shape("stop", "e", &[])])
        };
        assert!(matches!(
            assemble_default(&spec).unwrap_err(),
            AssemblyError::UnexpectedFlow { .. }
        ));
    }

    #[test]
    fn test_xml_escaping_in_attributes_and_text() {
        let mut spec = process_spec(
            "A & B <Sync>",
            vec![
                shape("start", "start", &[]),
                shape("message", "msg", &[("message_text", "1 < 2 & \"quoted\"")]),
                shape("stop", "end", &[]),
            ],
        );
        spec.description = "uses <shapes> & \"quotes\"".to_string();
        let doc = assemble_default(&spec).unwrap();
        assert!(doc.xml.contains(r#"name="A &amp; B &lt;Sync&gt;""#));
        assert!(doc.xml.contains("<message>1 &lt; 2 &amp; &quot;quoted&quot;</message>"));
        assert!(!doc.xml.contains("\"quoted\""));
    }
}
