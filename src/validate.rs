use crate::registry::{ShapeCategory, ShapeRegistry, UnknownShapeKind};
use crate::spec::{FlowSpec, ShapeSpec, REFERENCE_FIELDS};
use std::collections::HashSet;
use thiserror::Error;

/// A structural defect in a flow. Validation is fail-fast: only the first
/// defect found is reported.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowValidationError {
    #[error("flow has no shapes")]
    EmptyFlow,
    #[error("first shape `{name}` has kind `{kind}`, expected an entry shape")]
    FirstNotEntry { name: String, kind: String },
    #[error("last shape `{name}` has kind `{kind}`, expected a terminal shape")]
    LastNotTerminal { name: String, kind: String },
    #[error("shape `{shape}`: {source}")]
    UnknownKind {
        shape: String,
        #[source]
        source: UnknownShapeKind,
    },
    #[error("shape `{shape}` is missing required field `{field}`")]
    MissingRequiredField { shape: String, field: String },
    #[error("duplicate shape name `{name}`")]
    DuplicateShapeName { name: String },
}

/// Validate a flow before assembly. Side-effect-free.
///
/// Checks, in order: non-empty; first shape is an entry kind; last shape is
/// a terminal kind; every kind resolves in the registry; every required
/// field is present (a `*_ref` placeholder satisfies its `*_id`
/// counterpart, since the orchestrator rewrites it before rendering); shape
/// names are pairwise distinct.
pub fn validate_flow(
    flow: &FlowSpec,
    registry: &ShapeRegistry,
) -> Result<(), FlowValidationError> {
    let first = flow.shapes.first().ok_or(FlowValidationError::EmptyFlow)?;
    let last = flow.shapes.last().ok_or(FlowValidationError::EmptyFlow)?;

    if lookup(registry, first)?.category != ShapeCategory::Entry {
        return Err(FlowValidationError::FirstNotEntry {
            name: first.name.clone(),
            kind: first.kind.clone(),
        });
    }
    if lookup(registry, last)?.category != ShapeCategory::Terminal {
        return Err(FlowValidationError::LastNotTerminal {
            name: last.name.clone(),
            kind: last.kind.clone(),
        });
    }

    for shape in &flow.shapes {
        lookup(registry, shape)?;
    }

    for shape in &flow.shapes {
        let descriptor = lookup(registry, shape)?;
        for field in &descriptor.required_fields {
            if !has_field(shape, field) {
                return Err(FlowValidationError::MissingRequiredField {
                    shape: shape.name.clone(),
                    field: field.clone(),
                });
            }
        }
    }

    let mut seen = HashSet::new();
    for shape in &flow.shapes {
        if !seen.insert(shape.name.as_str()) {
            return Err(FlowValidationError::DuplicateShapeName {
                name: shape.name.clone(),
            });
        }
    }

    Ok(())
}

fn lookup<'r>(
    registry: &'r ShapeRegistry,
    shape: &ShapeSpec,
) -> Result<&'r crate::registry::ShapeDescriptor, FlowValidationError> {
    registry
        .lookup(&shape.kind)
        .map_err(|source| FlowValidationError::UnknownKind {
            shape: shape.name.clone(),
            source,
        })
}

/// A required `*_id` field is satisfied either directly or by its `*_ref`
/// placeholder awaiting resolution.
fn has_field(shape: &ShapeSpec, field: &str) -> bool {
    if shape.config.contains_key(field) {
        return true;
    }
    REFERENCE_FIELDS
        .iter()
        .any(|r| r.id_field == field && shape.config.contains_key(r.ref_field))
}
