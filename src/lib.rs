//! Process assembly and dependency orchestration for integration platform
//! components.
//!
//! Declarative component specifications (YAML or built programmatically) are
//! validated, laid out, and rendered into platform XML documents, then
//! created against a platform client in dependency order. Symbolic `*_ref`
//! placeholders are rewritten to real platform identifiers as earlier
//! components come into existence.
//!
//! The crate splits into a pure pipeline (`spec` → `validate` → `layout` →
//! `assemble`) and an effectful layer (`platform`, `orchestrate`). Everything
//! up to `assemble` is deterministic and platform-free.

pub mod assemble;
pub mod layout;
pub mod orchestrate;
pub mod platform;
pub mod registry;
pub mod spec;
pub mod validate;

pub use assemble::{assemble, AssemblyError, StructuredDocument};
pub use layout::{LayoutConfig, Point};
pub use orchestrate::{
    CreatedComponent, OrchestrationError, Orchestrator, RunFailure, RunRegistry, RunReport,
    RunState,
};
pub use platform::{
    ComponentFilter, ComponentId, ComponentSummary, FolderFilter, FolderSummary, InMemoryPlatform,
    PlatformClient, PlatformError, QueryPage,
};
pub use registry::{
    ShapeCategory, ShapeDescriptor, ShapeRegistry, ShapeTemplate, UnknownShapeKind,
};
pub use spec::{
    parse_batch_yaml, parse_component_yaml, parse_process_yaml, ComponentConfig, ComponentKind,
    ComponentSpec, FieldMap, FlowSpec, ProcessSettings, ReferenceField, ShapeSpec,
    REFERENCE_FIELDS,
};
pub use validate::{validate_flow, FlowValidationError};
