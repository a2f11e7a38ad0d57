use crate::assemble::{assemble, AssemblyError, StructuredDocument};
use crate::layout::LayoutConfig;
use crate::platform::{
    ComponentFilter, ComponentId, ComponentSummary, FolderFilter, PlatformClient, PlatformError,
};
use crate::registry::ShapeRegistry;
use crate::spec::{ComponentConfig, ComponentKind, ComponentSpec, FieldMap, REFERENCE_FIELDS};
use crate::validate::validate_flow;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;
use tracing::{debug, info, warn};

/// One component successfully created during a run.
#[derive(Debug, Clone)]
pub struct CreatedComponent {
    pub component_id: ComponentId,
    pub kind: ComponentKind,
    pub document: StructuredDocument,
}

/// Name-indexed record of everything created so far in one run, preserving
/// creation order.
#[derive(Debug, Clone, Default)]
pub struct RunRegistry {
    entries: HashMap<String, CreatedComponent>,
    order: Vec<String>,
}

impl RunRegistry {
    pub fn insert(&mut self, name: impl Into<String>, created: CreatedComponent) {
        let name = name.into();
        if !self.entries.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.entries.insert(name, created);
    }

    pub fn get(&self, name: &str) -> Option<&CreatedComponent> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Names in creation order.
    pub fn created_names(&self) -> &[String] {
        &self.order
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &CreatedComponent)> {
        self.order.iter().map(|name| (name, &self.entries[name]))
    }
}

/// Where a run currently stands. `Creating(i)` is the zero-based position in
/// the sorted creation order. A failed run reports the phase it was in when
/// the error surfaced; `Done` appears only on successful reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Sorted,
    Creating(usize),
    Done,
}

/// Outcome of a fully successful run.
#[derive(Debug)]
pub struct RunReport {
    pub state: RunState,
    pub registry: RunRegistry,
    pub warnings: Vec<String>,
    /// Component names in the order they were created.
    pub creation_order: Vec<String>,
}

#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("circular dependency among components: {names:?}")]
    CircularDependency { names: Vec<String> },
    #[error("component `{component}`: field `{field}` references `{name}`, which does not exist")]
    UnresolvedReference {
        component: String,
        field: String,
        name: String,
    },
    #[error(
        "component `{component}`: field `{field}` references `{name}`, \
         which matches {count} platform components"
    )]
    AmbiguousReference {
        component: String,
        field: String,
        name: String,
        count: usize,
    },
    #[error("reference `{name}` expects kind `{expected}` but the component has kind `{actual}`")]
    ReferenceKindMismatch {
        name: String,
        expected: ComponentKind,
        actual: ComponentKind,
    },
    #[error("duplicate component name `{name}` in batch")]
    DuplicateComponentName { name: String },
    #[error("component `{component}`: {source}")]
    Assembly {
        component: String,
        #[source]
        source: AssemblyError,
    },
    #[error("component `{component}` (step {step}): {source}")]
    Platform {
        component: String,
        step: usize,
        #[source]
        source: PlatformError,
    },
    #[error("reference query for `{name}` failed: {source}")]
    ResolutionQuery {
        name: String,
        #[source]
        source: PlatformError,
    },
}

/// A failed run, carrying the phase it failed in and whatever was created
/// before the failure. Nothing is rolled back.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct RunFailure {
    #[source]
    pub error: OrchestrationError,
    pub state: RunState,
    pub registry: RunRegistry,
    pub warnings: Vec<String>,
}

/// Drives a batch of component specifications through dependency ordering,
/// reference resolution, assembly, and platform creation.
pub struct Orchestrator<P: PlatformClient> {
    platform: P,
    shapes: ShapeRegistry,
    layout: LayoutConfig,
}

impl<P: PlatformClient> Orchestrator<P> {
    pub fn new(platform: P) -> Self {
        Self {
            platform,
            shapes: ShapeRegistry::builtin().clone(),
            layout: LayoutConfig::default(),
        }
    }

    pub fn with_layout(mut self, layout: LayoutConfig) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_shape_registry(mut self, shapes: ShapeRegistry) -> Self {
        self.shapes = shapes;
        self
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Assemble a single specification without contacting the platform.
    /// Reference placeholders must already be resolved.
    pub fn assemble_one(&self, spec: &ComponentSpec) -> Result<StructuredDocument, AssemblyError> {
        assemble(spec, &self.shapes, &self.layout)
    }

    /// Run a batch: sort by dependencies, then for each component resolve
    /// references and folder, assemble, and create, registering each result
    /// so later components can reference it by name.
    ///
    /// On failure, everything created before the failing step stays on the
    /// platform and is reported in the failure's registry.
    pub async fn orchestrate(&self, specs: &[ComponentSpec]) -> Result<RunReport, RunFailure> {
        let mut registry = RunRegistry::default();
        let mut warnings = Vec::new();

        let fail = |error, state, registry, warnings| RunFailure {
            error,
            state,
            registry,
            warnings,
        };

        let mut seen = BTreeSet::new();
        for spec in specs {
            if !seen.insert(spec.name.as_str()) {
                return Err(fail(
                    OrchestrationError::DuplicateComponentName {
                        name: spec.name.clone(),
                    },
                    RunState::Pending,
                    registry,
                    warnings,
                ));
            }
        }

        let order = match creation_order(specs) {
            Ok(order) => order,
            Err(error) => {
                return Err(fail(error, RunState::Pending, registry, warnings));
            }
        };
        info!(
            components = specs.len(),
            order = ?order.iter().map(|&i| specs[i].name.as_str()).collect::<Vec<_>>(),
            "creation order resolved"
        );

        // Payload defects are caller-fixable; surface them before anything
        // exists on the platform.
        for spec in specs {
            if let Err(source) = self.preflight(spec) {
                return Err(fail(
                    OrchestrationError::Assembly {
                        component: spec.name.clone(),
                        source,
                    },
                    RunState::Sorted,
                    registry,
                    warnings,
                ));
            }
        }

        for (step, &index) in order.iter().enumerate() {
            let spec = &specs[index];
            debug!(step, component = %spec.name, kind = %spec.kind, "creating component");

            let mut resolved = spec.clone();
            if let Err(error) = self.resolve_references(&mut resolved, &registry).await {
                return Err(fail(error, RunState::Creating(step), registry, warnings));
            }
            self.resolve_folder(&mut resolved, &mut warnings).await;

            let document = match self.assemble_one(&resolved) {
                Ok(document) => document,
                Err(source) => {
                    return Err(fail(
                        OrchestrationError::Assembly {
                            component: spec.name.clone(),
                            source,
                        },
                        RunState::Creating(step),
                        registry,
                        warnings,
                    ));
                }
            };

            let component_id = match self.platform.create_component(&document).await {
                Ok(id) => id,
                Err(source) => {
                    warn!(component = %spec.name, error = %source, "platform create failed");
                    return Err(fail(
                        OrchestrationError::Platform {
                            component: spec.name.clone(),
                            step,
                            source,
                        },
                        RunState::Creating(step),
                        registry,
                        warnings,
                    ));
                }
            };

            info!(component = %spec.name, %component_id, "component created");
            registry.insert(
                spec.name.clone(),
                CreatedComponent {
                    component_id,
                    kind: spec.kind,
                    document,
                },
            );
        }

        let creation_order = registry.created_names().to_vec();
        Ok(RunReport {
            state: RunState::Done,
            registry,
            warnings,
            creation_order,
        })
    }

    /// Payload checks that need no platform state: flow validation plus the
    /// flow/kind pairing. Reference placeholders still count as present, so
    /// this accepts exactly what assembly will accept after resolution.
    fn preflight(&self, spec: &ComponentSpec) -> Result<(), AssemblyError> {
        match (&spec.kind, &spec.config) {
            (ComponentKind::Process, ComponentConfig::Flow(flow)) => {
                validate_flow(flow, &self.shapes)?;
                Ok(())
            }
            (ComponentKind::Process, ComponentConfig::Fields(_)) => {
                Err(AssemblyError::MissingFlow {
                    name: spec.name.clone(),
                    kind: spec.kind,
                })
            }
            (_, ComponentConfig::Flow(_)) => Err(AssemblyError::UnexpectedFlow {
                name: spec.name.clone(),
                kind: spec.kind,
            }),
            (_, ComponentConfig::Fields(_)) => Ok(()),
        }
    }

    /// Rewrite every `*_ref` placeholder in the payload into its `*_id`
    /// counterpart. Components created earlier in this run win; anything else
    /// falls back to a platform query by name and kind.
    async fn resolve_references(
        &self,
        spec: &mut ComponentSpec,
        registry: &RunRegistry,
    ) -> Result<(), OrchestrationError> {
        let component = spec.name.clone();
        match &mut spec.config {
            ComponentConfig::Flow(flow) => {
                for shape in &mut flow.shapes {
                    self.resolve_field_refs(&component, &mut shape.config, registry)
                        .await?;
                }
            }
            ComponentConfig::Fields(fields) => {
                self.resolve_field_refs(&component, fields, registry).await?;
            }
        }
        Ok(())
    }

    async fn resolve_field_refs(
        &self,
        component: &str,
        fields: &mut FieldMap,
        registry: &RunRegistry,
    ) -> Result<(), OrchestrationError> {
        for reference in REFERENCE_FIELDS {
            let Some(Value::String(name)) = fields.get(reference.ref_field) else {
                continue;
            };
            let name = name.clone();

            let component_id = if let Some(created) = registry.get(&name) {
                if created.kind != reference.kind {
                    return Err(OrchestrationError::ReferenceKindMismatch {
                        name,
                        expected: reference.kind,
                        actual: created.kind,
                    });
                }
                created.component_id.clone()
            } else {
                self.lookup_on_platform(component, reference.ref_field, &name, reference.kind)
                    .await?
            };

            debug!(
                component,
                field = reference.ref_field,
                referenced = %name,
                %component_id,
                "reference resolved"
            );
            fields.remove(reference.ref_field);
            fields.insert(
                reference.id_field.to_string(),
                Value::String(component_id),
            );
        }
        Ok(())
    }

    /// Query the platform for a live component with this name and kind.
    /// Exactly one match is required.
    async fn lookup_on_platform(
        &self,
        component: &str,
        field: &str,
        name: &str,
        kind: ComponentKind,
    ) -> Result<ComponentId, OrchestrationError> {
        let filter = ComponentFilter {
            kind: Some(kind),
            name: Some(name.to_string()),
        };
        let mut matches: Vec<ComponentSummary> = Vec::new();
        let mut page = self
            .platform
            .query_components(&filter)
            .await
            .map_err(|source| OrchestrationError::ResolutionQuery {
                name: name.to_string(),
                source,
            })?;
        loop {
            matches.extend(
                page.results
                    .into_iter()
                    .filter(|s| s.current_version && !s.deleted),
            );
            let Some(token) = page.query_token else {
                break;
            };
            page = self
                .platform
                .query_components_more(&token)
                .await
                .map_err(|source| OrchestrationError::ResolutionQuery {
                    name: name.to_string(),
                    source,
                })?;
        }

        match matches.len() {
            0 => Err(OrchestrationError::UnresolvedReference {
                component: component.to_string(),
                field: field.to_string(),
                name: name.to_string(),
            }),
            1 => Ok(matches.remove(0).component_id),
            count => Err(OrchestrationError::AmbiguousReference {
                component: component.to_string(),
                field: field.to_string(),
                name: name.to_string(),
                count,
            }),
        }
    }

    /// Resolve `folder_name` to a platform folder id, trying exact full path,
    /// then path suffix, then leaf name. Failures degrade to warnings: the
    /// component is still created, in the platform's default location.
    async fn resolve_folder(&self, spec: &mut ComponentSpec, warnings: &mut Vec<String>) {
        if spec.folder_id.is_some() || spec.folder_name.is_empty() || spec.folder_name == "Home" {
            return;
        }
        let filters = [
            FolderFilter::FullPathEquals(spec.folder_name.clone()),
            FolderFilter::FullPathEndsWith(spec.folder_name.clone()),
            FolderFilter::NameEquals(spec.folder_name.clone()),
        ];
        for filter in filters {
            match self.platform.query_folders(&filter).await {
                Ok(page) if page.results.len() == 1 => {
                    let folder = &page.results[0];
                    debug!(
                        component = %spec.name,
                        folder = %spec.folder_name,
                        folder_id = %folder.folder_id,
                        "folder resolved"
                    );
                    spec.folder_id = Some(folder.folder_id.clone());
                    return;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(component = %spec.name, folder = %spec.folder_name, error = %err, "folder query failed");
                    warnings.push(format!(
                        "folder lookup for `{}` failed: {err}",
                        spec.folder_name
                    ));
                    return;
                }
            }
        }
        warn!(component = %spec.name, folder = %spec.folder_name, "folder not resolved");
        warnings.push(format!(
            "folder `{}` not found for component `{}`; created without folderId",
            spec.folder_name, spec.name
        ));
    }
}

/// Topologically sort the batch by declared plus implied dependencies,
/// returning declaration indices in creation order.
///
/// Ties break toward declaration order, so the result is fully deterministic.
/// Dependencies naming components outside the batch impose no ordering; they
/// are resolved against the platform at creation time.
fn creation_order(specs: &[ComponentSpec]) -> Result<Vec<usize>, OrchestrationError> {
    let mut graph: DiGraph<usize, ()> = DiGraph::new();
    let mut by_name: HashMap<&str, NodeIndex> = HashMap::new();
    for (i, spec) in specs.iter().enumerate() {
        let node = graph.add_node(i);
        by_name.insert(spec.name.as_str(), node);
    }

    for (i, spec) in specs.iter().enumerate() {
        let dependent = NodeIndex::new(i);
        for dep in spec.all_dependencies() {
            if let Some(&provider) = by_name.get(dep.as_str()) {
                graph.update_edge(provider, dependent, ());
            }
        }
    }

    let mut in_degree: Vec<usize> = graph
        .node_indices()
        .map(|n| graph.neighbors_directed(n, Direction::Incoming).count())
        .collect();
    let mut ready: BTreeSet<usize> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, &d)| d == 0)
        .map(|(i, _)| i)
        .collect();

    let mut order = Vec::with_capacity(specs.len());
    while let Some(&i) = ready.iter().next() {
        ready.remove(&i);
        order.push(i);
        for succ in graph.neighbors_directed(NodeIndex::new(i), Direction::Outgoing) {
            let s = succ.index();
            in_degree[s] -= 1;
            if in_degree[s] == 0 {
                ready.insert(s);
            }
        }
    }

    if order.len() < specs.len() {
        let placed: BTreeSet<usize> = order.iter().copied().collect();
        let names = specs
            .iter()
            .enumerate()
            .filter(|(i, _)| !placed.contains(i))
            .map(|(_, s)| s.name.clone())
            .collect();
        return Err(OrchestrationError::CircularDependency { names });
    }
    Ok(order)
}
