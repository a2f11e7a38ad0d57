use crate::assemble::StructuredDocument;
use crate::spec::ComponentKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::RwLock;
use thiserror::Error;
use uuid::Uuid;

/// Platform-assigned component identifier. Opaque to the engine.
pub type ComponentId = String;

/// Opaque failure from the platform. The engine never interprets or
/// retries these; they are surfaced to the caller with context.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("platform error {code}: {message}")]
pub struct PlatformError {
    pub code: String,
    pub message: String,
}

impl PlatformError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

// ── Query surface ──

#[derive(Debug, Clone, Default)]
pub struct ComponentFilter {
    pub kind: Option<ComponentKind>,
    pub name: Option<String>,
}

/// Folder lookup strategies, tried in this order by the orchestrator.
#[derive(Debug, Clone)]
pub enum FolderFilter {
    FullPathEquals(String),
    /// Matches full paths ending in `/<name>` — the caller may omit the
    /// account-root prefix.
    FullPathEndsWith(String),
    NameEquals(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentSummary {
    pub component_id: ComponentId,
    pub name: String,
    pub kind: ComponentKind,
    pub folder_name: String,
    pub current_version: bool,
    pub deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderSummary {
    pub folder_id: String,
    pub name: String,
    pub full_path: String,
}

/// One page of query results. `query_token` carries the continuation token
/// for the next page, if any.
#[derive(Debug, Clone)]
pub struct QueryPage<T> {
    pub results: Vec<T>,
    pub query_token: Option<String>,
}

impl<T> QueryPage<T> {
    pub fn single(results: Vec<T>) -> Self {
        Self {
            results,
            query_token: None,
        }
    }
}

// ── Collaborator contract ──

/// The platform collaborator the orchestrator depends on. `create_component`
/// is the only mutating operation; the queries back reference and folder
/// resolution. Idempotency is not assumed — retries are the caller's
/// responsibility.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    async fn create_component(
        &self,
        document: &StructuredDocument,
    ) -> Result<ComponentId, PlatformError>;

    async fn query_components(
        &self,
        filter: &ComponentFilter,
    ) -> Result<QueryPage<ComponentSummary>, PlatformError>;

    /// Fetch the next page for a continuation token from a previous query.
    async fn query_components_more(
        &self,
        token: &str,
    ) -> Result<QueryPage<ComponentSummary>, PlatformError>;

    async fn query_folders(
        &self,
        filter: &FolderFilter,
    ) -> Result<QueryPage<FolderSummary>, PlatformError>;
}

// ── In-memory platform ──

#[derive(Debug, Clone)]
pub struct ComponentRecord {
    pub summary: ComponentSummary,
    pub document: Option<StructuredDocument>,
}

#[derive(Default)]
struct Inner {
    components: Vec<ComponentRecord>,
    folders: Vec<FolderSummary>,
    fail_create_for: HashSet<String>,
    create_calls: usize,
}

/// In-memory platform for tests and POC use.
///
/// Supports seeding pre-existing components and folders, injecting create
/// failures by component name, and counting create calls.
#[derive(Default)]
pub struct InMemoryPlatform {
    inner: RwLock<Inner>,
}

impl InMemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_folders(self, folders: impl IntoIterator<Item = FolderSummary>) -> Self {
        {
            let mut inner = self.inner.write().expect("lock poisoned");
            inner.folders.extend(folders);
        }
        self
    }

    /// Seed a component that exists on the platform before the run.
    pub fn seed_component(
        &self,
        name: impl Into<String>,
        kind: ComponentKind,
        component_id: impl Into<ComponentId>,
    ) {
        let mut inner = self.inner.write().expect("lock poisoned");
        inner.components.push(ComponentRecord {
            summary: ComponentSummary {
                component_id: component_id.into(),
                name: name.into(),
                kind,
                folder_name: String::new(),
                current_version: true,
                deleted: false,
            },
            document: None,
        });
    }

    /// Make `create_component` fail for documents with this name.
    pub fn fail_create_for(&self, name: impl Into<String>) {
        let mut inner = self.inner.write().expect("lock poisoned");
        inner.fail_create_for.insert(name.into());
    }

    pub fn create_call_count(&self) -> usize {
        self.inner.read().expect("lock poisoned").create_calls
    }

    /// The stored document for a created component, if any.
    pub fn document_for(&self, component_id: &str) -> Option<StructuredDocument> {
        let inner = self.inner.read().expect("lock poisoned");
        inner
            .components
            .iter()
            .find(|r| r.summary.component_id == component_id)
            .and_then(|r| r.document.clone())
    }

    fn lock_error<T>(err: std::sync::PoisonError<T>) -> PlatformError {
        PlatformError::new("LOCK", err.to_string())
    }
}

#[async_trait]
impl PlatformClient for InMemoryPlatform {
    async fn create_component(
        &self,
        document: &StructuredDocument,
    ) -> Result<ComponentId, PlatformError> {
        let mut inner = self.inner.write().map_err(Self::lock_error)?;
        inner.create_calls += 1;
        if inner.fail_create_for.contains(&document.name) {
            return Err(PlatformError::new(
                "CONFLICT",
                format!("create rejected for `{}`", document.name),
            ));
        }
        let component_id = Uuid::new_v4().to_string();
        inner.components.push(ComponentRecord {
            summary: ComponentSummary {
                component_id: component_id.clone(),
                name: document.name.clone(),
                kind: document.kind,
                folder_name: document.folder_name.clone(),
                current_version: true,
                deleted: false,
            },
            document: Some(document.clone()),
        });
        Ok(component_id)
    }

    async fn query_components(
        &self,
        filter: &ComponentFilter,
    ) -> Result<QueryPage<ComponentSummary>, PlatformError> {
        let inner = self.inner.read().map_err(Self::lock_error)?;
        let results = inner
            .components
            .iter()
            .map(|r| &r.summary)
            .filter(|s| filter.kind.is_none_or(|k| s.kind == k))
            .filter(|s| filter.name.as_deref().is_none_or(|n| s.name == n))
            .cloned()
            .collect();
        Ok(QueryPage::single(results))
    }

    async fn query_components_more(
        &self,
        token: &str,
    ) -> Result<QueryPage<ComponentSummary>, PlatformError> {
        // Single-page store: every token is stale.
        Err(PlatformError::new(
            "NO_SUCH_PAGE",
            format!("unknown continuation token `{token}`"),
        ))
    }

    async fn query_folders(
        &self,
        filter: &FolderFilter,
    ) -> Result<QueryPage<FolderSummary>, PlatformError> {
        let inner = self.inner.read().map_err(Self::lock_error)?;
        let results = inner
            .folders
            .iter()
            .filter(|f| match filter {
                FolderFilter::FullPathEquals(path) => &f.full_path == path,
                FolderFilter::FullPathEndsWith(name) => {
                    f.full_path.ends_with(&format!("/{name}"))
                }
                FolderFilter::NameEquals(name) => &f.name == name,
            })
            .cloned()
            .collect();
        Ok(QueryPage::single(results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(name: &str, kind: ComponentKind) -> StructuredDocument {
        StructuredDocument {
            name: name.to_string(),
            kind,
            folder_name: "Home".to_string(),
            folder_id: None,
            description: String::new(),
            xml: format!("<doc name=\"{name}\"/>"),
        }
    }

    #[tokio::test]
    async fn test_create_and_query_round_trip() {
        let platform = InMemoryPlatform::new();
        let id = platform
            .create_component(&document("Transform Map", ComponentKind::Map))
            .await
            .unwrap();

        let page = platform
            .query_components(&ComponentFilter {
                kind: Some(ComponentKind::Map),
                name: Some("Transform Map".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(page.results.len(), 1);
        assert_eq!(page.results[0].component_id, id);
        assert!(page.results[0].current_version);
        assert!(page.query_token.is_none());

        assert!(platform.document_for(&id).is_some());
        assert_eq!(platform.create_call_count(), 1);
    }

    #[tokio::test]
    async fn test_query_filter_by_kind() {
        let platform = InMemoryPlatform::new();
        platform.seed_component("A", ComponentKind::Map, "id-a");
        platform.seed_component("A", ComponentKind::Process, "id-b");

        let maps = platform
            .query_components(&ComponentFilter {
                kind: Some(ComponentKind::Map),
                name: Some("A".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(maps.results.len(), 1);
        assert_eq!(maps.results[0].component_id, "id-a");

        let all = platform
            .query_components(&ComponentFilter::default())
            .await
            .unwrap();
        assert_eq!(all.results.len(), 2);
    }

    #[tokio::test]
    async fn test_create_failure_injection() {
        let platform = InMemoryPlatform::new();
        platform.fail_create_for("Doomed");
        let err = platform
            .create_component(&document("Doomed", ComponentKind::Process))
            .await
            .unwrap_err();
        assert_eq!(err.code, "CONFLICT");
        // The failed call still counts as an external call.
        assert_eq!(platform.create_call_count(), 1);
    }

    #[tokio::test]
    async fn test_folder_query_strategies() {
        let platform = InMemoryPlatform::new().with_folders([
            FolderSummary {
                folder_id: "f-1".to_string(),
                name: "Tests".to_string(),
                full_path: "Acme/Renera/Tests".to_string(),
            },
            FolderSummary {
                folder_id: "f-2".to_string(),
                name: "Prod".to_string(),
                full_path: "Acme/Renera/Prod".to_string(),
            },
        ]);

        let exact = platform
            .query_folders(&FolderFilter::FullPathEquals("Acme/Renera/Tests".to_string()))
            .await
            .unwrap();
        assert_eq!(exact.results[0].folder_id, "f-1");

        let suffix = platform
            .query_folders(&FolderFilter::FullPathEndsWith("Renera/Prod".to_string()))
            .await
            .unwrap();
        assert_eq!(suffix.results[0].folder_id, "f-2");

        let leaf = platform
            .query_folders(&FolderFilter::NameEquals("Tests".to_string()))
            .await
            .unwrap();
        assert_eq!(leaf.results[0].folder_id, "f-1");

        let none = platform
            .query_folders(&FolderFilter::NameEquals("Missing".to_string()))
            .await
            .unwrap();
        assert!(none.results.is_empty());
    }

    #[tokio::test]
    async fn test_stale_continuation_token() {
        let platform = InMemoryPlatform::new();
        let err = platform.query_components_more("tok-1").await.unwrap_err();
        assert_eq!(err.code, "NO_SUCH_PAGE");
    }
}
