//! Drives the traversal over scopes and merges their results.
//!
//! Scopes are visited in a fixed order: the source element, the other
//! part studios of the source document, then every element of every other
//! document in the source folder. Feature trees are fetched concurrently
//! (bounded by [`ExtractionOptions::max_concurrent_fetches`]) but merged in
//! traversal order, so repeated runs over unchanged data produce identical
//! output.
//!
//! Failure policy is partial: a missing master sketch or an unreachable
//! source element aborts the run, while any other fetch failure drops only
//! the affected scope and is reported in [`Extraction::scope_errors`].

use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use sketchgraph_core::{
    extract_mate_connectors, extract_sketch_entities, CadApi, DependencyIndex, DocInfo,
    DocumentInfo, DocumentSummary, ElementInfo, ElementSummary, ExtractionSettings, FeatureTree,
    MateConnectorIndex, Result, ScopeError, ScopeId, SketchEntities, SketchGraphError,
};
use tracing::{debug, info, warn};

use crate::scope::{scan_scope, ScanContext, ScopeOutcome, ScopeRole};

#[derive(Debug, Clone)]
pub struct ExtractionOptions {
    pub max_concurrent_fetches: usize,
    pub include_sibling_elements: bool,
    pub include_folder_documents: bool,
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        ExtractionSettings::default().into()
    }
}

impl From<ExtractionSettings> for ExtractionOptions {
    fn from(settings: ExtractionSettings) -> Self {
        Self {
            max_concurrent_fetches: settings.max_concurrent_fetches.max(1),
            include_sibling_elements: settings.include_sibling_elements,
            include_folder_documents: settings.include_folder_documents,
        }
    }
}

/// The element holding the master sketches and the sketches to extract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionRequest {
    pub document_id: String,
    pub workspace_id: String,
    pub element_id: String,
    pub sketch_names: Vec<String>,
}

impl ExtractionRequest {
    pub fn new(
        document_id: impl Into<String>,
        workspace_id: impl Into<String>,
        element_id: impl Into<String>,
        sketch_names: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            workspace_id: workspace_id.into(),
            element_id: element_id.into(),
            sketch_names: sketch_names.into_iter().map(Into::into).collect(),
        }
    }

    fn source_scope(&self) -> ScopeId {
        ScopeId::element(&self.document_id, &self.workspace_id, &self.element_id)
    }
}

/// Result of one extraction run.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    /// One entry per requested sketch name, in request order.
    pub entities_by_sketch: Vec<SketchEntities>,
    pub dependency_index: DependencyIndex,
    pub doc_info: DocInfo,
    pub mate_connectors: MateConnectorIndex,
    /// Scopes whose contribution was dropped.
    pub scope_errors: Vec<ScopeError>,
    pub scopes_scanned: usize,
}

impl Extraction {
    pub fn edge_count(&self) -> usize {
        self.dependency_index.values().map(Vec::len).sum()
    }

    pub fn is_partial(&self) -> bool {
        !self.scope_errors.is_empty()
    }
}

/// A scope waiting for its feature tree.
#[derive(Debug, Clone)]
struct ScopeTask {
    scope: ScopeId,
    element_name: Option<String>,
}

pub struct DependencyExtractor<A: CadApi> {
    api: Arc<A>,
    options: ExtractionOptions,
}

impl<A: CadApi> DependencyExtractor<A> {
    pub fn new(api: Arc<A>, options: ExtractionOptions) -> Self {
        Self { api, options }
    }

    pub fn options(&self) -> &ExtractionOptions {
        &self.options
    }

    pub async fn extract(&self, request: &ExtractionRequest) -> Result<Extraction> {
        let started = Instant::now();
        let source = request.source_scope();
        info!(
            document_id = %request.document_id,
            element_id = %request.element_id,
            sketches = ?request.sketch_names,
            "starting dependency extraction"
        );

        let source_tree = self
            .api
            .fetch_feature_tree(&request.document_id, &request.workspace_id, &request.element_id)
            .await
            .map_err(|err| SketchGraphError::ScopeFetch {
                scope: source.clone(),
                reason: err.to_string(),
            })?;

        let mut entities_by_sketch = Vec::with_capacity(request.sketch_names.len());
        for name in &request.sketch_names {
            entities_by_sketch.push(extract_sketch_entities(&source_tree, name, &request.element_id)?);
        }

        let mut dependency_index = DependencyIndex::new();
        for sketch in &entities_by_sketch {
            for entity_id in sketch.entity_ids() {
                dependency_index.entry(entity_id.to_string()).or_default();
            }
        }

        let ctx = Arc::new(ScanContext::new(
            &request.document_id,
            &request.element_id,
            entities_by_sketch.iter().map(|s| s.feature_id.clone()).collect(),
            dependency_index.keys().cloned(),
        ));

        let mut acc = Accumulator {
            extraction: Extraction {
                mate_connectors: extract_mate_connectors(&source_tree),
                entities_by_sketch,
                dependency_index,
                doc_info: DocInfo::new(),
                scope_errors: Vec::new(),
                scopes_scanned: 0,
            },
        };

        let mut source_doc = DocumentInfo::new(&request.workspace_id, None);
        source_doc
            .elements
            .insert(request.element_id.clone(), ElementInfo::default());
        acc.extraction
            .doc_info
            .insert(request.document_id.clone(), source_doc);

        let outcome = run_scan(source.clone(), ScopeRole::Source, source_tree, ctx.clone()).await?;
        acc.merge(outcome, None);

        self.scan_source_document(request, &ctx, &mut acc).await;
        if self.options.include_folder_documents {
            self.scan_folder_documents(request, &ctx, &mut acc).await;
        }

        let extraction = acc.extraction;
        info!(
            scopes = extraction.scopes_scanned,
            edges = extraction.edge_count(),
            errors = extraction.scope_errors.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "dependency extraction finished"
        );
        Ok(extraction)
    }

    /// Name the source element and scan its sibling part studios.
    async fn scan_source_document(
        &self,
        request: &ExtractionRequest,
        ctx: &Arc<ScanContext>,
        acc: &mut Accumulator,
    ) {
        let document_scope = ScopeId::document(&request.document_id, &request.workspace_id);
        let elements = match self
            .api
            .list_elements(&request.document_id, &request.workspace_id)
            .await
        {
            Ok(elements) => elements,
            Err(err) => {
                acc.fail(document_scope, &err);
                return;
            }
        };

        let (source, siblings): (Vec<ElementSummary>, Vec<ElementSummary>) = elements
            .into_iter()
            .partition(|e| e.id == request.element_id);
        if let Some(element) = source.into_iter().next() {
            acc.element_mut(&request.document_id, &request.element_id).name = element.name;
        }

        if !self.options.include_sibling_elements {
            return;
        }

        let tasks = siblings
            .into_iter()
            .map(|e| ScopeTask {
                scope: ScopeId::element(&request.document_id, &request.workspace_id, e.id),
                element_name: e.name,
            })
            .collect();
        self.scan_tasks(tasks, ctx, acc).await;
    }

    /// Scan every element of every other document in the source folder.
    async fn scan_folder_documents(
        &self,
        request: &ExtractionRequest,
        ctx: &Arc<ScanContext>,
        acc: &mut Accumulator,
    ) {
        let document_scope = ScopeId::document(&request.document_id, &request.workspace_id);
        let documents = match self.list_folder(&request.document_id).await {
            Ok(documents) => documents,
            Err(err) => {
                acc.fail(document_scope, &err);
                return;
            }
        };

        let (source, others): (Vec<DocumentSummary>, Vec<DocumentSummary>) = documents
            .into_iter()
            .partition(|d| d.id == request.document_id);
        if let Some(document) = source.into_iter().next() {
            if let Some(info) = acc.extraction.doc_info.get_mut(&request.document_id) {
                info.name = document.name;
            }
        }

        let listings: Vec<(DocumentSummary, Result<Vec<ElementSummary>>)> = stream::iter(others)
            .map(|document| async move {
                let elements = self
                    .api
                    .list_elements(&document.id, &document.default_workspace_id)
                    .await;
                (document, elements)
            })
            .buffered(self.options.max_concurrent_fetches)
            .collect()
            .await;

        let mut tasks = Vec::new();
        for (document, elements) in listings {
            let scope = ScopeId::document(&document.id, &document.default_workspace_id);
            match elements {
                Ok(elements) => {
                    acc.extraction.doc_info.insert(
                        document.id.clone(),
                        DocumentInfo::new(&document.default_workspace_id, document.name.clone()),
                    );
                    tasks.extend(elements.into_iter().map(|e| ScopeTask {
                        scope: ScopeId::element(&document.id, &document.default_workspace_id, e.id),
                        element_name: e.name,
                    }));
                }
                Err(err) => acc.fail(scope, &err),
            }
        }

        self.scan_tasks(tasks, ctx, acc).await;
    }

    async fn list_folder(&self, document_id: &str) -> Result<Vec<DocumentSummary>> {
        let folder_id = self.api.fetch_document_parent(document_id).await?;
        debug!(document_id, folder_id = %folder_id, "listing folder documents");
        self.api.list_folder_documents(&folder_id).await
    }

    /// Fetch and scan sibling scopes concurrently, merging in task order.
    async fn scan_tasks(&self, tasks: Vec<ScopeTask>, ctx: &Arc<ScanContext>, acc: &mut Accumulator) {
        if tasks.is_empty() {
            return;
        }

        let results: Vec<(ScopeTask, Result<ScopeOutcome>)> = stream::iter(tasks)
            .map(|task| {
                let ctx = Arc::clone(ctx);
                async move {
                    let outcome = self.fetch_and_scan(&task.scope, ctx).await;
                    (task, outcome)
                }
            })
            .buffered(self.options.max_concurrent_fetches)
            .collect()
            .await;

        for (task, result) in results {
            match result {
                Ok(outcome) => acc.merge(outcome, Some(task.element_name)),
                Err(err) => acc.fail(task.scope, &err),
            }
        }
    }

    async fn fetch_and_scan(&self, scope: &ScopeId, ctx: Arc<ScanContext>) -> Result<ScopeOutcome> {
        let element_id = scope.element_id.as_deref().unwrap_or_default();
        debug!(scope = %scope, "fetching feature tree");
        let tree = self
            .api
            .fetch_feature_tree(&scope.document_id, &scope.workspace_id, element_id)
            .await?;
        run_scan(scope.clone(), ScopeRole::Sibling, tree, ctx).await
    }
}

/// Convenience entry point with default options.
pub async fn extract_dependencies<A: CadApi>(
    api: Arc<A>,
    document_id: &str,
    workspace_id: &str,
    element_id: &str,
    sketch_names: &[&str],
) -> Result<Extraction> {
    let request = ExtractionRequest::new(
        document_id,
        workspace_id,
        element_id,
        sketch_names.iter().copied(),
    );
    DependencyExtractor::new(api, ExtractionOptions::default())
        .extract(&request)
        .await
}

/// Scanning is CPU-bound, so it runs off the async executor.
async fn run_scan(
    scope: ScopeId,
    role: ScopeRole,
    tree: FeatureTree,
    ctx: Arc<ScanContext>,
) -> Result<ScopeOutcome> {
    let task_scope = scope.clone();
    tokio::task::spawn_blocking(move || scan_scope(&task_scope, role, &tree, &ctx))
        .await
        .map_err(|err| SketchGraphError::ScopeFetch {
            scope,
            reason: format!("scan task failed: {}", err),
        })
}

/// Single merge stage for scope results.
struct Accumulator {
    extraction: Extraction,
}

impl Accumulator {
    fn element_mut(&mut self, document_id: &str, element_id: &str) -> &mut ElementInfo {
        let document = self
            .extraction
            .doc_info
            .entry(document_id.to_string())
            .or_insert_with(|| DocumentInfo::new("", None));
        document
            .elements
            .entry(element_id.to_string())
            .or_default()
    }

    /// Commit a completed scope. `element_name` is `None` for the source
    /// element, whose entry already exists.
    fn merge(&mut self, outcome: ScopeOutcome, element_name: Option<Option<String>>) {
        let ScopeOutcome {
            scope,
            features,
            edges,
            activated_by,
            ..
        } = outcome;
        let element_id = scope.element_id.clone().unwrap_or_default();

        let element = self.element_mut(&scope.document_id, &element_id);
        if let Some(name) = element_name {
            element.name = name;
        }
        element.features.extend(features);

        let edge_count = edges.len();
        for (entity_id, reference) in edges {
            if let Some(references) = self.extraction.dependency_index.get_mut(&entity_id) {
                references.push(reference);
            }
        }

        self.extraction.scopes_scanned += 1;
        debug!(
            scope = %scope,
            activated_by = activated_by.as_deref().unwrap_or("-"),
            edges = edge_count,
            "scope merged"
        );
    }

    fn fail(&mut self, scope: ScopeId, error: &SketchGraphError) {
        warn!(scope = %scope, error = %error, "dropping scope");
        self.extraction
            .scope_errors
            .push(ScopeError::new(scope, error));
    }
}
