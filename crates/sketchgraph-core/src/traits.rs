use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{FeatureTree, Result};

/// A document listed inside a folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSummary {
    pub id: String,
    pub default_workspace_id: String,
    pub name: Option<String>,
}

/// A part-studio element of a document workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementSummary {
    pub id: String,
    pub name: Option<String>,
}

/// Read-only view of the CAD platform needed by the dependency extractor.
#[async_trait]
pub trait CadApi: Send + Sync {
    /// Folder that contains the document.
    async fn fetch_document_parent(&self, document_id: &str) -> Result<String>;

    /// Documents in a folder; other resource kinds are not returned.
    async fn list_folder_documents(&self, folder_id: &str) -> Result<Vec<DocumentSummary>>;

    /// Part-studio elements of a document workspace.
    async fn list_elements(&self, document_id: &str, workspace_id: &str) -> Result<Vec<ElementSummary>>;

    async fn fetch_feature_tree(
        &self,
        document_id: &str,
        workspace_id: &str,
        element_id: &str,
    ) -> Result<FeatureTree>;
}
