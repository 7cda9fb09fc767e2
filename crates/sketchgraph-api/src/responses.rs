use serde::Deserialize;
use sketchgraph_core::{DocumentSummary, ElementSummary, Result, SketchGraphError};

/// Resource type of folder items that are documents.
pub const DOCUMENT_RESOURCE_TYPE: &str = "document";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentResponse {
    #[serde(default)]
    pub parent_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WorkspaceRef {
    pub id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub default_workspace: Option<WorkspaceRef>,
}

#[derive(Debug, Deserialize)]
pub struct FolderResponse {
    #[serde(default)]
    pub items: Vec<TreeNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementResponse {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

pub fn parse_document_parent(body: &str) -> Result<String> {
    let document: DocumentResponse = serde_json::from_str(body)?;
    document
        .parent_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| SketchGraphError::Api("document has no parent folder".to_string()))
}

/// Documents of a folder listing. Sub-folders and other resources are skipped.
pub fn parse_folder_documents(body: &str) -> Result<Vec<DocumentSummary>> {
    let folder: FolderResponse = serde_json::from_str(body)?;
    folder
        .items
        .into_iter()
        .filter(|item| item.resource_type.as_deref() == Some(DOCUMENT_RESOURCE_TYPE))
        .map(|item| {
            let workspace = item.default_workspace.ok_or_else(|| {
                SketchGraphError::Api(format!("document {} has no default workspace", item.id))
            })?;
            Ok(DocumentSummary {
                id: item.id,
                default_workspace_id: workspace.id,
                name: item.name,
            })
        })
        .collect()
}

pub fn parse_elements(body: &str) -> Result<Vec<ElementSummary>> {
    let elements: Vec<ElementResponse> = serde_json::from_str(body)?;
    Ok(elements
        .into_iter()
        .map(|e| ElementSummary {
            id: e.id,
            name: e.name,
        })
        .collect())
}
