//! Query-side engine: embed the query, delegate similarity search to the
//! store, and narrow the results by scope.
//!
//! Scope semantics: `files` and `folders` combine by intersection (AND);
//! entries within one list combine by union (OR); an empty list imposes no
//! constraint. The exact-path `files` filter is pushed into the store;
//! `folders` filtering happens here, in memory, after each folder value is
//! converted to a glob.

use std::path::Path;

use globset::{Glob, GlobSetBuilder};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::embedding::EmbeddingClient;
use crate::error::{Error, Result};
use crate::store::VectorStore;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchScope {
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub folders: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub min_similarity: Option<f32>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub scope: SearchScope,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub path: String,
    pub content: String,
    pub similarity: f32,
    pub start_line: usize,
    pub end_line: usize,
    /// Absolute `file://` URL for editor navigation.
    pub url: String,
}

/// Convert one `scope.folders` value into a glob pattern:
///
/// - contains `*` → used verbatim
/// - starts with `/` → anchored at the workspace root (`src/x` → `src/x/**`)
/// - bare name → matches the folder at any depth (`**/x/**`)
pub fn folder_glob(folder: &str) -> String {
    if folder.contains('*') {
        folder.to_string()
    } else if let Some(anchored) = folder.strip_prefix('/') {
        format!("{}/**", anchored.trim_end_matches('/'))
    } else {
        format!("**/{}/**", folder.trim_matches('/'))
    }
}

/// Run a similarity search.
pub async fn search(
    store: &VectorStore,
    client: &dyn EmbeddingClient,
    config: &Config,
    workspace_root: &Path,
    request: &SearchRequest,
) -> Result<Vec<SearchResult>> {
    if request.query.trim().is_empty() {
        return Ok(Vec::new());
    }

    let min_similarity = request.min_similarity.unwrap_or(config.min_similarity);
    let limit = request
        .limit
        .unwrap_or(config.max_results)
        .min(config.max_chunks_per_query);

    let query_vector = client.embed(&request.query).await?;

    let scope_files = (!request.scope.files.is_empty()).then_some(request.scope.files.as_slice());
    let hits = store
        .similar(&query_vector, limit, min_similarity, scope_files)
        .await?;

    let hits = if request.scope.folders.is_empty() {
        hits
    } else {
        let mut builder = GlobSetBuilder::new();
        for folder in &request.scope.folders {
            let pattern = folder_glob(folder);
            let glob = Glob::new(&pattern).map_err(|e| {
                Error::Config(format!("invalid folder scope '{folder}' ({pattern}): {e}"))
            })?;
            builder.add(glob);
        }
        let set = builder
            .build()
            .map_err(|e| Error::Config(format!("cannot compile folder scope: {e}")))?;
        hits.into_iter().filter(|h| set.is_match(&h.path)).collect()
    };

    Ok(hits
        .into_iter()
        .map(|h| {
            let url = format!("file://{}", workspace_root.join(&h.path).display());
            SearchResult {
                path: h.path,
                content: h.content,
                similarity: h.similarity,
                start_line: h.start_line,
                end_line: h.end_line,
                url,
            }
        })
        .collect())
}
