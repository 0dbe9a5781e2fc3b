//! # Semdex
//!
//! **Semantic retrieval service for a local document tree.**
//!
//! Semdex ingests files from a workspace, splits them into overlapping
//! character chunks, embeds each chunk through an external provider, and
//! persists the vectors in PostgreSQL (pgvector). Similarity queries are
//! scoped by file and folder filters. The engine is exposed to AI
//! assistants over a stdio MCP surface and to operators over a small HTTP
//! console.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────────┐   ┌───────────────┐
//! │ Scanner  │──▶│  Index Engine     │──▶│  PostgreSQL    │
//! │ globs    │   │ chunk·embed·batch │   │  + pgvector    │
//! └──────────┘   └──────────────────┘   └──────┬────────┘
//!                                              │
//!                         ┌────────────────────┤
//!                         ▼                    ▼
//!                   ┌───────────┐        ┌───────────┐
//!                   │   stdio   │        │   HTTP    │
//!                   │   (MCP)   │        │  console  │
//!                   └───────────┘        └───────────┘
//! ```
//!
//! ## Data Flow
//!
//! 1. The **scanner** ([`scanner`]) walks the workspace and applies
//!    include/exclude globs.
//! 2. The **index engine** ([`indexer`]) diffs scan results against stored
//!    mtimes, prunes rows for vanished files, and re-indexes what changed.
//! 3. Files are reduced to plain text ([`extract`]) and split into
//!    overlapping windows with line ranges ([`chunker`]).
//! 4. Chunks are embedded in small concurrent batches ([`embedding`]) with
//!    retry, backoff, and cooperative cancellation.
//! 5. Rows land in the **vector store** ([`store`]), partitioned by
//!    workspace and model, guarded by a cross-process advisory lock.
//! 6. The **retrieval engine** ([`retrieval`]) embeds queries and filters
//!    results by file and folder scope.
//! 7. Progress streams to a per-workspace JSON-lines log ([`progress`])
//!    read back by the console ([`console`]).
//!
//! ## Workspace isolation
//!
//! Every persisted row carries a `workspace_id` derived from the
//! workspace's absolute path ([`workspace`]); searches never cross
//! workspaces, and embedding models version independently within one
//! workspace.
//!
//! ## Configuration
//!
//! Semdex is configured entirely from the process environment; see
//! [`config`] for the recognized keys and validation rules.

pub mod chunker;
pub mod config;
pub mod console;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod indexer;
pub mod mcp;
pub mod models;
pub mod progress;
pub mod retrieval;
pub mod scanner;
pub mod store;
pub mod workspace;
