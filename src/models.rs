//! Core data models shared by the scanner, chunker, store and search.
//!
//! [`ScannedFile`] is ephemeral scan output. [`Chunk`] is the persisted unit
//! of retrieval: chunker output ([`crate::chunk::TextChunk`]) plus the
//! provenance assigned at ingest time. [`KnowledgeBaseMeta`] is the identity
//! record each collection carries.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Document types the scanner accepts. Anything else is reported as unsupported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Markdown,
    Text,
    Rst,
    Html,
    Pdf,
    Docx,
    Pptx,
    Xlsx,
    Code,
    Data,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Markdown => "markdown",
            DocumentType::Text => "text",
            DocumentType::Rst => "rst",
            DocumentType::Html => "html",
            DocumentType::Pdf => "pdf",
            DocumentType::Docx => "docx",
            DocumentType::Pptx => "pptx",
            DocumentType::Xlsx => "xlsx",
            DocumentType::Code => "code",
            DocumentType::Data => "data",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "markdown" => DocumentType::Markdown,
            "text" => DocumentType::Text,
            "rst" => DocumentType::Rst,
            "html" => DocumentType::Html,
            "pdf" => DocumentType::Pdf,
            "docx" => DocumentType::Docx,
            "pptx" => DocumentType::Pptx,
            "xlsx" => DocumentType::Xlsx,
            "code" => DocumentType::Code,
            "data" => DocumentType::Data,
            _ => return None,
        })
    }

    /// Binary formats go through [`crate::extract`] instead of a UTF-8 read.
    pub fn is_binary(&self) -> bool {
        matches!(
            self,
            DocumentType::Pdf | DocumentType::Docx | DocumentType::Pptx | DocumentType::Xlsx
        )
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One file seen by the scanner.
#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub path: PathBuf,
    /// Path relative to the scan root, `/`-separated.
    pub relative_path: String,
    /// Lowercased extension including the dot (`".md"`), empty if none.
    pub extension: String,
    pub supported: bool,
    pub document_type: Option<DocumentType>,
    pub language: Option<String>,
    pub is_test: bool,
    pub size_bytes: u64,
}

/// How a chunk's boundaries were produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    /// A whole heading-bounded span.
    Section,
    /// Split on a paragraph or line boundary.
    Paragraph,
    /// Split on a sentence, clause, word or raw character boundary.
    Fragment,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Section => "section",
            ChunkKind::Paragraph => "paragraph",
            ChunkKind::Fragment => "fragment",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "section" => Some(ChunkKind::Section),
            "paragraph" => Some(ChunkKind::Paragraph),
            "fragment" => Some(ChunkKind::Fragment),
            _ => None,
        }
    }
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted chunk record.
///
/// `id` is a deterministic function of file path, ingestion timestamp and
/// ordinal, so a re-ingest writes fresh records and the previous set is
/// removed rather than patched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub kb_name: String,
    pub file_path: String,
    pub relative_path: String,
    pub chunk_index: usize,
    pub content: String,
    pub content_hash: String,
    pub kind: ChunkKind,
    pub heading_path: Vec<String>,
    pub start_line: usize,
    pub end_line: usize,
    pub start_offset: usize,
    pub end_offset: usize,
    pub token_estimate: usize,
    pub has_context: bool,
    pub ingestion_timestamp: i64,
    pub document_type: DocumentType,
    pub language: Option<String>,
    pub is_test: bool,
}

/// A ranked hit returned by the search service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub knowledge_base: String,
    pub file_path: String,
    pub relative_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub chunk_kind: ChunkKind,
    pub heading_path: Vec<String>,
    pub content: String,
    /// Similarity in `[0.0, 1.0]`, higher is more relevant.
    pub score: f64,
    pub document_type: DocumentType,
    pub language: Option<String>,
}

/// Identity metadata carried by every knowledge-base collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBaseMeta {
    pub name: String,
    pub collection: String,
    pub root_path: String,
    pub file_count: usize,
    pub chunk_count: usize,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
    pub last_ingested_at: i64,
    pub schema_version: u32,
    pub embedding_model: String,
    pub dims: usize,
}

/// Format a millisecond timestamp as ISO 8601.
pub fn format_ts_iso(ts_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ts_ms)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts_ms.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_type_roundtrip_names() {
        for t in [
            DocumentType::Markdown,
            DocumentType::Pdf,
            DocumentType::Code,
            DocumentType::Data,
        ] {
            assert_eq!(DocumentType::parse(t.as_str()), Some(t));
        }
        assert_eq!(DocumentType::parse("exe"), None);
    }

    #[test]
    fn test_binary_types() {
        assert!(DocumentType::Pdf.is_binary());
        assert!(DocumentType::Xlsx.is_binary());
        assert!(!DocumentType::Markdown.is_binary());
    }

    #[test]
    fn test_chunk_kind_serializes_lowercase() {
        let json = serde_json::to_string(&ChunkKind::Section).unwrap();
        assert_eq!(json, "\"section\"");
    }

    #[test]
    fn test_format_ts_iso() {
        assert_eq!(format_ts_iso(0), "1970-01-01T00:00:00Z");
    }
}
