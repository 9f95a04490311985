//! # docmem
//!
//! A local, re-indexable memory of document and code collections for AI
//! assistants.
//!
//! A directory tree is scanned, its supported files are extracted and
//! chunked, every chunk is embedded, and the chunks are written to one
//! vector collection per named knowledge base. Assistants then search one or
//! all knowledge bases by meaning, over HTTP or MCP stdio.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌────────────┐   ┌──────────────┐
//! │   Scan   │──▶│ Extract +    │──▶│   Embed    │──▶│ VectorStore  │
//! │ walkdir  │   │ Chunk        │   │ (cached)   │   │ kb_<name>_v2 │
//! └──────────┘   └──────────────┘   └────────────┘   └──────┬───────┘
//!                                                           │
//!                         ┌──────────────┬──────────────────┤
//!                         ▼              ▼                  ▼
//!                    ┌─────────┐   ┌──────────┐      ┌───────────┐
//!                    │   CLI   │   │   HTTP   │      │ MCP stdio │
//!                    └─────────┘   └──────────┘      └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docmem init                          # write config, create database
//! docmem ingest handbook ./docs        # index a tree as "handbook"
//! docmem search "retry policy" --kb handbook
//! docmem serve mcp                     # expose tools to an assistant
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Chunks, knowledge-base metadata, search results |
//! | [`scan`] | Directory walk, ignore rules, file classification |
//! | [`extract`] | Text extraction per document type |
//! | [`chunk`] | Heading-aware text chunking |
//! | [`embedding`] | Embedding providers and the caching [`embedding::Embedder`] |
//! | [`store`] | Vector store trait, SQLite and in-memory backends |
//! | [`ingest`] | Scan → chunk → embed → write pipeline |
//! | [`search`] | Multi-collection semantic search with result cache |
//! | [`lifecycle`] | List, stats, rename, delete |
//! | [`tools`] | Assistant tool surface shared by HTTP and MCP |
//! | [`server`] | HTTP API |
//! | [`mcp`] | MCP stdio bridge |

pub mod cache;
pub mod chunk;
pub mod config;
pub mod context;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod lifecycle;
pub mod logging;
pub mod mcp;
pub mod migrate;
pub mod models;
pub mod scan;
pub mod search;
pub mod server;
pub mod store;
pub mod tools;
