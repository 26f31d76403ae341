//! # Askbase
//!
//! A retrieval-augmented question answering engine over a local
//! knowledge base.
//!
//! Askbase ingests documents (plain text, Markdown, HTML), chunks them
//! with token-aware overlap, embeds the chunks, and answers questions
//! through hybrid search (BM25 keyword + cosine vector) with weighted
//! score fusion. Chat messages can be recorded and rolled up into daily
//! digests, which are embedded and searched alongside document chunks.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌───────────┐
//! │ Documents │──▶│   Pipeline    │──▶│  SQLite    │
//! │ & Messages│   │ Chunk+Embed  │   │ FTS5+Vec  │
//! └───────────┘   └──────────────┘   └────┬──────┘
//!                                         │
//!                     ┌───────────────────┤
//!                     ▼                   ▼
//!                ┌──────────┐       ┌───────────┐
//!                │   CLI    │       │ Scheduler  │
//!                │(askbase) │       │ digests    │
//!                └──────────┘       └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! askbase init                       # create database
//! askbase upload docs/handbook.md    # ingest a document
//! askbase ask "how do refunds work?"
//! askbase search "deployment"
//! askbase schedule                   # run timer jobs in the foreground
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`chunk`] | Token-aware text chunking |
//! | [`llm`] | Embedding and chat-completion providers |
//! | [`embed`] | Embedding persistence and reindexing |
//! | [`retrieve`] | Hybrid search and answer assembly |
//! | [`digest`] | Daily chat digests and message retention |
//! | [`scheduler`] | Timer-driven digest and cleanup jobs |
//! | [`ingest`] | Document upload pipeline |
//! | [`repo`] | Data access layer |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod config;
pub mod db;
pub mod digest;
pub mod embed;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod repo;
pub mod retrieve;
pub mod scheduler;
