//! # askdoc
//!
//! A local-first document question-answering server. Upload PDF, DOCX, or
//! plain-text files, then ask questions against them; every answer carries
//! provenance references (page, section, or line range) pointing back into
//! the uploaded document. All language-model calls go to a local Ollama
//! runtime, so nothing leaves the machine.
//!
//! ## Architecture
//!
//! ```text
//!   upload bytes                     question
//!        │                              │
//!        ▼                              ▼
//!   ┌─────────┐   ┌─────────┐     ┌──────────┐   ┌──────────┐
//!   │ extract │──▶│  chunk  │──┬─▶│  score   │──▶│  answer  │
//!   └─────────┘   └─────────┘  │  └──────────┘   └──────────┘
//!    units with    overlapping │    one rating        one
//!    locators      windows     │    call per       compose call
//!                              │    chunk              │
//!                         ┌────▼────┐            ┌─────▼─────┐
//!                         │  store  │            │  gateway  │──▶ Ollama
//!                         └─────────┘            └───────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Shared data types: locators, units, chunks, answers |
//! | [`extract`] | Format-specific text extraction (PDF, DOCX, TXT) |
//! | [`chunk`] | Overlapping chunk windows with locator tracking |
//! | [`store`] | In-memory process-lifetime document store |
//! | [`gateway`] | Ollama client behind the [`gateway::ModelGateway`] trait |
//! | [`score`] | Per-chunk LLM relevance rating and ranking |
//! | [`answer`] | Prompt assembly, citation parsing, confidence grading |
//! | [`ingest`] | Upload pipeline: extract, chunk, store, archive |
//! | [`server`] | Axum JSON + SSE HTTP API |
//! | [`config`] | TOML configuration with defaults |

pub mod answer;
pub mod chunk;
pub mod config;
pub mod extract;
pub mod gateway;
pub mod ingest;
pub mod models;
pub mod score;
pub mod server;
pub mod store;
