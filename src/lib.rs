//! # CalPilot
//!
//! A small web backend that serves pre-recorded sales-call records from a
//! JSON document store, exposes search and filter endpoints over them, and
//! forwards free-text questions about a transcript to a language-model API.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌────────────┐
//! │ RecordSource │──▶│  Processor  │──▶│ CallStore  │
//! │ file / S3    │   │ validate +  │   │ cache +    │
//! └──────────────┘   │ enrich      │   │ staleness  │
//!                    └─────────────┘   └─────┬──────┘
//!                                            │
//!                      ┌─────────────────────┤
//!                      ▼                     ▼
//!                ┌────────────┐       ┌──────────────┐
//!                │ CallService│       │ AnswerGateway│
//!                │ (queries)  │       │ (LLM Q&A)    │
//!                └─────┬──────┘       └──────┬───────┘
//!                      └──────────┬──────────┘
//!                                 ▼
//!                          ┌────────────┐
//!                          │ HTTP / CLI │
//!                          └────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML + environment configuration |
//! | [`error`] | Error taxonomy |
//! | [`logging`] | Tracing subscriber setup |
//! | [`models`] | Raw and enriched call records |
//! | [`processor`] | Record validation and enrichment |
//! | [`source`] | Local file and S3 backing sources |
//! | [`store`] | Cached call collection |
//! | [`query`] | Lookups, search, summaries, companies |
//! | [`qa`] | Transcript question answering |
//! | [`server`] | HTTP API |

pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod processor;
pub mod qa;
pub mod query;
pub mod server;
pub mod source;
pub mod store;
