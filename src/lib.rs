//! # faultline
//!
//! LLM-assisted fault localization over a reference repository (ORIG) and a
//! mutant of it (MUT).
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Builders    │──▶│  Artifacts   │──▶│  Chunking    │
//! │ bundle/graph │   │ data/{ver}/  │   │ + coverage,  │
//! └──────────────┘   └──────────────┘   │   issues     │
//!                                       └──────┬───────┘
//!                         ┌────────────────────┤
//!                         ▼                    ▼
//!                  ┌─────────────┐      ┌─────────────┐      ┌──────────┐
//!                  │ Index ORIG  │─────▶│ Detect MUT  │─────▶│  Report  │
//!                  │ (summaries) │      │ (verdicts)  │      │ metrics  │
//!                  └─────────────┘      └─────────────┘      └──────────┘
//! ```
//!
//! Pipeline logic lives in `faultline-core`; this crate supplies the file
//! store, the Ollama client, the external artifact builders, progress
//! output and configuration.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`fs_store`] | Artifacts, JSONL caches and reports on disk |
//! | [`ollama`] | Ollama `/api/generate` client with retries |
//! | [`builders`] | External artifact builder commands |
//! | [`progress`] | Stderr progress and per-run trace log |
//! | [`run`] | One pipeline run from a config |

pub mod builders;
pub mod config;
pub mod fs_store;
pub mod ollama;
pub mod progress;
pub mod run;
