// SPDX-License-Identifier: GPL-3.0-only

//! Processing pipelines between capture and the output file
//!
//! ```text
//! ┌──────────────┐     ┌───────────────────┐     ┌──────────────┐
//! │ Capture      │ ──▶ │  Recorder         │ ──▶ │ Temp file    │
//! │ (RGBA + PCM) │     │  - FilterChain    │     │              │
//! │              │     │  - Pixel pool     │     │              │
//! │              │     │  - MediaWriter    │     │              │
//! └──────────────┘     └───────────────────┘     └──────┬───────┘
//!                                                       │
//!                      ┌───────────────────┐     ┌──────▼───────┐
//!                      │  Output file      │ ◀── │ Transcoder   │
//!                      │  (portrait)       │     │ (rotate 90°) │
//!                      └───────────────────┘     └──────────────┘
//! ```
//!
//! - [`filter`]: per-frame image filters
//! - [`video`]: recording state machine and writers
//! - [`transcode`]: post-record rotation

pub mod filter;
pub mod transcode;
pub mod video;
