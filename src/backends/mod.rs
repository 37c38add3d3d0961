// SPDX-License-Identifier: GPL-3.0-only

//! Device access for the capture pipeline
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                 FilterCam                   │
//! └────────────────────┬────────────────────────┘
//!                      │
//! ┌────────────────────┴────────────────────────┐
//! │              Backend Layer                  │
//! │  ┌─────────────┐    ┌──────────────────┐    │
//! │  │    Audio    │    │     Camera       │    │
//! │  │ (PCM chunks)│    │ (session, devs)  │    │
//! │  └─────────────┘    └──────────────────┘    │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! - [`audio`]: audio chunk and format types
//! - [`camera`]: device traits, capture session and providers

pub mod audio;
pub mod camera;
