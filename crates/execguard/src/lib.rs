//! execguard: the execution safety control plane of an agent host.
//!
//! Decides whether a proposed shell command or container mount configuration
//! is safe, then runs approved work under bounded, cancellable supervision.
//!
//! - [`analysis`] parses shell text into resolved command segments
//! - [`policy`] evaluates segments against the allowlist and safe bins
//! - [`sandbox`] validates bind mounts, network mode and isolation profiles
//! - [`process`] spawns, times out, cancels and reaps processes
//!
//! Analysis and allowlist outcomes are values the caller can act on, for
//! example by prompting the user. Sandbox violations are always errors.

#![forbid(unsafe_code)]

pub mod analysis;
pub mod config;
pub mod error;
pub mod model;
pub mod policy;
pub mod process;
pub mod sandbox;

pub use crate::model::*;
