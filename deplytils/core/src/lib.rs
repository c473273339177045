//! Deplytils Core - Class Caches and Release-Check Plumbing
//!
//! This crate provides two independent building blocks:
//!
//! - class-scoped computed attributes ([`ClassHandle`], [`ClassProperty`],
//!   [`CachedClassProperty`]) with explicit cache invalidation
//! - the collaborators of a release-readiness check: coverage measurement,
//!   a threshold gate, a project linter, test-suite runs and the
//!   [`ReleaseChecker`] that ties them together
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      release-ready (bin)                      │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                │ DeplytilsConfig
//! ┌──────────────────────────────┼───────────────────────────────┐
//! │                       ReleaseChecker                          │
//! │  ┌──────────┐  ┌───────────────────┐  ┌─────────┐  ┌────────┐ │
//! │  │   Lint   │  │  CoverageContext  │  │  Suites │  │  Gate  │ │
//! │  │(walkdir) │  │ MeasurementSession│  │ (procs) │  │        │ │
//! │  └──────────┘  └───────────────────┘  └─────────┘  └────────┘ │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use deplytils_core::ClassHandle;
//!
//! let config = ClassHandle::builder("Config")
//!     .cached_property("answer", |_class| 42_u32)
//!     .build();
//!
//! assert_eq!(config.read::<u32>("answer").unwrap(), 42);
//! assert_eq!(config.instantiate().read::<u32>("answer").unwrap(), 42);
//!
//! config.invalidate("answer").unwrap();
//! assert_eq!(config.read::<u32>("answer").unwrap(), 42);
//! ```
//!
//! # Module Overview
//!
//! - [`class_cache`]: class handles and cached/plain class properties
//! - [`measurement`]: coverage measurement sessions (external tool, mock)
//! - [`gate`]: coverage threshold comparison
//! - [`context`]: scoped measurement with nesting detection
//! - [`lint`]: project-wide lint runs
//! - [`suite`]: test-suite subprocesses and their outcomes
//! - [`checker`]: the release-readiness check
//! - [`config`]: TOML/environment configuration

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod checker;
pub mod class_cache;
pub mod config;
pub mod context;
pub mod gate;
pub mod lint;
pub mod measurement;
pub mod suite;

// Re-exports for convenience
pub use class_cache::{
    Access, CachedClassProperty, ClassAttribute, ClassBuilder, ClassCacheError, ClassHandle,
    ClassProperty, Instance, Rebind, Value, WeakClassHandle,
};
pub use context::{
    CoverageContext, CoverageError, CoverageOptions, DepthToken, NestingDepth, StrictCoverage,
};
pub use gate::{check_threshold, CoverageBelowThreshold};
pub use lint::{Lint, LintError, LintReport, ProjectLinter};
pub use measurement::{
    CoverageTool, MeasurementError, MeasurementSession, MockMeasurement, ReportKind,
};
pub use suite::{
    CommandSuite, PendingSuite, SuiteCommand, SuiteError, TestOutcome, TestSuite,
};

// Checker exports
pub use checker::ReleaseChecker;

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, DeplytilsConfig, DeplytilsToml,
};
