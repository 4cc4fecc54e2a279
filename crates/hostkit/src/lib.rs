//! # HostKit
//!
//! A single-host deployment control plane: provisions, deploys, and
//! operates multiple isolated web-application projects on one Linux VPS.
//! Each project gets a dedicated Linux user, a supervised process, a
//! reserved port behind a reverse proxy, and a set of optional sidecars
//! (scheduled tasks, background workers, a database).
//!
//! ## Pipeline
//!
//! The core flow mirrors the CLI's command groups:
//!
//! 1. [`core::provision`] builds a project from nothing — user, home tree,
//!    main unit, and optional sidecars.
//! 2. [`core::deploy`] materializes and activates a new release, gated by
//!    the rate-limit and auto-pause state machines in [`core::ratelimit`].
//! 3. [`core::rollback`] reactivates a previous release, optionally
//!    restoring its checkpoint and env snapshot.
//! 4. [`core::checkpoint`] and [`core::release`] back both of the above:
//!    database dumps and materialized-copy release directories.
//! 5. [`core::scheduled_task`] and [`core::worker`] manage a project's
//!    long-running and cron-driven sidecar processes.
//!
//! ## Modules
//!
//! - [`core`] — the operations layer: release/checkpoint engines, the
//!   deploy and rollback pipelines, rate-limit/auto-pause, scheduled
//!   tasks, workers, and the provisioning orchestrator.
//! - [`types`] — domain types shared across every layer (`Project`,
//!   `Release`, `Checkpoint`, `Event`, error codes, ...).
//! - [`store`] — the SQLite-backed metadata store.
//! - [`config`] — `hostkit.toml` loading and CLI-override merging.
//!
//! For command-line usage, see the `hostkit-cli` crate.

pub use hostkit_core as core;
pub use hostkit_config as config;
pub use hostkit_store as store;
pub use hostkit_types as types;
