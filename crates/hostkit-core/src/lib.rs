//! Engine layer: every staged operation HostKit exposes, independent of
//! the CLI that drives it. Each module owns one subsystem from the
//! control-plane spec — releases, checkpoints, rate limiting, the deploy
//! and rollback pipelines, scheduled tasks, workers, and provisioning —
//! and all of them compose the same lower crates (`hostkit-store` for
//! persistence, `hostkit-fs` for the on-disk project layout,
//! `hostkit-supervisor` for the init system, `hostkit-git`/`hostkit-process`
//! for materializing and building a release).

pub mod checkpoint;
pub mod deploy;
pub mod deprovision;
pub mod provision;
pub mod ratelimit;
pub mod release;
pub mod reporter;
pub mod rollback;
pub mod scheduled_task;
pub mod sudoers;
pub mod worker;

pub use reporter::{NullReporter, Reporter};
