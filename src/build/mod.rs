//! Build coordination
//!
//! Ensures that when many worker processes start at once, exactly one of
//! them runs the application's build command and the rest reuse its output.
//!
//! # Protocol
//!
//! | Step | Action |
//! |------|--------|
//! | 1 | Record the start time once |
//! | 2 | Exclusive-create the application's lock file |
//! | 3 | On contention, drop a stale lock and retry, or sleep and retry |
//! | 4 | Holding the lock, skip the build if the marker is fresh |
//! | 5 | Otherwise run the build command |
//! | 6 | Release the lock on every exit path |

pub mod coordinator;
pub mod marker;
pub mod runner;

pub use coordinator::{application_name, BuildCoordinator, BuildObserver, BuildOutcome, BuildReport};
pub use marker::{BuildMarker, Freshness};
pub use runner::{BuildCommand, BuildOutput, BuildRunner, ShellBuildRunner};
