//! Supervised execution of approved commands.
//!
//! The supervisor is the only component that touches live OS processes. Each
//! run moves through `starting → running → exiting → exited`; the final
//! transition happens exactly once, whichever of natural exit, timeout or
//! cancel gets there first.
//!
//! # Key Types
//!
//! - [`ProcessSupervisor`] - spawns runs and owns the run registry
//! - [`ManagedRun`] - handle with `cancel`, `wait` and stdin
//! - [`ProcessTreeTerminator`] - graceful-then-forceful tree kill
//!
//! # Example
//!
//! ```no_run
//! use execguard::process::{ProcessSupervisor, SpawnInput};
//!
//! # async fn example() -> execguard::error::GuardResult<()> {
//! let supervisor = ProcessSupervisor::default();
//! let run = supervisor
//!     .spawn(SpawnInput::new(["/bin/echo", "hello"]).no_output_timeout_ms(5_000))
//!     .await?;
//! let exit = run.wait().await?;
//! assert_eq!(exit.stdout.trim(), "hello");
//! # Ok(())
//! # }
//! ```

mod adapter;
mod registry;
mod supervisor;
pub mod terminator;

pub use adapter::{OutputStream, RunStdin, SpawnMode};
pub use supervisor::{global_supervisor, ManagedRun, OutputCallback, ProcessSupervisor, SpawnInput};
pub use terminator::{kill_process_tree, ProcessTreeTerminator, TerminateOutcome};
