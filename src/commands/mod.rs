//! Subcommand handlers.
//!
//! | File          | Invocation          | Description                          |
//! |---------------|---------------------|--------------------------------------|
//! | `init.rs`     | `dupback init`      | Scaffold a `dupback.toml`            |
//! | `run.rs`      | `dupback` (default) | Back up every directory, send report |

pub mod init;
pub mod run;
