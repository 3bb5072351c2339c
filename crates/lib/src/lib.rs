//! wharf-lib: Core types and logic for wharf
//!
//! wharf manages JavaScript monorepos whose projects each keep their own
//! manifest and lockfile:
//! - `workspace` / `graph`: member projects and the dependency graph between them
//! - `reconcile`: keeps every lockfile consistent with its manifest and with
//!   the rest of the workspace
//! - `materialize`: fetches packages into a shared cache and links them
//! - `checksum`: skips builds whose inputs did not change
//! - `scheduler`: spreads project jobs across CI nodes and worker processes
//! - `actions`: the user-facing operations built on the above

pub mod actions;
pub mod buildfile;
pub mod checksum;
pub mod graph;
pub mod lockfile;
pub mod manifest;
pub mod materialize;
pub mod platform;
pub mod range;
pub mod reconcile;
pub mod registry;
pub mod scheduler;
pub mod util;
pub mod workspace;
