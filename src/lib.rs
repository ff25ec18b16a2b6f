//! Dotfiles symlink provisioning and reconciliation engine.
//!
//! Links every file of every package under `stow/<package>/` into the home
//! directory, replacing stale links and conflicting files, and can pull local
//! edits back into the repository (`--sync-local`, optionally as a three-way
//! merge). Every mutation passes the [`safety`] gate first and is recorded in
//! an executable rollback script. A dry run reports exactly what a real run
//! would do.
//!
//! The public API is organised into layers:
//!
//! - **[`config`]**: repository layout and the ordered package list
//! - **[`paths`]**, **[`safety`]**: path transforms and the home/repository boundary
//! - **[`resources`]**: classify a target and create or remove links
//! - **[`rollback`]**, **[`merge`]**: undo script and three-way merge
//! - **[`tasks`]**: provisioning and reverse sync over all packages
//! - **[`commands`]**: the top-level run
#![deny(clippy::or_fun_call)]
#![deny(clippy::bool_to_int_with_if)]

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod exec;
pub mod logging;
pub mod merge;
pub mod paths;
pub mod platform;
pub mod resources;
pub mod rollback;
pub mod safety;
pub mod tasks;
