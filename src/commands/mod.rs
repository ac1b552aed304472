//! Commands Module
//!
//! All CLI subcommand implementations.

pub mod inspect;
pub mod train;
pub mod visualize;
