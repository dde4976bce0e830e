//! Domain rules with no I/O: permissions, lifecycles, scoring.

pub mod compliance;
pub mod consent;
pub mod data;
pub mod identifiers;
pub mod insights;
pub mod permissions;
pub mod scheduling;
