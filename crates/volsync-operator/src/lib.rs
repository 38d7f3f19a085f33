//! VolSync operator: controller wiring and startup tasks

#![deny(missing_docs)]

/// Controller construction
pub mod controller_runner;
/// Startup utilities (CRD install, populator registration)
pub mod startup;
