//! Tasks run once before the controllers start

mod crds;
mod registration;

pub use crds::ensure_crds;
pub use registration::ensure_volume_populator_registered;
