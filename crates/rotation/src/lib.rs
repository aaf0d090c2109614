//! Timed, resumable cycling of gallery items on the device.
//!
//! [`RotationScheduler`] owns one background loop at a time. It resolves
//! item ids through a [`Gallery`], shows them through a
//! [`RotationDisplay`], and persists its selection with a
//! [`RotationStore`] so a restart can pick up where it left off.

pub mod display;
pub mod gallery;
pub mod scheduler;
pub mod store;

pub use display::RotationDisplay;
pub use gallery::{Gallery, MetadataGallery};
pub use scheduler::{IntervalOption, RotationScheduler, RotationStatus, SchedulerConfig};
pub use store::{RotationConfig, RotationStore};
