//! Same-block event sequence detection on top of the range executor.

pub mod bundle;
pub mod detector;
pub mod diagnostics;
pub mod sequence;

pub use bundle::{sort_bundles, Bundle, BundleTransaction};
pub use detector::BundleDetector;
pub use diagnostics::{BundleReport, DiscardReason, DiscardedCandidate};
pub use sequence::{EventSignatureSequence, SequenceStep};
