//! Core flood detection modules

pub mod area;
pub mod change_detection;
pub mod composite;
pub mod fusion;
pub mod multilook;
pub mod pipeline;
pub mod post_process;
pub mod quality;
pub mod radiometric;
pub mod speckle_filter;
pub mod terrain;
pub mod threshold;

// Re-export main types
pub use area::{flooded_area, FloodEstimate};
pub use change_detection::{normalized_difference, optical_water_change, ratio, sar_change, water_index};
pub use composite::{composite, max_composite, mean_composite, mosaic, CompositeMethod};
pub use fusion::{intersection, union, FusionExpr};
pub use multilook::{MultilookParams, MultilookProcessor};
pub use pipeline::{FloodDetection, FloodInputs, FloodPipeline};
pub use post_process::{PostProcessParams, PostProcessReport, PostProcessor, Terrain};
pub use quality::{nodata_fraction, QualityReport};
pub use radiometric::{to_db, to_linear};
pub use speckle_filter::{SpeckleFilter, SpeckleFilterParams, SpeckleFilterType};
pub use terrain::{aspect_degrees, slope_degrees};
pub use threshold::{percentile_value, threshold_mask, ThresholdOutcome, ThresholdSpec};
