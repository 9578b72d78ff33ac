//! JSON summary of a flood detection run

use crate::config::FloodConfig;
use crate::core::area::FloodEstimate;
use crate::core::pipeline::FloodDetection;
use crate::core::post_process::PostProcessReport;
use crate::core::quality::QualityReport;
use crate::types::FloodResult;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Clone, Serialize)]
pub struct FloodReport {
    pub generated_at: DateTime<Utc>,
    pub estimate: FloodEstimate,
    pub sar_threshold: f32,
    pub optical_threshold: Option<f32>,
    pub sar_pixels: usize,
    pub optical_pixels: Option<usize>,
    pub fused_pixels: usize,
    pub post_process: PostProcessReport,
    pub quality: QualityReport,
    pub fusion: String,
    pub config: FloodConfig,
}

impl FloodReport {
    pub fn new(detection: &FloodDetection, config: &FloodConfig) -> Self {
        Self {
            generated_at: Utc::now(),
            estimate: detection.estimate,
            sar_threshold: detection.sar_threshold,
            optical_threshold: detection.optical_threshold,
            sar_pixels: detection.sar_mask.detected_count(),
            optical_pixels: detection.optical_mask.as_ref().map(|m| m.detected_count()),
            fused_pixels: detection.fused_mask.detected_count(),
            post_process: detection.post_process.clone(),
            quality: detection.quality.clone(),
            fusion: config.fusion.to_string(),
            config: config.clone(),
        }
    }

    pub fn to_json_string(&self) -> FloodResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Write the run summary as pretty-printed JSON
pub fn write_report<P: AsRef<Path>>(
    detection: &FloodDetection,
    config: &FloodConfig,
    path: P,
) -> FloodResult<FloodReport> {
    log::info!("Writing flood report to: {}", path.as_ref().display());
    let report = FloodReport::new(detection, config);
    std::fs::write(path.as_ref(), report.to_json_string()?)?;
    Ok(report)
}
