//! Multi-sensor mask fusion
//!
//! The primitives operate on any two aligned masks. Masked-out pixels count
//! as "not detected" on either side and every result is self-masked.

use crate::types::{BinaryMask, FloodError, FloodResult, MASK_CLEAR, MASK_DETECTED};
use ndarray::Zip;
use serde::{Deserialize, Serialize};

/// Pixels detected in both masks
pub fn intersection(a: &BinaryMask, b: &BinaryMask) -> FloodResult<BinaryMask> {
    combine(a, b, |x, y| x * y)
}

/// Pixels detected in either mask
pub fn union(a: &BinaryMask, b: &BinaryMask) -> FloodResult<BinaryMask> {
    combine(a, b, |x, y| (x + y).min(MASK_DETECTED))
}

fn combine<F>(a: &BinaryMask, b: &BinaryMask, op: F) -> FloodResult<BinaryMask>
where
    F: Fn(u8, u8) -> u8,
{
    a.ensure_aligned(b)?;
    let a = a.unmask(MASK_CLEAR);
    let b = b.unmask(MASK_CLEAR);
    let data = Zip::from(&a.data).and(&b.data).map_collect(|&x, &y| op(x, y));
    Ok(a.with_data(data).self_mask())
}

/// Fusion policy as an expression over the per-sensor masks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionExpr {
    Sar,
    Optical,
    And(Box<FusionExpr>, Box<FusionExpr>),
    Or(Box<FusionExpr>, Box<FusionExpr>),
}

impl FusionExpr {
    pub fn sar_only() -> Self {
        FusionExpr::Sar
    }

    pub fn optical_only() -> Self {
        FusionExpr::Optical
    }

    pub fn intersection() -> Self {
        FusionExpr::And(Box::new(FusionExpr::Sar), Box::new(FusionExpr::Optical))
    }

    pub fn union() -> Self {
        FusionExpr::Or(Box::new(FusionExpr::Sar), Box::new(FusionExpr::Optical))
    }

    /// `Sar OR (Sar AND Optical)`. Reduces to the SAR mask wherever both
    /// masks exist.
    pub fn consensus() -> Self {
        FusionExpr::Or(Box::new(FusionExpr::Sar), Box::new(Self::intersection()))
    }

    /// True if evaluating needs an optical mask
    pub fn uses_optical(&self) -> bool {
        match self {
            FusionExpr::Sar => false,
            FusionExpr::Optical => true,
            FusionExpr::And(l, r) | FusionExpr::Or(l, r) => l.uses_optical() || r.uses_optical(),
        }
    }

    pub fn evaluate(&self, sar: &BinaryMask, optical: Option<&BinaryMask>) -> FloodResult<BinaryMask> {
        match self {
            FusionExpr::Sar => Ok(sar.self_mask()),
            FusionExpr::Optical => optical.map(BinaryMask::self_mask).ok_or_else(|| {
                FloodError::InvalidInput(
                    "Fusion expression references the optical mask but none was supplied".to_string(),
                )
            }),
            FusionExpr::And(l, r) => intersection(&l.evaluate(sar, optical)?, &r.evaluate(sar, optical)?),
            FusionExpr::Or(l, r) => union(&l.evaluate(sar, optical)?, &r.evaluate(sar, optical)?),
        }
    }
}

impl std::fmt::Display for FusionExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FusionExpr::Sar => write!(f, "sar"),
            FusionExpr::Optical => write!(f, "optical"),
            FusionExpr::And(l, r) => write!(f, "({} and {})", l, r),
            FusionExpr::Or(l, r) => write!(f, "({} or {})", l, r),
        }
    }
}
