//! Output geometry resolution
//!
//! Pure functions, no I/O. Aspect ratio is preserved when only one axis is
//! requested; an explicit width and height pair is taken as-is.

use crate::request::GeometryRequest;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GeometryError {
    #[error("Source dimensions unavailable: {width}x{height}")]
    InvalidSource { width: u32, height: u32 },

    #[error("Resolved geometry is degenerate: {width}x{height}")]
    Degenerate { width: u32, height: u32 },

    #[error("Derived dimension {0} does not fit in 32 bits")]
    Overflow(u64),

    #[error("Failed to read source dimensions: {0}")]
    Unreadable(String),
}

/// Concrete output size in pixels. Both sides are always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedGeometry {
    pub width: u32,
    pub height: u32,
}

/// One side of a crop window: a pixel count, or left to the transcoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dimension {
    Px(u32),
    Auto,
}

impl Dimension {
    pub fn from_request(value: Option<u32>) -> Self {
        value.map(Dimension::Px).unwrap_or(Dimension::Auto)
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Px(v) => write!(f, "{}", v),
            Dimension::Auto => write!(f, "-1"),
        }
    }
}

/// Crop window; offsets default to the top-left corner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropGeometry {
    pub width: Dimension,
    pub height: Dimension,
    pub x: u32,
    pub y: u32,
}

/// Resolve the output size for a resize.
///
/// # Examples
/// ```
/// # use web_compressor::geometry::resolve;
/// let g = resolve(1920, 1080, Some(960), None).unwrap();
/// assert_eq!((g.width, g.height), (960, 540));
/// ```
pub fn resolve(
    original_width: u32,
    original_height: u32,
    requested_width: Option<u32>,
    requested_height: Option<u32>,
) -> Result<ResolvedGeometry, GeometryError> {
    if original_width == 0 || original_height == 0 {
        return Err(GeometryError::InvalidSource {
            width: original_width,
            height: original_height,
        });
    }

    let (width, height) = match (requested_width, requested_height) {
        (None, None) => (original_width, original_height),
        (Some(w), None) => (w, scale_axis(original_height, w, original_width)?),
        (None, Some(h)) => (scale_axis(original_width, h, original_height)?, h),
        (Some(w), Some(h)) => (w, h),
    };

    if width == 0 || height == 0 {
        return Err(GeometryError::Degenerate { width, height });
    }

    Ok(ResolvedGeometry { width, height })
}

/// Resolve against a [`GeometryRequest`]; offsets are ignored.
pub fn resolve_request(
    original_width: u32,
    original_height: u32,
    request: &GeometryRequest,
) -> Result<ResolvedGeometry, GeometryError> {
    resolve(original_width, original_height, request.width, request.height)
}

/// Resolve a crop window. The source size is not needed: missing sides are
/// left for the transcoder to compute.
pub fn resolve_crop(request: &GeometryRequest) -> CropGeometry {
    CropGeometry {
        width: Dimension::from_request(request.width),
        height: Dimension::from_request(request.height),
        x: request.x.unwrap_or(0),
        y: request.y.unwrap_or(0),
    }
}

/// floor(other * requested / same), computed in u64
fn scale_axis(other: u32, requested: u32, same: u32) -> Result<u32, GeometryError> {
    let scaled = other as u64 * requested as u64 / same as u64;
    u32::try_from(scaled).map_err(|_| GeometryError::Overflow(scaled))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_when_nothing_requested() {
        let g = resolve(1920, 1080, None, None).unwrap();
        assert_eq!(g, ResolvedGeometry { width: 1920, height: 1080 });
    }

    #[test]
    fn test_width_only_preserves_aspect() {
        for (ow, oh, rw) in [(1920u32, 1080u32, 960u32), (1000, 333, 100), (7, 3, 5), (640, 480, 1280)] {
            let g = resolve(ow, oh, Some(rw), None).unwrap();
            assert_eq!(g.width, rw);
            assert_eq!(g.height, (oh as u64 * rw as u64 / ow as u64) as u32);
        }
    }

    #[test]
    fn test_height_only_preserves_aspect() {
        for (ow, oh, rh) in [(1920u32, 1080u32, 540u32), (333, 1000, 100), (3, 7, 5)] {
            let g = resolve(ow, oh, None, Some(rh)).unwrap();
            assert_eq!(g.height, rh);
            assert_eq!(g.width, (ow as u64 * rh as u64 / oh as u64) as u32);
        }
    }

    #[test]
    fn test_both_requested_is_exact() {
        let g = resolve(1920, 1080, Some(100), Some(900)).unwrap();
        assert_eq!(g, ResolvedGeometry { width: 100, height: 900 });
    }

    #[test]
    fn test_zero_source_fails() {
        assert!(matches!(
            resolve(0, 1080, Some(100), None),
            Err(GeometryError::InvalidSource { .. })
        ));
        assert!(matches!(
            resolve(1920, 0, None, Some(100)),
            Err(GeometryError::InvalidSource { .. })
        ));
    }

    #[test]
    fn test_floor_to_zero_is_degenerate() {
        assert_eq!(
            resolve(1000, 1, Some(10), None),
            Err(GeometryError::Degenerate { width: 10, height: 0 })
        );
    }

    #[test]
    fn test_large_values_do_not_overflow() {
        let g = resolve(100_000, 80_000, Some(60_000), None).unwrap();
        assert_eq!(g.height, 48_000);
    }

    #[test]
    fn test_derived_side_past_u32_is_rejected() {
        let expected = 4_000_000u64 * u32::MAX as u64 / 2;
        assert_eq!(
            resolve(2, 4_000_000, Some(u32::MAX), None),
            Err(GeometryError::Overflow(expected))
        );
        assert!(matches!(
            resolve(4_000_000, 2, None, Some(u32::MAX)),
            Err(GeometryError::Overflow(_))
        ));
    }

    #[test]
    fn test_crop_defaults() {
        let crop = resolve_crop(&GeometryRequest::size(Some(640), None));
        assert_eq!(crop.width, Dimension::Px(640));
        assert_eq!(crop.height, Dimension::Auto);
        assert_eq!((crop.x, crop.y), (0, 0));
        assert_eq!(crop.height.to_string(), "-1");
    }
}
