//! Pixel to stage coordinate conversion.

use crate::config::SideAnchor;

pub const MM_PER_INCH: f64 = 25.4;

/// Position in mm of pixel `index` at `resolution` dpi, offset by `side_offset` mm.
///
/// `index` is signed so that caps one pixel outside the bitmap map too.
pub fn pixel_to_mm(index: i64, resolution: f64, side_offset: f64) -> f64 {
    index as f64 * (MM_PER_INCH / resolution) + side_offset
}

/// Inverse of [`pixel_to_mm`], not rounded.
pub fn mm_to_pixel(mm: f64, resolution: f64, side_offset: f64) -> f64 {
    (mm - side_offset) * resolution / MM_PER_INCH
}

/// The head counts position in whole microns.
pub fn mm_to_micron(mm: f64) -> i64 {
    (mm * 1000.0).round() as i64
}

/// Maps bitmap rows and columns onto the stage for one side of the bed.
#[derive(Debug, Clone, Copy)]
pub struct PositionMapper {
    resolution: f64,
    anchor: SideAnchor,
}

impl PositionMapper {
    pub fn new(resolution: f64, anchor: SideAnchor) -> Self {
        PositionMapper { resolution, anchor }
    }

    /// Stage travel axis position of `row`.
    pub fn row_mm(&self, row: i64) -> f64 {
        pixel_to_mm(row, self.resolution, self.anchor.x)
    }

    /// Head sweep axis position of `column`.
    pub fn column_mm(&self, column: i64) -> f64 {
        pixel_to_mm(column, self.resolution, self.anchor.y)
    }
}
