//! Sweep planning.
//!
//! The ink bounding box of a page is cut along the stage travel axis into
//! bands one head-width tall. The head covers half an inch, so a band is
//! `floor(resolution / 2)` rows.

use log::debug;
use std::ops::Range;

use crate::bitmap::Bitmap;

/// Head travel direction along the sweep axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Increasing column index.
    Forward,
    /// Decreasing column index.
    Reverse,
}

impl Direction {
    pub fn flip(self) -> Self {
        match self {
            Self::Forward => Self::Reverse,
            Self::Reverse => Self::Forward,
        }
    }
}

/// A range of bitmap rows printed in one pass of the head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepBand {
    pub x_start: usize,
    pub x_end: usize,
    pub direction: Direction,
    last: bool,
}

impl SweepBand {
    /// Rows fired by this band.
    ///
    /// Bands share their boundary row with the next band, which owns it. The
    /// last band has no successor and includes `x_end`.
    pub fn rows(&self) -> Range<usize> {
        if self.last {
            self.x_start..self.x_end + 1
        } else {
            self.x_start..self.x_end
        }
    }

    pub fn is_last(&self) -> bool {
        self.last
    }
}

/// Rows covered by one sweep at `resolution` dpi.
pub fn sweep_size(resolution: f64) -> usize {
    (resolution / 2.0).floor().max(0.0) as usize
}

/// Slice the ink bounding box of `bitmap` into sweep bands.
///
/// A blank bitmap yields no bands.
pub fn plan_sweeps(bitmap: &Bitmap) -> Vec<SweepBand> {
    let mut bands = Vec::new();

    let (x_min, x_max) = match bitmap.ink_rows() {
        Some(bounds) => bounds,
        None => {
            debug!("bitmap is blank, nothing to sweep");
            return bands;
        }
    };
    let size = sweep_size(bitmap.resolution()).max(1);
    debug!("X-min on row {}, X-max on row {}, sweep size {}", x_min, x_max, size);

    let mut x_start = x_min;
    let mut direction = Direction::Forward;
    loop {
        if x_start + size <= x_max {
            bands.push(SweepBand {
                x_start,
                x_end: x_start + size,
                direction,
                last: false,
            });
            x_start += size;
            direction = direction.flip();
        } else {
            bands.push(SweepBand {
                x_start,
                x_end: x_max,
                direction,
                last: true,
            });
            break;
        }
    }

    bands
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ink_rows(from: usize, to: usize) -> Bitmap {
        Bitmap::from_fn(100, 900, 300.0, |row, col| {
            row >= from && row <= to && col == 10
        })
    }

    #[test]
    fn blank_bitmap_has_no_bands() {
        assert!(plan_sweeps(&Bitmap::blank(600, 900, 300.0)).is_empty());
    }

    #[test]
    fn sweep_size_is_half_an_inch() {
        assert_eq!(sweep_size(300.0), 150);
        assert_eq!(sweep_size(600.0), 300);
        assert_eq!(sweep_size(301.0), 150);
    }

    #[test]
    fn bands_partition_the_ink_rows() {
        let bands = plan_sweeps(&ink_rows(50, 499));
        let bounds: Vec<_> = bands.iter().map(|b| (b.x_start, b.x_end)).collect();
        assert_eq!(bounds, vec![(50, 200), (200, 350), (350, 499)]);

        for pair in bands.windows(2) {
            assert_eq!(pair[0].x_end, pair[1].x_start);
        }
        assert_eq!(bands[0].x_start, 50);
        assert_eq!(bands.last().unwrap().x_end, 499);

        let rows: usize = bands.iter().map(|b| b.rows().len()).sum();
        assert_eq!(rows, 450);
    }

    #[test]
    fn directions_alternate() {
        let bands = plan_sweeps(&ink_rows(0, 700));
        let directions: Vec<_> = bands.iter().map(|b| b.direction).collect();
        assert_eq!(
            directions,
            vec![
                Direction::Forward,
                Direction::Reverse,
                Direction::Forward,
                Direction::Reverse,
                Direction::Forward,
            ]
        );
    }

    #[test]
    fn exact_multiple_leaves_single_row_band() {
        let bands = plan_sweeps(&ink_rows(50, 500));
        assert_eq!(bands.len(), 4);
        let last = bands.last().unwrap();
        assert_eq!((last.x_start, last.x_end), (500, 500));
        assert_eq!(last.rows(), 500..501);
        assert!(last.is_last());
    }

    #[test]
    fn single_row_of_ink() {
        let bands = plan_sweeps(&ink_rows(42, 42));
        assert_eq!(bands.len(), 1);
        assert!(bands[0].rows().contains(&42));
        assert_eq!(bands[0].direction, Direction::Forward);
    }
}
