//! Scan line extraction with delta suppression.
//!
//! Within a sweep every column of the band becomes a vector of nozzle states.
//! A line is only kept when it differs from the previous kept line, because
//! the head keeps firing the last line it received until the next one takes
//! over. Uniform stretches therefore cost a single command.

use base64::{engine::general_purpose, Engine};
use log::debug;

use crate::bitmap::Bitmap;
use crate::sweep::{plan_sweeps, sweep_size, Direction, SweepBand};

/// Turns a column of nozzle states into the head's fixed width line token.
pub trait LineEncoder: Send + Sync {
    fn encode(&self, pixels: &[u8]) -> String;

    /// Token for a line of `len` unfired nozzles.
    fn blank(&self, len: usize) -> String {
        self.encode(&vec![0; len])
    }
}

/// Packs nozzles MSB first, eight per byte, and base64 encodes the bytes.
///
/// Equal length input always gives equal length tokens.
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64Encoder;

impl LineEncoder for Base64Encoder {
    fn encode(&self, pixels: &[u8]) -> String {
        let bytes: Vec<u8> = pixels
            .chunks(8)
            .map(|chunk| {
                chunk
                    .iter()
                    .enumerate()
                    .fold(0u8, |acc, (i, &p)| acc | (((p != 0) as u8) << (7 - i)))
            })
            .collect();
        general_purpose::STANDARD_NO_PAD.encode(bytes)
    }
}

/// A column whose content differs from the previously emitted column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanLine {
    pub column: usize,
    pub token: String,
}

/// The delta-suppressed lines of one sweep band.
#[derive(Debug, Clone)]
pub struct SweepLines {
    pub band: SweepBand,
    /// First and last inked column within the band, `None` for a blank band.
    pub columns: Option<(usize, usize)>,
    pub lines: Vec<ScanLine>,
    /// Token of a line with no nozzle fired.
    pub blank: String,
}

impl SweepLines {
    pub fn is_blank(&self) -> bool {
        self.columns.is_none()
    }
}

/// Columns visited by a sweep over `y_min..=y_max`.
///
/// A forward sweep includes both ends. A reverse sweep starts at `y_max` and
/// stops before `y_min`; the trailing cap follows the last visited column.
pub fn walk(direction: Direction, y_min: usize, y_max: usize) -> Box<dyn Iterator<Item = usize>> {
    match direction {
        Direction::Forward => Box::new(y_min..=y_max),
        Direction::Reverse => Box::new((y_min + 1..=y_max).rev()),
    }
}

/// Extract the lines of `band`, `size` nozzles each.
pub fn diff_lines(
    bitmap: &Bitmap,
    band: SweepBand,
    size: usize,
    encoder: &dyn LineEncoder,
) -> SweepLines {
    let blank = encoder.blank(size);
    let rows = band.rows();
    let columns = bitmap.ink_columns(rows.clone());

    let mut lines = Vec::new();
    if let Some((y_min, y_max)) = columns {
        let mut history = blank.clone();
        let mut pixels = vec![0u8; size];

        for column in walk(band.direction, y_min, y_max) {
            for (nozzle, row) in rows.clone().take(size).enumerate() {
                pixels[nozzle] = bitmap.get(row, column);
            }
            let token = encoder.encode(&pixels);
            if token != history {
                history = token.clone();
                lines.push(ScanLine { column, token });
            }
        }
    }
    debug!(
        "sweep rows {:?} {:?}: columns {:?}, {} lines",
        rows,
        band.direction,
        columns,
        lines.len()
    );

    SweepLines {
        band,
        columns,
        lines,
        blank,
    }
}

/// All sweeps of one page, in pixel space.
///
/// Planning does not depend on the print side, so pages can be planned
/// before it is known which side they will print on.
#[derive(Debug, Clone)]
pub struct PagePlan {
    pub resolution: f64,
    pub sweep_size: usize,
    pub sweeps: Vec<SweepLines>,
}

impl PagePlan {
    pub fn build(bitmap: &Bitmap, encoder: &dyn LineEncoder) -> Self {
        let size = sweep_size(bitmap.resolution()).max(1);
        let sweeps = plan_sweeps(bitmap)
            .into_iter()
            .map(|band| diff_lines(bitmap, band, size, encoder))
            .collect();

        PagePlan {
            resolution: bitmap.resolution(),
            sweep_size: size,
            sweeps,
        }
    }

    /// `true` when there is nothing to print.
    pub fn is_empty(&self) -> bool {
        self.sweeps.iter().all(SweepLines::is_blank)
    }

    pub fn line_count(&self) -> usize {
        self.sweeps.iter().map(|s| s.lines.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn first_band(bitmap: &Bitmap) -> SweepLines {
        let band = plan_sweeps(bitmap)[0];
        diff_lines(bitmap, band, sweep_size(bitmap.resolution()), &Base64Encoder)
    }

    #[test]
    fn encoder_is_fixed_width() {
        let encoder = Base64Encoder;
        let a = encoder.encode(&[1, 0, 0, 0, 0, 0, 0, 0, 1]);
        let b = encoder.blank(9);
        assert_eq!(a.len(), b.len());
        assert_eq!(a, "gIA");
        assert_eq!(b, "AAA");
    }

    #[test]
    fn single_pixel_gives_one_line() {
        let bitmap = Bitmap::from_fn(600, 900, 300.0, |row, col| row == 120 && col == 40);
        let sweep = first_band(&bitmap);

        assert_eq!(sweep.columns, Some((40, 40)));
        assert_eq!(sweep.lines.len(), 1);
        assert_eq!(sweep.lines[0].column, 40);
        assert_ne!(sweep.lines[0].token, sweep.blank);
    }

    #[test]
    fn uniform_band_costs_one_line() {
        for width in [10, 200] {
            let bitmap = Bitmap::from_fn(400, 300, 300.0, |row, col| {
                row < 100 && col >= 20 && col < 20 + width
            });
            let sweep = first_band(&bitmap);
            assert_eq!(sweep.lines.len(), 1, "width {}", width);
        }
    }

    #[test]
    fn never_repeats_a_token() {
        let bitmap = Bitmap::from_fn(300, 150, 300.0, |row, col| (row + col / 7) % 3 == 0);
        let sweep = first_band(&bitmap);
        assert!(sweep.lines.len() > 1);
        for pair in sweep.lines.windows(2) {
            assert_ne!(pair[0].token, pair[1].token);
        }
        assert_ne!(sweep.lines[0].token, sweep.blank);
    }

    #[test]
    fn reverse_walk_skips_lowest_column() {
        let forward: Vec<_> = walk(Direction::Forward, 3, 6).collect();
        let reverse: Vec<_> = walk(Direction::Reverse, 3, 6).collect();
        assert_eq!(forward, vec![3, 4, 5, 6]);
        assert_eq!(reverse, vec![6, 5, 4]);
        assert_eq!(walk(Direction::Reverse, 5, 5).count(), 0);
    }

    #[test]
    fn reverse_band_lines_descend() {
        // Two bands: rows 0..150 forward, rows 150..=200 reverse.
        let bitmap = Bitmap::from_fn(100, 300, 300.0, |row, col| {
            row <= 200 && (col == 10 || col == 12 || col == 30)
        });
        let bands = plan_sweeps(&bitmap);
        assert_eq!(bands[1].direction, Direction::Reverse);

        let sweep = diff_lines(&bitmap, bands[1], 150, &Base64Encoder);
        let columns: Vec<_> = sweep.lines.iter().map(|l| l.column).collect();
        assert_eq!(columns, vec![30, 29, 12, 11]);
    }

    #[test]
    fn page_plan_of_blank_page_is_empty() {
        let plan = PagePlan::build(&Bitmap::blank(50, 50, 300.0), &Base64Encoder);
        assert!(plan.is_empty());
        assert!(plan.sweeps.is_empty());
        assert_eq!(plan.line_count(), 0);
    }
}
