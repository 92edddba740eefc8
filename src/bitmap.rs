//! Thresholded page bitmaps.
//!
//! A [`Bitmap`] holds one bit of ink per pixel, indexed `[row][col]`. Rows run
//! along the stage travel axis, columns along the head sweep axis.

use image::DynamicImage;
use std::ops::Range;
use std::path::Path;

use crate::error::Error;

#[derive(Debug, Clone, PartialEq)]
pub struct Bitmap {
    width: usize,
    height: usize,
    resolution: f64,
    pixels: Vec<u8>,
}

impl Bitmap {
    /// A bitmap without any ink.
    pub fn blank(width: usize, height: usize, resolution: f64) -> Self {
        Bitmap {
            width,
            height,
            resolution,
            pixels: vec![0; width * height],
        }
    }

    /// Build a bitmap from a predicate called with `(row, col)`.
    pub fn from_fn(
        width: usize,
        height: usize,
        resolution: f64,
        mut ink: impl FnMut(usize, usize) -> bool,
    ) -> Self {
        let mut pixels = Vec::with_capacity(width * height);
        for row in 0..height {
            for col in 0..width {
                pixels.push(ink(row, col) as u8);
            }
        }
        Bitmap {
            width,
            height,
            resolution,
            pixels,
        }
    }

    /// Build a bitmap from rows of pixel values. Any non-zero value is ink.
    pub fn from_rows(rows: &[Vec<u8>], resolution: f64) -> Result<Self, Error> {
        let width = rows.first().map_or(0, |row| row.len());
        let mut pixels = Vec::with_capacity(width * rows.len());

        for (i, row) in rows.iter().enumerate() {
            if row.len() != width {
                return Err(Error::MalformedInput(format!(
                    "row {} has {} pixels, expected {}",
                    i,
                    row.len(),
                    width
                )));
            }
            pixels.extend(row.iter().map(|&p| (p != 0) as u8));
        }

        Ok(Bitmap {
            width,
            height: rows.len(),
            resolution,
            pixels,
        })
    }

    /// Threshold an image.
    ///
    /// A pixel is inked when it is mostly opaque and its luminance is below
    /// `threshold`. Transparent regions stay blank.
    pub fn from_image(image: &DynamicImage, threshold: u8, resolution: f64) -> Self {
        let luma = image.to_luma_alpha8();
        let (width, height) = luma.dimensions();

        Bitmap::from_fn(width as usize, height as usize, resolution, |row, col| {
            let px = luma.get_pixel(col as u32, row as u32);
            px[1] >= 128 && px[0] < threshold
        })
    }

    /// Open an image file and threshold it.
    pub fn open<P: AsRef<Path>>(path: P, threshold: u8, resolution: f64) -> Result<Self, Error> {
        let image = image::open(path)?;
        Ok(Bitmap::from_image(&image, threshold, resolution))
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Dots per inch.
    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    /// Pixel value, `0` outside the bitmap.
    pub fn get(&self, row: usize, col: usize) -> u8 {
        if row < self.height && col < self.width {
            self.pixels[row * self.width + col]
        } else {
            0
        }
    }

    pub fn row(&self, row: usize) -> &[u8] {
        &self.pixels[row * self.width..(row + 1) * self.width]
    }

    pub fn is_blank(&self) -> bool {
        self.pixels.iter().all(|&p| p == 0)
    }

    /// First and last row holding ink.
    pub fn ink_rows(&self) -> Option<(usize, usize)> {
        let has_ink = |row: &usize| self.row(*row).iter().any(|&p| p != 0);
        let first = (0..self.height).find(has_ink)?;
        let last = (0..self.height).rev().find(has_ink)?;
        Some((first, last))
    }

    /// First and last column holding ink within `rows`.
    pub fn ink_columns(&self, rows: Range<usize>) -> Option<(usize, usize)> {
        let rows = rows.start.min(self.height)..rows.end.min(self.height);
        let has_ink = |col: &usize| rows.clone().any(|row| self.get(row, *col) != 0);
        let first = (0..self.width).find(has_ink)?;
        let last = (0..self.width).rev().find(has_ink)?;
        Some((first, last))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    #[test]
    fn ink_bounds() {
        let bitmap = Bitmap::from_fn(20, 10, 300.0, |row, col| {
            (row == 3 && col == 7) || (row == 6 && col == 2)
        });
        assert_eq!(bitmap.ink_rows(), Some((3, 6)));
        assert_eq!(bitmap.ink_columns(0..10), Some((2, 7)));
        assert_eq!(bitmap.ink_columns(0..4), Some((7, 7)));
        assert_eq!(bitmap.ink_columns(4..6), None);
    }

    #[test]
    fn blank_has_no_bounds() {
        let bitmap = Bitmap::blank(8, 8, 300.0);
        assert!(bitmap.is_blank());
        assert_eq!(bitmap.ink_rows(), None);
        assert_eq!(bitmap.ink_columns(0..8), None);
    }

    #[test]
    fn rejects_ragged_rows() {
        let rows = vec![vec![0, 1, 0], vec![1, 1]];
        assert!(matches!(
            Bitmap::from_rows(&rows, 300.0),
            Err(Error::MalformedInput(_))
        ));
    }

    #[test]
    fn from_rows_normalises_values() {
        let rows = vec![vec![0, 255, 0], vec![3, 0, 0]];
        let bitmap = Bitmap::from_rows(&rows, 300.0).unwrap();
        assert_eq!(bitmap.row(0), &[0, 1, 0]);
        assert_eq!(bitmap.get(1, 0), 1);
        assert_eq!(bitmap.get(9, 9), 0);
    }

    #[test]
    fn thresholds_dark_pixels() {
        let mut image = GrayImage::from_pixel(4, 2, Luma([255]));
        image.put_pixel(1, 0, Luma([10]));
        image.put_pixel(3, 1, Luma([127]));
        image.put_pixel(2, 1, Luma([128]));

        let bitmap = Bitmap::from_image(&DynamicImage::ImageLuma8(image), 128, 300.0);
        assert_eq!((bitmap.width(), bitmap.height()), (4, 2));
        assert_eq!(bitmap.row(0), &[0, 1, 0, 0]);
        assert_eq!(bitmap.row(1), &[0, 0, 0, 1]);
    }
}
