use crate::{Error, Result};

/// Immutable 2-D pixel array produced by a tile read.
///
/// Values are stored row-major as f64 regardless of the source dtype; the
/// colormapping consumers downstream operate on floats.
#[derive(Debug, Clone, PartialEq)]
pub struct TileGrid {
    width: usize,
    height: usize,
    data: Vec<f64>,
}

impl TileGrid {
    pub fn new(width: usize, height: usize, data: Vec<f64>) -> Result<Self> {
        if data.len() != width * height {
            return Err(Error::InvalidArgument(format!(
                "Tile data has {} values, expected {}x{}",
                data.len(),
                width,
                height
            )));
        }

        Ok(TileGrid { width, height, data })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn value(&self, row: usize, col: usize) -> Option<f64> {
        if row >= self.height || col >= self.width {
            return None;
        }
        Some(self.data[row * self.width + col])
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        self.data.chunks(self.width)
    }

    /// Cache accounting size of the pixel buffer.
    pub fn byte_size(&self) -> usize {
        self.data.len() * std::mem::size_of::<f64>()
    }
}
