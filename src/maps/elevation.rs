//! Elevation grid: a 2D cartesian map of per-cell heights.
//!
//! Payload format (`KSHG`, little-endian):
//! - Magic: "KSHG" (4 bytes)
//! - Version: u8
//! - Width: u32
//! - Height: u32
//! - Resolution: f64 (meters per cell)
//! - Origin: 2 x f64 (world position of cell (0, 0) corner)
//! - Cell data: width * height f32 heights, row-major, NaN = unobserved

use std::any::Any;
use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::core::Extents;
use crate::error::{Error, Result};
use crate::io::registry::ItemRecord;
use crate::item::Item;
use crate::layer::{Layer, MapData};

const MAGIC: &[u8; 4] = b"KSHG";
const VERSION: u8 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GridHeader {
    width: usize,
    height: usize,
    resolution: f64,
    origin: [f64; 2],
}

/// A 2D grid of cell heights in meters. Unobserved cells are NaN.
#[derive(Clone, Debug)]
pub struct ElevationGrid {
    width: usize,
    height: usize,
    resolution: f64,
    origin: [f64; 2],
    cells: Vec<f32>,
}

impl ElevationGrid {
    /// Class-name tag.
    pub const CLASS_NAME: &'static str = "kshetra::ElevationGrid";

    /// Create a grid with all cells unobserved.
    pub fn new(width: usize, height: usize, resolution: f64, origin: [f64; 2]) -> Self {
        Self {
            width,
            height,
            resolution,
            origin,
            cells: vec![f32::NAN; width * height],
        }
    }

    /// Create a grid centered on the world origin.
    pub fn centered(width: usize, height: usize, resolution: f64) -> Self {
        let origin = [
            -(width as f64 * resolution) / 2.0,
            -(height as f64 * resolution) / 2.0,
        ];
        Self::new(width, height, resolution, origin)
    }

    /// Grid width in cells.
    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Grid height in cells.
    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Resolution in meters per cell.
    #[inline]
    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    /// World position of the (0, 0) cell corner.
    #[inline]
    pub fn origin(&self) -> [f64; 2] {
        self.origin
    }

    /// Total number of cells.
    #[inline]
    pub fn cell_count(&self) -> usize {
        self.width * self.height
    }

    fn index(&self, x: usize, y: usize) -> Option<usize> {
        if x < self.width && y < self.height {
            Some(y * self.width + x)
        } else {
            None
        }
    }

    /// Height of a cell, `None` when out of bounds or unobserved.
    pub fn elevation(&self, x: usize, y: usize) -> Option<f32> {
        let v = self.cells[self.index(x, y)?];
        if v.is_nan() {
            None
        } else {
            Some(v)
        }
    }

    /// Set the height of a cell. Returns false when out of bounds.
    pub fn set_elevation(&mut self, x: usize, y: usize, value: f32) -> bool {
        match self.index(x, y) {
            Some(i) => {
                self.cells[i] = value;
                true
            }
            None => false,
        }
    }

    /// World position of a cell center.
    pub fn cell_center(&self, x: usize, y: usize) -> [f64; 2] {
        [
            self.origin[0] + (x as f64 + 0.5) * self.resolution,
            self.origin[1] + (y as f64 + 0.5) * self.resolution,
        ]
    }

    /// Resize and clear, adopting the given geometry.
    pub fn reshape(&mut self, width: usize, height: usize, resolution: f64, origin: [f64; 2]) {
        self.width = width;
        self.height = height;
        self.resolution = resolution;
        self.origin = origin;
        self.cells = vec![f32::NAN; width * height];
    }
}

impl MapData for ElevationGrid {
    fn class_name(&self) -> &'static str {
        Self::CLASS_NAME
    }

    fn dimension(&self) -> u32 {
        2
    }

    fn extents(&self) -> Extents {
        let mut e = Extents::new(
            [self.origin[0], self.origin[1], 0.0],
            [
                self.origin[0] + self.width as f64 * self.resolution,
                self.origin[1] + self.height as f64 * self.resolution,
                0.0,
            ],
        );
        for v in &self.cells {
            if !v.is_nan() {
                e.min[2] = e.min[2].min(*v as f64);
                e.max[2] = e.max[2].max(*v as f64);
            }
        }
        e
    }

    fn file_extension(&self) -> &'static str {
        "grid.bin"
    }

    fn legacy_file_extensions(&self) -> &'static [&'static str] {
        &["grid"]
    }

    fn write_payload(&self, w: &mut dyn Write) -> Result<()> {
        w.write_all(MAGIC)?;
        w.write_all(&[VERSION])?;
        w.write_all(&(self.width as u32).to_le_bytes())?;
        w.write_all(&(self.height as u32).to_le_bytes())?;
        w.write_all(&self.resolution.to_le_bytes())?;
        w.write_all(&self.origin[0].to_le_bytes())?;
        w.write_all(&self.origin[1].to_le_bytes())?;
        let mut data = Vec::with_capacity(self.cells.len() * 4);
        for v in &self.cells {
            data.extend_from_slice(&v.to_le_bytes());
        }
        w.write_all(&data)?;
        Ok(())
    }

    fn read_payload(&mut self, r: &mut dyn Read) -> Result<()> {
        let mut header = [0u8; 4 + 1 + 4 + 4 + 8 + 8 + 8];
        r.read_exact(&mut header)?;
        if &header[..4] != MAGIC {
            return Err(Error::Format("bad elevation grid magic".to_string()));
        }
        if header[4] != VERSION {
            return Err(Error::Format(format!(
                "unsupported elevation grid version {}",
                header[4]
            )));
        }
        let width = u32::from_le_bytes(header[5..9].try_into().unwrap_or_default()) as usize;
        let height = u32::from_le_bytes(header[9..13].try_into().unwrap_or_default()) as usize;
        let resolution = f64::from_le_bytes(header[13..21].try_into().unwrap_or_default());
        let ox = f64::from_le_bytes(header[21..29].try_into().unwrap_or_default());
        let oy = f64::from_le_bytes(header[29..37].try_into().unwrap_or_default());

        let mut data = vec![0u8; width * height * 4];
        r.read_exact(&mut data)?;
        let mut cells = Vec::with_capacity(width * height);
        for chunk in data.chunks_exact(4) {
            cells.push(f32::from_le_bytes(
                chunk.try_into().unwrap_or_default(),
            ));
        }
        self.width = width;
        self.height = height;
        self.resolution = resolution;
        self.origin = [ox, oy];
        self.cells = cells;
        Ok(())
    }

    fn manifest_data(&self) -> serde_yaml::Value {
        serde_yaml::to_value(GridHeader {
            width: self.width,
            height: self.height,
            resolution: self.resolution,
            origin: self.origin,
        })
        .unwrap_or(serde_yaml::Value::Null)
    }

    fn clone_box(&self) -> Box<dyn MapData> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Factory for the class registry.
pub(crate) fn factory(record: &ItemRecord) -> Result<Item> {
    let grid = if record.data.is_null() {
        ElevationGrid::new(0, 0, 0.1, [0.0, 0.0])
    } else {
        let h: GridHeader = serde_yaml::from_value(record.data.clone())?;
        ElevationGrid::new(h.width, h.height, h.resolution, h.origin)
    };
    Ok(Layer::with_map(record.id.clone(), Box::new(grid)).into())
}
