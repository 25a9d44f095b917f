//! Multi-level surface grid: per-cell lists of surface patches.
//!
//! Payload format (`KSHM`, little-endian):
//! - Magic: "KSHM" (4 bytes)
//! - Version: u8
//! - Width: u32
//! - Height: u32
//! - Resolution: f64
//! - Origin: 2 x f64
//! - Per cell, row-major: u32 patch count, then count x (mean f32,
//!   stdev f32, height f32)

use std::any::Any;
use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::core::Extents;
use crate::error::{Error, Result};
use crate::io::registry::ItemRecord;
use crate::item::Item;
use crate::layer::{Layer, MapData};

const MAGIC: &[u8; 4] = b"KSHM";
const VERSION: u8 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GridHeader {
    width: usize,
    height: usize,
    resolution: f64,
    origin: [f64; 2],
}

/// One vertical surface patch in a cell.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MlsPatch {
    /// Mean surface height in meters.
    pub mean: f32,
    /// Standard deviation of the surface height.
    pub stdev: f32,
    /// Vertical extent of the patch below its mean.
    pub height: f32,
}

/// A multi-level surface grid: each cell holds any number of patches.
#[derive(Clone, Debug)]
pub struct MlsGrid {
    width: usize,
    height: usize,
    resolution: f64,
    origin: [f64; 2],
    cells: Vec<Vec<MlsPatch>>,
}

impl MlsGrid {
    /// Class-name tag.
    pub const CLASS_NAME: &'static str = "kshetra::MlsGrid";

    /// Create a grid with empty cells.
    pub fn new(width: usize, height: usize, resolution: f64, origin: [f64; 2]) -> Self {
        Self {
            width,
            height,
            resolution,
            origin,
            cells: vec![Vec::new(); width * height],
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

    fn index(&self, x: usize, y: usize) -> Option<usize> {
        if x < self.width && y < self.height {
            Some(y * self.width + x)
        } else {
            None
        }
    }

    /// Patches of a cell, empty when out of bounds.
    pub fn patches(&self, x: usize, y: usize) -> &[MlsPatch] {
        match self.index(x, y) {
            Some(i) => &self.cells[i],
            None => &[],
        }
    }

    /// Add a patch to a cell. Returns false when out of bounds.
    pub fn add_patch(&mut self, x: usize, y: usize, patch: MlsPatch) -> bool {
        match self.index(x, y) {
            Some(i) => {
                self.cells[i].push(patch);
                true
            }
            None => false,
        }
    }

    /// The topmost patch of a cell (largest mean).
    pub fn top_patch(&self, x: usize, y: usize) -> Option<&MlsPatch> {
        self.patches(x, y)
            .iter()
            .max_by(|a, b| a.mean.total_cmp(&b.mean))
    }

    /// Total number of patches in the grid.
    pub fn patch_count(&self) -> usize {
        self.cells.iter().map(Vec::len).sum()
    }

    /// Resize and clear, adopting the given geometry.
    pub fn reshape(&mut self, width: usize, height: usize, resolution: f64, origin: [f64; 2]) {
        self.width = width;
        self.height = height;
        self.resolution = resolution;
        self.origin = origin;
        self.cells = vec![Vec::new(); width * height];
    }
}

impl MapData for MlsGrid {
    fn class_name(&self) -> &'static str {
        Self::CLASS_NAME
    }

    fn dimension(&self) -> u32 {
        3
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
        for cell in &self.cells {
            for p in cell {
                e.min[2] = e.min[2].min((p.mean - p.height) as f64);
                e.max[2] = e.max[2].max(p.mean as f64);
            }
        }
        e
    }

    fn file_extension(&self) -> &'static str {
        "mls.bin"
    }

    fn legacy_file_extensions(&self) -> &'static [&'static str] {
        &["mls"]
    }

    fn write_payload(&self, w: &mut dyn Write) -> Result<()> {
        w.write_all(MAGIC)?;
        w.write_all(&[VERSION])?;
        w.write_all(&(self.width as u32).to_le_bytes())?;
        w.write_all(&(self.height as u32).to_le_bytes())?;
        w.write_all(&self.resolution.to_le_bytes())?;
        w.write_all(&self.origin[0].to_le_bytes())?;
        w.write_all(&self.origin[1].to_le_bytes())?;
        for cell in &self.cells {
            w.write_all(&(cell.len() as u32).to_le_bytes())?;
            for p in cell {
                w.write_all(&p.mean.to_le_bytes())?;
                w.write_all(&p.stdev.to_le_bytes())?;
                w.write_all(&p.height.to_le_bytes())?;
            }
        }
        Ok(())
    }

    fn read_payload(&mut self, r: &mut dyn Read) -> Result<()> {
        let mut header = [0u8; 4 + 1 + 4 + 4 + 8 + 8 + 8];
        r.read_exact(&mut header)?;
        if &header[..4] != MAGIC {
            return Err(Error::Format("bad MLS grid magic".to_string()));
        }
        if header[4] != VERSION {
            return Err(Error::Format(format!(
                "unsupported MLS grid version {}",
                header[4]
            )));
        }
        let width = u32::from_le_bytes(header[5..9].try_into().unwrap_or_default()) as usize;
        let height = u32::from_le_bytes(header[9..13].try_into().unwrap_or_default()) as usize;
        let resolution = f64::from_le_bytes(header[13..21].try_into().unwrap_or_default());
        let ox = f64::from_le_bytes(header[21..29].try_into().unwrap_or_default());
        let oy = f64::from_le_bytes(header[29..37].try_into().unwrap_or_default());

        let mut cells = Vec::with_capacity(width * height);
        for _ in 0..width * height {
            let mut count = [0u8; 4];
            r.read_exact(&mut count)?;
            let count = u32::from_le_bytes(count) as usize;
            let mut cell = Vec::with_capacity(count);
            for _ in 0..count {
                let mut values = [0u8; 12];
                r.read_exact(&mut values)?;
                cell.push(MlsPatch {
                    mean: f32::from_le_bytes(values[0..4].try_into().unwrap_or_default()),
                    stdev: f32::from_le_bytes(values[4..8].try_into().unwrap_or_default()),
                    height: f32::from_le_bytes(values[8..12].try_into().unwrap_or_default()),
                });
            }
            cells.push(cell);
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
        MlsGrid::new(0, 0, 0.1, [0.0, 0.0])
    } else {
        let h: GridHeader = serde_yaml::from_value(record.data.clone())?;
        MlsGrid::new(h.width, h.height, h.resolution, h.origin)
    };
    Ok(Layer::with_map(record.id.clone(), Box::new(grid)).into())
}
