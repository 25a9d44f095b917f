//! Point cloud map: a vertex set with optional per-vertex metadata.
//!
//! The payload is plain text, one `x y z` line per vertex. Per-vertex
//! attributes live in the owning layer's metadata dictionary under the
//! [`VERTEX_COLOR`] and [`VERTEX_VARIANCE`] keys: the color column of an
//! `x y z r` import lands there via
//! [`Pointcloud::layer_from_text`], variances via
//! [`Pointcloud::set_vertex_variances`].

use std::any::Any;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::{Extents, Transform};
use crate::error::{Error, Result};
use crate::io::registry::ItemRecord;
use crate::item::Item;
use crate::layer::{Layer, MapData};

/// Layer metadata key for per-vertex colors (`vec3_list`).
pub const VERTEX_COLOR: &str = "vertex_color";

/// Layer metadata key for per-vertex height variances (`f64_list`).
pub const VERTEX_VARIANCE: &str = "vertex_variance";

/// Column layout of a text import.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextFormat {
    /// `x y z` per line.
    Xyz,
    /// `x y z r` per line; the reflectance column becomes a grey
    /// per-vertex color in `[0, 1]`.
    Xyzr,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CloudHeader {
    #[serde(default)]
    sensor_origin: Option<Transform>,
}

/// A 3D vertex set.
#[derive(Clone, Debug, Default)]
pub struct Pointcloud {
    vertices: Vec<[f64; 3]>,
    sensor_origin: Transform,
}

impl Pointcloud {
    /// Class-name tag.
    pub const CLASS_NAME: &'static str = "kshetra::Pointcloud";

    /// Create an empty cloud.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cloud from vertices.
    pub fn from_vertices(vertices: Vec<[f64; 3]>) -> Self {
        Self {
            vertices,
            sensor_origin: Transform::identity(),
        }
    }

    /// Read a cloud from a text file, keeping every `sample`-th vertex
    /// (1 keeps all).
    pub fn from_text_file(path: &Path, sample: usize) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let mut cloud = Self::new();
        cloud.read_text(&mut BufReader::new(file), sample)?;
        Ok(cloud)
    }

    /// The vertices.
    #[inline]
    pub fn vertices(&self) -> &[[f64; 3]] {
        &self.vertices
    }

    /// Append a vertex.
    pub fn push_vertex(&mut self, v: [f64; 3]) {
        self.vertices.push(v);
    }

    /// Number of vertices.
    #[inline]
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    /// True when the cloud has no vertices.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Drop all vertices.
    pub fn clear(&mut self) {
        self.vertices.clear();
    }

    /// Pose of the capturing sensor in the cloud's frame.
    #[inline]
    pub fn sensor_origin(&self) -> &Transform {
        &self.sensor_origin
    }

    /// Set the capturing sensor pose.
    pub fn set_sensor_origin(&mut self, origin: Transform) {
        self.sensor_origin = origin;
    }

    /// Parse `x y z` lines, keeping every `sample`-th vertex.
    pub fn read_text(&mut self, r: &mut dyn Read, sample: usize) -> Result<()> {
        self.read_text_columns(r, sample, TextFormat::Xyz)?;
        Ok(())
    }

    /// Parse text lines in the given column layout, keeping every
    /// `sample`-th vertex. Returns the color column for [`TextFormat::Xyzr`]
    /// input, one grey value per kept vertex.
    pub fn read_text_columns(
        &mut self,
        r: &mut dyn Read,
        sample: usize,
        format: TextFormat,
    ) -> Result<Option<Vec<[f64; 3]>>> {
        let sample = sample.max(1);
        self.vertices.clear();
        let mut colors = Vec::new();
        let reader = BufReader::new(r);
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            if line_no % sample != 0 {
                continue;
            }
            let mut parts = trimmed.split_whitespace();
            let mut v = [0.0; 3];
            for slot in v.iter_mut() {
                let token = parts.next().ok_or_else(|| {
                    Error::Format(format!("short vertex line {}: `{}`", line_no + 1, trimmed))
                })?;
                *slot = token.parse().map_err(|_| {
                    Error::Format(format!("bad vertex line {}: `{}`", line_no + 1, trimmed))
                })?;
            }
            if format == TextFormat::Xyzr {
                let token = parts.next().ok_or_else(|| {
                    Error::Format(format!("missing reflectance on line {}: `{}`", line_no + 1, trimmed))
                })?;
                let c: f64 = token.parse().map_err(|_| {
                    Error::Format(format!("bad reflectance on line {}: `{}`", line_no + 1, trimmed))
                })?;
                let grey = c / 255.0;
                colors.push([grey, grey, grey]);
            }
            self.vertices.push(v);
        }
        Ok(match format {
            TextFormat::Xyz => None,
            TextFormat::Xyzr => Some(colors),
        })
    }

    /// Build a cartesian map layer from text input, storing the color
    /// column of [`TextFormat::Xyzr`] data in the layer's metadata under
    /// [`VERTEX_COLOR`].
    pub fn layer_from_text(
        id: impl Into<String>,
        r: &mut dyn Read,
        sample: usize,
        format: TextFormat,
    ) -> Result<Layer> {
        let mut cloud = Pointcloud::new();
        let colors = cloud.read_text_columns(r, sample, format)?;
        let mut layer = Layer::with_map(id, Box::new(cloud));
        if let Some(colors) = colors {
            *layer.data_mut::<Vec<[f64; 3]>>(VERTEX_COLOR)? = colors;
        }
        Ok(layer)
    }

    /// Like [`layer_from_text`](Pointcloud::layer_from_text), reading from
    /// a file.
    pub fn layer_from_text_file(
        id: impl Into<String>,
        path: &Path,
        sample: usize,
        format: TextFormat,
    ) -> Result<Layer> {
        let file = std::fs::File::open(path)?;
        Self::layer_from_text(id, &mut BufReader::new(file), sample, format)
    }

    /// Per-vertex colors stored in the owning layer's metadata.
    pub fn vertex_colors(layer: &Layer) -> Result<&[[f64; 3]]> {
        layer
            .data::<Vec<[f64; 3]>>(VERTEX_COLOR)
            .map(|v| v.as_slice())
    }

    /// Store per-vertex height variances in the owning layer's metadata
    /// under [`VERTEX_VARIANCE`].
    pub fn set_vertex_variances(layer: &mut Layer, variances: Vec<f64>) -> Result<()> {
        *layer.data_mut::<Vec<f64>>(VERTEX_VARIANCE)? = variances;
        Ok(())
    }

    /// Per-vertex height variances stored in the owning layer's metadata.
    pub fn vertex_variances(layer: &Layer) -> Result<&[f64]> {
        layer.data::<Vec<f64>>(VERTEX_VARIANCE).map(|v| v.as_slice())
    }

    /// Write `x y z` lines.
    pub fn write_text(&self, w: &mut dyn Write) -> Result<()> {
        for v in &self.vertices {
            writeln!(w, "{} {} {}", v[0], v[1], v[2])?;
        }
        Ok(())
    }
}

impl MapData for Pointcloud {
    fn class_name(&self) -> &'static str {
        Self::CLASS_NAME
    }

    fn dimension(&self) -> u32 {
        3
    }

    fn extents(&self) -> Extents {
        let mut e = Extents::empty();
        for v in &self.vertices {
            e.expand_to_include(*v);
        }
        e
    }

    fn file_extension(&self) -> &'static str {
        "txt"
    }

    fn legacy_file_extensions(&self) -> &'static [&'static str] {
        &["xyz"]
    }

    fn write_payload(&self, w: &mut dyn Write) -> Result<()> {
        self.write_text(w)
    }

    fn read_payload(&mut self, r: &mut dyn Read) -> Result<()> {
        self.read_text(r, 1)
    }

    fn manifest_data(&self) -> serde_yaml::Value {
        serde_yaml::to_value(CloudHeader {
            sensor_origin: Some(self.sensor_origin),
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
    let mut cloud = Pointcloud::new();
    if !record.data.is_null() {
        let h: CloudHeader = serde_yaml::from_value(record.data.clone())?;
        if let Some(origin) = h.sensor_origin {
            cloud.set_sensor_origin(origin);
        }
    }
    Ok(Layer::with_map(record.id.clone(), Box::new(cloud)).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_roundtrip() {
        let cloud = Pointcloud::from_vertices(vec![[0.0, 1.0, 2.0], [-1.5, 0.25, 3.0]]);
        let mut buf = Vec::new();
        cloud.write_text(&mut buf).unwrap();

        let mut restored = Pointcloud::new();
        restored.read_text(&mut buf.as_slice(), 1).unwrap();
        assert_eq!(restored.vertices(), cloud.vertices());
    }

    #[test]
    fn test_text_skips_comments_and_samples() {
        let text = "# header\n0 0 0\n1 1 1\n2 2 2\n3 3 3\n";
        let mut cloud = Pointcloud::new();
        cloud.read_text(&mut text.as_bytes(), 2).unwrap();
        // every second line survives, comments never count
        assert_eq!(cloud.len(), 2);
    }

    #[test]
    fn test_bad_line_rejected() {
        let mut cloud = Pointcloud::new();
        assert!(cloud.read_text(&mut "1 2\n".as_bytes(), 1).is_err());
        assert!(cloud.read_text(&mut "a b c\n".as_bytes(), 1).is_err());
    }

    #[test]
    fn test_extents_fold_vertices() {
        let cloud = Pointcloud::from_vertices(vec![[1.0, -1.0, 0.0], [-2.0, 3.0, 5.0]]);
        let e = cloud.extents();
        assert_eq!(e.min, [-2.0, -1.0, 0.0]);
        assert_eq!(e.max, [1.0, 3.0, 5.0]);
    }

    #[test]
    fn test_xyzr_import_stores_colors_in_layer_metadata() {
        let text = "0 0 0 255\n1 1 1 0\n";
        let layer =
            Pointcloud::layer_from_text("cloud/", &mut text.as_bytes(), 1, TextFormat::Xyzr)
                .unwrap();

        let cloud = layer.map_as::<Pointcloud>().unwrap();
        assert_eq!(cloud.len(), 2);
        let colors = Pointcloud::vertex_colors(&layer).unwrap();
        assert_eq!(colors, &[[1.0, 1.0, 1.0], [0.0, 0.0, 0.0]]);
    }

    #[test]
    fn test_xyz_import_leaves_no_color_metadata() {
        let text = "0 0 0\n1 1 1\n";
        let layer = Pointcloud::layer_from_text("cloud/", &mut text.as_bytes(), 1, TextFormat::Xyz)
            .unwrap();
        assert!(!layer.has_data_key(VERTEX_COLOR));
        assert!(Pointcloud::vertex_colors(&layer).is_err());
    }

    #[test]
    fn test_xyzr_missing_reflectance_rejected() {
        let mut cloud = Pointcloud::new();
        assert!(cloud
            .read_text_columns(&mut "1 2 3\n".as_bytes(), 1, TextFormat::Xyzr)
            .is_err());
    }

    #[test]
    fn test_vertex_variances_roundtrip_through_metadata() {
        let mut layer = Layer::with_map("cloud/", Box::new(Pointcloud::new()));
        Pointcloud::set_vertex_variances(&mut layer, vec![0.1, 0.2]).unwrap();
        assert_eq!(Pointcloud::vertex_variances(&layer).unwrap(), &[0.1, 0.2]);
        assert!(layer.has_data_key(VERTEX_VARIANCE));
    }
}
