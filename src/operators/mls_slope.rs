//! Operator computing local slopes from a multi-level surface grid.

use std::any::Any;
use std::f64::consts::FRAC_PI_2;

use serde::{Deserialize, Serialize};

use crate::environment::OperatorContext;
use crate::error::Result;
use crate::io::registry::ItemRecord;
use crate::item::Item;
use crate::maps::{ElevationGrid, MlsGrid};
use crate::operator::{OperatorKernel, OperatorNode};

fn default_step_threshold() -> f64 {
    0.25
}

/// Computes the maximum local slope angle of the topmost MLS surfaces into
/// an [`ElevationGrid`] of radians.
///
/// Works on the topmost patch of each cell, so it is meaningful for MLS
/// grids with one patch per cell. Height steps larger than
/// `corrected_step_threshold` count as vertical.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MlsSlope {
    /// Height steps beyond this threshold (meters) are treated as walls.
    #[serde(default = "default_step_threshold")]
    pub corrected_step_threshold: f64,
    /// Subtract the patch standard deviations from the step before
    /// comparing against the threshold.
    #[serde(default)]
    pub use_stddev: bool,
}

impl Default for MlsSlope {
    fn default() -> Self {
        Self {
            corrected_step_threshold: default_step_threshold(),
            use_stddev: false,
        }
    }
}

impl MlsSlope {
    /// Class-name tag.
    pub const CLASS_NAME: &'static str = "kshetra::MlsSlope";

    /// Wrap into an operator node ready for attachment.
    pub fn into_node(self, id: impl Into<String>) -> OperatorNode {
        OperatorNode::new(id, Box::new(self))
    }

    /// Slope angle in radians between two neighboring surfaces.
    fn gradient(&self, mean0: f64, mean1: f64, stdev0: f64, stdev1: f64, resolution: f64) -> f64 {
        let mut step = (mean1 - mean0).abs();
        if self.use_stddev {
            step = (step - (stdev0 + stdev1)).max(0.0);
        }
        if step > self.corrected_step_threshold {
            return FRAC_PI_2;
        }
        (step / resolution).atan()
    }
}

impl OperatorKernel for MlsSlope {
    fn class_name(&self) -> &'static str {
        Self::CLASS_NAME
    }

    fn input_arity(&self) -> usize {
        1
    }

    fn output_arity(&self) -> usize {
        1
    }

    fn update(&mut self, ctx: &mut OperatorContext<'_>) -> Result<()> {
        let mls = ctx.sole_input::<MlsGrid>()?.clone();
        let op = self.clone();
        ctx.with_sole_output_mut::<ElevationGrid, _>(|out| {
            out.reshape(mls.width(), mls.height(), mls.resolution(), mls.origin());
            let resolution = mls.resolution();
            for y in 0..mls.height() {
                for x in 0..mls.width() {
                    let center = match mls.top_patch(x, y) {
                        Some(p) => p,
                        None => continue,
                    };
                    let mut slope: Option<f64> = None;
                    let neighbors = [
                        (x.wrapping_sub(1), y),
                        (x + 1, y),
                        (x, y.wrapping_sub(1)),
                        (x, y + 1),
                    ];
                    for (nx, ny) in neighbors {
                        if let Some(n) = mls.top_patch(nx, ny) {
                            let g = op.gradient(
                                center.mean as f64,
                                n.mean as f64,
                                center.stdev as f64,
                                n.stdev as f64,
                                resolution,
                            );
                            slope = Some(slope.map_or(g, |s: f64| s.max(g)));
                        }
                    }
                    if let Some(slope) = slope {
                        out.set_elevation(x, y, slope as f32);
                    }
                }
            }
        })?;
        Ok(())
    }

    fn manifest_data(&self) -> serde_yaml::Value {
        serde_yaml::to_value(self).unwrap_or(serde_yaml::Value::Null)
    }

    fn clone_box(&self) -> Box<dyn OperatorKernel> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Factory for the class registry.
pub(crate) fn factory(record: &ItemRecord) -> Result<Item> {
    let kernel: MlsSlope = if record.data.is_null() {
        MlsSlope::default()
    } else {
        serde_yaml::from_value(record.data.clone())?
    };
    Ok(kernel.into_node(record.id.clone()).into())
}
