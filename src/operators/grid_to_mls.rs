//! Operator lifting an elevation grid into a multi-level surface grid.

use std::any::Any;

use serde::{Deserialize, Serialize};

use crate::environment::OperatorContext;
use crate::error::Result;
use crate::io::registry::ItemRecord;
use crate::item::Item;
use crate::maps::{ElevationGrid, MlsGrid, MlsPatch};
use crate::operator::{OperatorKernel, OperatorNode};

fn default_base_stdev() -> f32 {
    0.05
}

/// Converts an [`ElevationGrid`] into an [`MlsGrid`] with one patch per
/// observed cell. The output adopts the input's geometry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GridToMls {
    /// Standard deviation assigned to every generated patch.
    #[serde(default = "default_base_stdev")]
    pub base_stdev: f32,
}

impl Default for GridToMls {
    fn default() -> Self {
        Self {
            base_stdev: default_base_stdev(),
        }
    }
}

impl OperatorKernel for GridToMls {
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
        let grid = ctx.sole_input::<ElevationGrid>()?.clone();
        let base_stdev = self.base_stdev;
        ctx.with_sole_output_mut::<MlsGrid, _>(|mls| {
            mls.reshape(
                grid.width(),
                grid.height(),
                grid.resolution(),
                grid.origin(),
            );
            for y in 0..grid.height() {
                for x in 0..grid.width() {
                    if let Some(mean) = grid.elevation(x, y) {
                        mls.add_patch(
                            x,
                            y,
                            MlsPatch {
                                mean,
                                stdev: base_stdev,
                                height: 0.0,
                            },
                        );
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

impl GridToMls {
    /// Class-name tag.
    pub const CLASS_NAME: &'static str = "kshetra::GridToMls";

    /// Wrap into an operator node ready for attachment.
    pub fn into_node(self, id: impl Into<String>) -> OperatorNode {
        OperatorNode::new(id, Box::new(self))
    }
}

/// Factory for the class registry.
pub(crate) fn factory(record: &ItemRecord) -> Result<Item> {
    let kernel: GridToMls = if record.data.is_null() {
        GridToMls::default()
    } else {
        serde_yaml::from_value(record.data.clone())?
    };
    Ok(kernel.into_node(record.id.clone()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Environment;
    use crate::layer::Layer;

    #[test]
    fn test_grid_to_mls_generates_patches() {
        let mut env = Environment::new();
        let mut grid = ElevationGrid::new(3, 2, 0.5, [0.0, 0.0]);
        grid.set_elevation(0, 0, 1.0);
        grid.set_elevation(2, 1, -0.5);
        let grid_id = env
            .attach_map(Layer::with_map("grid/", Box::new(grid)), None)
            .unwrap();
        let mls_id = env
            .attach_map(
                Layer::with_map("mls/", Box::new(MlsGrid::new(0, 0, 0.1, [0.0, 0.0]))),
                None,
            )
            .unwrap();
        let op = env
            .attach(GridToMls::default().into_node("op/").into())
            .unwrap();
        env.set_input(&op, &grid_id).unwrap();
        env.set_output(&op, &mls_id).unwrap();

        assert!(env.layer(&mls_id).unwrap().is_dirty());
        let report = env.update_operators();
        assert!(report.is_clean());

        let layer = env.layer(&mls_id).unwrap();
        assert!(!layer.is_dirty());
        let mls = layer.map_as::<MlsGrid>().unwrap();
        assert_eq!(mls.width(), 3);
        assert_eq!(mls.patch_count(), 2);
        assert_eq!(mls.top_patch(0, 0).unwrap().mean, 1.0);
        assert!(mls.top_patch(1, 0).is_none());
    }
}
