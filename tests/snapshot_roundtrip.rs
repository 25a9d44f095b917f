//! Directory snapshot round trips: items, ids, edges, metadata and map
//! payloads must survive serialize + unserialize.

use std::collections::BTreeSet;

use kshetra_env::core::{Covariance, Transform, TransformWithUncertainty};
use kshetra_env::maps::{ElevationGrid, MlsGrid, Pointcloud, TextFormat};
use kshetra_env::operators::{GridToMls, MlsSlope};
use kshetra_env::{Environment, FrameNode, ItemId, Layer};

/// A populated environment: frame tree with uncertainty, three map kinds,
/// a two-stage operator chain and a layer parenthood edge.
fn build_scene() -> (Environment, ItemId, ItemId) {
    let mut env = Environment::new();
    let root = env.root_frame().clone();
    let scan_frame = env
        .attach(
            FrameNode::with_transform(
                "scan/",
                TransformWithUncertainty::with_covariance(
                    Transform::from_translation([0.5, 0.0, 0.2]),
                    Covariance::diagonal([0.01; 3], [0.02; 3]),
                ),
            )
            .into(),
        )
        .unwrap();
    env.add_frame_child(&root, &scan_frame).unwrap();

    let mut grid = ElevationGrid::new(4, 3, 0.5, [-1.0, -1.0]);
    grid.set_elevation(0, 0, 0.1);
    grid.set_elevation(3, 2, 0.4);
    let grid_id = env
        .attach_map(
            Layer::with_map("grid/", Box::new(grid)),
            Some(&scan_frame),
        )
        .unwrap();
    {
        let layer = env.layer_mut(&grid_id).unwrap();
        layer.set_label("input grid");
        *layer.data_mut::<f64>("sensor_height").unwrap() = 0.3;
        layer
            .data_mut::<Vec<String>>("tags")
            .unwrap()
            .push("lidar".to_string());
    }

    let mls_id = env
        .attach_map(
            Layer::with_map("mls/", Box::new(MlsGrid::new(0, 0, 0.1, [0.0, 0.0]))),
            None,
        )
        .unwrap();
    let slope_id = env
        .attach_map(
            Layer::with_map(
                "slope/",
                Box::new(ElevationGrid::new(0, 0, 0.1, [0.0, 0.0])),
            ),
            None,
        )
        .unwrap();
    let cloud_text = "0 0 0 255\n1 2 3 128\n";
    let mut cloud_layer = Pointcloud::layer_from_text(
        "cloud/",
        &mut cloud_text.as_bytes(),
        1,
        TextFormat::Xyzr,
    )
    .unwrap();
    Pointcloud::set_vertex_variances(&mut cloud_layer, vec![0.01, 0.02]).unwrap();
    let cloud_id = env.attach_map(cloud_layer, Some(&scan_frame)).unwrap();
    env.add_layer_child(&grid_id, &cloud_id).unwrap();

    let to_mls = env
        .attach(GridToMls::default().into_node("to_mls/").into())
        .unwrap();
    env.set_input(&to_mls, &grid_id).unwrap();
    env.set_output(&to_mls, &mls_id).unwrap();
    let slope_op = env
        .attach(MlsSlope::default().into_node("slope_op/").into())
        .unwrap();
    env.set_input(&slope_op, &mls_id).unwrap();
    env.set_output(&slope_op, &slope_id).unwrap();

    (env, grid_id, mls_id)
}

fn id_set(env: &Environment) -> BTreeSet<String> {
    env.item_ids().map(|id| id.to_string()).collect()
}

#[test]
fn test_roundtrip_preserves_items_and_edges() {
    let (env, grid_id, _mls_id) = build_scene();
    let dir = tempfile::tempdir().unwrap();
    env.serialize(dir.path()).unwrap();
    assert!(dir.path().join(kshetra_env::io::SCENE_FILE).exists());

    let restored = Environment::unserialize(dir.path()).unwrap();
    assert_eq!(id_set(&env), id_set(&restored));
    assert_eq!(restored.environment_prefix(), env.environment_prefix());

    for id in env.item_ids() {
        let original = env.get(id).unwrap();
        let loaded = restored.get(id).expect("every id must survive");
        assert_eq!(original.class_name(), loaded.class_name());
        assert_eq!(original.label(), loaded.label());
    }
    for id in env.item_ids() {
        assert_eq!(env.frame_parent_of(id), restored.frame_parent_of(id));
        assert_eq!(env.frame_of_map(id), restored.frame_of_map(id));
        assert_eq!(env.layer_parents(id), restored.layer_parents(id));
        assert_eq!(env.generator_of(id), restored.generator_of(id));
    }

    // metadata keys and values survive
    let layer = restored.layer(&grid_id).unwrap();
    assert_eq!(*layer.data::<f64>("sensor_height").unwrap(), 0.3);
    assert_eq!(
        layer.data::<Vec<String>>("tags").unwrap(),
        &vec!["lidar".to_string()]
    );
}

#[test]
fn test_roundtrip_preserves_transform_uncertainty() {
    let (env, _, _) = build_scene();
    let dir = tempfile::tempdir().unwrap();
    env.serialize(dir.path()).unwrap();
    let restored = Environment::unserialize(dir.path()).unwrap();

    let root = restored.root_frame().clone();
    for id in restored.item_ids().cloned().collect::<Vec<_>>() {
        if restored.frame(&id).is_err() || id == root {
            continue;
        }
        let original = env.transform_of(&id).unwrap();
        let loaded = restored.transform_of(&id).unwrap();
        assert!(original
            .transform
            .is_approx(&loaded.transform, 1e-12));
        assert_eq!(original.covariance, loaded.covariance);
    }
}

#[test]
fn test_generated_layers_load_dirty_and_regenerate() {
    let (env, _grid_id, mls_id) = build_scene();
    let dir = tempfile::tempdir().unwrap();
    env.serialize(dir.path()).unwrap();

    let mut restored = Environment::unserialize(dir.path()).unwrap();
    assert!(restored.layer(&mls_id).unwrap().is_dirty());

    let report = restored.update_operators();
    assert!(report.is_clean());
    let mls = restored.layer(&mls_id).unwrap().map_as::<MlsGrid>().unwrap();
    assert_eq!(mls.width(), 4);
    assert_eq!(mls.patch_count(), 2);
}

#[test]
fn test_grid_payload_survives_roundtrip() {
    let (env, grid_id, _) = build_scene();
    let dir = tempfile::tempdir().unwrap();
    env.serialize(dir.path()).unwrap();
    let restored = Environment::unserialize(dir.path()).unwrap();

    let grid = restored
        .layer(&grid_id)
        .unwrap()
        .map_as::<ElevationGrid>()
        .unwrap();
    assert_eq!(grid.width(), 4);
    assert_eq!(grid.height(), 3);
    assert_eq!(grid.elevation(0, 0), Some(0.1));
    assert_eq!(grid.elevation(3, 2), Some(0.4));
    assert_eq!(grid.elevation(1, 1), None);
}

#[test]
fn test_pointcloud_vertex_metadata_survives_roundtrip() {
    let (env, _, _) = build_scene();
    let dir = tempfile::tempdir().unwrap();
    env.serialize(dir.path()).unwrap();
    let restored = Environment::unserialize(dir.path()).unwrap();

    let layer = restored.sole_layer_with::<Pointcloud>().unwrap();
    let cloud = layer.map_as::<Pointcloud>().unwrap();
    assert_eq!(cloud.len(), 2);
    assert_eq!(cloud.vertices()[1], [1.0, 2.0, 3.0]);

    let colors = Pointcloud::vertex_colors(layer).unwrap();
    assert_eq!(colors[0], [1.0, 1.0, 1.0]);
    assert_eq!(colors[1], [128.0 / 255.0; 3]);
    assert_eq!(Pointcloud::vertex_variances(layer).unwrap(), &[0.01, 0.02]);
}

#[test]
fn test_legacy_payload_extension_accepted() {
    let (env, grid_id, _) = build_scene();
    let dir = tempfile::tempdir().unwrap();
    env.serialize(dir.path()).unwrap();

    // move the payload to its legacy name; the reader must still find it
    let layer = env.layer(&grid_id).unwrap();
    let primary = layer.map_file_name(dir.path(), None).unwrap();
    let legacy = layer.map_file_name(dir.path(), Some("grid")).unwrap();
    std::fs::rename(&primary, &legacy).unwrap();

    let restored = Environment::unserialize(dir.path()).unwrap();
    let grid = restored
        .layer(&grid_id)
        .unwrap()
        .map_as::<ElevationGrid>()
        .unwrap();
    assert_eq!(grid.elevation(0, 0), Some(0.1));
}

#[test]
fn test_payload_file_names_are_sanitized() {
    let (env, grid_id, _) = build_scene();
    let layer = env.layer(&grid_id).unwrap();
    let path = layer.map_file_name(std::path::Path::new("out"), None).unwrap();
    let name = path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(!name.contains('/'));
    assert!(name.starts_with('_'));
    assert!(name.ends_with(".grid.bin"));
}

#[test]
fn test_missing_payload_file_fails_cleanly() {
    let (env, grid_id, _) = build_scene();
    let dir = tempfile::tempdir().unwrap();
    env.serialize(dir.path()).unwrap();
    let payload = env
        .layer(&grid_id)
        .unwrap()
        .map_file_name(dir.path(), None)
        .unwrap();
    std::fs::remove_file(payload).unwrap();
    assert!(Environment::unserialize(dir.path()).is_err());
}
