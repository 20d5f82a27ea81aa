//! Wavefront OBJ parsing into a raw scene tree.
//!
//! OBJ carries geometry only as far as the stage is concerned: `.mtl` files are
//! never followed and every sub-mesh gets the same fallback material.

use std::io::{BufReader, Cursor};

use log::warn;

use crate::{
    data_structures::{
        geometry::{Geometry, GeometryData},
        material::Material,
        scene_graph::{MeshData, SceneNode},
    },
    resources::{LoadError, format::AssetFormat},
};

/// One mesh node per OBJ object, grouped under one root.
pub fn parse(bytes: &[u8], fallback: &Material) -> Result<SceneNode, LoadError> {
    let mut obj_reader = BufReader::new(Cursor::new(bytes));
    let (models, _) = tobj::load_obj_buf(
        &mut obj_reader,
        &tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ..Default::default()
        },
        |_| Err(tobj::LoadError::OpenFileFailed),
    )
    .map_err(|e| LoadError::Parse {
        format: AssetFormat::Obj,
        reason: e.to_string(),
    })?;

    let mut root = SceneNode::group();
    for (idx, model) in models.into_iter().enumerate() {
        let mesh = model.mesh;
        let positions: Vec<[f32; 3]> = mesh
            .positions
            .chunks_exact(3)
            .map(|p| [p[0], p[1], p[2]])
            .collect();
        if positions.is_empty() || mesh.indices.is_empty() {
            warn!("OBJ object {} ('{}') has no faces, skipping it.", idx, model.name);
            continue;
        }
        if mesh.indices.iter().any(|&i| i as usize >= positions.len()) {
            return Err(LoadError::Parse {
                format: AssetFormat::Obj,
                reason: format!("face index out of range in object '{}'", model.name),
            });
        }
        let normals = mesh
            .normals
            .chunks_exact(3)
            .map(|n| [n[0], n[1], n[2]])
            .collect();
        let data = GeometryData::triangles(positions, normals, mesh.indices);
        let node = SceneNode::mesh(MeshData::new(Geometry::new(data), vec![fallback.instantiate()]));
        root.add_child(node.with_name(&model.name));
    }
    Ok(root)
}
