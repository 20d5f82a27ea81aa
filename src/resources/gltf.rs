//! glTF 2.0 parsing into a raw scene tree.

use cgmath::Vector3;
use log::warn;

use crate::{
    data_structures::{
        geometry::{Geometry, GeometryData, Topology},
        material::Material,
        scene_graph::{MeshData, SceneNode},
        transform::Transform,
    },
    resources::{
        LoadError,
        fetch::{Fetch, resolve_relative},
        format::AssetFormat,
    },
};

fn parse_error(reason: impl ToString) -> LoadError {
    LoadError::Parse {
        format: AssetFormat::Gltf,
        reason: reason.to_string(),
    }
}

/// Parses `.gltf` or `.glb` bytes. External buffers are fetched relative to
/// `url`.
pub async fn parse(url: &str, bytes: &[u8], fetcher: &dyn Fetch) -> Result<SceneNode, LoadError> {
    let gltf = ::gltf::Gltf::from_slice(bytes).map_err(parse_error)?;

    // Load buffers
    let mut buffer_data: Vec<Vec<u8>> = Vec::new();
    for buffer in gltf.buffers() {
        match buffer.source() {
            ::gltf::buffer::Source::Bin => {
                let blob = gltf
                    .blob
                    .as_deref()
                    .ok_or_else(|| parse_error("binary chunk missing"))?;
                buffer_data.push(blob.into());
            }
            ::gltf::buffer::Source::Uri(uri) if uri.starts_with("data:") => {
                return Err(parse_error("embedded data URIs are not supported"));
            }
            ::gltf::buffer::Source::Uri(uri) => {
                let bin = fetcher.fetch(&resolve_relative(url, uri)).await?;
                buffer_data.push(bin);
            }
        }
    }

    let materials: Vec<Material> = gltf.materials().map(to_material).collect();

    // Other scenes are alternative variants of the same asset.
    let mut models = Vec::new();
    if let Some(scene) = gltf.default_scene().or_else(|| gltf.scenes().next()) {
        for node in scene.nodes() {
            models.push(to_scene_node(node, &buffer_data, &materials)?);
        }
    }

    let root = if models.len() == 1 {
        models.remove(0)
    } else {
        let mut root = SceneNode::group();
        for model in models {
            root.add_child(model);
        }
        root
    };
    Ok(root)
}

fn to_material(material: ::gltf::Material) -> Material {
    let pbr = material.pbr_metallic_roughness();
    Material::new(
        material.name().unwrap_or("gltf_material"),
        pbr.base_color_factor(),
        pbr.metallic_factor(),
        pbr.roughness_factor(),
    )
}

fn to_scene_node(
    node: ::gltf::scene::Node,
    buffers: &[Vec<u8>],
    materials: &[Material],
) -> Result<SceneNode, LoadError> {
    let mut primitives = match node.mesh() {
        Some(mesh) => mesh
            .primitives()
            .filter_map(|primitive| to_mesh(&primitive, buffers, materials).transpose())
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };

    // A mesh with several primitives becomes a group of single-primitive meshes
    let mut scene_node = if primitives.len() == 1 {
        SceneNode::mesh(primitives.remove(0))
    } else {
        let mut group = SceneNode::group();
        for primitive in primitives {
            group.add_child(SceneNode::mesh(primitive));
        }
        group
    };
    scene_node.name = node.name().map(str::to_string);

    let (translation, rotation, scale) = node.transform().decomposed();
    scene_node.transform = Transform {
        position: Vector3::from(translation),
        // glTF stores quaternions as [x, y, z, w]
        rotation: cgmath::Quaternion::new(rotation[3], rotation[0], rotation[1], rotation[2]),
        scale: Vector3::from(scale),
    };

    for child in node.children() {
        scene_node.add_child(to_scene_node(child, buffers, materials)?);
    }
    Ok(scene_node)
}

fn to_mesh(
    primitive: &::gltf::Primitive,
    buffers: &[Vec<u8>],
    materials: &[Material],
) -> Result<Option<MeshData>, LoadError> {
    let topology = match primitive.mode() {
        ::gltf::mesh::Mode::Triangles => Topology::Triangles,
        ::gltf::mesh::Mode::Lines => Topology::Lines,
        mode => {
            warn!("Skipping primitive with unsupported mode {:?}", mode);
            return Ok(None);
        }
    };
    let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(Vec::as_slice));

    let positions: Vec<[f32; 3]> = reader
        .read_positions()
        .ok_or_else(|| parse_error("primitive without positions"))?
        .collect();
    let normals: Vec<[f32; 3]> = reader
        .read_normals()
        .map(|normals| normals.collect())
        .unwrap_or_default();
    let indices: Vec<u32> = match reader.read_indices() {
        Some(indices) => indices.into_u32().collect(),
        None => (0..positions.len() as u32).collect(),
    };
    if let Some(bad) = indices.iter().find(|&&i| i as usize >= positions.len()) {
        return Err(parse_error(format!(
            "index {bad} out of range for {} vertices",
            positions.len()
        )));
    }

    let data = match topology {
        Topology::Triangles => GeometryData::triangles(positions, normals, indices),
        Topology::Lines => GeometryData {
            normals: vec![[0.0, 1.0, 0.0]; positions.len()],
            positions,
            indices,
            topology,
        },
    };
    let material = primitive
        .material()
        .index()
        .and_then(|idx| materials.get(idx))
        .map(Material::instantiate)
        .unwrap_or_else(Material::fallback);

    Ok(Some(MeshData::new(Geometry::new(data), vec![material])))
}
