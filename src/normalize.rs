//! Brings freshly loaded models into the unit space of the stage.
//!
//! A normalized model is centred on the origin and its largest extent is 1.
//! Recentring always happens before rescaling: the scale is applied by a
//! wrapper node around the already-centred raw root, so the centre stays put.

use cgmath::EuclideanSpace;

use crate::{
    bounds::BoundingVolume,
    data_structures::{scene_graph::SceneNode, transform::Transform},
};

#[derive(Debug)]
pub struct Normalized {
    /// Wrapper group at the origin, carrying the uniform scale.
    pub root: SceneNode,
    pub scale_factor: f32,
    pub original_bounds: BoundingVolume,
    /// Set when the model had no extent to scale by; it is still recentred.
    pub degenerate: bool,
}

pub fn normalize(mut raw: SceneNode) -> Normalized {
    let original_bounds = BoundingVolume::of(&raw);
    raw.transform.position -= original_bounds.center.to_vec();

    let max_dimension = original_bounds.max_dimension();
    let degenerate = !(max_dimension.is_finite() && max_dimension > 0.0);
    let scale_factor = if degenerate {
        log::debug!("Model has no extent to normalize by, keeping scale 1.0.");
        1.0
    } else {
        1.0 / max_dimension
    };

    let mut root = SceneNode::group()
        .with_name("normalized")
        .with_transform(Transform::new().with_uniform_scale(scale_factor));
    root.add_child(raw);

    Normalized {
        root,
        scale_factor,
        original_bounds,
        degenerate,
    }
}

#[cfg(test)]
mod tests {
    use cgmath::{InnerSpace, Point3, Vector3};

    use super::*;
    use crate::data_structures::{
        geometry::{Geometry, cuboid},
        scene_graph::MeshData,
    };

    #[test]
    fn centres_and_scales_to_unit_size() {
        let raw = SceneNode::mesh(MeshData::new(Geometry::new(cuboid(2.0, 4.0, 1.0)), vec![]))
            .with_transform(Transform::from_position(Vector3::new(10.0, 10.0, 10.0)));
        let normalized = normalize(raw);

        assert_eq!(normalized.scale_factor, 0.25);
        assert!(!normalized.degenerate);
        assert_eq!(normalized.root.transform.position, Vector3::new(0.0, 0.0, 0.0));

        let bounds = BoundingVolume::of(&normalized.root);
        assert!((bounds.center - Point3::new(0.0, 0.0, 0.0)).magnitude() < 1e-5);
        assert!((bounds.max_dimension() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn degenerate_models_keep_scale_one() {
        let raw = SceneNode::group().with_transform(Transform::from_position(Vector3::new(3.0, 0.0, 0.0)));
        let normalized = normalize(raw);
        assert!(normalized.degenerate);
        assert_eq!(normalized.scale_factor, 1.0);
        assert_eq!(normalized.root.children()[0].transform.position, Vector3::new(0.0, 0.0, 0.0));
    }
}
