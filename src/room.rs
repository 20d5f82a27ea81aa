//! Parametric rooms: a floor slab and four walls around it.
//!
//! The room is centred on the origin in x and z. The floor slab is centred at
//! y = 0, so its top surface sits at `ROOM_THICKNESS / 2`; walls start exactly
//! there.

use cgmath::Vector3;
use serde::{Deserialize, Serialize};

use crate::data_structures::{
    geometry::{Geometry, cuboid},
    material::{Material, MaterialLibrary},
    scene_graph::{MeshData, SceneNode},
    transform::Transform,
};

/// Thickness of the floor slab and of every wall.
pub const ROOM_THICKNESS: f32 = 0.1;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    #[error("room {0} must be a positive, finite number")]
    InvalidDimension(&'static str),
}

/// Palette material ids for the room surfaces.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MaterialPalette {
    pub floor: String,
    pub wall: String,
}

impl Default for MaterialPalette {
    fn default() -> Self {
        Self {
            floor: "wood".to_string(),
            wall: "plaster".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RoomSpec {
    width: f32,
    height: f32,
    depth: f32,
    palette: MaterialPalette,
}

impl RoomSpec {
    pub fn new(width: f32, height: f32, depth: f32, palette: MaterialPalette) -> Result<Self, RoomError> {
        for (name, value) in [("width", width), ("height", height), ("depth", depth)] {
            if !(value.is_finite() && value > 0.0) {
                return Err(RoomError::InvalidDimension(name));
            }
        }
        Ok(Self {
            width,
            height,
            depth,
            palette,
        })
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    pub fn depth(&self) -> f32 {
        self.depth
    }

    pub fn palette(&self) -> &MaterialPalette {
        &self.palette
    }
}

/// Validates on the way in, so a config file cannot smuggle in a bad room.
impl<'de> Deserialize<'de> for RoomSpec {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            width: f32,
            height: f32,
            depth: f32,
            #[serde(default)]
            palette: MaterialPalette,
        }
        let raw = Raw::deserialize(deserializer)?;
        RoomSpec::new(raw.width, raw.height, raw.depth, raw.palette).map_err(serde::de::Error::custom)
    }
}

/// Size and centre of one box of the room.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RoomBox {
    pub size: Vector3<f32>,
    pub center: Vector3<f32>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RoomLayout {
    pub floor: RoomBox,
    pub wall_front: RoomBox,
    pub wall_back: RoomBox,
    pub wall_left: RoomBox,
    pub wall_right: RoomBox,
}

impl RoomLayout {
    pub fn walls(&self) -> [(&'static str, RoomBox); 4] {
        [
            ("wall_front", self.wall_front),
            ("wall_back", self.wall_back),
            ("wall_left", self.wall_left),
            ("wall_right", self.wall_right),
        ]
    }
}

pub fn layout(spec: &RoomSpec) -> RoomLayout {
    let t = ROOM_THICKNESS;
    let (w, h, d) = (spec.width, spec.height, spec.depth);
    let wall_y = t / 2.0 + h / 2.0;
    RoomLayout {
        floor: RoomBox {
            size: Vector3::new(w, t, d),
            center: Vector3::new(0.0, 0.0, 0.0),
        },
        wall_front: RoomBox {
            size: Vector3::new(w, h, t),
            center: Vector3::new(0.0, wall_y, d / 2.0),
        },
        wall_back: RoomBox {
            size: Vector3::new(w, h, t),
            center: Vector3::new(0.0, wall_y, -d / 2.0),
        },
        wall_left: RoomBox {
            size: Vector3::new(t, h, d),
            center: Vector3::new(-w / 2.0, wall_y, 0.0),
        },
        wall_right: RoomBox {
            size: Vector3::new(t, h, d),
            center: Vector3::new(w / 2.0, wall_y, 0.0),
        },
    }
}

fn box_node(name: &str, room_box: RoomBox, material: Material) -> SceneNode {
    let geometry = Geometry::new(cuboid(room_box.size.x, room_box.size.y, room_box.size.z));
    SceneNode::mesh(MeshData::new(geometry, vec![material]))
        .with_name(name)
        .with_transform(Transform::from_position(room_box.center))
}

/// Builds the room tree. Every call allocates fresh geometry and materials.
pub fn generate(spec: &RoomSpec, library: &MaterialLibrary) -> SceneNode {
    let layout = layout(spec);
    let mut root = SceneNode::group().with_name("room");
    root.add_child(box_node("floor", layout.floor, library.resolve(&spec.palette.floor)));
    for (name, wall) in layout.walls() {
        root.add_child(box_node(name, wall, library.resolve(&spec.palette.wall)));
    }
    root
}
