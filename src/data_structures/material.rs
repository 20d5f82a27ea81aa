//! Surface materials and the named palette library used by generated rooms.

use std::collections::HashMap;

use crate::data_structures::geometry::ResourceId;

/// Material definition with basic PBR properties.
///
/// Like [`Geometry`](crate::data_structures::geometry::Geometry), a material
/// has its own [`ResourceId`] and is disposed through the lifecycle manager of
/// the tree it belongs to.
#[derive(Debug)]
pub struct Material {
    id: ResourceId,
    pub name: String,
    pub base_color: [f32; 4],
    pub metallic: f32,
    pub roughness: f32,
    pub wireframe: bool,
}

impl Material {
    /// # Arguments
    /// * `metallic` - Metallic factor (0.0 = dielectric, 1.0 = metallic)
    /// * `roughness` - Surface roughness (0.0 = mirror, 1.0 = rough)
    pub fn new(name: &str, base_color: [f32; 4], metallic: f32, roughness: f32) -> Self {
        Self {
            id: ResourceId::next(),
            name: name.to_string(),
            base_color,
            metallic: metallic.clamp(0.0, 1.0),
            roughness: roughness.clamp(0.0, 1.0),
            wireframe: false,
        }
    }

    /// Flat, moderately reflective, single-colour material put on every
    /// sub-mesh of a mesh-only asset.
    pub fn fallback() -> Self {
        Self::new("fallback", [0.8, 0.8, 0.8, 1.0], 0.1, 0.5)
    }

    /// Material of the loading placeholder.
    pub fn placeholder() -> Self {
        let mut material = Self::new("placeholder", [0.6, 0.6, 0.6, 1.0], 0.0, 1.0);
        material.wireframe = true;
        material
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Same surface parameters, new identity.
    pub fn instantiate(&self) -> Self {
        Self {
            id: ResourceId::next(),
            name: self.name.clone(),
            base_color: self.base_color,
            metallic: self.metallic,
            roughness: self.roughness,
            wireframe: self.wireframe,
        }
    }

    /// Compares everything but the identity.
    pub fn same_surface(&self, other: &Material) -> bool {
        self.name == other.name
            && self.base_color == other.base_color
            && self.metallic == other.metallic
            && self.roughness == other.roughness
            && self.wireframe == other.wireframe
    }
}

/// Surface parameters a palette id resolves to.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MaterialPreset {
    pub base_color: [f32; 4],
    pub metallic: f32,
    pub roughness: f32,
}

/// Resolves palette material ids ("wood", "plaster", ...) to materials.
#[derive(Clone, Debug)]
pub struct MaterialLibrary {
    presets: HashMap<String, MaterialPreset>,
}

impl MaterialLibrary {
    pub const UNKNOWN: MaterialPreset = MaterialPreset {
        base_color: [0.7, 0.7, 0.7, 1.0],
        metallic: 0.0,
        roughness: 0.8,
    };

    pub fn empty() -> Self {
        Self {
            presets: HashMap::new(),
        }
    }

    pub fn insert(&mut self, id: &str, preset: MaterialPreset) -> &mut Self {
        self.presets.insert(id.to_string(), preset);
        self
    }

    pub fn contains(&self, id: &str) -> bool {
        self.presets.contains_key(id)
    }

    /// A fresh material for `id`; unknown ids get a neutral grey.
    pub fn resolve(&self, id: &str) -> Material {
        let preset = self.presets.get(id).copied().unwrap_or_else(|| {
            log::warn!("Unknown material id '{id}', falling back to neutral grey.");
            Self::UNKNOWN
        });
        Material::new(id, preset.base_color, preset.metallic, preset.roughness)
    }
}

impl Default for MaterialLibrary {
    fn default() -> Self {
        let mut library = Self::empty();
        let preset = |r, g, b, metallic, roughness| MaterialPreset {
            base_color: [r, g, b, 1.0],
            metallic,
            roughness,
        };
        library
            .insert("wood", preset(0.55, 0.37, 0.22, 0.0, 0.7))
            .insert("oak", preset(0.65, 0.49, 0.31, 0.0, 0.65))
            .insert("plaster", preset(0.92, 0.90, 0.86, 0.0, 0.95))
            .insert("concrete", preset(0.62, 0.62, 0.60, 0.0, 0.9))
            .insert("tile", preset(0.85, 0.85, 0.88, 0.0, 0.3))
            .insert("marble", preset(0.93, 0.93, 0.95, 0.0, 0.2))
            .insert("carpet", preset(0.40, 0.35, 0.45, 0.0, 1.0))
            .insert("brick", preset(0.60, 0.28, 0.20, 0.0, 0.85));
        library
    }
}
