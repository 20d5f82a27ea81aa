//! Picks the parser for an asset from its URL, an explicit hint, or its bytes.

use std::fmt;

use crate::resources::LoadError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AssetFormat {
    /// glTF 2.0, JSON (`.gltf`) or binary (`.glb`).
    Gltf,
    /// Wavefront OBJ, geometry only.
    Obj,
}

const EXTENSIONS: &[(&str, AssetFormat)] = &[
    ("gltf", AssetFormat::Gltf),
    ("glb", AssetFormat::Gltf),
    ("obj", AssetFormat::Obj),
];

const GLB_MAGIC: &[u8; 4] = b"glTF";

impl AssetFormat {
    pub fn from_extension(extension: &str) -> Option<Self> {
        EXTENSIONS
            .iter()
            .find(|(ext, _)| ext.eq_ignore_ascii_case(extension))
            .map(|(_, format)| *format)
    }

    /// Format named by the path of `url`, ignoring query and fragment.
    pub fn from_url(url: &str) -> Option<Self> {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        let file_name = path.rsplit('/').next().unwrap_or(path);
        let (_, extension) = file_name.rsplit_once('.')?;
        Self::from_extension(extension)
    }

    /// Recognizes glTF by the GLB magic or a JSON document, OBJ by a vertex
    /// statement.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(GLB_MAGIC) {
            return Some(AssetFormat::Gltf);
        }
        let first = bytes.iter().find(|b| !b.is_ascii_whitespace())?;
        if *first == b'{' {
            return Some(AssetFormat::Gltf);
        }
        let text = std::str::from_utf8(bytes).ok()?;
        text.lines()
            .any(|line| line.trim_start().starts_with("v "))
            .then_some(AssetFormat::Obj)
    }

    /// Resolves the format before anything is fetched.
    ///
    /// `blob:` URLs carry no extension, so they resolve to `None` without a
    /// hint and the caller has to sniff the fetched bytes.
    pub fn resolve(url: &str, hint: Option<AssetFormat>) -> Result<Option<Self>, LoadError> {
        if url.trim().is_empty() {
            return Err(LoadError::EmptyUrl);
        }
        if let Some(format) = hint {
            return Ok(Some(format));
        }
        if is_blob_url(url) {
            return Ok(None);
        }
        Self::from_url(url)
            .map(Some)
            .ok_or_else(|| LoadError::UnsupportedFormat(url.to_string()))
    }
}

impl fmt::Display for AssetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetFormat::Gltf => write!(f, "glTF"),
            AssetFormat::Obj => write!(f, "OBJ"),
        }
    }
}

pub fn is_blob_url(url: &str) -> bool {
    url.starts_with("blob:")
}
