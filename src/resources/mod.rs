use std::rc::Rc;

use crate::{
    data_structures::{material::Material, scene_graph::SceneNode},
    resources::{fetch::Fetch, format::AssetFormat},
};

/**
 * This module contains all logic for loading meshes and materials from external files.
 */
pub mod cache;
pub mod fetch;
pub mod format;
pub mod gltf;
pub mod obj;

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum LoadError {
    #[error("no asset URL given")]
    EmptyUrl,
    #[error("unsupported asset format: {0}")]
    UnsupportedFormat(String),
    #[error("failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },
    #[error("failed to parse {format} asset: {reason}")]
    Parse { format: AssetFormat, reason: String },
    #[error("asset contains no renderable geometry")]
    EmptyAsset,
    /// The load task was dropped before it finished.
    #[error("load was aborted before it finished")]
    Aborted,
}

/// A parsed, not yet normalized asset.
///
/// Cached parses are never handed out directly: every consumer takes its own
/// copy through [`SceneNode::instantiate`].
#[derive(Debug)]
pub struct ParsedAsset {
    pub url: String,
    pub format: AssetFormat,
    pub root: SceneNode,
}

/// Fetches `url` and parses it with the parser picked by `hint`, the URL
/// extension, or for `blob:` references the content itself.
pub async fn load_asset(
    url: String,
    hint: Option<AssetFormat>,
    fetcher: Rc<dyn Fetch>,
) -> Result<ParsedAsset, LoadError> {
    let resolved = AssetFormat::resolve(&url, hint)?;
    let bytes = fetcher.fetch(&url).await?;
    let format = match resolved {
        Some(format) => format,
        None => AssetFormat::sniff(&bytes).ok_or_else(|| LoadError::UnsupportedFormat(url.clone()))?,
    };
    log::debug!("Parsing {} bytes of {} from {}", bytes.len(), format, url);

    let root = match format {
        AssetFormat::Gltf => gltf::parse(&url, &bytes, fetcher.as_ref()).await?,
        AssetFormat::Obj => obj::parse(&bytes, &Material::fallback())?,
    };
    if root.mesh_count() == 0 {
        return Err(LoadError::EmptyAsset);
    }
    Ok(ParsedAsset { url, format, root })
}
