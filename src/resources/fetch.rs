//! Byte sources for assets: files next to the binary (or the page), and
//! temporary `blob:` references for local files handed over by the user.

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    rc::Rc,
    sync::Arc,
};

use futures::{FutureExt, future::LocalBoxFuture};

use crate::{
    lifecycle::{ResourceHandle, ResourceKind, ResourceReleaser},
    resources::{LoadError, format::is_blob_url},
};

/// "Given a URL, return the asset bytes."
///
/// The returned future does not borrow the fetcher so it can outlive the call
/// and be shared between requesters.
pub trait Fetch {
    fn fetch(&self, url: &str) -> LocalBoxFuture<'static, Result<Vec<u8>, LoadError>>;
}

/// Loads relative URLs from the asset directory, or from the page's `assets/`
/// folder on the web.
#[derive(Clone, Debug)]
pub struct FileFetcher {
    #[cfg(not(target_arch = "wasm32"))]
    root: std::path::PathBuf,
}

impl FileFetcher {
    #[cfg(not(target_arch = "wasm32"))]
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[cfg(target_arch = "wasm32")]
    pub fn new(_root: impl AsRef<str>) -> Self {
        Self {}
    }
}

impl Default for FileFetcher {
    fn default() -> Self {
        Self::new("assets")
    }
}

#[cfg(target_arch = "wasm32")]
fn format_url(file_name: &str) -> Result<reqwest::Url, LoadError> {
    let fail = |reason: &str| LoadError::Fetch {
        url: file_name.to_string(),
        reason: reason.to_string(),
    };
    if let Ok(absolute) = reqwest::Url::parse(file_name) {
        return Ok(absolute);
    }
    let window = web_sys::window().ok_or_else(|| fail("no window"))?;
    let origin = window
        .location()
        .origin()
        .map_err(|_| fail("page origin unavailable"))?;
    let base = reqwest::Url::parse(&format!("{}/assets/", origin)).map_err(|e| fail(&e.to_string()))?;
    base.join(file_name).map_err(|e| fail(&e.to_string()))
}

impl Fetch for FileFetcher {
    #[cfg(not(target_arch = "wasm32"))]
    fn fetch(&self, url: &str) -> LocalBoxFuture<'static, Result<Vec<u8>, LoadError>> {
        let path = self.root.join(url);
        let url = url.to_string();
        async move {
            tokio::fs::read(&path).await.map_err(|e| LoadError::Fetch {
                url,
                reason: e.to_string(),
            })
        }
        .boxed_local()
    }

    #[cfg(target_arch = "wasm32")]
    fn fetch(&self, url: &str) -> LocalBoxFuture<'static, Result<Vec<u8>, LoadError>> {
        let url = url.to_string();
        async move {
            let to_error = |e: reqwest::Error| LoadError::Fetch {
                url: url.clone(),
                reason: e.to_string(),
            };
            let response = reqwest::get(format_url(&url)?).await.map_err(to_error)?;
            let response = response.error_for_status().map_err(to_error)?;
            Ok(response.bytes().await.map_err(to_error)?.to_vec())
        }
        .boxed_local()
    }
}

/// In-memory registry of temporary `blob:` references.
///
/// Cloning shares the registry. Revoking is idempotent; a revoked reference
/// fails to fetch.
#[derive(Clone, Default)]
pub struct BlobStore {
    blobs: Rc<RefCell<HashMap<String, Arc<Vec<u8>>>>>,
    next: Rc<Cell<u64>>,
}

impl BlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, bytes: Vec<u8>) -> String {
        let n = self.next.get() + 1;
        self.next.set(n);
        let url = format!("blob:flow-stage/{n}");
        self.blobs.borrow_mut().insert(url.clone(), Arc::new(bytes));
        url
    }

    pub fn contains(&self, url: &str) -> bool {
        self.blobs.borrow().contains_key(url)
    }

    pub fn revoke(&self, url: &str) -> bool {
        let removed = self.blobs.borrow_mut().remove(url).is_some();
        if removed {
            log::debug!("Revoked {url}");
        } else {
            // Object URL created by the page itself.
            #[cfg(target_arch = "wasm32")]
            {
                if is_blob_url(url) {
                    let _ = web_sys::Url::revoke_object_url(url);
                }
            }
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.blobs.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.borrow().is_empty()
    }
}

impl Fetch for BlobStore {
    fn fetch(&self, url: &str) -> LocalBoxFuture<'static, Result<Vec<u8>, LoadError>> {
        let result = self
            .blobs
            .borrow()
            .get(url)
            .map(|bytes| bytes.as_ref().clone())
            .ok_or_else(|| LoadError::Fetch {
                url: url.to_string(),
                reason: "blob reference is unknown or already revoked".to_string(),
            });
        futures::future::ready(result).boxed_local()
    }
}

impl ResourceReleaser for BlobStore {
    fn release(&self, handle: &ResourceHandle) {
        if let ResourceKind::BlobUrl(url) = &handle.kind {
            self.revoke(url);
        }
    }
}

/// Sends `blob:` URLs the blob store knows to the store and everything else to
/// `remote`, which also reads object URLs the page created itself.
#[derive(Clone)]
pub struct AssetSource {
    remote: Rc<dyn Fetch>,
    blobs: BlobStore,
}

impl AssetSource {
    pub fn new(remote: Rc<dyn Fetch>, blobs: BlobStore) -> Self {
        Self { remote, blobs }
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }
}

impl Fetch for AssetSource {
    fn fetch(&self, url: &str) -> LocalBoxFuture<'static, Result<Vec<u8>, LoadError>> {
        if is_blob_url(url) && self.blobs.contains(url) {
            self.blobs.fetch(url)
        } else {
            self.remote.fetch(url)
        }
    }
}

/// Resolves a URI found inside an asset against the asset's own URL.
pub fn resolve_relative(base: &str, uri: &str) -> String {
    if uri.contains("://") || uri.starts_with('/') || is_blob_url(base) {
        return uri.to_string();
    }
    let base = base.split(['?', '#']).next().unwrap_or(base);
    match base.rsplit_once('/') {
        Some((dir, _)) => format!("{dir}/{uri}"),
        None => uri.to_string(),
    }
}
