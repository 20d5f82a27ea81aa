//! URL-keyed sharing of in-flight and finished asset parses.

use std::{cell::RefCell, collections::HashMap, rc::Rc, sync::Arc};

use futures::{
    FutureExt,
    future::{LocalBoxFuture, Shared},
};

use crate::resources::{
    LoadError, ParsedAsset,
    fetch::Fetch,
    format::{AssetFormat, is_blob_url},
    load_asset,
};

type SharedLoad = Shared<LocalBoxFuture<'static, Result<Arc<ParsedAsset>, LoadError>>>;

/// Concurrent requests for one URL share a single fetch and parse.
///
/// Successful parses stay cached for the lifetime of the cache; failures are
/// evicted once they resolve so a later request tries again. `blob:` references
/// are temporary and never outlive their load either. Cloning shares the cache.
#[derive(Clone)]
pub struct AssetCache {
    fetcher: Rc<dyn Fetch>,
    entries: Rc<RefCell<HashMap<String, SharedLoad>>>,
}

impl AssetCache {
    pub fn new(fetcher: Rc<dyn Fetch>) -> Self {
        Self {
            fetcher,
            entries: Rc::new(RefCell::new(HashMap::new())),
        }
    }

    pub fn load(
        &self,
        url: &str,
        hint: Option<AssetFormat>,
    ) -> LocalBoxFuture<'static, Result<Arc<ParsedAsset>, LoadError>> {
        let shared = self
            .entries
            .borrow_mut()
            .entry(url.to_string())
            .or_insert_with(|| {
                log::debug!("Cache miss for {url}");
                load_asset(url.to_string(), hint, self.fetcher.clone())
                    .map(|result| result.map(Arc::new))
                    .boxed_local()
                    .shared()
            })
            .clone();

        let entries = Rc::clone(&self.entries);
        let key = url.to_string();
        let transient = is_blob_url(url);
        async move {
            let result = shared.clone().await;
            if transient || result.is_err() {
                let mut entries = entries.borrow_mut();
                // a retry may already have replaced this entry
                if entries.get(&key).is_some_and(|current| current.ptr_eq(&shared)) {
                    entries.remove(&key);
                }
            }
            result
        }
        .boxed_local()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.entries.borrow().contains_key(url)
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn evict(&self, url: &str) -> bool {
        self.entries.borrow_mut().remove(url).is_some()
    }
}
