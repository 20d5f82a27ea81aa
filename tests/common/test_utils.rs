use std::{cell::RefCell, collections::HashMap, rc::Rc};

use flow_stage::{
    lifecycle::{ResourceHandle, ResourceKind, ResourceReleaser},
    resources::{LoadError, fetch::Fetch},
};
use futures::{
    FutureExt,
    channel::oneshot,
    executor::LocalPool,
    future::LocalBoxFuture,
    task::LocalSpawnExt,
};
use serde_json::json;

/// Serves assets from memory and records every request.
#[derive(Clone, Default)]
pub struct MemoryFetcher {
    files: Rc<RefCell<HashMap<String, Vec<u8>>>>,
    requests: Rc<RefCell<Vec<String>>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, url: &str, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(url, bytes);
        self
    }

    pub fn insert(&self, url: &str, bytes: impl Into<Vec<u8>>) {
        self.files.borrow_mut().insert(url.to_string(), bytes.into());
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests.borrow().iter().filter(|r| *r == url).count()
    }

    pub fn total_requests(&self) -> usize {
        self.requests.borrow().len()
    }
}

impl Fetch for MemoryFetcher {
    fn fetch(&self, url: &str) -> LocalBoxFuture<'static, Result<Vec<u8>, LoadError>> {
        self.requests.borrow_mut().push(url.to_string());
        let result = self.files.borrow().get(url).cloned().ok_or_else(|| LoadError::Fetch {
            url: url.to_string(),
            reason: "not found".to_string(),
        });
        async move { result }.boxed_local()
    }
}

type Gate = oneshot::Sender<Result<Vec<u8>, LoadError>>;

/// Holds every fetch until the test opens its gate.
#[derive(Clone, Default)]
pub struct GatedFetcher {
    gates: Rc<RefCell<HashMap<String, Vec<Gate>>>>,
}

impl GatedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self, url: &str) -> usize {
        self.gates.borrow().get(url).map_or(0, Vec::len)
    }

    /// Completes every pending fetch of `url`; returns how many were still
    /// listening.
    pub fn open(&self, url: &str, bytes: &[u8]) -> usize {
        let gates = self.gates.borrow_mut().remove(url).unwrap_or_default();
        gates
            .into_iter()
            .filter(|gate| !gate.is_canceled())
            .map(|gate| gate.send(Ok(bytes.to_vec())))
            .filter(Result::is_ok)
            .count()
    }
}

impl Fetch for GatedFetcher {
    fn fetch(&self, url: &str) -> LocalBoxFuture<'static, Result<Vec<u8>, LoadError>> {
        let (tx, rx) = oneshot::channel();
        self.gates
            .borrow_mut()
            .entry(url.to_string())
            .or_default()
            .push(tx);
        async move { rx.await.unwrap_or(Err(LoadError::Aborted)) }.boxed_local()
    }
}

/// Remembers every released handle.
#[derive(Clone, Default)]
pub struct RecordingReleaser {
    released: Rc<RefCell<Vec<ResourceHandle>>>,
}

impl RecordingReleaser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.released.borrow().len()
    }

    pub fn blobs(&self) -> Vec<String> {
        self.released
            .borrow()
            .iter()
            .filter_map(|handle| match &handle.kind {
                ResourceKind::BlobUrl(url) => Some(url.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn handles(&self) -> Vec<ResourceHandle> {
        self.released.borrow().clone()
    }
}

impl ResourceReleaser for RecordingReleaser {
    fn release(&self, handle: &ResourceHandle) {
        self.released.borrow_mut().push(handle.clone());
    }
}

/// Spawns `task` and runs the pool until nothing can make progress.
pub fn drive(pool: &mut LocalPool, task: LocalBoxFuture<'static, ()>) {
    pool.spawner()
        .spawn_local(task)
        .expect("the pool accepts tasks");
    pool.run_until_stalled();
}

/// Corners and the 12 triangles of an axis-aligned box centred on the origin.
pub fn box_mesh(size: [f32; 3]) -> (Vec<[f32; 3]>, Vec<u16>) {
    let [hx, hy, hz] = size.map(|s| s / 2.0);
    let positions = (0..8)
        .map(|i| {
            [
                if i & 1 == 0 { -hx } else { hx },
                if i & 2 == 0 { -hy } else { hy },
                if i & 4 == 0 { -hz } else { hz },
            ]
        })
        .collect();
    #[rustfmt::skip]
    let indices = vec![
        0, 2, 1, 1, 2, 3, // -z
        4, 5, 6, 5, 7, 6, // +z
        0, 1, 4, 1, 5, 4, // -y
        2, 6, 3, 3, 6, 7, // +y
        0, 4, 2, 2, 4, 6, // -x
        1, 3, 5, 3, 7, 5, // +x
    ];
    (positions, indices)
}

/// The JSON document and binary buffer of a one-mesh glTF asset: a box of
/// `size` whose node sits at `center`, painted with one red material.
pub fn gltf_box_parts(size: [f32; 3], center: [f32; 3], buffer_uri: Option<&str>) -> (serde_json::Value, Vec<u8>) {
    let (positions, indices) = box_mesh(size);
    let mut bin: Vec<u8> = positions
        .iter()
        .flatten()
        .flat_map(|v| v.to_le_bytes())
        .collect();
    let positions_len = bin.len();
    bin.extend(indices.iter().flat_map(|i| i.to_le_bytes()));
    let indices_len = bin.len() - positions_len;
    while bin.len() % 4 != 0 {
        bin.push(0);
    }

    let half = size.map(|s| s / 2.0);
    let mut buffer = json!({ "byteLength": bin.len() });
    if let Some(uri) = buffer_uri {
        buffer["uri"] = json!(uri);
    }
    let document = json!({
        "asset": { "version": "2.0" },
        "scene": 0,
        "scenes": [{ "nodes": [0] }],
        "nodes": [{ "name": "box", "mesh": 0, "translation": center }],
        "meshes": [{
            "primitives": [{ "attributes": { "POSITION": 0 }, "indices": 1, "material": 0 }]
        }],
        "materials": [{
            "name": "red",
            "pbrMetallicRoughness": {
                "baseColorFactor": [1.0, 0.0, 0.0, 1.0],
                "metallicFactor": 0.0,
                "roughnessFactor": 0.6
            }
        }],
        "buffers": [buffer],
        "bufferViews": [
            { "buffer": 0, "byteOffset": 0, "byteLength": positions_len, "target": 34962 },
            { "buffer": 0, "byteOffset": positions_len, "byteLength": indices_len, "target": 34963 }
        ],
        "accessors": [
            {
                "bufferView": 0, "componentType": 5126, "count": positions.len(), "type": "VEC3",
                "min": [-half[0], -half[1], -half[2]], "max": half
            },
            { "bufferView": 1, "componentType": 5123, "count": indices.len(), "type": "SCALAR" }
        ]
    });
    (document, bin)
}

/// The same box packed as a binary `.glb`.
pub fn glb_box(size: [f32; 3], center: [f32; 3]) -> Vec<u8> {
    let (document, bin) = gltf_box_parts(size, center, None);
    let mut json = serde_json::to_vec(&document).expect("valid json");
    while json.len() % 4 != 0 {
        json.push(b' ');
    }

    let total = 12 + 8 + json.len() + 8 + bin.len();
    let mut glb = Vec::with_capacity(total);
    glb.extend_from_slice(b"glTF");
    glb.extend_from_slice(&2u32.to_le_bytes());
    glb.extend_from_slice(&(total as u32).to_le_bytes());
    glb.extend_from_slice(&(json.len() as u32).to_le_bytes());
    glb.extend_from_slice(b"JSON");
    glb.extend_from_slice(&json);
    glb.extend_from_slice(&(bin.len() as u32).to_le_bytes());
    glb.extend_from_slice(b"BIN\0");
    glb.extend_from_slice(&bin);
    glb
}

pub const TRIANGLE_OBJ: &str = "\
o tri
v 0 0 0
v 2 0 0
v 0 2 0
f 1 2 3
";
