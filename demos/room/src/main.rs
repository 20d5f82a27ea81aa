use flow_stage::{LoadCallbacks, StageConfig};

/// Usage: `room [stage.json]`
///
/// Loads two models into the room; select one with `Tab` and place it.
fn main() -> anyhow::Result<()> {
    let mut config = match std::env::args().nth(1) {
        Some(path) => StageConfig::from_file(path)?,
        None => StageConfig::from_json(include_str!("../stage.json"))?,
    };
    config.asset_root = concat!(env!("CARGO_MANIFEST_DIR"), "/../../assets").to_string();

    flow_stage::run(config, |stage| {
        let mut tasks = Vec::new();
        for url in ["crate.obj", "stool.obj"] {
            let callbacks = LoadCallbacks::new()
                .on_load(move |root| log::info!("{url} ready as {:?}", root.id()))
                .on_error(move |err| log::warn!("{url} failed: {err}"));
            let (_, task) = stage.load_model(url, callbacks);
            tasks.push(task);
        }
        // stays a wireframe placeholder
        let (_, task) = stage.load_model("missing.glb", LoadCallbacks::new());
        tasks.push(task);
        tasks
    })
}
