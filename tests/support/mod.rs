#![allow(dead_code)]

use std::{path::Path, sync::Arc};

use quire::{
    config::{self, CliArgs, Settings},
    domain::content::{ContentKind, Element},
    infra::{memory::MemoryContentGraph, runtime::Runtime},
};

pub const SITE_URL: &str = "https://example.com/";

/// Load settings from a config file written into `root`.
pub fn settings(root: &Path, toml: &str) -> Settings {
    let path = root.join("quire.toml");
    std::fs::write(&path, toml).expect("write config file");
    config::load(&CliArgs {
        config_file: Some(path),
        command: None,
    })
    .expect("valid configuration")
}

/// Minimal config with caching on and every directory under `root`.
pub fn base_config(root: &Path) -> String {
    format!(
        r#"
[[sites]]
id = 1
base_url = "{SITE_URL}"

[cache]
enabled = true
base_path = "{static_dir}"

[media]
transform_dir = "{media_dir}"
"#,
        static_dir = root.join("static").display(),
        media_dir = root.join("media").display(),
    )
}

pub fn runtime(settings: &Settings, graph: Arc<MemoryContentGraph>) -> Runtime {
    Runtime::with_graph(settings, graph).expect("runtime")
}

pub fn entry(id: u64, section: &str, path: &str) -> Element {
    Element::new(
        id,
        1,
        ContentKind::Entry {
            section: section.into(),
        },
    )
    .with_url(format!("https://example.com/{path}"))
}

pub fn cached_file(root: &Path, uri: &str) -> std::path::PathBuf {
    let mut path = root.join("static").join("example.com");
    for segment in uri.split('/').filter(|segment| !segment.is_empty()) {
        path.push(segment);
    }
    path.join("index.html")
}
