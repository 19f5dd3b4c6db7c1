//! Collection definitions loaded from `collections/*.yaml`.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use grib_index::CollectionSpec;
use tracing::{debug, info};

/// Load every collection definition under `config_dir/collections`,
/// sorted by name.
pub fn load_collection_specs(config_dir: &Path) -> Result<Vec<CollectionSpec>> {
    let dir = config_dir.join("collections");
    let entries = fs::read_dir(&dir)
        .with_context(|| format!("Failed to read collections directory {}", dir.display()))?;

    let mut specs = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == "yaml" || e == "yml");
        if !is_yaml {
            continue;
        }

        let spec = CollectionSpec::from_file(&path)
            .with_context(|| format!("Failed to load collection {}", path.display()))?;
        debug!(collection = %spec.name, path = %path.display(), "Loaded collection definition");
        specs.push(spec);
    }

    specs.sort_by(|a, b| a.name.cmp(&b.name));
    if let Some(pair) = specs.windows(2).find(|w| w[0].name == w[1].name) {
        bail!("collection '{}' is defined more than once", pair[0].name);
    }

    info!(count = specs.len(), dir = %dir.display(), "Loaded collection definitions");
    Ok(specs)
}

/// Load a single collection definition file.
pub fn load_collection_spec(path: &Path) -> Result<CollectionSpec> {
    CollectionSpec::from_file(path)
        .with_context(|| format!("Failed to load collection {}", path.display()))
}
