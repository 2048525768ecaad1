//! Image build plan from `*/image_info.json`
//!
//! Each image directory carries an `image_info.json`:
//!
//! ```json
//! { "active": true, "image_name": "base-py", "depends_on": ["base"] }
//! ```
//!
//! Only active entries with a non-empty name are built. The plan lists them
//! dependencies first, ties broken by name.

use dindci_core::{CiError, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};

const INFO_FILE: &str = "image_info.json";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ImageInfo {
    active: bool,
    image_name: Option<String>,
    depends_on: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBuild {
    pub name: String,
    pub dir: PathBuf,
}

/// Active images under `root` in build order.
pub fn build_plan(root: &Path) -> Result<Vec<ImageBuild>> {
    if !root.is_dir() {
        return Err(CiError::Config(format!(
            "docker image directory does not exist: {}",
            root.display()
        )));
    }

    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let dir = entry?.path();
        if dir.join(INFO_FILE).is_file() {
            dirs.push(dir);
        }
    }
    dirs.sort();

    let mut images: BTreeMap<String, PathBuf> = BTreeMap::new();
    let mut deps: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for dir in dirs {
        let info = load(&dir.join(INFO_FILE))?;
        let name = match info.image_name {
            Some(name) if info.active && !name.is_empty() => name,
            _ => continue,
        };
        deps.insert(name.clone(), info.depends_on.into_iter().collect());
        images.insert(name, dir);
    }

    let order = topological_order(&deps)?;
    Ok(order
        .into_iter()
        .filter_map(|name| {
            let dir = images.remove(&name)?;
            Some(ImageBuild { name, dir })
        })
        .collect())
}

fn load(path: &Path) -> Result<ImageInfo> {
    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str(&raw)
        .map_err(|e| CiError::Config(format!("invalid {}: {e}", path.display())))
}

/// Kahn's algorithm over `deps` (image → images it builds on).
fn topological_order(deps: &BTreeMap<String, BTreeSet<String>>) -> Result<Vec<String>> {
    let mut indegree: BTreeMap<&str, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for (name, needs) in deps {
        indegree.insert(name, needs.len());
        for need in needs {
            if !deps.contains_key(need) {
                return Err(CiError::Config(format!(
                    "image `{name}` depends on `{need}`, which is not an active image"
                )));
            }
            dependents.entry(need).or_default().insert(name);
        }
    }

    let mut queue: VecDeque<&str> = indegree
        .iter()
        .filter(|&(_, &n)| n == 0)
        .map(|(&name, _)| name)
        .collect();
    let mut order = Vec::with_capacity(deps.len());
    while let Some(name) = queue.pop_front() {
        order.push(name.to_string());
        for &child in dependents.get(name).into_iter().flatten() {
            if let Some(n) = indegree.get_mut(child) {
                *n -= 1;
                if *n == 0 {
                    queue.push_back(child);
                }
            }
        }
    }

    if order.len() != deps.len() {
        let stuck: Vec<&str> = indegree
            .into_iter()
            .filter(|&(_, n)| n > 0)
            .map(|(name, _)| name)
            .collect();
        return Err(CiError::Config(format!(
            "could not order docker images, dependency cycle among {stuck:?}"
        )));
    }
    Ok(order)
}
