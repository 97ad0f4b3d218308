//! Artifact listing derived from the output directory layout.
//!
//! `<root>/<bodies|clothes>/presets/*` are curated presets and always listed
//! first; generated artifacts sit directly in `<root>/<bodies|clothes>`.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::residency::SlotKey;

const PRESETS_DIR: &str = "presets";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub name: String,
    pub url: String,
    /// File extension without the dot.
    pub format: String,
    pub thumbnail: Option<String>,
    pub is_preset: bool,
}

fn extensions(kind: SlotKey) -> &'static [&'static str] {
    match kind {
        SlotKey::Body => &["obj"],
        SlotKey::Clothing => &["ply", "obj", "glb"],
    }
}

/// Display name: file stem without the exporter's `_body_<n>` / `_cloth` suffix.
pub fn display_name(kind: SlotKey, stem: &str) -> String {
    match kind {
        SlotKey::Body => match stem.rfind("_body_") {
            Some(i) if i + 6 < stem.len() && stem[i + 6..].chars().all(|c| c.is_ascii_digit()) => {
                stem[..i].to_string()
            }
            _ => stem.to_string(),
        },
        SlotKey::Clothing => stem.strip_suffix("_cloth").unwrap_or(stem).to_string(),
    }
}

/// List artifacts of `kind` under `root`, presets first. Generated files whose
/// name a preset already provides are skipped. Sorted by name.
pub fn list_artifacts(root: &Path, url_prefix: &str, kind: SlotKey, presets_only: bool) -> io::Result<Vec<ArtifactEntry>> {
    let prefix = url_prefix.trim_end_matches('/');
    let kind_dir = root.join(kind.output_dir_name());
    let kind_url = format!("{prefix}/{}", kind.output_dir_name());
    let mut entries: BTreeMap<String, ArtifactEntry> = BTreeMap::new();

    let presets = kind_dir.join(PRESETS_DIR);
    let preset_url = format!("{kind_url}/{PRESETS_DIR}");
    for (stem, file, ext) in scan(&presets, kind)? {
        let name = display_name(kind, &stem);
        let mut thumbs = vec![format!("{name}_thumb.jpg")];
        if kind == SlotKey::Body {
            thumbs.insert(0, format!("{name}.jpg"));
            thumbs.push(format!("{stem}.jpg"));
        }
        let thumbnail = thumbs
            .into_iter()
            .find(|t| presets.join(t).is_file())
            .map(|t| format!("{preset_url}/{t}"));
        // Later extensions in priority order replace earlier ones of the same name.
        entries.insert(
            name.clone(),
            ArtifactEntry {
                url: format!("{preset_url}/{file}"),
                name,
                format: ext,
                thumbnail,
                is_preset: true,
            },
        );
    }

    if !presets_only {
        for (stem, file, ext) in scan(&kind_dir, kind)? {
            let name = display_name(kind, &stem);
            if entries.contains_key(&name) {
                continue;
            }
            let thumb = format!("{name}_thumb.jpg");
            let thumbnail = kind_dir
                .join(&thumb)
                .is_file()
                .then(|| format!("{kind_url}/{thumb}"));
            entries.insert(
                name.clone(),
                ArtifactEntry {
                    url: format!("{kind_url}/{file}"),
                    name,
                    format: ext,
                    thumbnail,
                    is_preset: false,
                },
            );
        }
    }

    tracing::debug!(kind = %kind, count = entries.len(), presets_only, "listed artifacts");
    Ok(entries.into_values().collect())
}

/// (stem, file name, extension) of every listable file directly in `dir`,
/// in extension-priority then name order. A missing directory lists nothing.
fn scan(dir: &Path, kind: SlotKey) -> io::Result<Vec<(String, String, String)>> {
    let read = match fs::read_dir(dir) {
        Ok(read) => read,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut found = Vec::new();
    for entry in read {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        let (Some(stem), Some(ext), Some(file)) = (
            path.file_stem().and_then(|s| s.to_str()),
            path.extension().and_then(|s| s.to_str()),
            path.file_name().and_then(|s| s.to_str()),
        ) else {
            continue;
        };
        if let Some(rank) = extensions(kind).iter().position(|e| *e == ext) {
            found.push((rank, stem.to_string(), file.to_string(), ext.to_string()));
        }
    }
    found.sort();
    Ok(found.into_iter().map(|(_, stem, file, ext)| (stem, file, ext)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn names_strip_exporter_suffixes() {
        assert_eq!(display_name(SlotKey::Body, "FullBody01_body_0"), "FullBody01");
        assert_eq!(display_name(SlotKey::Body, "run_body_12"), "run");
        assert_eq!(display_name(SlotKey::Body, "my_body_shot"), "my_body_shot");
        assert_eq!(display_name(SlotKey::Body, "x_body_"), "x_body_");
        assert_eq!(display_name(SlotKey::Clothing, "tee_cloth"), "tee");
        assert_eq!(display_name(SlotKey::Clothing, "tee"), "tee");
    }

    #[test]
    fn presets_win_and_thumbnails_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let clothes = dir.path().join("clothes");
        touch(&clothes.join("presets/tee_cloth.glb"));
        touch(&clothes.join("presets/tee_thumb.jpg"));
        touch(&clothes.join("tee_cloth.obj"));
        touch(&clothes.join("jacket_cloth.obj"));
        touch(&clothes.join("jacket_thumb.jpg"));
        touch(&clothes.join("notes.txt"));
        touch(&clothes.join("half_cloth.obj.part"));

        let all = list_artifacts(dir.path(), "/outputs/", SlotKey::Clothing, false).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "jacket");
        assert!(!all[0].is_preset);
        assert_eq!(all[0].thumbnail.as_deref(), Some("/outputs/clothes/jacket_thumb.jpg"));
        assert_eq!(all[1].name, "tee");
        assert!(all[1].is_preset);
        assert_eq!(all[1].format, "glb");
        assert_eq!(all[1].url, "/outputs/clothes/presets/tee_cloth.glb");
        assert_eq!(all[1].thumbnail.as_deref(), Some("/outputs/clothes/presets/tee_thumb.jpg"));

        let presets = list_artifacts(dir.path(), "/outputs", SlotKey::Clothing, true).unwrap();
        assert_eq!(presets.len(), 1);
    }

    #[test]
    fn preset_in_several_formats_lists_the_last_extension() {
        let dir = tempfile::tempdir().unwrap();
        let presets = dir.path().join("clothes/presets");
        touch(&presets.join("coat_cloth.ply"));
        touch(&presets.join("coat_cloth.glb"));
        touch(&presets.join("coat_cloth.obj"));

        let list = list_artifacts(dir.path(), "/o", SlotKey::Clothing, true).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].format, "glb");
        assert_eq!(list[0].url, "/o/clothes/presets/coat_cloth.glb");
    }

    #[test]
    fn body_preset_thumbnail_fallbacks() {
        let dir = tempfile::tempdir().unwrap();
        let presets = dir.path().join("bodies/presets");
        touch(&presets.join("Runner_body_0.obj"));
        touch(&presets.join("Runner_body_0.jpg"));

        let list = list_artifacts(dir.path(), "/o", SlotKey::Body, true).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].name, "Runner");
        assert_eq!(list[0].thumbnail.as_deref(), Some("/o/bodies/presets/Runner_body_0.jpg"));
    }

    #[test]
    fn missing_directories_list_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_artifacts(dir.path(), "/outputs", SlotKey::Body, false)
            .unwrap()
            .is_empty());
    }
}
