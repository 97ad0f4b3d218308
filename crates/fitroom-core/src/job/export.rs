//! Export stage: persist raw engine output as mesh artifacts.
//!
//! Artifacts are written as Wavefront OBJ to `<name>.part` and renamed into
//! place once complete, so a concurrent listing never sees a partial file.
//! Clothing jobs also leave a `<stem>_thumb.jpg` copy of the source image,
//! which the catalog lists as the artifact's thumbnail.

use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::engine::{RawOutput, SubjectMesh};
use crate::intake::InputImage;
use crate::residency::SlotKey;

const TEMP_SUFFIX: &str = ".part";
const THUMB_SUFFIX: &str = "_thumb.jpg";
const STEM_MAX: usize = 128;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("engine produced no renderable subject")]
    NoRenderableSubject,
    #[error("write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// One persisted artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Subject index in detection order (0 for clothing).
    pub index: usize,
    pub path: PathBuf,
    /// Public URL under the configured prefix.
    pub url: String,
    pub thumbnail_url: Option<String>,
}

/// Output directory layout: `<root>/bodies` and `<root>/clothes`, served under `url_prefix`.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    url_prefix: String,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        let url_prefix = url_prefix.into().trim_end_matches('/').to_string();
        Self {
            root: root.into(),
            url_prefix,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn url_prefix(&self) -> &str {
        &self.url_prefix
    }

    pub fn kind_dir(&self, kind: SlotKey) -> PathBuf {
        self.root.join(kind.output_dir_name())
    }

    /// Write artifacts for `output`. Body: one OBJ per subject with vertices,
    /// named by detection index. Clothing: the first non-empty subject,
    /// grounded at the origin, plus a JPEG thumbnail of `source`.
    pub fn export(
        &self,
        kind: SlotKey,
        source_name: &str,
        source: &InputImage,
        output: &RawOutput,
    ) -> Result<Vec<Artifact>, ExportError> {
        let dir = self.kind_dir(kind);
        fs::create_dir_all(&dir).map_err(|source| ExportError::Io {
            path: dir.clone(),
            source,
        })?;
        let stem = artifact_stem(source_name);

        let mut artifacts = Vec::new();
        match kind {
            SlotKey::Body => {
                for (index, subject) in output.subjects.iter().enumerate() {
                    if !subject.is_renderable() {
                        tracing::warn!(index, "skipping subject without vertices");
                        continue;
                    }
                    let file = format!("{stem}_body_{index}.obj");
                    artifacts.push(self.write(kind, &dir, file, index, subject)?);
                }
            }
            SlotKey::Clothing => {
                if let Some(subject) = output.subjects.iter().find(|s| s.is_renderable()) {
                    let grounded = ground(subject);
                    let file = format!("{stem}_cloth.obj");
                    let mut artifact = self.write(kind, &dir, file, 0, &grounded)?;
                    artifact.thumbnail_url = Some(self.write_thumbnail(kind, &dir, &stem, source)?);
                    artifacts.push(artifact);
                }
            }
        }

        if artifacts.is_empty() {
            return Err(ExportError::NoRenderableSubject);
        }
        Ok(artifacts)
    }

    fn write(&self, kind: SlotKey, dir: &Path, file: String, index: usize, mesh: &SubjectMesh) -> Result<Artifact, ExportError> {
        let path = dir.join(&file);
        write_obj_atomic(&path, mesh).map_err(|source| ExportError::Io {
            path: path.clone(),
            source,
        })?;
        tracing::info!(path = %path.display(), vertices = mesh.vertices.len(), "artifact written");
        Ok(Artifact {
            index,
            path,
            url: format!("{}/{}/{}", self.url_prefix, kind.output_dir_name(), file),
            thumbnail_url: None,
        })
    }

    fn write_thumbnail(&self, kind: SlotKey, dir: &Path, stem: &str, source: &InputImage) -> Result<String, ExportError> {
        let file = format!("{stem}{THUMB_SUFFIX}");
        let path = dir.join(&file);
        let tmp = temp_path(&path);
        let result = source
            .save_jpeg(&tmp)
            .map_err(io::Error::other)
            .and_then(|()| fs::rename(&tmp, &path));
        if let Err(source) = result {
            let _ = fs::remove_file(&tmp);
            return Err(ExportError::Io { path, source });
        }
        tracing::debug!(path = %path.display(), "thumbnail written");
        Ok(format!("{}/{}/{}", self.url_prefix, kind.output_dir_name(), file))
    }
}

/// Filesystem-safe stem from an upload name: extension dropped, separators,
/// whitespace and control characters collapsed to `_`.
pub fn artifact_stem(source_name: &str) -> String {
    let base = source_name.rsplit(|c| c == '/' || c == '\\').next().unwrap_or(source_name);
    let base = match base.rfind('.') {
        Some(dot) if dot > 0 => &base[..dot],
        _ => base,
    };

    let mut out = String::with_capacity(base.len());
    let mut prev_underscore = false;
    for c in base.chars() {
        let c = if c.is_control() || c.is_whitespace() {
            '_'
        } else {
            c
        };
        if c == '_' {
            if !prev_underscore {
                out.push('_');
            }
            prev_underscore = true;
        } else {
            out.push(c);
            prev_underscore = false;
        }
    }

    let trimmed = out.trim_matches(|c| c == '.' || c == '_');
    let mut take = trimmed.len().min(STEM_MAX);
    while !trimmed.is_char_boundary(take) {
        take -= 1;
    }
    match &trimmed[..take] {
        "" => "upload".to_string(),
        s => s.to_string(),
    }
}

/// Translate so X/Z are centred on the vertex centroid and the lowest point sits at Y = 0.
fn ground(mesh: &SubjectMesh) -> SubjectMesh {
    let n = mesh.vertices.len() as f64;
    let (mut cx, mut cz) = (0.0f64, 0.0f64);
    let mut min_y = f32::INFINITY;
    for v in &mesh.vertices {
        cx += f64::from(v[0]);
        cz += f64::from(v[2]);
        min_y = min_y.min(v[1]);
    }
    let (cx, cz) = ((cx / n) as f32, (cz / n) as f32);
    tracing::debug!(dx = -cx, dy = -min_y, dz = -cz, "grounding clothing mesh");

    SubjectMesh {
        vertices: mesh
            .vertices
            .iter()
            .map(|v| [v[0] - cx, v[1] - min_y, v[2] - cz])
            .collect(),
        faces: mesh.faces.clone(),
    }
}

fn temp_path(final_path: &Path) -> PathBuf {
    let mut name = final_path.as_os_str().to_owned();
    name.push(TEMP_SUFFIX);
    PathBuf::from(name)
}

fn write_obj_atomic(path: &Path, mesh: &SubjectMesh) -> io::Result<()> {
    let tmp = temp_path(path);
    let result = (|| {
        let mut out = BufWriter::new(fs::File::create(&tmp)?);
        write_obj(&mut out, mesh)?;
        out.into_inner().map_err(|e| e.into_error())?.sync_all()?;
        fs::rename(&tmp, path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn write_obj(out: &mut impl Write, mesh: &SubjectMesh) -> io::Result<()> {
    writeln!(out, "# fitroom mesh")?;
    for v in &mesh.vertices {
        writeln!(out, "v {} {} {}", v[0], v[1], v[2])?;
    }
    // OBJ indices are 1-based.
    for f in &mesh.faces {
        writeln!(out, "f {} {} {}", f[0] + 1, f[1] + 1, f[2] + 1)?;
    }
    Ok(())
}
