//! On-disk bundle of documents, embeddings and index.
//!
//! A bundle is three artifacts sharing a path prefix:
//!
//! ```text
//! <prefix>_documents.json
//! <prefix>_embeddings.json
//! <prefix>_<index suffix>      e.g. <prefix>_flat.index
//! ```
//!
//! Each artifact carries the id of the save that produced it and the
//! fingerprint of the embedder behind the vectors. Artifacts are
//! staged under temporary names and renamed into place only after all three
//! were written, and a load refuses artifacts from different saves.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use ndarray::Array2;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::document::Document;
use crate::error::{RagError, Result};
use crate::utils::ensure_dir;
use crate::vector_db::VectorIndex;

const FORMAT_VERSION: u32 = 2;

/// Documents, their embedding matrix and the index built from it.
///
/// Row `i` of the embeddings and id `i` of the index always describe
/// document `i`; the constructor rejects anything else.
#[derive(Debug, Clone)]
pub struct Bundle<I> {
    documents: Vec<Document>,
    embeddings: Array2<f32>,
    index: I,
    embedder: Option<String>,
}

impl<I: VectorIndex> Bundle<I> {
    pub fn new(documents: Vec<Document>, embeddings: Array2<f32>, index: I) -> Result<Self> {
        if documents.len() != embeddings.nrows() {
            return Err(RagError::BundleCorrupt(format!(
                "{} documents but {} embedding rows",
                documents.len(),
                embeddings.nrows()
            )));
        }
        if index.len() != documents.len() {
            return Err(RagError::BundleCorrupt(format!(
                "index holds {} vectors for {} documents",
                index.len(),
                documents.len()
            )));
        }
        if index.dimension() != Some(embeddings.ncols()) {
            return Err(RagError::BundleCorrupt(format!(
                "index dimension {:?} does not match embedding dimension {}",
                index.dimension(),
                embeddings.ncols()
            )));
        }
        if !index.indexes(embeddings.view()) {
            return Err(RagError::BundleCorrupt(
                "index vectors differ from the stored embeddings".to_string(),
            ));
        }

        Ok(Self {
            documents,
            embeddings,
            index,
            embedder: None,
        })
    }

    /// Tags the bundle with the fingerprint of the embedder that produced it.
    pub fn with_embedder(mut self, embedder: Option<String>) -> Self {
        self.embedder = embedder;
        self
    }

    pub fn embedder(&self) -> Option<&str> {
        self.embedder.as_deref()
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn embeddings(&self) -> &Array2<f32> {
        &self.embeddings
    }

    pub fn index(&self) -> &I {
        &self.index
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn into_parts(self) -> (Vec<Document>, Array2<f32>, I) {
        (self.documents, self.embeddings, self.index)
    }
}

/// Artifact locations for a bundle prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundlePaths {
    pub documents: PathBuf,
    pub embeddings: PathBuf,
    pub index: PathBuf,
}

impl BundlePaths {
    pub fn new<I: VectorIndex>(prefix: impl AsRef<Path>) -> Self {
        let prefix = prefix.as_ref();
        Self {
            documents: with_suffix(prefix, "documents.json"),
            embeddings: with_suffix(prefix, "embeddings.json"),
            index: with_suffix(prefix, I::ARTIFACT_SUFFIX),
        }
    }

    pub fn all(&self) -> [&Path; 3] {
        [&self.documents, &self.embeddings, &self.index]
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push("_");
    name.push(suffix);
    PathBuf::from(name)
}

#[derive(Serialize)]
struct ArtifactRef<'a, T> {
    bundle_id: &'a str,
    format_version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    embedder: Option<&'a str>,
    payload: &'a T,
}

#[derive(Deserialize)]
struct Artifact<T> {
    bundle_id: String,
    format_version: u32,
    #[serde(default)]
    embedder: Option<String>,
    payload: T,
}

/// Temporary artifact files awaiting rename; whatever is left on drop is removed.
struct Staging<'a> {
    bundle_id: String,
    embedder: Option<&'a str>,
    pending: Vec<(PathBuf, PathBuf)>,
}

impl<'a> Staging<'a> {
    fn new(embedder: Option<&'a str>) -> Self {
        Self {
            bundle_id: Uuid::new_v4().to_string(),
            embedder,
            pending: Vec::with_capacity(3),
        }
    }

    fn write<T: Serialize>(&mut self, dest: &Path, payload: &T) -> Result<()> {
        let mut tmp = OsString::from(dest.as_os_str());
        tmp.push(format!(".tmp-{}", self.bundle_id));
        let tmp = PathBuf::from(tmp);
        self.pending.push((tmp.clone(), dest.to_path_buf()));

        let mut writer = BufWriter::new(File::create(&tmp)?);
        serde_json::to_writer(
            &mut writer,
            &ArtifactRef {
                bundle_id: &self.bundle_id,
                format_version: FORMAT_VERSION,
                embedder: self.embedder,
                payload,
            },
        )?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(())
    }

    fn commit(mut self) -> Result<()> {
        while let Some((tmp, dest)) = self.pending.first() {
            fs::rename(tmp, dest)?;
            self.pending.remove(0);
        }
        Ok(())
    }
}

impl Drop for Staging<'_> {
    fn drop(&mut self) {
        for (tmp, _) in &self.pending {
            let _ = fs::remove_file(tmp);
        }
    }
}

fn read_artifact<T: DeserializeOwned>(path: &Path) -> Result<Artifact<T>> {
    let file = File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => RagError::BundleMissing {
            path: path.to_path_buf(),
        },
        _ => RagError::Io(e),
    })?;

    let artifact: Artifact<T> = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| RagError::BundleCorrupt(format!("{}: {e}", path.display())))?;

    if artifact.format_version != FORMAT_VERSION {
        return Err(RagError::BundleCorrupt(format!(
            "{}: unsupported format version {}",
            path.display(),
            artifact.format_version
        )));
    }
    Ok(artifact)
}

impl<I> Bundle<I>
where
    I: VectorIndex + Serialize + DeserializeOwned,
{
    /// Writes all three artifacts under `prefix`, or none of them.
    pub fn save(&self, prefix: impl AsRef<Path>) -> Result<()> {
        let prefix = prefix.as_ref();
        let paths = BundlePaths::new::<I>(prefix);
        if let Some(parent) = paths.documents.parent() {
            if !parent.as_os_str().is_empty() {
                ensure_dir(parent)?;
            }
        }

        let mut staging = Staging::new(self.embedder());
        let bundle_id = staging.bundle_id.clone();
        staging.write(&paths.documents, &self.documents)?;
        staging.write(&paths.embeddings, &self.embeddings)?;
        staging.write(&paths.index, &self.index)?;
        staging.commit()?;

        info!(
            prefix = %prefix.display(),
            documents = self.documents.len(),
            bundle_id = %bundle_id,
            "saved retrieval bundle"
        );
        Ok(())
    }

    /// Loads a bundle saved under `prefix`.
    ///
    /// Fails with `BundleMissing` when any artifact is absent and with
    /// `BundleCorrupt` when artifacts are unreadable, come from different
    /// saves, or are out of alignment.
    pub fn load(prefix: impl AsRef<Path>) -> Result<Self> {
        let prefix = prefix.as_ref();
        let paths = BundlePaths::new::<I>(prefix);
        if let Some(missing) = paths.all().into_iter().find(|p| !p.exists()) {
            return Err(RagError::BundleMissing {
                path: missing.to_path_buf(),
            });
        }

        let documents: Artifact<Vec<Document>> = read_artifact(&paths.documents)?;
        let embeddings: Artifact<Array2<f32>> = read_artifact(&paths.embeddings)?;
        let index: Artifact<I> = read_artifact(&paths.index)?;

        if documents.bundle_id != embeddings.bundle_id || documents.bundle_id != index.bundle_id {
            return Err(RagError::BundleCorrupt(format!(
                "artifacts under {} come from different saves",
                prefix.display()
            )));
        }
        debug!(bundle_id = %documents.bundle_id, "bundle artifacts read");

        let bundle = Self::new(documents.payload, embeddings.payload, index.payload)?
            .with_embedder(embeddings.embedder);
        info!(
            prefix = %prefix.display(),
            documents = bundle.len(),
            dimension = bundle.embeddings.ncols(),
            embedder = bundle.embedder().unwrap_or("unknown"),
            "loaded retrieval bundle"
        );
        Ok(bundle)
    }
}
