//! Vector Store
//!
//! Flat (exhaustive) L2 index over schema embeddings, the metadata sequence
//! that runs parallel to it, and the on-disk artifact pair.
//!
//! Layout of an index directory:
//!
//! ```text
//! <dir>/CURRENT                         manifest naming the active generation
//! <dir>/gen-<stamp>-<id>/schema.index   binary vectors
//! <dir>/gen-<stamp>-<id>/schema_metadata.json
//! ```
//!
//! A build writes a fresh generation directory and then replaces `CURRENT`
//! with a rename, so readers observe either the old pair or the new pair.

use crate::error::{Result, SqlRagError};
use crate::schema_rag::embedder::Embedding;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

const INDEX_MAGIC: &[u8; 4] = b"SQRI";
const INDEX_FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 4 + 8;

pub const MANIFEST_FILE: &str = "CURRENT";
pub const INDEX_FILE: &str = "schema.index";
pub const METADATA_FILE: &str = "schema_metadata.json";

/// One row of the metadata sequence. `embedding_id` equals the row's
/// position in both the metadata file and the vector index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub embedding_id: usize,
    pub table: String,
    pub column: Option<String>,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct SearchHit<'a> {
    pub record: &'a EmbeddingRecord,
    /// Squared Euclidean distance.
    pub distance: f32,
}

/// Exhaustive L2 index with its parallel metadata.
#[derive(Debug, Clone)]
pub struct FlatL2Index {
    dimension: usize,
    vectors: Vec<f32>,
    records: Vec<EmbeddingRecord>,
    column_lookup: HashMap<(String, String), usize>,
}

impl FlatL2Index {
    /// Builds an index, checking every id matches its position and every
    /// vector has the index dimension.
    pub fn new(
        dimension: usize,
        records: Vec<EmbeddingRecord>,
        embeddings: Vec<Embedding>,
    ) -> Result<Self> {
        if records.len() != embeddings.len() {
            return Err(SqlRagError::Index(format!(
                "Metadata has {} records but {} vectors were supplied",
                records.len(),
                embeddings.len()
            )));
        }
        let mut vectors = Vec::with_capacity(records.len() * dimension);
        for (pos, (record, embedding)) in records.iter().zip(embeddings).enumerate() {
            if record.embedding_id != pos {
                return Err(SqlRagError::Index(format!(
                    "Record at position {} has embedding_id {}",
                    pos, record.embedding_id
                )));
            }
            if embedding.len() != dimension {
                return Err(SqlRagError::Index(format!(
                    "Vector {} has dimension {}, index dimension is {}",
                    pos,
                    embedding.len(),
                    dimension
                )));
            }
            vectors.extend(embedding);
        }
        Ok(Self::from_parts(dimension, vectors, records))
    }

    fn from_parts(dimension: usize, vectors: Vec<f32>, records: Vec<EmbeddingRecord>) -> Self {
        let column_lookup = records
            .iter()
            .filter_map(|r| {
                r.column
                    .as_ref()
                    .map(|c| ((r.table.clone(), c.clone()), r.embedding_id))
            })
            .collect();
        Self {
            dimension,
            vectors,
            records,
            column_lookup,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[EmbeddingRecord] {
        &self.records
    }

    pub fn vector(&self, id: usize) -> Option<&[f32]> {
        if id >= self.records.len() {
            return None;
        }
        let start = id * self.dimension;
        Some(&self.vectors[start..start + self.dimension])
    }

    /// Stored vector of a column-level record, if the column was indexed.
    pub fn column_vector(&self, table: &str, column: &str) -> Option<&[f32]> {
        self.column_lookup
            .get(&(table.to_string(), column.to_string()))
            .and_then(|&id| self.vector(id))
    }

    /// Up to `k` records in ascending distance; equal distances fall back to
    /// ascending id so results are reproducible.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit<'_>>> {
        if query.len() != self.dimension {
            return Err(SqlRagError::Index(format!(
                "Query embedding dimension {} doesn't match index dimension {}",
                query.len(),
                self.dimension
            )));
        }
        if k == 0 || self.records.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f32)> = (0..self.records.len())
            .map(|id| {
                let start = id * self.dimension;
                let row = &self.vectors[start..start + self.dimension];
                let distance = row
                    .iter()
                    .zip(query)
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum::<f32>();
                (id, distance)
            })
            .collect();

        scored.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(id, distance)| SearchHit {
                record: &self.records[id],
                distance,
            })
            .collect())
    }

    fn encode_vectors(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.vectors.len() * 4);
        bytes.extend_from_slice(INDEX_MAGIC);
        bytes.extend_from_slice(&INDEX_FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(self.dimension as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.records.len() as u64).to_le_bytes());
        for value in &self.vectors {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes
    }

    fn decode_vectors(bytes: &[u8]) -> Result<(usize, usize, Vec<f32>)> {
        if bytes.len() < HEADER_LEN || &bytes[..4] != INDEX_MAGIC {
            return Err(SqlRagError::Index("Not a schema index file".to_string()));
        }
        let version = u32::from_le_bytes(read_array(&bytes[4..8]));
        if version != INDEX_FORMAT_VERSION {
            return Err(SqlRagError::Index(format!(
                "Unsupported index format version {}",
                version
            )));
        }
        let dimension = u32::from_le_bytes(read_array(&bytes[8..12])) as usize;
        let count = u64::from_le_bytes(read_array(&bytes[12..20])) as usize;

        let body = &bytes[HEADER_LEN..];
        let expected = count
            .checked_mul(dimension)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| SqlRagError::Index("Index header overflows".to_string()))?;
        if body.len() != expected {
            return Err(SqlRagError::Index(format!(
                "Index body is {} bytes, header promises {}",
                body.len(),
                expected
            )));
        }
        let vectors = body
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes(read_array(chunk)))
            .collect();
        Ok((dimension, count, vectors))
    }
}

fn read_array<const N: usize>(slice: &[u8]) -> [u8; N] {
    let mut buf = [0u8; N];
    buf.copy_from_slice(&slice[..N]);
    buf
}

/// Manifest stored in `CURRENT`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub generation: String,
    pub embedding_model: String,
    pub dimension: usize,
    pub records: usize,
    pub built_at: DateTime<Utc>,
}

/// A loaded index together with the manifest that named it.
#[derive(Debug, Clone)]
pub struct PersistedIndex {
    pub manifest: IndexManifest,
    pub index: FlatL2Index,
}

/// Reads and writes index artifact pairs under one directory.
pub struct IndexStore {
    root: PathBuf,
}

impl IndexStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writes a new generation and makes it current.
    pub fn save(&self, index: &FlatL2Index, embedding_model: &str) -> Result<IndexManifest> {
        std::fs::create_dir_all(&self.root)?;

        let built_at = Utc::now();
        let short_id = uuid::Uuid::new_v4().simple().to_string();
        let generation = format!(
            "gen-{}-{}",
            built_at.format("%Y%m%dT%H%M%S%.3fZ"),
            &short_id[..8]
        );
        let gen_dir = self.root.join(&generation);
        std::fs::create_dir(&gen_dir)?;

        write_synced(&gen_dir.join(INDEX_FILE), &index.encode_vectors())?;
        let metadata = serde_json::to_vec(&index.records)?;
        write_synced(&gen_dir.join(METADATA_FILE), &metadata)?;

        let manifest = IndexManifest {
            generation,
            embedding_model: embedding_model.to_string(),
            dimension: index.dimension,
            records: index.len(),
            built_at,
        };

        let tmp_path = self.root.join(format!("{}.tmp", MANIFEST_FILE));
        write_synced(&tmp_path, &serde_json::to_vec_pretty(&manifest)?)?;
        std::fs::rename(&tmp_path, self.root.join(MANIFEST_FILE)).map_err(|e| {
            SqlRagError::Index(format!(
                "Failed to swap manifest in {}: {}",
                self.root.display(),
                e
            ))
        })?;

        tracing::info!(
            generation = %manifest.generation,
            records = manifest.records,
            dimension = manifest.dimension,
            "Persisted schema index"
        );
        Ok(manifest)
    }

    pub fn load(&self) -> Result<PersistedIndex> {
        let manifest_path = self.root.join(MANIFEST_FILE);
        let manifest: IndexManifest = serde_json::from_slice(
            &std::fs::read(&manifest_path).map_err(|e| {
                SqlRagError::Index(format!(
                    "No usable index at {}: {}",
                    manifest_path.display(),
                    e
                ))
            })?,
        )?;

        let gen_dir = self.root.join(&manifest.generation);
        let bytes = std::fs::read(gen_dir.join(INDEX_FILE))?;
        let (dimension, count, vectors) = FlatL2Index::decode_vectors(&bytes)?;
        let records: Vec<EmbeddingRecord> =
            serde_json::from_slice(&std::fs::read(gen_dir.join(METADATA_FILE))?)?;

        if count != records.len() {
            return Err(SqlRagError::Index(format!(
                "Index holds {} vectors but metadata has {} records",
                count,
                records.len()
            )));
        }
        if dimension != manifest.dimension || count != manifest.records {
            return Err(SqlRagError::Index(format!(
                "Manifest for {} does not describe its artifacts",
                manifest.generation
            )));
        }
        if let Some((pos, record)) = records
            .iter()
            .enumerate()
            .find(|(pos, r)| r.embedding_id != *pos)
        {
            return Err(SqlRagError::Index(format!(
                "Metadata record at position {} has embedding_id {}",
                pos, record.embedding_id
            )));
        }

        tracing::info!(
            generation = %manifest.generation,
            records = count,
            "Loaded schema index"
        );
        Ok(PersistedIndex {
            index: FlatL2Index::from_parts(dimension, vectors, records),
            manifest,
        })
    }

    /// Keeps the current generation plus the newest `keep - 1` others.
    pub fn prune(&self, keep: usize) -> Result<Vec<String>> {
        let current = self.load_manifest_name();
        let mut generations: Vec<String> = std::fs::read_dir(&self.root)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.starts_with("gen-"))
            .filter(|name| current.as_deref() != Some(name.as_str()))
            .collect();
        // Generation names sort chronologically.
        generations.sort();

        let mut removed = Vec::new();
        let excess = generations.len().saturating_sub(keep.saturating_sub(1));
        for name in generations.into_iter().take(excess) {
            match std::fs::remove_dir_all(self.root.join(&name)) {
                Ok(()) => removed.push(name),
                Err(e) => tracing::warn!(generation = %name, error = %e, "Failed to prune index generation"),
            }
        }
        Ok(removed)
    }

    fn load_manifest_name(&self) -> Option<String> {
        std::fs::read(self.root.join(MANIFEST_FILE))
            .ok()
            .and_then(|bytes| serde_json::from_slice::<IndexManifest>(&bytes).ok())
            .map(|m| m.generation)
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}
