//! Write-through, file-backed job store.
//!
//! Layout under the store root:
//!
//! ```text
//! jobs/<job id>.json
//! chunks/<job id>/<chunk number>.json
//! payloads/<job id>.bin
//! ```
//!
//! Records are cached in memory and every mutation is persisted with a
//! write-to-temp-then-rename, so a crash leaves either the old or the new
//! record, never a torn one.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use tracing::{debug, warn};

use crate::error::{StoreError, validate_id};
use crate::job::{ChunkRecord, UploadJob};
use crate::store::JobStore;

const JOBS_DIR: &str = "jobs";
const CHUNKS_DIR: &str = "chunks";
const PAYLOADS_DIR: &str = "payloads";

/// Job store persisted as one JSON file per record.
pub struct FileJobStore {
    root: PathBuf,
    jobs: RwLock<HashMap<String, UploadJob>>,
    chunks: RwLock<HashMap<String, BTreeMap<u32, ChunkRecord>>>,
}

impl FileJobStore {
    /// Opens (creating if needed) a store rooted at `root`, loading every
    /// existing record.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        for dir in [JOBS_DIR, CHUNKS_DIR, PAYLOADS_DIR] {
            fs::create_dir_all(root.join(dir))?;
        }
        let jobs = load_jobs(&root.join(JOBS_DIR))?;
        let chunks = load_chunks(&root.join(CHUNKS_DIR))?;
        debug!(
            root = %root.display(),
            jobs = jobs.len(),
            chunked_jobs = chunks.len(),
            "opened job store"
        );
        Ok(Self {
            root,
            jobs: RwLock::new(jobs),
            chunks: RwLock::new(chunks),
        })
    }

    /// Returns the store root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn job_path(&self, id: &str) -> PathBuf {
        self.root.join(JOBS_DIR).join(format!("{id}.json"))
    }

    fn chunk_dir(&self, job_id: &str) -> PathBuf {
        self.root.join(CHUNKS_DIR).join(job_id)
    }

    fn payload_path(&self, job_id: &str) -> PathBuf {
        self.root.join(PAYLOADS_DIR).join(format!("{job_id}.bin"))
    }
}

impl JobStore for FileJobStore {
    fn put(&self, job: &UploadJob) -> Result<(), StoreError> {
        validate_id(&job.id)?;
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let json = serde_json::to_vec_pretty(job)?;
        write_atomic(&self.job_path(&job.id), &json)?;
        jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<UploadJob>, StoreError> {
        validate_id(id)?;
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        Ok(jobs.get(id).cloned())
    }

    fn list(&self) -> Result<Vec<UploadJob>, StoreError> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        Ok(jobs.values().cloned().collect())
    }

    fn put_chunk_record(
        &self,
        job_id: &str,
        chunk_number: u32,
        record: &ChunkRecord,
    ) -> Result<(), StoreError> {
        validate_id(job_id)?;
        let mut chunks = self.chunks.write().unwrap_or_else(PoisonError::into_inner);
        let dir = self.chunk_dir(job_id);
        fs::create_dir_all(&dir)?;
        let json = serde_json::to_vec(record)?;
        write_atomic(&dir.join(format!("{chunk_number}.json")), &json)?;
        chunks
            .entry(job_id.to_string())
            .or_default()
            .insert(chunk_number, record.clone());
        Ok(())
    }

    fn chunk_records(&self, job_id: &str) -> Result<BTreeMap<u32, ChunkRecord>, StoreError> {
        validate_id(job_id)?;
        let chunks = self.chunks.read().unwrap_or_else(PoisonError::into_inner);
        Ok(chunks.get(job_id).cloned().unwrap_or_default())
    }

    fn clear_chunk_records(&self, job_id: &str) -> Result<(), StoreError> {
        validate_id(job_id)?;
        let mut chunks = self.chunks.write().unwrap_or_else(PoisonError::into_inner);
        remove_dir_if_exists(&self.chunk_dir(job_id))?;
        chunks.remove(job_id);
        Ok(())
    }

    fn put_payload(&self, job_id: &str, data: &[u8]) -> Result<(), StoreError> {
        validate_id(job_id)?;
        write_atomic(&self.payload_path(job_id), data)?;
        Ok(())
    }

    fn read_payload(&self, job_id: &str, range: Range<u64>) -> Result<Vec<u8>, StoreError> {
        validate_id(job_id)?;
        let mut file = match File::open(self.payload_path(job_id)) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::PayloadMissing(job_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata()?.len();
        if range.start > range.end || range.end > len {
            return Err(StoreError::PayloadRange {
                job_id: job_id.to_string(),
                start: range.start,
                end: range.end,
                len,
            });
        }
        file.seek(SeekFrom::Start(range.start))?;
        let mut buf = vec![0u8; (range.end - range.start) as usize];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn delete_payload(&self, job_id: &str) -> Result<(), StoreError> {
        validate_id(job_id)?;
        remove_file_if_exists(&self.payload_path(job_id))?;
        Ok(())
    }

    fn delete_job(&self, id: &str) -> Result<(), StoreError> {
        validate_id(id)?;
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let mut chunks = self.chunks.write().unwrap_or_else(PoisonError::into_inner);
        remove_file_if_exists(&self.job_path(id))?;
        remove_dir_if_exists(&self.chunk_dir(id))?;
        remove_file_if_exists(&self.payload_path(id))?;
        jobs.remove(id);
        chunks.remove(id);
        debug!(job = %id, "deleted job records");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Disk helpers
// ---------------------------------------------------------------------------

/// Writes `data` to a sibling temp file, syncs it, then renames over `path`.
fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}

fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Loads every `*.json` job record; unreadable records are skipped.
fn load_jobs(dir: &Path) -> Result<HashMap<String, UploadJob>, StoreError> {
    let mut jobs = HashMap::new();
    for entry in fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let parsed = fs::read(&path)
            .map_err(StoreError::from)
            .and_then(|data| serde_json::from_slice::<UploadJob>(&data).map_err(Into::into));
        match parsed {
            Ok(job) => {
                jobs.insert(job.id.clone(), job);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable job record"),
        }
    }
    Ok(jobs)
}

/// Loads chunk records from `chunks/<job id>/<n>.json`.
fn load_chunks(dir: &Path) -> Result<HashMap<String, BTreeMap<u32, ChunkRecord>>, StoreError> {
    let mut all = HashMap::new();
    for job_dir in fs::read_dir(dir)?.flatten() {
        let job_path = job_dir.path();
        if !job_path.is_dir() {
            continue;
        }
        let Some(job_id) = job_path.file_name().and_then(|n| n.to_str()).map(String::from)
        else {
            continue;
        };
        let mut records = BTreeMap::new();
        for entry in fs::read_dir(&job_path)?.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(number) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u32>().ok())
            else {
                continue;
            };
            match fs::read(&path)
                .map_err(StoreError::from)
                .and_then(|data| serde_json::from_slice::<ChunkRecord>(&data).map_err(Into::into))
            {
                Ok(record) => {
                    records.insert(number, record);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable chunk record")
                }
            }
        }
        if !records.is_empty() {
            all.insert(job_id, records);
        }
    }
    Ok(all)
}
