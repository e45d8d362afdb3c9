//! Scanner (C3): walks a configured root directory, extracts tags, and
//! materializes the `Artist -> Work -> Recording -> File` hierarchy in the
//! Library KB.
//!
//! Grounded on `wkmp-ai`'s `services/file_scanner.rs` (two-phase walk:
//! sequential `walkdir` traversal with symlink-loop detection, then a
//! parallel `rayon` verification pass) and `services/hash_deduplicator.rs`
//! (chunked SHA-256 via `spawn_blocking`). Tag extraction follows
//! `services/metadata_extractor.rs`'s `lofty` probe-and-read shape. Move
//! detection generalizes `services/filename_matcher.rs`'s
//! path-already-known check to "same hash, different path".

use crate::library;
use crate::normalize;
use airwave_common::retry::retry_transient;
use airwave_common::{Error, Result};
use lofty::file::{AudioFile, TaggedFileExt};
use lofty::prelude::*;
use lofty::probe::Probe;
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use walkdir::WalkDir;

const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "ogg", "oga", "m4a", "aac", "wav", "opus", "wma"];

/// 2 GiB, matching the teacher's `validate_file_size` ceiling (§4.3 "size
/// filters").
const MAX_FILE_SIZE: u64 = 2 * 1024 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ScanSummary {
    pub files_seen: usize,
    pub files_ingested: usize,
    pub files_moved: usize,
    pub files_orphaned: usize,
    pub errors: Vec<String>,
}

struct RawTags {
    artist: Option<String>,
    title: Option<String>,
    album: Option<String>,
    duration_ms: Option<i64>,
    external_id: Option<String>,
}

/// Phase 1: sequential directory walk with symlink-loop detection and an
/// extension/size prefilter; cheap, I/O-bound, must stay sequential
/// because `symlink_visited` is mutated in place.
fn discover_candidates(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.exists() {
        return Err(Error::InvalidInput(format!("scan root not found: {}", root.display())));
    }
    if !root.is_dir() {
        return Err(Error::InvalidInput(format!("scan root is not a directory: {}", root.display())));
    }

    let mut symlink_visited: HashSet<PathBuf> = HashSet::new();
    let mut candidates = Vec::new();

    let walker = WalkDir::new(root).follow_links(false).into_iter().filter_entry(|entry| {
        if entry.file_type().is_symlink() {
            if let Ok(canonical) = entry.path().canonicalize() {
                if !symlink_visited.insert(canonical) {
                    tracing::warn!(path = %entry.path().display(), "symlink loop, skipping");
                    return false;
                }
            }
        }
        true
    });

    for entry in walker {
        match entry {
            Ok(entry) if entry.file_type().is_file() => {
                if has_audio_extension(entry.path()) {
                    candidates.push(entry.path().to_path_buf());
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("error walking scan root: {e}"),
        }
    }
    Ok(candidates)
}

fn has_audio_extension(path: &Path) -> bool {
    path.extension().map(|ext| ext.to_string_lossy().to_lowercase()).is_some_and(|ext| AUDIO_EXTENSIONS.contains(&ext.as_str()))
}

fn hash_file(path: &Path) -> std::io::Result<String> {
    use std::io::Read;
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 1024 * 1024];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn read_tags(path: &Path) -> Result<RawTags> {
    let tagged = Probe::open(path)
        .map_err(|e| Error::Internal(format!("probe failed for {}: {e}", path.display())))?
        .read()
        .map_err(|e| Error::Internal(format!("tag read failed for {}: {e}", path.display())))?;

    let duration_ms = Some(tagged.properties().duration().as_millis() as i64);
    let tag = tagged.primary_tag().or_else(|| tagged.first_tag());

    let (artist, title, album) = match tag {
        Some(tag) => (
            tag.artist().map(|s| s.to_string()),
            tag.title().map(|s| s.to_string()),
            tag.album().map(|s| s.to_string()),
        ),
        None => (None, None, None),
    };

    Ok(RawTags { artist, title, album, duration_ms, external_id: None })
}

/// One file's worth of scan work, grouped by primary artist name so the
/// writer phase can serialize per-artist (§4.3 "writes to C2 are
/// serialized per-Artist to avoid write hotspots").
struct PreparedFile {
    path: PathBuf,
    content_hash: String,
    size: i64,
    mtime: String,
    artist_name: String,
    raw_artist: String,
    title: String,
    version_type: String,
    duration_ms: Option<i64>,
    external_id: Option<String>,
}

/// Phase 2: parallel tag read + hash, run off the async runtime via
/// `rayon`. Corrupt/unreadable files are counted and skipped (§7
/// `Corrupt`), never abort the scan.
fn prepare_files(candidates: &[PathBuf], errors: &std::sync::Mutex<Vec<String>>) -> Vec<PreparedFile> {
    candidates
        .par_iter()
        .filter_map(|path| match prepare_one(path) {
            Ok(prepared) => Some(prepared),
            Err(e) => {
                errors.lock().unwrap().push(format!("{}: {e}", path.display()));
                None
            }
        })
        .collect()
}

fn prepare_one(path: &Path) -> Result<PreparedFile> {
    let metadata = std::fs::metadata(path).map_err(Error::Io)?;
    if metadata.len() > MAX_FILE_SIZE {
        return Err(Error::InvalidInput(format!("file too large: {} bytes", metadata.len())));
    }

    let tags = read_tags(path)?;
    let raw_artist = tags.artist.unwrap_or_default();
    let raw_title = tags.title.unwrap_or_default();
    if raw_artist.is_empty() || raw_title.is_empty() {
        return Err(Error::InvalidInput("missing artist or title tag".to_string()));
    }

    let artist_name = normalize::clean_artist(&raw_artist);
    let (clean_title, _feat) = normalize::clean_title(&raw_title);
    let (stripped_title, version_type) = normalize::extract_version(&clean_title, tags.album.as_deref());

    let content_hash = hash_file(path).map_err(Error::Io)?;
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| chrono::DateTime::from_timestamp(d.as_secs() as i64, 0).unwrap_or_default().to_rfc3339())
        .unwrap_or_default();

    Ok(PreparedFile {
        path: path.to_path_buf(),
        content_hash,
        size: metadata.len() as i64,
        mtime,
        artist_name,
        raw_artist,
        title: stripped_title,
        version_type,
        duration_ms: tags.duration_ms,
        external_id: tags.external_id,
    })
}

/// Phase 3: serialized-per-artist writes into the Library KB, plus vector
/// index upserts for every recording touched.
async fn write_prepared(
    pool: &SqlitePool,
    vector: &impl crate::vector::VectorIndex,
    prepared: Vec<PreparedFile>,
    fuzzy_threshold: f64,
    max_fuzzy_works: usize,
) -> Result<usize> {
    let mut by_artist: HashMap<String, Vec<PreparedFile>> = HashMap::new();
    for file in prepared {
        by_artist.entry(file.artist_name.clone()).or_default().push(file);
    }

    let mut ingested = 0usize;
    for (_artist_name, files) in by_artist {
        for file in files {
            retry_transient("scanner write_prepared", 3, Duration::from_secs(5), || async {
                let artist = library::upsert_artist(pool, &file.artist_name).await?;
                let work = library::upsert_work(pool, &file.title, artist.id, fuzzy_threshold, max_fuzzy_works).await?;
                library::link_multi_artists(pool, work.id, &file.raw_artist).await?;
                let recording = library::upsert_recording(
                    pool,
                    work.id,
                    &file.title,
                    &file.version_type,
                    file.duration_ms,
                    file.external_id.as_deref(),
                )
                .await?;

                let path_str = file.path.to_string_lossy().to_string();
                library::upsert_file(pool, recording.id, &path_str, &file.content_hash, file.size, &file.mtime).await?;
                vector.upsert(recording.id, &format!("{} - {}", artist.name, recording.title)).await?;
                Ok(())
            })
            .await?;
            ingested += 1;
        }
    }
    Ok(ingested)
}

/// Orphan GC (§4.3): files whose on-disk path no longer exists and whose
/// hash isn't observed anywhere else in this scan are deleted; a file at a
/// missing path whose hash still exists is a move, not an orphan.
async fn reconcile_missing(
    pool: &SqlitePool,
    seen_paths: &HashSet<String>,
    seen_hashes: &HashMap<String, PathBuf>,
) -> Result<(usize, usize)> {
    let known = library::list_all_paths(pool).await?;
    let mut moved = 0usize;
    let mut orphaned = 0usize;

    for (file_id, path, hash) in known {
        if seen_paths.contains(&path) {
            continue;
        }
        if Path::new(&path).exists() {
            continue;
        }
        if let Some(new_path) = seen_hashes.get(&hash) {
            let new_path_str = new_path.to_string_lossy().to_string();
            if new_path_str != path {
                let mtime = std::fs::metadata(new_path)
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| chrono::DateTime::from_timestamp(d.as_secs() as i64, 0).unwrap_or_default().to_rfc3339())
                    .unwrap_or_default();
                library::move_file(pool, file_id, &new_path_str, &mtime).await?;
                moved += 1;
            }
        } else {
            library::delete_file(pool, file_id).await?;
            orphaned += 1;
        }
    }
    Ok((moved, orphaned))
}

/// Run a full scan of `root`, reporting progress through `handle` and
/// respecting cooperative cancellation at each unit of work (one file).
/// Retains metadata-only Recordings (zero files) per §4.3; only
/// `LibraryFile` rows are ever deleted here.
pub async fn scan(
    pool: &SqlitePool,
    vector: &impl crate::vector::VectorIndex,
    handle: &crate::jobs::JobHandle,
    root: &Path,
    fuzzy_threshold: f64,
    max_fuzzy_works: usize,
) -> Result<ScanSummary> {
    let candidates = discover_candidates(root)?;
    let total = candidates.len();
    handle.report(0, format!("discovered {total} candidate files"));

    let errors = std::sync::Mutex::new(Vec::new());
    let prepared = prepare_files(&candidates, &errors);
    handle.report((total / 2) as u64, "tag extraction complete");

    if handle.is_cancelled() {
        return Ok(ScanSummary {
            files_seen: total,
            files_ingested: 0,
            files_moved: 0,
            files_orphaned: 0,
            errors: errors.into_inner().unwrap(),
        });
    }

    let mut seen_paths: HashSet<String> = HashSet::new();
    let mut seen_hashes: HashMap<String, PathBuf> = HashMap::new();
    for file in &prepared {
        seen_paths.insert(file.path.to_string_lossy().to_string());
        seen_hashes.insert(file.content_hash.clone(), file.path.clone());
    }

    let ingested = write_prepared(pool, vector, prepared, fuzzy_threshold, max_fuzzy_works).await?;
    handle.report(total as u64, "writing complete, reconciling orphans");

    let (moved, orphaned) = reconcile_missing(pool, &seen_paths, &seen_hashes).await?;

    Ok(ScanSummary {
        files_seen: total,
        files_ingested: ingested,
        files_moved: moved,
        files_orphaned: orphaned,
        errors: errors.into_inner().unwrap(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_extension_detection() {
        assert!(has_audio_extension(Path::new("song.mp3")));
        assert!(has_audio_extension(Path::new("song.FLAC")));
        assert!(!has_audio_extension(Path::new("notes.txt")));
    }

    #[test]
    fn discover_rejects_missing_root() {
        let err = discover_candidates(Path::new("/nonexistent/airwave/root")).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn discover_rejects_file_as_root() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let err = discover_candidates(tmp.path()).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn hash_file_is_stable() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        use std::io::Write;
        tmp.write_all(b"some audio bytes").unwrap();
        let h1 = hash_file(tmp.path()).unwrap();
        let h2 = hash_file(tmp.path()).unwrap();
        assert_eq!(h1, h2);
    }

    #[tokio::test]
    async fn scan_empty_directory_yields_empty_summary() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::library::schema::sync_all(&pool).await.unwrap();
        crate::vector::sync_schema(&pool).await.unwrap();
        let bus = airwave_common::events::EventBus::new(16);
        let controller = crate::jobs::JobController::new(bus);
        let vector = crate::vector::InMemoryVectorIndex::new();

        let dir = tempfile::tempdir().unwrap();
        let summary = {
            let (tx, rx) = tokio::sync::oneshot::channel();
            let task_id = controller.spawn(1, {
                let pool = pool.clone();
                let path = dir.path().to_path_buf();
                move |handle| async move {
                    let summary = scan(&pool, &vector, &handle, &path, 0.85, 500).await.unwrap();
                    let _ = tx.send(summary);
                    Ok(())
                }
            });
            let _ = task_id;
            rx.await.unwrap()
        };

        assert_eq!(summary.files_seen, 0);
        assert_eq!(summary.files_ingested, 0);
    }
}
