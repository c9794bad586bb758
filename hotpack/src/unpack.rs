//! Unpacking of packages shipped inside the install image.
//!
//! On platforms where the install image is read-only, embedded
//! packages must be copied into the writable runtime area before the
//! cache can open them. An index file next to the embedded packages
//! lists each file with its hash; anything already unpacked with a
//! matching hash is skipped, so this is cheap on every launch after
//! the first.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::UpdateConfig;
use crate::error::{UpdateError, UpdateResult};
use crate::fetch::calculate_file_checksum;
use crate::layout;

/// One embedded package as listed in the index file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedRecord {
    /// Package file name relative to the module's embedded directory.
    pub file_name: String,

    /// Hex content hash of the packaged file.
    pub content_hash: String,

    /// File size in KiB.
    pub size_kb: f64,
}

/// Summary of one unpack run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnpackOutcome {
    /// Files copied this run.
    pub unpacked: usize,
    /// Files already present with a matching hash.
    pub skipped: usize,
    /// Total MB written this run.
    pub unpacked_mb: f64,
}

/// Progress callback: `(unpacked_mb, total_needed_mb)`.
pub type UnpackProgress<'a> = &'a mut dyn FnMut(f64, f64);

/// Copies embedded packages into the writable runtime area.
pub struct DecompressController {
    module: String,
    source_dir: PathBuf,
    target_dir: PathBuf,
}

impl DecompressController {
    pub fn new(config: &UpdateConfig, module: impl Into<String>) -> Self {
        let module = module.into();
        Self {
            source_dir: layout::embedded_dir(&config.embedded_root, &module),
            target_dir: layout::unpack_dir(&config.data_dir, &module),
            module,
        }
    }

    /// Directory unpacked files land in.
    pub fn target_dir(&self) -> &std::path::Path {
        &self.target_dir
    }

    /// Load the module's embedded index.
    ///
    /// A missing index means the module ships nothing embedded, which
    /// is not an error.
    pub fn load_index(&self) -> UpdateResult<Vec<EmbeddedRecord>> {
        let path = self.source_dir.join(layout::embedded_index_name(&self.module));
        if !path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&path).map_err(|source| UpdateError::ReadFailed {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&content)
            .map_err(|e| UpdateError::Configuration(format!("parse {}: {e}", path.display())))
    }

    /// Records whose unpacked copy is absent or fails its hash check.
    pub fn needed(&self, records: &[EmbeddedRecord]) -> UpdateResult<Vec<EmbeddedRecord>> {
        let mut needed = Vec::new();
        for record in records {
            let target = self.target_dir.join(&record.file_name);
            if !target.exists() {
                needed.push(record.clone());
                continue;
            }
            if calculate_file_checksum(&target)? != record.content_hash {
                needed.push(record.clone());
            }
        }
        Ok(needed)
    }

    /// Unpack everything the module still needs, sequentially.
    ///
    /// Runs file by file rather than in parallel; this happens once at
    /// first launch and local copies are not the bottleneck worth
    /// threading for. Completes immediately when nothing is needed.
    pub fn run(&self, progress: UnpackProgress) -> UpdateResult<UnpackOutcome> {
        let records = self.load_index()?;
        let needed = self.needed(&records)?;

        if needed.is_empty() {
            debug!(module = %self.module, "nothing to unpack");
            return Ok(UnpackOutcome {
                unpacked: 0,
                skipped: records.len(),
                unpacked_mb: 0.0,
            });
        }

        fs::create_dir_all(&self.target_dir).map_err(|source| UpdateError::CreateDirFailed {
            path: self.target_dir.clone(),
            source,
        })?;

        let total_mb: f64 = needed.iter().map(|r| r.size_kb).sum::<f64>() / 1024.0;
        let mut unpacked_mb = 0.0;

        for record in &needed {
            self.unpack_one(record)?;
            unpacked_mb += record.size_kb / 1024.0;
            progress(unpacked_mb, total_mb);
        }

        info!(
            module = %self.module,
            unpacked = needed.len(),
            unpacked_mb,
            "embedded packages unpacked"
        );
        Ok(UnpackOutcome {
            unpacked: needed.len(),
            skipped: records.len() - needed.len(),
            unpacked_mb,
        })
    }

    fn unpack_one(&self, record: &EmbeddedRecord) -> UpdateResult<()> {
        let source = self.source_dir.join(&record.file_name);
        let target = self.target_dir.join(&record.file_name);

        let input = File::open(&source).map_err(|source_err| UpdateError::ReadFailed {
            path: source.clone(),
            source: source_err,
        })?;
        let output = File::create(&target).map_err(|source_err| UpdateError::WriteFailed {
            path: target.clone(),
            source: source_err,
        })?;

        let mut reader = BufReader::new(input);
        let mut writer = BufWriter::new(output);
        io::copy(&mut reader, &mut writer).map_err(|source_err| UpdateError::WriteFailed {
            path: target.clone(),
            source: source_err,
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};
    use tempfile::TempDir;

    struct Fixture {
        _embedded: TempDir,
        _data: TempDir,
        controller: DecompressController,
        source_dir: PathBuf,
    }

    fn fixture() -> Fixture {
        let embedded = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let config = UpdateConfig::new("http://cdn", data.path(), embedded.path());
        let controller = DecompressController::new(&config, "game");
        let source_dir = layout::embedded_dir(embedded.path(), "game");
        fs::create_dir_all(&source_dir).unwrap();
        Fixture {
            _embedded: embedded,
            _data: data,
            controller,
            source_dir,
        }
    }

    fn record_for(name: &str, payload: &[u8]) -> EmbeddedRecord {
        EmbeddedRecord {
            file_name: name.to_string(),
            content_hash: format!("{:x}", Sha256::digest(payload)),
            size_kb: payload.len() as f64 / 1024.0,
        }
    }

    fn write_index(fixture: &Fixture, records: &[EmbeddedRecord]) {
        let path = fixture.source_dir.join(layout::embedded_index_name("game"));
        fs::write(&path, serde_json::to_string(records).unwrap()).unwrap();
    }

    #[test]
    fn test_missing_index_unpacks_nothing() {
        let f = fixture();
        let outcome = f.controller.run(&mut |_, _| {}).unwrap();
        assert_eq!(outcome.unpacked, 0);
        assert_eq!(outcome.skipped, 0);
    }

    #[test]
    fn test_unpacks_listed_files_and_reports_progress() {
        let f = fixture();
        let payload_a = b"first package".to_vec();
        let payload_b = b"second package".to_vec();
        fs::write(f.source_dir.join("a.bd"), &payload_a).unwrap();
        fs::write(f.source_dir.join("b.bd"), &payload_b).unwrap();
        write_index(
            &f,
            &[record_for("a.bd", &payload_a), record_for("b.bd", &payload_b)],
        );

        let mut calls = Vec::new();
        let outcome = f
            .controller
            .run(&mut |done, total| calls.push((done, total)))
            .unwrap();

        assert_eq!(outcome.unpacked, 2);
        assert_eq!(calls.len(), 2);
        // Final callback reports completion.
        let (done, total) = calls[1];
        assert!((done - total).abs() < f64::EPSILON);

        assert_eq!(
            fs::read(f.controller.target_dir().join("a.bd")).unwrap(),
            payload_a
        );
    }

    #[test]
    fn test_second_run_skips_everything() {
        let f = fixture();
        let payload = b"package".to_vec();
        fs::write(f.source_dir.join("a.bd"), &payload).unwrap();
        write_index(&f, &[record_for("a.bd", &payload)]);

        f.controller.run(&mut |_, _| {}).unwrap();
        let outcome = f.controller.run(&mut |_, _| {}).unwrap();
        assert_eq!(outcome.unpacked, 0);
        assert_eq!(outcome.skipped, 1);
    }

    #[test]
    fn test_corrupt_unpacked_file_is_redone() {
        let f = fixture();
        let payload = b"package".to_vec();
        fs::write(f.source_dir.join("a.bd"), &payload).unwrap();
        write_index(&f, &[record_for("a.bd", &payload)]);

        f.controller.run(&mut |_, _| {}).unwrap();
        fs::write(f.controller.target_dir().join("a.bd"), b"truncated").unwrap();

        let outcome = f.controller.run(&mut |_, _| {}).unwrap();
        assert_eq!(outcome.unpacked, 1);
        assert_eq!(
            fs::read(f.controller.target_dir().join("a.bd")).unwrap(),
            payload
        );
    }
}
