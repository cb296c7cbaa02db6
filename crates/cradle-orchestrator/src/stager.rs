//! Extracts an uploaded `.tar.gz` into a clean directory.
//!
//! The archive is unpacked into a fresh staging directory next to the target
//! and only swapped into place once extraction has fully succeeded, so the
//! target directory always holds either the previous successful extraction
//! or the complete new one, never a mix.

use std::fs::{self, File};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use tar::{Archive, EntryType};
use tracing::{debug, info};

use crate::error::{OrchestratorError, OrchestratorResult};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Result of a successful stage.
#[derive(Debug, Clone)]
pub struct StagedSource {
    /// `workspace_root/workload_subdir`.
    pub path: PathBuf,
    pub archive_sha256: String,
    pub archive_bytes: usize,
    /// Number of archive entries written.
    pub entries: usize,
}

/// Extract `archive` into `workspace_root/workload_subdir`.
///
/// Blocking; run it on a blocking thread from async code.
pub fn stage(
    workspace_root: &Path,
    archive: &[u8],
    workload_subdir: &str,
) -> OrchestratorResult<StagedSource> {
    let fail = |reason: String| OrchestratorError::StageFailed {
        target: workspace_root.join(workload_subdir).display().to_string(),
        reason,
    };

    if workload_subdir.is_empty()
        || workload_subdir.contains(['/', '\\'])
        || workload_subdir == "."
        || workload_subdir == ".."
    {
        return Err(fail(format!("invalid workload subdirectory {workload_subdir:?}")));
    }
    if archive.is_empty() {
        return Err(fail("archive is empty".to_string()));
    }
    if !archive.starts_with(&GZIP_MAGIC) {
        return Err(fail("archive is not gzip-compressed".to_string()));
    }

    fs::create_dir_all(workspace_root)
        .map_err(|e| fail(format!("cannot create workspace root: {e}")))?;

    // Persist the upload inside the workspace; removed when `upload` drops.
    let mut upload = tempfile::Builder::new()
        .prefix(".upload-")
        .suffix(".tar.gz")
        .tempfile_in(workspace_root)
        .map_err(|e| fail(format!("cannot create temporary archive: {e}")))?;
    upload
        .write_all(archive)
        .and_then(|()| upload.flush())
        .map_err(|e| fail(format!("cannot write temporary archive: {e}")))?;
    let archive_sha256 = hex::encode(Sha256::digest(archive));
    debug!(path = ?upload.path(), bytes = archive.len(), sha256 = %archive_sha256, "archive persisted");

    let staging = tempfile::Builder::new()
        .prefix(".staging-")
        .tempdir_in(workspace_root)
        .map_err(|e| fail(format!("cannot create staging directory: {e}")))?;

    let file = upload
        .reopen()
        .map_err(|e| fail(format!("cannot reopen temporary archive: {e}")))?;
    let entries = extract(file, staging.path())
        .map_err(|reason| fail(format!("failed to extract the tar.gz archive: {reason}")))?;

    let target = workspace_root.join(workload_subdir);
    swap_into_place(staging.path(), &target)
        .map_err(|e| fail(format!("cannot move extracted tree into place: {e}")))?;

    info!(path = ?target, entries, sha256 = %archive_sha256, "workload source staged");
    Ok(StagedSource {
        path: target,
        archive_sha256,
        archive_bytes: archive.len(),
        entries,
    })
}

/// Unpack every entry of a gzip tarball under `dest`.
fn extract(file: File, dest: &Path) -> Result<usize, String> {
    let mut archive = Archive::new(GzDecoder::new(BufReader::new(file)));
    archive.set_overwrite(true);

    let mut count = 0;
    for entry in archive.entries().map_err(|e| e.to_string())? {
        let mut entry = entry.map_err(|e| e.to_string())?;
        let path = entry
            .path()
            .map_err(|e| e.to_string())?
            .display()
            .to_string();

        match entry.header().entry_type() {
            EntryType::Regular
            | EntryType::Directory
            | EntryType::Symlink
            | EntryType::Link
            | EntryType::GNULongName
            | EntryType::GNULongLink
            | EntryType::XHeader
            | EntryType::XGlobalHeader => {}
            other => {
                return Err(format!("unsupported entry type {other:?} for {path}"));
            }
        }

        let written = entry
            .unpack_in(dest)
            .map_err(|e| format!("{path}: {e}"))?;
        if !written {
            return Err(format!("{path}: entry escapes the destination directory"));
        }
        count += 1;
    }

    // Drain the decoder so a truncated stream fails its gzip trailer check.
    let mut rest = archive.into_inner();
    io::copy(&mut rest, &mut io::sink()).map_err(|e| e.to_string())?;
    Ok(count)
}

/// Replace `target` with `staged`.
fn swap_into_place(staged: &Path, target: &Path) -> std::io::Result<()> {
    if target.exists() {
        fs::remove_dir_all(target)?;
    }
    if let Err(e) = fs::rename(staged, target) {
        // Leave an empty target rather than nothing at all.
        fs::create_dir_all(target)?;
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;

    fn targz(files: &[(&str, &str)]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (path, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, path, content.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    /// Poorly compressible filler so truncation lands inside entry data.
    fn noise(len: usize) -> String {
        let mut state: u32 = 0x9e37_79b9;
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                char::from(b'a' + (state >> 27) as u8 % 26)
            })
            .collect()
    }

    fn listing(dir: &Path) -> Vec<String> {
        let mut files: Vec<String> = walkdir::WalkDir::new(dir)
            .min_depth(1)
            .into_iter()
            .map(|e| e.unwrap())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.path().strip_prefix(dir).unwrap().display().to_string())
            .collect();
        files.sort();
        files
    }

    #[test]
    fn extracts_into_subdir() {
        let root = tempfile::tempdir().unwrap();
        let archive = targz(&[("index.ts", "main()"), ("lib/util.ts", "export {}")]);

        let staged = stage(root.path(), &archive, "bot").unwrap();

        assert_eq!(staged.path, root.path().join("bot"));
        assert_eq!(staged.archive_bytes, archive.len());
        assert_eq!(staged.archive_sha256.len(), 64);
        assert_eq!(listing(&staged.path), vec!["index.ts", "lib/util.ts"]);
        assert_eq!(fs::read_to_string(staged.path.join("index.ts")).unwrap(), "main()");
    }

    #[test]
    fn repeated_stage_leaves_no_residue() {
        let root = tempfile::tempdir().unwrap();
        stage(root.path(), &targz(&[("old.ts", "1"), ("shared.ts", "old")]), "bot").unwrap();
        stage(root.path(), &targz(&[("new.ts", "2"), ("shared.ts", "new")]), "bot").unwrap();

        let dir = root.path().join("bot");
        assert_eq!(listing(&dir), vec!["new.ts", "shared.ts"]);
        assert_eq!(fs::read_to_string(dir.join("shared.ts")).unwrap(), "new");
    }

    #[test]
    fn no_temporary_files_survive() {
        let root = tempfile::tempdir().unwrap();
        stage(root.path(), &targz(&[("a.ts", "a")]), "bot").unwrap();

        let names: Vec<String> = fs::read_dir(root.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["bot"]);
    }

    #[test]
    fn corrupt_archive_keeps_previous_extraction() {
        let root = tempfile::tempdir().unwrap();
        stage(root.path(), &targz(&[("good.ts", "ok")]), "bot").unwrap();

        let mut corrupt = targz(&[("next.ts", &noise(8192))]);
        corrupt.truncate(corrupt.len() / 2);
        let err = stage(root.path(), &corrupt, "bot").unwrap_err();

        assert!(matches!(err, OrchestratorError::StageFailed { .. }));
        assert!(err.to_string().contains("failed to extract"));
        assert_eq!(listing(&root.path().join("bot")), vec!["good.ts"]);
    }

    #[test]
    fn corrupt_archive_on_fresh_workspace_leaves_nothing() {
        let root = tempfile::tempdir().unwrap();
        let mut corrupt = targz(&[("next.ts", &noise(8192))]);
        corrupt.truncate(20);

        assert!(stage(root.path(), &corrupt, "bot").is_err());
        let bot = root.path().join("bot");
        assert!(!bot.exists() || listing(&bot).is_empty());
    }

    #[test]
    fn rejects_non_gzip_and_empty_input() {
        let root = tempfile::tempdir().unwrap();
        assert!(stage(root.path(), b"", "bot").is_err());
        let err = stage(root.path(), b"PK\x03\x04zip", "bot").unwrap_err();
        assert!(err.to_string().contains("not gzip"));
    }

    #[test]
    fn rejects_path_traversal() {
        let root = tempfile::tempdir().unwrap();
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let mut header = tar::Header::new_gnu();
        let payload = b"pwned";
        // Write the name bytes directly; `append_data` refuses `..`.
        header.as_old_mut().name[..10].copy_from_slice(b"../evil.sh");
        header.set_size(payload.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, &payload[..]).unwrap();
        let archive = builder.into_inner().unwrap().finish().unwrap();

        let err = stage(root.path(), &archive, "bot").unwrap_err();
        assert!(err.to_string().contains("escapes"), "{err}");
        assert!(!root.path().join("evil.sh").exists());
    }

    #[test]
    fn rejects_device_entries() {
        let root = tempfile::tempdir().unwrap();
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(EntryType::Char);
        header.set_size(0);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, "dev-null", &[][..]).unwrap();
        let archive = builder.into_inner().unwrap().finish().unwrap();

        let err = stage(root.path(), &archive, "bot").unwrap_err();
        assert!(err.to_string().contains("unsupported entry type"), "{err}");
    }

    #[test]
    fn rejects_nested_subdir() {
        let root = tempfile::tempdir().unwrap();
        let archive = targz(&[("a.ts", "a")]);
        assert!(stage(root.path(), &archive, "../bot").is_err());
        assert!(stage(root.path(), &archive, "").is_err());
    }
}
