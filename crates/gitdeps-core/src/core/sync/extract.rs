use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use anyhow::{bail, Context, Result};
use gitdeps_domain::{Blob, TargetFile};
use sha2::{Digest, Sha256};
use tracing::{debug, error};

use super::download::FetchedPack;
use super::schedule::FetchPlan;
use super::shared::{RunState, WorkQueue, POLL_INTERVAL};
use crate::core::error::SyncError;
use crate::core::fs::{incoming_path, remove_protected, replace_file, target_path};

pub(crate) struct ExtractContext {
    pub(crate) state: Arc<RunState>,
    pub(crate) plan: Arc<FetchPlan>,
    pub(crate) ready: Arc<WorkQueue<FetchedPack>>,
    pub(crate) root: PathBuf,
}

/// Body of the single extraction thread. Writes to the working tree happen
/// only here, one file at a time.
pub(crate) fn run_extractor(ctx: &ExtractContext) {
    let state = &ctx.state;
    while !state.is_complete() {
        if state.is_aborted() {
            return;
        }
        let Some(fetched) = ctx.ready.pop() else {
            thread::sleep(POLL_INTERVAL);
            continue;
        };
        if let Err(err) = extract_pack(ctx, &fetched) {
            let message = format!("{err:#}");
            error!(pack = %fetched.pack.hash, error = %message, "extraction failed");
            state.record_error(message);
            state.extract_failed.store(true, Ordering::SeqCst);
            return;
        }
        debug!(pack = %fetched.pack.hash, "pack extracted");
        // dropping `fetched` deletes the pack temp file
    }
}

fn extract_pack(ctx: &ExtractContext, fetched: &FetchedPack) -> Result<()> {
    let mut pack_file = File::open(fetched.file.path())
        .with_context(|| format!("failed to open temp file for pack {}", fetched.pack.hash))?;
    for blob in ctx.plan.blobs_for_pack(&fetched.pack.hash) {
        for target in ctx.plan.files_for_blob(&blob.hash) {
            if ctx.state.is_aborted() {
                bail!("extraction of pack {} cancelled", fetched.pack.hash);
            }
            extract_blob(&mut pack_file, blob, &ctx.root, target)?;
            ctx.state.extracted.fetch_add(1, Ordering::SeqCst);
        }
    }
    Ok(())
}

/// Copies one blob out of a decompressed pack into `<root>/<name>`.
///
/// The bytes land in `<name>.incoming` first and only replace the target
/// once their digest matches the blob hash.
pub(crate) fn extract_blob<R: Read + Seek>(
    pack: &mut R,
    blob: &Blob,
    root: &Path,
    target: &TargetFile,
) -> Result<()> {
    let dest = target_path(root, &target.name);
    let incoming = incoming_path(root, &target.name);
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    remove_protected(&incoming)
        .with_context(|| format!("failed to clear {}", incoming.display()))?;

    pack.seek(SeekFrom::Start(blob.pack_offset))?;
    let mut source = pack.take(blob.size);
    let mut out = File::create(&incoming)
        .with_context(|| format!("failed to create {}", incoming.display()))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0_u8; 64 * 1024];
    let mut written = 0u64;
    loop {
        let read = source.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        out.write_all(&buffer[..read])?;
        written += read as u64;
    }
    out.flush()?;
    drop(out);

    if written != blob.size {
        let _ = remove_protected(&incoming);
        return Err(SyncError::Decompression(format!(
            "pack truncated while extracting {} ({written} of {} bytes)",
            target.name, blob.size
        ))
        .into());
    }
    let actual = hex::encode(hasher.finalize());
    if actual != blob.hash {
        let _ = remove_protected(&incoming);
        return Err(SyncError::Integrity {
            what: format!("file {}", target.name),
            expected: blob.hash.clone(),
            actual,
        }
        .into());
    }
    replace_file(&incoming, &dest)
        .with_context(|| format!("failed to move {} into place", target.name))?;
    debug!(file = %target.name, bytes = written, "extracted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitdeps_domain::hash_bytes;
    use std::io::Cursor;

    fn blob_at(content: &[u8], offset: u64) -> Blob {
        Blob {
            hash: hash_bytes(content),
            size: content.len() as u64,
            pack_hash: "b1".into(),
            pack_offset: offset,
        }
    }

    fn target(name: &str, blob: &Blob) -> TargetFile {
        TargetFile {
            name: name.into(),
            hash: blob.hash.clone(),
            is_executable: false,
        }
    }

    #[test]
    fn every_blob_of_a_pack_round_trips() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let parts: [&[u8]; 3] = [b"alpha", b"second blob body", b"z"];
        let mut pack = Vec::new();
        let mut blobs = Vec::new();
        for part in parts {
            blobs.push(blob_at(part, pack.len() as u64));
            pack.extend_from_slice(part);
        }
        let mut reader = Cursor::new(pack);
        for (index, blob) in blobs.iter().enumerate().rev() {
            let name = format!("Dir{index}/file.bin");
            extract_blob(&mut reader, blob, temp.path(), &target(&name, blob))?;
            let written = fs::read(temp.path().join(&name))?;
            assert_eq!(hash_bytes(&written), blob.hash);
            assert!(!temp.path().join(format!("{name}.incoming")).exists());
        }
        Ok(())
    }

    #[test]
    fn digest_mismatch_leaves_target_untouched() -> Result<()> {
        let temp = tempfile::tempdir()?;
        fs::write(temp.path().join("a.bin"), b"previous")?;
        let mut blob = blob_at(b"content", 0);
        blob.hash = hash_bytes(b"something else");
        let mut reader = Cursor::new(b"content".to_vec());

        let err = extract_blob(&mut reader, &blob, temp.path(), &target("a.bin", &blob))
            .expect_err("digest mismatch");
        assert!(err.to_string().contains("[GD200]"));
        assert_eq!(fs::read(temp.path().join("a.bin"))?, b"previous");
        assert!(!temp.path().join("a.bin.incoming").exists());
        Ok(())
    }

    #[test]
    fn truncated_pack_is_a_decompression_error() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let blob = blob_at(b"longer than the pack", 0);
        let mut reader = Cursor::new(b"short".to_vec());
        let err = extract_blob(&mut reader, &blob, temp.path(), &target("a.bin", &blob))
            .expect_err("truncated");
        assert!(err.to_string().contains("[GD400]"));
        Ok(())
    }
}
