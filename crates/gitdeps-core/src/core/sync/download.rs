use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;
use gitdeps_domain::Pack;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::fetch::PackFetcher;
use super::shared::{RunState, WorkQueue, POLL_INTERVAL};
use crate::core::error::SyncError;

/// A verified pack whose decompressed content sits in a temp file. Dropping
/// it deletes the file.
pub(crate) struct FetchedPack {
    pub(crate) pack: Pack,
    pub(crate) file: NamedTempFile,
}

#[derive(Clone)]
pub(crate) struct DownloadContext {
    pub(crate) state: Arc<RunState>,
    pub(crate) fetcher: Arc<dyn PackFetcher>,
    pub(crate) pending: Arc<WorkQueue<Pack>>,
    pub(crate) ready: Arc<WorkQueue<FetchedPack>>,
    pub(crate) temp_dir: PathBuf,
    pub(crate) max_retries: u32,
}

/// Body of one download thread.
///
/// Failures never end the loop: the pack goes back on the queue and the
/// worker counts itself stuck once its retries run out. The monitor decides
/// when the run as a whole has failed.
pub(crate) fn run_download_worker(id: usize, ctx: &DownloadContext) {
    let state = &ctx.state;
    let mut retries: u32 = 0;
    let mut stuck = false;
    while !state.downloads_should_stop() {
        let Some(pack) = ctx.pending.pop() else {
            thread::sleep(POLL_INTERVAL);
            continue;
        };

        let mut counted = 0u64;
        state.download_attempts.fetch_add(1, Ordering::SeqCst);
        match download_pack(ctx, &pack, &mut counted) {
            Ok(file) => {
                debug!(worker = id, pack = %pack.hash, bytes = counted, "fetched pack");
                state.packs_fetched.fetch_add(1, Ordering::SeqCst);
                ctx.ready.push(FetchedPack { pack, file });
                if stuck {
                    state.stuck_workers.fetch_sub(1, Ordering::SeqCst);
                    stuck = false;
                }
                retries = 0;
            }
            Err(err) => {
                state.bytes_received.fetch_sub(counted, Ordering::SeqCst);
                ctx.pending.push(pack);
                if state.is_aborted() {
                    break;
                }
                retries += 1;
                warn!(worker = id, attempt = retries, error = %format!("{err:#}"), "pack download failed");
                if retries > ctx.max_retries {
                    state.record_error(format!("{err:#}"));
                    if !stuck {
                        stuck = true;
                        state.stuck_workers.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
        }
    }
}

/// Streams one pack through gunzip and SHA-256 into a temp file and checks
/// the digest against the pack hash.
fn download_pack(ctx: &DownloadContext, pack: &Pack, counted: &mut u64) -> Result<NamedTempFile> {
    let body = ctx.fetcher.open(pack)?;
    let mut decoder = GzDecoder::new(CountingReader {
        inner: body,
        state: &ctx.state,
        counted,
    });
    let mut tmp = tempfile::Builder::new()
        .prefix("pack-")
        .suffix(".tmp")
        .tempfile_in(&ctx.temp_dir)
        .with_context(|| format!("failed to create temp file in {}", ctx.temp_dir.display()))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0_u8; 64 * 1024];
    loop {
        if ctx.state.is_aborted() {
            bail!("download of pack {} cancelled", pack.hash);
        }
        let read = decoder
            .read(&mut buffer)
            .with_context(|| format!("stream error for pack {}", pack.hash))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        tmp.write_all(&buffer[..read])?;
    }
    tmp.flush()?;

    let actual = hex::encode(hasher.finalize());
    if actual != pack.hash {
        return Err(SyncError::Integrity {
            what: format!("pack {}", pack.hash),
            expected: pack.hash.clone(),
            actual,
        }
        .into());
    }
    Ok(tmp)
}

/// Adds compressed bytes to the shared counter as they arrive so the
/// monitor sees live throughput.
struct CountingReader<'a, R> {
    inner: R,
    state: &'a RunState,
    counted: &'a mut u64,
}

impl<R: Read> Read for CountingReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        let delta = read as u64;
        *self.counted += delta;
        self.state.bytes_received.fetch_add(delta, Ordering::SeqCst);
        Ok(read)
    }
}
