use std::{collections::BTreeMap, sync::Arc};

use indicatif::{ProgressBar, ProgressStyle};
use tokio::{sync::Semaphore, task::JoinSet};

use super::{with_timeout, PublishOptions};
use crate::{
    encoding,
    error::HostError,
    files::FileBatch,
    host::{BlobId, HostingApi, RepoRef},
};

fn progress_bar(len: usize, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("  {msg} [{bar:40.cyan/blue}] {pos}/{len} blobs ({eta})")
    {
        bar.set_style(style.progress_chars("█▓░"));
    }
    bar.set_message("Uploading");
    bar
}

/// Create one blob per file, with at most `max_concurrent_blobs` in flight
///
/// Returns blob ids keyed by path once every upload has finished. The first
/// failure aborts the uploads still running; blobs that already landed stay
/// behind unreferenced.
pub(super) async fn create_blobs<H: HostingApi + 'static>(
    host: Arc<H>,
    repo: &RepoRef,
    batch: FileBatch,
    options: &PublishOptions,
) -> Result<BTreeMap<String, BlobId>, HostError> {
    let limit = Arc::new(Semaphore::new(options.max_concurrent_blobs.max(1)));
    let progress = progress_bar(batch.len(), options.show_progress);
    let mut tasks = JoinSet::new();

    for file in batch.into_files() {
        let host = Arc::clone(&host);
        let repo = repo.clone();
        let limit = Arc::clone(&limit);
        let timeout = options.call_timeout;

        tasks.spawn(async move {
            let _permit = match limit.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => return Err(HostError::Aborted(e.to_string())),
            };
            let content = encoding::encode(file.content());
            let what = format!("create blob for {}", file.path());
            match with_timeout(timeout, &what, host.create_blob(&repo, &content)).await {
                Ok(blob) => {
                    tracing::debug!("{} -> {}", file.path(), blob);
                    Ok((file.path().to_string(), blob))
                }
                Err(e) => {
                    tracing::warn!("Blob for {} failed: {}", file.path(), e);
                    Err(e)
                }
            }
        });
    }

    let mut blobs = BTreeMap::new();
    while let Some(joined) = tasks.join_next().await {
        let (path, blob) = match joined {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                tasks.abort_all();
                progress.abandon();
                return Err(e);
            }
            Err(e) => {
                tasks.abort_all();
                progress.abandon();
                return Err(HostError::Aborted(e.to_string()));
            }
        };
        progress.inc(1);
        blobs.insert(path, blob);
    }
    progress.finish_and_clear();

    Ok(blobs)
}
