//! Moving item payloads from memory to the cache directory

use log::{debug, warn};
use std::io;
use std::path::Path;
use tokio::io::AsyncWriteExt;

use super::item::Item;
use crate::utils::SPILL_FILE_PREFIX;

#[derive(Debug, thiserror::Error)]
pub(crate) enum SpillError {
    /// No spill file could be created. Fatal for the run.
    #[error("Failed to create spill file: {0}")]
    Create(#[source] io::Error),

    /// The payload could not be copied. Only this item is lost.
    #[error("Failed to write spill file: {0}")]
    Write(#[source] io::Error),
}

/// Result of a successful spill
#[derive(Debug, Clone, Copy)]
pub(crate) struct SpillReport {
    pub written: u64,
    /// Bytes written differ from the declared length
    pub mismatch: bool,
}

/// Drain `item`'s in-memory stream into a fresh temp file under `cache_dir`
///
/// The temp path is recorded on the item before copying, so a failed copy
/// leaves a file that the item's `clean` removes.
pub(crate) async fn spill(item: &mut Item, cache_dir: &Path) -> Result<SpillReport, SpillError> {
    let (file, path) = tempfile::Builder::new()
        .prefix(SPILL_FILE_PREFIX)
        .tempfile_in(cache_dir)
        .map_err(SpillError::Create)?
        .keep()
        .map_err(|e| SpillError::Create(e.error))?;

    let Some(mut body) = item.move_to_disk(path.clone()) else {
        // The path is not attached to the item, remove it here
        drop(file);
        if let Err(e) = std::fs::remove_file(&path) {
            debug!(
                target: "chromafeed::cleanup",
                "Failed to remove unattached spill file {}: {e}",
                path.display()
            );
        }
        return Err(SpillError::Write(io::Error::other(
            "item payload is not memory-resident",
        )));
    };

    let mut out = tokio::fs::File::from_std(file);
    let written = tokio::io::copy(&mut body, &mut out)
        .await
        .map_err(SpillError::Write)?;
    out.flush().await.map_err(SpillError::Write)?;
    drop(out);
    drop(body);

    let mismatch = item.declared_size().is_some_and(|declared| declared != written);
    if mismatch {
        warn!(
            "Size written to cache doesn't match the declared size for {}: wrote {written}, declared {:?}",
            item.identity(),
            item.declared_size()
        );
    }

    Ok(SpillReport { written, mismatch })
}
