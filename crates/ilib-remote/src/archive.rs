//! Landing downloaded save files on the local disk.

use std::{
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};

/// Write `archive` to `target` through a temp file in the same directory,
/// returning the number of bytes written. File I/O runs on the blocking pool.
pub(crate) async fn store<B>(target: PathBuf, archive: B) -> Result<u64>
where
    B: AsRef<[u8]> + Send + 'static,
{
    let bytes = archive.as_ref().len() as u64;
    tokio::task::spawn_blocking(move || write(&target, archive.as_ref())).await??;
    Ok(bytes)
}

fn write(target: &Path, archive: &[u8]) -> Result<()> {
    let dir = target
        .parent()
        .ok_or_else(|| anyhow!("no parent directory for {}", target.display()))?;
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(archive)?;
    tmp.flush()?;
    tmp.persist(target).map_err(|e| anyhow!(e.error))?;
    Ok(())
}
