//! `fanup checksum`: digest and size of each file, for comparing with what a
//! target stored.

use anyhow::Result;
use fanup_core::checksum::{self, FileDigest};
use std::path::{Path, PathBuf};

/// Print one line per file. Unreadable files are reported on stderr and the
/// rest are still hashed; returns false if any file failed.
pub async fn run_checksum(paths: Vec<PathBuf>) -> Result<bool> {
    let digests = tokio::task::spawn_blocking(move || {
        paths
            .into_iter()
            .map(|p| {
                let digest = checksum::digest_file(&p);
                (p, digest)
            })
            .collect::<Vec<_>>()
    })
    .await?;

    let mut all_ok = true;
    for (path, digest) in digests {
        match digest {
            Ok(d) => println!("{}", format_digest(&path, &d)),
            Err(e) => {
                all_ok = false;
                tracing::warn!(path = %path.display(), "checksum failed: {:#}", e);
                eprintln!("fanup checksum: {:#}", e);
            }
        }
    }
    Ok(all_ok)
}

/// `<sha256>  <size>  <path>`
pub(crate) fn format_digest(path: &Path, d: &FileDigest) -> String {
    format!("{}  {}  {}", d.sha256, d.size, path.display())
}
