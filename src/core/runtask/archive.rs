use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use std::fs::File;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub entries: usize,
    pub unpacked_bytes: u64,
}

/// Walks a gzip-compressed tarball without extracting it.
pub fn inspect_archive(path: &Path) -> Result<ArchiveSummary> {
    let file =
        File::open(path).with_context(|| format!("cannot open archive {}", path.display()))?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));

    let mut summary = ArchiveSummary {
        entries: 0,
        unpacked_bytes: 0,
    };
    for entry in archive.entries().context("archive is not a readable tarball")? {
        let entry = entry.context("corrupt archive entry")?;
        summary.entries += 1;
        summary.unpacked_bytes += entry.header().size().unwrap_or(0);
    }
    Ok(summary)
}

pub async fn inspect_archive_blocking(path: PathBuf) -> Result<ArchiveSummary> {
    tokio::task::spawn_blocking(move || inspect_archive(&path))
        .await
        .context("archive inspection task panicked")?
}

#[cfg(test)]
pub(crate) fn write_test_archive(path: &Path, files: &[(&str, &[u8])]) {
    use flate2::{Compression, write::GzEncoder};

    let file = File::create(path).unwrap();
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    for (name, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, *contents).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
}
