use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use tar::Archive;
use tracing::warn;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Clone, Default)]
pub struct ArchiveCounts {
    pub members_seen: usize,
    pub members_matched: usize,
    pub members_skipped: usize,
    pub decompress_fallbacks: usize,
    pub decompress_failures: usize,
}

/// An archive member selected for extraction: its path inside the container
/// plus the permissively decoded text.
#[derive(Debug)]
pub struct MemberText {
    pub name: String,
    pub text: String,
}

/// Walks the container once, handing each matching member to `handle` in
/// archive order. The walk is bounded by the member count and is not
/// restartable; reopen the archive to start over. Member-level failures
/// are counted and skipped, never fatal to the walk.
pub fn walk_archive<F>(
    archive_path: &Path,
    member_suffix: &str,
    mut handle: F,
) -> Result<ArchiveCounts>
where
    F: FnMut(MemberText) -> Result<()>,
{
    let file = File::open(archive_path)
        .with_context(|| format!("failed to open archive: {}", archive_path.display()))?;

    let name = archive_path.to_string_lossy();
    let reader: Box<dyn Read> = if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    let mut archive = Archive::new(reader);

    let mut counts = ArchiveCounts::default();
    let entries = archive
        .entries()
        .with_context(|| format!("failed to read archive entries: {}", archive_path.display()))?;

    for entry in entries {
        let mut entry = entry
            .with_context(|| format!("failed to read archive entry: {}", archive_path.display()))?;
        counts.members_seen += 1;

        if !entry.header().entry_type().is_file() {
            counts.members_skipped += 1;
            continue;
        }

        let member_name = entry
            .path()
            .map(|path| path.display().to_string())
            .unwrap_or_default();
        if !member_name.ends_with(member_suffix) {
            counts.members_skipped += 1;
            continue;
        }
        counts.members_matched += 1;

        let mut compressed = Vec::new();
        if let Err(err) = entry.read_to_end(&mut compressed) {
            warn!(member = %member_name, error = %err, "failed to read member bytes");
            counts.decompress_failures += 1;
            continue;
        }

        let bytes = match decode_member(compressed) {
            Decoded::Stream(bytes) => bytes,
            Decoded::Raw(bytes) => {
                counts.decompress_fallbacks += 1;
                bytes
            }
            Decoded::Failed(err) => {
                warn!(member = %member_name, error = %err, "failed to decompress member");
                counts.decompress_failures += 1;
                continue;
            }
        };

        let text = String::from_utf8_lossy(&bytes).into_owned();
        handle(MemberText {
            name: member_name,
            text,
        })?;
    }

    Ok(counts)
}

enum Decoded {
    Stream(Vec<u8>),
    Raw(Vec<u8>),
    Failed(std::io::Error),
}

/// A member without the gzip magic is passed through as raw bytes; only a
/// stream that claims to be gzip and then fails to inflate is an error.
fn decode_member(compressed: Vec<u8>) -> Decoded {
    if compressed.len() < GZIP_MAGIC.len() || compressed[..2] != GZIP_MAGIC {
        return Decoded::Raw(compressed);
    }

    let mut decoder = GzDecoder::new(compressed.as_slice());
    let mut bytes = Vec::new();
    match decoder.read_to_end(&mut bytes) {
        Ok(_) => Decoded::Stream(bytes),
        Err(err) => Decoded::Failed(err),
    }
}
