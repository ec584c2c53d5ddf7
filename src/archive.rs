use bytes::Bytes;
use std::io::{Cursor, Read, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{EnhanceError, Result};

/// One named entry of a multi-file archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub bytes: Bytes,
}

impl ArchiveEntry {
    pub fn new(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

/// Packs and unpacks multi-file archives.
///
/// `decode` must yield entries in the archive's own enumeration order; the
/// orchestrator pairs entry `i` with input `i` and never looks at names.
pub trait ArchiveCodec: Send + Sync {
    /// Unpack a blob into its file entries.
    fn decode(&self, blob: &[u8]) -> Result<Vec<ArchiveEntry>>;

    /// Pack entries into a single blob, preserving their order.
    fn encode(&self, entries: &[ArchiveEntry]) -> Result<Bytes>;

    /// Media type of encoded blobs.
    fn media_type(&self) -> &str;

    /// File extension of encoded blobs, without the dot.
    fn extension(&self) -> &str;
}

/// [`ArchiveCodec`] for zip archives.
///
/// Decoding follows central directory order and skips directory entries.
/// Encoding stores entries uncompressed since image payloads are already
/// compressed.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipCodec;

impl ArchiveCodec for ZipCodec {
    fn decode(&self, blob: &[u8]) -> Result<Vec<ArchiveEntry>> {
        let mut archive = ZipArchive::new(Cursor::new(blob))?;
        let mut entries = Vec::with_capacity(archive.len());

        for i in 0..archive.len() {
            let mut file = archive.by_index(i)?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_string();
            let declared = file.size();
            // The declared size is untrusted; never reserve more than the blob.
            let mut buf = Vec::with_capacity(declared.min(blob.len() as u64) as usize);
            file.read_to_end(&mut buf)
                .map_err(|e| EnhanceError::Decode(format!("entry {}: {}", name, e)))?;
            if buf.len() as u64 != declared {
                return Err(EnhanceError::Decode(format!(
                    "entry {}: declares {} bytes but holds {}",
                    name,
                    declared,
                    buf.len()
                )));
            }
            entries.push(ArchiveEntry {
                name,
                bytes: Bytes::from(buf),
            });
        }

        Ok(entries)
    }

    fn encode(&self, entries: &[ArchiveEntry]) -> Result<Bytes> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

        for entry in entries {
            writer.start_file(entry.name.as_str(), options)?;
            writer.write_all(&entry.bytes)?;
        }

        let cursor = writer.finish()?;
        Ok(Bytes::from(cursor.into_inner()))
    }

    fn media_type(&self) -> &str {
        "application/zip"
    }

    fn extension(&self) -> &str {
        "zip"
    }
}
