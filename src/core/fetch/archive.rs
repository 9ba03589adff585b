//! Archive-stream fetching
//!
//! Reads a compressed container entry by entry on a blocking thread and
//! hands records over in bounded chunks. Supported layouts:
//!
//! - `.tar.gz` / `.tgz` / `.tar`, whose entries may themselves be
//!   `.json`, `.jsonl`, `.ndjson` (optionally `.gz`) or nested tarballs
//! - `.jsonl.gz` / `.ndjson.gz` (one JSON document per line)
//! - `.json.gz` (a JSON array or a single object)
//!
//! A container that cannot be opened is fatal for the unit. A corrupt line
//! or entry is counted as lost and skipped.

use super::{receiver_stream, RecordChunk, RecordStream};
use crate::domain::{RawRecord, Result, SieveError, SourceError, WorkUnitId};
use flate2::read::GzDecoder;
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

const MAX_NESTING: usize = 4;

/// Stream the records of one archive
///
/// The blocking reader stops as soon as the returned stream is dropped.
pub fn stream_archive(unit_id: WorkUnitId, path: PathBuf, chunk_size: usize) -> RecordStream {
    let (tx, rx) = mpsc::channel(2);

    tokio::task::spawn_blocking(move || {
        let mut sink = ChunkSink::new(unit_id, chunk_size.max(1), tx);
        let result = read_container(&path, &mut sink).and_then(|_| sink.flush());
        if let Err(e) = result {
            if !sink.is_closed() {
                let _ = sink.tx.blocking_send(Err(e));
            }
        }
    });

    receiver_stream(rx)
}

struct ChunkSink {
    unit_id: WorkUnitId,
    chunk_size: usize,
    sequence: u64,
    buffer: Vec<RawRecord>,
    lost: u64,
    tx: mpsc::Sender<Result<RecordChunk>>,
}

impl ChunkSink {
    fn new(unit_id: WorkUnitId, chunk_size: usize, tx: mpsc::Sender<Result<RecordChunk>>) -> Self {
        Self {
            unit_id,
            chunk_size,
            sequence: 0,
            buffer: Vec::with_capacity(chunk_size),
            lost: 0,
            tx,
        }
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn push(&mut self, value: Value) -> Result<()> {
        self.buffer
            .push(RawRecord::from_value(self.unit_id.clone(), self.sequence, value));
        self.sequence += 1;
        if self.buffer.len() >= self.chunk_size {
            self.flush()?;
        }
        Ok(())
    }

    fn lose(&mut self, what: &str, error: impl std::fmt::Display) {
        tracing::warn!(unit = %self.unit_id, entry = %what, error = %error, "Corrupt archive entry skipped");
        self.lost += 1;
    }

    fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() && self.lost == 0 {
            return Ok(());
        }
        let chunk = RecordChunk {
            records: std::mem::replace(&mut self.buffer, Vec::with_capacity(self.chunk_size)),
            lost: std::mem::take(&mut self.lost),
        };
        self.tx
            .blocking_send(Ok(chunk))
            .map_err(|_| SieveError::Other("archive reader cancelled".to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    TarGz,
    Tar,
    JsonLines { gz: bool },
    JsonDocument { gz: bool },
    Unknown,
}

fn layout_of(name: &str) -> Layout {
    let name = name.to_ascii_lowercase();
    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Layout::TarGz
    } else if name.ends_with(".tar") {
        Layout::Tar
    } else if name.ends_with(".jsonl.gz") || name.ends_with(".ndjson.gz") {
        Layout::JsonLines { gz: true }
    } else if name.ends_with(".jsonl") || name.ends_with(".ndjson") {
        Layout::JsonLines { gz: false }
    } else if name.ends_with(".json.gz") {
        Layout::JsonDocument { gz: true }
    } else if name.ends_with(".json") {
        Layout::JsonDocument { gz: false }
    } else if name.ends_with(".gz") {
        Layout::JsonLines { gz: true }
    } else {
        Layout::Unknown
    }
}

fn read_container(path: &Path, sink: &mut ChunkSink) -> Result<()> {
    let file = File::open(path).map_err(|e| {
        SourceError::ArchiveUnreadable(format!("{}: {}", path.display(), e))
    })?;
    let name = path.to_string_lossy();
    let mut reader = BufReader::new(file);

    match layout_of(&name) {
        Layout::TarGz => {
            let mut gz = GzDecoder::new(reader);
            read_tar(&mut gz, &name, 0, sink, true)
        }
        Layout::Tar => read_tar(&mut reader, &name, 0, sink, true),
        Layout::JsonLines { gz } => {
            let parsed = if gz {
                read_lines(&mut GzDecoder::new(reader), &name, sink)?
            } else {
                read_lines(&mut reader, &name, sink)?
            };
            if parsed == 0 && sink.lost > 0 {
                return Err(SourceError::ArchiveUnreadable(format!(
                    "{}: no readable content",
                    name
                ))
                .into());
            }
            Ok(())
        }
        Layout::JsonDocument { gz } => {
            let result = if gz {
                read_document(&mut GzDecoder::new(reader), sink)
            } else {
                read_document(&mut reader, sink)
            };
            result.map_err(|e| {
                SourceError::ArchiveUnreadable(format!("{}: {}", name, e)).into()
            })
        }
        Layout::Unknown => Err(SourceError::ArchiveUnreadable(format!(
            "{}: unrecognized archive type",
            name
        ))
        .into()),
    }
}

/// Walk a tar stream; nested data files and tarballs are read in place
fn read_tar(
    reader: &mut dyn Read,
    name: &str,
    depth: usize,
    sink: &mut ChunkSink,
    outermost: bool,
) -> Result<()> {
    let mut archive = tar::Archive::new(reader);
    let entries = match archive.entries() {
        Ok(entries) => entries,
        Err(e) if outermost => {
            return Err(SourceError::ArchiveUnreadable(format!("{}: {}", name, e)).into())
        }
        Err(e) => {
            sink.lose(name, e);
            return Ok(());
        }
    };

    let mut seen_any = false;
    for entry in entries {
        let mut entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                if outermost && !seen_any {
                    return Err(
                        SourceError::ArchiveUnreadable(format!("{}: {}", name, e)).into()
                    );
                }
                // The tar stream cannot be resynchronised after a bad header
                sink.lose(name, e);
                break;
            }
        };
        seen_any = true;

        if !entry.header().entry_type().is_file() {
            continue;
        }

        let entry_name = match entry.path() {
            Ok(p) => p.to_string_lossy().into_owned(),
            Err(e) => {
                sink.lose(name, e);
                continue;
            }
        };

        match layout_of(&entry_name) {
            Layout::TarGz | Layout::Tar if depth + 1 >= MAX_NESTING => {
                sink.lose(&entry_name, "archive nested too deeply");
            }
            Layout::TarGz => {
                let mut gz = GzDecoder::new(&mut entry);
                read_tar(&mut gz, &entry_name, depth + 1, sink, false)?;
            }
            Layout::Tar => read_tar(&mut entry, &entry_name, depth + 1, sink, false)?,
            Layout::JsonLines { gz: true } => {
                read_lines(&mut GzDecoder::new(&mut entry), &entry_name, sink)?;
            }
            Layout::JsonLines { gz: false } => {
                read_lines(&mut entry, &entry_name, sink)?;
            }
            Layout::JsonDocument { gz } => {
                let result = if gz {
                    read_document(&mut GzDecoder::new(&mut entry), sink)
                } else {
                    read_document(&mut entry, sink)
                };
                if let Err(e) = result {
                    if matches!(e, SieveError::Other(_)) {
                        return Err(e);
                    }
                    sink.lose(&entry_name, e);
                }
            }
            Layout::Unknown => {
                tracing::debug!(entry = %entry_name, "Skipping non-data archive entry");
            }
        }
    }

    Ok(())
}

/// Read newline-delimited JSON; returns how many lines parsed
fn read_lines(reader: &mut dyn Read, name: &str, sink: &mut ChunkSink) -> Result<u64> {
    let mut parsed = 0;
    for line in BufReader::new(reader).lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                // Decoder errors are not recoverable mid-stream
                sink.lose(name, e);
                break;
            }
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(trimmed) {
            Ok(value) => {
                sink.push(value)?;
                parsed += 1;
            }
            Err(e) => sink.lose(name, e),
        }
    }
    Ok(parsed)
}

/// Read a whole JSON document: an array yields one record per element
fn read_document(reader: &mut dyn Read, sink: &mut ChunkSink) -> Result<()> {
    let value: Value = serde_json::from_reader(reader)?;
    match value {
        Value::Array(items) => {
            for item in items {
                sink.push(item)?;
            }
        }
        other => sink.push(other)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use futures::StreamExt;
    use std::io::Write;
    use tempfile::TempDir;

    fn gz(bytes: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes).unwrap();
        encoder.finish().unwrap()
    }

    fn tar_of(files: &[(&str, Vec<u8>)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, data.as_slice()).unwrap();
        }
        builder.into_inner().unwrap()
    }

    async fn read_all(path: PathBuf, chunk_size: usize) -> (Vec<RawRecord>, u64, Option<SieveError>) {
        let unit = WorkUnitId::new("test").unwrap();
        let mut stream = stream_archive(unit, path, chunk_size);
        let mut records = Vec::new();
        let mut lost = 0;
        let mut error = None;
        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) => {
                    lost += chunk.lost;
                    records.extend(chunk.records);
                }
                Err(e) => error = Some(e),
            }
        }
        (records, lost, error)
    }

    #[test]
    fn test_layout_detection() {
        assert_eq!(layout_of("a/B.TGZ"), Layout::TarGz);
        assert_eq!(layout_of("x.jsonl.gz"), Layout::JsonLines { gz: true });
        assert_eq!(layout_of("x.json"), Layout::JsonDocument { gz: false });
        assert_eq!(layout_of("README.md"), Layout::Unknown);
    }

    #[tokio::test]
    async fn test_jsonl_gz_with_corrupt_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("works.jsonl.gz");
        let body = b"{\"id\":1}\n{broken\n\n{\"id\":2}\n{\"id\":3}\n";
        std::fs::write(&path, gz(body)).unwrap();

        let (records, lost, error) = read_all(path, 2).await;
        assert!(error.is_none());
        assert_eq!(records.len(), 3);
        assert_eq!(lost, 1);
        assert_eq!(
            records.iter().map(|r| r.sequence).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[tokio::test]
    async fn test_nested_tarball() {
        let inner = gz(&tar_of(&[(
            "part-1.jsonl",
            b"{\"id\":\"a\"}\n{\"id\":\"b\"}\n".to_vec(),
        )]));
        let outer = gz(&tar_of(&[
            ("2023/manifest.txt", b"ignored".to_vec()),
            ("2023/updated.tar.gz", inner),
            ("2023/part-2.json.gz", gz(b"[{\"id\":\"c\"},{\"id\":\"d\"}]")),
            ("2023/part-3.json", b"{not json".to_vec()),
        ]));

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dump.tar.gz");
        std::fs::write(&path, outer).unwrap();

        let (records, lost, error) = read_all(path, 100).await;
        assert!(error.is_none());
        let ids: Vec<String> = records.iter().filter_map(|r| r.field_text("id")).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
        assert_eq!(lost, 1);
    }

    #[tokio::test]
    async fn test_missing_archive_is_fatal() {
        let dir = TempDir::new().unwrap();
        let (records, _, error) = read_all(dir.path().join("nope.tar.gz"), 10).await;
        assert!(records.is_empty());
        assert!(matches!(
            error,
            Some(SieveError::Source(SourceError::ArchiveUnreadable(_)))
        ));
    }

    #[tokio::test]
    async fn test_garbage_tarball_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("junk.tar.gz");
        std::fs::write(&path, b"this is not gzip at all").unwrap();

        let (_, _, error) = read_all(path, 10).await;
        assert!(matches!(
            error,
            Some(SieveError::Source(SourceError::ArchiveUnreadable(_)))
        ));
    }
}
