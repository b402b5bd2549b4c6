//! 📂 Sources: where documents come from before they become somebody else's problem.
//!
//! One source for now: a newline-delimited JSON file, optionally gzipped. It reads on a
//! blocking thread (flate2 and `BufRead` are not async, and pretending otherwise just moves
//! the blocking somewhere harder to see) and pushes documents into a bounded channel. The
//! channel's receiver is a `Stream`, which is exactly what `bulk_all` wants.
//!
//! 🧠 Knowledge graph:
//! - bounded channel = the reader can get at most `capacity` documents ahead of the batcher.
//!   When `bulk_all` stops asking, the channel fills, and the reader parks. Same backpressure,
//!   one more hop.
//! - a line that does not parse as a JSON object is skipped with a `warn!` and counted. One
//!   bad line does not sink a ten million line import.
//! - the bulk run going away closes the channel; the reader notices on the next send and
//!   stops reading.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_channel::{Receiver, Sender};
use flate2::read::GzDecoder;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::common::JsonDocument;

/// 📊 What the reader saw.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NdjsonStats {
    pub lines: u64,
    pub documents: u64,
    pub skipped: u64,
}

/// 📂 A running NDJSON reader: a stream of documents plus a handle for the final stats.
#[derive(Debug)]
pub struct NdjsonSource {
    documents: Receiver<JsonDocument>,
    reader: JoinHandle<Result<NdjsonStats>>,
}

impl NdjsonSource {
    /// 🔪 The document stream, and the reader to await once the stream has been consumed.
    pub fn into_parts(self) -> (Receiver<JsonDocument>, JoinHandle<Result<NdjsonStats>>) {
        (self.documents, self.reader)
    }
}

/// 🚀 Start reading `path` in the background. `.gz` files are decompressed on the fly.
///
/// Fails right away if the file cannot be opened. Read errors mid-file surface through the
/// reader handle.
pub fn ndjson_file(path: impl AsRef<Path>, capacity: usize) -> Result<NdjsonSource> {
    let path = path.as_ref().to_path_buf();
    let file = File::open(&path)
        .with_context(|| format!("💀 could not open '{}' for reading", path.display()))?;
    let gzipped = path.extension().is_some_and(|extension| extension == "gz");
    let reader: Box<dyn BufRead + Send> = if gzipped {
        Box::new(BufReader::new(GzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    let (tx, documents) = async_channel::bounded(capacity.max(1));
    debug!("📂 reading '{}' (gzip: {gzipped})", path.display());
    let reader = tokio::task::spawn_blocking(move || read_lines(path, reader, tx));
    Ok(NdjsonSource { documents, reader })
}

fn read_lines(path: PathBuf, reader: Box<dyn BufRead + Send>, tx: Sender<JsonDocument>) -> Result<NdjsonStats> {
    let mut stats = NdjsonStats::default();
    for line in reader.lines() {
        let line = line.with_context(|| {
            format!("💀 reading '{}' failed after {} lines", path.display(), stats.lines)
        })?;
        stats.lines += 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let document = match serde_json::from_str::<serde_json::Value>(trimmed) {
            Ok(value) if value.is_object() => JsonDocument(value),
            Ok(_) => {
                warn!("⚠️ {}:{} is valid JSON but not an object, skipping", path.display(), stats.lines);
                stats.skipped += 1;
                continue;
            }
            Err(error) => {
                warn!("⚠️ {}:{} is not valid JSON ({error}), skipping", path.display(), stats.lines);
                stats.skipped += 1;
                continue;
            }
        };
        if tx.send_blocking(document).is_err() {
            debug!("👋 nobody is listening anymore, stopping at line {}", stats.lines);
            break;
        }
        stats.documents += 1;
    }
    trace!("📖 '{}' done: {:?}", path.display(), stats);
    Ok(stats)
}
