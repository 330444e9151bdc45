// ordering-core/src/stream/catalog.rs

//! Shard catalog loading.
//!
//! Each stream's shard list comes from a [`ShardSource`]. Streams are loaded
//! concurrently, one thread per stream, and all threads are joined before any
//! shard accounting happens.

use std::thread;

use serde::Deserialize;
use tracing::{debug, info};

use super::Stream;
use crate::error::{OrderError, Result};

/// Supplies the per-shard sample counts of a stream.
pub trait ShardSource: Send + Sync {
    /// Returns the number of samples in each of the stream's shards, in order.
    fn load(&self, stream: &Stream) -> Result<Vec<u64>>;
}

impl<F> ShardSource for F
where
    F: Fn(&Stream) -> Result<Vec<u64>> + Send + Sync,
{
    fn load(&self, stream: &Stream) -> Result<Vec<u64>> {
        self(stream)
    }
}

/// Reads shard metadata from a stream's index file in its local directory.
///
/// The index is a JSON object with a `shards` array, each entry carrying a
/// `samples` count. Any other fields are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexFileSource;

#[derive(Debug, Deserialize)]
struct IndexFile {
    shards: Vec<IndexEntry>,
}

#[derive(Debug, Deserialize)]
struct IndexEntry {
    samples: u64,
}

impl ShardSource for IndexFileSource {
    fn load(&self, stream: &Stream) -> Result<Vec<u64>> {
        let path = stream.index_path();
        let text = std::fs::read_to_string(&path).map_err(|e| {
            OrderError::storage_with_source(&path, "failed to read shard index", e)
        })?;
        let index: IndexFile = serde_json::from_str(&text).map_err(|e| {
            OrderError::serialization(format!(
                "failed to parse shard index '{}': {e}",
                path.display()
            ))
        })?;
        debug!(
            stream = stream.name(),
            shards = index.shards.len(),
            "Loaded shard index"
        );
        Ok(index.shards.into_iter().map(|s| s.samples).collect())
    }
}

/// Loads every stream's shard list in parallel.
///
/// Returns one list per stream, in stream order. If any stream fails, the
/// error of the first failing stream (in stream order) is returned.
pub fn load_shards(streams: &[Stream], source: &dyn ShardSource) -> Result<Vec<Vec<u64>>> {
    let results: Vec<Result<Vec<u64>>> = thread::scope(|scope| {
        let handles: Vec<_> = streams
            .iter()
            .map(|stream| scope.spawn(move || source.load(stream)))
            .collect();

        handles
            .into_iter()
            .zip(streams)
            .map(|(handle, stream)| {
                handle.join().unwrap_or_else(|_| {
                    Err(OrderError::stream(
                        stream.name(),
                        "shard index loader panicked",
                    ))
                })
            })
            .collect()
    });

    let lists = results.into_iter().collect::<Result<Vec<_>>>()?;
    info!(
        streams = lists.len(),
        shards = lists.iter().map(Vec::len).sum::<usize>(),
        "Loaded shard catalog"
    );
    Ok(lists)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreamConfig;
    use std::io::Write;
    use tempfile::TempDir;

    fn local_stream(name: &str, dir: &std::path::Path) -> Stream {
        let config = StreamConfig {
            local: Some(dir.to_string_lossy().into_owned()),
            ..Default::default()
        };
        Stream::from_config(name, &config, &StreamConfig::default()).unwrap()
    }

    #[test]
    fn test_index_file_source() {
        let temp_dir = TempDir::new().unwrap();
        let mut file = std::fs::File::create(temp_dir.path().join("index.json")).unwrap();
        write!(
            file,
            r#"{{"version": 2, "shards": [
                {{"format": "mds", "samples": 7, "size_limit": 1024}},
                {{"format": "mds", "samples": 3}}
            ]}}"#
        )
        .unwrap();

        let stream = local_stream("a", temp_dir.path());
        let sizes = IndexFileSource.load(&stream).unwrap();
        assert_eq!(sizes, vec![7, 3]);
    }

    #[test]
    fn test_index_file_missing() {
        let temp_dir = TempDir::new().unwrap();
        let stream = local_stream("a", temp_dir.path());
        let err = IndexFileSource.load(&stream).unwrap_err();
        assert!(matches!(err, OrderError::Storage { .. }));
    }

    #[test]
    fn test_index_file_malformed() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("index.json"), "{\"shards\": [{}]}").unwrap();
        let stream = local_stream("a", temp_dir.path());
        let err = IndexFileSource.load(&stream).unwrap_err();
        assert!(matches!(err, OrderError::Serialization { .. }));
    }

    #[test]
    fn test_load_shards_keeps_stream_order() {
        let streams = vec![
            Stream::in_memory("a"),
            Stream::in_memory("bb"),
            Stream::in_memory("ccc"),
        ];
        let source = |stream: &Stream| -> Result<Vec<u64>> {
            Ok(vec![stream.name().len() as u64; stream.name().len()])
        };
        let lists = load_shards(&streams, &source).unwrap();
        assert_eq!(lists, vec![vec![1], vec![2, 2], vec![3, 3, 3]]);
    }

    #[test]
    fn test_load_shards_propagates_first_error() {
        let streams = vec![
            Stream::in_memory("ok"),
            Stream::in_memory("bad1"),
            Stream::in_memory("bad2"),
        ];
        let source = |stream: &Stream| -> Result<Vec<u64>> {
            if stream.name().starts_with("bad") {
                Err(OrderError::stream(stream.name(), "no index"))
            } else {
                Ok(vec![1])
            }
        };
        let err = load_shards(&streams, &source).unwrap_err();
        assert!(err.to_string().contains("bad1"));
    }

    #[test]
    fn test_load_shards_reports_panicked_loader() {
        let streams = vec![Stream::in_memory("ok"), Stream::in_memory("boom")];
        let source = |stream: &Stream| -> Result<Vec<u64>> {
            if stream.name() == "boom" {
                panic!("index reader crashed");
            }
            Ok(vec![1])
        };
        let err = load_shards(&streams, &source).unwrap_err();
        assert!(matches!(err, OrderError::Stream { ref name, .. } if name == "boom"));
        assert!(!err.is_config());
    }
}
