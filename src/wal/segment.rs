//! WAL Segment Module
//!
//! Naming, discovery, and the header line that tags every segment with a
//! format name and version so incompatible on-disk state is refused,
//! never silently misread.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

/// Format tag written into every segment header.
pub const WAL_FORMAT: &str = "shardcache-wal";

/// Current on-disk format version.
pub const WAL_VERSION: u32 = 1;

// == Segment Header ==
/// First line of every segment file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentHeader {
    pub format: String,
    pub version: u32,
}

impl SegmentHeader {
    pub fn new() -> Self {
        Self {
            format: WAL_FORMAT.to_string(),
            version: WAL_VERSION,
        }
    }

    /// Serializes the header to its JSON line (no trailing newline).
    pub fn encode(&self) -> String {
        serde_json::to_string(self).expect("SegmentHeader always serializes")
    }

    /// Parses the header line and refuses unknown formats or versions.
    pub fn decode(line: &str) -> Result<Self> {
        let header: SegmentHeader = serde_json::from_str(line)
            .map_err(|e| CacheError::Corruption(format!("unparseable WAL header: {}", e)))?;
        if header.format != WAL_FORMAT {
            return Err(CacheError::Corruption(format!(
                "unknown WAL format '{}'",
                header.format
            )));
        }
        if header.version != WAL_VERSION {
            return Err(CacheError::Corruption(format!(
                "unsupported WAL version {} (expected {})",
                header.version, WAL_VERSION
            )));
        }
        Ok(header)
    }
}

impl Default for SegmentHeader {
    fn default() -> Self {
        Self::new()
    }
}

// == Segment Files ==
/// File name for the segment with the given index.
pub fn segment_file_name(index: u64) -> String {
    format!("wal-{:06}.log", index)
}

/// Extracts the index from a segment file name, if it is one.
pub fn parse_segment_index(name: &str) -> Option<u64> {
    name.strip_prefix("wal-")?
        .strip_suffix(".log")?
        .parse()
        .ok()
}

/// Lists segment files in `dir`, ordered oldest first.
pub async fn list_segments(dir: &Path) -> std::io::Result<Vec<(u64, PathBuf)>> {
    let mut segments = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        if let Some(index) = name.to_str().and_then(parse_segment_index) {
            segments.push((index, entry.path()));
        }
    }
    segments.sort_by_key(|(index, _)| *index);
    Ok(segments)
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = SegmentHeader::new();
        let decoded = SegmentHeader::decode(&header.encode()).unwrap();
        assert_eq!(decoded.format, WAL_FORMAT);
        assert_eq!(decoded.version, WAL_VERSION);
    }

    #[test]
    fn test_header_refuses_unknown_format() {
        let line = r#"{"format":"someone-elses-journal","version":1}"#;
        assert!(matches!(
            SegmentHeader::decode(line),
            Err(CacheError::Corruption(_))
        ));
    }

    #[test]
    fn test_header_refuses_future_version() {
        let line = format!(r#"{{"format":"{}","version":999}}"#, WAL_FORMAT);
        assert!(SegmentHeader::decode(&line).is_err());
    }

    #[test]
    fn test_segment_names_sort_with_index() {
        assert_eq!(segment_file_name(1), "wal-000001.log");
        assert_eq!(segment_file_name(42), "wal-000042.log");
        assert!(segment_file_name(2) < segment_file_name(10));
    }

    #[test]
    fn test_parse_segment_index() {
        assert_eq!(parse_segment_index("wal-000007.log"), Some(7));
        assert_eq!(parse_segment_index("wal-junk.log"), None);
        assert_eq!(parse_segment_index("other.log"), None);
        assert_eq!(parse_segment_index("wal-000001.tmp"), None);
    }

    #[tokio::test]
    async fn test_list_segments_ordered() {
        let dir = tempfile::tempdir().unwrap();
        for index in [3u64, 1, 2] {
            tokio::fs::write(dir.path().join(segment_file_name(index)), b"")
                .await
                .unwrap();
        }
        tokio::fs::write(dir.path().join("notes.txt"), b"ignored")
            .await
            .unwrap();

        let segments = list_segments(dir.path()).await.unwrap();
        let indices: Vec<u64> = segments.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![1, 2, 3]);
    }
}
