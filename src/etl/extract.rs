/// Extract Module
///
/// Reads raw records from JSON files produced by the collectors. A file holds either a
/// JSON array of objects or newline-delimited JSON objects.
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::Path;

/// Records read from one file
#[derive(Debug, Clone)]
pub struct Extracted<T> {
    pub records: Vec<T>,
    /// Elements that did not match the record shape
    pub rejected: usize,
}

/// Read every record in `path`
///
/// Elements are decoded one at a time: an element of the wrong shape is logged and
/// counted as rejected, and the remaining elements are still returned.
pub async fn extract_records<T: DeserializeOwned>(path: &Path) -> Result<Extracted<T>> {
    let content =
        tokio::fs::read_to_string(path).await.with_context(|| format!("Failed to read {}", path.display()))?;

    let values = parse_values(&content).with_context(|| format!("Invalid JSON in {}", path.display()))?;

    let mut records = Vec::with_capacity(values.len());
    let mut rejected = 0;

    for (index, value) in values.into_iter().enumerate() {
        match serde_json::from_value::<T>(value) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!("Skipping element {} of {}: {}", index, path.display(), e);
                rejected += 1;
            }
        }
    }

    tracing::info!("Extracted {} records from {} ({} rejected)", records.len(), path.display(), rejected);
    Ok(Extracted { records, rejected })
}

fn parse_values(content: &str) -> Result<Vec<Value>> {
    if content.trim_start().starts_with('[') {
        return Ok(serde_json::from_str(content)?);
    }

    let values = serde_json::Deserializer::from_str(content).into_iter::<Value>().collect::<Result<Vec<_>, _>>()?;
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GasOracle, RawSnapshot, RawTransaction, TimestampLike};
    use std::io::Write;

    fn write_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_parse_array_and_lines() {
        assert_eq!(parse_values(r#"[{"a": 1}, {"a": 2}]"#).unwrap().len(), 2);
        assert_eq!(parse_values("{\"a\": 1}\n{\"a\": 2}\n\n{\"a\": 3}\n").unwrap().len(), 3);
        assert_eq!(parse_values("   ").unwrap().len(), 0);
        assert!(parse_values("[{\"a\": 1}").is_err());
    }

    #[tokio::test]
    async fn test_extract_transactions_with_rejects() {
        let file = write_file(
            r#"[
                {"hash": "0xabc", "received": "2020-01-02T03:04:05.123Z", "gas_limit": 21000},
                {"hash": "0xdef", "received": 1577934246, "gas_limit": "lots"},
                {"hash": "0x123"}
            ]"#,
        );

        let extracted = extract_records::<RawTransaction>(file.path()).await.unwrap();
        assert_eq!(extracted.rejected, 1);
        assert_eq!(extracted.records.len(), 2);
        assert_eq!(extracted.records[0].timestamp, Some(TimestampLike::from("2020-01-02T03:04:05.123Z")));
        assert_eq!(extracted.records[1].timestamp, None);
    }

    #[tokio::test]
    async fn test_extract_snapshot_lines() {
        let file = write_file(
            "{\"time\": 1577934245, \"safeLow\": 1.0, \"standard\": 2.0, \"fast\": 5.0, \"fastest\": 10.0}\n\
             {\"time\": 1577934305, \"safeLow\": 1.5, \"standard\": 2.5, \"fast\": 6.0, \"fastest\": 12.0}\n",
        );

        let extracted = extract_records::<RawSnapshot<GasOracle>>(file.path()).await.unwrap();
        assert_eq!(extracted.rejected, 0);
        assert_eq!(extracted.records[1].time, Some(TimestampLike::Epoch(1577934305)));
        assert_eq!(extracted.records[1].data.fastest, Some(12.0));
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let result = extract_records::<RawTransaction>(Path::new("/nonexistent/records.json")).await;
        assert!(result.is_err());
    }
}
