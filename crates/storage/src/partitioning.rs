//! Hive-style `column=value` directory naming.

use std::path::Path;

use arrow::array::{Array, ArrayRef};
use arrow::util::display::array_value_to_string;
use kflow_common::{KflowError, Result};
use url::form_urlencoded;

/// Directory value used for a null partition key.
pub const HIVE_DEFAULT_PARTITION: &str = "__HIVE_DEFAULT_PARTITION__";

/// One `column=value` path segment; the value is form-encoded.
pub fn partition_segment(column: &str, value: Option<&str>) -> String {
    match value {
        Some(v) => format!(
            "{column}={}",
            form_urlencoded::byte_serialize(v.as_bytes()).collect::<String>()
        ),
        None => format!("{column}={HIVE_DEFAULT_PARTITION}"),
    }
}

/// Parse a `column=value` segment back into its column and decoded value.
pub fn parse_partition_segment(segment: &str) -> Option<(String, Option<String>)> {
    let (column, raw) = segment.split_once('=')?;
    if column.is_empty() {
        return None;
    }
    if raw == HIVE_DEFAULT_PARTITION {
        return Some((column.to_string(), None));
    }
    let value = form_urlencoded::parse(raw.as_bytes())
        .next()
        .map(|(k, _)| k.into_owned())
        .unwrap_or_default();
    Some((column.to_string(), Some(value)))
}

/// Partition key segments of `file` relative to `root`, outermost first.
pub fn partition_values(root: &Path, file: &Path) -> Vec<(String, Option<String>)> {
    let Ok(rel) = file.strip_prefix(root) else {
        return Vec::new();
    };
    let Some(dir) = rel.parent() else {
        return Vec::new();
    };
    dir.components()
        .filter_map(|c| c.as_os_str().to_str())
        .filter_map(parse_partition_segment)
        .collect()
}

/// Text form of `array[row]` used as a directory value; `None` for null.
pub fn partition_value_string(array: &ArrayRef, row: usize) -> Result<Option<String>> {
    if array.is_null(row) {
        return Ok(None);
    }
    array_value_to_string(array, row)
        .map(Some)
        .map_err(|e| KflowError::Execution(format!("partition value render failed: {e}")))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use arrow::array::{Int64Array, StringArray};

    use super::*;

    #[test]
    fn segments_encode_and_decode() {
        let seg = partition_segment("Group", Some("a b/c=d"));
        assert!(!seg[6..].contains('/'));
        assert_eq!(
            parse_partition_segment(&seg),
            Some(("Group".to_string(), Some("a b/c=d".to_string())))
        );
        let null = partition_segment("Group", None);
        assert_eq!(null, "Group=__HIVE_DEFAULT_PARTITION__");
        assert_eq!(
            parse_partition_segment(&null),
            Some(("Group".to_string(), None))
        );
        assert_eq!(
            parse_partition_segment("Group="),
            Some(("Group".to_string(), Some(String::new())))
        );
        assert_eq!(parse_partition_segment("part0.parquet"), None);
        assert_eq!(parse_partition_segment("=x"), None);
    }

    #[test]
    fn reads_values_from_nested_paths() {
        let root = PathBuf::from("/data/out");
        let file = root.join("g=group_1").join("d=2024").join("part0.parquet");
        assert_eq!(
            partition_values(&root, &file),
            vec![
                ("g".to_string(), Some("group_1".to_string())),
                ("d".to_string(), Some("2024".to_string())),
            ]
        );
        assert!(partition_values(&root, &root.join("part0.parquet")).is_empty());
    }

    #[test]
    fn renders_array_values() {
        let ints: ArrayRef = Arc::new(Int64Array::from(vec![Some(7), None]));
        assert_eq!(
            partition_value_string(&ints, 0).expect("render"),
            Some("7".to_string())
        );
        assert_eq!(partition_value_string(&ints, 1).expect("render"), None);
        let strs: ArrayRef = Arc::new(StringArray::from(vec!["group_2"]));
        assert_eq!(
            partition_value_string(&strs, 0).expect("render"),
            Some("group_2".to_string())
        );
    }
}
