//! Deterministic sample data: grouped integer values plus a URL column.

use std::sync::Arc;

use arrow::array::{ArrayRef, Int64Builder, StringBuilder};
use arrow::record_batch::{RecordBatch, RecordBatchIterator, RecordBatchReader};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use kflow_common::{KflowError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const GROUP_COLUMN: &str = "Group";
pub const VALUES_COLUMN: &str = "Values";
pub const URL_COLUMN: &str = "Url";

/// Group labels with their relative frequencies; the skew gives the
/// per-group counts a visible upper tail.
pub const SAMPLE_GROUPS: [(&str, u32); 6] = [
    ("group_1", 40),
    ("group_2", 25),
    ("group_3", 15),
    ("group_4", 10),
    ("group_5", 7),
    ("group_6", 3),
];

pub const SAMPLE_URLS: [&str; 6] = [
    "http://www.test.de",
    "https://shop.example.com/products/shoes/running?utm_source=news&utm_medium=email",
    "https://example.org/blog/2024/release-notes#changes",
    "http://user@caf%C3%A9.example/menu?utm_campaign=spring&utm_term=coffee",
    "https://example.com/a/b/c/d?x=1",
    "not a url",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleConfig {
    pub batches: usize,
    pub rows_per_batch: usize,
    pub seed: u64,
    /// Every n-th value is null; 0 disables nulls.
    pub null_every: usize,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            batches: 10,
            rows_per_batch: 1000,
            seed: 42,
            null_every: 0,
        }
    }
}

pub fn sample_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new(GROUP_COLUMN, DataType::Utf8, false),
        Field::new(VALUES_COLUMN, DataType::Int64, true),
        Field::new(URL_COLUMN, DataType::Utf8, false),
    ]))
}

pub fn sample_batches(config: &SampleConfig) -> Result<Vec<RecordBatch>> {
    let schema = sample_schema();
    let total_weight = SAMPLE_GROUPS.iter().map(|(_, w)| *w).sum::<u32>();
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut out = Vec::with_capacity(config.batches);
    for _ in 0..config.batches {
        let mut groups = StringBuilder::new();
        let mut values = Int64Builder::with_capacity(config.rows_per_batch);
        let mut urls = StringBuilder::new();
        for row in 0..config.rows_per_batch {
            groups.append_value(pick_group(rng.random_range(0..total_weight)));
            if config.null_every > 0 && row % config.null_every == config.null_every - 1 {
                values.append_null();
            } else {
                values.append_value(row as i64);
            }
            urls.append_value(SAMPLE_URLS[rng.random_range(0..SAMPLE_URLS.len())]);
        }
        let columns: Vec<ArrayRef> = vec![
            Arc::new(groups.finish()),
            Arc::new(values.finish()),
            Arc::new(urls.finish()),
        ];
        out.push(
            RecordBatch::try_new(schema.clone(), columns)
                .map_err(|e| KflowError::Execution(format!("sample batch failed: {e}")))?,
        );
    }
    Ok(out)
}

/// Reader over [`sample_batches`].
pub fn sample_reader(config: &SampleConfig) -> Result<Box<dyn RecordBatchReader + Send>> {
    let batches = sample_batches(config)?;
    Ok(Box::new(RecordBatchIterator::new(
        batches.into_iter().map(Ok),
        sample_schema(),
    )))
}

fn pick_group(mut roll: u32) -> &'static str {
    for (name, weight) in SAMPLE_GROUPS {
        if roll < weight {
            return name;
        }
        roll -= weight;
    }
    SAMPLE_GROUPS[SAMPLE_GROUPS.len() - 1].0
}

#[cfg(test)]
mod tests {
    use arrow::array::{Array, AsArray};

    use super::*;

    #[test]
    fn same_seed_same_data() {
        let config = SampleConfig {
            batches: 2,
            rows_per_batch: 50,
            ..SampleConfig::default()
        };
        assert_eq!(
            sample_batches(&config).expect("a"),
            sample_batches(&config).expect("b")
        );
    }

    #[test]
    fn nulls_follow_the_configured_stride() {
        let config = SampleConfig {
            batches: 1,
            rows_per_batch: 10,
            null_every: 5,
            ..SampleConfig::default()
        };
        let batches = sample_batches(&config).expect("batches");
        let values = batches[0].column(1);
        assert_eq!(values.null_count(), 2);
        assert!(values.is_null(4) && values.is_null(9));
        let groups = batches[0].column(0).as_string::<i32>();
        assert!(groups
            .iter()
            .flatten()
            .all(|g| SAMPLE_GROUPS.iter().any(|(name, _)| *name == g)));
    }

    #[test]
    fn group_weights_cover_every_roll() {
        assert_eq!(pick_group(0), "group_1");
        assert_eq!(pick_group(39), "group_1");
        assert_eq!(pick_group(40), "group_2");
        assert_eq!(pick_group(99), "group_6");
    }
}
