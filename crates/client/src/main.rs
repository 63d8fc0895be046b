use std::sync::Arc;

use arrow::array::{ArrayRef, StringArray};
use arrow_schema::{DataType, Field, Schema};
use kflow_client::sample::{GROUP_COLUMN, URL_COLUMN, VALUES_COLUMN};
use kflow_client::{Engine, SampleConfig, sample_reader};
use kflow_common::EngineConfig;
use kflow_execution::{URL_EXTRACT, URL_EXTRACT_DICT, UrlParseOptions, UrlPart};
use kflow_planner::{
    batches_source, calc_quantile_with_options, filter_not_in_value_set, open_dataset,
    project_with_kernel, record_batch_source, values_with_count_at_least,
};
use tracing_subscriber::EnvFilter;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let Some(command) = args.first().map(String::as_str) else {
        print_usage();
        return Ok(());
    };
    let opts = parse_opts(&args[1..])?;
    let config = match &opts.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    let engine = Engine::new(config)?;

    match command {
        "outliers" => run_outliers(&engine, &opts)?,
        "urls" => run_urls(&engine, &opts)?,
        "scan" => run_scan(&engine, &opts)?,
        "--help" | "-h" | "help" => print_usage(),
        other => return Err(format!("unknown command: {other}").into()),
    }

    if opts.metrics {
        eprintln!("{}", engine.prometheus_metrics());
    }
    futures::executor::block_on(engine.shutdown())?;
    Ok(())
}

#[derive(Debug, Clone, Default)]
struct CliOpts {
    config: Option<String>,
    sample: SampleConfig,
    quantile: Option<f64>,
    write: Option<String>,
    part: Option<UrlPart>,
    plan_only: bool,
    metrics: bool,
    positional: Vec<String>,
}

fn parse_opts(args: &[String]) -> CliResult<CliOpts> {
    let mut opts = CliOpts::default();
    let mut i = 0usize;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => opts.config = Some(value(args, &mut i, "--config")?),
            "--batches" => opts.sample.batches = value(args, &mut i, "--batches")?.parse()?,
            "--rows" => opts.sample.rows_per_batch = value(args, &mut i, "--rows")?.parse()?,
            "--seed" => opts.sample.seed = value(args, &mut i, "--seed")?.parse()?,
            "--null-every" => opts.sample.null_every = value(args, &mut i, "--null-every")?.parse()?,
            "--quantile" => opts.quantile = Some(value(args, &mut i, "--quantile")?.parse()?),
            "--write" => opts.write = Some(value(args, &mut i, "--write")?),
            "--part" => {
                opts.part = Some(match value(args, &mut i, "--part")?.as_str() {
                    "host" => UrlPart::Host,
                    "path" => UrlPart::Path,
                    other => return Err(format!("unknown url part: {other}").into()),
                })
            }
            "--plan" => opts.plan_only = true,
            "--metrics" => opts.metrics = true,
            other if other.starts_with("--") => {
                return Err(format!("unknown argument: {other}").into());
            }
            other => opts.positional.push(other.to_string()),
        }
        i += 1;
    }
    Ok(opts)
}

fn value(args: &[String], i: &mut usize, flag: &str) -> CliResult<String> {
    *i += 1;
    Ok(args
        .get(*i)
        .cloned()
        .ok_or_else(|| format!("missing value for {flag}"))?)
}

/// Groups whose row count reaches the configured quantile, then the sample
/// with those groups removed.
fn run_outliers(engine: &Engine, opts: &CliOpts) -> CliResult<()> {
    let mut tdigest = engine.tdigest_options();
    if let Some(q) = opts.quantile {
        tdigest.q = q;
    }
    let quantile_plan = calc_quantile_with_options(
        record_batch_source(sample_reader(&opts.sample)?),
        GROUP_COLUMN,
        VALUES_COLUMN,
        tdigest,
    );
    if opts.plan_only {
        println!("{}", engine.explain(&quantile_plan));
        return Ok(());
    }
    let quantile = futures::executor::block_on(engine.execute_to_table(quantile_plan))?;
    let Some(threshold) = quantile.to_f64_scalar()? else {
        println!("OK: no values");
        return Ok(());
    };
    println!("count threshold: {threshold}");

    let outliers = futures::executor::block_on(engine.execute_to_table(
        values_with_count_at_least(
            record_batch_source(sample_reader(&opts.sample)?),
            GROUP_COLUMN,
            VALUES_COLUMN,
            threshold,
        ),
    ))?;
    let blacklist = outliers.column_concat(0)?;
    println!("outlier groups: {}", blacklist.len());
    println!("{}", outliers.pretty()?);

    let remaining = filter_not_in_value_set(
        record_batch_source(sample_reader(&opts.sample)?),
        GROUP_COLUMN,
        blacklist,
    );
    match &opts.write {
        Some(dir) => {
            let options = engine.dataset_options(dir.clone(), vec![GROUP_COLUMN.to_string()]);
            let summary = futures::executor::block_on(engine.execute_to_dataset(remaining, options))?;
            println!(
                "wrote {} rows in {} files under {}",
                summary.rows,
                summary.files.len(),
                summary.root.display()
            );
        }
        None => {
            let table = futures::executor::block_on(engine.execute_to_table(remaining))?;
            println!("remaining rows: {}", table.num_rows());
        }
    }
    Ok(())
}

fn run_urls(engine: &Engine, opts: &CliOpts) -> CliResult<()> {
    if opts.positional.is_empty() {
        return Err("urls needs at least one URL argument".into());
    }
    let schema = Arc::new(Schema::new(vec![Field::new(URL_COLUMN, DataType::Utf8, true)]));
    let urls: ArrayRef = Arc::new(StringArray::from(opts.positional.clone()));
    let batch = arrow::record_batch::RecordBatch::try_new(schema.clone(), vec![urls])?;
    let source = batches_source(schema, vec![batch]);

    let plan = match opts.part {
        Some(part) => project_with_kernel(
            source,
            &[URL_COLUMN],
            URL_COLUMN,
            "extracted",
            URL_EXTRACT,
            Some(Arc::new(UrlParseOptions { extract: part })),
        ),
        None => project_with_kernel(source, &[URL_COLUMN], URL_COLUMN, "parts", URL_EXTRACT_DICT, None),
    };
    if opts.plan_only {
        println!("{}", engine.explain(&plan));
        return Ok(());
    }
    let table = futures::executor::block_on(engine.execute_to_table(plan))?;
    println!("{}", table.pretty()?);
    Ok(())
}

fn run_scan(engine: &Engine, opts: &CliOpts) -> CliResult<()> {
    let [path] = opts.positional.as_slice() else {
        return Err("scan needs exactly one dataset path".into());
    };
    let plan = open_dataset(path.clone());
    if opts.plan_only {
        println!("{}", engine.explain(&plan));
        return Ok(());
    }
    let table = futures::executor::block_on(engine.execute_to_table(plan))?;
    println!("{}", table.pretty()?);
    Ok(())
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  kflow outliers [--batches N] [--rows N] [--seed N] [--null-every N]");
    eprintln!("                 [--quantile Q] [--write DIR] [--plan]");
    eprintln!("  kflow urls [--part host|path] [--plan] URL...");
    eprintln!("  kflow scan [--plan] PATH");
    eprintln!("Common flags: --config PATH (JSON engine config), --metrics");
}
