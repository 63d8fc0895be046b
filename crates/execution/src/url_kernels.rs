//! URL kernels: single-field extraction and full structured decomposition.
//!
//! The two kernels disagree on unparsable input: `url_extract` writes an
//! empty (non-null) string, `url_extract_dict` emits a null record. Both
//! percent-decode the host and return the path as written.

use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

use arrow::array::{ArrayRef, AsArray, OffsetSizeTrait};
use arrow_schema::{DataType, Field, Fields};
use kflow_common::Result;
use kflow_planner::FunctionOptions;
use serde::{Deserialize, Serialize};

use crate::registry::{
    options_wrapper_init, ExecSpan, FunctionDoc, FunctionRegistryBuilder, KernelContext,
    KernelExec, ScalarFunction, ScalarKernel,
};
use crate::string_transform::execute_transform;
use crate::struct_decompose::{execute_decompose, RecordOutcome, RowSink, StructDecompose};
use crate::transform::{
    BoundedWriter, MemAllocation, NullHandling, StringTransform, TransformOutcome,
};
use crate::uri::{parse_uri, percent_decode, percent_decode_lossy};

pub const URL_EXTRACT: &str = "url_extract";
pub const URL_EXTRACT_DICT: &str = "url_extract_dict";
pub const URL_PARSE_OPTIONS: &str = "UrlParseOptions";

/// Struct fields produced by `url_extract_dict`, in order.
pub const URL_FIELDS: [&str; 13] = [
    "scheme",
    "host",
    "path",
    "query",
    "fragment",
    "combinedPagePath",
    "pagePath1",
    "pagePath2",
    "pagePath3",
    "utm_campaign",
    "utm_source",
    "utm_medium",
    "utm_term",
];

const UTM_PARAMS: [&str; 4] = ["utm_campaign", "utm_source", "utm_medium", "utm_term"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UrlPart {
    #[default]
    Host,
    Path,
}

/// Options of `url_extract`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UrlParseOptions {
    pub extract: UrlPart,
}

impl FunctionOptions for UrlParseOptions {
    fn type_name(&self) -> &'static str {
        URL_PARSE_OPTIONS
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Extracts one component of each URL.
///
/// Host output is percent-decoded, path output is raw. Unparsable input
/// writes nothing, leaving an empty string.
#[derive(Debug, Clone, Copy)]
pub struct UrlExtract {
    pub part: UrlPart,
}

impl StringTransform for UrlExtract {
    fn max_output_bytes(&self, _len: usize, input_bytes: usize) -> Option<usize> {
        Some(input_bytes)
    }

    fn transform(&self, input: &[u8], out: &mut BoundedWriter<'_>) -> Result<TransformOutcome> {
        let Ok(text) = std::str::from_utf8(input) else {
            return Ok(TransformOutcome::InvalidInput);
        };
        let Ok(uri) = parse_uri(text) else {
            return Ok(TransformOutcome::Written(0));
        };
        match self.part {
            UrlPart::Host => {
                let host = percent_decode(uri.host());
                if std::str::from_utf8(&host).is_err() {
                    return Ok(TransformOutcome::InvalidInput);
                }
                out.write(&host)?;
                Ok(TransformOutcome::Written(host.len()))
            }
            UrlPart::Path => {
                out.write_str(uri.path)?;
                Ok(TransformOutcome::Written(uri.path.len()))
            }
        }
    }
}

/// Splits each URL into the [`URL_FIELDS`] record.
#[derive(Debug, Clone, Copy, Default)]
pub struct UrlDecompose;

pub fn url_fields() -> Fields {
    URL_FIELDS
        .iter()
        .map(|name| Field::new(*name, DataType::Utf8, true))
        .collect()
}

impl StructDecompose for UrlDecompose {
    fn fields(&self) -> Fields {
        url_fields()
    }

    fn decompose(&self, input: &str, sink: &mut RowSink<'_>) -> Result<RecordOutcome> {
        let Ok(uri) = parse_uri(input) else {
            return Ok(RecordOutcome::NullRecord);
        };
        let decoded = percent_decode(uri.host());
        let Ok(host) = std::str::from_utf8(&decoded) else {
            return Ok(RecordOutcome::NullRecord);
        };
        sink.set(0, Some(&uri.scheme.to_ascii_lowercase()))?;
        sink.set(1, Some(host))?;
        sink.set(2, Some(uri.path))?;
        sink.set(3, uri.query)?;
        sink.set(4, uri.fragment)?;
        sink.set(5, Some(&format!("{host}{}", uri.path)))?;

        let mut segments = uri.segments();
        for idx in 6..9 {
            let page = segments
                .next()
                .map(|s| format!("/{}", percent_decode_lossy(s)));
            sink.set(idx, page.as_deref())?;
        }

        let mut utm: [Option<String>; 4] = Default::default();
        if let Some(query) = uri.query {
            for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
                if let Some(slot) = UTM_PARAMS.iter().position(|p| *p == key) {
                    if utm[slot].is_none() {
                        utm[slot] = Some(value.into_owned());
                    }
                }
            }
        }
        for (i, value) in utm.iter().enumerate() {
            sink.set(9 + i, value.as_deref())?;
        }
        Ok(RecordOutcome::Record)
    }
}

struct UrlExtractKernel<O>(PhantomData<O>);

impl<O: OffsetSizeTrait> KernelExec for UrlExtractKernel<O> {
    fn execute(&self, ctx: &KernelContext<'_>, span: &ExecSpan<'_>) -> Result<ArrayRef> {
        let options = ctx.state_as::<UrlParseOptions>()?;
        let transform = UrlExtract {
            part: options.extract,
        };
        let out = execute_transform(
            &transform,
            span.args[0].as_string::<O>(),
            span.nulls.as_ref(),
            ctx.mem_allocation,
        )?;
        Ok(Arc::new(out))
    }
}

struct UrlDecomposeKernel<O>(PhantomData<O>);

impl<O: OffsetSizeTrait> KernelExec for UrlDecomposeKernel<O> {
    fn execute(&self, _ctx: &KernelContext<'_>, span: &ExecSpan<'_>) -> Result<ArrayRef> {
        let out = execute_decompose(&UrlDecompose, span.args[0].as_string::<O>(), None)?;
        Ok(Arc::new(out))
    }
}

fn string_type<O: OffsetSizeTrait>() -> DataType {
    if O::IS_LARGE {
        DataType::LargeUtf8
    } else {
        DataType::Utf8
    }
}

fn url_extract_kernel<O: OffsetSizeTrait + 'static>() -> ScalarKernel {
    ScalarKernel {
        signature: vec![string_type::<O>()],
        output_type: string_type::<O>(),
        exec: Arc::new(UrlExtractKernel::<O>(PhantomData)),
        init: Some(options_wrapper_init::<UrlParseOptions>),
        null_handling: NullHandling::Intersection,
        mem_allocation: MemAllocation::Preallocate,
    }
}

fn url_extract_dict_kernel<O: OffsetSizeTrait + 'static>() -> ScalarKernel {
    ScalarKernel {
        signature: vec![string_type::<O>()],
        output_type: DataType::Struct(url_fields()),
        exec: Arc::new(UrlDecomposeKernel::<O>(PhantomData)),
        init: None,
        null_handling: NullHandling::Computed,
        mem_allocation: MemAllocation::NoPreallocate,
    }
}

/// Register `url_extract`, `url_extract_dict` and the `UrlParseOptions` type.
pub fn register_url_functions(builder: &mut FunctionRegistryBuilder) -> Result<()> {
    let mut extract = ScalarFunction::new(
        URL_EXTRACT,
        1,
        FunctionDoc {
            summary: "Extract the host or path of a URL".to_string(),
            description: "Unparsable input yields an empty string. Host output is \
                          percent-decoded; path output is returned as written."
                .to_string(),
            arg_names: vec!["url".to_string()],
        },
    )
    .with_options_type(URL_PARSE_OPTIONS, Some(Arc::new(UrlParseOptions::default())));
    extract.add_kernel(url_extract_kernel::<i32>())?;
    extract.add_kernel(url_extract_kernel::<i64>())?;

    let mut dict = ScalarFunction::new(
        URL_EXTRACT_DICT,
        1,
        FunctionDoc {
            summary: "Split a URL into its components".to_string(),
            description: "Returns a struct of scheme, host, path, query, fragment, \
                          combinedPagePath, the first three path segments and the utm \
                          query parameters. Unparsable input yields a null record."
                .to_string(),
            arg_names: vec!["url".to_string()],
        },
    );
    dict.add_kernel(url_extract_dict_kernel::<i32>())?;
    dict.add_kernel(url_extract_dict_kernel::<i64>())?;

    builder.add_function(extract)?;
    builder.add_function(dict)?;
    builder.add_options_type(URL_PARSE_OPTIONS)?;
    Ok(())
}
