//! Scalar function registry.
//!
//! Two-phase lifecycle: functions and options types are added to a
//! [`FunctionRegistryBuilder`] during startup, then frozen into an immutable
//! [`FunctionRegistry`] that is shared by `Arc` and read without locks.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef};
use arrow::buffer::NullBuffer;
use arrow_schema::DataType;
use kflow_common::{KflowError, Result};
use kflow_planner::{FunctionOptions, FunctionOptionsRef};
use tracing::debug;

use crate::transform::{MemAllocation, NullHandling};

/// Per-invocation kernel state built by a [`KernelInit`].
pub type KernelState = Arc<dyn Any + Send + Sync>;

/// Builds kernel state from the resolved options of one invocation.
pub type KernelInit = fn(Option<&dyn FunctionOptions>) -> Result<Option<KernelState>>;

/// Kernel init that stores a copy of the typed options as the kernel state.
pub fn options_wrapper_init<T>(options: Option<&dyn FunctionOptions>) -> Result<Option<KernelState>>
where
    T: FunctionOptions + Clone + 'static,
{
    let options = options.ok_or_else(|| {
        KflowError::MissingOptions("kernel requires options but none were resolved".to_string())
    })?;
    let typed = options.as_any().downcast_ref::<T>().ok_or_else(|| {
        KflowError::MissingOptions(format!(
            "kernel received options of type {}",
            options.type_name()
        ))
    })?;
    Ok(Some(Arc::new(typed.clone())))
}

/// Arguments of one kernel invocation.
pub struct ExecSpan<'a> {
    pub args: &'a [ArrayRef],
    pub len: usize,
    /// Intersected argument validity under [`NullHandling::Intersection`];
    /// always `None` for [`NullHandling::Computed`] kernels.
    pub nulls: Option<NullBuffer>,
}

pub struct KernelContext<'a> {
    pub state: Option<&'a KernelState>,
    pub output_type: &'a DataType,
    pub mem_allocation: MemAllocation,
}

impl KernelContext<'_> {
    /// Typed view of the kernel state.
    pub fn state_as<T: 'static>(&self) -> Result<&T> {
        self.state
            .and_then(|s| s.downcast_ref::<T>())
            .ok_or_else(|| KflowError::Execution("kernel state missing or of wrong type".to_string()))
    }
}

/// Executor behind a [`ScalarKernel`].
pub trait KernelExec: Send + Sync {
    fn execute(&self, ctx: &KernelContext<'_>, span: &ExecSpan<'_>) -> Result<ArrayRef>;
}

/// One type-specific implementation of a function.
#[derive(Clone)]
pub struct ScalarKernel {
    pub signature: Vec<DataType>,
    pub output_type: DataType,
    pub exec: Arc<dyn KernelExec>,
    pub init: Option<KernelInit>,
    pub null_handling: NullHandling,
    pub mem_allocation: MemAllocation,
}

impl fmt::Debug for ScalarKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScalarKernel")
            .field("signature", &self.signature)
            .field("output_type", &self.output_type)
            .field("null_handling", &self.null_handling)
            .field("mem_allocation", &self.mem_allocation)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct FunctionDoc {
    pub summary: String,
    pub description: String,
    pub arg_names: Vec<String>,
}

/// A named function grouping kernels with the same arity.
#[derive(Debug, Clone)]
pub struct ScalarFunction {
    name: String,
    arity: usize,
    doc: FunctionDoc,
    options_type: Option<&'static str>,
    default_options: Option<FunctionOptionsRef>,
    kernels: Vec<ScalarKernel>,
}

impl ScalarFunction {
    pub fn new(name: impl Into<String>, arity: usize, doc: FunctionDoc) -> Self {
        Self {
            name: name.into().to_ascii_lowercase(),
            arity,
            doc,
            options_type: None,
            default_options: None,
            kernels: Vec::new(),
        }
    }

    /// Require options of type `type_name`, falling back to `default` when a
    /// call supplies none.
    pub fn with_options_type(
        mut self,
        type_name: &'static str,
        default: Option<FunctionOptionsRef>,
    ) -> Self {
        self.options_type = Some(type_name);
        self.default_options = default;
        self
    }

    pub fn add_kernel(&mut self, kernel: ScalarKernel) -> Result<()> {
        if kernel.signature.len() != self.arity {
            return Err(KflowError::InvalidConfig(format!(
                "kernel for {} takes {} args, function arity is {}",
                self.name,
                kernel.signature.len(),
                self.arity
            )));
        }
        if self.kernels.iter().any(|k| k.signature == kernel.signature) {
            return Err(KflowError::InvalidConfig(format!(
                "duplicate kernel signature {:?} for {}",
                kernel.signature, self.name
            )));
        }
        self.kernels.push(kernel);
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn doc(&self) -> &FunctionDoc {
        &self.doc
    }

    pub fn options_type(&self) -> Option<&'static str> {
        self.options_type
    }

    pub fn kernels(&self) -> &[ScalarKernel] {
        &self.kernels
    }

    /// Kernel whose signature matches `arg_types` exactly.
    pub fn dispatch(&self, arg_types: &[DataType]) -> Result<&ScalarKernel> {
        if arg_types.len() != self.arity {
            return Err(KflowError::Planning(format!(
                "{} expects {} argument(s), got {}",
                self.name,
                self.arity,
                arg_types.len()
            )));
        }
        self.kernels
            .iter()
            .find(|k| k.signature == arg_types)
            .ok_or_else(|| {
                KflowError::Execution(format!(
                    "no kernel of {} matches argument types {arg_types:?}",
                    self.name
                ))
            })
    }

    pub fn return_type(&self, arg_types: &[DataType]) -> Result<DataType> {
        Ok(self.dispatch(arg_types)?.output_type.clone())
    }
}

#[derive(Debug, Default)]
pub struct FunctionRegistryBuilder {
    functions: HashMap<String, Arc<ScalarFunction>>,
    options_types: HashSet<&'static str>,
}

impl FunctionRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_function(&mut self, function: ScalarFunction) -> Result<()> {
        if self.functions.contains_key(function.name()) {
            return Err(KflowError::InvalidConfig(format!(
                "function {} already registered",
                function.name()
            )));
        }
        self.functions
            .insert(function.name().to_string(), Arc::new(function));
        Ok(())
    }

    pub fn add_options_type(&mut self, type_name: &'static str) -> Result<()> {
        if !self.options_types.insert(type_name) {
            return Err(KflowError::InvalidConfig(format!(
                "options type {type_name} already registered"
            )));
        }
        Ok(())
    }

    pub fn freeze(self) -> FunctionRegistry {
        FunctionRegistry {
            functions: self.functions,
            options_types: self.options_types,
        }
    }
}

/// Immutable name to function map.
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<ScalarFunction>>,
    options_types: HashSet<&'static str>,
}

impl FunctionRegistry {
    pub fn builder() -> FunctionRegistryBuilder {
        FunctionRegistryBuilder::new()
    }

    /// Registry holding the built-in URL kernels.
    pub fn with_builtin_functions() -> Result<Self> {
        let mut builder = Self::builder();
        crate::url_kernels::register_url_functions(&mut builder)?;
        Ok(builder.freeze())
    }

    pub fn get_function(&self, name: &str) -> Result<Arc<ScalarFunction>> {
        self.functions
            .get(&name.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| KflowError::FunctionNotFound(name.to_string()))
    }

    pub fn has_options_type(&self, type_name: &str) -> bool {
        self.options_types.contains(type_name)
    }

    /// Options an invocation of `function` runs with.
    pub fn resolve_options(
        &self,
        function: &ScalarFunction,
        options: Option<&FunctionOptionsRef>,
    ) -> Result<Option<FunctionOptionsRef>> {
        let Some(required) = function.options_type else {
            if options.is_some() {
                return Err(KflowError::Planning(format!(
                    "{} does not take options",
                    function.name
                )));
            }
            return Ok(None);
        };
        if !self.has_options_type(required) {
            return Err(KflowError::MissingOptions(format!(
                "{} requires options type {required}, which is not registered",
                function.name
            )));
        }
        match options {
            Some(o) if o.type_name() == required => Ok(Some(Arc::clone(o))),
            Some(o) => Err(KflowError::MissingOptions(format!(
                "{} expects options of type {required}, got {}",
                function.name,
                o.type_name()
            ))),
            None => function.default_options.clone().map(Some).ok_or_else(|| {
                KflowError::MissingOptions(format!(
                    "{} requires {required} and has no defaults",
                    function.name
                ))
            }),
        }
    }

    /// Resolve, dispatch and run `name` over `args`.
    pub fn call_function(
        &self,
        name: &str,
        args: &[ArrayRef],
        options: Option<&FunctionOptionsRef>,
    ) -> Result<ArrayRef> {
        let function = self.get_function(name)?;
        let arg_types = args
            .iter()
            .map(|a| a.data_type().clone())
            .collect::<Vec<_>>();
        let kernel = function.dispatch(&arg_types)?;
        let options = self.resolve_options(&function, options)?;
        let state = match kernel.init {
            Some(init) => init(options.as_deref())?,
            None => None,
        };

        let len = args.first().map_or(0, |a| a.len());
        if args.iter().any(|a| a.len() != len) {
            return Err(KflowError::Execution(format!(
                "{} arguments have different lengths",
                function.name
            )));
        }
        let nulls = match kernel.null_handling {
            NullHandling::Intersection => args
                .iter()
                .fold(None, |acc: Option<NullBuffer>, a| {
                    NullBuffer::union(acc.as_ref(), a.logical_nulls().as_ref())
                }),
            NullHandling::Computed => None,
        };
        debug!(
            function = %function.name,
            rows = len,
            null_handling = ?kernel.null_handling,
            "kernel dispatch"
        );

        let ctx = KernelContext {
            state: state.as_ref(),
            output_type: &kernel.output_type,
            mem_allocation: kernel.mem_allocation,
        };
        let out = kernel.exec.execute(
            &ctx,
            &ExecSpan {
                args,
                len,
                nulls,
            },
        )?;
        if out.len() != len {
            return Err(KflowError::Execution(format!(
                "{} returned {} rows for {len} inputs",
                function.name,
                out.len()
            )));
        }
        if out.data_type() != &kernel.output_type {
            return Err(KflowError::Execution(format!(
                "{} returned {:?}, declared {:?}",
                function.name,
                out.data_type(),
                kernel.output_type
            )));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use arrow::array::{AsArray, StringArray};

    use super::*;
    use crate::string_transform::execute_transform;
    use crate::transform::{BoundedWriter, StringTransform, TransformOutcome};

    #[derive(Debug, Clone)]
    struct RepeatOptions {
        times: usize,
    }

    impl FunctionOptions for RepeatOptions {
        fn type_name(&self) -> &'static str {
            "RepeatOptions"
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[derive(Debug)]
    struct OtherOptions;

    impl FunctionOptions for OtherOptions {
        fn type_name(&self) -> &'static str {
            "OtherOptions"
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct Repeat(usize);

    impl StringTransform for Repeat {
        fn max_output_bytes(&self, _len: usize, input_bytes: usize) -> Option<usize> {
            input_bytes.checked_mul(self.0)
        }

        fn transform(&self, input: &[u8], out: &mut BoundedWriter<'_>) -> Result<TransformOutcome> {
            for _ in 0..self.0 {
                out.write(input)?;
            }
            Ok(TransformOutcome::Written(input.len() * self.0))
        }
    }

    struct RepeatKernel;

    impl KernelExec for RepeatKernel {
        fn execute(&self, ctx: &KernelContext<'_>, span: &ExecSpan<'_>) -> Result<ArrayRef> {
            let opts = ctx.state_as::<RepeatOptions>()?;
            let out = execute_transform(
                &Repeat(opts.times),
                span.args[0].as_string::<i32>(),
                span.nulls.as_ref(),
                ctx.mem_allocation,
            )?;
            Ok(Arc::new(out))
        }
    }

    fn repeat_function() -> ScalarFunction {
        let mut f = ScalarFunction::new(
            "repeat",
            1,
            FunctionDoc {
                summary: "Repeat each string".to_string(),
                ..FunctionDoc::default()
            },
        )
        .with_options_type("RepeatOptions", Some(Arc::new(RepeatOptions { times: 2 })));
        f.add_kernel(ScalarKernel {
            signature: vec![DataType::Utf8],
            output_type: DataType::Utf8,
            exec: Arc::new(RepeatKernel),
            init: Some(options_wrapper_init::<RepeatOptions>),
            null_handling: NullHandling::Intersection,
            mem_allocation: MemAllocation::Preallocate,
        })
        .expect("kernel");
        f
    }

    fn input() -> ArrayRef {
        Arc::new(StringArray::from(vec![Some("ab"), None]))
    }

    #[test]
    fn calls_with_defaults_and_explicit_options() {
        let mut builder = FunctionRegistry::builder();
        builder.add_function(repeat_function()).expect("add");
        builder.add_options_type("RepeatOptions").expect("options");
        let registry = builder.freeze();

        let out = registry.call_function("REPEAT", &[input()], None).expect("call");
        let out = out.as_string::<i32>();
        assert_eq!(out.value(0), "abab");
        assert!(out.is_null(1));

        let three: FunctionOptionsRef = Arc::new(RepeatOptions { times: 3 });
        let out = registry
            .call_function("repeat", &[input()], Some(&three))
            .expect("call");
        assert_eq!(out.as_string::<i32>().value(0), "ababab");
    }

    #[test]
    fn duplicate_registrations_fail() {
        let mut builder = FunctionRegistry::builder();
        builder.add_function(repeat_function()).expect("add");
        let err = builder.add_function(repeat_function()).expect_err("dup");
        assert!(matches!(err, KflowError::InvalidConfig(_)));
        builder.add_options_type("RepeatOptions").expect("options");
        assert!(builder.add_options_type("RepeatOptions").is_err());
    }

    #[test]
    fn unregistered_options_type_fails_at_invocation() {
        let mut builder = FunctionRegistry::builder();
        builder.add_function(repeat_function()).expect("add");
        let registry = builder.freeze();
        registry.get_function("repeat").expect("registered");
        let err = registry
            .call_function("repeat", &[input()], None)
            .expect_err("missing options type");
        assert!(matches!(err, KflowError::MissingOptions(_)));
    }

    #[test]
    fn wrong_options_type_fails() {
        let mut builder = FunctionRegistry::builder();
        builder.add_function(repeat_function()).expect("add");
        builder.add_options_type("RepeatOptions").expect("options");
        let registry = builder.freeze();
        let other: FunctionOptionsRef = Arc::new(OtherOptions);
        let err = registry
            .call_function("repeat", &[input()], Some(&other))
            .expect_err("wrong type");
        assert!(matches!(err, KflowError::MissingOptions(_)));
    }

    #[test]
    fn lookup_and_dispatch_errors() {
        let registry = FunctionRegistry::builder().freeze();
        assert!(matches!(
            registry.get_function("nope"),
            Err(KflowError::FunctionNotFound(_))
        ));

        let mut builder = FunctionRegistry::builder();
        builder.add_function(repeat_function()).expect("add");
        builder.add_options_type("RepeatOptions").expect("options");
        let registry = builder.freeze();
        let ints: ArrayRef = Arc::new(arrow::array::Int64Array::from(vec![1]));
        let err = registry
            .call_function("repeat", &[ints], None)
            .expect_err("no kernel");
        assert!(matches!(err, KflowError::Execution(_)));
        let err = registry
            .call_function("repeat", &[input(), input()], None)
            .expect_err("arity");
        assert!(matches!(err, KflowError::Planning(_)));
    }

    #[test]
    fn kernel_arity_must_match_function() {
        let mut f = ScalarFunction::new("f", 2, FunctionDoc::default());
        let err = f
            .add_kernel(ScalarKernel {
                signature: vec![DataType::Utf8],
                output_type: DataType::Utf8,
                exec: Arc::new(RepeatKernel),
                init: None,
                null_handling: NullHandling::Intersection,
                mem_allocation: MemAllocation::Preallocate,
            })
            .expect_err("arity");
        assert!(matches!(err, KflowError::InvalidConfig(_)));
    }
}
