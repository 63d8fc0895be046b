use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;

/// Per-invocation configuration for a registered scalar function.
///
/// Each concrete options struct names its type through [`FunctionOptions::type_name`];
/// the function registry only accepts options whose type name has been registered
/// as a companion of the function that requires it.
pub trait FunctionOptions: Debug + Send + Sync {
    /// Stable type name used for registry lookups.
    fn type_name(&self) -> &'static str;

    /// Downcast hook for kernels reading their typed options.
    fn as_any(&self) -> &dyn Any;
}

/// Shared, immutable options handle carried inside expressions.
pub type FunctionOptionsRef = Arc<dyn FunctionOptions>;

/// Downcast `options` to `T`, returning `None` on a type mismatch.
pub fn downcast_options<T: FunctionOptions + 'static>(options: &dyn FunctionOptions) -> Option<&T> {
    options.as_any().downcast_ref::<T>()
}
