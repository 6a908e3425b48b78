use crate::descriptor::ModelDescriptor;
use crate::error::ModelError;

/// A behavioral hardware model advanced one evaluation tick at a time.
///
/// The scheduler treats implementors as opaque: it only steps them, asks
/// whether they have raised their own stop condition, and finalizes them once
/// at teardown. Whatever the model owns (bus claims, buffers) is released when
/// it is dropped.
pub trait SteppedModel {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    /// Advance internal state by exactly one tick.
    fn step(&mut self) -> Result<(), ModelError>;

    /// Whether the model has raised its stop condition (the `$finish` of an
    /// HDL model). May stay true once raised; callers latch it either way.
    fn is_done(&self) -> bool;

    /// Flush any buffered completion state. Called at most once.
    fn finalize(&mut self) -> Result<(), ModelError> {
        Ok(())
    }
}

/// Construction seam: turns a descriptor into a live model instance.
pub trait ModelFactory {
    fn build(&self, descriptor: &ModelDescriptor) -> Result<Box<dyn SteppedModel>, ModelError>;
}

impl<F> ModelFactory for F
where
    F: Fn(&ModelDescriptor) -> Result<Box<dyn SteppedModel>, ModelError>,
{
    fn build(&self, descriptor: &ModelDescriptor) -> Result<Box<dyn SteppedModel>, ModelError> {
        self(descriptor)
    }
}
