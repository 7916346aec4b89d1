//! Signal processors and their composition.

use digi_core::{EventContext, ProcessorError, Signal};
use std::sync::Arc;

/// Per-record signal transformation.
pub trait SignalProcessor: Send + Sync {
    /// Name used in diagnostics.
    fn name(&self) -> &str;

    /// Transforms one signal.
    ///
    /// # Errors
    /// Returns a [`ProcessorError`] if the input is outside the processor's
    /// domain; the record is then left unchanged.
    fn process(&self, ctx: &EventContext, signal: Signal) -> Result<Signal, ProcessorError>;
}

impl<P: SignalProcessor + ?Sized> SignalProcessor for Arc<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn process(&self, ctx: &EventContext, signal: Signal) -> Result<Signal, ProcessorError> {
        (**self).process(ctx, signal)
    }
}

/// Ordered composition of signal processors.
///
/// The output of each processor is the input of the next; the first failure
/// aborts the chain for that record.
#[derive(Clone, Default)]
pub struct SignalProcessorSequence {
    name: String,
    processors: Vec<Arc<dyn SignalProcessor>>,
}

impl SignalProcessorSequence {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            processors: Vec::new(),
        }
    }

    /// Appends a processor.
    #[must_use]
    pub fn with(mut self, processor: impl SignalProcessor + 'static) -> Self {
        self.processors.push(Arc::new(processor));
        self
    }

    /// Appends a shared processor.
    pub fn push(&mut self, processor: Arc<dyn SignalProcessor>) {
        self.processors.push(processor);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.processors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Processor names in application order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.processors.iter().map(|p| p.name()).collect()
    }

    /// Runs `signal` through every processor in order.
    ///
    /// # Errors
    /// Returns the first processor failure.
    pub fn apply(&self, ctx: &EventContext, signal: Signal) -> Result<Signal, ProcessorError> {
        self.processors
            .iter()
            .try_fold(signal, |signal, processor| processor.process(ctx, signal))
    }
}

impl SignalProcessor for SignalProcessorSequence {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, ctx: &EventContext, signal: Signal) -> Result<Signal, ProcessorError> {
        self.apply(ctx, signal)
    }
}

impl std::fmt::Debug for SignalProcessorSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalProcessorSequence")
            .field("name", &self.name)
            .field("processors", &self.names())
            .finish()
    }
}

/// Adapts a closure into a [`SignalProcessor`].
pub struct FnProcessor<F> {
    name: String,
    f: F,
}

impl<F> FnProcessor<F>
where
    F: Fn(&EventContext, Signal) -> Result<Signal, ProcessorError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> SignalProcessor for FnProcessor<F>
where
    F: Fn(&EventContext, Signal) -> Result<Signal, ProcessorError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, ctx: &EventContext, signal: Signal) -> Result<Signal, ProcessorError> {
        (self.f)(ctx, signal)
    }
}

/// Linear amplitude scale.
#[derive(Debug, Clone)]
pub struct Gain {
    name: String,
    factor: f64,
}

impl Gain {
    /// # Errors
    /// Rejects a non-finite factor.
    pub fn new(name: impl Into<String>, factor: f64) -> Result<Self, ProcessorError> {
        let name = name.into();
        if !factor.is_finite() {
            return Err(ProcessorError::InvalidParameter {
                processor: name,
                parameter: "factor",
                value: factor,
            });
        }
        Ok(Self { name, factor })
    }
}

impl SignalProcessor for Gain {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, _ctx: &EventContext, signal: Signal) -> Result<Signal, ProcessorError> {
        if !signal.amplitude.is_finite() {
            return Err(ProcessorError::OutOfRange {
                processor: self.name.clone(),
                quantity: "amplitude",
                value: signal.amplitude,
            });
        }
        Ok(signal.with_amplitude(signal.amplitude * self.factor))
    }
}

/// Zero suppression: amplitudes below `min` become zero.
#[derive(Debug, Clone)]
pub struct Threshold {
    name: String,
    min: f64,
}

impl Threshold {
    /// # Errors
    /// Rejects a non-finite threshold.
    pub fn new(name: impl Into<String>, min: f64) -> Result<Self, ProcessorError> {
        let name = name.into();
        if !min.is_finite() {
            return Err(ProcessorError::InvalidParameter {
                processor: name,
                parameter: "min",
                value: min,
            });
        }
        Ok(Self { name, min })
    }
}

impl SignalProcessor for Threshold {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, _ctx: &EventContext, signal: Signal) -> Result<Signal, ProcessorError> {
        if signal.amplitude < self.min {
            Ok(signal.with_amplitude(0.0))
        } else {
            Ok(signal)
        }
    }
}
