//! Exponential signal attenuation.

use crate::processor::SignalProcessor;
use digi_core::{EventContext, ProcessorError, Signal};
use serde::{Deserialize, Serialize};

/// Quantity the attenuation is computed over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttenuationVariable {
    /// Signal time (ns).
    Time,
    /// Propagation distance (mm).
    #[default]
    Distance,
}

/// Attenuates amplitudes as `amplitude * exp(-x / decay)`.
///
/// Attenuated amplitudes whose magnitude falls below `floor` are set to zero.
#[derive(Debug, Clone)]
pub struct ExponentialAttenuator {
    name: String,
    decay: f64,
    floor: f64,
    variable: AttenuationVariable,
}

impl ExponentialAttenuator {
    /// Creates an attenuator over the propagation distance.
    ///
    /// # Errors
    /// `decay` must be finite and positive, `floor` finite and non-negative.
    pub fn new(name: impl Into<String>, decay: f64, floor: f64) -> Result<Self, ProcessorError> {
        let name = name.into();
        if !decay.is_finite() || decay <= 0.0 {
            return Err(ProcessorError::InvalidParameter {
                processor: name,
                parameter: "decay",
                value: decay,
            });
        }
        if !floor.is_finite() || floor < 0.0 {
            return Err(ProcessorError::InvalidParameter {
                processor: name,
                parameter: "floor",
                value: floor,
            });
        }
        Ok(Self {
            name,
            decay,
            floor,
            variable: AttenuationVariable::default(),
        })
    }

    #[must_use]
    pub fn with_variable(mut self, variable: AttenuationVariable) -> Self {
        self.variable = variable;
        self
    }

    #[must_use]
    pub fn decay(&self) -> f64 {
        self.decay
    }

    #[must_use]
    pub fn floor(&self) -> f64 {
        self.floor
    }

    #[must_use]
    pub fn variable(&self) -> AttenuationVariable {
        self.variable
    }

    fn out_of_range(&self, quantity: &'static str, value: f64) -> ProcessorError {
        ProcessorError::OutOfRange {
            processor: self.name.clone(),
            quantity,
            value,
        }
    }
}

impl SignalProcessor for ExponentialAttenuator {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, _ctx: &EventContext, signal: Signal) -> Result<Signal, ProcessorError> {
        let (quantity, x) = match self.variable {
            AttenuationVariable::Time => ("time", signal.time),
            AttenuationVariable::Distance => ("distance", signal.distance),
        };
        if !x.is_finite() || x < 0.0 {
            return Err(self.out_of_range(quantity, x));
        }
        if !signal.amplitude.is_finite() {
            return Err(self.out_of_range("amplitude", signal.amplitude));
        }

        let attenuated = signal.amplitude * (-x / self.decay).exp();
        if attenuated.abs() < self.floor {
            Ok(signal.with_amplitude(0.0))
        } else {
            Ok(signal.with_amplitude(attenuated))
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp)]

    use super::*;
    use approx::assert_relative_eq;

    fn ctx() -> EventContext {
        EventContext::new(1, 0)
    }

    #[test]
    fn test_long_distance_falls_below_floor() {
        // exp(-5) ~= 0.0067 < 0.01
        let att = ExponentialAttenuator::new("att", 10.0, 0.01).unwrap();
        let out = att.process(&ctx(), Signal::new(1, 1.0, 0.0, 50.0)).unwrap();
        assert_eq!(out.amplitude, 0.0);
        assert_eq!(out.cell_id, 1);
    }

    #[test]
    fn test_attenuation_value() {
        let att = ExponentialAttenuator::new("att", 10.0, 0.01).unwrap();
        let out = att.process(&ctx(), Signal::new(1, 2.0, 0.0, 10.0)).unwrap();
        assert_relative_eq!(out.amplitude, 2.0 * (-1.0f64).exp(), epsilon = 1e-12);

        let zero = att.process(&ctx(), Signal::new(1, 2.0, 0.0, 0.0)).unwrap();
        assert_relative_eq!(zero.amplitude, 2.0);
    }

    #[test]
    fn test_time_variable() {
        let att = ExponentialAttenuator::new("att", 5.0, 0.0)
            .unwrap()
            .with_variable(AttenuationVariable::Time);
        let out = att.process(&ctx(), Signal::new(1, 1.0, 5.0, 1000.0)).unwrap();
        assert_relative_eq!(out.amplitude, (-1.0f64).exp(), epsilon = 1e-12);
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(ExponentialAttenuator::new("att", 0.0, 0.0).is_err());
        assert!(ExponentialAttenuator::new("att", -1.0, 0.0).is_err());
        assert!(ExponentialAttenuator::new("att", f64::NAN, 0.0).is_err());
        assert!(ExponentialAttenuator::new("att", 1.0, -0.1).is_err());
        assert!(ExponentialAttenuator::new("att", 1.0, f64::INFINITY).is_err());
    }

    #[test]
    fn test_out_of_range_inputs() {
        let att = ExponentialAttenuator::new("att", 1.0, 0.0).unwrap();
        let negative = att.process(&ctx(), Signal::new(1, 1.0, 0.0, -1.0));
        assert!(matches!(
            negative,
            Err(ProcessorError::OutOfRange { quantity: "distance", .. })
        ));
        let nan = att.process(&ctx(), Signal::new(1, f64::NAN, 0.0, 1.0));
        assert!(matches!(
            nan,
            Err(ProcessorError::OutOfRange { quantity: "amplitude", .. })
        ));
    }

    #[test]
    fn test_negative_amplitude_uses_magnitude_for_floor() {
        let att = ExponentialAttenuator::new("att", 10.0, 0.5).unwrap();
        let kept = att.process(&ctx(), Signal::new(1, -2.0, 0.0, 1.0)).unwrap();
        assert!(kept.amplitude < -0.5);
        let cut = att.process(&ctx(), Signal::new(1, -0.4, 0.0, 1.0)).unwrap();
        assert!(cut.is_zero());
    }
}
