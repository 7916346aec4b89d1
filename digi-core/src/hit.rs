//! Hit record types for detector response data.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Uniform view of one hit as seen by signal processors.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Signal {
    /// Raw cell identifier of the originating record.
    pub cell_id: u64,
    /// Signal amplitude (deposited energy or charge).
    pub amplitude: f64,
    /// Signal time in nanoseconds.
    pub time: f64,
    /// Propagation distance (mm) the signal travelled.
    pub distance: f64,
}

impl Signal {
    /// Creates a new signal value.
    #[inline]
    #[must_use]
    pub fn new(cell_id: u64, amplitude: f64, time: f64, distance: f64) -> Self {
        Self {
            cell_id,
            amplitude,
            time,
            distance,
        }
    }

    /// Returns a copy with the given amplitude.
    #[inline]
    #[must_use]
    pub fn with_amplitude(mut self, amplitude: f64) -> Self {
        self.amplitude = amplitude;
        self
    }

    /// Returns true if the signal carries no amplitude.
    #[inline]
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.amplitude == 0.0
    }
}

/// Simulated energy deposit in a sensitive cell.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EnergyDeposit {
    /// Raw cell identifier.
    pub cell_id: u64,
    /// Global position of the deposit (mm).
    pub position: [f64; 3],
    /// Deposited energy.
    pub deposit: f64,
    /// Deposit time (ns).
    pub time: f64,
}

impl EnergyDeposit {
    /// Creates a new energy deposit.
    #[inline]
    #[must_use]
    pub fn new(cell_id: u64, position: [f64; 3], deposit: f64, time: f64) -> Self {
        Self {
            cell_id,
            position,
            deposit,
            time,
        }
    }
}

/// Readout-level hit produced by the digitization chain.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RawHit {
    /// Raw cell identifier.
    pub cell_id: u64,
    /// Signal amplitude.
    pub amplitude: f64,
    /// Signal time (ns).
    pub time: f64,
    /// Distance from the readout (mm).
    pub distance: f64,
}

impl RawHit {
    /// Creates a new raw hit.
    #[inline]
    #[must_use]
    pub fn new(cell_id: u64, amplitude: f64, time: f64, distance: f64) -> Self {
        Self {
            cell_id,
            amplitude,
            time,
            distance,
        }
    }
}

/// Trait for hit records stored in hit containers.
///
/// Signal processors never see the concrete record type: they work on the
/// [`Signal`] view and the result is written back with [`Hit::apply_signal`].
/// The cell identifier is part of the record's identity and is not changed by
/// `apply_signal`.
pub trait Hit: Send + Sync {
    /// Returns the raw cell identifier.
    fn cell_id(&self) -> u64;

    /// Returns the signal amplitude.
    fn amplitude(&self) -> f64;

    /// Returns the record time.
    fn time(&self) -> f64;

    /// Returns the propagation distance.
    fn distance(&self) -> f64;

    /// Writes a processed signal back into the record.
    fn apply_signal(&mut self, signal: &Signal);

    /// Returns the uniform signal view.
    #[inline]
    fn signal(&self) -> Signal {
        Signal::new(self.cell_id(), self.amplitude(), self.time(), self.distance())
    }
}

impl Hit for EnergyDeposit {
    #[inline]
    fn cell_id(&self) -> u64 {
        self.cell_id
    }

    #[inline]
    fn amplitude(&self) -> f64 {
        self.deposit
    }

    #[inline]
    fn time(&self) -> f64 {
        self.time
    }

    /// Distance of the deposit from the origin.
    #[inline]
    fn distance(&self) -> f64 {
        let [x, y, z] = self.position;
        (x * x + y * y + z * z).sqrt()
    }

    #[inline]
    fn apply_signal(&mut self, signal: &Signal) {
        self.deposit = signal.amplitude;
        self.time = signal.time;
    }
}

impl Hit for RawHit {
    #[inline]
    fn cell_id(&self) -> u64 {
        self.cell_id
    }

    #[inline]
    fn amplitude(&self) -> f64 {
        self.amplitude
    }

    #[inline]
    fn time(&self) -> f64 {
        self.time
    }

    #[inline]
    fn distance(&self) -> f64 {
        self.distance
    }

    #[inline]
    fn apply_signal(&mut self, signal: &Signal) {
        self.amplitude = signal.amplitude;
        self.time = signal.time;
        self.distance = signal.distance;
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp)]
    use super::*;

    #[test]
    fn test_deposit_distance() {
        let dep = EnergyDeposit::new(1, [3.0, 4.0, 0.0], 1.0, 2.0);
        assert_eq!(dep.distance(), 5.0);
        assert_eq!(dep.signal().distance, 5.0);
    }

    #[test]
    fn test_apply_signal_keeps_cell_id() {
        let mut hit = RawHit::new(42, 1.0, 10.0, 50.0);
        hit.apply_signal(&Signal::new(99, 0.5, 12.0, 40.0));
        assert_eq!(hit.cell_id(), 42);
        assert_eq!(hit.amplitude(), 0.5);
        assert_eq!(hit.time(), 12.0);
        assert_eq!(hit.distance(), 40.0);
    }

    #[test]
    fn test_deposit_apply_signal() {
        let mut dep = EnergyDeposit::new(7, [0.0, 0.0, 10.0], 2.0, 1.0);
        let processed = dep.signal().with_amplitude(0.25);
        dep.apply_signal(&processed);
        assert_eq!(dep.deposit, 0.25);
        assert_eq!(dep.position, [0.0, 0.0, 10.0]);
    }
}
