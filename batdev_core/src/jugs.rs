//! Coulomb counter ("jugs"): charge in and charge out over a session.

use crate::util::MILLIS_PER_HOUR;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Jugs {
    charge_mah: f64,
    discharge_mah: f64,
    elapsed_ms: u64,
}

impl Jugs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Integrate `shunt_ma` over `dt_ms`. Positive current is charge, negative
    /// is discharge; non-finite readings are skipped.
    pub fn tally(&mut self, shunt_ma: f32, dt_ms: u64) {
        if !shunt_ma.is_finite() {
            return;
        }
        let mah = f64::from(shunt_ma) * dt_ms as f64 / MILLIS_PER_HOUR;
        if mah >= 0.0 {
            self.charge_mah += mah;
        } else {
            self.discharge_mah -= mah;
        }
        self.elapsed_ms = self.elapsed_ms.saturating_add(dt_ms);
    }

    #[inline]
    pub fn charge_mah(&self) -> f64 {
        self.charge_mah
    }

    #[inline]
    pub fn discharge_mah(&self) -> f64 {
        self.discharge_mah
    }

    /// Time covered by tallied samples.
    #[inline]
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_amp_for_an_hour_is_a_thousand_mah() {
        let mut j = Jugs::new();
        for _ in 0..3600 {
            j.tally(1000.0, 1000);
        }
        assert!((j.charge_mah() - 1000.0).abs() < 1e-6);
        assert_eq!(j.discharge_mah(), 0.0);
    }

    #[test]
    fn negative_current_counts_as_discharge() {
        let mut j = Jugs::new();
        j.tally(-600.0, 60_000);
        assert!((j.discharge_mah() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn nan_is_ignored() {
        let mut j = Jugs::new();
        j.tally(f32::NAN, 1000);
        assert_eq!(j, Jugs::default());
        j.tally(100.0, 1000);
        assert_eq!(j.elapsed_ms(), 1000);
    }
}
