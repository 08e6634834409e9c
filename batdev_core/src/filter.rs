//! Per-channel sliding windows and the convolution kernel that smooths them.
//!
//! Each analog channel owns a fixed-capacity ring of recent samples. A smoothed
//! value is the kernel dot-product over the window in chronological order
//! (oldest sample weighted by the first coefficient). Until a window is full
//! the filter either withholds a value or falls back to a running mean,
//! depending on [`WarmupPolicy`].

use batdev_traits::Channel;
use thiserror::Error;

/// Allowed deviation of the kernel sum from unity gain.
pub const GAIN_TOLERANCE: f32 = 1e-3;

/// Quadratic/cubic Savitzky-Golay smoothing coefficients for an 11-point window.
const SAVITZKY_GOLAY_11: [f32; 11] = [
    -36.0 / 429.0,
    9.0 / 429.0,
    44.0 / 429.0,
    69.0 / 429.0,
    84.0 / 429.0,
    89.0 / 429.0,
    84.0 / 429.0,
    69.0 / 429.0,
    44.0 / 429.0,
    9.0 / 429.0,
    -36.0 / 429.0,
];

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FilterError {
    #[error("kernel has no weights")]
    Empty,
    #[error("kernel weight {index} is not finite")]
    NonFinite { index: usize },
    #[error("kernel weights sum to {sum}, expected 1.0")]
    Gain { sum: f32 },
    #[error("kernel length {weights} does not match window capacity {capacity}")]
    CapacityMismatch { capacity: usize, weights: usize },
    #[error("gaussian sigma must be finite and > 0, got {0}")]
    Sigma(f32),
}

/// What a channel reports while its window is still filling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WarmupPolicy {
    /// No value until the window is full.
    #[default]
    Suppress,
    /// Arithmetic mean of the samples collected so far.
    RunningMean,
}

/// Validated convolution weights. The window capacity equals the kernel length.
#[derive(Debug, Clone, PartialEq)]
pub struct Kernel {
    weights: Box<[f32]>,
}

impl Kernel {
    /// Validate caller-supplied weights: non-empty, finite, unity gain.
    pub fn new(weights: Vec<f32>) -> Result<Self, FilterError> {
        if weights.is_empty() {
            return Err(FilterError::Empty);
        }
        if let Some(index) = weights.iter().position(|w| !w.is_finite()) {
            return Err(FilterError::NonFinite { index });
        }
        let sum: f32 = weights.iter().sum();
        if (sum - 1.0).abs() > GAIN_TOLERANCE {
            return Err(FilterError::Gain { sum });
        }
        Ok(Self {
            weights: weights.into_boxed_slice(),
        })
    }

    /// The 11-point Savitzky-Golay smoother.
    pub fn savitzky_golay_11() -> Self {
        Self {
            weights: Box::new(SAVITZKY_GOLAY_11),
        }
    }

    /// Gaussian weights centred on the window, normalized to unity gain.
    pub fn gaussian(capacity: usize, sigma: f32) -> Result<Self, FilterError> {
        if capacity == 0 {
            return Err(FilterError::Empty);
        }
        if !sigma.is_finite() || sigma <= 0.0 {
            return Err(FilterError::Sigma(sigma));
        }
        let centre = (capacity - 1) as f32 / 2.0;
        let denom = 2.0 * sigma * sigma;
        let raw: Vec<f32> = (0..capacity)
            .map(|i| {
                let d = i as f32 - centre;
                (-(d * d) / denom).exp()
            })
            .collect();
        let total: f32 = raw.iter().sum();
        Self::new(raw.into_iter().map(|w| w / total).collect())
    }

    /// Uniform weights.
    pub fn mean(capacity: usize) -> Result<Self, FilterError> {
        if capacity == 0 {
            return Err(FilterError::Empty);
        }
        Self::new(vec![1.0 / capacity as f32; capacity])
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.weights.len()
    }

    #[inline]
    pub fn weights(&self) -> &[f32] {
        &self.weights
    }
}

/// Fixed-capacity ring of the most recent samples for one channel.
#[derive(Debug, Clone)]
pub struct SampleWindow {
    slots: Box<[f32]>,
    /// Next write position.
    index: usize,
    count: usize,
}

impl SampleWindow {
    pub fn new(capacity: usize) -> Self {
        let mut window = Self {
            slots: vec![0.0; capacity.max(1)].into_boxed_slice(),
            index: 0,
            count: 0,
        };
        window.flush();
        window
    }

    /// Discard all samples. A freshly constructed window is in exactly this state.
    pub fn flush(&mut self) {
        self.slots.fill(0.0);
        self.index = 0;
        self.count = 0;
    }

    /// Store `sample`, overwriting the oldest once full.
    pub fn push(&mut self, sample: f32) {
        self.slots[self.index] = sample;
        self.index = (self.index + 1) % self.slots.len();
        if self.count < self.slots.len() {
            self.count += 1;
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.count == self.slots.len()
    }

    /// Stored samples, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = f32> + '_ {
        let cap = self.slots.len();
        let oldest = (self.index + cap - self.count) % cap;
        (0..self.count).map(move |i| self.slots[(oldest + i) % cap])
    }

    fn convolve(&self, kernel: &Kernel) -> f32 {
        self.iter()
            .zip(kernel.weights().iter())
            .map(|(x, w)| x * w)
            .sum()
    }

    fn running_mean(&self) -> Option<f32> {
        if self.count == 0 {
            return None;
        }
        Some(self.iter().sum::<f32>() / self.count as f32)
    }
}

/// One window per [`Channel`], all sharing a kernel and warm-up policy.
#[derive(Debug, Clone)]
pub struct SmoothingFilter {
    kernel: Kernel,
    policy: WarmupPolicy,
    windows: [SampleWindow; Channel::COUNT],
}

impl SmoothingFilter {
    /// Window capacity is taken from the kernel, so the two cannot disagree.
    pub fn new(kernel: Kernel, policy: WarmupPolicy) -> Self {
        let capacity = kernel.capacity();
        Self {
            kernel,
            policy,
            windows: std::array::from_fn(|_| SampleWindow::new(capacity)),
        }
    }

    /// Build from runtime config, checking the configured capacity against the kernel.
    pub fn from_cfg(cfg: &crate::config::FilterCfg) -> Result<Self, FilterError> {
        use crate::config::KernelKind;
        let kernel = match cfg.kernel {
            KernelKind::SavitzkyGolay => Kernel::savitzky_golay_11(),
            KernelKind::Gaussian { sigma } => Kernel::gaussian(cfg.capacity, sigma)?,
            KernelKind::Mean => Kernel::mean(cfg.capacity)?,
        };
        if kernel.capacity() != cfg.capacity {
            return Err(FilterError::CapacityMismatch {
                capacity: cfg.capacity,
                weights: kernel.capacity(),
            });
        }
        Ok(Self::new(kernel, cfg.warmup))
    }

    #[inline]
    pub fn push(&mut self, channel: Channel, sample: f32) {
        self.windows[channel.index()].push(sample);
    }

    /// Smoothed value for `channel`, or `None` while warming up under
    /// [`WarmupPolicy::Suppress`] (or before any sample at all).
    pub fn smoothed(&self, channel: Channel) -> Option<f32> {
        let window = &self.windows[channel.index()];
        if window.is_full() {
            return Some(window.convolve(&self.kernel));
        }
        match self.policy {
            WarmupPolicy::Suppress => None,
            WarmupPolicy::RunningMean => window.running_mean(),
        }
    }

    #[inline]
    pub fn is_ready(&self, channel: Channel) -> bool {
        self.windows[channel.index()].is_full()
    }

    /// Samples currently held for `channel`.
    #[inline]
    pub fn fill(&self, channel: Channel) -> usize {
        self.windows[channel.index()].len()
    }

    pub fn flush(&mut self, channel: Channel) {
        self.windows[channel.index()].flush();
    }

    pub fn flush_all(&mut self) {
        for window in &mut self.windows {
            window.flush();
        }
    }

    pub fn window(&self, channel: Channel) -> &SampleWindow {
        &self.windows[channel.index()]
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.kernel.capacity()
    }

    #[inline]
    pub fn policy(&self) -> WarmupPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn savitzky_golay_has_unity_gain() {
        let k = Kernel::savitzky_golay_11();
        let sum: f32 = k.weights().iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert_eq!(k.capacity(), 11);
    }

    #[rstest]
    #[case(vec![], FilterError::Empty)]
    #[case(vec![0.5, f32::NAN, 0.5], FilterError::NonFinite { index: 1 })]
    #[case(vec![0.5, 0.4], FilterError::Gain { sum: 0.9 })]
    fn invalid_kernels_are_rejected(#[case] weights: Vec<f32>, #[case] expected: FilterError) {
        let err = Kernel::new(weights).unwrap_err();
        match (err, expected) {
            (FilterError::Gain { sum: a }, FilterError::Gain { sum: b }) => {
                assert!((a - b).abs() < 1e-6);
            }
            (a, b) => assert_eq!(a, b),
        }
    }

    #[test]
    fn gaussian_is_symmetric_and_normalized() {
        let k = Kernel::gaussian(7, 1.5).unwrap();
        let w = k.weights();
        assert!((w.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        for i in 0..w.len() {
            assert!((w[i] - w[w.len() - 1 - i]).abs() < 1e-6);
        }
        assert!(w[3] > w[0]);
    }

    #[test]
    fn gaussian_rejects_bad_sigma() {
        assert_eq!(
            Kernel::gaussian(5, 0.0).unwrap_err(),
            FilterError::Sigma(0.0)
        );
    }

    #[test]
    fn window_iterates_oldest_first_after_wrap() {
        let mut w = SampleWindow::new(3);
        for x in [1.0, 2.0, 3.0, 4.0] {
            w.push(x);
        }
        assert_eq!(w.iter().collect::<Vec<_>>(), vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn constant_input_smooths_to_itself() {
        let mut f = SmoothingFilter::new(Kernel::savitzky_golay_11(), WarmupPolicy::Suppress);
        for _ in 0..11 {
            f.push(Channel::BusVoltage, 1.3);
        }
        let y = f.smoothed(Channel::BusVoltage).unwrap();
        assert!((y - 1.3).abs() < 1e-5);
    }

    #[test]
    fn suppress_withholds_until_full() {
        let mut f = SmoothingFilter::new(Kernel::mean(4).unwrap(), WarmupPolicy::Suppress);
        for i in 0..3 {
            f.push(Channel::ShuntCurrent, i as f32);
            assert_eq!(f.smoothed(Channel::ShuntCurrent), None);
            assert!(!f.is_ready(Channel::ShuntCurrent));
        }
        f.push(Channel::ShuntCurrent, 3.0);
        assert_eq!(f.smoothed(Channel::ShuntCurrent), Some(1.5));
    }

    #[test]
    fn running_mean_reports_partial_average() {
        let mut f = SmoothingFilter::new(Kernel::mean(4).unwrap(), WarmupPolicy::RunningMean);
        assert_eq!(f.smoothed(Channel::ThermLoad), None);
        f.push(Channel::ThermLoad, 20.0);
        f.push(Channel::ThermLoad, 22.0);
        assert_eq!(f.smoothed(Channel::ThermLoad), Some(21.0));
    }

    #[test]
    fn flush_only_touches_one_channel() {
        let mut f = SmoothingFilter::new(Kernel::mean(2).unwrap(), WarmupPolicy::Suppress);
        for ch in Channel::ALL {
            f.push(ch, 1.0);
            f.push(ch, 1.0);
        }
        f.flush(Channel::BusVoltage);
        assert_eq!(f.fill(Channel::BusVoltage), 0);
        assert!(f.is_ready(Channel::ShuntCurrent));
        f.flush_all();
        assert!(Channel::ALL.iter().all(|&ch| f.fill(ch) == 0));
    }

    #[test]
    fn savitzky_golay_config_requires_eleven() {
        let cfg = crate::config::FilterCfg {
            capacity: 9,
            ..crate::config::FilterCfg::default()
        };
        assert_eq!(
            SmoothingFilter::from_cfg(&cfg).unwrap_err(),
            FilterError::CapacityMismatch {
                capacity: 9,
                weights: 11
            }
        );
    }
}
