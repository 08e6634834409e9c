use batdev_traits::Calibration;

/// Invert a linear calibration: the raw count that reads back as `value`.
#[inline]
pub fn to_counts(value: f32, scale: f32, offset: f32) -> i32 {
    let counts = ((value - offset) / scale).round();
    if counts.is_nan() {
        0
    } else {
        counts.clamp(i32::MIN as f32, i32::MAX as f32) as i32
    }
}

#[inline]
pub fn bus_counts(volts: f32, cal: &Calibration) -> i32 {
    to_counts(volts, cal.bus_scale, cal.bus_offset)
}

#[inline]
pub fn shunt_counts(ma: f32, cal: &Calibration) -> i32 {
    to_counts(ma, cal.shunt_scale, cal.shunt_offset)
}

/// Small deterministic PRNG for measurement noise.
#[derive(Debug, Clone)]
pub struct XorShift64(u64);

impl XorShift64 {
    pub fn new(seed: u64) -> Self {
        // zero is a fixed point of xorshift
        Self(seed.max(1))
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    /// Uniform integer in `[-span, span]`.
    pub fn jitter(&mut self, span: u32) -> i32 {
        if span == 0 {
            return 0;
        }
        let width = u64::from(span) * 2 + 1;
        (self.next_u64() % width) as i32 - span as i32
    }
}
