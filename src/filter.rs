//! Per-channel causal IIR conditioning.
//!
//! Raw counts are scaled to physical units and high-pass filtered into a
//! velocity series suitable for intensity mapping. Accelerometer channels are
//! additionally integrated to velocity before the high-pass stage.

/// Second-order IIR section, direct form I.
#[derive(Debug, Clone)]
struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl Biquad {
    fn new(b0: f64, b1: f64, b2: f64, a1: f64, a2: f64) -> Self {
        Self { b0, b1, b2, a1, a2, x1: 0.0, x2: 0.0, y1: 0.0, y2: 0.0 }
    }

    /// Butterworth-style second-order high-pass with both poles at radius `q`,
    /// normalized to unity gain at Nyquist.
    fn highpass(q: f64) -> Self {
        let k = (1.0 + q) * (1.0 + q) / 4.0;
        Self::new(k, -2.0 * k, k, -2.0 * q, q * q)
    }

    fn process(&mut self, x: f64) -> f64 {
        let y = self.b0 * x + self.b1 * self.x1 + self.b2 * self.x2
            - self.a1 * self.y1 - self.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;
        y
    }

    fn reset(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
    }
}

/// High-pass conditioning for channels already recording velocity (M/S).
#[derive(Debug, Clone)]
pub struct Velocity {
    gain: f64,
    highpass: Biquad,
}

impl Velocity {
    pub fn new(gain: f64, q: f64) -> Self {
        Self { gain, highpass: Biquad::highpass(q) }
    }

    pub fn sample(&mut self, x: f64) -> f64 {
        self.highpass.process(x / self.gain)
    }

    pub fn reset(&mut self) {
        self.highpass.reset();
    }
}

/// Leaky trapezoidal integration to velocity, then high-pass, for channels
/// recording acceleration (M/S**2).
#[derive(Debug, Clone)]
pub struct Acceleration {
    gain: f64,
    dt: f64,
    q: f64,
    last: f64,
    velocity: f64,
    highpass: Biquad,
}

impl Acceleration {
    pub fn new(gain: f64, dt: f64, q: f64) -> Self {
        Self {
            gain,
            dt,
            q,
            last: 0.0,
            velocity: 0.0,
            highpass: Biquad::highpass(q),
        }
    }

    pub fn sample(&mut self, x: f64) -> f64 {
        let a = x / self.gain;
        self.velocity = self.q * self.velocity + 0.5 * self.dt * (a + self.last);
        self.last = a;
        self.highpass.process(self.velocity)
    }

    pub fn reset(&mut self) {
        self.last = 0.0;
        self.velocity = 0.0;
        self.highpass.reset();
    }
}

/// A stream's signal processor: one of the two variants, selected by the
/// channel's sensor units at catalog load.
#[derive(Debug, Clone)]
pub enum Filter {
    Acceleration(Acceleration),
    Velocity(Velocity),
}

impl Filter {
    pub fn acceleration(gain: f64, dt: f64, q: f64) -> Self {
        Filter::Acceleration(Acceleration::new(gain, dt, q))
    }

    pub fn velocity(gain: f64, q: f64) -> Self {
        Filter::Velocity(Velocity::new(gain, q))
    }

    /// Ingest one sample and return the filtered output in M/S.
    pub fn sample(&mut self, x: f64) -> f64 {
        match self {
            Filter::Acceleration(f) => f.sample(x),
            Filter::Velocity(f) => f.sample(x),
        }
    }

    /// Clear all internal state to zero.
    pub fn reset(&mut self) {
        match self {
            Filter::Acceleration(f) => f.reset(),
            Filter::Velocity(f) => f.reset(),
        }
    }
}
