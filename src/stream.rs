//! Per-channel processing state: identity, calibration, filter, and the
//! publish/suppression bookkeeping.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::filter::Filter;
use crate::intensity::intensity;

/// An intensity estimate ready for the downstream queue.
///
/// Field order matters: the JSON encoding preserves declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub source: String,
    pub quality: String,
    pub latitude: f32,
    pub longitude: f32,
    pub time: DateTime<Utc>,
    pub mmi: i32,
    pub comment: String,
}

/// One seismometer channel and its operational state.
///
/// Identity, location, and calibration are fixed once a Stream is installed;
/// a catalog record that disagrees replaces the whole Stream rather than
/// mutating it.
#[derive(Debug, Clone)]
pub struct Stream {
    pub network: String,
    pub station: String,
    pub location: String,
    pub channel: String,

    pub latitude: f64,
    pub longitude: f64,

    /// Nominal sample rate in samples/second.
    pub rate: f64,
    /// Sensor units, "M/S**2" or "M/S".
    pub units: String,
    /// Stream sensitivity in counts per physical unit.
    pub gain: f64,

    pub filter: Filter,

    /// Last published intensity level.
    pub mmi: i32,
    /// Wall-clock time of the last publish.
    pub update: DateTime<Utc>,

    /// Intensity above which a sample counts as noise.
    pub level: i32,
    /// Window governing jail entry and release.
    pub probation: Duration,
    pub good: DateTime<Utc>,
    pub bad: DateTime<Utc>,
    pub jailed: bool,

    /// Time of the most recent sample processed; None before any.
    pub last: Option<DateTime<Utc>>,
}

impl Stream {
    /// Canonical display name, `network.station`.
    pub fn source(&self) -> String {
        format!("{}.{}", self.network, self.station)
    }

    /// Lookup key, `network_station_location_channel`.
    pub fn key(&self) -> String {
        [
            self.network.as_str(),
            self.station.as_str(),
            self.location.as_str(),
            self.channel.as_str(),
        ]
        .join("_")
    }

    /// Whether a freshly loaded catalog record describes the same channel
    /// with the same calibration. Anything else forces a replacement.
    pub fn equal(&self, other: &Stream) -> bool {
        self.key() == other.key()
            && self.latitude == other.latitude
            && self.longitude == other.longitude
            && self.units == other.units
            && self.gain == other.gain
            && self.rate == other.rate
    }

    /// Duration covered by `length` samples at this stream's rate.
    pub fn interval(&self, length: f64) -> Duration {
        Duration::nanoseconds((1e9 * length / self.rate) as i64)
    }

    /// True when `first` does not follow on from the previous record.
    pub fn gap(&self, first: DateTime<Utc>, rate: f64) -> bool {
        let delta = if rate > 0.0 { 1.0 / rate } else { 0.0 };
        match self.last {
            None => true,
            Some(last) => {
                let step = (first - last).num_microseconds().unwrap_or(i64::MAX) as f64 / 1e6;
                (step - delta).abs() > 0.5 * delta
            }
        }
    }

    /// Recover from a gap: clear the filter, pre-condition it by running the
    /// record's samples through backwards (discarding outputs) to suppress the
    /// startup transient, and zero the noise bookkeeping.
    pub fn reset(&mut self, samples: &[i32]) {
        self.filter.reset();

        for &s in samples.iter().rev() {
            self.filter.sample(f64::from(s));
        }

        self.bad = DateTime::UNIX_EPOCH;
        self.good = DateTime::UNIX_EPOCH;
    }

    /// Run the forward pass over a record, returning the time of the peak
    /// filtered amplitude and its intensity.
    pub fn intensity(&mut self, first: DateTime<Utc>, samples: &[i32]) -> (DateTime<Utc>, i32) {
        let mut max = 0.0f64;

        let mut at = first;
        for (i, &s) in samples.iter().enumerate() {
            let f = self.filter.sample(f64::from(s)).abs();
            if f > max {
                max = f;
                at = first + self.interval(i as f64);
            }
        }

        (at, intensity(max))
    }

    pub fn message(&self, at: DateTime<Utc>, mmi: i32) -> Message {
        Message {
            source: self.source(),
            quality: "measured".to_string(),
            latitude: self.latitude as f32,
            longitude: self.longitude as f32,
            time: at,
            mmi,
            comment: self.key(),
        }
    }

    /// Decide whether a candidate intensity should be published: suppress
    /// unchanged values inside the heartbeat interval `d` (0 disables
    /// heartbeats entirely), commit the new state, update the noise
    /// bookkeeping, and suppress jailed streams.
    pub fn flush(&mut self, d: Duration, mmi: i32) -> bool {
        // same intensity?
        if self.mmi == mmi {
            if d.is_zero() {
                return false;
            }
            // too soon?
            if Utc::now() - self.update < d {
                return false;
            }
        }

        // keep state
        self.update = Utc::now();
        self.mmi = mmi;

        let last = self.last.unwrap_or(DateTime::UNIX_EPOCH);

        // a noisy stream
        if self.mmi > self.level {
            // should be jailed ...
            if last - self.good > self.probation {
                self.jailed = true;
            }
            self.bad = last;
        } else {
            if last - self.bad > self.probation {
                self.jailed = false;
            }
            self.good = last;
        }

        // skip as noisy
        !self.jailed
    }
}
