//! The channel catalog: a stream map loaded from an FDSN station service and
//! reconciled against the live feed.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::filter::Filter;
use crate::metrics::Metrics;
use crate::parser::Record;
use crate::stream::{Message, Stream};

/// Filter quality factor for each supported sample rate. Channels at any
/// other rate are rejected during load.
fn quality(rate: f64) -> Option<f64> {
    match rate as i64 {
        200 => Some(0.98829),
        100 => Some(0.97671),
        50 => Some(0.95395),
        _ => None,
    }
}

/// FDSN query timestamps carry no zone suffix and no fractional seconds.
const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("fdsn request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("bad {field} in catalog record: {source}")]
    BadField {
        field: &'static str,
        source: std::num::ParseFloatError,
    },
}

fn numeric(field: &'static str, value: &str) -> Result<f64, CatalogError> {
    value
        .trim()
        .parse()
        .map_err(|source| CatalogError::BadField { field, source })
}

pub struct Catalog {
    map: HashMap<String, Stream>,
    level: i32,
    probation: Duration,
    metrics: Arc<Metrics>,
}

impl Catalog {
    pub fn new(level: i32, probation: Duration, metrics: Arc<Metrics>) -> Self {
        Self {
            map: HashMap::new(),
            level,
            probation,
            metrics,
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn find(&self, key: &str) -> Option<&Stream> {
        self.map.get(key)
    }

    /// Fetch the channel-level station catalog current at `whence` and merge
    /// it into the map.
    pub async fn load(&mut self, fdsn: &str, whence: DateTime<Utc>) -> Result<usize, CatalogError> {
        let stamp = whence.format(TIME_FORMAT).to_string();
        let url = format!("http://{}/fdsnws/station/1/query", fdsn);
        self.metrics.set_fdsn_url(&url);

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        let body = client
            .get(&url)
            .query(&[
                ("level", "channel"),
                ("format", "text"),
                ("endafter", stamp.as_str()),
                ("startbefore", stamp.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        self.merge(&body)
    }

    /// Merge one catalog body: pipe-delimited channel records, `#` comments
    /// skipped. Unsupported rates and units are dropped; a stream equal to
    /// the one already installed is retained (keeping its filter state), any
    /// difference replaces it. Malformed numeric fields abort the merge,
    /// keeping the progress already made.
    pub fn merge(&mut self, body: &str) -> Result<usize, CatalogError> {
        let mut count = 0;
        let result = self.merge_records(body, &mut count);
        self.metrics
            .set_stream_counts(count as i64, self.map.len() as i64);
        result.map(|()| count)
    }

    fn merge_records(&mut self, body: &str, count: &mut usize) -> Result<(), CatalogError> {
        for line in body.lines() {
            if line.starts_with('#') {
                continue;
            }
            let parts: Vec<&str> = line.split('|').collect();
            if parts.len() < 17 {
                continue;
            }

            let latitude = numeric("latitude", parts[4])?;
            let longitude = numeric("longitude", parts[5])?;
            let gain = numeric("gain", parts[11])?;
            let rate = numeric("rate", parts[14])?;

            let Some(q) = quality(rate) else {
                continue;
            };

            let units = parts[13];
            let filter = match units {
                "M/S**2" => Filter::acceleration(gain, 1.0 / rate, q),
                "M/S" => Filter::velocity(gain, q),
                _ => continue,
            };

            let stream = Stream {
                network: parts[0].to_string(),
                station: parts[1].to_string(),
                location: parts[2].to_string(),
                channel: parts[3].to_string(),
                latitude,
                longitude,
                rate,
                units: units.to_string(),
                gain,
                filter,
                mmi: 0,
                update: DateTime::UNIX_EPOCH,
                level: self.level,
                probation: self.probation,
                good: DateTime::UNIX_EPOCH,
                bad: DateTime::UNIX_EPOCH,
                jailed: false,
                last: None,
            };

            let key = stream.key();
            match self.map.get(&key) {
                // unchanged channels keep their filter and noise state
                Some(existing) if existing.equal(&stream) => {}
                _ => {
                    self.map.insert(key, stream);
                }
            }
            *count += 1;
        }

        Ok(())
    }

    /// Route a decoded record to its stream: gap-check, filter, estimate
    /// intensity, and apply the publish decision. Records for unknown
    /// streams or with a non-positive rate are dropped silently.
    pub fn process(&mut self, record: &Record, heartbeat: Duration) -> Option<Message> {
        if record.rate <= 0.0 {
            return None;
        }

        let stream = self.map.get_mut(&record.key())?;
        self.metrics.packets.add(1);

        if stream.gap(record.start, record.rate) {
            stream.reset(&record.samples);
        }
        stream.last = Some(record.end);

        let (at, mmi) = stream.intensity(record.start, &record.samples);
        self.metrics.estimation(mmi);

        let message = stream.message(at, mmi);
        if stream.flush(heartbeat, mmi) {
            Some(message)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHANNEL: &str = "NZ|WEL|10|HHZ|-41.28|174.77|138.0|0.0|0.0|-90.0|Sensor|1.0e9|1.0|M/S|100.0|2004-01-01T00:00:00|";

    fn catalog() -> Catalog {
        Catalog::new(2, Duration::minutes(10), Arc::new(Metrics::new()))
    }

    #[test]
    fn merge_accepts_channel_records() {
        let mut c = catalog();
        let body = format!("#Network|Station|Location|Channel|...\n{}\n", CHANNEL);
        assert_eq!(c.merge(&body).unwrap(), 1);
        let s = c.find("NZ_WEL_10_HHZ").expect("stream installed");
        assert_eq!(s.rate, 100.0);
        assert_eq!(s.gain, 1.0e9);
        assert_eq!(s.units, "M/S");
        assert!(s.last.is_none());
    }

    #[test]
    fn merge_rejects_unsupported_rate() {
        let mut c = catalog();
        let body = CHANNEL.replace("|100.0|", "|80.0|");
        assert_eq!(c.merge(&body).unwrap(), 0);
        assert!(c.is_empty());
    }

    #[test]
    fn merge_rejects_unknown_units() {
        let mut c = catalog();
        let body = CHANNEL.replace("|M/S|", "|COUNTS|");
        assert_eq!(c.merge(&body).unwrap(), 0);
        assert!(c.is_empty());
    }

    #[test]
    fn merge_rejects_short_records() {
        let mut c = catalog();
        assert_eq!(c.merge("NZ|WEL|10|HHZ|-41.28\n").unwrap(), 0);
        assert!(c.is_empty());
    }

    #[test]
    fn merge_aborts_on_malformed_numbers_keeping_progress() {
        let mut c = catalog();
        let body = format!("{}\n{}\n", CHANNEL, CHANNEL.replace("-41.28", "south"));
        let err = c.merge(&body).unwrap_err();
        assert!(matches!(err, CatalogError::BadField { field: "latitude", .. }));
        // the first record survived
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn reload_same_bytes_preserves_streams() {
        let mut c = catalog();
        c.merge(CHANNEL).unwrap();

        // give the stream some history, then reload identical bytes
        let record = Record {
            network: "NZ".to_string(),
            station: "WEL".to_string(),
            location: "10".to_string(),
            channel: "HHZ".to_string(),
            start: Utc::now(),
            end: Utc::now(),
            rate: 100.0,
            samples: vec![7; 100],
        };
        c.process(&record, Duration::zero());
        assert!(c.find("NZ_WEL_10_HHZ").unwrap().last.is_some());

        c.merge(CHANNEL).unwrap();
        assert!(
            c.find("NZ_WEL_10_HHZ").unwrap().last.is_some(),
            "reload of identical bytes must not reset the stream"
        );
    }

    #[test]
    fn reload_with_new_calibration_replaces_stream() {
        let mut c = catalog();
        c.merge(CHANNEL).unwrap();

        let record = Record {
            network: "NZ".to_string(),
            station: "WEL".to_string(),
            location: "10".to_string(),
            channel: "HHZ".to_string(),
            start: Utc::now(),
            end: Utc::now(),
            rate: 100.0,
            samples: vec![7; 100],
        };
        c.process(&record, Duration::zero());

        let body = CHANNEL.replace("1.0e9", "2.0e9");
        c.merge(&body).unwrap();
        let s = c.find("NZ_WEL_10_HHZ").unwrap();
        assert_eq!(s.gain, 2.0e9);
        assert!(s.last.is_none(), "replacement must be a fresh stream");
    }

    #[test]
    fn process_drops_unknown_streams_and_bad_rates() {
        let mut c = catalog();
        c.merge(CHANNEL).unwrap();

        let mut record = Record {
            network: "NZ".to_string(),
            station: "ABCD".to_string(),
            location: "10".to_string(),
            channel: "HHZ".to_string(),
            start: Utc::now(),
            end: Utc::now(),
            rate: 100.0,
            samples: vec![0; 100],
        };
        assert!(c.process(&record, Duration::zero()).is_none());

        record.station = "WEL".to_string();
        record.rate = 0.0;
        assert!(c.process(&record, Duration::zero()).is_none());
    }
}
