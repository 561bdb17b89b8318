//! miniSEED record decoding.

use chrono::{DateTime, Duration, TimeZone, Utc};
use mseed::{MSControlFlags, MSError, MSRecord};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("miniSEED unpack failed: {0}")]
    Unpack(String),
    #[error("no integer data samples in record")]
    NoSamples,
}

/// One decoded miniSEED record: identity, timing, and the raw sample vector.
#[derive(Debug, Clone)]
pub struct Record {
    pub network: String,
    pub station: String,
    pub location: String,
    pub channel: String,
    /// Time of the first sample.
    pub start: DateTime<Utc>,
    /// Time of the last sample.
    pub end: DateTime<Utc>,
    /// Sample rate in samples/second.
    pub rate: f64,
    pub samples: Vec<i32>,
}

impl Record {
    /// Catalog lookup key, `network_station_location_channel`.
    pub fn key(&self) -> String {
        [
            self.network.as_str(),
            self.station.as_str(),
            self.location.as_str(),
            self.channel.as_str(),
        ]
        .join("_")
    }
}

fn unpack(e: MSError) -> DecodeError {
    DecodeError::Unpack(e.to_string())
}

/// Decode a single 512-byte miniSEED block.
pub fn decode(data: &[u8]) -> Result<Record, DecodeError> {
    let mut buffer = data.to_vec();
    let mut record = MSRecord::parse(&mut buffer, MSControlFlags::MSF_UNPACKDATA).map_err(unpack)?;
    record.unpack_data().map_err(unpack)?;

    let samples: Vec<i32> = record
        .data_samples::<i32>()
        .map(|s| s.to_vec())
        .ok_or(DecodeError::NoSamples)?;

    let network = record.network().map_err(unpack)?.trim().to_string();
    let station = record.station().map_err(unpack)?.trim().to_string();
    let location = record.location().map_err(unpack)?.trim().to_string();
    let channel = record.channel().map_err(unpack)?.trim().to_string();

    let odt = record.start_time().map_err(unpack)?;
    let start = Utc.timestamp_nanos(odt.unix_timestamp_nanos() as i64);
    let rate = record.sample_rate_hz();

    Ok(Record {
        network,
        station,
        location,
        channel,
        start,
        end: end_time(start, rate, samples.len()),
        rate,
        samples,
    })
}

/// Time of the last sample in a record.
fn end_time(start: DateTime<Utc>, rate: f64, count: usize) -> DateTime<Utc> {
    if rate > 0.0 && count > 1 {
        start + Duration::nanoseconds((1e9 * (count as f64 - 1.0) / rate) as i64)
    } else {
        start
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_key_joins_with_underscores() {
        let r = Record {
            network: "NZ".to_string(),
            station: "WEL".to_string(),
            location: "10".to_string(),
            channel: "HHZ".to_string(),
            start: DateTime::UNIX_EPOCH,
            end: DateTime::UNIX_EPOCH,
            rate: 100.0,
            samples: Vec::new(),
        };
        assert_eq!(r.key(), "NZ_WEL_10_HHZ");
    }

    #[test]
    fn blank_location_keeps_its_place() {
        let r = Record {
            network: "NZ".to_string(),
            station: "WEL".to_string(),
            location: String::new(),
            channel: "HHZ".to_string(),
            start: DateTime::UNIX_EPOCH,
            end: DateTime::UNIX_EPOCH,
            rate: 100.0,
            samples: Vec::new(),
        };
        assert_eq!(r.key(), "NZ_WEL__HHZ");
    }

    #[test]
    fn end_time_covers_the_record() {
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let end = end_time(start, 100.0, 100);
        assert_eq!(end, start + Duration::milliseconds(990));
        // degenerate records fall back to the start time
        assert_eq!(end_time(start, 0.0, 100), start);
        assert_eq!(end_time(start, 100.0, 0), start);
    }
}
