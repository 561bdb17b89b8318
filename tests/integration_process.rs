//! End-to-end processing scenarios driven through the catalog with synthetic
//! records: heartbeat suppression, change-driven publishing, jailing, and gap
//! recovery.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use shakefeed::catalog::Catalog;
use shakefeed::metrics::Metrics;
use shakefeed::parser::Record;

const HEARTBEAT: i64 = 60;

fn channel_line(network: &str, station: &str, units: &str, gain: f64, rate: f64) -> String {
    format!(
        "{}|{}|10|HHZ|-41.28|174.77|138.0|0.0|0.0|-90.0|Seismometer|{}|1.0|{}|{}|2004-01-01T00:00:00|",
        network, station, gain, units, rate
    )
}

fn catalog(level: i32, probation_secs: i64, body: &str) -> Catalog {
    let mut c = Catalog::new(
        level,
        Duration::seconds(probation_secs),
        Arc::new(Metrics::new()),
    );
    c.merge(body).unwrap();
    c
}

fn t0() -> DateTime<Utc> {
    Utc.timestamp_opt(1_704_067_200, 0).unwrap()
}

fn record(station: &str, start: DateTime<Utc>, samples: Vec<i32>) -> Record {
    let end = start + Duration::nanoseconds((1e9 * (samples.len() as f64 - 1.0) / 100.0) as i64);
    Record {
        network: "NZ".to_string(),
        station: station.to_string(),
        location: "10".to_string(),
        channel: "HHZ".to_string(),
        start,
        end,
        rate: 100.0,
        samples,
    }
}

/// One second of silence.
fn quiet() -> Vec<i32> {
    vec![0; 100]
}

/// One second with a single spike; with gain 1e6 the filtered peak is close
/// to spike * 0.977e-6 M/S.
fn spike(amplitude: i32) -> Vec<i32> {
    let mut samples = vec![0; 100];
    samples[50] = amplitude;
    samples
}

#[test]
fn quiet_record_passes_through() {
    let body = channel_line("NZ", "ABCD", "M/S", 1e9, 100.0);
    let mut c = catalog(2, 600, &body);

    let message = c
        .process(&record("ABCD", t0(), quiet()), Duration::seconds(HEARTBEAT))
        .expect("first record publishes");

    assert_eq!(message.source, "NZ.ABCD");
    assert_eq!(message.quality, "measured");
    assert_eq!(message.mmi, 0);
    assert_eq!(message.time, t0());
    assert_eq!(message.comment, "NZ_ABCD_10_HHZ");
}

#[test]
fn unchanged_intensity_is_suppressed_within_heartbeat() {
    let body = channel_line("NZ", "ABCD", "M/S", 1e9, 100.0);
    let mut c = catalog(2, 600, &body);
    let d = Duration::seconds(HEARTBEAT);

    assert!(c.process(&record("ABCD", t0(), quiet()), d).is_some());
    assert!(c
        .process(&record("ABCD", t0() + Duration::seconds(1), quiet()), d)
        .is_none());
    assert!(c
        .process(&record("ABCD", t0() + Duration::seconds(2), quiet()), d)
        .is_none());
}

#[test]
fn changed_intensity_publishes_immediately() {
    let body = channel_line("NZ", "ABCD", "M/S", 1e6, 100.0);
    let mut c = catalog(2, 600, &body);
    let d = Duration::seconds(HEARTBEAT);

    // a small excursion, quiet by the noise threshold
    let first = c
        .process(&record("ABCD", t0(), spike(50)), d)
        .expect("first record publishes");
    assert_eq!(first.mmi, 1);
    assert!(!c.find("NZ_ABCD_10_HHZ").unwrap().jailed);

    // one second later the intensity changes, well inside the heartbeat
    let second = c
        .process(&record("ABCD", t0() + Duration::seconds(1), spike(30_000)), d)
        .expect("changed intensity publishes");
    assert_eq!(second.mmi, 4);
    assert!(!c.find("NZ_ABCD_10_HHZ").unwrap().jailed);
}

#[test]
fn noisy_stream_from_a_gap_is_jailed() {
    let body = channel_line("NZ", "ABCD", "M/S", 1e6, 100.0);
    let mut c = catalog(2, 10, &body);
    let d = Duration::seconds(HEARTBEAT);

    // first record arrives after a gap, so good is epoch zero and the very
    // first noisy flush jails the stream before anything is emitted
    assert!(c.process(&record("ABCD", t0(), spike(60_000)), d).is_none());
    let s = c.find("NZ_ABCD_10_HHZ").unwrap();
    assert!(s.jailed);
    assert!(s.mmi >= 5);

    // fifteen seconds of continuous noise stay suppressed
    for i in 1..15 {
        let r = record("ABCD", t0() + Duration::seconds(i), spike(60_000));
        assert!(c.process(&r, d).is_none(), "record {} leaked from jail", i);
    }
    assert!(c.find("NZ_ABCD_10_HHZ").unwrap().jailed);
}

#[test]
fn jailed_stream_recovers_after_probation_of_quiet() {
    let body = channel_line("NZ", "ABCD", "M/S", 1e6, 100.0);
    let mut c = catalog(2, 10, &body);
    // zero heartbeat: only changes publish, so alternate spike sizes to keep
    // the flush path live
    let d = Duration::zero();

    assert!(c.process(&record("ABCD", t0(), spike(60_000)), d).is_none());
    assert!(c.find("NZ_ABCD_10_HHZ").unwrap().jailed);

    // quiet records, alternating between two intensities below the noise
    // level so the flush path stays live; release comes once last - bad
    // exceeds probation
    let mut published = Vec::new();
    for i in 1..=15 {
        let samples = if i % 2 == 0 { spike(300) } else { spike(50) };
        let r = record("ABCD", t0() + Duration::seconds(i), samples);
        if let Some(m) = c.process(&r, d) {
            published.push((i, m.mmi));
        }
    }

    assert!(!c.find("NZ_ABCD_10_HHZ").unwrap().jailed);
    let first = published.first().expect("stream recovered");
    assert!(first.0 > 10, "released before probation lapsed: {:?}", first);
}

#[test]
fn gap_resets_noise_bookkeeping() {
    let body = channel_line("NZ", "ABCD", "M/S", 1e6, 100.0);
    let mut c = catalog(2, 600, &body);
    let d = Duration::seconds(HEARTBEAT);

    // a noisy record stamps bad
    assert!(c.process(&record("ABCD", t0(), spike(60_000)), d).is_none());
    let s = c.find("NZ_ABCD_10_HHZ").unwrap();
    assert_ne!(s.bad, DateTime::UNIX_EPOCH);
    let last = s.last.expect("record processed");

    // ten sample intervals of silence is a gap
    let first2 = last + Duration::milliseconds(100);
    assert!(s.gap(first2, 100.0));

    let quiet2 = c
        .process(&record("ABCD", first2, quiet()), d)
        .expect("recovered stream publishes");
    assert_eq!(quiet2.mmi, 0);

    let s = c.find("NZ_ABCD_10_HHZ").unwrap();
    // the reset zeroed bad; the quiet flush then stamped good with the new
    // record's end time
    assert_eq!(s.bad, DateTime::UNIX_EPOCH);
    assert_eq!(s.good, s.last.unwrap());
    assert!(!s.jailed);
}
