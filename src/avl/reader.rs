//! AVL point-stream CSV reader, grounded in `avl_distances.py::readAVLCSV`:
//! fabricates a synthetic stop-time row per AVL ping so the same map-match
//! pipeline that handles GTFS stops can walk an AVL trace.
//!
//! Two latent bugs in the original are deliberately not reproduced here
//! (spec.md §9 Open Questions): `prevRouteID`/`prevRouteHeadsign` are each
//! assigned from their own column rather than swapped, and the emitted
//! speed column carries the parsed `speed` value rather than a stop name.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use chrono::NaiveDateTime;
use serde::Deserialize;

use crate::avl::error::Error;

#[derive(Debug, Deserialize)]
struct AvlRow {
    #[allow(dead_code)]
    vehicle_id: String,
    #[allow(dead_code)]
    dist_traveled: f64,
    speed: f64,
    lon: f64,
    route_id: String,
    trip_headsign: String,
    timestamp: String,
    lat: f64,
    trip_id: String,
}

/// One fabricated "stop" along an AVL trace, standing in for
/// `gtfs.StopTimesEntry` in the original.
#[derive(Debug, Clone, Copy)]
pub struct AvlPoint {
    pub seq: i32,
    pub lat: f64,
    pub lon: f64,
    pub speed: f64,
    pub timestamp: NaiveDateTime,
}

const EXPECTED_HEADERS: &[&str] = &[
    "vehicle_id",
    "dist_traveled",
    "speed",
    "lon",
    "route_id",
    "trip_headsign",
    "timestamp",
    "lat",
    "trip_id",
];

/// `readAVLCSV(avlCSVFile, gtfsTrips, gps, routeID, routeHeadsign)`.
/// Filters to `route_id`/`route_headsign` when given, resets the
/// per-trip sequence counter whenever `trip_id` changes, and drops
/// points with a non-increasing timestamp or a `trip_id` re-entered
/// after switching away from it.
pub fn read_avl_csv<P: AsRef<Path>>(
    path: P,
    known_trip_ids: &HashSet<String>,
    route_id: Option<&str>,
    route_headsign: Option<&str>,
) -> Result<HashMap<String, Vec<AvlPoint>>, Error> {
    let mut reader = csv::ReaderBuilder::new().from_path(path)?;

    let headers: HashSet<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
    if !EXPECTED_HEADERS.iter().all(|h| headers.contains(*h)) {
        return Err(Error::MissingHeader);
    }

    let mut ret: HashMap<String, Vec<AvlPoint>> = HashMap::new();
    let mut prev_route_id: Option<String> = None;
    let mut prev_headsign: Option<String> = None;
    let mut prev_trip_id: Option<String> = None;
    let mut prev_time: Option<NaiveDateTime> = None;
    let mut previous_trip_ids: HashSet<String> = HashSet::new();
    let mut duplicate_msg_flag = false;
    let mut ctr = 0i32;

    for result in reader.deserialize() {
        let row: AvlRow = result?;

        if route_id.is_some_and(|r| r != row.route_id) || route_headsign.is_some_and(|h| h != row.trip_headsign) {
            continue;
        }

        let route_changed = prev_route_id.as_deref().is_some_and(|r| r != row.route_id);
        let headsign_changed = prev_headsign.as_deref().is_some_and(|h| h != row.trip_headsign);
        if route_changed || headsign_changed {
            if !duplicate_msg_flag {
                log::warn!(
                    "ambiguous route/headsign in AVL CSV at route {}, headsign {}",
                    row.route_id,
                    row.trip_headsign
                );
                duplicate_msg_flag = true;
            }
            continue;
        }
        prev_route_id = Some(row.route_id.clone());
        prev_headsign = Some(row.trip_headsign.clone());

        if prev_trip_id.as_deref() != Some(row.trip_id.as_str()) {
            if previous_trip_ids.contains(&row.trip_id) {
                log::warn!("trip {} cannot be continued after going to another trip", row.trip_id);
                continue;
            }
            previous_trip_ids.insert(row.trip_id.clone());
            prev_trip_id = Some(row.trip_id.clone());
            ctr = 0;
            prev_time = None;
        }

        let cleaned = row.timestamp.replace('-', "");
        let timestamp = NaiveDateTime::parse_from_str(&cleaned, "%Y%m%dT%H:%M:%S")
            .map_err(|_| Error::BadTimestamp(row.timestamp.clone()))?;
        if let Some(prev) = prev_time {
            if timestamp < prev {
                log::warn!("non-increasing timestamp in AVL CSV for trip {}; ignoring", row.trip_id);
                continue;
            }
        }
        prev_time = Some(timestamp);

        if !known_trip_ids.contains(&row.trip_id) {
            log::warn!("trip {} from the AVL CSV file is not found in the GTFS set", row.trip_id);
            continue;
        }

        ret.entry(row.trip_id.clone()).or_default().push(AvlPoint {
            seq: ctr,
            lat: row.lat,
            lon: row.lon,
            speed: row.speed,
            timestamp,
        });
        ctr += 1;
    }

    Ok(ret)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_fixture(rows: &str) -> tempfile_path::TempCsv {
        tempfile_path::TempCsv::new(rows)
    }

    mod tempfile_path {
        use std::fs::File;
        use std::io::Write;
        use std::path::PathBuf;
        use std::sync::atomic::{AtomicUsize, Ordering};

        static COUNTER: AtomicUsize = AtomicUsize::new(0);

        pub struct TempCsv {
            pub path: PathBuf,
        }

        impl TempCsv {
            pub fn new(contents: &str) -> Self {
                let n = COUNTER.fetch_add(1, Ordering::Relaxed);
                let path = std::env::temp_dir().join(format!("avl_test_{}_{}.csv", std::process::id(), n));
                let mut f = File::create(&path).unwrap();
                f.write_all(contents.as_bytes()).unwrap();
                TempCsv { path }
            }
        }

        impl Drop for TempCsv {
            fn drop(&mut self) {
                let _ = std::fs::remove_file(&self.path);
            }
        }
    }

    #[test]
    fn reads_points_for_known_trip() {
        let csv = "vehicle_id,dist_traveled,speed,lon,route_id,trip_headsign,timestamp,lat,trip_id\n\
                   1,0,12.5,-97.74,10,Downtown,2024-01-01T08:00:00,30.27,TRIP1\n\
                   1,10,13.0,-97.75,10,Downtown,2024-01-01T08:01:00,30.28,TRIP1\n";
        let fixture = write_fixture(csv);
        let mut known = HashSet::new();
        known.insert("TRIP1".to_string());

        let result = read_avl_csv(&fixture.path, &known, None, None).unwrap();
        let points = &result["TRIP1"];
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].seq, 0);
        assert_eq!(points[1].seq, 1);
        assert!((points[1].speed - 13.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_trip_is_skipped() {
        let csv = "vehicle_id,dist_traveled,speed,lon,route_id,trip_headsign,timestamp,lat,trip_id\n\
                   1,0,12.5,-97.74,10,Downtown,2024-01-01T08:00:00,30.27,UNKNOWN\n";
        let fixture = write_fixture(csv);
        let known = HashSet::new();

        let result = read_avl_csv(&fixture.path, &known, None, None).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn missing_header_is_rejected() {
        let csv = "vehicle_id,speed\n1,10\n";
        let fixture = write_fixture(csv);
        let known = HashSet::new();
        assert!(matches!(read_avl_csv(&fixture.path, &known, None, None), Err(Error::MissingHeader)));
    }
}
