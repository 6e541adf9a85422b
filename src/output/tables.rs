//! CSV table writers (spec.md §6 Outputs), grounded in `transit_gtfs.py`'s
//! `_outHeader`/`dumpBusRoutes`/`dumpBusRouteLinks`/`dumpBusStops` and
//! `avl_distances.py`'s `dumpAVLDistances`. Each table is preceded by a
//! four-line metadata banner; the banner's free-form text lines are
//! written with `writeln!` the way the original emits them with bare
//! `print`, while the data rows go through the `csv` crate.

use std::io::Write;

use chrono::Local;
use serde::Serialize;

use crate::error::Error;

fn write_banner<W: Write>(table_name: &str, user: &str, network: &str, out: &mut W) -> Result<(), Error> {
    writeln!(out, "User,{user}")?;
    writeln!(out, "Network,{network}")?;
    writeln!(out, "Table,{table_name}")?;
    writeln!(out, "{}", Local::now().format("%a %b %d %H:%M:%S %Y"))?;
    writeln!(out)?;
    Ok(())
}

fn csv_writer<W: Write>(out: W) -> csv::Writer<W> {
    csv::WriterBuilder::new().from_writer(out)
}

/// `public.bus_route.csv`: one row per trip, treated as its own route.
#[derive(Debug, Clone, Serialize)]
pub struct RouteRow {
    pub id: i64,
    pub name: String,
}

/// Builds a `bus_route.csv` name from `dumpBusRoutes`'s concatenation:
/// `short_name + ": " + long_name + " " + trip_headsign`, each segment
/// omitted when empty.
pub fn route_display_name(short_name: &str, long_name: &str, trip_headsign: &str) -> String {
    let mut name = short_name.to_string();
    if !long_name.is_empty() {
        name.push_str(": ");
        name.push_str(long_name);
    }
    if !trip_headsign.is_empty() {
        name.push(' ');
        name.push_str(trip_headsign);
    }
    name
}

pub fn write_bus_routes<W: Write>(rows: &[RouteRow], user: &str, network: &str, mut out: W) -> Result<(), Error> {
    write_banner("public.bus_route", user, network, &mut out)?;
    let mut writer = csv_writer(out);
    writer.write_record(["id", "name"])?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// `public.bus_route_link.csv`: one row per link in a trip's matched path.
/// `stop`/`dwelltime` are populated only on the row where that link
/// carries a stop.
#[derive(Debug, Clone, Serialize)]
pub struct RouteLinkRow {
    pub route: i64,
    pub sequence: i64,
    pub link: i64,
    pub stop: Option<i64>,
    pub dwelltime: Option<i64>,
}

pub fn write_bus_route_links<W: Write>(
    rows: &[RouteLinkRow],
    user: &str,
    network: &str,
    mut out: W,
) -> Result<(), Error> {
    write_banner("public.bus_route_link", user, network, &mut out)?;
    let mut writer = csv_writer(out);
    writer.write_record(["route", "sequence", "link", "stop", "dwelltime"])?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// `public.bus_stop.csv`: stops that survived into the route-link output,
/// located by along-link distance from the link's origin node.
#[derive(Debug, Clone, Serialize)]
pub struct StopRow {
    pub id: i64,
    pub link: i64,
    pub name: String,
    pub location: i64,
}

pub fn write_bus_stops<W: Write>(rows: &[StopRow], user: &str, network: &str, mut out: W) -> Result<(), Error> {
    write_banner("public.bus_stop", user, network, &mut out)?;
    let mut writer = csv_writer(out);
    writer.write_record(["id", "link", "name", "location"])?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// `public.bus_frequency.csv`: one row per trip whose first in-topology
/// stop gives `offsettime` relative to the widened reference start time.
#[derive(Debug, Clone, Serialize)]
pub struct FrequencyRow {
    pub route: i64,
    pub period: i64,
    pub frequency: i64,
    pub offsettime: i64,
    pub preemption: i64,
}

pub fn write_bus_frequency<W: Write>(
    rows: &[FrequencyRow],
    user: &str,
    network: &str,
    mut out: W,
) -> Result<(), Error> {
    write_banner("public.bus_frequency", user, network, &mut out)?;
    let mut writer = csv_writer(out);
    writer.write_record(["route", "period", "frequency", "offsettime", "preemption"])?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// `public.bus_period.csv`: a single period spanning `[0, end_time_secs]`,
/// relative to the reference time.
pub fn write_bus_period<W: Write>(
    end_time_secs: i64,
    user: &str,
    network: &str,
    mut out: W,
) -> Result<(), Error> {
    write_banner("public.bus_period", user, network, &mut out)?;
    let mut writer = csv_writer(out);
    writer.write_record(["id", "starttime", "endtime"])?;
    writer.write_record([1.to_string(), 0.to_string(), end_time_secs.to_string()])?;
    writer.flush()?;
    Ok(())
}

/// AVL distance dump, plain trace shape (`avl_distances.py::dumpAVLDistances`,
/// `stopsFlag=False`): `tripID,distance,timestamp,speed`.
#[derive(Debug, Clone, Serialize)]
pub struct AvlDistanceRow {
    pub trip_id: String,
    pub distance: f64,
    pub timestamp: String,
    pub speed: f64,
}

/// AVL distance dump, GTFS-stops shape (`-s` / `stopsFlag=True`):
/// `tripID,stopID,stopSeq,distance,arrival,departure,name`.
#[derive(Debug, Clone, Serialize)]
pub struct AvlStopDistanceRow {
    pub trip_id: String,
    pub stop_id: i64,
    pub stop_seq: i32,
    pub distance: f64,
    pub arrival: String,
    pub departure: String,
    pub name: String,
}

pub fn write_avl_distances<W: Write>(rows: &[AvlDistanceRow], mut out: W) -> Result<(), Error> {
    let mut writer = csv::Writer::from_writer(&mut out);
    writer.write_record(["tripID", "distance", "timestamp", "speed"])?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_avl_stop_distances<W: Write>(rows: &[AvlStopDistanceRow], mut out: W) -> Result<(), Error> {
    let mut writer = csv::Writer::from_writer(&mut out);
    writer.write_record(["tripID", "stopID", "stopSeq", "distance", "arrival", "departure", "name"])?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_name_omits_empty_segments() {
        assert_eq!(route_display_name("10", "", ""), "10");
        assert_eq!(route_display_name("10", "Downtown Loop", ""), "10: Downtown Loop");
        assert_eq!(route_display_name("10", "Downtown Loop", "Eastbound"), "10: Downtown Loop Eastbound");
        assert_eq!(route_display_name("10", "", "Eastbound"), "10 Eastbound");
    }

    #[test]
    fn bus_route_csv_carries_banner_and_rows() {
        let rows = vec![RouteRow { id: 1, name: "10: Downtown".to_string() }];
        let mut buf = Vec::new();
        write_bus_routes(&rows, "nmc", "austin", &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("User,nmc\nNetwork,austin\nTable,public.bus_route\n"));
        assert!(text.contains("id,name"));
        assert!(text.contains("1,10: Downtown"));
    }

    #[test]
    fn route_link_row_leaves_stop_columns_empty_when_no_stop() {
        let rows = vec![RouteLinkRow { route: 1, sequence: 0, link: 42, stop: None, dwelltime: None }];
        let mut buf = Vec::new();
        write_bus_route_links(&rows, "nmc", "austin", &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("1,0,42,,"));
    }

    #[test]
    fn avl_distance_rows_have_no_banner() {
        let rows = vec![AvlDistanceRow {
            trip_id: "T1".to_string(),
            distance: 12.5,
            timestamp: "20240101T08:00:00".to_string(),
            speed: 30.0,
        }];
        let mut buf = Vec::new();
        write_avl_distances(&rows, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("tripID,distance,timestamp,speed\n"));
    }
}
