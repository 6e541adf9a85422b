//! AVL front end: restores a prior shape-to-network path match, matches
//! either a raw AVL trace or a trip's own stop times against each trip's
//! subnet, and dumps per-position distance/speed. Mirrors
//! `avl_distances.py`'s `main`/`dumpAVLDistances`.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::BufReader;

use chrono::NaiveDateTime;
use clap::Parser;
use mapmatch::avl::read_avl_csv;
use mapmatch::config;
use mapmatch::db;
use mapmatch::graph::GraphAccess;
use mapmatch::gtfs::GtfsData;
use mapmatch::match_engine::{build_subset, longest_contiguous_run, prepare_map_stops, PathEnd, PathEngine, StopPosition};
use mapmatch::output::{self, AvlDistanceRow, AvlStopDistanceRow};
use mapmatch::Error;

#[derive(Parser, Debug)]
#[command(
    name = "mapmatch-avl",
    about = "Match an AVL trace, or a trip's own stops, onto a road network",
    disable_help_flag = true
)]
struct Cli {
    db_server: String,
    network: String,
    user: String,
    #[arg(help = "accepted for command-line compatibility; unused by the sqlite loader")]
    password: String,
    shape_path: String,
    path_match_file: String,

    #[arg(short = 'a', help = "AVL CSV file")]
    avl_csv: Option<String>,
    #[arg(short = 'r', help = "restrict to this route id")]
    route_id: Option<String>,
    #[arg(short = 'h', help = "restrict to this trip headsign")]
    headsign: Option<String>,
    #[arg(short = 's', help = "output distances for GTFS stops instead of AVL points")]
    stops_flag: bool,
    #[arg(short = 'p')]
    problem_report: bool,
}

fn parse_gtfs_time(s: &str) -> Option<i64> {
    let mut parts = s.trim().splitn(3, ':');
    let h: i64 = parts.next()?.parse().ok()?;
    let m: i64 = parts.next()?.parse().ok()?;
    let sec: i64 = parts.next()?.parse().ok()?;
    Some(h * 3600 + m * 60 + sec)
}

fn format_hms(secs: i64) -> String {
    let secs = secs.rem_euclid(24 * 3600);
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

#[derive(Default)]
struct IdAllocator {
    next: i64,
    map: HashMap<String, i64>,
}

impl IdAllocator {
    fn id_for(&mut self, key: &str) -> i64 {
        if let Some(&id) = self.map.get(key) {
            return id;
        }
        let id = self.next;
        self.next += 1;
        self.map.insert(key.to_string(), id);
        id
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if cli.avl_csv.is_none() {
        eprintln!("ERROR: No AVL CSV file is specified. You must use the -a parameter.");
        std::process::exit(1);
    }

    if let Err(err) = run(&cli) {
        eprintln!("ERROR: {err}");
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<(), Error> {
    log::info!("Read road network...");
    let road_graph = db::road_network::load(&cli.db_server)?;

    log::info!("Read GTFS feed...");
    let gtfs = GtfsData::from_path(&cli.shape_path)?;

    log::info!("Read the path-match file '{}'...", cli.path_match_file);
    let path_match: HashMap<String, Vec<PathEnd>> =
        bincode::deserialize_from(BufReader::new(File::open(&cli.path_match_file)?))?;

    let known_trip_ids: HashSet<String> = gtfs.trips.keys().cloned().collect();

    let avl_points = if !cli.stops_flag {
        let avl_file = cli.avl_csv.as_ref().expect("checked in main");
        Some(read_avl_csv(avl_file, &known_trip_ids, cli.route_id.as_deref(), cli.headsign.as_deref())?)
    } else {
        None
    };

    let mut trip_ids: Vec<String> = match &avl_points {
        Some(points) => points.keys().cloned().collect(),
        None => gtfs.trips.iter().filter(|(_, t)| !t.stop_times.is_empty()).map(|(id, _)| id.clone()).collect(),
    };
    trip_ids.sort();

    let mut stop_alloc = IdAllocator::default();
    let mut distance_rows = Vec::new();
    let mut stop_distance_rows = Vec::new();
    let mut problem_rows = Vec::new();

    for trip_id in &trip_ids {
        let Some(trip) = gtfs.trips.get(trip_id) else { continue };
        let Some(shape_id) = &trip.shape_id else {
            log::warn!("Skipping trip {trip_id} because it has no shape.");
            continue;
        };
        let Some(path_ends) = path_match.get(shape_id) else {
            log::warn!("Skipping route for trip {trip_id} because no points are available.");
            continue;
        };
        let Some((start_idx, end_idx)) = longest_contiguous_run(path_ends) else {
            continue;
        };
        let tree_nodes = &path_ends[start_idx..end_idx];

        log::info!("-- Matching stops for trip {trip_id} --");
        let (subset, _out_links, _node_keys) = build_subset(&road_graph, tree_nodes);

        let stop_positions: Vec<StopPosition> = match &avl_points {
            Some(points) => points
                .get(trip_id)
                .map(|pts| {
                    pts.iter()
                        .map(|p| {
                            let (x, y) = subset.center().gps_to_feet(p.lat, p.lon);
                            StopPosition { seq: p.seq, lat: p.lat, lon: p.lon, x, y }
                        })
                        .collect()
                })
                .unwrap_or_default(),
            None => trip
                .stop_times
                .iter()
                .map(|st| {
                    let stop = gtfs.stops.get(&st.stop_id);
                    let (lat, lon) = (stop.and_then(|s| s.stop_lat).unwrap_or(0.0), stop.and_then(|s| s.stop_lon).unwrap_or(0.0));
                    let (x, y) = subset.center().gps_to_feet(lat, lon);
                    StopPosition { seq: st.stop_sequence, lat, lon, x, y }
                })
                .collect(),
        };
        if stop_positions.is_empty() {
            continue;
        }

        let (samples, _lookup) = prepare_map_stops(&subset, tree_nodes, &stop_positions, true);

        let mut engine = PathEngine::new(config::avl_match_config(), &subset, None);
        let mut result_tree = engine.construct_path(&samples);
        if result_tree.len() >= 2 {
            result_tree.remove(result_tree.len() - 1);
            result_tree.remove(0);
        }

        if cli.problem_report {
            problem_rows.extend(output::assemble_problem_report(shape_id, &result_tree));
        }

        match &avl_points {
            Some(points) => {
                let Some(pts) = points.get(trip_id) else { continue };
                for (node, point) in result_tree.iter().zip(pts.iter()) {
                    distance_rows.push(AvlDistanceRow {
                        trip_id: trip_id.clone(),
                        distance: node.total_dist,
                        timestamp: format_avl_timestamp(point.timestamp),
                        speed: point.speed,
                    });
                }
            }
            None => {
                for (node, st) in result_tree.iter().zip(trip.stop_times.iter()) {
                    let stop = gtfs.stops.get(&st.stop_id);
                    stop_distance_rows.push(AvlStopDistanceRow {
                        trip_id: trip_id.clone(),
                        stop_id: stop_alloc.id_for(&st.stop_id),
                        stop_seq: st.stop_sequence,
                        distance: node.total_dist,
                        arrival: st.arrival_time.as_deref().and_then(parse_gtfs_time).map(format_hms).unwrap_or_default(),
                        departure: st.departure_time.as_deref().and_then(parse_gtfs_time).map(format_hms).unwrap_or_default(),
                        name: stop.and_then(|s| s.stop_name.clone()).unwrap_or_default(),
                    });
                }
            }
        }
    }

    if cli.stops_flag {
        log::info!("Dumping AVL stop distances...");
        output::write_avl_stop_distances(&stop_distance_rows, std::io::stdout())?;
    } else {
        log::info!("Dumping AVL distances...");
        output::write_avl_distances(&distance_rows, std::io::stdout())?;
    }

    if cli.problem_report {
        log::info!("Output problem report CSV...");
        output::write_problem_report(&problem_rows, File::create("problem_report.csv")?)?;
    }

    log::info!("Done.");
    Ok(())
}

fn format_avl_timestamp(ts: NaiveDateTime) -> String {
    ts.format("%Y%m%dT%H:%M:%S").to_string()
}
