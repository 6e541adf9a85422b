//! Transit front end: restores a prior shape-to-network path match, rematches
//! each trip's stops against a trip-scoped subnet, reconciles shared stops
//! across trips, refines, and dumps the `public.bus_*` CSV tables.
//! Mirrors `transit_gtfs.py`'s `main`/`dumpBusRouteLinks`/`dumpBusStops`.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::BufReader;

use clap::Parser;
use mapmatch::config;
use mapmatch::db;
use mapmatch::gtfs::GtfsData;
use mapmatch::graph::GraphAccess;
use mapmatch::match_engine::{
    build_subset, embellish_subset, longest_contiguous_run, prepare_map_stops, reconcile_stops, PathEnd, PathEngine,
    ShapeSample, StopPosition, TripStops,
};
use mapmatch::output::{self, FrequencyRow, RouteLinkRow, RouteRow, StopRow};
use mapmatch::Error;

/// `dbServer network user password shapePath pathMatchFile [-t ... ]`, per
/// spec.md §6's external command-line surface.
#[derive(Parser, Debug)]
#[command(name = "mapmatch", about = "Map-match GTFS shapes and stops onto a road network")]
struct Cli {
    /// Path to the sqlite road network database.
    db_server: String,
    network: String,
    user: String,
    #[arg(help = "accepted for command-line compatibility; unused by the sqlite loader")]
    password: String,
    /// Directory or zip archive holding the GTFS feed.
    shape_path: String,
    /// Bincode dump of shape id -> matched `PathEnd` chain.
    path_match_file: String,

    #[arg(short = 't', required = true, help = "reference time, HH:MM:SS")]
    ref_time: String,
    #[arg(short = 'e', default_value_t = 86400)]
    end_time_secs: i64,
    #[arg(short = 'c', action = clap::ArgAction::Append)]
    restrict_service: Vec<String>,
    #[arg(short = 'u')]
    exclude_upstream: bool,
    #[arg(short = 'w')]
    widen: bool,
    #[arg(long = "wb")]
    widen_begin: bool,
    #[arg(long = "we")]
    widen_end: bool,
    #[arg(short = 'x')]
    exclude: bool,
    #[arg(long = "xb")]
    exclude_begin: bool,
    #[arg(long = "xe")]
    exclude_end: bool,
    #[arg(short = 'p')]
    problem_report: bool,
}

/// Parses a GTFS `HH:MM:SS` time (hours may run past 23 for next-day
/// service) into seconds since the start of the service day.
fn parse_gtfs_time(s: &str) -> Option<i64> {
    let mut parts = s.trim().splitn(3, ':');
    let h: i64 = parts.next()?.parse().ok()?;
    let m: i64 = parts.next()?.parse().ok()?;
    let sec: i64 = parts.next()?.parse().ok()?;
    Some(h * 3600 + m * 60 + sec)
}

/// Assigns stable sequential integer ids to GTFS string ids, the way the
/// original's NMC network loader keyed stops and trips by integer id.
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

struct TripMatch {
    trip_id: String,
    subset: mapmatch::graph::SinglePathGraph,
    samples: Vec<ShapeSample>,
    stop_positions: HashMap<i32, StopPosition>,
    stop_ids: HashMap<i32, i64>,
    result_tree: Vec<PathEnd>,
    longest_start: usize,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if (cli.widen || cli.widen_begin) && (cli.exclude || cli.exclude_begin) {
        eprintln!("ERROR: Widening (-w or -wb) and exclusion (-x or -xb) cannot be used together.");
        std::process::exit(1);
    }
    if (cli.widen || cli.widen_end) && (cli.exclude || cli.exclude_end) {
        eprintln!("ERROR: Widening (-w or -we) and exclusion (-x or -xe) cannot be used together.");
        std::process::exit(1);
    }

    if let Err(err) = run(&cli) {
        eprintln!("ERROR: {err}");
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<(), Error> {
    let widen_begin = cli.widen || cli.widen_begin;
    let widen_end = cli.widen || cli.widen_end;
    let exclude_begin = cli.exclude || cli.exclude_begin;
    let exclude_end = cli.exclude || cli.exclude_end;

    let ref_time = parse_gtfs_time(&cli.ref_time)
        .ok_or_else(|| Error::Error(format!("bad reference time '{}'", cli.ref_time)))?;
    let end_time = ref_time + cli.end_time_secs;

    log::info!("Read road network...");
    let road_graph = db::road_network::load(&cli.db_server)?;

    log::info!("Read GTFS feed...");
    let gtfs = GtfsData::from_path(&cli.shape_path)?;

    log::info!("Read the path-match file '{}'...", cli.path_match_file);
    let path_match: HashMap<String, Vec<PathEnd>> =
        bincode::deserialize_from(BufReader::new(File::open(&cli.path_match_file)?))?;

    let restrict: HashSet<&str> = cli.restrict_service.iter().map(String::as_str).collect();

    let mut trip_ids: Vec<&String> = gtfs
        .trips
        .keys()
        .filter(|id| {
            let trip = &gtfs.trips[*id];
            restrict.is_empty() || restrict.contains(trip.service_id.as_str())
        })
        .collect();
    trip_ids.sort();

    let mut stop_alloc = IdAllocator::default();
    let mut trip_alloc = IdAllocator::default();

    let mut warmup_start = ref_time;
    let mut cooldown_end = end_time;
    let mut matches: Vec<TripMatch> = Vec::new();

    log::info!("** INITIAL BUS STOP MATCHING STAGE **");
    for trip_id in trip_ids {
        let trip = &gtfs.trips[trip_id];
        let Some(shape_id) = &trip.shape_id else {
            log::warn!("Skipping trip {trip_id} because it has no shape.");
            continue;
        };
        let Some(path_ends) = path_match.get(shape_id) else {
            log::warn!("Skipping trip {trip_id} because shape {shape_id} has no points available.");
            continue;
        };
        if trip.stop_times.is_empty() {
            continue;
        }

        log::info!("-- Matching stops for trip {trip_id} --");
        let arrival_secs: Vec<Option<i64>> =
            trip.stop_times.iter().map(|st| st.arrival_time.as_deref().and_then(parse_gtfs_time)).collect();

        let Some((start_idx, end_idx)) = longest_contiguous_run(path_ends) else {
            log::info!("Skipped: no contiguous matched span for trip {trip_id}.");
            continue;
        };
        let in_window = arrival_secs
            .iter()
            .flatten()
            .any(|&t| t >= ref_time && t <= end_time);
        if !trip.stop_times.is_empty() && !in_window {
            log::info!("Skipped: all stops for trip {trip_id} fall outside of the valid time range.");
            continue;
        }
        let tree_nodes = &path_ends[start_idx..end_idx];

        let (mut subset, out_links, node_keys) = build_subset(&road_graph, tree_nodes);
        embellish_subset(&mut subset, &out_links, &node_keys, &road_graph, config::EMBELLISH_COUNT, config::EMBELLISH_DEPTH);

        let mut stop_positions = Vec::new();
        let mut stop_ids = HashMap::new();
        for st in &trip.stop_times {
            let stop = gtfs.stops.get(&st.stop_id);
            let (lat, lon) = (
                stop.and_then(|s| s.stop_lat).unwrap_or(0.0),
                stop.and_then(|s| s.stop_lon).unwrap_or(0.0),
            );
            let (x, y) = subset.center().gps_to_feet(lat, lon);
            stop_positions.push(StopPosition { seq: st.stop_sequence, lat, lon, x, y });
            stop_ids.insert(st.stop_sequence, stop_alloc.id_for(&st.stop_id));
        }

        let (samples, stop_lookup) = prepare_map_stops(&subset, tree_nodes, &stop_positions, true);

        let mut engine = PathEngine::new(config::initial_match_config(), &subset, None);
        let result_tree = engine.construct_path(&samples);

        matches.push(TripMatch {
            trip_id: trip_id.clone(),
            subset,
            samples,
            stop_positions: stop_lookup,
            stop_ids,
            result_tree,
            longest_start: start_idx,
        });
    }
    log::info!("** END INITIAL BUS STOP MATCHING STAGE **");

    log::info!("Resolving discrepancies in bus stop locations across all routes...");
    let mut trip_stops: Vec<TripStops> = matches
        .iter()
        .map(|m| TripStops {
            path_ends: m.result_tree.clone(),
            subset_links: m.subset.links_iter().map(|l| (l.uid, *l)).collect(),
            stop_ids: m.stop_ids.clone(),
        })
        .collect();
    reconcile_stops(&mut trip_stops);
    for (m, reconciled) in matches.iter_mut().zip(trip_stops.into_iter()) {
        m.result_tree = reconciled.path_ends;
    }

    log::info!("** BEGIN REFINING AND OUTPUT STAGE **");
    let mut route_link_rows = Vec::new();
    let mut stop_rows: HashMap<i64, StopRow> = HashMap::new();
    let mut route_rows = Vec::new();
    let mut frequency_rows = Vec::new();
    let mut valid_trip_start: HashMap<String, i64> = HashMap::new();
    let mut problem_rows = Vec::new();

    for m in &mut matches {
        let forced_links: Vec<Option<mapmatch::graph::Link>> = m.result_tree.iter().map(|pe| pe.point.map(|p| p.link)).collect();
        let mut engine = PathEngine::new(config::refine_match_config(), &m.subset, None);
        log::info!("-- Refining stops for trip {} --", m.trip_id);
        let mut refined = engine.refine_path(&m.samples, &forced_links);

        // Strip the dummy endpoints.
        if refined.len() >= 2 {
            refined.remove(refined.len() - 1);
            refined.remove(0);
        }

        let trip = &gtfs.trips[&m.trip_id];
        let trip_int_id = trip_alloc.id_for(&m.trip_id);

        if cli.problem_report {
            problem_rows.extend(output::assemble_problem_report(&m.trip_id, &refined));
        }

        let mut out_seq = m.longest_start as i64;
        let mut min_time = warmup_start;
        let mut max_time = cooldown_end;
        let mut found_valid_stop = false;
        let mut reject = false;

        for node in &refined {
            if !m.stop_ids.contains_key(&node.sample.seq) {
                continue;
            }
            let arrival = trip
                .stop_times
                .iter()
                .find(|st| st.stop_sequence == node.sample.seq)
                .and_then(|st| st.arrival_time.as_deref())
                .and_then(parse_gtfs_time);
            if let Some(t) = arrival {
                if (exclude_begin && t < ref_time) || (exclude_end && t > end_time) {
                    log::info!("Excluded trip {} because activity falls outside the valid time range.", m.trip_id);
                    reject = true;
                    break;
                }
            }
        }

        if reject {
            continue;
        }

        for node in &refined {
            if node.route_info.len() > 1 {
                for link in &node.route_info[..node.route_info.len() - 1] {
                    route_link_rows.push(RouteLinkRow { route: trip_int_id, sequence: out_seq, link: link.id, stop: None, dwelltime: None });
                    out_seq += 1;
                }
            }
            let Some(point) = node.point else {
                out_seq += 1;
                continue;
            };
            if let Some(&stop_id) = m.stop_ids.get(&node.sample.seq) {
                let arrival =
                    trip.stop_times.iter().find(|st| st.stop_sequence == node.sample.seq).and_then(|st| st.arrival_time.as_deref()).and_then(parse_gtfs_time);
                let within = arrival
                    .map(|t| (widen_begin || t >= ref_time) && (widen_end || t <= end_time))
                    .unwrap_or(true);
                if within {
                    found_valid_stop = true;
                    route_link_rows.push(RouteLinkRow {
                        route: trip_int_id,
                        sequence: out_seq,
                        link: point.link.id,
                        stop: Some(stop_id),
                        dwelltime: Some(config::DWELLTIME_DEFAULT),
                    });
                    stop_rows.entry(stop_id).or_insert_with(|| StopRow {
                        id: stop_id,
                        link: point.link.id,
                        name: trip
                            .stop_times
                            .iter()
                            .find(|st| st.stop_sequence == node.sample.seq)
                            .and_then(|st| gtfs.stops.get(&st.stop_id))
                            .and_then(|s| s.stop_name.clone())
                            .unwrap_or_default(),
                        location: point.dist as i64,
                    });
                    if let Some(t) = arrival {
                        min_time = min_time.min(t);
                        max_time = max_time.max(t);
                    }
                }
            } else if found_valid_stop || !cli.exclude_upstream {
                route_link_rows.push(RouteLinkRow { route: trip_int_id, sequence: out_seq, link: point.link.id, stop: None, dwelltime: None });
            }
            out_seq += 1;
        }

        warmup_start = warmup_start.min(min_time);
        cooldown_end = cooldown_end.max(max_time);

        // Record the first in-topology stop's arrival time for bus_frequency.
        for st in &trip.stop_times {
            if m.stop_ids.values().any(|&id| stop_rows.contains_key(&id)) {
                if let Some(t) = st.arrival_time.as_deref().and_then(parse_gtfs_time) {
                    valid_trip_start.entry(m.trip_id.clone()).or_insert(t);
                    break;
                }
            }
        }

        let route = &gtfs.routes[&trip.route_id];
        route_rows.push(RouteRow {
            id: trip_int_id,
            name: output::route_display_name(
                route.route_short_name.as_deref().unwrap_or(""),
                route.route_long_name.as_deref().unwrap_or(""),
                trip.trip_headsign.as_deref().unwrap_or(""),
            ),
        });
    }

    let total_cycle = cooldown_end - warmup_start;
    for (trip_id, start_secs) in &valid_trip_start {
        let trip_int_id = trip_alloc.id_for(trip_id);
        frequency_rows.push(FrequencyRow {
            route: trip_int_id,
            period: 1,
            frequency: total_cycle,
            offsettime: start_secs - warmup_start,
            preemption: 0,
        });
    }

    log::info!("Dumping public.bus_route_link.csv...");
    output::write_bus_route_links(&route_link_rows, &cli.user, &cli.network, File::create("public.bus_route_link.csv")?)?;

    log::info!("Dumping public.bus_stop.csv...");
    let stops: Vec<StopRow> = stop_rows.into_values().collect();
    output::write_bus_stops(&stops, &cli.user, &cli.network, File::create("public.bus_stop.csv")?)?;

    log::info!("Dumping public.bus_route.csv...");
    output::write_bus_routes(&route_rows, &cli.user, &cli.network, File::create("public.bus_route.csv")?)?;

    log::info!("Dumping public.bus_frequency.csv...");
    output::write_bus_frequency(&frequency_rows, &cli.user, &cli.network, File::create("public.bus_frequency.csv")?)?;

    log::info!("Dumping public.bus_period.csv...");
    output::write_bus_period(cli.end_time_secs, &cli.user, &cli.network, File::create("public.bus_period.csv")?)?;

    if cli.problem_report {
        log::info!("Dumping problem_report.csv...");
        output::write_problem_report(&problem_rows, File::create("problem_report.csv")?)?;
    }

    if widen_begin || widen_end {
        log::info!(
            "Widening requires start {} sec. earlier and duration {} sec. longer.",
            ref_time - warmup_start,
            (cooldown_end - end_time) + (ref_time - warmup_start)
        );
    }

    log::info!("Done.");
    Ok(())
}
