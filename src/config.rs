//! Tunable constants carried over from `transit_gtfs.py`'s module-level
//! parameters, plus the `EngineConfig` defaults built from them.

use crate::match_engine::EngineConfig;

/// Dwell time to report in `bus_route_link.csv`.
pub const DWELLTIME_DEFAULT: i64 = 0;

/// `'k'`: radius (ft) to search from a GTFS point to perpendicular links.
pub const STOP_SEARCH_RADIUS: f64 = 800.0;

/// `'f_d'`: cost multiplier for linear path distance in stop matching.
pub const DISTANCE_FACTOR: f64 = 1.0;

/// `'f_r'`: cost multiplier for distance from a GTFS point to its link.
pub const DRIFT_FACTOR: f64 = 2.0;

/// `'f_p'`: penalty multiplier for points that aren't perpendicular to
/// their matched link.
pub const NON_PERP_PENALTY: f64 = 1.5;

/// Number of nodes at each end of a matched trip to extend with incoming
/// and outgoing links when embellishing its single-path subnet.
pub const EMBELLISH_COUNT: usize = 2;

/// Depth at which embellished links are added to the subnet.
pub const EMBELLISH_DEPTH: u32 = 1;

/// Default AVL-mode search radius (`avl_distances.py::main`'s
/// `stopSearchRadius`).
pub const AVL_STOP_SEARCH_RADIUS: f64 = 800.0;

/// Builds the initial-match `EngineConfig` from the constants above,
/// matching `dumpBusRouteLinks`'s `path_engine.PathEngine(...)`
/// construction.
pub fn initial_match_config() -> EngineConfig {
    EngineConfig {
        search_radius: STOP_SEARCH_RADIUS,
        primary_radius: STOP_SEARCH_RADIUS,
        secondary_radius: STOP_SEARCH_RADIUS,
        walk_radius: f64::MAX,
        walk_distance_limit: f64::MAX,
        max_hops: 12,
        allow_u_turns: false,
        limit_closest_points: 8,
        limit_simultaneous_paths: 6,
        f_d: DISTANCE_FACTOR,
        f_r: DRIFT_FACTOR,
        f_p: NON_PERP_PENALTY,
    }
}

/// `EngineConfig` used for the refine pass: both primary/secondary radii
/// narrowed to the stop search radius (`pathEngine.setRefineParams`).
pub fn refine_match_config() -> EngineConfig {
    let mut config = initial_match_config();
    config.primary_radius = STOP_SEARCH_RADIUS;
    config.secondary_radius = STOP_SEARCH_RADIUS;
    config
}

/// `EngineConfig` for AVL-trace matching (`avl_distances.py::main`'s
/// `path_engine.PathEngine(...)` call, which uses unit cost factors).
pub fn avl_match_config() -> EngineConfig {
    EngineConfig {
        search_radius: AVL_STOP_SEARCH_RADIUS,
        primary_radius: AVL_STOP_SEARCH_RADIUS,
        secondary_radius: AVL_STOP_SEARCH_RADIUS,
        walk_radius: f64::MAX,
        walk_distance_limit: f64::MAX,
        max_hops: 12,
        allow_u_turns: false,
        limit_closest_points: 8,
        limit_simultaneous_paths: 6,
        f_d: 1.0,
        f_r: 1.0,
        f_p: 1.0,
    }
}
