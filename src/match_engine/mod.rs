pub mod path_engine;
pub mod reconcile;
pub mod subnet;
pub mod walker;

pub use path_engine::{default_score, EngineConfig, PathEnd, PathEngine, ShapeSample};
pub use reconcile::{reconcile_stops, TripStops};
pub use subnet::{build_subset, embellish_subset, longest_contiguous_run, prepare_map_stops, StopPosition};
pub use walker::{WalkConfig, WalkResult, Walker};
