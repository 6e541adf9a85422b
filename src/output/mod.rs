pub mod problem_report;
pub mod tables;

pub use problem_report::{assemble_problem_report, write_problem_report, ProblemReportRow};
pub use tables::{
    route_display_name, write_avl_distances, write_avl_stop_distances, write_bus_frequency, write_bus_period,
    write_bus_route_links, write_bus_routes, write_bus_stops, AvlDistanceRow, AvlStopDistanceRow, FrequencyRow,
    RouteLinkRow, RouteRow, StopRow,
};
