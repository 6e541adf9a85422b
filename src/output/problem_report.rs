//! Problem-report CSV (CLI `-p`), grounded in `assembleProblemReport`: a
//! per-shape flattened dump of the matched chain after refine, letting a
//! later analysis pass see exactly which stops restarted or never landed
//! on a link.

use std::io::Write;

use serde::Serialize;

use crate::error::Error;
use crate::match_engine::path_engine::PathEnd;

#[derive(Debug, Clone, Serialize)]
pub struct ProblemReportRow {
    pub shape_id: String,
    pub seq: i32,
    pub lat: f64,
    pub lon: f64,
    pub link_id: Option<i64>,
    pub dist: Option<f64>,
    pub restart: bool,
    pub cost: f64,
    pub total_dist: f64,
}

/// Flattens one shape's refined `PathEnd` chain into report rows.
pub fn assemble_problem_report(shape_id: &str, chain: &[PathEnd]) -> Vec<ProblemReportRow> {
    chain
        .iter()
        .map(|node| ProblemReportRow {
            shape_id: shape_id.to_string(),
            seq: node.sample.seq,
            lat: node.sample.lat,
            lon: node.sample.lon,
            link_id: node.point.map(|p| p.link.id),
            dist: node.point.map(|p| p.dist),
            restart: node.restart,
            cost: node.cost,
            total_dist: node.total_dist,
        })
        .collect()
}

pub fn write_problem_report<W: Write>(rows: &[ProblemReportRow], mut out: W) -> Result<(), Error> {
    let mut writer = csv::Writer::from_writer(&mut out);
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::match_engine::path_engine::ShapeSample;

    fn sample_node(seq: i32, restart: bool) -> PathEnd {
        PathEnd {
            prev: None,
            sample: ShapeSample { seq, lat: 30.0, lon: -97.0, x: 0.0, y: 0.0 },
            point: None,
            route_info: Vec::new(),
            cost: 1.0,
            total_dist: 2.0,
            restart,
        }
    }

    #[test]
    fn flattens_one_row_per_chain_entry() {
        let chain = vec![sample_node(0, false), sample_node(1, true)];
        let rows = assemble_problem_report("shape1", &chain);
        assert_eq!(rows.len(), 2);
        assert!(!rows[0].restart);
        assert!(rows[1].restart);
        assert_eq!(rows[0].shape_id, "shape1");
    }

    #[test]
    fn writes_a_csv_row_per_entry() {
        let chain = vec![sample_node(0, false)];
        let rows = assemble_problem_report("shape1", &chain);
        let mut buf = Vec::new();
        write_problem_report(&rows, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("shape1"));
    }
}
