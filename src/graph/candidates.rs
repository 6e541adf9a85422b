//! Candidate generation: projects a GPS point onto every nearby link
//! (spec.md §4.2, "FindPointsOnLinks" in Perrine et al. 2015).
//!
//! The core scan is a brute-force pass over every link, same as the
//! original. `SpatialIndex` is the optional accelerator the design notes
//! allow: it narrows the scan to links whose bounding box lies within
//! `radius` of the query point before the exact segment projection runs,
//! which is a valid prefilter since a link's AABB distance never exceeds
//! its true segment distance.

use std::collections::{HashMap, HashSet};

use rstar::{RTree, RTreeObject, AABB};

use crate::geo::kernel::point_seg_dist_sq;
use crate::graph::model::{GraphAccess, Link, LinkUid, NodeKey, PointOnLink};

struct LinkEnvelope {
    uid: LinkUid,
    min: [f64; 2],
    max: [f64; 2],
}

impl RTreeObject for LinkEnvelope {
    type Envelope = AABB<[f64; 2]>;
    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(self.min, self.max)
    }
}

/// Optional R-tree accelerator over a graph's links, keyed by AABB.
pub struct SpatialIndex {
    tree: RTree<LinkEnvelope>,
}

impl SpatialIndex {
    pub fn build(graph: &dyn GraphAccess) -> Self {
        let mut entries = Vec::new();
        for link in graph.links_iter() {
            let orig = graph.node(link.orig);
            let dest = graph.node(link.dest);
            let min = [orig.x.min(dest.x), orig.y.min(dest.y)];
            let max = [orig.x.max(dest.x), orig.y.max(dest.y)];
            entries.push(LinkEnvelope { uid: link.uid, min, max });
        }
        SpatialIndex { tree: RTree::bulk_load(entries) }
    }

    fn candidates_within(&self, px: f64, py: f64, radius: f64) -> Vec<LinkUid> {
        self.tree
            .locate_within_distance([px, py], radius * radius)
            .map(|e| e.uid)
            .collect()
    }
}

/// Finds all `PointOnLink`s within `radius` of `(px, py)`, retaining those
/// within `primary_radius` outright and those within `secondary_radius`
/// of some point in `prev_points` (continuation of a corridor already
/// under consideration). Nonperpendicular matches to the tail of one link
/// and the head of its immediate successor are deduplicated, keeping the
/// upstream (tail) candidate. Results are sorted by reference distance
/// and truncated to `limit`.
pub fn find_points_on_links(
    graph: &dyn GraphAccess,
    index: Option<&SpatialIndex>,
    px: f64,
    py: f64,
    radius: f64,
    primary_radius: f64,
    secondary_radius: f64,
    prev_points: &[PointOnLink],
    limit: usize,
) -> Vec<PointOnLink> {
    let radius_sq = radius * radius;
    let primary_radius_sq = primary_radius * primary_radius;
    let secondary_radius_sq = secondary_radius * secondary_radius;

    let mut retained: Vec<PointOnLink> = Vec::new();

    let mut scan = |link: &Link| {
        let orig = graph.node(link.orig);
        let dest = graph.node(link.dest);
        let (dist_sq, link_dist, perpendicular) =
            point_seg_dist_sq(px, py, orig.x, orig.y, dest.x, dest.y, link.length);
        if dist_sq > radius_sq {
            return;
        }
        let point = graph.point_on_link(*link, link_dist, !perpendicular, dist_sq.sqrt());
        if dist_sq <= primary_radius_sq {
            retained.push(point);
            return;
        }
        for prev in prev_points {
            let dx = point.x - prev.x;
            let dy = point.y - prev.y;
            if dx * dx + dy * dy < secondary_radius_sq {
                retained.push(point);
                break;
            }
        }
    };

    match index {
        Some(idx) => {
            for uid in idx.candidates_within(px, py, radius) {
                if let Some(link) = graph.link(uid) {
                    scan(link);
                }
            }
        }
        None => {
            for link in graph.links_iter() {
                scan(link);
            }
        }
    }

    dedup_nonperp_junctions(graph, &mut retained);

    retained.sort_by(|a, b| a.ref_dist.partial_cmp(&b.ref_dist).unwrap());
    retained.truncate(limit);
    retained
}

/// Drops a nonperpendicular match at the head of a link when the same
/// reference distance already produced a nonperpendicular match at the
/// tail of a link feeding into it — the two represent the same junction.
fn dedup_nonperp_junctions(graph: &dyn GraphAccess, retained: &mut Vec<PointOnLink>) {
    let mut starts_by_node: HashMap<NodeKey, Vec<usize>> = HashMap::new();
    let mut ends: Vec<usize> = Vec::new();

    for (i, p) in retained.iter().enumerate() {
        if !p.non_perp {
            continue;
        }
        if p.is_head() {
            starts_by_node.entry(p.link.orig).or_default().push(i);
        } else if p.is_tail() {
            ends.push(i);
        }
    }

    let mut to_remove: HashSet<usize> = HashSet::new();
    for &end_idx in &ends {
        let end = &retained[end_idx];
        if let Some(start_idxs) = starts_by_node.get(&end.link.dest) {
            for &start_idx in start_idxs {
                if (retained[start_idx].ref_dist - end.ref_dist).abs() < f64::EPSILON {
                    to_remove.insert(start_idx);
                }
            }
        }
    }

    if !to_remove.is_empty() {
        let mut i = 0;
        retained.retain(|_| {
            let keep = !to_remove.contains(&i);
            i += 1;
            keep
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::projection::GpsCenter;
    use crate::graph::model::Multigraph;

    fn line_graph() -> Multigraph {
        let mut g = Multigraph::new(GpsCenter::new(0.0, 0.0));
        g.add_node(1, 0.0, 0.0);
        g.add_node(2, 0.0, 0.001);
        g.add_node(3, 0.0, 0.002);
        g.add_link(10, 1, 2);
        g.add_link(20, 2, 3);
        g
    }

    #[test]
    fn finds_point_near_first_segment() {
        let g = line_graph();
        let (mx, my) = g.center().gps_to_feet(0.0, 0.0005);
        let hits = find_points_on_links(&g, None, mx, my, 50.0, 50.0, 0.0, &[], 10);
        assert!(!hits.is_empty());
    }

    #[test]
    fn empty_when_nothing_within_radius() {
        let g = line_graph();
        let hits = find_points_on_links(&g, None, 1.0e6, 1.0e6, 10.0, 10.0, 0.0, &[], 10);
        assert!(hits.is_empty());
    }

    #[test]
    fn limit_truncates_to_closest() {
        let g = line_graph();
        let (mx, my) = g.center().gps_to_feet(0.0, 0.001);
        let hits = find_points_on_links(&g, None, mx, my, 1000.0, 1000.0, 0.0, &[], 1);
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn spatial_index_matches_brute_force_count() {
        let g = line_graph();
        let idx = SpatialIndex::build(&g);
        let (mx, my) = g.center().gps_to_feet(0.0, 0.0005);
        let brute = find_points_on_links(&g, None, mx, my, 50.0, 50.0, 0.0, &[], 10);
        let indexed = find_points_on_links(&g, Some(&idx), mx, my, 50.0, 50.0, 0.0, &[], 10);
        assert_eq!(brute.len(), indexed.len());
    }
}
