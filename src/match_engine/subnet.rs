//! Flattens a matched trip's link list into an acyclic single-visit
//! subgraph, then embellishes its endpoints with neighborhood links so
//! stop candidates have room to migrate (spec.md §4.5), grounded in
//! `transit_gtfs.py`'s `treeContiguous`/`buildSubset`/`embellishSubset`/
//! `prepareMapStops`.

use std::collections::{HashMap, HashSet};

use crate::graph::model::{GraphAccess, Link, LinkUid, NodeKey, SinglePathGraph};
use crate::match_engine::path_engine::{PathEnd, ShapeSample};

/// Finds the longest run of `path_ends` with no `restart` boundary
/// touching its interior, trimming away truncated leading/trailing
/// spans. Returns `None` if no non-restart span exists at all.
pub fn longest_contiguous_run(path_ends: &[PathEnd]) -> Option<(usize, usize)> {
    if path_ends.is_empty() {
        return None;
    }

    let mut start_index: Option<usize> = Some(0);
    let mut longest: Option<(usize, usize, f64)> = None;
    let mut cur_index = 0usize;

    while cur_index <= path_ends.len() {
        let is_boundary = cur_index == path_ends.len() || path_ends[cur_index].restart;

        if is_boundary {
            if let Some(s) = start_index {
                if cur_index > s {
                    let dist = path_ends[cur_index - 1].total_dist - path_ends[s].total_dist;
                    let better = match longest {
                        Some((_, _, best_dist)) => dist > best_dist,
                        None => true,
                    };
                    if better {
                        longest = Some((s, cur_index, dist));
                    }
                }
            }
            // A restart entry carries no point of its own (see
            // `PathEngine::push_restart`); the next candidate span starts
            // just past it so the span's first node always has a point.
            start_index = Some(cur_index + 1);
        }
        cur_index += 1;
    }

    longest.map(|(s, e, _)| (s, e))
}

/// `buildSubset(pathEnds, graph) -> (subgraph, linkList)`. Mirrors links
/// from `path_ends[..].route_info` into a fresh `SinglePathGraph`,
/// minting a new node per traversal so cycles in the original network
/// cannot reappear in the subnet. Also returns the backbone's node keys
/// in traversal order (`node_keys[i]` is `links[i]`'s origin, and the
/// last entry is the final link's destination) so the embellisher can
/// attach to the exact subset nodes already placed, without having to
/// rediscover them by id.
pub fn build_subset(graph: &dyn GraphAccess, path_ends: &[PathEnd]) -> (SinglePathGraph, Vec<Link>, Vec<NodeKey>) {
    let mut subset = SinglePathGraph::new(graph.center());
    let mut out_links: Vec<Link> = Vec::new();
    let mut node_keys: Vec<NodeKey> = Vec::new();

    let first_link = path_ends[0].point.expect("first PathEnd must carry a point").link;
    let orig = graph.node(first_link.orig);
    let mut prior_key = subset.add_node_fresh(orig.id, orig.lat, orig.lon);
    node_keys.push(prior_key);
    let mut prev_link_id = first_link.id;

    let mut last_link = first_link;
    for path_end in path_ends {
        if path_end.route_info.is_empty()
            || (out_links.len() == 1 && path_end.route_info[0].id == first_link.id)
        {
            continue;
        }
        for link in &path_end.route_info {
            let orig_node = graph.node(link.orig);
            let node_key = subset.add_node_fresh(orig_node.id, orig_node.lat, orig_node.lon);
            let uid = subset.add_link(prev_link_id, prior_key, node_key);
            out_links.push(*subset.link(uid).unwrap());
            node_keys.push(node_key);
            prior_key = node_key;
            prev_link_id = link.id;
            last_link = *link;
        }
        if let Some(p) = path_end.point {
            last_link = p.link;
        }
    }

    let dest = graph.node(last_link.dest);
    let final_key = subset.add_node_fresh(dest.id, dest.lat, dest.lon);
    let uid = subset.add_link(prev_link_id, prior_key, final_key);
    out_links.push(*subset.link(uid).unwrap());
    node_keys.push(final_key);

    (subset, out_links, node_keys)
}

/// `embellishSubset(subset, linkList, graph, fanIn, depth)`. Builds a
/// reverse adjacency index over `graph` (since it only stores outgoing
/// edges), then recursively fans `depth` hops of incoming links into the
/// subset's head and outgoing links into its tail.
pub fn embellish_subset(
    subset: &mut SinglePathGraph,
    link_list: &[Link],
    node_keys: &[NodeKey],
    graph: &dyn GraphAccess,
    fan_in: usize,
    depth: u32,
) {
    let mut used_nodes: HashMap<i64, NodeKey> = HashMap::new();
    let mut used_link_ids: HashSet<i64> = HashSet::new();

    if let Some(first) = link_list.first() {
        let orig = graph.node(first.orig);
        used_nodes.insert(orig.id, node_keys[0]);
    }

    // Backbone node i+1 is link_list[i]'s destination; reuse the key
    // `build_subset` already minted for it instead of re-deriving one.
    let midpoint = link_list.len() / 2;
    for (i, link) in link_list.iter().enumerate().take(midpoint) {
        let dest = graph.node(link.dest);
        if let std::collections::hash_map::Entry::Vacant(e) = used_nodes.entry(dest.id) {
            e.insert(node_keys[i + 1]);
            used_link_ids.insert(link.id);
        }
    }
    for (i, link) in link_list.iter().enumerate().skip(midpoint).rev() {
        let dest = graph.node(link.dest);
        if let std::collections::hash_map::Entry::Vacant(e) = used_nodes.entry(dest.id) {
            e.insert(node_keys[i + 1]);
            used_link_ids.insert(link.id);
        }
    }

    let mut node_link_map: HashMap<i64, Vec<LinkUid>> = HashMap::new();
    for link in graph.links_iter() {
        let dest = graph.node(link.dest);
        node_link_map.entry(dest.id).or_default().push(link.uid);
    }

    for link in link_list.iter().take(fan_in.min(link_list.len())) {
        let orig_id = graph.node(link.orig).id;
        embellish_in(subset, graph, orig_id, depth, &mut used_nodes, &mut used_link_ids, &node_link_map);
    }
    let tail_count = fan_in.min(link_list.len());
    for link in link_list.iter().rev().take(tail_count) {
        let dest_id = graph.node(link.dest).id;
        embellish_out(subset, graph, dest_id, depth, &mut used_nodes, &mut used_link_ids);
    }
}

fn embellish_in(
    subset: &mut SinglePathGraph,
    graph: &dyn GraphAccess,
    node_id: i64,
    cur_depth: u32,
    used_nodes: &mut HashMap<i64, NodeKey>,
    used_link_ids: &mut HashSet<i64>,
    node_link_map: &HashMap<i64, Vec<LinkUid>>,
) {
    if cur_depth == 0 {
        return;
    }
    let Some(incoming) = node_link_map.get(&node_id) else { return };
    let incoming = incoming.clone();
    for uid in incoming {
        let Some(link) = graph.link(uid).copied() else { continue };
        if used_link_ids.contains(&link.id) {
            continue;
        }
        let orig = graph.node(link.orig);
        let orig_key = *used_nodes.entry(orig.id).or_insert_with(|| subset.add_node_fresh(orig.id, orig.lat, orig.lon));
        let dest_key = *used_nodes.get(&node_id).expect("node must already be in subset");
        subset.add_link(link.id, orig_key, dest_key);
        used_link_ids.insert(link.id);
        embellish_in(subset, graph, orig.id, cur_depth - 1, used_nodes, used_link_ids, node_link_map);
    }
}

fn embellish_out(
    subset: &mut SinglePathGraph,
    graph: &dyn GraphAccess,
    node_id: i64,
    cur_depth: u32,
    used_nodes: &mut HashMap<i64, NodeKey>,
    used_link_ids: &mut HashSet<i64>,
) {
    if cur_depth == 0 {
        return;
    }
    let Some(&orig_key) = used_nodes.get(&node_id) else { return };
    let Some(node_key) = graph.node_key_by_id(node_id) else { return };
    let outgoing: Vec<Link> = graph.outgoing(node_key).iter().filter_map(|&(_, uid)| graph.link(uid).copied()).collect();
    for link in outgoing {
        if used_link_ids.contains(&link.id) {
            continue;
        }
        let dest = graph.node(link.dest);
        let dest_key = *used_nodes.entry(dest.id).or_insert_with(|| subset.add_node_fresh(dest.id, dest.lat, dest.lon));
        subset.add_link(link.id, orig_key, dest_key);
        used_link_ids.insert(link.id);
        embellish_out(subset, graph, dest.id, cur_depth - 1, used_nodes, used_link_ids);
    }
}

/// A stop position to be re-matched against a trip's subnet.
#[derive(Debug, Clone, Copy)]
pub struct StopPosition {
    pub seq: i32,
    pub lat: f64,
    pub lon: f64,
    pub x: f64,
    pub y: f64,
}

/// `prepareMapStops(pathEnds, stopTimes, dummyFlag) -> (shapeSamples, stopLookup)`.
/// Dummy samples, when requested, are pinned exactly to the subnet's own
/// endpoints (`graph` here is that subnet) so the engine cannot truncate
/// the route short of either end.
pub fn prepare_map_stops(
    graph: &dyn GraphAccess,
    path_ends: &[PathEnd],
    stops: &[StopPosition],
    dummy_flag: bool,
) -> (Vec<ShapeSample>, HashMap<i32, StopPosition>) {
    let mut samples = Vec::new();
    let mut lookup = HashMap::new();

    if dummy_flag {
        let orig = graph.node(path_ends[0].point.expect("first PathEnd must carry a point").link.orig);
        samples.push(ShapeSample { seq: -1, lat: orig.lat, lon: orig.lon, x: orig.x, y: orig.y });
    }

    for stop in stops {
        samples.push(ShapeSample { seq: stop.seq, lat: stop.lat, lon: stop.lon, x: stop.x, y: stop.y });
        lookup.insert(stop.seq, *stop);
    }

    if dummy_flag {
        let dest = graph.node(
            path_ends
                .last()
                .and_then(|pe| pe.point)
                .expect("last PathEnd must carry a point")
                .link
                .dest,
        );
        samples.push(ShapeSample { seq: -1, lat: dest.lat, lon: dest.lon, x: dest.x, y: dest.y });
    }

    (samples, lookup)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::model::{Multigraph, PointOnLink};

    fn pe(total_dist: f64, restart: bool) -> PathEnd {
        PathEnd {
            prev: None,
            sample: ShapeSample { seq: 0, lat: 0.0, lon: 0.0, x: 0.0, y: 0.0 },
            point: None,
            route_info: Vec::new(),
            cost: 0.0,
            total_dist,
            restart,
        }
    }

    #[test]
    fn longest_run_skips_restarts() {
        let chain = vec![pe(0.0, false), pe(10.0, false), pe(20.0, true), pe(25.0, false)];
        let (s, e) = longest_contiguous_run(&chain).unwrap();
        assert_eq!((s, e), (0, 2));
    }

    #[test]
    fn build_subset_links_endpoints() {
        let mut g = Multigraph::new(crate::geo::projection::GpsCenter::new(0.0, 0.0));
        g.add_node(1, 0.0, 0.0);
        g.add_node(2, 0.0, 0.001);
        g.add_link(10, 1, 2);
        let link = *g.link(10).unwrap();
        let point = PointOnLink { link, dist: link.length, non_perp: false, ref_dist: 0.0, x: 0.0, y: 0.0 };
        let path_ends = vec![PathEnd {
            prev: None,
            sample: ShapeSample { seq: 0, lat: 0.0, lon: 0.0, x: 0.0, y: 0.0 },
            point: Some(point),
            route_info: vec![link],
            cost: 0.0,
            total_dist: link.length,
            restart: false,
        }];
        let (subset, links, node_keys) = build_subset(&g, &path_ends);
        assert_eq!(links.len(), 2);
        assert_eq!(subset.link_count(), 2);
        assert_eq!(node_keys.len(), 3);
    }
}
