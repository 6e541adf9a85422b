//! Orchestrates candidate generation and the walker into K-best hypothesis
//! tracking across a shape's sample sequence (spec.md §4.4).
//!
//! There is no `path_engine.py` in the distilled source to translate line
//! by line — this module is built directly from spec.md's description of
//! `constructPath`/`refinePath`, in the idiom of `graph.py`'s walker and
//! `transit_gtfs.py`'s call sites (`pathEngine.constructPath(...)`,
//! `pathEngine.refinePath(...)`).

use crate::graph::candidates::{find_points_on_links, SpatialIndex};
use crate::graph::model::{GraphAccess, Link, PointOnLink};
use crate::match_engine::walker::{WalkConfig, Walker};

/// One sample along a shape's (or trip's) geographic trace.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct ShapeSample {
    /// Sequence number within the shape; `-1` marks a dummy sample
    /// inserted by the subnet builder to pin a path's endpoints.
    pub seq: i32,
    pub lat: f64,
    pub lon: f64,
    pub x: f64,
    pub y: f64,
}

/// One node in a matched hypothesis chain. `prev` indexes into the same
/// `Vec<PathEnd>` once a hypothesis is finalized and returned — see
/// design notes on cyclic references (spec.md §9): this sidesteps a
/// linked owned-node chain by flattening to array + back-index up front.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PathEnd {
    pub prev: Option<usize>,
    pub sample: ShapeSample,
    pub point: Option<PointOnLink>,
    pub route_info: Vec<Link>,
    pub cost: f64,
    pub total_dist: f64,
    pub restart: bool,
}

/// Cost factors and search limits fixed for one engine instance.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub search_radius: f64,
    pub primary_radius: f64,
    pub secondary_radius: f64,
    pub walk_radius: f64,
    pub walk_distance_limit: f64,
    pub max_hops: u32,
    pub allow_u_turns: bool,
    pub limit_closest_points: usize,
    pub limit_simultaneous_paths: usize,
    pub f_d: f64,
    pub f_r: f64,
    pub f_p: f64,
}

/// Default cost function from spec.md §4.4:
/// `cost = f_d * D + f_r * (src.refDist + e.refDist)/2 * (1 + (f_p-1)*isNonPerp(e))`.
/// Monotone nondecreasing in `D`, which is what licenses the walker's
/// distance-based pruning.
pub fn default_score(config: &EngineConfig, src: &PointOnLink, distance: f64, end: Option<&PointOnLink>) -> f64 {
    let e_ref_dist = end.map(|e| e.ref_dist).unwrap_or(src.ref_dist);
    let nonperp_factor = match end {
        Some(e) if e.non_perp => config.f_p,
        _ => 1.0,
    };
    config.f_d * distance + config.f_r * (src.ref_dist + e_ref_dist) / 2.0 * nonperp_factor
}

/// Tracks the best `k` costs seen so far, used to implement
/// `exceedsPreviousCosts` (the anytime K-best pruning threshold).
struct TopK {
    k: usize,
    costs: Vec<f64>,
}

impl TopK {
    fn new(k: usize) -> Self {
        TopK { k: k.max(1), costs: Vec::new() }
    }

    fn exceeds(&self, c: f64) -> bool {
        self.costs.len() >= self.k && c > self.costs[self.k - 1]
    }

    fn insert(&mut self, c: f64) {
        let pos = self.costs.partition_point(|&x| x <= c);
        self.costs.insert(pos, c);
        self.costs.truncate(self.k);
    }
}

pub struct PathEngine<'g> {
    config: EngineConfig,
    graph: &'g dyn GraphAccess,
    index: Option<&'g SpatialIndex>,
    walker: Walker,
}

impl<'g> PathEngine<'g> {
    pub fn new(config: EngineConfig, graph: &'g dyn GraphAccess, index: Option<&'g SpatialIndex>) -> Self {
        let walk_config = WalkConfig {
            limit_radius: config.walk_radius,
            limit_distance: config.walk_distance_limit,
            limit_radius_rev: 0.0,
            limit_steps: config.max_hops,
            allow_u_turns: config.allow_u_turns,
        };
        PathEngine { config, graph, index, walker: Walker::new(walk_config) }
    }

    /// `constructPath(shapeSamples, graph) -> list<PathEnd>` (spec.md §4.4).
    pub fn construct_path(&mut self, samples: &[ShapeSample]) -> Vec<PathEnd> {
        self.run(samples, None)
    }

    /// `refinePath(seedPath, graph)`: re-runs `constructPath`, restricting
    /// sample `i`'s candidate set to projections on `forced_links[i]` and
    /// emitting a restart (rather than substituting a different link) if
    /// the walker cannot reach the forced link.
    pub fn refine_path(&mut self, samples: &[ShapeSample], forced_links: &[Option<Link>]) -> Vec<PathEnd> {
        self.run(samples, Some(forced_links))
    }

    fn run(&mut self, samples: &[ShapeSample], forced_links: Option<&[Option<Link>]>) -> Vec<PathEnd> {
        let mut hypotheses: Vec<Vec<PathEnd>> = vec![Vec::new()];

        for (sample_idx, sample) in samples.iter().enumerate() {
            let prev_points: Vec<PointOnLink> =
                hypotheses.iter().filter_map(|h| h.last().and_then(|pe| pe.point)).collect();

            let forced = forced_links.and_then(|f| f.get(sample_idx)).and_then(|l| *l);
            let candidates = self.candidates_for(sample, &prev_points, forced);

            if candidates.is_empty() {
                // Nothing to match this sample to: carry every hypothesis
                // forward as a restart.
                hypotheses = hypotheses
                    .into_iter()
                    .map(|h| self.push_restart(h, *sample, 1.0))
                    .collect();
                continue;
            }

            let mut top_k = TopK::new(self.config.limit_simultaneous_paths);
            let mut extensions: Vec<(f64, Vec<PathEnd>)> = Vec::new();
            let mut worst_seen = 0.0_f64;

            for hypothesis in &hypotheses {
                let tail_point = hypothesis.last().and_then(|pe| pe.point);
                let mut any_succeeded = tail_point.is_none();

                for candidate in &candidates {
                    let (cost, route_info, distance, failed) = match tail_point {
                        None => {
                            // First sample in the chain: no walk required.
                            let c = default_score(&self.config, candidate, 0.0, None);
                            (c, Vec::new(), 0.0, false)
                        }
                        Some(tail) => {
                            let top_k_ref = &top_k;
                            let result = self.walker.walk(
                                self.graph,
                                &tail,
                                candidate,
                                &|src, d, e| default_score(&self.config, src, d, e),
                                &|c| top_k_ref.exceeds(c),
                            );
                            match result {
                                Some(w) => (w.cost, w.links, w.distance, false),
                                None => (0.0, Vec::new(), 0.0, true),
                            }
                        }
                    };

                    if failed {
                        continue;
                    }
                    any_succeeded = true;

                    worst_seen = worst_seen.max(cost);
                    top_k.insert(cost);

                    let mut chain = hypothesis.clone();
                    let total_dist = chain.last().map(|pe| pe.total_dist).unwrap_or(0.0) + distance;
                    chain.push(PathEnd {
                        prev: None,
                        sample: *sample,
                        point: Some(*candidate),
                        route_info,
                        cost,
                        total_dist,
                        restart: false,
                    });
                    extensions.push((cost, chain));
                }

                // No candidate produced a successful walk for this
                // hypothesis (or we are in refine mode and the forced
                // link was unreachable): emit a restart so the branch is
                // not lost, rather than silently dropping it.
                if !any_succeeded {
                    let penalty = worst_seen + 1.0;
                    extensions.push((penalty, self.push_restart(hypothesis.clone(), *sample, penalty)));
                }
            }

            extensions.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
            extensions.truncate(self.config.limit_simultaneous_paths.max(1));
            hypotheses = extensions.into_iter().map(|(_, h)| h).collect();
            if hypotheses.is_empty() {
                hypotheses.push(Vec::new());
            }
        }

        hypotheses
            .into_iter()
            .min_by(|a, b| {
                let ca = a.last().map(|pe| pe.cost).unwrap_or(f64::MAX);
                let cb = b.last().map(|pe| pe.cost).unwrap_or(f64::MAX);
                ca.partial_cmp(&cb).unwrap()
            })
            .map(Self::relink)
            .unwrap_or_default()
    }

    fn candidates_for(
        &self,
        sample: &ShapeSample,
        prev_points: &[PointOnLink],
        forced: Option<Link>,
    ) -> Vec<PointOnLink> {
        let all = find_points_on_links(
            self.graph,
            self.index,
            sample.x,
            sample.y,
            self.config.search_radius,
            self.config.primary_radius,
            self.config.secondary_radius,
            prev_points,
            self.config.limit_closest_points,
        );
        match forced {
            Some(link) => all.into_iter().filter(|p| p.link.uid == link.uid).collect(),
            None => all,
        }
    }

    fn push_restart(&self, mut chain: Vec<PathEnd>, sample: ShapeSample, penalty: f64) -> Vec<PathEnd> {
        let total_dist = chain.last().map(|pe| pe.total_dist).unwrap_or(0.0);
        let cost = chain.last().map(|pe| pe.cost).unwrap_or(0.0) + penalty;
        chain.push(PathEnd {
            prev: None,
            sample,
            point: None,
            route_info: Vec::new(),
            cost,
            total_dist,
            restart: true,
        });
        chain
    }

    /// Fills in `prev` indices for the finalized, linear hypothesis chain.
    fn relink(mut chain: Vec<PathEnd>) -> Vec<PathEnd> {
        for i in 0..chain.len() {
            chain[i].prev = if i == 0 { None } else { Some(i - 1) };
        }
        chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::projection::GpsCenter;
    use crate::graph::model::Multigraph;

    fn default_config() -> EngineConfig {
        EngineConfig {
            search_radius: 100.0,
            primary_radius: 100.0,
            secondary_radius: 0.0,
            walk_radius: 1000.0,
            walk_distance_limit: 1000.0,
            max_hops: 20,
            allow_u_turns: true,
            limit_closest_points: 4,
            limit_simultaneous_paths: 2,
            f_d: 1.0,
            f_r: 0.0,
            f_p: 1.0,
        }
    }

    fn three_node_graph() -> Multigraph {
        let mut g = Multigraph::new(GpsCenter::new(0.0, 0.0));
        g.add_node(1, 0.0, 0.0);
        g.add_node(2, 0.0, 0.00027);
        g.add_node(3, 0.0, 0.00055);
        g.add_link(10, 1, 2);
        g.add_link(20, 2, 3);
        g
    }

    #[test]
    fn straight_line_match_produces_two_path_ends() {
        let g = three_node_graph();
        let (x1, y1) = g.center().gps_to_feet(0.0, 0.00003);
        let (x2, y2) = g.center().gps_to_feet(0.0, 0.0004);
        let samples = vec![
            ShapeSample { seq: 0, lat: 0.0, lon: 0.00003, x: x1, y: y1 },
            ShapeSample { seq: 1, lat: 0.0, lon: 0.0004, x: x2, y: y2 },
        ];
        let mut engine = PathEngine::new(default_config(), &g, None);
        let result = engine.construct_path(&samples);
        assert_eq!(result.len(), 2);
        assert!(!result[1].restart);
    }

    #[test]
    fn k_best_pruning_keeps_at_most_k_hypotheses() {
        let g = three_node_graph();
        let (x1, y1) = g.center().gps_to_feet(0.0, 0.0);
        let samples = vec![ShapeSample { seq: 0, lat: 0.0, lon: 0.0, x: x1, y: y1 }];
        let mut config = default_config();
        config.limit_simultaneous_paths = 1;
        let mut engine = PathEngine::new(config, &g, None);
        let result = engine.construct_path(&samples);
        assert!(result.len() <= 1 || result.last().is_some());
    }
}
