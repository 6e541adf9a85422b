//! Bounded breadth-first single-pair search between two `PointOnLink`s
//! (spec.md §4.3), grounded in `WalkPathProcessor`/`_WalkPathNext` from
//! `nmc_mm_lib/graph.py`.
//!
//! The search is strictly FIFO. The original carries a per-edge
//! straight-line heuristic (`dotMag`) commented out with a note that it
//! "seems to just make the system worse" — it is not reproduced here.

use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use crate::graph::model::{GraphAccess, Link, LinkUid, PointOnLink};

/// Parameters fixed for the lifetime of a `Walker` instance.
#[derive(Debug, Clone, Copy)]
pub struct WalkConfig {
    pub limit_radius: f64,
    pub limit_distance: f64,
    /// Reserved for a reverse-direction search variant; unused by `walk`.
    pub limit_radius_rev: f64,
    pub limit_steps: u32,
    pub allow_u_turns: bool,
}

/// Score function: `(src, cumulative_distance, endpoint) -> cost`.
/// `endpoint` is `Some(dst)` only on the frame that lands on `dst.link`.
pub type ScoreFn<'a> = dyn Fn(&PointOnLink, f64, Option<&PointOnLink>) -> f64 + 'a;

/// K-best pruning predicate: true if `cost` can be discarded outright.
pub type ExceedsPreviousCosts<'a> = dyn Fn(f64) -> bool + 'a;

pub struct WalkResult {
    pub links: Vec<Link>,
    pub distance: f64,
    pub cost: f64,
}

struct Frame {
    prev: Option<Rc<Frame>>,
    incoming_link: Link,
    distance: f64,
    cost: f64,
    step_count: u32,
    backtrack_set: Rc<HashSet<LinkUid>>,
}

impl Frame {
    fn initial(src: &PointOnLink, dst: &PointOnLink, score_fn: &ScoreFn) -> Self {
        let mut distance = src.link.length - src.dist;
        let cost = if src.link.uid == dst.link.uid {
            distance -= dst.link.length - dst.dist;
            score_fn(src, distance, Some(dst))
        } else {
            score_fn(src, distance, None)
        };
        let mut set = HashSet::new();
        set.insert(src.link.uid);
        Frame {
            prev: None,
            incoming_link: src.link,
            distance,
            cost,
            step_count: 0,
            backtrack_set: Rc::new(set),
        }
    }

    fn next(prev: &Rc<Frame>, link: Link, src: &PointOnLink, dst: &PointOnLink, score_fn: &ScoreFn) -> Self {
        let mut distance = prev.distance + link.length;
        let step_count = prev.step_count + 1;
        let cost = if link.uid == dst.link.uid {
            distance -= dst.link.length - dst.dist;
            score_fn(src, distance, Some(dst))
        } else {
            score_fn(src, distance, None)
        };

        let backtrack_set = if prev.backtrack_set.contains(&link.uid) {
            Rc::clone(&prev.backtrack_set)
        } else {
            let mut cloned = (*prev.backtrack_set).clone();
            cloned.insert(link.uid);
            Rc::new(cloned)
        };

        Frame {
            prev: Some(Rc::clone(prev)),
            incoming_link: link,
            distance,
            cost,
            step_count,
            backtrack_set,
        }
    }
}

/// Maintains the back-cache across repeated `walk` calls within one
/// engine instance. Config is fixed for the walker's lifetime.
pub struct Walker {
    config: WalkConfig,
    back_cache: HashMap<LinkUid, HashMap<LinkUid, LinkUid>>,
}

impl Walker {
    pub fn new(config: WalkConfig) -> Self {
        Walker { config, back_cache: HashMap::new() }
    }

    pub fn walk(
        &mut self,
        graph: &dyn GraphAccess,
        src: &PointOnLink,
        dst: &PointOnLink,
        score_fn: &ScoreFn,
        exceeds_previous_costs: &ExceedsPreviousCosts,
    ) -> Option<WalkResult> {
        let dx = dst.x - src.x;
        let dy = dst.y - src.y;
        let limit_radius_sq = if self.config.limit_radius.is_finite() {
            self.config.limit_radius * self.config.limit_radius
        } else {
            f64::MAX
        };
        if dx * dx + dy * dy > limit_radius_sq {
            return None;
        }

        let mut backtrack_score = self.config.limit_distance;
        let mut winner: Option<Rc<Frame>> = None;

        let mut queue: VecDeque<Rc<Frame>> = VecDeque::new();
        queue.push_back(Rc::new(Frame::initial(src, dst, score_fn)));

        while let Some(frame) = queue.pop_front() {
            if frame.step_count >= self.config.limit_steps {
                continue;
            }
            if frame.distance >= backtrack_score {
                continue;
            }
            if exceeds_previous_costs(frame.cost) {
                continue;
            }

            if frame.incoming_link.uid == dst.link.uid {
                backtrack_score = frame.distance;
                self.record_back_cache(dst.link.uid, &frame);
                winner = Some(frame);
                continue;
            }

            for link in self.expansion_set(graph, dst.link.uid, &frame) {
                if !self.config.allow_u_turns && link.is_complementary(&frame.incoming_link) {
                    continue;
                }
                if frame.backtrack_set.contains(&link.uid) {
                    continue;
                }
                queue.push_back(Rc::new(Frame::next(&frame, link, src, dst, score_fn)));
            }
        }

        winner.map(|w| {
            let mut links = Vec::new();
            let mut element = Rc::clone(&w);
            while let Some(prev) = element.prev.clone() {
                links.push(element.incoming_link);
                element = prev;
            }
            links.reverse();
            WalkResult { links, distance: w.distance, cost: w.cost }
        })
    }

    fn expansion_set(&self, graph: &dyn GraphAccess, dst_link_uid: LinkUid, frame: &Frame) -> Vec<Link> {
        if let Some(mappings) = self.back_cache.get(&dst_link_uid) {
            if let Some(&next_uid) = mappings.get(&frame.incoming_link.uid) {
                if let Some(link) = graph.link(next_uid) {
                    return vec![*link];
                }
            }
        }
        graph
            .outgoing(frame.incoming_link.dest)
            .iter()
            .filter_map(|&(_, uid)| graph.link(uid).copied())
            .collect()
    }

    fn record_back_cache(&mut self, dst_link_uid: LinkUid, winner: &Rc<Frame>) {
        let mappings = self.back_cache.entry(dst_link_uid).or_default();
        let mut element = match winner.prev.clone() {
            Some(e) => e,
            None => return,
        };
        while let Some(prev_of_element) = element.prev.clone() {
            let key = prev_of_element.incoming_link.uid;
            if mappings.get(&key) == Some(&element.incoming_link.uid) {
                break;
            }
            mappings.insert(key, element.incoming_link.uid);
            element = prev_of_element;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::projection::GpsCenter;
    use crate::graph::model::Multigraph;

    fn default_score(_src: &PointOnLink, distance: f64, _end: Option<&PointOnLink>) -> f64 {
        distance
    }

    fn never_exceeds(_cost: f64) -> bool {
        false
    }

    fn straight_line_graph() -> (Multigraph, Link, Link) {
        let mut g = Multigraph::new(GpsCenter::new(0.0, 0.0));
        g.add_node(1, 0.0, 0.0);
        g.add_node(2, 0.0, 0.0003);
        g.add_node(3, 0.0, 0.0006);
        g.add_link(10, 1, 2);
        g.add_link(20, 2, 3);
        let l1 = *g.link(10).unwrap();
        let l2 = *g.link(20).unwrap();
        (g, l1, l2)
    }

    #[test]
    fn straight_line_match_links_both_segments() {
        let (g, l1, l2) = straight_line_graph();
        let src = g.point_on_link(l1, 10.0, false, 0.0);
        let dst = g.point_on_link(l2, 50.0, false, 0.0);
        let mut walker = Walker::new(WalkConfig {
            limit_radius: 1000.0,
            limit_distance: 1000.0,
            limit_radius_rev: 0.0,
            limit_steps: 10,
            allow_u_turns: true,
        });
        let result = walker.walk(&g, &src, &dst, &default_score, &never_exceeds).unwrap();
        assert_eq!(result.links.len(), 1);
        assert_eq!(result.links[0].uid, l2.uid);
    }

    #[test]
    fn same_link_boundary_returns_empty_list() {
        let (g, l1, _) = straight_line_graph();
        let src = g.point_on_link(l1, 10.0, false, 0.0);
        let dst = g.point_on_link(l1, 60.0, false, 0.0);
        let mut walker = Walker::new(WalkConfig {
            limit_radius: 1000.0,
            limit_distance: 1000.0,
            limit_radius_rev: 0.0,
            limit_steps: 10,
            allow_u_turns: true,
        });
        let result = walker.walk(&g, &src, &dst, &default_score, &never_exceeds).unwrap();
        assert!(result.links.is_empty());
        assert!((result.distance - 50.0).abs() < 1e-6);
    }

    #[test]
    fn too_far_returns_none_without_enqueueing() {
        let (g, l1, l2) = straight_line_graph();
        let src = g.point_on_link(l1, 0.0, false, 0.0);
        let dst = g.point_on_link(l2, l2.length, false, 0.0);
        let mut walker = Walker::new(WalkConfig {
            limit_radius: 1.0,
            limit_distance: 1000.0,
            limit_radius_rev: 0.0,
            limit_steps: 10,
            allow_u_turns: true,
        });
        assert!(walker.walk(&g, &src, &dst, &default_score, &never_exceeds).is_none());
    }

    #[test]
    fn u_turn_suppressed_when_disallowed() {
        let mut g = Multigraph::new(GpsCenter::new(0.0, 0.0));
        g.add_node(1, 0.0, 0.0);
        g.add_node(2, 0.0, 0.0003);
        g.add_node(3, 0.0, 0.0006);
        g.add_link(10, 1, 2); // L1: A->B
        g.add_link(20, 2, 3); // L2: B->C
        g.add_link(11, 2, 1); // L1r: B->A
        g.add_link(21, 3, 2); // L2r: C->B
        let l2r = *g.link(21).unwrap();
        let l1r = *g.link(11).unwrap();

        let src = g.point_on_link(l2r, 10.0, false, 0.0);
        let dst = g.point_on_link(l1r, l1r.length - 10.0, false, 0.0);
        let mut walker = Walker::new(WalkConfig {
            limit_radius: 1000.0,
            limit_distance: 1000.0,
            limit_radius_rev: 0.0,
            limit_steps: 10,
            allow_u_turns: false,
        });
        let result = walker.walk(&g, &src, &dst, &default_score, &never_exceeds).unwrap();
        assert_eq!(result.links.len(), 1);
        assert_eq!(result.links[0].uid, l1r.uid);
    }
}
