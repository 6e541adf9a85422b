//! Directed multigraph / single-path graph model (spec.md §3, §4.2).
//!
//! Two concrete graph types share one capability surface (`GraphAccess`)
//! rather than branching on a runtime mode flag, per the design notes:
//! `Multigraph` validates node presence on `add_link` and interns nodes by
//! their original network id; `SinglePathGraph` skips that validation and
//! mints a fresh node object on every insertion so that a flattened trip
//! shape never re-visits the same node identity twice.

use std::collections::HashMap;

use crate::geo::kernel::{norm, point_seg_dist_sq};
use crate::geo::projection::GpsCenter;

pub type NodeKey = u32;
pub type LinkUid = u64;

/// A road network intersection. `id` is the original network id; `key` is
/// this arena's index, which is what links and adjacency actually address.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: i64,
    pub lat: f64,
    pub lon: f64,
    pub x: f64,
    pub y: f64,
    /// Outgoing links as (link id, link uid) pairs, in insertion order —
    /// this is the iteration order the walker's expansion step uses.
    outgoing: Vec<(i64, LinkUid)>,
}

/// A directed edge. Fully `Copy` so that `PointOnLink` can embed it by
/// value instead of borrowing from the graph, keeping candidate lists and
/// walker frames free of lifetime parameters.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Link {
    pub id: i64,
    pub uid: LinkUid,
    pub orig: NodeKey,
    pub dest: NodeKey,
    pub length: f64,
}

impl Link {
    /// True if `other` runs directly opposite to this link between the
    /// same two nodes (used to suppress U-turns).
    pub fn is_complementary(&self, other: &Link) -> bool {
        other.dest == self.orig && other.orig == self.dest
    }
}

/// A projection of a world point onto a specific link.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PointOnLink {
    pub link: Link,
    pub dist: f64,
    pub non_perp: bool,
    pub ref_dist: f64,
    pub x: f64,
    pub y: f64,
}

impl PointOnLink {
    /// True if this candidate sits at the link's origin node.
    pub fn is_head(&self) -> bool {
        self.dist <= 0.0
    }

    /// True if this candidate sits at the link's destination node.
    pub fn is_tail(&self) -> bool {
        self.dist >= self.link.length
    }
}

/// Shared storage backing both graph kinds: a node arena and a link map.
#[derive(Debug, Clone)]
pub struct GraphCore {
    nodes: Vec<Node>,
    links: HashMap<LinkUid, Link>,
    next_uid: LinkUid,
    center: GpsCenter,
}

impl GraphCore {
    fn new(center: GpsCenter) -> Self {
        GraphCore {
            nodes: Vec::new(),
            links: HashMap::new(),
            next_uid: 0,
            center,
        }
    }

    fn push_node(&mut self, id: i64, lat: f64, lon: f64) -> NodeKey {
        let (x, y) = self.center.gps_to_feet(lat, lon);
        let key = self.nodes.len() as NodeKey;
        self.nodes.push(Node {
            id,
            lat,
            lon,
            x,
            y,
            outgoing: Vec::new(),
        });
        key
    }

    fn push_link(&mut self, id: i64, uid: LinkUid, orig: NodeKey, dest: NodeKey) -> LinkUid {
        let (ox, oy) = (self.nodes[orig as usize].x, self.nodes[orig as usize].y);
        let (dx, dy) = (self.nodes[dest as usize].x, self.nodes[dest as usize].y);
        let length = norm(dx - ox, dy - oy);
        self.links.insert(uid, Link { id, uid, orig, dest, length });
        self.nodes[orig as usize].outgoing.push((id, uid));
        uid
    }
}

/// Read-only capability surface shared by `Multigraph` and
/// `SinglePathGraph`. Kept object-safe so the match engine can be generic
/// over `&dyn GraphAccess` and run unmodified over a trip's flattened
/// subnet (spec.md §4.5) just as it does over the full road network.
pub trait GraphAccess {
    fn node(&self, key: NodeKey) -> &Node;
    fn link(&self, uid: LinkUid) -> Option<&Link>;
    fn outgoing(&self, key: NodeKey) -> &[(i64, LinkUid)];
    fn links_iter<'a>(&'a self) -> Box<dyn Iterator<Item = &'a Link> + 'a>;
    fn center(&self) -> GpsCenter;

    /// Looks up a node's key by its original network id. `Multigraph`
    /// overrides this with its id index; the default linear scan exists
    /// for completeness on graphs that don't intern by id.
    fn node_key_by_id(&self, id: i64) -> Option<NodeKey> {
        self.links_iter().find(|l| self.node(l.orig).id == id).map(|l| l.orig)
    }

    /// Builds a `PointOnLink` at along-link distance `dist`, computing its
    /// world (x, y) by interpolating the link's endpoints.
    fn point_on_link(&self, link: Link, dist: f64, non_perp: bool, ref_dist: f64) -> PointOnLink {
        let orig = self.node(link.orig);
        let dest = self.node(link.dest);
        let (dist, norm_len) = if link.length == 0.0 { (0.0, 1.0) } else { (dist, link.length) };
        let x = orig.x + (dest.x - orig.x) * dist / norm_len;
        let y = orig.y + (dest.y - orig.y) * dist / norm_len;
        PointOnLink { link, dist, non_perp, ref_dist, x, y }
    }
}

/// The full road network: nodes are interned by their original id and
/// `add_link` refuses links whose endpoints are not present.
#[derive(Debug, Clone)]
pub struct Multigraph {
    core: GraphCore,
    id_index: HashMap<i64, NodeKey>,
}

impl Multigraph {
    pub fn new(center: GpsCenter) -> Self {
        Multigraph { core: GraphCore::new(center), id_index: HashMap::new() }
    }

    pub fn add_node(&mut self, id: i64, lat: f64, lon: f64) -> NodeKey {
        let key = self.core.push_node(id, lat, lon);
        self.id_index.insert(id, key);
        key
    }

    pub fn node_key_by_id(&self, id: i64) -> Option<NodeKey> {
        self.id_index.get(&id).copied()
    }

    /// Adds a link with uid equal to its id, as the original does for the
    /// multigraph case. Returns `None` (and the caller should log a
    /// warning) if either endpoint is not a known node.
    pub fn add_link(&mut self, id: i64, orig_id: i64, dest_id: i64) -> Option<LinkUid> {
        let orig = *self.id_index.get(&orig_id)?;
        let dest = *self.id_index.get(&dest_id)?;
        let uid = id as LinkUid;
        Some(self.core.push_link(id, uid, orig, dest))
    }

    pub fn node_count(&self) -> usize {
        self.core.nodes.len()
    }

    pub fn link_count(&self) -> usize {
        self.core.links.len()
    }
}

impl GraphAccess for Multigraph {
    fn node(&self, key: NodeKey) -> &Node {
        &self.core.nodes[key as usize]
    }
    fn link(&self, uid: LinkUid) -> Option<&Link> {
        self.core.links.get(&uid)
    }
    fn outgoing(&self, key: NodeKey) -> &[(i64, LinkUid)] {
        &self.core.nodes[key as usize].outgoing
    }
    fn links_iter<'a>(&'a self) -> Box<dyn Iterator<Item = &'a Link> + 'a> {
        Box::new(self.core.links.values())
    }
    fn center(&self) -> GpsCenter {
        self.core.center
    }
    fn node_key_by_id(&self, id: i64) -> Option<NodeKey> {
        self.id_index.get(&id).copied()
    }
}

/// A flattened, single-visit subgraph built from one trip's matched link
/// list (spec.md §4.5). Node identity is not interned: every insertion
/// mints a fresh node, even for a repeated original node id, so the
/// backbone path cannot close a cycle. `add_link` performs no presence
/// validation, matching the original's single-path `addLink`.
#[derive(Debug, Clone)]
pub struct SinglePathGraph {
    core: GraphCore,
}

impl SinglePathGraph {
    pub fn new(center: GpsCenter) -> Self {
        SinglePathGraph { core: GraphCore::new(center) }
    }

    /// Mints a fresh node, even if `id` duplicates an existing node.
    pub fn add_node_fresh(&mut self, id: i64, lat: f64, lon: f64) -> NodeKey {
        self.core.push_node(id, lat, lon)
    }

    /// Adds a link between two node keys already present in this subgraph,
    /// assigning it a fresh sequential uid (the link's original `id` is
    /// preserved separately for lookups against the parent graph).
    pub fn add_link(&mut self, id: i64, orig: NodeKey, dest: NodeKey) -> LinkUid {
        let uid = self.core.next_uid;
        self.core.next_uid += 1;
        self.core.push_link(id, uid, orig, dest)
    }

    pub fn link_count(&self) -> usize {
        self.core.links.len()
    }
}

impl GraphAccess for SinglePathGraph {
    fn node(&self, key: NodeKey) -> &Node {
        &self.core.nodes[key as usize]
    }
    fn link(&self, uid: LinkUid) -> Option<&Link> {
        self.core.links.get(&uid)
    }
    fn outgoing(&self, key: NodeKey) -> &[(i64, LinkUid)] {
        &self.core.nodes[key as usize].outgoing
    }
    fn links_iter<'a>(&'a self) -> Box<dyn Iterator<Item = &'a Link> + 'a> {
        Box::new(self.core.links.values())
    }
    fn center(&self) -> GpsCenter {
        self.core.center
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_multigraph() -> (Multigraph, NodeKey, NodeKey, NodeKey) {
        let mut g = Multigraph::new(GpsCenter::new(0.0, 0.0));
        let a = g.add_node(1, 0.0, 0.0);
        let b = g.add_node(2, 0.0, 0.001);
        let c = g.add_node(3, 0.0, 0.002);
        g.add_link(10, 1, 2);
        g.add_link(20, 2, 3);
        (g, a, b, c)
    }

    #[test]
    fn link_length_matches_endpoint_distance() {
        let (g, _, _, _) = small_multigraph();
        let link = g.link(10).unwrap();
        let orig = g.node(link.orig);
        let dest = g.node(link.dest);
        let expect = norm(dest.x - orig.x, dest.y - orig.y);
        assert!((link.length - expect).abs() < 1e-9);
    }

    #[test]
    fn missing_endpoint_is_rejected() {
        let mut g = Multigraph::new(GpsCenter::new(0.0, 0.0));
        g.add_node(1, 0.0, 0.0);
        assert!(g.add_link(99, 1, 2).is_none());
    }

    #[test]
    fn single_path_graph_mints_fresh_nodes_for_repeat_ids() {
        let mut sp = SinglePathGraph::new(GpsCenter::new(0.0, 0.0));
        let n1 = sp.add_node_fresh(5, 0.0, 0.0);
        let n2 = sp.add_node_fresh(5, 0.0, 0.0);
        assert_ne!(n1, n2);
    }

    #[test]
    fn point_on_link_bounds() {
        let (g, _, _, _) = small_multigraph();
        let link = *g.link(10).unwrap();
        let p = g.point_on_link(link, link.length / 2.0, false, 0.0);
        assert!(p.dist >= 0.0 && p.dist <= link.length);
    }

    #[test]
    fn point_seg_dist_sq_exposed() {
        let (d, along, perp) = point_seg_dist_sq(0.0, 0.0, 0.0, 0.0, 10.0, 0.0, 10.0);
        assert_eq!(d, 0.0);
        assert_eq!(along, 0.0);
        assert!(perp);
    }
}
