pub mod candidates;
pub mod model;

pub use candidates::{find_points_on_links, SpatialIndex};
pub use model::{GraphAccess, Link, LinkUid, Multigraph, Node, NodeKey, PointOnLink, SinglePathGraph};
