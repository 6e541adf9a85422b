//! Road network loader, grounded in `layers/road_network.rs`'s sqlite +
//! `wkt` reading, retargeted to build a `graph::model::Multigraph`
//! instead of a `petgraph::Graph` — the match engine is written against
//! `GraphAccess`, not petgraph, so there is no remaining use for it here.

use std::str::FromStr;

use geo_types::Point;
use rusqlite::{params, Connection};
use wkt::Wkt;

use crate::error::Error;
use crate::geo::projection::GpsCenter;
use crate::graph::model::Multigraph;

struct RawNode {
    id: i64,
    lat: f64,
    lon: f64,
}

struct RawEdge {
    id: i64,
    u: i64,
    v: i64,
}

/// Loads the `nodes`/`edges` sqlite schema into a `Multigraph`, centered
/// on the mean of all node coordinates.
pub fn load(db_path: &str) -> Result<Multigraph, Error> {
    let conn = Connection::open(db_path)?;
    let nodes = read_nodes(&conn)?;
    let edges = read_edges(&conn)?;

    let n = nodes.len().max(1) as f64;
    let (lat_sum, lon_sum) = nodes.iter().fold((0.0, 0.0), |(a, b), node| (a + node.lat, b + node.lon));
    let center = GpsCenter::new(lat_sum / n, lon_sum / n);

    let mut graph = Multigraph::new(center);
    for node in &nodes {
        graph.add_node(node.id, node.lat, node.lon);
    }
    for edge in &edges {
        if graph.add_link(edge.id, edge.u, edge.v).is_none() {
            log::warn!("edge {} references unknown node(s) {} -> {}", edge.id, edge.u, edge.v);
        }
    }

    Ok(graph)
}

fn read_nodes(conn: &Connection) -> Result<Vec<RawNode>, Error> {
    let mut stmt = conn.prepare("SELECT fid, geom FROM nodes")?;
    let rows = stmt.query_map(params![], |row| {
        let id: i64 = row.get(0)?;
        let wkt_str: String = row.get(1)?;
        Ok((id, wkt_str))
    })?;

    let mut out = Vec::new();
    for row in rows {
        let (id, wkt_str) = row?;
        let parsed = Wkt::from_str(&wkt_str).map_err(|e| Error::Error(format!("bad node geometry for {id}: {e}")))?;
        let point: Point<f64> =
            parsed.try_into().map_err(|_| Error::Error(format!("node {id} geometry is not a point")))?;
        out.push(RawNode { id, lat: point.y(), lon: point.x() });
    }
    Ok(out)
}

fn read_edges(conn: &Connection) -> Result<Vec<RawEdge>, Error> {
    let mut stmt = conn.prepare("SELECT fid, u, v FROM edges")?;
    let rows = stmt.query_map(params![], |row| Ok(RawEdge { id: row.get(0)?, u: row.get(1)?, v: row.get(2)? }))?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}
