//! Cross-trip stop-location reconciler (spec.md §4.6), grounded in
//! `transit_gtfs.py`'s `dumpBusRouteLinks` vote-and-reassign block: once
//! every trip through a shared stop has been matched independently, trips
//! disagreeing about which link that stop sits on are steered onto
//! whichever link the stop's votes favor, subject to that link actually
//! existing in each disagreeing trip's own subnet.
//!
//! This module only adjusts `PathEnd` data in place; it does not re-run
//! the path engine. A caller that wants the walked route segments to
//! reflect a reassigned link must feed the post-reconciliation points back
//! through `PathEngine::refine_path` per trip, same as the original
//! `pathEngine.refinePath(resultTree, ...)` call that follows the vote.

use std::collections::HashMap;

use crate::graph::model::{Link, LinkUid};
use crate::match_engine::path_engine::PathEnd;

/// One trip's matched stop chain plus the subnet it was matched against,
/// as needed to check whether a candidate reassignment link is even
/// reachable within that trip's own subset.
pub struct TripStops {
    /// Matched chain including the leading/trailing dummy `PathEnd`s;
    /// only the interior entries (indices `1..len-1`) are stop candidates.
    pub path_ends: Vec<PathEnd>,
    /// This trip's subnet links, keyed by uid, standing in for the
    /// original's `subset.linkMap` / `allSubsetLinks[tripID]`.
    pub subset_links: HashMap<LinkUid, Link>,
    /// Shape sequence number -> GTFS stop id, standing in for
    /// `gtfsStopsLookup[treeEntry.shapeEntry.shapeSeq].stop.stopID`.
    pub stop_ids: HashMap<i32, i64>,
}

#[derive(Default)]
struct StopRecord {
    link_counts: HashMap<LinkUid, u32>,
    link_present_cnt: HashMap<LinkUid, u32>,
    /// trip index -> indices into that trip's `path_ends` referencing
    /// this stop.
    referents: HashMap<usize, Vec<usize>>,
    ref_count: u32,
}

/// `dumpBusRouteLinks`'s vote-and-reassign stage. Mutates `trips` in
/// place: entries whose link is reassigned get `restart = true` and their
/// point's `dist` set to `-1.0` (the original's sentinel for "needs
/// re-projection"), and the following entry in the same trip is also
/// flagged `restart` so a later refine pass re-walks across the boundary.
pub fn reconcile_stops(trips: &mut [TripStops]) {
    let mut stop_records: HashMap<i64, StopRecord> = HashMap::new();

    for (trip_idx, trip) in trips.iter().enumerate() {
        if trip.path_ends.len() < 2 {
            continue;
        }
        for entry_idx in 1..trip.path_ends.len() - 1 {
            let pe = &trip.path_ends[entry_idx];
            let Some(stop_id) = trip.stop_ids.get(&pe.sample.seq).copied() else { continue };
            let Some(point) = pe.point else { continue };

            let record = stop_records.entry(stop_id).or_default();
            *record.link_counts.entry(point.link.uid).or_insert(0) += 1;
            record.link_present_cnt.entry(point.link.uid).or_insert(0);
            record.referents.entry(trip_idx).or_default().push(entry_idx);
            record.ref_count += 1;
        }
    }

    // Count, for each link any stop voted for, how many of the trips
    // referencing that stop actually carry that link in their subnet.
    for record in stop_records.values_mut() {
        for &trip_idx in record.referents.keys() {
            let subset = &trips[trip_idx].subset_links;
            for (&link_uid, present) in record.link_present_cnt.iter_mut() {
                if subset.contains_key(&link_uid) {
                    *present += 1;
                }
            }
        }
    }

    for record in stop_records.values() {
        if record.link_counts.len() <= 1 {
            continue; // every trip already agrees on the link.
        }

        let mut sort_list: Vec<(u32, u32, LinkUid)> = record
            .link_present_cnt
            .iter()
            .map(|(&uid, &present)| (present, record.link_counts[&uid], uid))
            .collect();
        sort_list.sort();

        let mut link_assignment_count = 0u32;
        while !sort_list.is_empty() && link_assignment_count < record.ref_count {
            let (_, _, target_uid) = *sort_list.last().unwrap();

            for (&trip_idx, entry_indices) in &record.referents {
                let target_in_subset = trips[trip_idx].subset_links.contains_key(&target_uid);
                for &entry_idx in entry_indices {
                    let current_uid = trips[trip_idx].path_ends[entry_idx]
                        .point
                        .expect("referenced entry must carry a point")
                        .link
                        .uid;

                    if current_uid == target_uid {
                        link_assignment_count += 1;
                        continue;
                    }
                    if !target_in_subset {
                        continue; // proposed link isn't reachable in this trip.
                    }

                    let new_link = trips[trip_idx].subset_links[&target_uid];
                    let len = trips[trip_idx].path_ends.len();
                    let pe = &mut trips[trip_idx].path_ends[entry_idx];
                    pe.restart = true;
                    let mut point = pe.point.expect("checked above");
                    point.link = new_link;
                    point.dist = -1.0;
                    pe.point = Some(point);
                    if entry_idx < len - 1 {
                        trips[trip_idx].path_ends[entry_idx + 1].restart = true;
                    }
                    link_assignment_count += 1;
                }
            }

            sort_list.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::match_engine::path_engine::ShapeSample;

    fn link(id: i64, uid: LinkUid) -> Link {
        Link { id, uid, orig: 0, dest: 1, length: 100.0 }
    }

    fn entry(seq: i32, link: Link) -> PathEnd {
        PathEnd {
            prev: None,
            sample: ShapeSample { seq, lat: 0.0, lon: 0.0, x: 0.0, y: 0.0 },
            point: Some(crate::graph::model::PointOnLink {
                link,
                dist: 10.0,
                non_perp: false,
                ref_dist: 0.0,
                x: 0.0,
                y: 0.0,
            }),
            route_info: Vec::new(),
            cost: 0.0,
            total_dist: 0.0,
            restart: false,
        }
    }

    fn dummy(seq: i32) -> PathEnd {
        PathEnd {
            prev: None,
            sample: ShapeSample { seq, lat: 0.0, lon: 0.0, x: 0.0, y: 0.0 },
            point: None,
            route_info: Vec::new(),
            cost: 0.0,
            total_dist: 0.0,
            restart: false,
        }
    }

    #[test]
    fn minority_trip_is_steered_onto_majority_link() {
        let link_a = link(10, 10);
        let link_b = link(20, 20);

        // Two trips agree on link_a, one disagrees with link_b; all three
        // trips carry both links in their subnet so reassignment succeeds.
        let mut subset_both = HashMap::new();
        subset_both.insert(10, link_a);
        subset_both.insert(20, link_b);

        let mut stop_ids = HashMap::new();
        stop_ids.insert(1, 500i64);

        let mut trips = vec![
            TripStops {
                path_ends: vec![dummy(-1), entry(1, link_a), dummy(-1)],
                subset_links: subset_both.clone(),
                stop_ids: stop_ids.clone(),
            },
            TripStops {
                path_ends: vec![dummy(-1), entry(1, link_a), dummy(-1)],
                subset_links: subset_both.clone(),
                stop_ids: stop_ids.clone(),
            },
            TripStops {
                path_ends: vec![dummy(-1), entry(1, link_b), dummy(-1)],
                subset_links: subset_both,
                stop_ids,
            },
        ];

        reconcile_stops(&mut trips);

        assert_eq!(trips[2].path_ends[1].point.unwrap().link.uid, 10);
        assert!(trips[2].path_ends[1].restart);
        assert!(!trips[0].path_ends[1].restart);
    }

    #[test]
    fn reassignment_skipped_when_link_absent_from_subset() {
        let link_a = link(10, 10);
        let link_b = link(20, 20);

        let mut subset_a_only = HashMap::new();
        subset_a_only.insert(10, link_a);
        let mut subset_b_only = HashMap::new();
        subset_b_only.insert(20, link_b);

        let mut stop_ids = HashMap::new();
        stop_ids.insert(1, 500i64);

        let mut trips = vec![
            TripStops {
                path_ends: vec![dummy(-1), entry(1, link_a), dummy(-1)],
                subset_links: subset_a_only,
                stop_ids: stop_ids.clone(),
            },
            TripStops {
                path_ends: vec![dummy(-1), entry(1, link_b), dummy(-1)],
                subset_links: subset_b_only,
                stop_ids,
            },
        ];

        reconcile_stops(&mut trips);

        // Neither trip's subnet carries the other's link, so neither can
        // be reassigned onto it; both stay put and unflagged.
        assert_eq!(trips[0].path_ends[1].point.unwrap().link.uid, 10);
        assert_eq!(trips[1].path_ends[1].point.unwrap().link.uid, 20);
    }

    #[test]
    fn single_voter_stop_is_left_untouched() {
        let link_a = link(10, 10);
        let mut subset = HashMap::new();
        subset.insert(10, link_a);
        let mut stop_ids = HashMap::new();
        stop_ids.insert(1, 500i64);

        let mut trips = vec![TripStops {
            path_ends: vec![dummy(-1), entry(1, link_a), dummy(-1)],
            subset_links: subset,
            stop_ids,
        }];

        reconcile_stops(&mut trips);
        assert!(!trips[0].path_ends[1].restart);
    }
}
