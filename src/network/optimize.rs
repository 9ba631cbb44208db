//! Cleaning a road network before snapping.

use super::RoadNetwork;
use geo::{Coord, LineString, Simplify};
use std::collections::{HashMap, HashSet};

/// Douglas-Peucker tolerance in degrees, roughly one meter.
pub const SIMPLIFY_TOLERANCE: f64 = 1e-5;

/// Exact identity of a coordinate, usable as a hash key.
type CoordKey = (u64, u64);

fn coord_key(c: &Coord<f64>) -> CoordKey {
    // +0.0 and -0.0 must map to the same node.
    ((c.x + 0.0).to_bits(), (c.y + 0.0).to_bits())
}

pub(crate) fn line_key(line: &LineString<f64>) -> Vec<CoordKey> {
    line.coords().map(coord_key).collect()
}

/// Union-find over coordinate nodes.
#[derive(Default)]
struct DisjointSet {
    index: HashMap<CoordKey, usize>,
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl DisjointSet {
    fn node(&mut self, key: CoordKey) -> usize {
        if let Some(&i) = self.index.get(&key) {
            return i;
        }
        let i = self.parent.len();
        self.index.insert(key, i);
        self.parent.push(i);
        self.size.push(1);
        i
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        let (big, small) = if self.size[ra] >= self.size[rb] { (ra, rb) } else { (rb, ra) };
        self.parent[small] = big;
        self.size[big] += self.size[small];
    }
}

/// Graph where every coordinate is a node and consecutive coordinates of a line share an edge.
fn build_graph(network: &RoadNetwork) -> DisjointSet {
    let mut set = DisjointSet::default();
    for line in network {
        let mut previous = None;
        for c in line.geometry.coords() {
            let node = set.node(coord_key(c));
            if let Some(prev) = previous {
                set.union(prev, node);
            }
            previous = Some(node);
        }
    }
    set
}

/// Number of connected components of the node graph.
pub fn connected_components(network: &RoadNetwork) -> usize {
    let mut set = build_graph(network);
    (0..set.parent.len()).filter(|&i| set.find(i) == i).count()
}

/// Returns a cleaned copy of `network`.
///
/// * `simplify` - Douglas-Peucker simplification with [`SIMPLIFY_TOLERANCE`].
/// * duplicate geometries are always dropped, keeping the first.
/// * `remove_isolated` - keep only lines touching the largest connected component.
pub fn optimize_network_for_snapping(network: &RoadNetwork, simplify: bool, remove_isolated: bool) -> RoadNetwork {
    if network.is_empty() {
        return network.clone();
    }

    let mut seen = HashSet::new();
    let lines: Vec<_> = network
        .iter()
        .map(|line| {
            let mut line = line.clone();
            if simplify {
                line.geometry = line.geometry.simplify(&SIMPLIFY_TOLERANCE);
            }
            line
        })
        .filter(|line| seen.insert(line_key(&line.geometry)))
        .collect();
    let mut optimized = RoadNetwork::new(lines);

    if remove_isolated {
        let mut set = build_graph(&optimized);
        let roots: Vec<usize> = (0..set.parent.len()).map(|i| set.find(i)).collect();
        let largest = roots.into_iter().max_by_key(|&root| set.size[root]);
        if let Some(largest) = largest {
            let before = optimized.len();
            let kept: Vec<_> = optimized
                .into_lines()
                .into_iter()
                .filter(|line| {
                    line.geometry.coords().any(|c| {
                        let node = set.index[&coord_key(c)];
                        set.find(node) == largest
                    })
                })
                .collect();
            tracing::debug!(removed = before - kept.len(), "removed isolated road segments");
            optimized = RoadNetwork::new(kept);
        }
    }

    tracing::info!(before = network.len(), after = optimized.len(), "optimized road network");
    optimized
}
