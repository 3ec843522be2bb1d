//! Planar street graph construction from streamlines.
//!
//! Uses petgraph for the underlying graph structure. Every streamline vertex
//! and every crossing between segments becomes a node; nodes closer than the
//! build tolerance are merged, and each segment is split at the nodes lying on
//! it.

use std::collections::HashMap;

use bevy::prelude::*;
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use smallvec::SmallVec;

use super::geometry::segment_intersection;

/// A node in the street network.
#[derive(Clone, Debug)]
pub struct GraphNode {
    pub position: Vec2,
    pub node_type: NodeType,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeType {
    /// A streamline vertex.
    Vertex,
    /// Where two or more segments cross.
    Intersection,
}

/// A straight edge between two nodes.
#[derive(Clone, Debug)]
pub struct GraphEdge {
    pub length: f32,
}

#[derive(Clone, Copy, Debug)]
struct Segment {
    a: Vec2,
    b: Vec2,
    line: usize,
    index: usize,
}

impl Segment {
    fn shares_endpoint(&self, other: &Segment) -> bool {
        self.a == other.a || self.a == other.b || self.b == other.a || self.b == other.b
    }
}

/// Nodes found along one segment, keyed by the parameter along it.
type SegmentNodes = SmallVec<[(f32, NodeIndex); 4]>;

/// Undirected planar graph of the road network.
#[derive(Default)]
pub struct StreetGraph {
    pub graph: UnGraph<GraphNode, GraphEdge>,
    tolerance: f32,
    cell_size: f32,
    /// Spatial index for fast nearest-node queries.
    node_cells: HashMap<(i32, i32), Vec<NodeIndex>>,
    intersections: Vec<NodeIndex>,
}

impl StreetGraph {
    /// Build the graph of a set of polylines. Points closer than `tolerance`
    /// become one node.
    pub fn build(streamlines: &[Vec<Vec2>], tolerance: f32) -> Self {
        let tolerance = tolerance.max(f32::EPSILON);
        let mut graph = Self {
            graph: UnGraph::default(),
            tolerance,
            cell_size: (tolerance * 4.0).max(1.0),
            node_cells: HashMap::new(),
            intersections: Vec::new(),
        };

        let segments: Vec<Segment> = streamlines
            .iter()
            .enumerate()
            .flat_map(|(line, points)| {
                points.windows(2).enumerate().filter_map(move |(index, w)| {
                    (w[0] != w[1]).then_some(Segment {
                        a: w[0],
                        b: w[1],
                        line,
                        index,
                    })
                })
            })
            .collect();

        // Segment endpoints
        let mut segment_nodes: Vec<SegmentNodes> = segments
            .iter()
            .map(|s| {
                let a = graph.snap_or_create(s.a, NodeType::Vertex);
                let b = graph.snap_or_create(s.b, NodeType::Vertex);
                SmallVec::from_slice(&[(0.0, a), (1.0, b)])
            })
            .collect();

        // Crossings
        for (i, j) in candidate_pairs(&segments) {
            let (s, t) = (&segments[i], &segments[j]);
            if s.line == t.line && (s.index.abs_diff(t.index) == 1 || s.shares_endpoint(t)) {
                continue;
            }
            if let Some(hit) = segment_intersection(s.a, s.b, t.a, t.b) {
                let node = graph.snap_or_create(hit.point, NodeType::Intersection);
                if !graph.intersections.contains(&node) {
                    graph.intersections.push(node);
                }
                segment_nodes[i].push((hit.t, node));
                segment_nodes[j].push((hit.u, node));
            }
        }

        // Link the nodes along each segment in order
        for nodes in &mut segment_nodes {
            nodes.sort_by(|a, b| a.0.total_cmp(&b.0));
            nodes.dedup_by_key(|(_, node)| *node);
            for pair in nodes.windows(2) {
                graph.link(pair[0].1, pair[1].1);
            }
        }

        debug!(
            "Street graph: {} nodes, {} edges, {} intersections",
            graph.node_count(),
            graph.edge_count(),
            graph.intersections.len()
        );

        graph
    }

    /// [`Self::build`], then strip dead-end chains.
    pub fn build_pruned(streamlines: &[Vec<Vec2>], tolerance: f32) -> Self {
        let mut graph = Self::build(streamlines, tolerance);
        graph.remove_dangling_edges();
        graph
    }

    /// Add an edge unless the two nodes are already linked.
    fn link(&mut self, a: NodeIndex, b: NodeIndex) {
        if a == b {
            return;
        }
        let length = self.graph[a].position.distance(self.graph[b].position);
        self.graph.update_edge(a, b, GraphEdge { length });
    }

    fn to_cell(&self, pos: Vec2) -> (i32, i32) {
        (
            (pos.x / self.cell_size).floor() as i32,
            (pos.y / self.cell_size).floor() as i32,
        )
    }

    /// Add a node to the graph.
    fn add_node(&mut self, position: Vec2, node_type: NodeType) -> NodeIndex {
        let idx = self.graph.add_node(GraphNode {
            position,
            node_type,
        });
        let cell = self.to_cell(position);
        self.node_cells.entry(cell).or_default().push(idx);
        idx
    }

    /// Try to snap a position to an existing node, or create a new one.
    fn snap_or_create(&mut self, position: Vec2, node_type: NodeType) -> NodeIndex {
        if let Some(existing) = self.find_nearest(position, self.tolerance) {
            if node_type == NodeType::Intersection {
                self.graph[existing].node_type = NodeType::Intersection;
            }
            existing
        } else {
            self.add_node(position, node_type)
        }
    }

    /// Find the nearest node within a radius.
    pub fn find_nearest(&self, position: Vec2, max_distance: f32) -> Option<NodeIndex> {
        let min_cell = self.to_cell(position - Vec2::splat(max_distance));
        let max_cell = self.to_cell(position + Vec2::splat(max_distance));

        let mut best: Option<(NodeIndex, f32)> = None;
        for cx in min_cell.0..=max_cell.0 {
            for cy in min_cell.1..=max_cell.1 {
                let Some(nodes) = self.node_cells.get(&(cx, cy)) else {
                    continue;
                };
                for &idx in nodes {
                    let dist = position.distance(self.graph[idx].position);
                    if dist <= max_distance && best.map_or(true, |(_, d)| dist < d) {
                        best = Some((idx, dist));
                    }
                }
            }
        }

        best.map(|(idx, _)| idx)
    }

    /// Repeatedly drop the edge of every degree-1 node until none are left.
    /// Nodes stay in place with degree 0.
    pub fn remove_dangling_edges(&mut self) {
        let mut stack: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|&n| self.node_degree(n) == 1)
            .collect();

        while let Some(node) = stack.pop() {
            if self.node_degree(node) != 1 {
                continue;
            }
            let Some((edge, neighbor)) = self
                .graph
                .edges(node)
                .next()
                .map(|e| (e.id(), if e.source() == node { e.target() } else { e.source() }))
            else {
                continue;
            };
            self.graph.remove_edge(edge);
            if self.node_degree(neighbor) == 1 {
                stack.push(neighbor);
            }
        }
    }

    /// Get all nodes.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeIndex, &GraphNode)> {
        self.graph.node_indices().map(|i| (i, &self.graph[i]))
    }

    /// Get a node by its index.
    pub fn node_by_index(&self, idx: NodeIndex) -> Option<&GraphNode> {
        self.graph.node_weight(idx)
    }

    /// Get neighbor node indices for a given node.
    pub fn neighbors(&self, idx: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.neighbors(idx)
    }

    /// Get the degree (number of connected edges) of a node.
    pub fn node_degree(&self, idx: NodeIndex) -> usize {
        self.graph.edges(idx).count()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Positions of the crossing nodes.
    pub fn intersections(&self) -> Vec<Vec2> {
        self.intersections
            .iter()
            .map(|&idx| self.graph[idx].position)
            .collect()
    }

    pub fn intersection_nodes(&self) -> &[NodeIndex] {
        &self.intersections
    }
}

/// Segment pairs whose bounding boxes overlap, by a sweep along x.
fn candidate_pairs(segments: &[Segment]) -> Vec<(usize, usize)> {
    let bounds: Vec<Rect> = segments
        .iter()
        .map(|s| Rect::from_corners(s.a, s.b))
        .collect();

    let mut order: Vec<usize> = (0..segments.len()).collect();
    order.sort_by(|&a, &b| bounds[a].min.x.total_cmp(&bounds[b].min.x));

    let mut pairs = Vec::new();
    for (k, &i) in order.iter().enumerate() {
        for &j in &order[k + 1..] {
            if bounds[j].min.x > bounds[i].max.x {
                break;
            }
            if bounds[j].min.y <= bounds[i].max.y && bounds[i].min.y <= bounds[j].max.y {
                pairs.push((i.min(j), i.max(j)));
            }
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cross() -> Vec<Vec<Vec2>> {
        vec![
            vec![Vec2::new(-10.0, 0.0), Vec2::new(10.0, 0.0)],
            vec![Vec2::new(0.0, -10.0), Vec2::new(0.0, 10.0)],
        ]
    }

    #[test]
    fn crossing_streamlines_share_one_degree_four_node() {
        let graph = StreetGraph::build(&cross(), 0.25);
        assert_eq!(graph.intersections().len(), 1);
        assert!(graph.intersections()[0].length() < 1e-5);

        let node = graph.intersection_nodes()[0];
        assert_eq!(graph.node_degree(node), 4);
        assert_eq!(graph.node_count(), 5);
        assert_eq!(graph.edge_count(), 4);
    }

    #[test]
    fn vertex_on_crossing_merges_with_intersection() {
        let streamlines = vec![
            vec![
                Vec2::new(-10.0, 0.0),
                Vec2::new(0.0, 0.0),
                Vec2::new(10.0, 0.0),
            ],
            vec![Vec2::new(0.0, -10.0), Vec2::new(0.0, 10.0)],
        ];
        let graph = StreetGraph::build(&streamlines, 0.25);
        assert_eq!(graph.node_count(), 5);
        let centre = graph.find_nearest(Vec2::ZERO, 0.1).unwrap();
        assert_eq!(graph.node_degree(centre), 4);
        assert_eq!(graph.node_by_index(centre).unwrap().node_type, NodeType::Intersection);
    }

    #[test]
    fn input_order_does_not_change_intersections() {
        let streamlines = vec![
            vec![Vec2::new(0.0, 0.0), Vec2::new(30.0, 3.0), Vec2::new(60.0, 0.0)],
            vec![Vec2::new(10.0, -20.0), Vec2::new(12.0, 20.0)],
            vec![Vec2::new(40.0, -20.0), Vec2::new(45.0, 20.0)],
            vec![Vec2::new(0.0, 10.0), Vec2::new(60.0, -10.0)],
        ];
        let mut reversed = streamlines.clone();
        reversed.reverse();
        for line in &mut reversed {
            line.reverse();
        }

        let a = StreetGraph::build(&streamlines, 0.25).intersections();
        let b = StreetGraph::build(&reversed, 0.25).intersections();
        assert_eq!(a.len(), b.len());
        assert!(a.len() >= 4);
        for p in &a {
            assert!(b.iter().any(|q| p.distance(*q) < 0.25), "{p} missing");
        }
    }

    #[test]
    fn closed_loop_has_no_self_intersection() {
        let ring = vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(10.0, 0.0),
            Vec2::new(10.0, 10.0),
            Vec2::new(0.0, 10.0),
            Vec2::new(0.0, 0.0),
        ];
        let graph = StreetGraph::build(&[ring], 0.25);
        assert!(graph.intersections().is_empty());
        assert_eq!(graph.node_count(), 4);
        assert_eq!(graph.edge_count(), 4);
    }

    #[test]
    fn pruning_removes_dead_end_chains() {
        let mut streamlines = cross();
        // Close the cross into a square with a tail
        streamlines.push(vec![
            Vec2::new(10.0, 0.0),
            Vec2::new(10.0, 10.0),
            Vec2::new(0.0, 10.0),
        ]);
        let graph = StreetGraph::build_pruned(&streamlines, 0.25);

        let centre = graph.find_nearest(Vec2::ZERO, 0.1).unwrap();
        assert_eq!(graph.node_degree(centre), 2);
        // Only the square remains
        assert_eq!(graph.edge_count(), 4);
        let tail = graph.find_nearest(Vec2::new(-10.0, 0.0), 0.1).unwrap();
        assert_eq!(graph.node_degree(tail), 0);
    }
}
