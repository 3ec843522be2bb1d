//! Closed-region extraction from the street graph.
//!
//! Faces are found by walking the graph and always taking the rightmost
//! turn. Bounded faces come out clockwise; the unbounded outer face comes out
//! counter-clockwise and is discarded.

use std::collections::{HashSet, VecDeque};
use std::f32::consts::TAU;

use bevy::prelude::*;

use super::error::{self, ConfigError};
use super::geometry::{
    angle_between, compute_obb, is_simple_polygon, polygon_area, polygon_centroid,
    shrink_polygon, signed_area,
};
use super::graph::StreetGraph;
use super::tensor::TensorField;

/// Configuration for polygon extraction.
#[derive(Clone, Debug, PartialEq)]
pub struct PolygonParams {
    /// Maximum number of nodes in a ring.
    pub max_length: usize,
    pub min_area: f32,
    /// Inward offset applied to every accepted ring.
    pub shrink_spacing: f32,
    pub max_aspect_ratio: f32,
}

impl Default for PolygonParams {
    fn default() -> Self {
        Self::blocks()
    }
}

impl PolygonParams {
    pub fn parks() -> Self {
        Self {
            max_length: 20,
            min_area: 80.0,
            shrink_spacing: 4.0,
            max_aspect_ratio: 5.0,
        }
    }

    pub fn blocks() -> Self {
        Self {
            max_length: 20,
            min_area: 50.0,
            shrink_spacing: 4.0,
            max_aspect_ratio: 5.0,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        error::at_least_one("max_length", self.max_length)?;
        error::non_negative("min_area", self.min_area)?;
        error::non_negative("shrink_spacing", self.shrink_spacing)?;
        error::positive("max_aspect_ratio", self.max_aspect_ratio)
    }
}

/// Finds block polygons in a street graph.
pub struct PolygonFinder {
    params: PolygonParams,
    positions: Vec<Vec2>,
    adjacency: Vec<Vec<usize>>,
    polygons: Vec<Vec<Vec2>>,
    shrunk_polygons: Vec<Vec<Vec2>>,
    to_shrink: VecDeque<Vec<Vec2>>,
}

impl PolygonFinder {
    pub fn new(graph: &StreetGraph, params: PolygonParams) -> Result<Self, ConfigError> {
        params.validate()?;

        let positions = graph.nodes().map(|(_, node)| node.position).collect();
        let adjacency = graph
            .nodes()
            .map(|(idx, _)| graph.neighbors(idx).map(|n| n.index()).collect())
            .collect();

        Ok(Self {
            params,
            positions,
            adjacency,
            polygons: Vec::new(),
            shrunk_polygons: Vec::new(),
            to_shrink: VecDeque::new(),
        })
    }

    pub fn params(&self) -> &PolygonParams {
        &self.params
    }

    /// Accepted rings, counter-clockwise.
    pub fn polygons(&self) -> &[Vec<Vec2>] {
        &self.polygons
    }

    /// Rings that survived shrinking so far.
    pub fn shrunk_polygons(&self) -> &[Vec<Vec2>] {
        &self.shrunk_polygons
    }

    /// Walk every face of the graph and keep the bounded ones that pass the
    /// area and aspect filters. With a field, rings centred in water or in a
    /// park are dropped too. Queues every accepted ring for shrinking.
    pub fn find_polygons(&mut self, field: Option<&TensorField>) -> &[Vec<Vec2>] {
        self.polygons.clear();
        self.shrunk_polygons.clear();
        self.to_shrink.clear();

        let mut used: HashSet<(usize, usize)> = HashSet::new();
        for start in 0..self.adjacency.len() {
            for &first in &self.adjacency[start] {
                if used.contains(&(start, first)) {
                    continue;
                }
                let Some(ring) = self.walk_face(start, first, &mut used) else {
                    continue;
                };

                let mut vertices: Vec<Vec2> = ring.iter().map(|&i| self.positions[i]).collect();
                // Keep bounded faces only
                if signed_area(&vertices) >= 0.0 {
                    continue;
                }
                vertices.reverse();

                if !is_simple_polygon(&vertices) || !self.accepts(&vertices) {
                    continue;
                }
                if let Some(field) = field {
                    let centroid = polygon_centroid(&vertices);
                    if !field.on_land(centroid) || field.in_parks(centroid) {
                        continue;
                    }
                }
                self.polygons.push(vertices);
            }
        }

        self.to_shrink = self.polygons.iter().cloned().collect();
        debug!("Found {} polygons", self.polygons.len());
        &self.polygons
    }

    /// Shrink one queued ring. Returns false once the queue is empty.
    pub fn update(&mut self) -> bool {
        let Some(ring) = self.to_shrink.pop_front() else {
            return false;
        };

        if let Some(shrunk) = shrink_polygon(&ring, self.params.shrink_spacing) {
            if self.accepts(&shrunk) {
                self.shrunk_polygons.push(shrunk);
            }
        }
        true
    }

    /// Shrink everything still queued.
    pub fn shrink(&mut self) -> &[Vec<Vec2>] {
        while self.update() {}
        &self.shrunk_polygons
    }

    pub fn is_shrinking(&self) -> bool {
        !self.to_shrink.is_empty()
    }

    pub fn reset(&mut self) {
        self.polygons.clear();
        self.shrunk_polygons.clear();
        self.to_shrink.clear();
    }

    fn accepts(&self, vertices: &[Vec2]) -> bool {
        polygon_area(vertices) >= self.params.min_area
            && compute_obb(vertices).aspect_ratio() <= self.params.max_aspect_ratio
    }

    /// Follow rightmost turns from the directed edge `start -> first` until the
    /// walk gets back to it. Every directed edge walked is marked used.
    fn walk_face(
        &self,
        start: usize,
        first: usize,
        used: &mut HashSet<(usize, usize)>,
    ) -> Option<Vec<usize>> {
        used.insert((start, first));
        let mut ring = vec![start];
        let (mut prev, mut cur) = (start, first);

        loop {
            let next = self.rightmost_neighbor(prev, cur)?;
            if cur == start && next == first {
                return Some(ring);
            }
            ring.push(cur);
            if ring.len() > self.params.max_length || !used.insert((cur, next)) {
                return None;
            }
            prev = cur;
            cur = next;
        }
    }

    /// The neighbour of `cur` reached by the smallest counter-clockwise turn
    /// from the edge back to `prev`. Going back to `prev` is the last resort.
    fn rightmost_neighbor(&self, prev: usize, cur: usize) -> Option<usize> {
        let origin = self.positions[cur];
        let back = self.positions[prev] - origin;

        self.adjacency[cur]
            .iter()
            .map(|&n| {
                let angle = angle_between(back, self.positions[n] - origin);
                let ccw = if angle <= 0.0 || n == prev {
                    angle + TAU
                } else {
                    angle
                };
                (n, ccw)
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(n, _)| n)
    }
}
