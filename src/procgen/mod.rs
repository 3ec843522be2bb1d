//! Procedural generation systems.
//!
//! - Tensor fields and streamline integration for road networks
//! - Planar street graphs built from the streamlines
//! - Block polygons found in the street graph

use bevy::prelude::*;

pub mod error;
pub mod geometry;
pub mod graph;
pub mod integrator;
pub mod polygon_finder;
pub mod road_generator;
pub mod streamline;
pub mod tensor;

pub struct ProcgenPlugin;

impl Plugin for ProcgenPlugin {
    fn build(&self, app: &mut App) {
        app.add_plugins(tensor::TensorFieldPlugin)
            .add_plugins(road_generator::RoadGeneratorPlugin);
    }
}
