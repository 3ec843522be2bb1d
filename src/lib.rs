//! Street network synthesis from tensor fields.
//!
//! Roads are traced as streamlines through a field of local orientations,
//! joined into a planar graph, and the graph's faces become city blocks.

pub mod procgen;
pub mod world;
