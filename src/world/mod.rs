//! World domain and spatial partitioning.

use bevy::prelude::*;

pub mod grid;

pub struct WorldPlugin;

impl Plugin for WorldPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<WorldConfig>();
    }
}

/// Global world configuration.
#[derive(Resource, Clone, Debug)]
pub struct WorldConfig {
    /// Lower-left corner of the generation domain.
    pub origin: Vec2,
    /// World size in meters.
    pub size: Vec2,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            origin: Vec2::new(-500.0, -500.0),
            size: Vec2::new(1000.0, 1000.0),
        }
    }
}

impl WorldConfig {
    pub fn bounds(&self) -> Rect {
        Rect::from_corners(self.origin, self.origin + self.size)
    }

    pub fn center(&self) -> Vec2 {
        self.origin + self.size * 0.5
    }
}
