//! streetgen - headless city street generator
//!
//! Runs the generation pipeline inside a Bevy app and exits once every
//! phase has finished.

use bevy::log::LogPlugin;
use bevy::prelude::*;

use tensor_streets::procgen::road_generator::{CityGenerated, CityPipeline};
use tensor_streets::procgen::ProcgenPlugin;
use tensor_streets::world::WorldPlugin;

fn main() {
    App::new()
        .add_plugins(MinimalPlugins)
        .add_plugins(LogPlugin::default())
        // World management
        .add_plugins(WorldPlugin)
        // Procedural generation
        .add_plugins(ProcgenPlugin)
        .add_systems(Update, exit_when_generated)
        .run();
}

fn exit_when_generated(
    generated: Res<CityGenerated>,
    pipeline: Option<Res<CityPipeline>>,
    mut exit: EventWriter<AppExit>,
) {
    if !generated.0 {
        return;
    }

    if let Some(pipeline) = pipeline {
        for (name, layer) in [
            ("main", pipeline.main_roads()),
            ("major", pipeline.major_roads()),
            ("minor", pipeline.minor_roads()),
        ] {
            let length: f32 = layer.streamlines().iter().map(|s| s.length()).sum();
            info!(
                "{name} roads: {} streamlines, {:.0} m",
                layer.streamlines().len(),
                length
            );
        }
    }

    exit.send(AppExit::Success);
}
