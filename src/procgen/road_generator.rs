//! Road network generator using tensor fields and streamline integration.
//!
//! Creates city road layouts in phases:
//! 1. Main roads traced through the tensor field
//! 2. Major roads, after which parks are picked from the enclosed polygons
//! 3. Minor roads avoiding both layers above
//! 4. Blocks found in the graph of every layer and shrunk inward

use bevy::prelude::*;
use bevy::utils::{Duration, Instant};
use rand::{rngs::StdRng, Rng, SeedableRng};

use super::error::ConfigError;
use super::graph::StreetGraph;
use super::polygon_finder::{PolygonFinder, PolygonParams};
use super::streamline::{StreamlineGenerator, StreamlineParams};
use super::tensor::{BasisField, NoiseParams, TensorField};
use crate::world::WorldConfig;

/// Configuration for city generation.
#[derive(Resource, Clone, Debug)]
pub struct CityConfig {
    pub main: StreamlineParams,
    pub major: StreamlineParams,
    pub minor: StreamlineParams,
    pub parks: PolygonParams,
    pub blocks: PolygonParams,
    /// How many of the major-road polygons become parks.
    pub num_parks: usize,
    /// Spread the work over frames instead of finishing in one.
    pub animate: bool,
    /// Work allowed per frame when animating.
    pub frame_budget: Duration,
    /// Contributors the tensor field is built from.
    pub basis_fields: Vec<BasisField>,
    pub noise: NoiseParams,
    pub smooth: bool,
    pub seed: u64,
}

impl Default for CityConfig {
    fn default() -> Self {
        Self {
            main: StreamlineParams::main_roads(),
            major: StreamlineParams::major_roads(),
            minor: StreamlineParams::default(),
            parks: PolygonParams::parks(),
            blocks: PolygonParams::blocks(),
            num_parks: 2,
            animate: true,
            frame_budget: Duration::from_millis(30),
            basis_fields: vec![
                // Suburban grid
                BasisField::Grid {
                    centre: Vec2::new(200.0, 150.0),
                    size: 1200.0,
                    decay: 2.0,
                    theta: 0.3,
                },
                // Old town, rotated against the suburbs
                BasisField::Grid {
                    centre: Vec2::new(-250.0, -200.0),
                    size: 500.0,
                    decay: 2.0,
                    theta: 1.2,
                },
                // Downtown ring roads
                BasisField::Radial {
                    centre: Vec2::ZERO,
                    size: 300.0,
                    decay: 3.0,
                },
            ],
            noise: NoiseParams::default(),
            smooth: false,
            seed: 42,
        }
    }
}

impl CityConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.main.validate()?;
        self.major.validate()?;
        self.minor.validate()?;
        self.parks.validate()?;
        self.blocks.validate()?;
        for field in &self.basis_fields {
            field.validate()?;
        }
        Ok(())
    }
}

/// Generation phases, in order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    MainRoads,
    MajorRoads,
    MinorRoads,
    Blocks,
    Done,
}

/// Drives every layer of a city from an empty field to shrunk blocks.
///
/// Each phase reads the finished output of the phases before it and clears
/// everything downstream when it starts.
#[derive(Resource)]
pub struct CityPipeline {
    phase: Phase,
    phase_started: bool,
    main: StreamlineGenerator,
    major: StreamlineGenerator,
    minor: StreamlineGenerator,
    park_params: PolygonParams,
    block_params: PolygonParams,
    num_parks: usize,
    graph_tolerance: f32,
    parks: Vec<Vec<Vec2>>,
    intersections: Vec<Vec2>,
    blocks: Option<PolygonFinder>,
    rng: StdRng,
}

impl CityPipeline {
    pub fn new(config: &CityConfig, world: &WorldConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let layer = |params: &StreamlineParams, offset: u64| {
            StreamlineGenerator::new(
                world.origin,
                world.size,
                params.clone(),
                config.seed.wrapping_add(offset),
            )
        };

        Ok(Self {
            phase: Phase::MainRoads,
            phase_started: false,
            main: layer(&config.main, 0)?,
            major: layer(&config.major, 1)?,
            minor: layer(&config.minor, 2)?,
            park_params: config.parks.clone(),
            block_params: config.blocks.clone(),
            num_parks: config.num_parks,
            graph_tolerance: config.minor.dstep * 0.25,
            parks: Vec::new(),
            intersections: Vec::new(),
            blocks: None,
            rng: StdRng::seed_from_u64(config.seed.wrapping_add(3)),
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    pub fn main_roads(&self) -> &StreamlineGenerator {
        &self.main
    }

    pub fn major_roads(&self) -> &StreamlineGenerator {
        &self.major
    }

    pub fn minor_roads(&self) -> &StreamlineGenerator {
        &self.minor
    }

    pub fn has_roads(&self) -> bool {
        self.main.has_roads() || self.major.has_roads() || self.minor.has_roads()
    }

    pub fn parks(&self) -> &[Vec<Vec2>] {
        &self.parks
    }

    /// Crossings of the main and major roads.
    pub fn intersections(&self) -> &[Vec2] {
        &self.intersections
    }

    /// Shrunk block polygons found so far.
    pub fn blocks(&self) -> &[Vec<Vec2>] {
        match &self.blocks {
            Some(finder) => finder.shrunk_polygons(),
            None => &[],
        }
    }

    /// Simplified polylines of every layer.
    pub fn all_streamlines(&self) -> Vec<Vec<Vec2>> {
        [&self.main, &self.major, &self.minor]
            .iter()
            .flat_map(|layer| layer.simplified_streamlines().iter().cloned())
            .collect()
    }

    /// Start over from the main roads on the next step.
    pub fn reset(&mut self) {
        self.phase = Phase::MainRoads;
        self.phase_started = false;
    }

    /// Do units of work until `budget` is spent. Returns whether work remains.
    pub fn step(&mut self, field: &mut TensorField, budget: Duration) -> bool {
        let start = Instant::now();
        loop {
            if !self.advance(field) {
                return false;
            }
            if start.elapsed() >= budget {
                return true;
            }
        }
    }

    /// Run every remaining phase to completion.
    pub fn generate(&mut self, field: &mut TensorField) {
        while self.advance(field) {}
    }

    /// One unit of work: a streamline, a phase transition, or one block shrink.
    fn advance(&mut self, field: &mut TensorField) -> bool {
        if !self.phase_started {
            self.enter_phase(field);
            self.phase_started = true;
        }

        let phase_finished = match self.phase {
            Phase::MainRoads => !self.main.update(field),
            Phase::MajorRoads => !self.major.update(field),
            Phase::MinorRoads => !self.minor.update(field),
            Phase::Blocks => !self.blocks.as_mut().is_some_and(|finder| finder.update()),
            Phase::Done => return false,
        };

        if phase_finished {
            self.finish_phase(field);
            self.phase = match self.phase {
                Phase::MainRoads => Phase::MajorRoads,
                Phase::MajorRoads => Phase::MinorRoads,
                Phase::MinorRoads => Phase::Blocks,
                Phase::Blocks | Phase::Done => Phase::Done,
            };
            self.phase_started = false;
            debug!("Entering phase {:?}", self.phase);
        }

        !self.is_done()
    }

    fn enter_phase(&mut self, field: &mut TensorField) {
        match self.phase {
            Phase::MainRoads => {
                self.major.clear_streamlines();
                self.minor.clear_streamlines();
                self.clear_parks(field);
                self.blocks = None;
                self.intersections.clear();
                field.ignore_river = true;

                self.main.clear_streamlines();
                self.main.begin();
            }
            Phase::MajorRoads => {
                self.minor.clear_streamlines();
                self.clear_parks(field);
                self.blocks = None;
                field.ignore_river = true;

                self.major.clear_streamlines();
                self.major.add_existing_streamlines(&self.main);
                self.major.begin();
            }
            Phase::MinorRoads => {
                self.blocks = None;

                // The major grids already hold the main roads
                self.minor.clear_streamlines();
                self.minor.add_existing_streamlines(&self.major);
                self.minor.begin();
            }
            Phase::Blocks => {
                let graph = StreetGraph::build_pruned(&self.all_streamlines(), self.graph_tolerance);
                match PolygonFinder::new(&graph, self.block_params.clone()) {
                    Ok(mut finder) => {
                        finder.find_polygons(Some(&*field));
                        self.blocks = Some(finder);
                    }
                    Err(e) => error!("Block extraction skipped: {e}"),
                }
            }
            Phase::Done => {}
        }
    }

    fn finish_phase(&mut self, field: &mut TensorField) {
        match self.phase {
            Phase::MainRoads => {
                field.ignore_river = false;
                info!("Main roads: {} streamlines", self.main.streamlines().len());
            }
            Phase::MajorRoads => {
                field.ignore_river = false;
                info!("Major roads: {} streamlines", self.major.streamlines().len());
                self.place_parks(field);
            }
            Phase::MinorRoads => {
                info!("Minor roads: {} streamlines", self.minor.streamlines().len());
            }
            Phase::Blocks => {
                info!("City complete: {} blocks", self.blocks().len());
            }
            Phase::Done => {}
        }
    }

    fn clear_parks(&mut self, field: &mut TensorField) {
        self.parks.clear();
        field.parks.clear();
    }

    /// Turn a run of the polygons enclosed by main and major roads into parks.
    fn place_parks(&mut self, field: &mut TensorField) {
        let streamlines: Vec<Vec<Vec2>> = self
            .main
            .simplified_streamlines()
            .iter()
            .chain(self.major.simplified_streamlines())
            .cloned()
            .collect();
        let graph = StreetGraph::build(&streamlines, self.graph_tolerance);
        self.intersections = graph.intersections();

        let mut finder = match PolygonFinder::new(&graph, self.park_params.clone()) {
            Ok(finder) => finder,
            Err(e) => {
                error!("Park placement skipped: {e}");
                return;
            }
        };
        let polygons = finder.find_polygons(Some(&*field));

        self.parks = if polygons.len() > self.num_parks {
            let first = self.rng.gen_range(0..polygons.len() - self.num_parks);
            polygons[first..first + self.num_parks].to_vec()
        } else {
            polygons.to_vec()
        };
        field.parks = self.parks.clone();
        debug!("Placed {} parks", self.parks.len());
    }
}

/// Event to trigger city generation.
#[derive(Event)]
pub struct GenerateCityEvent;

/// Marker that the city has been generated.
#[derive(Resource, Default)]
pub struct CityGenerated(pub bool);

pub struct RoadGeneratorPlugin;

impl Plugin for RoadGeneratorPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<CityConfig>()
            .init_resource::<CityGenerated>()
            .add_event::<GenerateCityEvent>()
            .add_systems(Startup, trigger_initial_generation)
            .add_systems(
                Update,
                (
                    start_generation_on_event,
                    drive_pipeline.run_if(resource_exists::<CityPipeline>),
                )
                    .chain(),
            );
    }
}

fn trigger_initial_generation(mut events: EventWriter<GenerateCityEvent>) {
    events.send(GenerateCityEvent);
}

fn start_generation_on_event(
    mut commands: Commands,
    mut events: EventReader<GenerateCityEvent>,
    mut tensor_field: ResMut<TensorField>,
    config: Res<CityConfig>,
    world: Res<WorldConfig>,
    mut generated: ResMut<CityGenerated>,
) {
    // Several requests in one frame start one run
    if events.read().count() == 0 {
        return;
    }

    info!("Generating city...");
    match CityPipeline::new(&config, &world) {
        Ok(pipeline) => {
            build_tensor_field(&mut tensor_field, &config);
            commands.insert_resource(pipeline);
            generated.0 = false;
        }
        Err(e) => error!("Invalid city configuration: {e}"),
    }
}

fn drive_pipeline(
    mut pipeline: ResMut<CityPipeline>,
    mut tensor_field: ResMut<TensorField>,
    config: Res<CityConfig>,
    mut generated: ResMut<CityGenerated>,
) {
    if generated.0 {
        return;
    }

    let budget = if config.animate {
        config.frame_budget
    } else {
        Duration::MAX
    };

    if !pipeline.step(&mut tensor_field, budget) {
        generated.0 = true;
        info!(
            "City generation complete: {} streamlines, {} intersections, {} parks, {} blocks",
            pipeline.all_streamlines().len(),
            pipeline.intersections().len(),
            pipeline.parks().len(),
            pipeline.blocks().len()
        );
    }
}

/// Replace the field's contributors with the configured layout.
pub fn build_tensor_field(field: &mut TensorField, config: &CityConfig) {
    field.reset();
    field.set_noise_params(config.noise.clone());
    field.smooth = config.smooth;
    field.basis_fields = config.basis_fields.clone();
}
