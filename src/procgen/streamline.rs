//! Density-controlled streamline placement.
//!
//! Streamlines are seeded, traced in both directions with the RK4 integrator
//! and accepted when long enough. Separation is enforced through one spatial
//! grid per family (major/minor) of every accepted sample point.
//!
//! Reference: Jobard & Lefer 1997 - "Creating Evenly-Spaced Streamlines of
//! Arbitrary Density"

use bevy::prelude::*;
use rand::{rngs::StdRng, Rng, SeedableRng};

use super::error::{self, ConfigError};
use super::geometry::{angle_between, simplify_polyline};
use super::integrator::{FieldIntegrator, Rk4Integrator};
use super::tensor::TensorField;
use crate::world::grid::GridStorage;

/// Streamlines with fewer points are discarded.
pub const MIN_STREAMLINE_POINTS: usize = 6;

/// Configuration for streamline generation.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamlineParams {
    /// Minimum distance between seeds and existing streamlines.
    pub dsep: f32,
    /// A growing streamline stops this close to an existing one.
    pub dtest: f32,
    /// Integration step length.
    pub dstep: f32,
    /// Search radius for joining dangling ends onto existing roads.
    pub dlookahead: f32,
    /// Radius for closing loops and snapping ends.
    pub dcirclejoin: f32,
    /// Max heading change (radians) for a dangling-end join.
    pub joinangle: f32,
    /// Step cap per direction.
    pub path_iterations: usize,
    /// Random seed placements before the layer counts as saturated.
    pub seed_tries: usize,
    pub simplify_tolerance: f32,
    /// Probability that a streamline also stops at the other family.
    pub collide_early: f32,
}

impl Default for StreamlineParams {
    fn default() -> Self {
        Self {
            dsep: 20.0,
            dtest: 15.0,
            dstep: 1.0,
            dlookahead: 40.0,
            dcirclejoin: 5.0,
            joinangle: 0.1,
            path_iterations: 1000,
            seed_tries: 300,
            simplify_tolerance: 0.5,
            collide_early: 0.7,
        }
    }
}

impl StreamlineParams {
    /// Sparse arterial layer.
    pub fn main_roads() -> Self {
        Self {
            dsep: 400.0,
            dtest: 200.0,
            dlookahead: 500.0,
            collide_early: 0.0,
            ..default()
        }
    }

    pub fn major_roads() -> Self {
        Self {
            dsep: 100.0,
            dtest: 30.0,
            dlookahead: 200.0,
            collide_early: 0.0,
            ..default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        error::positive("dsep", self.dsep)?;
        error::positive("dtest", self.dtest)?;
        error::positive("dstep", self.dstep)?;
        error::non_negative("dlookahead", self.dlookahead)?;
        error::non_negative("dcirclejoin", self.dcirclejoin)?;
        error::in_range("joinangle", self.joinangle, 0.0, std::f32::consts::PI)?;
        error::at_least_one("path_iterations", self.path_iterations)?;
        error::at_least_one("seed_tries", self.seed_tries)?;
        error::non_negative("simplify_tolerance", self.simplify_tolerance)?;
        error::in_range("collide_early", self.collide_early, 0.0, 1.0)?;
        if self.dstep > self.dsep {
            return Err(ConfigError::StepExceedsSeparation {
                dstep: self.dstep,
                dsep: self.dsep,
            });
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug)]
struct ParamsSq {
    dsep: f32,
    dtest: f32,
    dlookahead: f32,
    dcirclejoin: f32,
}

impl From<&StreamlineParams> for ParamsSq {
    fn from(params: &StreamlineParams) -> Self {
        Self {
            dsep: params.dsep * params.dsep,
            dtest: params.dtest * params.dtest,
            dlookahead: params.dlookahead * params.dlookahead,
            dcirclejoin: params.dcirclejoin * params.dcirclejoin,
        }
    }
}

/// A complete streamline (sequence of points).
#[derive(Clone, Debug, PartialEq)]
pub struct Streamline {
    pub points: Vec<Vec2>,
    pub major: bool, // true = major eigenvector, false = minor
}

impl Streamline {
    pub fn is_closed(&self) -> bool {
        self.points.len() > 1 && self.points.first() == self.points.last()
    }

    pub fn length(&self) -> f32 {
        self.points.windows(2).map(|w| w[0].distance(w[1])).sum()
    }
}

/// One growing end of a streamline.
struct IntegrationFront {
    seed: Vec2,
    original_dir: Vec2,
    streamline: Vec<Vec2>,
    previous_direction: Vec2,
    previous_point: Vec2,
    valid: bool,
}

/// Seeds and traces streamlines of both families until the domain saturates.
pub struct StreamlineGenerator {
    params: StreamlineParams,
    params_sq: ParamsSq,
    origin: Vec2,
    world_dimensions: Vec2,
    major_grid: GridStorage,
    minor_grid: GridStorage,
    candidate_seeds_major: Vec<Vec2>,
    candidate_seeds_minor: Vec<Vec2>,
    streamlines: Vec<Streamline>,
    simplified: Vec<Vec<Vec2>>,
    streamlines_done: bool,
    major_done: bool,
    minor_done: bool,
    last_streamline_major: bool,
    seed_attempts: usize,
    rng: StdRng,
}

impl StreamlineGenerator {
    pub fn new(
        origin: Vec2,
        world_dimensions: Vec2,
        mut params: StreamlineParams,
        seed: u64,
    ) -> Result<Self, ConfigError> {
        params.validate()?;
        if !(world_dimensions.x > 0.0 && world_dimensions.y > 0.0) {
            return Err(ConfigError::EmptyDomain {
                width: world_dimensions.x,
                height: world_dimensions.y,
            });
        }
        if params.dtest > params.dsep {
            warn!(
                "dtest ({}) exceeds dsep ({}), clamping to dsep",
                params.dtest, params.dsep
            );
            params.dtest = params.dsep;
        }

        let params_sq = ParamsSq::from(&params);
        Ok(Self {
            major_grid: GridStorage::new(origin, params.dsep),
            minor_grid: GridStorage::new(origin, params.dsep),
            params,
            params_sq,
            origin,
            world_dimensions,
            candidate_seeds_major: Vec::new(),
            candidate_seeds_minor: Vec::new(),
            streamlines: Vec::new(),
            simplified: Vec::new(),
            streamlines_done: true,
            major_done: true,
            minor_done: true,
            last_streamline_major: true,
            seed_attempts: 0,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    pub fn params(&self) -> &StreamlineParams {
        &self.params
    }

    /// Every accepted streamline, in acceptance order.
    pub fn streamlines(&self) -> &[Streamline] {
        &self.streamlines
    }

    /// Accepted streamlines after simplification, index-aligned with
    /// [`Self::streamlines`].
    pub fn simplified_streamlines(&self) -> &[Vec<Vec2>] {
        &self.simplified
    }

    pub fn streamlines_of(&self, major: bool) -> impl Iterator<Item = &Streamline> + '_ {
        self.streamlines.iter().filter(move |s| s.major == major)
    }

    pub fn has_roads(&self) -> bool {
        !self.streamlines.is_empty()
    }

    pub fn is_done(&self) -> bool {
        self.streamlines_done
    }

    /// Random seed placements tried since the last [`Self::begin`].
    pub fn seed_attempts(&self) -> usize {
        self.seed_attempts
    }

    /// Points held by both spacing grids, including merged layers.
    pub fn sample_count(&self) -> usize {
        self.major_grid.len() + self.minor_grid.len()
    }

    pub fn clear_streamlines(&mut self) {
        self.major_grid.clear();
        self.minor_grid.clear();
        self.candidate_seeds_major.clear();
        self.candidate_seeds_minor.clear();
        self.streamlines.clear();
        self.simplified.clear();
        self.streamlines_done = true;
        self.major_done = true;
        self.minor_done = true;
    }

    /// Make this generator keep its distance from another layer's output.
    pub fn add_existing_streamlines(&mut self, other: &StreamlineGenerator) {
        self.major_grid.add_all(&other.major_grid);
        self.minor_grid.add_all(&other.minor_grid);
    }

    /// Run to saturation in one call.
    pub fn generate(&mut self, field: &TensorField) {
        self.begin();
        while self.update(field) {}
    }

    /// Arm incremental generation; drive it with [`Self::update`].
    pub fn begin(&mut self) {
        self.streamlines_done = false;
        self.major_done = false;
        self.minor_done = false;
        self.seed_attempts = 0;
    }

    /// Grow at most one streamline. Returns whether more work remains.
    ///
    /// Families take turns until one runs out of seeds; the other then
    /// continues alone until it runs out too.
    pub fn update(&mut self, field: &TensorField) -> bool {
        if self.streamlines_done {
            return false;
        }

        let major = match (self.major_done, self.minor_done) {
            (true, _) => false,
            (false, true) => true,
            (false, false) => !self.last_streamline_major,
        };
        self.last_streamline_major = major;

        if !self.create_streamline(field, major) {
            if major {
                self.major_done = true;
            } else {
                self.minor_done = true;
            }
        }

        if self.major_done && self.minor_done {
            self.streamlines_done = true;
            self.join_dangling_streamlines(field);
            info!(
                "Streamlines saturated: {} major, {} minor after {} seed attempts",
                self.streamlines_of(true).count(),
                self.streamlines_of(false).count(),
                self.seed_attempts
            );
        }

        !self.streamlines_done
    }

    /// Accept a traced or externally supplied polyline.
    pub fn add_streamline(&mut self, streamline: Streamline) {
        self.grid_mut(streamline.major).add_polyline(&streamline.points);

        if !streamline.is_closed() {
            if let (Some(&first), Some(&last)) =
                (streamline.points.first(), streamline.points.last())
            {
                // The final overshoot step often lies outside the domain
                let ends: Vec<Vec2> = [first, last]
                    .into_iter()
                    .filter(|&p| self.point_in_bounds(p))
                    .collect();
                self.candidate_seeds_mut(!streamline.major).extend(ends);
            }
        }

        self.simplified
            .push(simplify_polyline(&streamline.points, self.params.simplify_tolerance));
        self.streamlines.push(streamline);
    }

    /// Whether `point` could start a new streamline of the given family.
    pub fn seed_is_valid(&self, field: &TensorField, point: Vec2, major: bool) -> bool {
        let integrator = Rk4Integrator::new(field, self.params.dstep);
        self.is_valid_seed(&integrator, major, point)
    }

    /// Trace a streamline through `seed` without accepting it.
    pub fn trace(&mut self, field: &TensorField, seed: Vec2, major: bool) -> Vec<Vec2> {
        let integrator = Rk4Integrator::new(field, self.params.dstep);
        self.integrate_streamline(&integrator, seed, major)
    }

    /// Accept one streamline. Returns false once the seed queue and
    /// `seed_tries` random attempts are used up without one.
    ///
    /// Random seeds whose streamline comes out too short count against the
    /// same `seed_tries`.
    fn create_streamline(&mut self, field: &TensorField, major: bool) -> bool {
        let integrator = Rk4Integrator::new(field, self.params.dstep);
        let mut tries_left = self.params.seed_tries;

        while let Some(seed) = self.get_seed(&integrator, major, &mut tries_left) {
            let points = self.integrate_streamline(&integrator, seed, major);
            if points.len() >= MIN_STREAMLINE_POINTS {
                self.add_streamline(Streamline { points, major });
                return true;
            }
        }

        false
    }

    /// Endpoints of the other family first, then random points while
    /// `tries_left` lasts.
    fn get_seed(
        &mut self,
        integrator: &impl FieldIntegrator,
        major: bool,
        tries_left: &mut usize,
    ) -> Option<Vec2> {
        while let Some(seed) = self.candidate_seeds_mut(major).pop() {
            if self.is_valid_seed(integrator, major, seed) {
                return Some(seed);
            }
        }

        while *tries_left > 0 {
            *tries_left -= 1;
            self.seed_attempts += 1;
            let seed = self.sample_point();
            if self.is_valid_seed(integrator, major, seed) {
                return Some(seed);
            }
        }

        None
    }

    /// In the domain, `dsep` clear of its family, and somewhere the field
    /// has a direction.
    fn is_valid_seed(&self, integrator: &impl FieldIntegrator, major: bool, point: Vec2) -> bool {
        self.point_in_bounds(point)
            && self.is_valid_sample(integrator, major, point, self.params_sq.dsep, false)
            && integrator.integrate(point, Vec2::ZERO, major).is_some()
    }

    fn sample_point(&mut self) -> Vec2 {
        let t = Vec2::new(self.rng.gen::<f32>(), self.rng.gen::<f32>());
        self.origin + t * self.world_dimensions
    }

    fn is_valid_sample(
        &self,
        integrator: &impl FieldIntegrator,
        major: bool,
        point: Vec2,
        d_sq: f32,
        both_grids: bool,
    ) -> bool {
        let mut grid_valid = self.grid(major).is_valid_sample(point, d_sq);
        if both_grids {
            grid_valid = grid_valid && self.grid(!major).is_valid_sample(point, d_sq);
        }
        integrator.on_land(point) && grid_valid
    }

    fn integrate_streamline(
        &mut self,
        integrator: &impl FieldIntegrator,
        seed: Vec2,
        major: bool,
    ) -> Vec<Vec2> {
        let collide_both = self.rng.gen::<f32>() < self.params.collide_early;

        let Some(d) = integrator.integrate(seed, Vec2::ZERO, major) else {
            return vec![seed];
        };

        let mut forward = IntegrationFront {
            seed,
            original_dir: d,
            streamline: vec![seed],
            previous_direction: d,
            previous_point: seed + d,
            valid: self.point_in_bounds(seed + d),
        };
        let mut backward = IntegrationFront {
            seed,
            original_dir: -d,
            streamline: Vec::new(),
            previous_direction: -d,
            previous_point: seed - d,
            valid: self.point_in_bounds(seed - d),
        };

        let mut count = 0;
        let mut points_escaped = false;
        while count < self.params.path_iterations && (forward.valid || backward.valid) {
            self.integration_step(integrator, &mut forward, major, collide_both);
            self.integration_step(integrator, &mut backward, major, collide_both);

            // Join up circles
            let sq_distance = forward
                .previous_point
                .distance_squared(backward.previous_point);
            if !points_escaped && sq_distance > self.params_sq.dcirclejoin {
                points_escaped = true;
            }
            if points_escaped && sq_distance <= self.params_sq.dcirclejoin {
                forward.streamline.push(forward.previous_point);
                forward.streamline.push(backward.previous_point);
                backward.streamline.push(backward.previous_point);
                break;
            }

            count += 1;
        }

        let mut points = backward.streamline;
        points.reverse();
        points.extend(forward.streamline);
        points
    }

    fn integration_step(
        &self,
        integrator: &impl FieldIntegrator,
        front: &mut IntegrationFront,
        major: bool,
        collide_both: bool,
    ) {
        if !front.valid {
            return;
        }

        front.streamline.push(front.previous_point);

        // Stop at degenerate point
        let Some(next_direction) =
            integrator.integrate(front.previous_point, front.previous_direction, major)
        else {
            front.valid = false;
            return;
        };

        let next_point = front.previous_point + next_direction;
        if self.point_in_bounds(next_point)
            && self.is_valid_sample(
                integrator,
                major,
                next_point,
                self.params_sq.dtest,
                collide_both,
            )
            && !streamline_turned(front.seed, front.original_dir, next_point, next_direction)
        {
            front.previous_point = next_point;
            front.previous_direction = next_direction;
        } else {
            // One more step
            front.streamline.push(next_point);
            front.valid = false;
        }
    }

    /// Extend open ends onto nearby roads ahead of them.
    fn join_dangling_streamlines(&mut self, field: &TensorField) {
        let integrator = Rk4Integrator::new(field, self.params.dstep);

        for i in 0..self.streamlines.len() {
            let (points, major) = {
                let s = &self.streamlines[i];
                if s.points.len() < 5 || s.is_closed() {
                    continue;
                }
                (s.points.clone(), s.major)
            };
            let last = points.len() - 1;

            let mut prefix = Vec::new();
            if let Some(new_start) = self.best_next_point(points[0], points[4]) {
                prefix = self.points_between(&integrator, points[0], new_start);
                prefix.reverse();
            }

            let mut suffix = Vec::new();
            if let Some(new_end) = self.best_next_point(points[last], points[last - 4]) {
                suffix = self.points_between(&integrator, points[last], new_end);
            }

            if prefix.is_empty() && suffix.is_empty() {
                continue;
            }

            let grid = self.grid_mut(major);
            grid.add_polyline(&prefix);
            grid.add_polyline(&suffix);

            let streamline = &mut self.streamlines[i];
            prefix.extend_from_slice(&streamline.points);
            prefix.extend(suffix);
            streamline.points = prefix;
            self.simplified[i] =
                simplify_polyline(&streamline.points, self.params.simplify_tolerance);
        }
    }

    /// The existing sample an end at `point` should grow into, if any.
    ///
    /// Anything ahead within `dcirclejoin` is taken immediately; otherwise the
    /// closest sample within `dlookahead` and `joinangle` of the heading. The
    /// target is pushed past the sample so the junction survives
    /// simplification.
    fn best_next_point(&self, point: Vec2, previous_point: Vec2) -> Option<Vec2> {
        let mut nearby = self.major_grid.query_radius(point, self.params.dlookahead);
        nearby.extend(self.minor_grid.query_radius(point, self.params.dlookahead));

        let direction = point - previous_point;
        let mut closest = None;
        let mut closest_distance = f32::INFINITY;

        for sample in nearby {
            if sample == point || sample == previous_point {
                continue;
            }

            let difference = sample - point;
            if difference.dot(direction) < 0.0 {
                // Backwards
                continue;
            }

            let distance_sq = point.distance_squared(sample);
            if distance_sq > self.params_sq.dlookahead {
                continue;
            }
            if distance_sq < self.params_sq.dcirclejoin {
                closest = Some(sample);
                break;
            }

            let angle = angle_between(direction, difference).abs();
            if angle < self.params.joinangle && distance_sq < closest_distance {
                closest_distance = distance_sq;
                closest = Some(sample);
            }
        }

        closest.map(|c| c + direction.normalize_or_zero() * self.params.simplify_tolerance * 4.0)
    }

    /// Evenly spaced points from `v1` (exclusive) to `v2`, cut short at the
    /// first degenerate one.
    fn points_between(&self, integrator: &impl FieldIntegrator, v1: Vec2, v2: Vec2) -> Vec<Vec2> {
        let n_points = (v1.distance(v2) / self.params.dstep).floor() as usize;
        let step = v2 - v1;

        let mut out = Vec::with_capacity(n_points);
        for i in 1..=n_points {
            let next = v1 + step * (i as f32 / n_points as f32);
            if integrator.integrate(next, Vec2::ZERO, true).is_none() {
                break;
            }
            out.push(next);
        }
        out
    }

    fn point_in_bounds(&self, v: Vec2) -> bool {
        let max = self.origin + self.world_dimensions;
        v.x >= self.origin.x && v.y >= self.origin.y && v.x < max.x && v.y < max.y
    }

    fn grid(&self, major: bool) -> &GridStorage {
        if major {
            &self.major_grid
        } else {
            &self.minor_grid
        }
    }

    fn grid_mut(&mut self, major: bool) -> &mut GridStorage {
        if major {
            &mut self.major_grid
        } else {
            &mut self.minor_grid
        }
    }

    fn candidate_seeds_mut(&mut self, major: bool) -> &mut Vec<Vec2> {
        if major {
            &mut self.candidate_seeds_major
        } else {
            &mut self.candidate_seeds_minor
        }
    }
}

/// Whether a front has swung back past the seed, as when spiralling inward.
fn streamline_turned(seed: Vec2, original_dir: Vec2, point: Vec2, direction: Vec2) -> bool {
    if original_dir.dot(direction) < 0.0 {
        let perpendicular = Vec2::new(original_dir.y, -original_dir.x);
        let is_left = (point - seed).dot(perpendicular) < 0.0;
        let direction_up = direction.dot(perpendicular) > 0.0;
        return is_left == direction_up;
    }

    false
}
