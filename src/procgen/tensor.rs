//! Tensor field implementation for road network generation.
//!
//! Reference: Chen et al. 2008 - "Interactive Procedural Street Modeling"
//! https://www.sci.utah.edu/~chengu/street_sig08/street_sig08.pdf

use std::f32::consts::PI;

use bevy::prelude::*;
use noise::{NoiseFn, Perlin};

use super::error::{self, ConfigError};
use super::geometry::{point_in_polygon, segment_distance_squared};

pub struct TensorFieldPlugin;

impl Plugin for TensorFieldPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<TensorField>();
    }
}

/// An undirected orientation plus a magnitude.
///
/// The orientation θ is stored doubled: `matrix = r * [cos 2θ, sin 2θ]`, which
/// maps θ and θ + π onto the same point so tensors can be summed. θ itself is
/// cached and recomputed on the first read after a mutation.
#[derive(Clone, Copy, Debug)]
pub struct Tensor {
    r: f32,
    matrix: [f32; 2],
    theta: f32,
    stale: bool,
}

impl Tensor {
    pub fn new(r: f32, matrix: [f32; 2]) -> Self {
        Self {
            r,
            matrix,
            theta: 0.0,
            stale: true,
        }
    }

    /// The degenerate tensor: no orientation.
    pub fn zero() -> Self {
        Self::new(0.0, [0.0, 0.0])
    }

    /// Create a tensor from an angle (radians) with unit magnitude.
    pub fn from_angle(theta: f32) -> Self {
        Self::new(1.0, [(2.0 * theta).cos(), (2.0 * theta).sin()])
    }

    /// Create a tensor aligned to a direction vector.
    pub fn from_direction(dir: Vec2) -> Self {
        Self::from_angle(dir.y.atan2(dir.x))
    }

    pub fn magnitude(&self) -> f32 {
        self.r
    }

    pub fn matrix(&self) -> [f32; 2] {
        self.matrix
    }

    pub fn is_degenerate(&self) -> bool {
        self.r == 0.0
    }

    /// Orientation in `[0, π)`. Zero for a degenerate tensor.
    pub fn theta(&mut self) -> f32 {
        if self.stale {
            self.theta = self.calculate_theta();
            self.stale = false;
        }
        self.theta
    }

    /// Accumulate another tensor by summing the doubled-angle components.
    /// The magnitude becomes the length of the summed pair.
    pub fn add(&mut self, other: &Tensor) -> &mut Self {
        self.matrix[0] += other.matrix[0];
        self.matrix[1] += other.matrix[1];
        self.r = self.matrix[0].hypot(self.matrix[1]);
        self.stale = true;
        self
    }

    /// Multiply the magnitude by a non-negative factor.
    pub fn scale(&mut self, factor: f32) -> &mut Self {
        self.r *= factor;
        self.matrix[0] *= factor;
        self.matrix[1] *= factor;
        self.stale = true;
        self
    }

    /// Rotate the orientation by `delta` radians.
    ///
    /// Exactly zero is a no-op. The result wraps back into `[0, π)`; for
    /// `|delta| < π` that is a single add or subtract of π.
    pub fn rotate(&mut self, delta: f32) -> &mut Self {
        if delta == 0.0 {
            return self;
        }

        let mut theta = self.theta() + delta;
        if theta < 0.0 {
            theta += PI;
        }
        if theta >= PI {
            theta -= PI;
        }
        if !(0.0..PI).contains(&theta) {
            theta = wrap_half_turn(theta);
        }

        self.matrix[0] = (2.0 * theta).cos() * self.r;
        self.matrix[1] = (2.0 * theta).sin() * self.r;
        self.theta = theta;
        self.stale = false;
        self
    }

    /// Get the major eigenvector (primary road direction).
    pub fn major(&mut self) -> Vec2 {
        // Degenerate case
        if self.r == 0.0 {
            return Vec2::ZERO;
        }
        Vec2::from_angle(self.theta())
    }

    /// Get the minor eigenvector (cross-street direction).
    pub fn minor(&mut self) -> Vec2 {
        if self.r == 0.0 {
            return Vec2::ZERO;
        }
        Vec2::from_angle(self.theta() + PI / 2.0)
    }

    fn calculate_theta(&self) -> f32 {
        if self.r == 0.0 {
            return 0.0;
        }
        let theta = (self.matrix[1] / self.r).atan2(self.matrix[0] / self.r) / 2.0;
        wrap_half_turn(theta)
    }
}

fn wrap_half_turn(theta: f32) -> f32 {
    let wrapped = theta.rem_euclid(PI);
    // rem_euclid can round up onto the excluded end
    if wrapped >= PI {
        0.0
    } else {
        wrapped
    }
}

/// Types of basis fields that compose the tensor field.
#[derive(Clone, Debug)]
pub enum BasisField {
    /// Uniform grid at a fixed angle around a centre.
    Grid {
        centre: Vec2,
        size: f32,
        decay: f32,
        theta: f32,
    },
    /// Ring roads around a centre; the minor direction points at it.
    Radial { centre: Vec2, size: f32, decay: f32 },
    /// Field aligned to a polyline (coastline, river bank).
    Boundary {
        points: Vec<Vec2>,
        size: f32,
        decay: f32,
    },
}

impl BasisField {
    /// Sample the basis field at a point.
    pub fn sample(&self, pos: Vec2) -> Tensor {
        match self {
            BasisField::Grid { theta, .. } => Tensor::from_angle(*theta),
            BasisField::Radial { centre, .. } => {
                let t = pos - *centre;
                if t.length_squared() < 0.0001 {
                    return Tensor::zero();
                }
                // Doubled angle of the tangent, t rotated by a quarter turn
                let c = t.y * t.y - t.x * t.x;
                let s = -2.0 * t.x * t.y;
                let len = c.hypot(s);
                Tensor::new(1.0, [c / len, s / len])
            }
            BasisField::Boundary { points, .. } => {
                match Self::closest_segment(points, pos) {
                    Some((_, dir)) if dir != Vec2::ZERO => Tensor::from_direction(dir),
                    _ => Tensor::zero(),
                }
            }
        }
    }

    /// Sample scaled by the distance weight.
    pub fn weighted_sample(&self, pos: Vec2, smooth: bool) -> Tensor {
        let mut tensor = self.sample(pos);
        tensor.scale(self.weight(pos, smooth));
        tensor
    }

    /// Falloff with normalised distance `d = dist / size`: `max(0, 1 - d)^decay`,
    /// or `d^-decay` when smoothing.
    pub fn weight(&self, pos: Vec2, smooth: bool) -> f32 {
        let (distance, size, decay) = match self {
            BasisField::Grid {
                centre,
                size,
                decay,
                ..
            }
            | BasisField::Radial {
                centre,
                size,
                decay,
            } => (pos.distance(*centre), *size, *decay),
            BasisField::Boundary {
                points,
                size,
                decay,
            } => match Self::closest_segment(points, pos) {
                Some((dist, _)) => (dist, *size, *decay),
                None => return 0.0,
            },
        };

        let norm_distance = distance / size;
        if smooth {
            return norm_distance.max(1e-6).powf(-decay);
        }
        if decay == 0.0 && norm_distance >= 1.0 {
            return 0.0;
        }
        (1.0 - norm_distance).max(0.0).powf(decay)
    }

    /// Sizes must be positive for the distance weight to be defined.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let (size, decay) = match self {
            BasisField::Grid { size, decay, .. }
            | BasisField::Radial { size, decay, .. }
            | BasisField::Boundary { size, decay, .. } => (*size, *decay),
        };
        error::positive("size", size)?;
        error::non_negative("decay", decay)
    }

    pub fn is_boundary(&self) -> bool {
        matches!(self, BasisField::Boundary { .. })
    }

    /// Distance to and direction of the nearest polyline segment.
    fn closest_segment(points: &[Vec2], pos: Vec2) -> Option<(f32, Vec2)> {
        points
            .windows(2)
            .map(|w| {
                let dist = segment_distance_squared(pos, w[0], w[1]).sqrt();
                (dist, (w[1] - w[0]).normalize_or_zero())
            })
            .min_by(|a, b| a.0.total_cmp(&b.0))
    }
}

/// Rotational noise applied on top of the combined field.
#[derive(Clone, Debug)]
pub struct NoiseParams {
    pub global_noise: bool,
    pub noise_size_park: f32,
    /// Degrees.
    pub noise_angle_park: f32,
    pub noise_size_global: f32,
    /// Degrees.
    pub noise_angle_global: f32,
    pub seed: u32,
}

impl Default for NoiseParams {
    fn default() -> Self {
        Self {
            global_noise: false,
            noise_size_park: 20.0,
            noise_angle_park: 90.0,
            noise_size_global: 30.0,
            noise_angle_global: 20.0,
            seed: 12345,
        }
    }
}

/// The composite tensor field resource.
///
/// Sampling is a pure function of the point and the current contributors
/// and boundary geometry.
#[derive(Resource, Clone)]
pub struct TensorField {
    pub basis_fields: Vec<BasisField>,
    pub noise_params: NoiseParams,
    pub smooth: bool,
    pub parks: Vec<Vec<Vec2>>,
    pub sea: Vec<Vec2>,
    pub river: Vec<Vec2>,
    /// Treat the river as land and skip boundary contributors.
    pub ignore_river: bool,
    noise: Perlin,
}

impl Default for TensorField {
    fn default() -> Self {
        Self::new(NoiseParams::default())
    }
}

impl TensorField {
    pub fn new(noise_params: NoiseParams) -> Self {
        let noise = Perlin::new(noise_params.seed);
        Self {
            basis_fields: Vec::new(),
            noise_params,
            smooth: false,
            parks: Vec::new(),
            sea: Vec::new(),
            river: Vec::new(),
            ignore_river: false,
            noise,
        }
    }

    /// Sample the composite field at a position.
    pub fn sample(&self, pos: Vec2) -> Tensor {
        if !self.on_land(pos) {
            return Tensor::zero();
        }

        if self.basis_fields.is_empty() {
            return Tensor::from_angle(0.0);
        }

        let mut result = Tensor::zero();
        for field in &self.basis_fields {
            if self.ignore_river && field.is_boundary() {
                continue;
            }
            result.add(&field.weighted_sample(pos, self.smooth));
        }

        if self.in_parks(pos) {
            result.rotate(self.rotational_noise(
                pos,
                self.noise_params.noise_size_park,
                self.noise_params.noise_angle_park,
            ));
        }

        if self.noise_params.global_noise {
            result.rotate(self.rotational_noise(
                pos,
                self.noise_params.noise_size_global,
                self.noise_params.noise_angle_global,
            ));
        }

        result
    }

    /// Outside the sea, and outside the river unless it is being ignored.
    pub fn on_land(&self, pos: Vec2) -> bool {
        if point_in_polygon(pos, &self.sea) {
            return false;
        }
        self.ignore_river || !point_in_polygon(pos, &self.river)
    }

    pub fn in_parks(&self, pos: Vec2) -> bool {
        self.parks.iter().any(|park| point_in_polygon(pos, park))
    }

    /// Noise in `[-angle, angle]` degrees, returned in radians.
    fn rotational_noise(&self, pos: Vec2, size: f32, angle_degrees: f32) -> f32 {
        let value = self
            .noise
            .get([(pos.x / size) as f64, (pos.y / size) as f64]) as f32;
        value * angle_degrees.to_radians()
    }

    /// Add a contributor after checking its size and decay.
    pub fn add_basis(&mut self, field: BasisField) -> Result<(), ConfigError> {
        field.validate()?;
        self.basis_fields.push(field);
        Ok(())
    }

    /// Add a grid basis field.
    pub fn add_grid(
        &mut self,
        centre: Vec2,
        size: f32,
        decay: f32,
        theta: f32,
    ) -> Result<(), ConfigError> {
        self.add_basis(BasisField::Grid {
            centre,
            size,
            decay,
            theta,
        })
    }

    /// Add a radial basis field.
    pub fn add_radial(&mut self, centre: Vec2, size: f32, decay: f32) -> Result<(), ConfigError> {
        self.add_basis(BasisField::Radial {
            centre,
            size,
            decay,
        })
    }

    /// Add a polyline-aligned boundary field.
    pub fn add_boundary(
        &mut self,
        points: Vec<Vec2>,
        size: f32,
        decay: f32,
    ) -> Result<(), ConfigError> {
        self.add_basis(BasisField::Boundary {
            points,
            size,
            decay,
        })
    }

    pub fn remove_field(&mut self, index: usize) -> Option<BasisField> {
        (index < self.basis_fields.len()).then(|| self.basis_fields.remove(index))
    }

    /// Drop every contributor and all boundary geometry.
    pub fn reset(&mut self) {
        self.basis_fields.clear();
        self.parks.clear();
        self.sea.clear();
        self.river.clear();
        self.ignore_river = false;
    }

    pub fn set_noise_params(&mut self, noise_params: NoiseParams) {
        self.noise = Perlin::new(noise_params.seed);
        self.noise_params = noise_params;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const EPS: f32 = 1e-4;

    fn angle_diff_mod_pi(a: f32, b: f32) -> f32 {
        let d = (a - b).rem_euclid(PI);
        d.min(PI - d)
    }

    proptest! {
        #[test]
        fn major_and_minor_are_perpendicular(theta in -10.0f32..10.0, r in 0.01f32..100.0) {
            let mut t = Tensor::from_angle(theta);
            t.scale(r);
            let major = t.major();
            let minor = t.minor();
            prop_assert!(major.dot(minor).abs() < EPS);
            prop_assert!((major.length() - 1.0).abs() < EPS);
            prop_assert!(angle_diff_mod_pi(t.theta(), theta) < 1e-3);
            prop_assert!((0.0..PI).contains(&t.theta()));
        }

        #[test]
        fn add_is_commutative(a in 0.0f32..PI, b in 0.0f32..PI, wa in 0.1f32..5.0, wb in 0.1f32..5.0) {
            let mut ta = Tensor::from_angle(a);
            ta.scale(wa);
            let mut tb = Tensor::from_angle(b);
            tb.scale(wb);

            let mut ab = ta;
            ab.add(&tb);
            let mut ba = tb;
            ba.add(&ta);

            prop_assert!((ab.matrix()[0] - ba.matrix()[0]).abs() < EPS);
            prop_assert!((ab.matrix()[1] - ba.matrix()[1]).abs() < EPS);
            prop_assert!((ab.magnitude() - ba.magnitude()).abs() < EPS);
        }

        #[test]
        fn antipodal_orientations_reinforce(theta in 0.0f32..PI) {
            let mut t = Tensor::from_angle(theta);
            t.add(&Tensor::from_angle(theta + PI));
            prop_assert!((t.magnitude() - 2.0).abs() < 1e-3);
            prop_assert!(angle_diff_mod_pi(t.theta(), theta) < 1e-3);
        }

        #[test]
        fn rotation_round_trips(theta in 0.0f32..PI, delta in -3.0f32..3.0) {
            let mut t = Tensor::from_angle(theta);
            let before = t.matrix();
            t.rotate(delta);
            t.rotate(-delta);
            let after = t.matrix();
            prop_assert!((before[0] - after[0]).abs() < 1e-3);
            prop_assert!((before[1] - after[1]).abs() < 1e-3);
        }

        #[test]
        fn zero_magnitude_has_no_direction(c in -5.0f32..5.0, s in -5.0f32..5.0) {
            let mut t = Tensor::new(0.0, [c, s]);
            prop_assert_eq!(t.major(), Vec2::ZERO);
            prop_assert_eq!(t.minor(), Vec2::ZERO);
        }
    }

    #[test]
    fn rotate_by_zero_is_identity() {
        let mut t = Tensor::new(0.7, [0.1, -0.3]);
        t.rotate(0.0);
        assert_eq!(t.magnitude(), 0.7);
        assert_eq!(t.matrix(), [0.1, -0.3]);
    }

    #[test]
    fn rotation_wraps_into_half_turn() {
        let mut t = Tensor::from_angle(0.1);
        t.rotate(-0.3);
        assert!((t.theta() - (PI - 0.2)).abs() < EPS);

        let mut t = Tensor::from_angle(3.0);
        t.rotate(0.5);
        assert!((t.theta() - (3.5 - PI)).abs() < EPS);

        // Deltas beyond a half turn still land in range
        let mut t = Tensor::from_angle(0.5);
        t.rotate(7.0);
        assert!((0.0..PI).contains(&t.theta()));
        assert!(angle_diff_mod_pi(t.theta(), 7.5) < 1e-3);
    }

    #[test]
    fn perpendicular_orientations_cancel() {
        let mut t = Tensor::from_angle(0.0);
        t.add(&Tensor::from_angle(PI / 2.0));
        assert!(t.magnitude() < EPS);
    }

    #[test]
    fn empty_field_points_along_x() {
        let field = TensorField::default();
        let mut t = field.sample(Vec2::new(3.0, 4.0));
        assert!(t.major().distance(Vec2::X) < EPS);
    }

    #[test]
    fn radial_field_is_tangential() {
        let mut field = TensorField::default();
        field.add_radial(Vec2::ZERO, 100.0, 1.0).unwrap();
        let mut t = field.sample(Vec2::new(10.0, 0.0));
        assert!(t.major().dot(Vec2::X).abs() < EPS);
        assert!(t.minor().dot(Vec2::X).abs() > 1.0 - EPS);
    }

    #[test]
    fn grid_weight_decays_to_zero_at_size() {
        let grid = BasisField::Grid {
            centre: Vec2::ZERO,
            size: 10.0,
            decay: 1.0,
            theta: 0.0,
        };
        assert!((grid.weight(Vec2::new(5.0, 0.0), false) - 0.5).abs() < EPS);
        assert_eq!(grid.weight(Vec2::new(20.0, 0.0), false), 0.0);

        let flat = BasisField::Grid {
            centre: Vec2::ZERO,
            size: 10.0,
            decay: 0.0,
            theta: 0.0,
        };
        assert_eq!(flat.weight(Vec2::new(5.0, 0.0), false), 1.0);
        assert_eq!(flat.weight(Vec2::new(10.0, 0.0), false), 0.0);
    }

    #[test]
    fn nearer_grid_dominates_blend() {
        let mut field = TensorField::default();
        field.add_grid(Vec2::ZERO, 100.0, 1.0, 0.0).unwrap();
        field.add_grid(Vec2::new(100.0, 0.0), 100.0, 1.0, PI / 4.0).unwrap();
        let mut near_first = field.sample(Vec2::new(10.0, 0.0));
        let mut near_second = field.sample(Vec2::new(90.0, 0.0));
        assert!(near_first.theta() < PI / 8.0);
        assert!(near_second.theta() > PI / 8.0);
    }

    #[test]
    fn sea_and_river_are_degenerate() {
        let square = vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(10.0, 0.0),
            Vec2::new(10.0, 10.0),
            Vec2::new(0.0, 10.0),
        ];
        let mut field = TensorField::default();
        field.add_grid(Vec2::ZERO, 100.0, 0.0, 0.3).unwrap();

        field.river = square.clone();
        assert!(field.sample(Vec2::new(5.0, 5.0)).is_degenerate());
        field.ignore_river = true;
        assert!(!field.sample(Vec2::new(5.0, 5.0)).is_degenerate());

        field.sea = square;
        assert!(field.sample(Vec2::new(5.0, 5.0)).is_degenerate());
        assert!(!field.on_land(Vec2::new(5.0, 5.0)));
    }

    #[test]
    fn ignore_river_skips_boundary_fields() {
        let mut field = TensorField::default();
        field
            .add_boundary(vec![Vec2::new(-50.0, 0.0), Vec2::new(50.0, 50.0)], 200.0, 1.0)
            .unwrap();
        assert!(!field.sample(Vec2::new(0.0, -10.0)).is_degenerate());
        field.ignore_river = true;
        assert!(field.sample(Vec2::new(0.0, -10.0)).is_degenerate());
    }

    #[test]
    fn contributors_need_a_positive_size() {
        let mut field = TensorField::default();
        assert!(matches!(
            field.add_grid(Vec2::ZERO, 0.0, 1.0, 0.0),
            Err(ConfigError::NotPositive { field: "size", .. })
        ));
        assert!(field.add_radial(Vec2::ZERO, -5.0, 1.0).is_err());
        assert!(field.add_boundary(vec![Vec2::ZERO, Vec2::X], 10.0, -1.0).is_err());
        assert!(field.basis_fields.is_empty());

        // An empty field stays usable
        assert!(!field.sample(Vec2::new(5.0, 5.0)).is_degenerate());
    }
}
