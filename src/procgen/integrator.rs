//! Numerical integration through the tensor field.
//!
//! The field is undirected, so every sampled eigenvector is flipped to agree
//! with the one before it: the first stage with the caller's heading, each
//! later stage with the stage before. Otherwise a step could average opposite
//! directions into nothing or bend the wrong way.

use bevy::prelude::*;

use super::tensor::TensorField;

/// Advances points along the major or minor eigenvector field.
pub trait FieldIntegrator {
    /// Displacement of a single step from `point` continuing along `heading`,
    /// or `None` when the field is degenerate somewhere the step needs to
    /// sample. A zero `heading` leaves the first direction as sampled.
    fn integrate(&self, point: Vec2, heading: Vec2, major: bool) -> Option<Vec2>;

    fn on_land(&self, point: Vec2) -> bool;
}

/// Unit eigenvector at `point`, or `None` for a degenerate tensor.
fn sample_field_vector(field: &TensorField, point: Vec2, major: bool) -> Option<Vec2> {
    let mut tensor = field.sample(point);
    if tensor.is_degenerate() {
        return None;
    }
    Some(if major { tensor.major() } else { tensor.minor() })
}

/// Flip `dir` so it continues forward relative to `reference`.
fn align(dir: Vec2, reference: Vec2) -> Vec2 {
    if dir.dot(reference) < 0.0 {
        -dir
    } else {
        dir
    }
}

/// Single forward-Euler step.
pub struct EulerIntegrator<'a> {
    field: &'a TensorField,
    dstep: f32,
}

impl<'a> EulerIntegrator<'a> {
    pub fn new(field: &'a TensorField, dstep: f32) -> Self {
        Self { field, dstep }
    }
}

impl FieldIntegrator for EulerIntegrator<'_> {
    fn integrate(&self, point: Vec2, heading: Vec2, major: bool) -> Option<Vec2> {
        sample_field_vector(self.field, point, major).map(|dir| align(dir, heading) * self.dstep)
    }

    fn on_land(&self, point: Vec2) -> bool {
        self.field.on_land(point)
    }
}

/// Classic fourth-order Runge-Kutta with sign-consistent stages.
pub struct Rk4Integrator<'a> {
    field: &'a TensorField,
    dstep: f32,
}

impl<'a> Rk4Integrator<'a> {
    pub fn new(field: &'a TensorField, dstep: f32) -> Self {
        Self { field, dstep }
    }
}

impl FieldIntegrator for Rk4Integrator<'_> {
    fn integrate(&self, point: Vec2, heading: Vec2, major: bool) -> Option<Vec2> {
        let h = self.dstep;
        let get_dir = |p: Vec2, reference: Vec2| -> Option<Vec2> {
            sample_field_vector(self.field, p, major).map(|d| align(d, reference))
        };

        let k1 = get_dir(point, heading)?;
        let k2 = get_dir(point + k1 * h * 0.5, k1)?;
        let k3 = get_dir(point + k2 * h * 0.5, k2)?;
        let k4 = get_dir(point + k3 * h, k3)?;

        Some((k1 + k2 * 2.0 + k3 * 2.0 + k4) * (h / 6.0))
    }

    fn on_land(&self, point: Vec2) -> bool {
        self.field.on_land(point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_field_steps_along_axis() {
        let field = TensorField::default();
        let integrator = Rk4Integrator::new(&field, 2.0);

        let major = integrator.integrate(Vec2::ZERO, Vec2::ZERO, true).unwrap();
        assert!(major.distance(Vec2::new(2.0, 0.0)) < 1e-5);

        let minor = integrator.integrate(Vec2::ZERO, Vec2::ZERO, false).unwrap();
        assert!(minor.x.abs() < 1e-5);
        assert!((minor.length() - 2.0).abs() < 1e-5);
    }

    #[test]
    fn step_length_matches_dstep_in_curved_field() {
        let mut field = TensorField::default();
        field.add_radial(Vec2::ZERO, 1000.0, 0.0).unwrap();
        let integrator = Rk4Integrator::new(&field, 1.0);

        let step = integrator.integrate(Vec2::new(50.0, 0.0), Vec2::Y, true).unwrap();
        // Tangential around the centre
        assert!(step.x.abs() < 0.05);
        assert!((step.length() - 1.0).abs() < 0.01);
    }

    #[test]
    fn degenerate_field_halts() {
        let mut field = TensorField::default();
        field.sea = vec![
            Vec2::new(-10.0, -10.0),
            Vec2::new(10.0, -10.0),
            Vec2::new(10.0, 10.0),
            Vec2::new(-10.0, 10.0),
        ];
        let rk4 = Rk4Integrator::new(&field, 1.0);
        let euler = EulerIntegrator::new(&field, 1.0);
        assert!(rk4.integrate(Vec2::ZERO, Vec2::ZERO, true).is_none());
        assert!(euler.integrate(Vec2::ZERO, Vec2::ZERO, false).is_none());
        assert!(!rk4.on_land(Vec2::ZERO));
        // A step whose later stages land in the sea also halts
        assert!(rk4.integrate(Vec2::new(-10.5, 0.0), Vec2::X, true).is_none());
    }

    #[test]
    fn steps_follow_the_heading() {
        let field = TensorField::default();
        let integrator = Rk4Integrator::new(&field, 1.0);

        let back = integrator.integrate(Vec2::ZERO, Vec2::NEG_X, true).unwrap();
        assert!(back.distance(Vec2::NEG_X) < 1e-5);
        let euler = EulerIntegrator::new(&field, 1.0);
        let back = euler.integrate(Vec2::ZERO, Vec2::new(-1.0, 0.2), true).unwrap();
        assert!(back.distance(Vec2::NEG_X) < 1e-5);
    }

    #[test]
    fn rk4_stays_on_circle_in_either_direction() {
        let mut field = TensorField::default();
        field.add_radial(Vec2::ZERO, 1000.0, 0.0).unwrap();
        let integrator = Rk4Integrator::new(&field, 1.0);

        for heading in [Vec2::Y, Vec2::NEG_Y] {
            let mut point = Vec2::new(30.0, 0.0);
            let mut dir = heading;
            for _ in 0..100 {
                let step = integrator.integrate(point, dir, true).unwrap();
                assert!(step.dot(dir) > 0.0);
                point += step;
                dir = step;
            }
            // A first-order step drifts outward by about h^2 / 2r per step
            assert!((point.length() - 30.0).abs() < 0.01, "radius {}", point.length());
        }
    }
}
