//! Plane geometry shared by the graph and polygon stages.
//!
//! Polygons are open rings (the closing vertex is implied), y-up, so a
//! positive signed area means counter-clockwise.

use bevy::prelude::*;

/// Signed shoelace area. Positive for counter-clockwise rings.
pub fn signed_area(vertices: &[Vec2]) -> f32 {
    let n = vertices.len();
    if n < 3 {
        return 0.0;
    }

    let mut area = 0.0;
    for i in 0..n {
        let j = (i + 1) % n;
        area += vertices[i].x * vertices[j].y;
        area -= vertices[j].x * vertices[i].y;
    }

    area / 2.0
}

/// Unsigned polygon area.
pub fn polygon_area(vertices: &[Vec2]) -> f32 {
    signed_area(vertices).abs()
}

/// Average of the ring's vertices.
pub fn polygon_centroid(vertices: &[Vec2]) -> Vec2 {
    if vertices.is_empty() {
        return Vec2::ZERO;
    }

    vertices.iter().copied().sum::<Vec2>() / vertices.len() as f32
}

/// Compute axis-aligned bounding box of a polygon.
pub fn polygon_bounds(vertices: &[Vec2]) -> Rect {
    let mut min = Vec2::splat(f32::MAX);
    let mut max = Vec2::splat(f32::MIN);

    for &v in vertices {
        min = min.min(v);
        max = max.max(v);
    }

    Rect::from_corners(min, max)
}

/// Even-odd point containment. Empty or degenerate rings contain nothing.
pub fn point_in_polygon(point: Vec2, vertices: &[Vec2]) -> bool {
    let n = vertices.len();
    if n < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (a, b) = (vertices[i], vertices[j]);
        if (a.y > point.y) != (b.y > point.y) {
            let x = a.x + (point.y - a.y) * (b.x - a.x) / (b.y - a.y);
            if point.x < x {
                inside = !inside;
            }
        }
        j = i;
    }

    inside
}

/// A proper or touching crossing between two segments.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SegmentHit {
    pub point: Vec2,
    /// Parameter along the first segment, in `[0, 1]`.
    pub t: f32,
    /// Parameter along the second segment, in `[0, 1]`.
    pub u: f32,
}

/// Line segment intersection test.
/// Parallel and collinear segments never intersect.
pub fn segment_intersection(a1: Vec2, a2: Vec2, b1: Vec2, b2: Vec2) -> Option<SegmentHit> {
    let d1 = a2 - a1;
    let d2 = b2 - b1;

    let cross = d1.perp_dot(d2);

    // Parallel lines
    if cross.abs() < 1e-10 {
        return None;
    }

    let d = b1 - a1;
    let t = d.perp_dot(d2) / cross;
    let u = d.perp_dot(d1) / cross;

    if (0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u) {
        Some(SegmentHit {
            point: a1 + d1 * t,
            t,
            u,
        })
    } else {
        None
    }
}

/// True when no two non-adjacent edges of the ring touch.
pub fn is_simple_polygon(vertices: &[Vec2]) -> bool {
    let n = vertices.len();
    if n < 3 {
        return false;
    }

    for i in 0..n {
        let (a1, a2) = (vertices[i], vertices[(i + 1) % n]);
        if a1.distance_squared(a2) == 0.0 {
            return false;
        }
        for j in (i + 1)..n {
            // Adjacent edges share a vertex
            if j == i + 1 || (i == 0 && j == n - 1) {
                continue;
            }
            let (b1, b2) = (vertices[j], vertices[(j + 1) % n]);
            if segment_intersection(a1, a2, b1, b2).is_some() {
                return false;
            }
        }
    }

    true
}

/// An oriented bounding box.
#[derive(Clone, Copy, Debug)]
pub struct OrientedBoundingBox {
    pub center: Vec2,
    pub half_extents: Vec2,
    pub rotation: f32,
}

impl OrientedBoundingBox {
    /// Long side over short side. Infinite for a flat box.
    pub fn aspect_ratio(&self) -> f32 {
        let long = self.half_extents.x.max(self.half_extents.y);
        let short = self.half_extents.x.min(self.half_extents.y);
        if short <= f32::EPSILON {
            return f32::INFINITY;
        }
        long / short
    }
}

/// Principal-axis bounding box of a ring.
pub fn compute_obb(vertices: &[Vec2]) -> OrientedBoundingBox {
    let centroid = polygon_centroid(vertices);

    // Covariance of the vertex cloud
    let mut cxx = 0.0;
    let mut cyy = 0.0;
    let mut cxy = 0.0;

    for v in vertices {
        let d = *v - centroid;
        cxx += d.x * d.x;
        cyy += d.y * d.y;
        cxy += d.x * d.y;
    }

    let angle = 0.5 * (2.0 * cxy).atan2(cxx - cyy);
    let axis = Vec2::from_angle(angle);
    let perp = axis.perp();

    let mut min_major = f32::MAX;
    let mut max_major = f32::MIN;
    let mut min_minor = f32::MAX;
    let mut max_minor = f32::MIN;

    for v in vertices {
        let d = *v - centroid;
        let proj_major = d.dot(axis);
        let proj_minor = d.dot(perp);

        min_major = min_major.min(proj_major);
        max_major = max_major.max(proj_major);
        min_minor = min_minor.min(proj_minor);
        max_minor = max_minor.max(proj_minor);
    }

    let offset = axis * (min_major + max_major) / 2.0 + perp * (min_minor + max_minor) / 2.0;

    OrientedBoundingBox {
        center: centroid + offset,
        half_extents: Vec2::new(
            (max_major - min_major) / 2.0,
            (max_minor - min_minor) / 2.0,
        ),
        rotation: angle,
    }
}

/// Offset every edge of a counter-clockwise ring inward by `distance` and
/// join neighbouring edges at their mitre point.
///
/// Returns `None` when the result collapses, flips or self-intersects.
pub fn shrink_polygon(vertices: &[Vec2], distance: f32) -> Option<Vec<Vec2>> {
    let n = vertices.len();
    if n < 3 || signed_area(vertices) <= 0.0 {
        return None;
    }
    if distance == 0.0 {
        return Some(vertices.to_vec());
    }

    let inward = |i: usize| -> Option<Vec2> {
        let edge = vertices[(i + 1) % n] - vertices[i];
        edge.try_normalize().map(|e| e.perp())
    };

    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let prev = (i + n - 1) % n;
        let n_prev = inward(prev)?;
        let n_next = inward(i)?;

        // Offset lines: p + n_prev * d along the previous edge, p + n_next * d along the next
        let bisector = n_prev + n_next;
        let cos_half = bisector.length() / 2.0;
        if cos_half < 1e-3 {
            // Edge folds straight back on itself
            return None;
        }
        let mitre = bisector.normalize() * (distance / cos_half);
        out.push(vertices[i] + mitre);
    }

    // An edge pointing against its original has been shrunk past zero length
    let reversed = (0..n).any(|i| {
        let before = vertices[(i + 1) % n] - vertices[i];
        let after = out[(i + 1) % n] - out[i];
        before.dot(after) <= 0.0
    });

    if reversed || signed_area(&out) <= 0.0 || !is_simple_polygon(&out) {
        return None;
    }

    Some(out)
}

/// Reverse the ring in place if it is clockwise.
pub fn make_counter_clockwise(vertices: &mut [Vec2]) {
    if signed_area(vertices) < 0.0 {
        vertices.reverse();
    }
}

/// Signed angle from `a` to `b` in `(-π, π]`.
pub fn angle_between(a: Vec2, b: Vec2) -> f32 {
    a.perp_dot(b).atan2(a.dot(b))
}

/// Radial-distance prepass followed by Douglas-Peucker.
///
/// Endpoints are always kept, so closed polylines stay closed.
pub fn simplify_polyline(points: &[Vec2], tolerance: f32) -> Vec<Vec2> {
    if points.len() <= 2 || tolerance <= 0.0 {
        return points.to_vec();
    }

    let sq_tolerance = tolerance * tolerance;
    let reduced = simplify_radial_distance(points, sq_tolerance);
    simplify_douglas_peucker(&reduced, sq_tolerance)
}

fn simplify_radial_distance(points: &[Vec2], sq_tolerance: f32) -> Vec<Vec2> {
    let mut prev = points[0];
    let mut out = vec![prev];

    for &point in &points[1..points.len() - 1] {
        if point.distance_squared(prev) > sq_tolerance {
            out.push(point);
            prev = point;
        }
    }

    out.push(points[points.len() - 1]);
    out
}

fn simplify_douglas_peucker(points: &[Vec2], sq_tolerance: f32) -> Vec<Vec2> {
    let last = points.len() - 1;
    let mut keep = vec![false; points.len()];
    keep[0] = true;
    keep[last] = true;

    let mut stack = vec![(0, last)];
    while let Some((first, end)) = stack.pop() {
        let mut max_sq_dist = sq_tolerance;
        let mut index = None;

        for i in (first + 1)..end {
            let sq_dist = segment_distance_squared(points[i], points[first], points[end]);
            if sq_dist > max_sq_dist {
                index = Some(i);
                max_sq_dist = sq_dist;
            }
        }

        if let Some(i) = index {
            keep[i] = true;
            stack.push((first, i));
            stack.push((i, end));
        }
    }

    points
        .iter()
        .zip(keep)
        .filter_map(|(p, k)| k.then_some(*p))
        .collect()
}

/// Squared distance from `p` to the segment `a`-`b`.
pub fn segment_distance_squared(p: Vec2, a: Vec2, b: Vec2) -> f32 {
    let ab = b - a;
    let len_sq = ab.length_squared();
    if len_sq == 0.0 {
        return p.distance_squared(a);
    }
    let t = ((p - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    p.distance_squared(a + ab * t)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(size: f32) -> Vec<Vec2> {
        vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(size, 0.0),
            Vec2::new(size, size),
            Vec2::new(0.0, size),
        ]
    }

    #[test]
    fn area_sign_follows_winding() {
        let mut ring = square(10.0);
        assert_eq!(signed_area(&ring), 100.0);
        ring.reverse();
        assert_eq!(signed_area(&ring), -100.0);
        make_counter_clockwise(&mut ring);
        assert_eq!(signed_area(&ring), 100.0);
    }

    #[test]
    fn crossing_segments_intersect_once() {
        let hit = segment_intersection(
            Vec2::new(-1.0, 0.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(0.0, -1.0),
            Vec2::new(0.0, 1.0),
        )
        .expect("segments cross");
        assert!(hit.point.length() < 1e-6);
        assert!((hit.t - 0.5).abs() < 1e-6);
        assert!((hit.u - 0.5).abs() < 1e-6);

        let parallel = segment_intersection(
            Vec2::ZERO,
            Vec2::X,
            Vec2::Y,
            Vec2::new(1.0, 1.0),
        );
        assert!(parallel.is_none());
    }

    #[test]
    fn bow_tie_is_not_simple() {
        let bow_tie = vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(10.0, 10.0),
            Vec2::new(10.0, 0.0),
            Vec2::new(0.0, 10.0),
        ];
        assert!(!is_simple_polygon(&bow_tie));
        assert!(is_simple_polygon(&square(10.0)));
    }

    #[test]
    fn containment_uses_even_odd_rule() {
        let ring = square(10.0);
        assert!(point_in_polygon(Vec2::new(5.0, 5.0), &ring));
        assert!(!point_in_polygon(Vec2::new(15.0, 5.0), &ring));
        assert!(!point_in_polygon(Vec2::new(5.0, 5.0), &[]));
    }

    #[test]
    fn shrink_square_moves_every_edge_inward() {
        let shrunk = shrink_polygon(&square(10.0), 2.0).expect("square shrinks");
        assert!((polygon_area(&shrunk) - 36.0).abs() < 1e-3);
        assert!(shrunk[0].distance(Vec2::new(2.0, 2.0)) < 1e-4);
    }

    #[test]
    fn shrink_past_collapse_is_rejected() {
        assert!(shrink_polygon(&square(10.0), 6.0).is_none());
    }

    #[test]
    fn obb_of_long_rectangle_reports_aspect() {
        let rect = vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(40.0, 0.0),
            Vec2::new(40.0, 10.0),
            Vec2::new(0.0, 10.0),
        ];
        let obb = compute_obb(&rect);
        assert!((obb.aspect_ratio() - 4.0).abs() < 1e-3);
        assert!(obb.center.distance(Vec2::new(20.0, 5.0)) < 1e-3);
    }

    #[test]
    fn simplify_drops_collinear_points() {
        let line: Vec<Vec2> = (0..=20).map(|i| Vec2::new(i as f32, 0.0)).collect();
        let simple = simplify_polyline(&line, 0.5);
        assert_eq!(simple, vec![Vec2::ZERO, Vec2::new(20.0, 0.0)]);
    }

    #[test]
    fn simplify_keeps_corners() {
        let mut line: Vec<Vec2> = (0..=10).map(|i| Vec2::new(i as f32, 0.0)).collect();
        line.extend((1..=10).map(|i| Vec2::new(10.0, i as f32)));
        let simple = simplify_polyline(&line, 0.5);
        assert_eq!(
            simple,
            vec![Vec2::ZERO, Vec2::new(10.0, 0.0), Vec2::new(10.0, 10.0)]
        );
    }
}
