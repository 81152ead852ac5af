//! Geometric kernel: exact predicates and the constructions built on them.
//!
//! Doubles go through [geogram_predicates], which is exact on `f64` input.
//! Rational coordinates (BSP intersection vertices) go through plain
//! `BigRational` arithmetic, which is exact by construction. Both paths share
//! one sign convention: `orient3d(a, b, c, d)` is the sign of
//! `det(b-a, c-a, d-a)`, positive for a positively oriented tetrahedron.

use crate::point::{rat, rat3, rational_sign, Point, Rational3};
use crate::utils::types::{Triangle3, Vertex3};
use geogram_predicates as gp;
use nalgebra::Vector3;
use num_rational::BigRational;

#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum Sign {
    Negative,
    Zero,
    Positive,
}

impl Sign {
    pub const fn from_i16(v: i16) -> Self {
        if v > 0 {
            Sign::Positive
        } else if v < 0 {
            Sign::Negative
        } else {
            Sign::Zero
        }
    }

    pub const fn from_i8(v: i8) -> Self {
        if v > 0 {
            Sign::Positive
        } else if v < 0 {
            Sign::Negative
        } else {
            Sign::Zero
        }
    }

    pub const fn is_positive(self) -> bool {
        matches!(self, Sign::Positive)
    }

    pub const fn is_zero(self) -> bool {
        matches!(self, Sign::Zero)
    }

    pub const fn is_negative(self) -> bool {
        matches!(self, Sign::Negative)
    }

    pub const fn flipped(self) -> Self {
        match self {
            Sign::Negative => Sign::Positive,
            Sign::Zero => Sign::Zero,
            Sign::Positive => Sign::Negative,
        }
    }
}

/// Orientation of `d` against the plane through `a`, `b`, `c`. Exact.
pub fn orient3d(a: &Vertex3, b: &Vertex3, c: &Vertex3, d: &Vertex3) -> Sign {
    Sign::from_i16(gp::orient_3d(a, b, c, d))
}

/// Exact orientation on rational coordinates, same convention as [orient3d].
pub fn orient3d_exact(a: &Rational3, b: &Rational3, c: &Rational3, d: &Rational3) -> Sign {
    let u = sub(b, a);
    let v = sub(c, a);
    let w = sub(d, a);

    let det = &u[0] * (&v[1] * &w[2] - &v[2] * &w[1])
        - &u[1] * (&v[0] * &w[2] - &v[2] * &w[0])
        + &u[2] * (&v[0] * &w[1] - &v[1] * &w[0]);

    Sign::from_i8(rational_sign(&det))
}

/// Orientation over [Point]s: the double path is taken only when all four are
/// rounded, otherwise the rational path.
pub fn orient3d_points(a: &Point, b: &Point, c: &Point, d: &Point) -> Sign {
    if a.is_rounded() && b.is_rounded() && c.is_rounded() && d.is_rounded() {
        orient3d(&a.approx(), &b.approx(), &c.approx(), &d.approx())
    } else {
        orient3d_exact(&a.to_exact(), &b.to_exact(), &c.to_exact(), &d.to_exact())
    }
}

/// Classification of a rational point against the plane of a double triangle.
pub fn side_of_plane(tri: &Triangle3, p: &Point) -> Sign {
    if p.is_rounded() {
        orient3d(&tri[0], &tri[1], &tri[2], &p.approx())
    } else {
        orient3d_exact(&rat3(&tri[0]), &rat3(&tri[1]), &rat3(&tri[2]), &p.to_exact())
    }
}

fn sub(a: &Rational3, b: &Rational3) -> Rational3 {
    [&a[0] - &b[0], &a[1] - &b[1], &a[2] - &b[2]]
}

/// Exact intersection of segment `p0p1` with the plane through `tri`.
///
/// The caller guarantees that the endpoints lie strictly on opposite sides of
/// the plane, so the denominator cannot vanish.
pub fn segment_plane_intersection(p0: &Rational3, p1: &Rational3, tri: &Triangle3) -> Rational3 {
    let a = rat3(&tri[0]);
    let b = rat3(&tri[1]);
    let c = rat3(&tri[2]);

    let d0 = signed_volume(&a, &b, &c, p0);
    let d1 = signed_volume(&a, &b, &c, p1);

    // p = p0 + t (p1 - p0) with t = d0 / (d0 - d1)
    let t = &d0 / (&d0 - &d1);
    [
        &p0[0] + &t * (&p1[0] - &p0[0]),
        &p0[1] + &t * (&p1[1] - &p0[1]),
        &p0[2] + &t * (&p1[2] - &p0[2]),
    ]
}

fn signed_volume(a: &Rational3, b: &Rational3, c: &Rational3, d: &Rational3) -> BigRational {
    let u = sub(b, a);
    let v = sub(c, a);
    let w = sub(d, a);

    &u[0] * (&v[1] * &w[2] - &v[2] * &w[1]) - &u[1] * (&v[0] * &w[2] - &v[2] * &w[0])
        + &u[2] * (&v[0] * &w[1] - &v[1] * &w[0])
}

/// Exact zero-area test on rational coordinates.
pub fn is_degenerate_triangle(a: &Rational3, b: &Rational3, c: &Rational3) -> bool {
    let u = sub(b, a);
    let v = sub(c, a);

    let cx = &u[1] * &v[2] - &u[2] * &v[1];
    let cy = &u[2] * &v[0] - &u[0] * &v[2];
    let cz = &u[0] * &v[1] - &u[1] * &v[0];

    rational_sign(&cx) == 0 && rational_sign(&cy) == 0 && rational_sign(&cz) == 0
}

/// Index of the coordinate axis along which `tri` projects with the largest
/// area, i.e. the dominant axis of its normal.
pub fn dominant_axis(tri: &Triangle3) -> usize {
    let n = triangle_normal(tri);
    let (mut axis, mut best) = (0, n.x.abs());
    if n.y.abs() > best {
        axis = 1;
        best = n.y.abs();
    }
    if n.z.abs() > best {
        axis = 2;
    }
    axis
}

pub fn triangle_normal(tri: &Triangle3) -> Vector3<f64> {
    let a = Vector3::from(tri[0]);
    let b = Vector3::from(tri[1]);
    let c = Vector3::from(tri[2]);
    (b - a).cross(&(c - a))
}

fn orient2d_exact(a: &[BigRational; 2], b: &[BigRational; 2], c: &[BigRational; 2]) -> i8 {
    let det = (&b[0] - &a[0]) * (&c[1] - &a[1]) - (&b[1] - &a[1]) * (&c[0] - &a[0]);
    rational_sign(&det)
}

/// Whether a point known to lie in the plane of `tri` is covered by `tri`
/// (boundary inclusive). Exact; works by dropping the dominant axis.
pub fn covered_by_triangle(p: &Point, tri: &Triangle3) -> bool {
    let axis = dominant_axis(tri);
    let (u, v) = ((axis + 1) % 3, (axis + 2) % 3);

    let pe = p.to_exact();
    let pp = [pe[u].clone(), pe[v].clone()];
    let ta = [rat(tri[0][u]), rat(tri[0][v])];
    let tb = [rat(tri[1][u]), rat(tri[1][v])];
    let tc = [rat(tri[2][u]), rat(tri[2][v])];

    let s0 = orient2d_exact(&ta, &tb, &pp);
    let s1 = orient2d_exact(&tb, &tc, &pp);
    let s2 = orient2d_exact(&tc, &ta, &pp);

    (s0 >= 0 && s1 >= 0 && s2 >= 0) || (s0 <= 0 && s1 <= 0 && s2 <= 0)
}

/// Whether segment `p0p1` meets triangle `tri`. Exact on double input;
/// touching configurations (endpoint on the plane, segment grazing an edge)
/// count as intersecting.
pub fn segment_crosses_triangle(p0: &Vertex3, p1: &Vertex3, tri: &Triangle3) -> bool {
    let s0 = orient3d(&tri[0], &tri[1], &tri[2], p0);
    let s1 = orient3d(&tri[0], &tri[1], &tri[2], p1);

    if s0 == s1 && !s0.is_zero() {
        return false; // both endpoints strictly on one side
    }
    if s0.is_zero() && s1.is_zero() {
        // coplanar segment; report a hit if either endpoint is covered
        return covered_by_triangle(&Point::rounded(*p0), tri)
            || covered_by_triangle(&Point::rounded(*p1), tri);
    }

    // The segment pierces the plane; the crossing point is inside the triangle
    // iff the three tetrahedra spanned with the triangle edges agree in sign.
    let t0 = orient3d(p0, p1, &tri[0], &tri[1]);
    let t1 = orient3d(p0, p1, &tri[1], &tri[2]);
    let t2 = orient3d(p0, p1, &tri[2], &tri[0]);

    let has_pos = [t0, t1, t2].iter().any(|s| s.is_positive());
    let has_neg = [t0, t1, t2].iter().any(|s| s.is_negative());
    !(has_pos && has_neg)
}

/// Whether `p` lies inside or on the boundary of the (positively oriented)
/// tet `abcd`. Exact.
pub fn point_in_tet(p: &Vertex3, tet: &crate::utils::types::Tetrahedron3) -> bool {
    let [a, b, c, d] = tet;
    !orient3d(a, b, c, p).is_negative()
        && !orient3d(a, c, d, p).is_negative()
        && !orient3d(a, d, b, p).is_negative()
        && !orient3d(b, d, c, p).is_negative()
}

/// Exact triangle/triangle intersection test (touching counts).
pub fn triangles_intersect(t1: &Triangle3, t2: &Triangle3) -> bool {
    for i in 0..3 {
        if segment_crosses_triangle(&t1[i], &t1[(i + 1) % 3], t2) {
            return true;
        }
        if segment_crosses_triangle(&t2[i], &t2[(i + 1) % 3], t1) {
            return true;
        }
    }
    false
}

/// Squared distance from `p` to triangle `tri` (Ericson's region walk).
pub fn squared_dist_point_triangle(p: &Vertex3, tri: &Triangle3) -> f64 {
    (Vector3::from(*p) - closest_point_on_triangle(p, tri)).norm_squared()
}

/// Closest point on `tri` to `p`.
pub fn closest_point_on_triangle(p: &Vertex3, tri: &Triangle3) -> Vector3<f64> {
    let a = Vector3::from(tri[0]);
    let b = Vector3::from(tri[1]);
    let c = Vector3::from(tri[2]);
    let p = Vector3::from(*p);

    let ab = b - a;
    let ac = c - a;
    let ap = p - a;

    let d1 = ab.dot(&ap);
    let d2 = ac.dot(&ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return a;
    }

    let bp = p - b;
    let d3 = ab.dot(&bp);
    let d4 = ac.dot(&bp);
    if d3 >= 0.0 && d4 <= d3 {
        return b;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return a + ab * v;
    }

    let cp = p - c;
    let d5 = ab.dot(&cp);
    let d6 = ac.dot(&cp);
    if d6 >= 0.0 && d5 <= d6 {
        return c;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return a + ac * w;
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return b + (c - b) * w;
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    a + ab * v + ac * w
}

/// Sample points of `tri` at density `d`: the three corners, stratified points
/// along each edge, and interior rows.
///
/// The density is clamped to 1/128 of the longest edge, so a query against a
/// triangle that is huge relative to `d` stays bounded instead of degenerating
/// into millions of samples.
pub fn sample_triangle(tri: &Triangle3, d: f64) -> Vec<Vertex3> {
    let a = Vector3::from(tri[0]);
    let b = Vector3::from(tri[1]);
    let c = Vector3::from(tri[2]);

    let longest = (b - a)
        .norm()
        .max((c - b).norm())
        .max((a - c).norm());
    let d = d.max(longest / 128.0);

    let mut samples = vec![tri[0], tri[1], tri[2]];

    for (p, q) in [(a, b), (b, c), (c, a)] {
        let len = (q - p).norm();
        let n = (len / d).ceil() as usize;
        for k in 1..n {
            let t = k as f64 / n as f64;
            samples.push((p + (q - p) * t).into());
        }
    }

    // interior: rows parallel to bc, spaced d apart toward a
    let height = {
        let n = triangle_normal(tri).norm();
        let base = (c - b).norm();
        if base > 0.0 {
            n / base
        } else {
            0.0
        }
    };
    let rows = (height / d).ceil() as usize;
    for r in 1..rows {
        let t = r as f64 / rows as f64; // 0 at bc, 1 at a
        let p = b + (a - b) * t;
        let q = c + (a - c) * t;
        let len = (q - p).norm();
        let n = (len / d).ceil() as usize;
        for k in 1..n {
            let s = k as f64 / n as f64;
            samples.push((p + (q - p) * s).into());
        }
    }

    samples
}

/// Axis-aligned bounding box.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Aabb {
    pub min: Vertex3,
    pub max: Vertex3,
}

impl Aabb {
    pub const EMPTY: Self = Self {
        min: [f64::INFINITY; 3],
        max: [f64::NEG_INFINITY; 3],
    };

    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Vertex3>) -> Self {
        let mut bbox = Self::EMPTY;
        for p in points {
            bbox.insert(p);
        }
        bbox
    }

    pub fn from_triangle(tri: &Triangle3) -> Self {
        Self::from_points(tri.iter())
    }

    pub fn insert(&mut self, p: &Vertex3) {
        for d in 0..3 {
            self.min[d] = self.min[d].min(p[d]);
            self.max[d] = self.max[d].max(p[d]);
        }
    }

    pub fn union(&self, other: &Self) -> Self {
        let mut out = *self;
        out.insert(&other.min);
        out.insert(&other.max);
        out
    }

    pub fn inflated(&self, margin: f64) -> Self {
        Self {
            min: [
                self.min[0] - margin,
                self.min[1] - margin,
                self.min[2] - margin,
            ],
            max: [
                self.max[0] + margin,
                self.max[1] + margin,
                self.max[2] + margin,
            ],
        }
    }

    pub fn intersects(&self, other: &Self) -> bool {
        (0..3).all(|d| self.min[d] <= other.max[d] && self.max[d] >= other.min[d])
    }

    pub fn contains(&self, p: &Vertex3) -> bool {
        (0..3).all(|d| self.min[d] <= p[d] && p[d] <= self.max[d])
    }

    pub fn diag(&self) -> f64 {
        let dx = self.max[0] - self.min[0];
        let dy = self.max[1] - self.min[1];
        let dz = self.max[2] - self.min[2];
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Squared distance from a point to the box, 0 inside.
    pub fn sq_distance(&self, p: &Vertex3) -> f64 {
        let mut acc = 0.0;
        for d in 0..3 {
            let delta = if p[d] < self.min[d] {
                self.min[d] - p[d]
            } else if p[d] > self.max[d] {
                p[d] - self.max[d]
            } else {
                0.0
            };
            acc += delta * delta;
        }
        acc
    }

    pub fn corners(&self) -> [Vertex3; 8] {
        let (lo, hi) = (self.min, self.max);
        [
            [lo[0], lo[1], lo[2]],
            [hi[0], lo[1], lo[2]],
            [lo[0], hi[1], lo[2]],
            [hi[0], hi[1], lo[2]],
            [lo[0], lo[1], hi[2]],
            [hi[0], lo[1], hi[2]],
            [lo[0], hi[1], hi[2]],
            [hi[0], hi[1], hi[2]],
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::rat_int;

    const TRI: Triangle3 = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];

    #[test]
    fn orientation_signs_match_between_paths() {
        let a = [0.0, 0.0, 0.0];
        let b = [1.0, 0.0, 0.0];
        let c = [0.0, 1.0, 0.0];
        let above = [0.25, 0.25, 1.0];
        let below = [0.25, 0.25, -1.0];
        let on = [0.5, 0.25, 0.0];

        for (d, expected) in [
            (above, Sign::Positive),
            (below, Sign::Negative),
            (on, Sign::Zero),
        ] {
            assert_eq!(orient3d(&a, &b, &c, &d), expected);
            assert_eq!(
                orient3d_exact(&rat3(&a), &rat3(&b), &rat3(&c), &rat3(&d)),
                expected
            );
        }
    }

    #[test]
    fn plane_intersection_is_exact() {
        let p0 = rat3(&[0.5, 0.25, -1.0]);
        let p1 = rat3(&[0.5, 0.25, 2.0]);
        let x = segment_plane_intersection(&p0, &p1, &TRI);

        assert_eq!(x[2], rat_int(0));
        assert_eq!(x[0], rat(0.5));

        let p = Point::exact(x);
        assert!(covered_by_triangle(&p, &TRI));
    }

    #[test]
    fn coverage_is_boundary_inclusive() {
        assert!(covered_by_triangle(&Point::rounded([0.0, 0.0, 0.0]), &TRI));
        assert!(covered_by_triangle(&Point::rounded([0.5, 0.5, 0.0]), &TRI));
        assert!(covered_by_triangle(&Point::rounded([0.25, 0.25, 0.0]), &TRI));
        assert!(!covered_by_triangle(&Point::rounded([0.6, 0.6, 0.0]), &TRI));
    }

    #[test]
    fn segment_triangle_crossing() {
        assert!(segment_crosses_triangle(
            &[0.25, 0.25, -1.0],
            &[0.25, 0.25, 1.0],
            &TRI
        ));
        assert!(!segment_crosses_triangle(
            &[2.0, 2.0, -1.0],
            &[2.0, 2.0, 1.0],
            &TRI
        ));
        // strictly above the plane
        assert!(!segment_crosses_triangle(
            &[0.25, 0.25, 0.5],
            &[0.25, 0.25, 1.0],
            &TRI
        ));
    }

    #[test]
    fn point_in_tet_is_boundary_inclusive() {
        let tet = [
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
        ];
        assert!(point_in_tet(&[0.25, 0.25, 0.25], &tet));
        assert!(point_in_tet(&[0.0, 0.0, 0.0], &tet));
        assert!(point_in_tet(&[0.5, 0.5, 0.0], &tet));
        assert!(!point_in_tet(&[0.5, 0.5, 0.5], &tet));
        assert!(!point_in_tet(&[-0.1, 0.2, 0.2], &tet));
    }

    #[test]
    fn point_triangle_distance() {
        assert_eq!(squared_dist_point_triangle(&[0.25, 0.25, 0.5], &TRI), 0.25);
        assert_eq!(squared_dist_point_triangle(&[-1.0, 0.0, 0.0], &TRI), 1.0);
        assert_eq!(squared_dist_point_triangle(&[0.25, 0.25, 0.0], &TRI), 0.0);
    }

    #[test]
    fn triangle_sampling_density() {
        let samples = sample_triangle(&TRI, 0.1);
        assert!(samples.len() > 30);
        for s in &samples {
            assert!(squared_dist_point_triangle(s, &TRI) < 1e-20);
        }
    }
}
