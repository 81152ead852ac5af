//! Element quality: the conformal AMIPS-style shape energy and dihedral-angle
//! statistics.

use crate::utils::types::Tetrahedron3;
use nalgebra::{Matrix3, Vector3};
use std::cmp::Ordering;

/// Shape energy of a tet. Inverted and degenerate elements get a dedicated
/// variant instead of a float sentinel so ordering and stall detection treat
/// them correctly.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Energy {
    Finite(f64),
    Inverted,
}

impl Energy {
    pub const fn is_inverted(&self) -> bool {
        matches!(self, Energy::Inverted)
    }

    /// The finite value, or +∞ for inverted elements.
    pub const fn as_f64(&self) -> f64 {
        match self {
            Energy::Finite(e) => *e,
            Energy::Inverted => f64::INFINITY,
        }
    }

    pub fn max(self, other: Self) -> Self {
        if self < other {
            other
        } else {
            self
        }
    }
}

impl PartialOrd for Energy {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Energy::Inverted, Energy::Inverted) => Some(Ordering::Equal),
            (Energy::Inverted, Energy::Finite(_)) => Some(Ordering::Greater),
            (Energy::Finite(_), Energy::Inverted) => Some(Ordering::Less),
            (Energy::Finite(a), Energy::Finite(b)) => a.partial_cmp(b),
        }
    }
}

/// Quality record of a tet.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Quality {
    /// Minimum dihedral angle in radians.
    pub min_d_angle: f64,
    /// Maximum dihedral angle in radians.
    pub max_d_angle: f64,
    pub energy: Energy,
}

impl Quality {
    pub fn of(tet: &Tetrahedron3) -> Self {
        let (min_d_angle, max_d_angle) = dihedral_angles(tet);
        Self {
            min_d_angle,
            max_d_angle,
            energy: amips_energy(tet),
        }
    }
}

/// `E(t) = tr(JᵀJ)^{3/2} / (3^{3/2} · det J)` where `J` maps the unit regular
/// tetrahedron to `t`; `Inverted` when `det J ≤ 0`.
///
/// Scale- and rotation-invariant; 1 for the regular tet, growing without
/// bound as the element degenerates.
pub fn amips_energy(tet: &Tetrahedron3) -> Energy {
    let t = edge_matrix(tet);

    // inverse of the edge matrix of the unit regular tet
    // r1-r0 = (1,0,0), r2-r0 = (1/2, √3/2, 0), r3-r0 = (1/2, √3/6, √6/3)
    let s3 = 3f64.sqrt();
    let s6 = 6f64.sqrt();
    let ref_inv = Matrix3::new(
        1.0,
        -1.0 / s3,
        -1.0 / s6,
        0.0,
        2.0 / s3,
        -1.0 / s6,
        0.0,
        0.0,
        s6 / 2.0,
    );

    let j = t * ref_inv;
    let det = j.determinant();
    if det <= 0.0 || !det.is_finite() {
        return Energy::Inverted;
    }

    let frob_sq = j.norm_squared(); // tr(JᵀJ)
    let e = frob_sq.powf(1.5) / (3f64.powf(1.5) * det);
    if e.is_finite() {
        Energy::Finite(e)
    } else {
        Energy::Inverted
    }
}

/// Edge matrix with columns `t1-t0, t2-t0, t3-t0`.
fn edge_matrix(tet: &Tetrahedron3) -> Matrix3<f64> {
    let t0 = Vector3::from(tet[0]);
    Matrix3::from_columns(&[
        Vector3::from(tet[1]) - t0,
        Vector3::from(tet[2]) - t0,
        Vector3::from(tet[3]) - t0,
    ])
}

/// Signed volume, positive for a positively oriented tet.
pub fn tet_volume(tet: &Tetrahedron3) -> f64 {
    edge_matrix(tet).determinant() / 6.0
}

/// Minimum and maximum dihedral angle of a tet, in radians.
pub fn dihedral_angles(tet: &Tetrahedron3) -> (f64, f64) {
    let v = [
        Vector3::from(tet[0]),
        Vector3::from(tet[1]),
        Vector3::from(tet[2]),
        Vector3::from(tet[3]),
    ];

    // outward-ish normals of the four faces, face i opposite vertex i
    let n = [
        (v[2] - v[1]).cross(&(v[3] - v[1])),
        (v[3] - v[0]).cross(&(v[2] - v[0])),
        (v[1] - v[0]).cross(&(v[3] - v[0])),
        (v[2] - v[0]).cross(&(v[1] - v[0])),
    ];

    let mut min_a = std::f64::consts::PI;
    let mut max_a = 0.0f64;

    // each pair of faces shares one edge
    for i in 0..4 {
        for j in (i + 1)..4 {
            let denom = n[i].norm() * n[j].norm();
            if denom == 0.0 {
                continue;
            }
            let cos = (-n[i].dot(&n[j]) / denom).clamp(-1.0, 1.0);
            let angle = cos.acos();
            min_a = min_a.min(angle);
            max_a = max_a.max(angle);
        }
    }

    (min_a, max_a)
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGULAR: Tetrahedron3 = [
        [0.0, 0.0, 0.0],
        [1.0, 0.0, 0.0],
        [0.5, 0.866_025_403_784_438_6, 0.0],
        [0.5, 0.288_675_134_594_812_9, 0.816_496_580_927_726],
    ];

    #[test]
    fn regular_tet_has_unit_energy() {
        let e = amips_energy(&REGULAR);
        match e {
            Energy::Finite(v) => assert!((v - 1.0).abs() < 1e-9, "got {v}"),
            Energy::Inverted => panic!("regular tet reported inverted"),
        }
    }

    #[test]
    fn inverted_tet_is_flagged() {
        let mut tet = REGULAR;
        tet.swap(0, 1);
        assert!(amips_energy(&tet).is_inverted());

        let flat = [
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.5, 0.5, 0.0],
        ];
        assert!(amips_energy(&flat).is_inverted());
    }

    #[test]
    fn energy_grows_with_distortion() {
        let mut sliver = REGULAR;
        sliver[3][2] = 0.01;
        let e_sliver = amips_energy(&sliver);
        let e_regular = amips_energy(&REGULAR);
        assert!(e_sliver > e_regular);
        assert!(Energy::Inverted > e_sliver);
    }

    #[test]
    fn regular_tet_dihedral_angles() {
        let (min_a, max_a) = dihedral_angles(&REGULAR);
        let expected = (1f64 / 3.0).acos(); // ~70.53°
        assert!((min_a - expected).abs() < 1e-9);
        assert!((max_a - expected).abs() < 1e-9);
    }

    #[test]
    fn quality_record_is_consistent() {
        let q = Quality::of(&REGULAR);
        assert!(q.min_d_angle > 0.0 && q.max_d_angle < std::f64::consts::PI);
        assert!(q.min_d_angle <= q.max_d_angle);
        assert!(!q.energy.is_inverted());
    }
}
