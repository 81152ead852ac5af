//! Exact/rounded point representation.
//!
//! Positions created by the pipeline itself (input vertices, edge midpoints,
//! smoothed positions) are plain doubles. Exact rational coordinates only ever
//! arise from plane/edge intersections in the BSP stage; they are kept until
//! the rounding pass can prove that snapping them to doubles does not flip the
//! orientation of any incident tetrahedron.

use crate::utils::types::Vertex3;
use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{Signed, ToPrimitive, Zero};

pub type Rational3 = [BigRational; 3];

/// A 3D coordinate stored as a rounded double and, when the two differ, an
/// exact rational.
///
/// `exact == None` means the double *is* the exact value (every finite `f64`
/// is a rational), so the rounded/exact agreement invariant holds by
/// construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    rounded: Vertex3,
    exact: Option<Rational3>,
}

impl Point {
    /// A point whose exact value is the given double coordinate.
    pub const fn rounded(v: Vertex3) -> Self {
        Self {
            rounded: v,
            exact: None,
        }
    }

    /// A point from exact rational coordinates.
    ///
    /// If the rationals are exactly representable as doubles the rational part
    /// is dropped and the point is born rounded.
    pub fn exact(r: Rational3) -> Self {
        let rounded = [
            rational_to_f64(&r[0]),
            rational_to_f64(&r[1]),
            rational_to_f64(&r[2]),
        ];

        let representable = (0..3).all(|d| match BigRational::from_float(rounded[d]) {
            Some(back) => back == r[d],
            None => false,
        });

        Self {
            rounded,
            exact: if representable { None } else { Some(r) },
        }
    }

    pub const fn is_rounded(&self) -> bool {
        self.exact.is_none()
    }

    /// The double coordinate. Exact when `is_rounded`, nearest otherwise.
    pub const fn approx(&self) -> Vertex3 {
        self.rounded
    }

    /// The exact rational coordinate, materialized from the double on demand.
    pub fn to_exact(&self) -> Rational3 {
        match &self.exact {
            Some(r) => r.clone(),
            None => [
                BigRational::from_float(self.rounded[0]).unwrap(),
                BigRational::from_float(self.rounded[1]).unwrap(),
                BigRational::from_float(self.rounded[2]).unwrap(),
            ],
        }
    }

    /// Forget the exact part, declaring the rounded double to be the value.
    ///
    /// The caller must have verified that this keeps every dependent predicate
    /// sign intact (see `TetMesh::round_vertices`).
    pub fn round(&mut self) {
        self.exact = None;
    }

    /// Exact equality, comparing rationals when either side carries them.
    pub fn same_position(&self, other: &Self) -> bool {
        if self.is_rounded() && other.is_rounded() {
            return self.rounded == other.rounded;
        }
        self.to_exact() == other.to_exact()
    }
}

/// Nearest-double conversion that survives numerators/denominators far outside
/// the `f64` range by shifting both by a common power of two first.
pub fn rational_to_f64(r: &BigRational) -> f64 {
    if r.is_zero() {
        return 0.0;
    }

    let numer = r.numer();
    let denom = r.denom();

    if let (Some(n), Some(d)) = (numer.to_f64(), denom.to_f64()) {
        if n.is_finite() && d.is_finite() && d != 0.0 {
            return n / d;
        }
    }

    // Keep ~80 significant bits of each side, track the exponent shift.
    let shift_n = (numer.bits() as i64 - 80).max(0);
    let shift_d = (denom.bits() as i64 - 80).max(0);
    let n = (numer >> shift_n as u64).to_f64().unwrap_or(0.0);
    let d = (denom >> shift_d as u64).to_f64().unwrap_or(1.0);

    (n / d) * 2f64.powi((shift_n - shift_d) as i32)
}

/// Sign of a rational as -1, 0, +1.
pub fn rational_sign(r: &BigRational) -> i8 {
    if r.is_zero() {
        0
    } else if r.is_positive() {
        1
    } else {
        -1
    }
}

pub fn rat(v: f64) -> BigRational {
    BigRational::from_float(v).expect("finite coordinate")
}

pub fn rat3(v: &Vertex3) -> Rational3 {
    [rat(v[0]), rat(v[1]), rat(v[2])]
}

pub fn rat_int(v: i64) -> BigRational {
    BigRational::from_integer(BigInt::from(v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_points_are_rounded() {
        let p = Point::rounded([0.1, -2.5, 3.0]);
        assert!(p.is_rounded());
        assert_eq!(p.approx(), [0.1, -2.5, 3.0]);
        // materializing and rebuilding round-trips
        let q = Point::exact(p.to_exact());
        assert!(q.is_rounded());
        assert!(p.same_position(&q));
    }

    #[test]
    fn thirds_stay_exact() {
        let third = rat(1.0) / rat(3.0);
        let p = Point::exact([third.clone(), rat(0.0), rat(0.0)]);
        assert!(!p.is_rounded());
        assert_eq!(p.to_exact()[0], third);
        assert!((p.approx()[0] - 1.0 / 3.0).abs() < 1e-15);
    }

    #[test]
    fn rational_to_f64_handles_large_terms() {
        // 2^600 / (2^600 + small) overflows a naive numer/denom conversion
        let big = BigRational::from_integer(BigInt::from(1) << 600);
        let r = &big / (&big + rat_int(7));
        let f = rational_to_f64(&r);
        assert!((f - 1.0).abs() < 1e-12);
    }
}
