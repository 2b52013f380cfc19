//! baby jubjub, the twisted edwards curve embedded in the bn254 scalar field
//!
//! a*x^2 + y^2 = 1 + d*x^2*y^2 with a = 168700, d = 168696, in the
//! coordinates circomlib uses.

use ark_ff::{BigInteger, Field, MontFp, One, PrimeField, Zero};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::error::{CryptoError, Result};
use crate::field::{serde_fr, snark_field_size, Fr};

pub const A: Fr = MontFp!("168700");
pub const D: Fr = MontFp!("168696");

/// generator of the prime-order subgroup
pub const BASE8: Point = Point {
    x: MontFp!("5299619240641551281634865583518297030282874472190772894086521144482721001553"),
    y: MontFp!("16950150798460657717958625567821834550301663161624707787222815936182638968203"),
};

/// order of the subgroup generated by BASE8
pub const SUB_ORDER: &str =
    "2736030358979909402780800718157159386076813972158567259200215660948447373041";

pub fn sub_order() -> BigUint {
    SUB_ORDER.parse().unwrap_or_default()
}

/// Affine point on baby jubjub.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    #[serde(with = "serde_fr")]
    pub x: Fr,
    #[serde(with = "serde_fr")]
    pub y: Fr,
}

impl Default for Point {
    fn default() -> Self {
        Self::identity()
    }
}

impl Point {
    pub fn new(x: Fr, y: Fr) -> Self {
        Self { x, y }
    }

    pub fn identity() -> Self {
        Self {
            x: Fr::zero(),
            y: Fr::one(),
        }
    }

    pub fn is_on_curve(&self) -> bool {
        let x2 = self.x.square();
        let y2 = self.y.square();
        A * x2 + y2 == Fr::one() + D * x2 * y2
    }

    /// Edwards addition. denominators are nonzero for points on the curve;
    /// off-curve input yields an unspecified point.
    pub fn add(&self, other: &Point) -> Point {
        let x1x2 = self.x * other.x;
        let y1y2 = self.y * other.y;
        let dxy = D * x1x2 * y1y2;
        let x_num = self.x * other.y + self.y * other.x;
        let y_num = y1y2 - A * x1x2;
        let x_den = (Fr::one() + dxy).inverse().unwrap_or_default();
        let y_den = (Fr::one() - dxy).inverse().unwrap_or_default();
        Point {
            x: x_num * x_den,
            y: y_num * y_den,
        }
    }

    /// double-and-add over the big-endian bits of `scalar`
    pub fn mul_scalar(&self, scalar: &BigUint) -> Point {
        let mut acc = Point::identity();
        for i in (0..scalar.bits()).rev() {
            acc = acc.add(&acc);
            if scalar.bit(i) {
                acc = acc.add(self);
            }
        }
        acc
    }

    /// Compress to 32 bytes: y little-endian, top bit carries the sign of x.
    pub fn pack(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        let y = self.y.into_bigint().to_bytes_le();
        out[..y.len()].copy_from_slice(&y);
        if self.x.into_bigint() > Fr::MODULUS_MINUS_ONE_DIV_TWO {
            out[31] |= 0x80;
        }
        out
    }

    pub fn unpack(packed: &[u8; 32]) -> Result<Point> {
        let mut bytes = *packed;
        let negative = bytes[31] & 0x80 != 0;
        bytes[31] &= 0x7f;

        let y_int = BigUint::from_bytes_le(&bytes);
        if y_int >= snark_field_size() {
            return Err(CryptoError::InvalidPackedPoint);
        }
        let y = Fr::from(y_int);
        let y2 = y.square();
        let num = Fr::one() - y2;
        let den = (A - D * y2)
            .inverse()
            .ok_or(CryptoError::InvalidPackedPoint)?;
        let mut x = (num * den).sqrt().ok_or(CryptoError::InvalidPackedPoint)?;
        // canonical root is the one in the lower half
        if x.into_bigint() > Fr::MODULUS_MINUS_ONE_DIV_TWO {
            x = -x;
        }
        if negative {
            x = -x;
        }
        Ok(Point { x, y })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base8_on_curve() {
        assert!(BASE8.is_on_curve());
        assert!(Point::identity().is_on_curve());
        assert!(!Point::new(Fr::from(1u64), Fr::from(1u64)).is_on_curve());
    }

    #[test]
    fn test_subgroup_order() {
        assert_eq!(BASE8.mul_scalar(&sub_order()), Point::identity());
        let one = BASE8.mul_scalar(&BigUint::from(1u8));
        assert_eq!(one, BASE8);
    }

    #[test]
    fn test_add_matches_mul() {
        let two = BASE8.add(&BASE8);
        assert_eq!(two, BASE8.mul_scalar(&BigUint::from(2u8)));
        let five = BASE8.mul_scalar(&BigUint::from(5u8));
        let three = BASE8.mul_scalar(&BigUint::from(3u8));
        assert_eq!(five, two.add(&three));
        assert!(five.is_on_curve());
    }

    #[test]
    fn test_pack_round_trip() {
        for k in [1u32, 2, 7, 1000, 123456] {
            let p = BASE8.mul_scalar(&BigUint::from(k));
            assert_eq!(Point::unpack(&p.pack()).unwrap(), p);
            let neg = Point::new(-p.x, p.y);
            assert_eq!(Point::unpack(&neg.pack()).unwrap(), neg);
        }
    }

    #[test]
    fn test_unpack_rejects_garbage() {
        let bytes = [0xffu8; 32];
        assert!(Point::unpack(&bytes).is_err());
    }
}
