//! Compile-time unit safety for the quantities the state estimator moves
//! around: active/reactive power, per-unit voltage, and angle.
//!
//! Power-flow code mixes MW, MVAr, per-unit voltages, and degrees/radians
//! constantly; raw `f64` makes it easy to add a power to an angle by
//! accident. These newtypes catch that at compile time for zero runtime
//! cost (`#[repr(transparent)]`, same layout as `f64`).
//!
//! ```
//! use gridwatch_core::units::{Megawatts, Megavars};
//!
//! let p = Megawatts(10.0) + Megawatts(5.0);
//! assert_eq!(p.value(), 15.0);
//! ```

use serde::{Deserialize, Serialize};
use std::ops::{Add, Div, Mul, Neg, Sub};

macro_rules! impl_unit_ops {
    ($type:ty, $unit_name:literal) => {
        impl Add for $type {
            type Output = Self;
            fn add(self, rhs: Self) -> Self::Output {
                Self(self.0 + rhs.0)
            }
        }

        impl Sub for $type {
            type Output = Self;
            fn sub(self, rhs: Self) -> Self::Output {
                Self(self.0 - rhs.0)
            }
        }

        impl Neg for $type {
            type Output = Self;
            fn neg(self) -> Self::Output {
                Self(-self.0)
            }
        }

        impl Mul<f64> for $type {
            type Output = Self;
            fn mul(self, rhs: f64) -> Self::Output {
                Self(self.0 * rhs)
            }
        }

        impl Mul<$type> for f64 {
            type Output = $type;
            fn mul(self, rhs: $type) -> Self::Output {
                <$type>::new(self * rhs.0)
            }
        }

        impl Div<f64> for $type {
            type Output = Self;
            fn div(self, rhs: f64) -> Self::Output {
                Self(self.0 / rhs)
            }
        }

        impl Div<$type> for $type {
            type Output = f64;
            fn div(self, rhs: $type) -> Self::Output {
                self.0 / rhs.0
            }
        }

        impl std::fmt::Display for $type {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{:.4} {}", self.0, $unit_name)
            }
        }

        impl $type {
            #[inline]
            pub const fn new(value: f64) -> Self {
                Self(value)
            }

            #[inline]
            pub const fn value(self) -> f64 {
                self.0
            }

            #[inline]
            pub fn abs(self) -> Self {
                Self(self.0.abs())
            }

            #[inline]
            pub fn is_finite(self) -> bool {
                self.0.is_finite()
            }

            #[inline]
            pub fn is_nan(self) -> bool {
                self.0.is_nan()
            }

            #[inline]
            pub fn min(self, other: Self) -> Self {
                Self(self.0.min(other.0))
            }

            #[inline]
            pub fn max(self, other: Self) -> Self {
                Self(self.0.max(other.0))
            }

            #[inline]
            pub fn clamp(self, min: Self, max: Self) -> Self {
                Self(self.0.clamp(min.0, max.0))
            }
        }

        impl std::iter::Sum for $type {
            fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
                Self(iter.map(|x| x.0).sum())
            }
        }

        impl<'a> std::iter::Sum<&'a $type> for $type {
            fn sum<I: Iterator<Item = &'a Self>>(iter: I) -> Self {
                Self(iter.map(|x| x.0).sum())
            }
        }
    };
}

/// Active power in megawatts.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Megawatts(pub f64);
impl_unit_ops!(Megawatts, "MW");

/// Reactive power in megavolt-amperes reactive.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Megavars(pub f64);
impl_unit_ops!(Megavars, "Mvar");

/// Voltage magnitude expressed as a fraction of nominal (1.0 = nominal).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct PerUnit(pub f64);
impl_unit_ops!(PerUnit, "pu");

impl PerUnit {
    /// Convert to a physical voltage given the nominal line-to-line kV.
    #[inline]
    pub fn to_kilovolts(self, nominal: Kilovolts) -> Kilovolts {
        Kilovolts(self.0 * nominal.0)
    }
}

/// Nominal or physical voltage in kilovolts.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Kilovolts(pub f64);
impl_unit_ops!(Kilovolts, "kV");

impl Kilovolts {
    #[inline]
    pub fn to_per_unit(self, nominal: Kilovolts) -> PerUnit {
        if nominal.0.abs() < 1e-12 {
            PerUnit(0.0)
        } else {
            PerUnit(self.0 / nominal.0)
        }
    }
}

/// Bus voltage angle in degrees, as produced by the power-flow solver.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Degrees(pub f64);
impl_unit_ops!(Degrees, "deg");

impl Degrees {
    pub const ZERO: Degrees = Degrees(0.0);

    #[inline]
    pub fn to_radians(self) -> Radians {
        Radians(self.0.to_radians())
    }
}

/// Angle in radians, the natural unit for the Newton-Raphson equations.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Radians(pub f64);
impl_unit_ops!(Radians, "rad");

impl Radians {
    pub const ZERO: Radians = Radians(0.0);

    #[inline]
    pub fn to_degrees(self) -> Degrees {
        Degrees(self.0.to_degrees())
    }
}

/// Branch current in kiloamperes.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Kiloamperes(pub f64);
impl_unit_ops!(Kiloamperes, "kA");

impl Kiloamperes {
    /// Convert to amperes, the unit the emitted snapshot uses (spec §4.7).
    #[inline]
    pub fn to_amperes(self) -> f64 {
        self.0 * 1000.0
    }
}
