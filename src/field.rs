//! # Magnetic-field lookup
//!
//! The propagator queries the field through the [`FieldLookup`] trait: a pure, synchronous
//! function of position returning the field vector in kilogauss, or `None` where the map
//! has no data. The minimum implementations are [`ZeroField`] and [`ConstField`];
//! [`BoundedField`] adds a finite world box so callers can exercise the out-of-range
//! fallback policy of the propagator.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::constants::Centimeter;

/// Position-dependent magnetic-field map (kilogauss).
///
/// `None` means the map has no data at `point`; how that is handled (vacuum fallback vs
/// hard error) is the propagator's policy, not the map's.
pub trait FieldLookup {
    fn field_at(&self, point: &Vector3<f64>) -> Option<Vector3<f64>>;
}

/// Field-free volume.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ZeroField;

impl FieldLookup for ZeroField {
    fn field_at(&self, _point: &Vector3<f64>) -> Option<Vector3<f64>> {
        Some(Vector3::zeros())
    }
}

/// Homogeneous field, everywhere defined.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConstField {
    field: Vector3<f64>,
}

impl ConstField {
    pub fn new(field: Vector3<f64>) -> Self {
        ConstField { field }
    }
}

impl FieldLookup for ConstField {
    fn field_at(&self, _point: &Vector3<f64>) -> Option<Vector3<f64>> {
        Some(self.field)
    }
}

/// Homogeneous field inside a cube of half-size `half_size` centered on the origin,
/// no data outside.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BoundedField {
    field: Vector3<f64>,
    half_size: Centimeter,
}

impl BoundedField {
    pub fn new(field: Vector3<f64>, half_size: Centimeter) -> Self {
        BoundedField { field, half_size }
    }
}

impl FieldLookup for BoundedField {
    fn field_at(&self, point: &Vector3<f64>) -> Option<Vector3<f64>> {
        if point.x.abs() > self.half_size
            || point.y.abs() > self.half_size
            || point.z.abs() > self.half_size
        {
            None
        } else {
            Some(self.field)
        }
    }
}
