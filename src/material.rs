//! # Material model and lookup
//!
//! [`Material`] carries the handful of bulk properties the propagator needs to model
//! multiple scattering and energy loss: radiation length, density, Z/A, and mean
//! excitation energy. The [`MaterialLookup`] trait is the position-dependent boundary
//! contract; [`SlabStack`] reproduces the usual tracker layout of thin sensor slabs
//! inside a vacuum world box.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::constants::{
    Centimeter, Gev, SILICON_DENSITY, SILICON_EXCITATION_ENERGY, SILICON_RADIATION_LENGTH,
    SILICON_Z_OVER_A,
};

/// Bulk material properties entering the material-effects model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Material {
    /// Radiation length X₀ (cm). Infinite for vacuum.
    pub radiation_length: Centimeter,
    /// Density (g/cm³).
    pub density: f64,
    /// Ratio of atomic number to atomic mass.
    pub z_over_a: f64,
    /// Mean excitation energy I (GeV).
    pub mean_excitation_energy: Gev,
}

impl Material {
    /// Perfect vacuum: infinite radiation length, zero density.
    pub fn vacuum() -> Self {
        Material {
            radiation_length: f64::INFINITY,
            density: 0.0,
            z_over_a: 0.0,
            mean_excitation_energy: 1.0e-9,
        }
    }

    pub fn silicon() -> Self {
        Material {
            radiation_length: SILICON_RADIATION_LENGTH,
            density: SILICON_DENSITY,
            z_over_a: SILICON_Z_OVER_A,
            mean_excitation_energy: SILICON_EXCITATION_ENERGY,
        }
    }

    pub fn is_vacuum(&self) -> bool {
        self.density <= 0.0 || !self.radiation_length.is_finite()
    }
}

/// Position-dependent material map.
///
/// `None` means the map has no data at `point` (outside the modeled geometry).
pub trait MaterialLookup {
    fn material_at(&self, point: &Vector3<f64>) -> Option<Material>;
}

/// Everywhere-defined vacuum.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Vacuum;

impl MaterialLookup for Vacuum {
    fn material_at(&self, _point: &Vector3<f64>) -> Option<Material> {
        Some(Material::vacuum())
    }
}

/// A finite-thickness material slab: all points within `half_thickness` of the plane
/// through `center` with unit normal `normal`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Slab {
    pub center: Vector3<f64>,
    pub normal: Vector3<f64>,
    pub half_thickness: Centimeter,
    pub material: Material,
}

impl Slab {
    fn contains(&self, point: &Vector3<f64>) -> bool {
        (point - self.center).dot(&self.normal).abs() <= self.half_thickness
    }
}

/// Material slabs embedded in a background medium inside a cubic world box.
///
/// Queries outside the box return `None`; inside, the first containing slab wins,
/// otherwise the background material (usually vacuum) is returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlabStack {
    slabs: Vec<Slab>,
    background: Material,
    world_half_size: Centimeter,
}

impl SlabStack {
    pub fn new(background: Material, world_half_size: Centimeter) -> Self {
        SlabStack {
            slabs: Vec::new(),
            background,
            world_half_size,
        }
    }

    pub fn add_slab(&mut self, slab: Slab) {
        self.slabs.push(slab);
    }
}

impl MaterialLookup for SlabStack {
    fn material_at(&self, point: &Vector3<f64>) -> Option<Material> {
        if point.x.abs() > self.world_half_size
            || point.y.abs() > self.world_half_size
            || point.z.abs() > self.world_half_size
        {
            return None;
        }
        for slab in &self.slabs {
            if slab.contains(point) {
                return Some(slab.material);
            }
        }
        Some(self.background)
    }
}

#[cfg(test)]
mod material_test {
    use super::*;

    #[test]
    fn test_slab_stack_lookup() {
        let mut stack = SlabStack::new(Material::vacuum(), 100.0);
        stack.add_slab(Slab {
            center: Vector3::new(0.0, 0.0, 10.0),
            normal: Vector3::new(0.0, 0.0, 1.0),
            half_thickness: 0.05,
            material: Material::silicon(),
        });

        let inside = stack.material_at(&Vector3::new(3.0, -2.0, 10.02)).unwrap();
        assert_eq!(inside, Material::silicon());

        let between = stack.material_at(&Vector3::new(0.0, 0.0, 20.0)).unwrap();
        assert!(between.is_vacuum());

        assert_eq!(stack.material_at(&Vector3::new(0.0, 0.0, 120.0)), None);
    }
}
