#![allow(dead_code)]

use nalgebra::Vector3;

use gblfit::constants::Matrix5;
use gblfit::field::ConstField;
use gblfit::geometry::{Plane, PlaneId, PlaneRegistry};
use gblfit::material::{Material, Slab, SlabStack};
use gblfit::track_state::TrackState;

/// Five measurement planes at z = 10, 30, ..., 90 cm. The second plane is built with a
/// flipped u axis, so its normal points backward along z and tracks cross it from the
/// negative side.
pub fn five_plane_registry() -> (PlaneRegistry, Vec<PlaneId>) {
    let mut registry = PlaneRegistry::new();
    let mut ids = Vec::new();
    for k in 0..5 {
        let z = 10.0 + 20.0 * k as f64;
        let u_axis = if k == 1 {
            Vector3::new(-1.0, 0.0, 0.0)
        } else {
            Vector3::new(1.0, 0.0, 0.0)
        };
        let plane = Plane::new(Vector3::new(0.0, 0.0, z), u_axis, Vector3::new(0.0, 1.0, 0.0))
            .unwrap();
        ids.push(registry.add(plane));
    }
    (registry, ids)
}

/// 1 mm silicon sensors at the registered plane positions, inside a 1 m vacuum world box.
pub fn silicon_sensors(registry: &PlaneRegistry) -> SlabStack {
    let mut stack = SlabStack::new(Material::vacuum(), 100.0);
    for (_, plane) in registry.iter() {
        stack.add_slab(Slab {
            center: *plane.origin(),
            normal: *plane.normal(),
            half_thickness: 0.05,
            material: Material::silicon(),
        });
    }
    stack
}

/// Homogeneous 1 kG field along y.
pub fn solenoid_field() -> ConstField {
    ConstField::new(Vector3::new(0.0, 1.0, 0.0))
}

/// Electron state on the given plane from a global position and momentum.
pub fn electron_state(
    registry: &PlaneRegistry,
    id: PlaneId,
    position: Vector3<f64>,
    momentum: Vector3<f64>,
) -> TrackState {
    TrackState::from_global(
        id,
        registry.get(id).unwrap(),
        &position,
        &momentum,
        -1.0,
        Matrix5::identity() * 1.0e-2,
    )
}
