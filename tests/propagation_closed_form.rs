//! Checks of the propagator against analytically solvable configurations: straight
//! lines in a field-free vacuum and circular arcs in a homogeneous field.

use approx::assert_relative_eq;
use nalgebra::Vector3;

use gblfit::constants::{Matrix5, KAPPA_FIELD};
use gblfit::field::{ConstField, ZeroField};
use gblfit::geometry::{Plane, PlaneRegistry};
use gblfit::material::{Material, Slab, SlabStack, Vacuum};
use gblfit::propagation::{Propagator, PropagatorParams};
use gblfit::track_state::TrackState;

fn plane_at(registry: &mut PlaneRegistry, z: f64) -> u16 {
    registry.add(
        Plane::new(
            Vector3::new(0.0, 0.0, z),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
        )
        .unwrap(),
    )
}

#[test]
fn test_straight_line_between_parallel_planes() {
    let mut registry = PlaneRegistry::new();
    let a = plane_at(&mut registry, 10.0);
    let b = plane_at(&mut registry, 30.0);

    let state = TrackState::from_global(
        a,
        registry.get(a).unwrap(),
        &Vector3::new(0.1, -0.05, 10.0),
        &Vector3::new(0.002, -0.001, 0.1),
        -1.0,
        Matrix5::identity() * 1.0e-4,
    );
    let (tu, tv) = state.slopes();

    let propagator = Propagator::new(ZeroField, Vacuum, PropagatorParams::default());
    let (out, segment) = propagator
        .extrapolate_to_plane(&state, registry.get(a).unwrap(), b, registry.get(b).unwrap())
        .unwrap();

    // Straight line: u2 = u1 + u' d with d the normal distance between the planes
    let d = 20.0;
    assert_relative_eq!(out.local_position().x, 0.1 + tu * d, epsilon = 1e-9);
    assert_relative_eq!(out.local_position().y, -0.05 + tv * d, epsilon = 1e-9);
    assert_relative_eq!(out.slopes().0, tu, epsilon = 1e-12);
    assert_relative_eq!(out.slopes().1, tv, epsilon = 1e-12);
    assert_relative_eq!(out.qop(), state.qop(), epsilon = 1e-12);

    // The transport Jacobian of a straight line is the identity plus the two
    // slope-to-position lever arms
    for i in 0..5 {
        for j in 0..5 {
            let expected = if i == j {
                1.0
            } else if (i, j) == (3, 1) || (i, j) == (4, 2) {
                d
            } else {
                0.0
            };
            assert_relative_eq!(segment.jacobian[(i, j)], expected, epsilon = 1e-9);
        }
    }

    // No material, no process noise
    assert_eq!(segment.noise.norm(), 0.0);
}

#[test]
fn test_helix_in_homogeneous_field() {
    let mut registry = PlaneRegistry::new();
    let a = plane_at(&mut registry, 0.0);
    let b = plane_at(&mut registry, 10.0);

    // 100 MeV electron along +z in a 1 kG field along +y: a circle in the x-z plane
    let state = TrackState::from_global(
        a,
        registry.get(a).unwrap(),
        &Vector3::new(0.0, 0.0, 0.0),
        &Vector3::new(0.0, 0.0, 0.1),
        -1.0,
        Matrix5::identity() * 1.0e-4,
    );

    let field = ConstField::new(Vector3::new(0.0, 1.0, 0.0));
    let propagator = Propagator::new(field, Vacuum, PropagatorParams::default());
    let (out, _) = propagator
        .extrapolate_to_plane(&state, registry.get(a).unwrap(), b, registry.get(b).unwrap())
        .unwrap();

    // Closed form: z = r sin(phi), x = r (1 - cos(phi)), u' = tan(phi)
    let radius = 1.0 / (KAPPA_FIELD * 10.0 * 1.0);
    let chord = (radius * radius - 100.0).sqrt();
    let expected_u = radius - chord;
    let expected_tu = 10.0 / chord;

    assert_relative_eq!(out.local_position().x, expected_u, epsilon = 1e-6);
    assert_relative_eq!(out.local_position().y, 0.0, epsilon = 1e-9);
    assert_relative_eq!(out.slopes().0, expected_tu, epsilon = 1e-8);
    assert_relative_eq!(out.slopes().1, 0.0, epsilon = 1e-9);

    // Vacuum bending changes direction, not momentum
    assert_relative_eq!(out.qop(), -10.0, epsilon = 1e-10);
}

#[test]
fn test_tight_arc_lands_on_nearby_plane() {
    let mut registry = PlaneRegistry::new();
    let a = plane_at(&mut registry, 0.0);
    let b = plane_at(&mut registry, 1.5);

    // 10 MeV electron in a 10 kG field: bending radius 3.3 cm, strongly curved over
    // the 1.5 cm gap, so the straight-line step estimate repeatedly over- and
    // undershoots the crossing
    let state = TrackState::from_global(
        a,
        registry.get(a).unwrap(),
        &Vector3::new(0.0, 0.0, 0.0),
        &Vector3::new(-0.006, 0.0, 0.008),
        -1.0,
        Matrix5::identity() * 1.0e-4,
    );

    let field = ConstField::new(Vector3::new(0.0, 10.0, 0.0));
    let propagator = Propagator::new(field, Vacuum, PropagatorParams::default());
    let (out, _) = propagator
        .extrapolate_to_plane(&state, registry.get(a).unwrap(), b, registry.get(b).unwrap())
        .unwrap();

    assert_eq!(out.plane(), b);
    // Motion stays in the x-z plane; vacuum bending preserves momentum
    assert_relative_eq!(out.local_position().y, 0.0, epsilon = 1e-9);
    assert_relative_eq!(out.qop(), -100.0, epsilon = 1e-8);
}

#[test]
fn test_silicon_slab_adds_noise_and_energy_loss() {
    let mut registry = PlaneRegistry::new();
    let a = plane_at(&mut registry, 10.0);
    let b = plane_at(&mut registry, 50.0);

    let mut stack = SlabStack::new(Material::vacuum(), 100.0);
    stack.add_slab(Slab {
        center: Vector3::new(0.0, 0.0, 30.0),
        normal: Vector3::new(0.0, 0.0, 1.0),
        half_thickness: 0.05,
        material: Material::silicon(),
    });

    let state = TrackState::from_global(
        a,
        registry.get(a).unwrap(),
        &Vector3::new(0.0, 0.0, 10.0),
        &Vector3::new(0.0, 0.0, 0.1),
        -1.0,
        Matrix5::identity() * 1.0e-4,
    );

    // The material map is sampled at step midpoints, so the step length must stay
    // below the slab thickness for the slab to register
    let params = PropagatorParams::builder().max_step(0.02).build().unwrap();
    let propagator = Propagator::new(ZeroField, stack, params);
    let (out, segment) = propagator
        .extrapolate_to_plane(&state, registry.get(a).unwrap(), b, registry.get(b).unwrap())
        .unwrap();

    // Multiple scattering shows up in the slope block and, through the downstream lever
    // arm, in the positions
    assert!(segment.noise[(1, 1)] > 0.0);
    assert!(segment.noise[(2, 2)] > 0.0);
    assert!(segment.noise[(3, 3)] > 0.0);

    // Energy loss pushes |q/p| up
    assert!(out.qop() < -10.0);
    assert!(out.qop() > -10.5, "unphysically large loss: {}", out.qop());
}
