//! # Detector planes and the plane registry
//!
//! A [`Plane`] is an immutable flat sensitive surface with an orthonormal local frame:
//! an origin, two in-plane unit axes `u`/`v`, and the normal `n = u × v`. Points project
//! into local `(u, v)` coordinates and back; straight segments intersect analytically
//! (curved intersection is the propagator's job).
//!
//! Planes are owned by a [`PlaneRegistry`] and referenced everywhere else through compact
//! [`PlaneId`] handles, so trajectories never duplicate or mutate plane data.

use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::constants::{Centimeter, EPS};
use crate::gblfit_errors::GblFitError;

/// Compact handle into a [`PlaneRegistry`].
pub type PlaneId = u16;

/// A flat sensitive detector surface with a local 2-D coordinate frame.
///
/// Invariants (enforced at construction, immutable afterwards):
/// * `u_axis` and `v_axis` are unit length and mutually perpendicular,
/// * `normal = u_axis × v_axis` is unit length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plane {
    origin: Vector3<f64>,
    u_axis: Vector3<f64>,
    v_axis: Vector3<f64>,
    normal: Vector3<f64>,
}

impl Plane {
    /// Build a plane from an origin and two spanning axes.
    ///
    /// Both axes are normalized; `v_axis` is Gram-Schmidt orthogonalized against `u_axis`
    /// before normalization, so slightly skewed inputs are accepted. The normal is the
    /// cross product of the resulting unit axes.
    ///
    /// Arguments
    /// -----------------
    /// * `origin`: a point on the plane (cm).
    /// * `u_axis`: first in-plane direction (any non-zero length).
    /// * `v_axis`: second in-plane direction (any non-zero length, not parallel to `u_axis`).
    ///
    /// Return
    /// ----------
    /// * The plane, or [`GblFitError::DegenerateFrame`] if an axis is (near-)zero or the
    ///   axes are parallel.
    pub fn new(
        origin: Vector3<f64>,
        u_axis: Vector3<f64>,
        v_axis: Vector3<f64>,
    ) -> Result<Self, GblFitError> {
        let u_norm = u_axis.norm();
        let v_norm = v_axis.norm();
        if u_norm < EPS || v_norm < EPS {
            return Err(GblFitError::DegenerateFrame(
                "plane axis has zero length".into(),
            ));
        }

        let u = u_axis / u_norm;
        let v_raw = v_axis / v_norm - (v_axis.dot(&u) / v_norm) * u;
        let v_raw_norm = v_raw.norm();
        if v_raw_norm < EPS {
            return Err(GblFitError::DegenerateFrame(
                "plane axes are parallel".into(),
            ));
        }
        let v = v_raw / v_raw_norm;
        let normal = u.cross(&v);

        Ok(Plane {
            origin,
            u_axis: u,
            v_axis: v,
            normal,
        })
    }

    pub fn origin(&self) -> &Vector3<f64> {
        &self.origin
    }

    pub fn u_axis(&self) -> &Vector3<f64> {
        &self.u_axis
    }

    pub fn v_axis(&self) -> &Vector3<f64> {
        &self.v_axis
    }

    pub fn normal(&self) -> &Vector3<f64> {
        &self.normal
    }

    /// Project a 3-D point into local `(u, v)` coordinates.
    ///
    /// The out-of-plane component is dropped by design.
    pub fn to_local(&self, point: &Vector3<f64>) -> Vector2<f64> {
        let d = point - self.origin;
        Vector2::new(d.dot(&self.u_axis), d.dot(&self.v_axis))
    }

    /// Map local `(u, v)` coordinates back to a 3-D point on the plane.
    pub fn to_global(&self, local: &Vector2<f64>) -> Vector3<f64> {
        self.origin + local.x * self.u_axis + local.y * self.v_axis
    }

    /// Signed distance of a point to the plane, along the normal.
    pub fn signed_distance(&self, point: &Vector3<f64>) -> Centimeter {
        (point - self.origin).dot(&self.normal)
    }

    /// Intersect a forward straight ray with the plane.
    ///
    /// Arguments
    /// -----------------
    /// * `pos`: ray start point (cm).
    /// * `dir`: ray direction (need not be normalized).
    /// * `max_path`: path budget (cm).
    ///
    /// Return
    /// ----------
    /// * The in-plane hit point and the path length traveled, or
    ///   [`GblFitError::NoIntersection`] if the ray runs parallel to the plane, the plane
    ///   lies behind the start point, or the hit is farther than `max_path`.
    pub fn intersect_line(
        &self,
        pos: &Vector3<f64>,
        dir: &Vector3<f64>,
        max_path: Centimeter,
    ) -> Result<(Vector2<f64>, Centimeter), GblFitError> {
        let dir_norm = dir.norm();
        if dir_norm < EPS {
            return Err(GblFitError::NoIntersection(0.0));
        }
        let t = dir / dir_norm;
        let tn = t.dot(&self.normal);
        if tn.abs() < EPS {
            return Err(GblFitError::NoIntersection(max_path));
        }
        let s = -self.signed_distance(pos) / tn;
        if s < 0.0 || s > max_path {
            return Err(GblFitError::NoIntersection(max_path));
        }
        let hit = pos + s * t;
        Ok((self.to_local(&hit), s))
    }
}

/// Append-only table of [`Plane`]s, the single owner of plane data.
///
/// Trajectories and measurements hold [`PlaneId`] handles into the registry and resolve
/// them read-only during a fit, so one registry can back many trajectories at once.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlaneRegistry {
    planes: Vec<Plane>,
}

impl PlaneRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plane and return its handle.
    ///
    /// Handles are `u16`, so a registry holds at most 65 536 planes; exceeding that
    /// panics rather than silently aliasing earlier handles.
    pub fn add(&mut self, plane: Plane) -> PlaneId {
        let id: PlaneId = self
            .planes
            .len()
            .try_into()
            .expect("plane registry is full");
        self.planes.push(plane);
        id
    }

    /// Resolve a handle, failing with [`GblFitError::PlaneIndexOutOfRange`] for stale ids.
    pub fn get(&self, id: PlaneId) -> Result<&Plane, GblFitError> {
        self.planes
            .get(id as usize)
            .ok_or(GblFitError::PlaneIndexOutOfRange {
                index: id as usize,
                len: self.planes.len(),
            })
    }

    pub fn len(&self) -> usize {
        self.planes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.planes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PlaneId, &Plane)> {
        self.planes
            .iter()
            .enumerate()
            .map(|(i, p)| (i as PlaneId, p))
    }
}
