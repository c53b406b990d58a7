// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Geometry handed over by the scripting client.
//!
//! These types stand in for the B-rep handles of a CAD kernel. They are plain
//! data: classification lives in [`crate::normalize`], meshing in `cadview-tess`.

use serde::{Deserialize, Serialize};

/// A point in model space.
pub type Point3 = [f64; 3];

/// Closed volumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Solid {
    /// Axis-aligned box spanning `origin .. origin + size`.
    Box {
        /// Minimum corner.
        origin: Point3,
        /// Extents along X, Y, Z.
        size: [f64; 3],
    },
    /// Sphere.
    Sphere {
        /// Center point.
        center: Point3,
        /// Radius.
        radius: f64,
    },
    /// Cylinder standing on `base`, extruded along +Z.
    Cylinder {
        /// Center of the bottom cap.
        base: Point3,
        /// Radius.
        radius: f64,
        /// Height along +Z.
        height: f64,
    },
}

/// Bounded surfaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Face {
    /// Planar polygon given by its outer boundary (implicitly closed).
    Polygon {
        /// Boundary points, in order.
        points: Vec<Point3>,
    },
    /// Planar circular disk.
    Disk {
        /// Center point.
        center: Point3,
        /// Plane normal (need not be unit length).
        normal: Point3,
        /// Radius.
        radius: f64,
    },
}

/// Curves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Edge {
    /// Straight segment.
    Line {
        /// Start point.
        start: Point3,
        /// End point.
        end: Point3,
    },
    /// Open polyline through the given points.
    Polyline {
        /// Points, in order.
        points: Vec<Point3>,
    },
    /// Full circle.
    Circle {
        /// Center point.
        center: Point3,
        /// Plane normal (need not be unit length).
        normal: Point3,
        /// Radius.
        radius: f64,
    },
}

/// A pre-tessellated triangle mesh.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MeshData {
    /// Vertex positions.
    pub vertices: Vec<Point3>,
    /// Triangles as indices into `vertices`.
    pub triangles: Vec<[u32; 3]>,
}

/// Any object a client can ask to show.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CadObject {
    /// A closed volume.
    Solid(Solid),
    /// A set of connected faces.
    Shell(Vec<Face>),
    /// A single face.
    Face(Face),
    /// A single edge.
    Edge(Edge),
    /// A single vertex.
    Vertex(Point3),
    /// A pre-tessellated mesh.
    Mesh(MeshData),
    /// A group of objects shown as one entry.
    Compound(Vec<CadObject>),
    /// A kernel object of a type this pipeline cannot classify.
    Foreign {
        /// Type name reported by the kernel.
        type_name: String,
    },
}

impl CadObject {
    /// Box with its minimum corner at the origin.
    pub fn cuboid(width: f64, height: f64, depth: f64) -> Self {
        Self::Solid(Solid::Box {
            origin: [0.0; 3],
            size: [width, height, depth],
        })
    }

    /// Sphere centered at the origin.
    pub fn sphere(radius: f64) -> Self {
        Self::Solid(Solid::Sphere {
            center: [0.0; 3],
            radius,
        })
    }

    /// Cylinder standing on the origin.
    pub fn cylinder(radius: f64, height: f64) -> Self {
        Self::Solid(Solid::Cylinder {
            base: [0.0; 3],
            radius,
            height,
        })
    }

    /// Straight edge between two points.
    pub fn line(start: Point3, end: Point3) -> Self {
        Self::Edge(Edge::Line { start, end })
    }

    /// Planar polygon face.
    pub fn polygon(points: Vec<Point3>) -> Self {
        Self::Face(Face::Polygon { points })
    }
}
