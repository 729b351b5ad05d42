//! Patrol trajectory generation and traversal.
//!
//! Shapes are laid out around a center point using spherical degree offsets,
//! then swept back and forth (or looped, for closed shapes) by the flight
//! state machine.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::geodesic::{meters_to_lat_deg, meters_to_lon_deg};
use crate::models::{GeoPoint, Waypoint};

/// Default vertex count for circles.
pub const DEFAULT_CIRCLE_POINTS: usize = 8;
/// Default segment count for lines.
pub const DEFAULT_LINE_SEGMENTS: usize = 4;

/// Same-point tolerance used to detect closed trajectories, in degrees.
const CLOSING_TOLERANCE_DEG: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrajectoryKind {
    Rectangle,
    Circle,
    Triangle,
    Line,
    Custom,
}

impl TrajectoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrajectoryKind::Rectangle => "RECTANGLE",
            TrajectoryKind::Circle => "CIRCLE",
            TrajectoryKind::Triangle => "TRIANGLE",
            TrajectoryKind::Line => "LINE",
            TrajectoryKind::Custom => "CUSTOM",
        }
    }
}

impl fmt::Display for TrajectoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrajectoryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            TrajectoryKind::Rectangle,
            TrajectoryKind::Circle,
            TrajectoryKind::Triangle,
            TrajectoryKind::Line,
            TrajectoryKind::Custom,
        ]
        .into_iter()
        .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
        .ok_or_else(|| s.to_string())
    }
}

/// Geometry of a patrol pattern, sizes in meters.
#[derive(Debug, Clone, PartialEq)]
pub enum PatrolShape {
    Rectangle { width: f64, height: f64 },
    Circle { radius: f64, num_points: usize },
    /// Equilateral, apex pointing north
    Triangle { size: f64 },
    /// From the center to `end`, split into `num_points` segments
    Line { end: GeoPoint, num_points: usize },
    Custom { points: Vec<Waypoint> },
}

impl PatrolShape {
    pub fn kind(&self) -> TrajectoryKind {
        match self {
            PatrolShape::Rectangle { .. } => TrajectoryKind::Rectangle,
            PatrolShape::Circle { .. } => TrajectoryKind::Circle,
            PatrolShape::Triangle { .. } => TrajectoryKind::Triangle,
            PatrolShape::Line { .. } => TrajectoryKind::Line,
            PatrolShape::Custom { .. } => TrajectoryKind::Custom,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrajectoryError {
    #[error("{0} trajectory generation produced no waypoints")]
    Degenerate(TrajectoryKind),
}

/// Generate the ordered waypoints for `shape` around `center` at `altitude`.
///
/// Degenerate geometry (non-positive sizes, zero point counts, non-finite
/// inputs) yields an empty list.
pub fn generate(shape: &PatrolShape, center: GeoPoint, altitude: f64) -> Vec<Waypoint> {
    if !center.lat.is_finite() || !center.lon.is_finite() || !altitude.is_finite() {
        return Vec::new();
    }

    match shape {
        PatrolShape::Rectangle { width, height } => rectangle(center, *width, *height, altitude),
        PatrolShape::Circle { radius, num_points } => circle(center, *radius, *num_points, altitude),
        PatrolShape::Triangle { size } => triangle(center, *size, altitude),
        PatrolShape::Line { end, num_points } => line(center, *end, *num_points, altitude),
        PatrolShape::Custom { points } => points
            .iter()
            .copied()
            .filter(|p| p.lat.is_finite() && p.lon.is_finite() && p.alt.is_finite())
            .collect(),
    }
}

fn positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

fn rectangle(center: GeoPoint, width: f64, height: f64, altitude: f64) -> Vec<Waypoint> {
    if !positive(width) || !positive(height) {
        return Vec::new();
    }
    let lat_offset = meters_to_lat_deg(height / 2.0);
    let lon_offset = meters_to_lon_deg(width / 2.0, center.lat);

    vec![
        Waypoint::new(center.lat + lat_offset, center.lon - lon_offset, altitude),
        Waypoint::new(center.lat + lat_offset, center.lon + lon_offset, altitude),
        Waypoint::new(center.lat - lat_offset, center.lon + lon_offset, altitude),
        Waypoint::new(center.lat - lat_offset, center.lon - lon_offset, altitude),
    ]
}

fn circle(center: GeoPoint, radius: f64, num_points: usize, altitude: f64) -> Vec<Waypoint> {
    if !positive(radius) || num_points == 0 {
        return Vec::new();
    }
    (0..num_points)
        .map(|i| {
            let angle = 2.0 * PI * i as f64 / num_points as f64;
            Waypoint::new(
                center.lat + meters_to_lat_deg(radius * angle.cos()),
                center.lon + meters_to_lon_deg(radius * angle.sin(), center.lat),
                altitude,
            )
        })
        .collect()
}

fn triangle(center: GeoPoint, size: f64, altitude: f64) -> Vec<Waypoint> {
    if !positive(size) {
        return Vec::new();
    }
    let height = size * 3f64.sqrt() / 2.0;
    let apex = meters_to_lat_deg(height * 2.0 / 3.0);
    let base = meters_to_lat_deg(height / 3.0);
    let half_base = meters_to_lon_deg(size / 2.0, center.lat);

    vec![
        Waypoint::new(center.lat + apex, center.lon, altitude),
        Waypoint::new(center.lat - base, center.lon - half_base, altitude),
        Waypoint::new(center.lat - base, center.lon + half_base, altitude),
    ]
}

fn line(start: GeoPoint, end: GeoPoint, num_points: usize, altitude: f64) -> Vec<Waypoint> {
    if num_points == 0 || !end.lat.is_finite() || !end.lon.is_finite() {
        return Vec::new();
    }
    (0..=num_points)
        .map(|i| {
            let t = i as f64 / num_points as f64;
            Waypoint::new(
                start.lat + t * (end.lat - start.lat),
                start.lon + t * (end.lon - start.lon),
                altitude,
            )
        })
        .collect()
}

/// An ordered, traversable set of waypoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trajectory {
    kind: TrajectoryKind,
    points: Vec<Waypoint>,
    index: usize,
    direction: i8,
    cycles: f64,
    closed: bool,
}

impl Trajectory {
    /// Wrap generated points; empty input is a generation failure.
    pub fn new(kind: TrajectoryKind, points: Vec<Waypoint>) -> Result<Self, TrajectoryError> {
        if points.is_empty() {
            return Err(TrajectoryError::Degenerate(kind));
        }
        let closed = points.len() > 2 && same_point(&points[0], &points[points.len() - 1]);
        Ok(Self {
            kind,
            points,
            index: 0,
            direction: 1,
            cycles: 0.0,
            closed,
        })
    }

    pub fn build(shape: &PatrolShape, center: GeoPoint, altitude: f64) -> Result<Self, TrajectoryError> {
        let points = generate(shape, center, altitude);
        tracing::debug!(
            kind = %shape.kind(),
            points = points.len(),
            "Generated patrol trajectory around ({:.6}, {:.6})",
            center.lat,
            center.lon
        );
        Self::new(shape.kind(), points)
    }

    pub fn kind(&self) -> TrajectoryKind {
        self.kind
    }

    pub fn points(&self) -> &[Waypoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn direction(&self) -> i8 {
        self.direction
    }

    pub fn cycles(&self) -> f64 {
        self.cycles
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Waypoint under the cursor.
    pub fn current(&self) -> Option<Waypoint> {
        self.points.get(self.index).copied()
    }

    /// Step the cursor and return the new target.
    ///
    /// Open trajectories reflect at both ends (+0.5 cycles per reflection);
    /// closed ones restart after the closing point (+1 cycle). Returns `None`
    /// when there is no distinct next waypoint.
    pub fn advance(&mut self) -> Option<Waypoint> {
        let len = self.points.len() as isize;
        if len == 0 {
            return None;
        }

        let mut next = self.index as isize + self.direction as isize;
        if self.closed && next >= len {
            next = 1;
            self.cycles += 1.0;
        } else if next >= len {
            next = len - 2;
            self.direction = -1;
            self.cycles += 0.5;
            tracing::debug!(cycles = self.cycles, "Reached end of trajectory, reversing");
        } else if next < 0 {
            next = 1;
            self.direction = 1;
            self.cycles += 0.5;
            tracing::debug!(cycles = self.cycles, "Reached start of trajectory, reversing");
        }

        if next < 0 || next >= len {
            return None;
        }
        self.index = next as usize;
        self.current()
    }
}

fn same_point(a: &Waypoint, b: &Waypoint) -> bool {
    (a.lat - b.lat).abs() < CLOSING_TOLERANCE_DEG && (a.lon - b.lon).abs() < CLOSING_TOLERANCE_DEG
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geodesic::distance;

    const CENTER: GeoPoint = GeoPoint {
        lat: 41.7962,
        lon: 123.4309,
    };

    #[test]
    fn rectangle_has_four_corners_with_requested_extent() {
        let points = generate(
            &PatrolShape::Rectangle {
                width: 100.0,
                height: 50.0,
            },
            CENTER,
            30.0,
        );
        assert_eq!(points.len(), 4);

        let top = distance(points[0].lat, points[0].lon, points[1].lat, points[1].lon);
        let side = distance(points[1].lat, points[1].lon, points[2].lat, points[2].lon);
        assert!((top - 100.0).abs() < 0.5, "top edge {top}");
        assert!((side - 50.0).abs() < 0.5, "side edge {side}");
        assert!(points.iter().all(|p| p.alt == 30.0));
    }

    #[test]
    fn circle_points_lie_on_radius() {
        let points = generate(
            &PatrolShape::Circle {
                radius: 80.0,
                num_points: DEFAULT_CIRCLE_POINTS,
            },
            CENTER,
            20.0,
        );
        assert_eq!(points.len(), 8);
        for p in &points {
            let r = distance(CENTER.lat, CENTER.lon, p.lat, p.lon);
            assert!((r - 80.0).abs() < 0.5, "radius {r}");
        }
        // First point due north of center
        assert!(points[0].lat > CENTER.lat);
        assert!((points[0].lon - CENTER.lon).abs() < 1e-12);
    }

    #[test]
    fn triangle_apex_is_north() {
        let points = generate(&PatrolShape::Triangle { size: 120.0 }, CENTER, 20.0);
        assert_eq!(points.len(), 3);
        assert!(points[0].lat > CENTER.lat);
        assert!(points[1].lat < CENTER.lat && points[2].lat < CENTER.lat);
        let base = distance(points[1].lat, points[1].lon, points[2].lat, points[2].lon);
        assert!((base - 120.0).abs() < 0.5);
    }

    #[test]
    fn line_includes_both_ends() {
        let end = GeoPoint {
            lat: CENTER.lat + 0.001,
            lon: CENTER.lon + 0.001,
        };
        let points = generate(
            &PatrolShape::Line {
                end,
                num_points: DEFAULT_LINE_SEGMENTS,
            },
            CENTER,
            25.0,
        );
        assert_eq!(points.len(), 5);
        assert_eq!(points[0].point(), CENTER);
        assert!((points[4].lat - end.lat).abs() < 1e-12);
        assert!((points[4].lon - end.lon).abs() < 1e-12);
    }

    #[test]
    fn degenerate_shapes_yield_nothing() {
        let shapes = [
            PatrolShape::Rectangle {
                width: 0.0,
                height: 50.0,
            },
            PatrolShape::Circle {
                radius: -5.0,
                num_points: 8,
            },
            PatrolShape::Circle {
                radius: 5.0,
                num_points: 0,
            },
            PatrolShape::Triangle { size: 0.0 },
            PatrolShape::Line {
                end: CENTER,
                num_points: 0,
            },
            PatrolShape::Custom { points: Vec::new() },
        ];
        for shape in &shapes {
            assert!(generate(shape, CENTER, 20.0).is_empty(), "{shape:?}");
            assert_eq!(
                Trajectory::build(shape, CENTER, 20.0),
                Err(TrajectoryError::Degenerate(shape.kind()))
            );
        }
    }

    #[test]
    fn open_trajectory_sweeps_back_and_forth() {
        let shape = PatrolShape::Rectangle {
            width: 100.0,
            height: 50.0,
        };
        let mut trajectory = Trajectory::build(&shape, CENTER, 30.0).unwrap();
        assert!(!trajectory.is_closed());

        let mut visited = vec![trajectory.index()];
        let mut cycles = vec![trajectory.cycles()];
        for _ in 0..7 {
            assert!(trajectory.advance().is_some());
            visited.push(trajectory.index());
            cycles.push(trajectory.cycles());
        }
        assert_eq!(visited, vec![0, 1, 2, 3, 2, 1, 0, 1]);
        assert_eq!(cycles, vec![0.0, 0.0, 0.0, 0.0, 0.5, 0.5, 0.5, 1.0]);
        assert_eq!(trajectory.direction(), 1);
    }

    #[test]
    fn closed_trajectory_loops_from_top() {
        let points = vec![
            Waypoint::new(1.0, 1.0, 10.0),
            Waypoint::new(1.001, 1.0, 10.0),
            Waypoint::new(1.001, 1.001, 10.0),
            Waypoint::new(1.0, 1.0, 10.0),
        ];
        let mut trajectory = Trajectory::new(TrajectoryKind::Custom, points).unwrap();
        assert!(trajectory.is_closed());

        let visited: Vec<usize> = (0..5)
            .map(|_| {
                trajectory.advance();
                trajectory.index()
            })
            .collect();
        assert_eq!(visited, vec![1, 2, 3, 1, 2]);
        assert_eq!(trajectory.cycles(), 1.0);
        assert_eq!(trajectory.direction(), 1);
    }

    #[test]
    fn single_point_trajectory_has_no_next_waypoint() {
        let mut trajectory =
            Trajectory::new(TrajectoryKind::Custom, vec![Waypoint::new(1.0, 1.0, 10.0)]).unwrap();
        assert_eq!(trajectory.advance(), None);
        assert_eq!(trajectory.advance(), None);
        assert_eq!(trajectory.current(), Some(Waypoint::new(1.0, 1.0, 10.0)));
    }
}
