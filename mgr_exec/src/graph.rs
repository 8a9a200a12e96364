//! # Navigation Graph
//!
//! The navigation graph is the shared map of the facility: indexed waypoints on named levels,
//! joined by directed lanes. The manager reconciles reported robot locations against it and
//! validates navigation and relocalization requests with it. The graph is read-only once built.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use nalgebra::Vector2;
use serde::Deserialize;
use std::collections::HashSet;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A single navigable waypoint in the graph.
#[derive(Debug, Clone)]
pub struct GraphWaypoint {
    /// Name of the level the waypoint is on
    pub level_name: String,

    /// Position of the waypoint in the fleet frame, in meters
    pub position_m: Vector2<f64>
}

/// A directed lane joining two waypoints.
#[derive(Debug, Clone, Copy)]
pub struct GraphLane {
    /// Index of the waypoint the lane starts at
    pub entry: usize,

    /// Index of the waypoint the lane ends at
    pub exit: usize
}

/// The navigation graph itself.
#[derive(Debug, Clone, Default)]
pub struct NavGraph {
    waypoints: Vec<GraphWaypoint>,
    lanes: Vec<GraphLane>,
    levels: HashSet<String>
}

/// On-disk form of the graph, loaded from a TOML parameter file.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphSpec {
    pub waypoints: Vec<WaypointSpec>,

    #[serde(default)]
    pub lanes: Vec<LaneSpec>
}

/// On-disk form of a waypoint.
#[derive(Debug, Clone, Deserialize)]
pub struct WaypointSpec {
    pub level_name: String,
    pub x_m: f64,
    pub y_m: f64
}

/// On-disk form of a lane.
#[derive(Debug, Clone, Deserialize)]
pub struct LaneSpec {
    pub entry: usize,
    pub exit: usize
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors raised by graph construction and queries.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("The graph has no waypoints")]
    EmptyGraph,

    #[error("Waypoint index {0} is outside the graph ({1} waypoints)")]
    WaypointOutOfRange(usize, usize),

    #[error("Lane index {0} is outside the graph ({1} lanes)")]
    LaneOutOfRange(usize, usize)
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl NavGraph {

    /// Create a new empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from its on-disk specification.
    pub fn from_spec(spec: &GraphSpec) -> Result<Self, GraphError> {
        let mut graph = Self::new();

        for wp in spec.waypoints.iter() {
            graph.add_waypoint(&wp.level_name, Vector2::new(wp.x_m, wp.y_m));
        }

        for lane in spec.lanes.iter() {
            graph.add_lane(lane.entry, lane.exit)?;
        }

        Ok(graph)
    }

    /// Add a waypoint on the given level, returning its index.
    pub fn add_waypoint(&mut self, level_name: &str, position_m: Vector2<f64>) -> usize {
        self.waypoints.push(GraphWaypoint {
            level_name: level_name.to_owned(),
            position_m
        });
        self.levels.insert(level_name.to_owned());
        self.waypoints.len() - 1
    }

    /// Add a directed lane between two existing waypoints, returning its index.
    pub fn add_lane(&mut self, entry: usize, exit: usize) -> Result<usize, GraphError> {
        let num_wps = self.waypoints.len();
        if entry >= num_wps {
            return Err(GraphError::WaypointOutOfRange(entry, num_wps))
        }
        if exit >= num_wps {
            return Err(GraphError::WaypointOutOfRange(exit, num_wps))
        }

        self.lanes.push(GraphLane { entry, exit });
        Ok(self.lanes.len() - 1)
    }

    /// Number of waypoints in the graph.
    pub fn num_waypoints(&self) -> usize {
        self.waypoints.len()
    }

    /// Number of lanes in the graph.
    pub fn num_lanes(&self) -> usize {
        self.lanes.len()
    }

    /// Get a waypoint by index.
    pub fn waypoint(&self, index: usize) -> Result<&GraphWaypoint, GraphError> {
        self.waypoints
            .get(index)
            .ok_or(GraphError::WaypointOutOfRange(index, self.waypoints.len()))
    }

    /// Get a lane by index.
    pub fn lane(&self, index: usize) -> Result<&GraphLane, GraphError> {
        self.lanes
            .get(index)
            .ok_or(GraphError::LaneOutOfRange(index, self.lanes.len()))
    }

    /// Check whether any waypoint sits on the given level.
    pub fn has_level(&self, level_name: &str) -> bool {
        self.levels.contains(level_name)
    }

    /// Find the waypoint nearest to the given fleet-frame coordinates.
    ///
    /// Returns the index of the nearest waypoint and the distance to it. Ties are broken in
    /// favour of the lowest index. Fails if the graph has no waypoints.
    pub fn nearest_waypoint(
        &self,
        coordinates: &Vector2<f64>
    ) -> Result<(usize, f64), GraphError> {
        let mut nearest: Option<(usize, f64)> = None;

        for (i, wp) in self.waypoints.iter().enumerate() {
            let dist = (coordinates - wp.position_m).norm();
            match nearest {
                Some((_, nearest_dist)) if dist >= nearest_dist => (),
                _ => nearest = Some((i, dist))
            }
        }

        nearest.ok_or(GraphError::EmptyGraph)
    }

    /// Perpendicular distance from the given coordinates to the infinite line through the lane's
    /// endpoints.
    pub fn distance_to_lane(
        &self,
        lane_index: usize,
        coordinates: &Vector2<f64>
    ) -> Result<f64, GraphError> {
        let lane = self.lane(lane_index)?;
        let p0 = self.waypoint(lane.entry)?.position_m;
        let p1 = self.waypoint(lane.exit)?.position_m;

        let lane_length = (p1 - p0).norm();
        let pn = (p1 - p0) / lane_length;
        let p_l = coordinates - p0;
        let p_l_projection = p_l.dot(&pn);

        Ok((p_l - p_l_projection * pn).norm())
    }

    /// Check whether the projection of the given coordinates onto the lane falls within the lane
    /// segment.
    pub fn is_within_lane(
        &self,
        lane_index: usize,
        coordinates: &Vector2<f64>
    ) -> Result<bool, GraphError> {
        let lane = self.lane(lane_index)?;
        let p0 = self.waypoint(lane.entry)?.position_m;
        let p1 = self.waypoint(lane.exit)?.position_m;

        let lane_length = (p1 - p0).norm();
        let pn = (p1 - p0) / lane_length;
        let p_l = coordinates - p0;
        let p_l_projection = p_l.dot(&pn);

        Ok(p_l_projection >= 0.0 && p_l_projection <= lane_length)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// Build the graph used throughout the manager tests: a cross of waypoints around the origin
    /// plus one far-away outlier.
    fn test_graph() -> NavGraph {
        let mut graph = NavGraph::new();
        graph.add_waypoint("test_level", Vector2::new(0.0, 0.0));
        graph.add_waypoint("test_level", Vector2::new(10.0, 0.0));
        graph.add_waypoint("test_level", Vector2::new(-10.0, 0.0));
        graph.add_waypoint("test_level", Vector2::new(0.0, 10.0));
        graph.add_waypoint("test_level", Vector2::new(0.0, -10.0));
        for (entry, exit) in [(0, 1), (1, 0), (0, 2), (2, 0), (0, 3), (3, 0), (0, 4), (4, 0)]
            .iter()
        {
            graph.add_lane(*entry, *exit).unwrap();
        }
        graph
    }

    #[test]
    fn test_empty_graph_nearest_fails() {
        let graph = NavGraph::new();
        assert!(matches!(
            graph.nearest_waypoint(&Vector2::new(0.0, 0.0)),
            Err(GraphError::EmptyGraph)
        ));
    }

    #[test]
    fn test_nearest_waypoint() {
        let graph = test_graph();

        let (index, dist) = graph.nearest_waypoint(&Vector2::new(9.0, 1.0)).unwrap();
        assert_eq!(index, 1);
        assert!((dist - 2.0f64.sqrt()).abs() < 1e-9);

        let (index, dist) = graph.nearest_waypoint(&Vector2::new(0.1, -0.1)).unwrap();
        assert_eq!(index, 0);
        assert!(dist < 0.2);
    }

    #[test]
    fn test_nearest_waypoint_tie_breaks_low_index() {
        // (5, 0) is equidistant from waypoints 0 and 1
        let graph = test_graph();
        let (index, dist) = graph.nearest_waypoint(&Vector2::new(5.0, 0.0)).unwrap();
        assert_eq!(index, 0);
        assert!((dist - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_lane_queries() {
        let graph = test_graph();

        // Lane 0 runs from (0, 0) to (10, 0). A point 0.5 m above its midpoint.
        let point = Vector2::new(5.0, 0.5);
        assert!((graph.distance_to_lane(0, &point).unwrap() - 0.5).abs() < 1e-9);
        assert!(graph.is_within_lane(0, &point).unwrap());

        // Beyond the exit waypoint the projection leaves the segment, but the distance to the
        // infinite line is unchanged.
        let beyond = Vector2::new(12.0, 0.5);
        assert!(!graph.is_within_lane(0, &beyond).unwrap());
        assert!((graph.distance_to_lane(0, &beyond).unwrap() - 0.5).abs() < 1e-9);

        // Before the entry waypoint
        assert!(!graph.is_within_lane(0, &Vector2::new(-1.0, 0.0)).unwrap());
    }

    #[test]
    fn test_add_lane_validates_indices() {
        let mut graph = test_graph();
        assert!(matches!(
            graph.add_lane(0, 100),
            Err(GraphError::WaypointOutOfRange(100, 5))
        ));
        assert!(matches!(
            graph.add_lane(100, 0),
            Err(GraphError::WaypointOutOfRange(100, 5))
        ));
    }

    #[test]
    fn test_from_spec() {
        let spec: GraphSpec = toml::from_str(
            r#"
            [[waypoints]]
            level_name = "ground"
            x_m = 0.0
            y_m = 0.0

            [[waypoints]]
            level_name = "ground"
            x_m = 5.0
            y_m = 0.0

            [[lanes]]
            entry = 0
            exit = 1
            "#
        )
        .unwrap();

        let graph = NavGraph::from_spec(&spec).unwrap();
        assert_eq!(graph.num_waypoints(), 2);
        assert_eq!(graph.num_lanes(), 1);
        assert!(graph.has_level("ground"));
        assert!(!graph.has_level("upper"));
    }
}
