use serde::{Deserialize, Serialize};

/// A position on the process canvas.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Layout constants for linear flows.
///
/// These are configuration, not behavior: the assembler never hardcodes
/// coordinates, it asks this config. Shapes are placed on a single row at
/// `row_y`, `spacing` apart, starting at `start_x`. A shape's outbound
/// connection point sits at a fixed offset from the shape's own position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub start_x: f64,
    pub row_y: f64,
    pub spacing: f64,
    pub connection_dx: f64,
    pub connection_dy: f64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            start_x: 96.0,
            row_y: 96.0,
            spacing: 192.0,
            connection_dx: 112.0,
            connection_dy: 16.0,
        }
    }
}

impl LayoutConfig {
    /// Positions for `count` shapes in a single left-to-right row.
    /// Deterministic; `count = 0` yields an empty list.
    pub fn linear_layout(&self, count: usize) -> Vec<Point> {
        (0..count)
            .map(|i| Point {
                x: self.start_x + self.spacing * i as f64,
                y: self.row_y,
            })
            .collect()
    }

    /// Where a shape's outbound connection attaches, relative to the shape.
    pub fn connection_point(&self, shape: Point) -> Point {
        Point {
            x: shape.x + self.connection_dx,
            y: shape.y + self.connection_dy,
        }
    }
}
