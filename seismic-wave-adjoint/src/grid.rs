use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::field::{Field, Init};

/// A cell of the physical (interior) grid. Row `z` counts down from the
/// surface, column `x` counts left to right; neither includes the halo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cell {
    pub z: usize,
    pub x: usize,
}

impl Cell {
    pub fn new(z: usize, x: usize) -> Self {
        Cell { z, x }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Grid {
    pub nx: usize,   // Number of interior points in x direction
    pub nz: usize,   // Number of interior points in z direction
    pub dh: f64,     // Grid spacing (meters), shared by both axes
    pub halo: usize, // Padding cells on every side
}

impl Grid {
    pub fn new(nx: usize, nz: usize, dh: f64, halo: usize) -> Self {
        Grid { nx, nz, dh, halo }
    }

    pub fn interior_shape(&self) -> (usize, usize) {
        (self.nz, self.nx)
    }

    pub fn padded_shape(&self) -> (usize, usize) {
        (self.nz + 2 * self.halo, self.nx + 2 * self.halo)
    }

    pub fn x_coord(&self, i: usize) -> f64 {
        // Convert interior column i to physical x coordinate
        self.dh * (i as f64)
    }

    pub fn z_coord(&self, k: usize) -> f64 {
        // Convert interior row k to physical depth
        self.dh * (k as f64)
    }

    pub fn in_bounds(&self, cell: Cell) -> bool {
        cell.x < self.nx && cell.z < self.nz
    }

    pub fn check(&self, cell: Cell) -> Result<Cell> {
        if self.in_bounds(cell) {
            Ok(cell)
        } else {
            Err(Error::CellOutOfBounds {
                z: cell.z,
                x: cell.x,
                nz: self.nz,
                nx: self.nx,
            })
        }
    }

    pub fn width(&self) -> f64 {
        (self.nx - 1) as f64 * self.dh
    }

    pub fn height(&self) -> f64 {
        (self.nz - 1) as f64 * self.dh
    }

    /// Allocate a field covering this grid.
    pub fn field(&self, name: &str, init: Init) -> Field {
        Field::new(name, self.interior_shape(), self.halo, init)
    }
}
