//! Polygonal mesh fragments and their codec.
//!
//! A [`PolyMesh`] is the piece of surface geometry one rank owns: a point
//! list, a cell array indexing into it, and optional per-point scalar arrays.
//! Appending two meshes concatenates their points and re-bases the appended
//! cells, which is all the redistribution layer ever does with geometry.

pub mod codec;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Cells stored as a flat connectivity list with one end offset per cell.
///
/// Cell `i` uses `connectivity[offsets[i - 1]..offsets[i]]` (with an implicit
/// leading zero), so a cell may be a vertex, a line or any polygon.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CellArray {
    offsets: Vec<u32>,
    connectivity: Vec<u32>,
}

impl CellArray {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from parts, checking that offsets are monotone and end at the connectivity length.
    pub fn from_parts(offsets: Vec<u32>, connectivity: Vec<u32>) -> Result<Self, String> {
        let mut prev = 0;
        for &o in &offsets {
            if o < prev {
                return Err(format!("cell offsets decrease ({prev} then {o})"));
            }
            prev = o;
        }
        if prev as usize != connectivity.len() {
            return Err(format!(
                "last offset {prev} does not match connectivity length {}",
                connectivity.len()
            ));
        }
        Ok(Self {
            offsets,
            connectivity,
        })
    }

    pub fn push(&mut self, cell: &[u32]) {
        self.connectivity.extend_from_slice(cell);
        self.offsets.push(self.connectivity.len() as u32);
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn offsets(&self) -> &[u32] {
        &self.offsets
    }

    pub fn connectivity(&self) -> &[u32] {
        &self.connectivity
    }

    pub fn cell(&self, i: usize) -> &[u32] {
        let start = if i == 0 { 0 } else { self.offsets[i - 1] as usize };
        &self.connectivity[start..self.offsets[i] as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u32]> + '_ {
        (0..self.len()).map(move |i| self.cell(i))
    }

    /// Append `other`'s cells with every point index shifted by `shift`.
    fn extend_shifted(&mut self, other: &CellArray, shift: u32) {
        let base = self.connectivity.len() as u32;
        self.connectivity
            .extend(other.connectivity.iter().map(|&p| p + shift));
        self.offsets.extend(other.offsets.iter().map(|&o| o + base));
    }
}

/// One rank's surface mesh fragment.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PolyMesh {
    pub points: Vec<[f64; 3]>,
    pub cells: CellArray,
    /// Named scalar arrays, one value per point.
    pub point_data: BTreeMap<String, Vec<f64>>,
}

impl PolyMesh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn n_points(&self) -> usize {
        self.points.len()
    }

    pub fn n_cells(&self) -> usize {
        self.cells.len()
    }

    /// No points and no cells. Point-data arrays of an empty mesh carry no values.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty() && self.cells.is_empty()
    }

    pub fn add_point(&mut self, p: [f64; 3]) -> u32 {
        self.points.push(p);
        (self.points.len() - 1) as u32
    }

    pub fn add_cell(&mut self, cell: &[u32]) {
        self.cells.push(cell);
    }

    /// Attach a point-data array; it must hold one value per point.
    pub fn set_point_data(&mut self, name: impl Into<String>, values: Vec<f64>) -> Result<(), String> {
        if values.len() != self.points.len() {
            return Err(format!(
                "point array has {} values for {} points",
                values.len(),
                self.points.len()
            ));
        }
        self.point_data.insert(name.into(), values);
        Ok(())
    }

    /// Append `other` after `self`.
    ///
    /// Points are concatenated and `other`'s cells are shifted past `self`'s
    /// points. Only point arrays both meshes carry survive, except that an
    /// empty side never removes the other side's arrays.
    pub fn append(&mut self, other: &PolyMesh) {
        if other.is_empty() {
            return;
        }
        if self.is_empty() {
            *self = other.clone();
            return;
        }
        let shift = self.points.len() as u32;
        self.points.extend_from_slice(&other.points);
        self.cells.extend_shifted(&other.cells, shift);
        self.point_data.retain(|name, values| match other.point_data.get(name) {
            Some(more) => {
                values.extend_from_slice(more);
                true
            }
            None => {
                log::debug!("dropping point array `{name}`: missing on appended mesh");
                false
            }
        });
    }

    /// Check that every cell refers to an existing point and every array has one value per point.
    pub fn validate(&self) -> Result<(), String> {
        let n = self.points.len() as u32;
        if let Some(bad) = self.cells.connectivity().iter().find(|&&p| p >= n) {
            return Err(format!("cell refers to point {bad} of {n}"));
        }
        for (name, values) in &self.point_data {
            if values.len() != self.points.len() {
                return Err(format!(
                    "point array `{name}` has {} values for {} points",
                    values.len(),
                    self.points.len()
                ));
            }
        }
        Ok(())
    }
}
