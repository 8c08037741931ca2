use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
pub enum Tetromino {
    I,
    O,
    T,
    L,
    J,
    S,
    Z,
}

const I_ROWS: &[&[u8]] = &[&[1, 1, 1, 1]];
const O_ROWS: &[&[u8]] = &[&[1, 1], &[1, 1]];
const T_ROWS: &[&[u8]] = &[&[0, 1, 0], &[1, 1, 1]];
const L_ROWS: &[&[u8]] = &[&[1, 0], &[1, 0], &[1, 1]];
const J_ROWS: &[&[u8]] = &[&[0, 1], &[0, 1], &[1, 1]];
const S_ROWS: &[&[u8]] = &[&[0, 1, 1], &[1, 1, 0]];
const Z_ROWS: &[&[u8]] = &[&[1, 1, 0], &[0, 1, 1]];

impl Tetromino {
    pub fn all() -> [Tetromino; 7] {
        [
            Tetromino::I,
            Tetromino::O,
            Tetromino::T,
            Tetromino::L,
            Tetromino::J,
            Tetromino::S,
            Tetromino::Z,
        ]
    }

    /// Catalog matrix in spawn orientation.
    pub fn shape(self) -> Shape {
        let rows = match self {
            Tetromino::I => I_ROWS,
            Tetromino::O => O_ROWS,
            Tetromino::T => T_ROWS,
            Tetromino::L => L_ROWS,
            Tetromino::J => J_ROWS,
            Tetromino::S => S_ROWS,
            Tetromino::Z => Z_ROWS,
        };
        Shape::from_rows(rows)
    }
}

/// Rectangular 0/1 occupancy matrix, row-major, rows top to bottom.
///
/// Every row has the same width and the matrix is never empty. Values are
/// never mutated after construction; rotation builds a new matrix.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Shape {
    rows: Vec<Vec<u8>>,
}

impl Shape {
    pub fn from_rows(rows: &[&[u8]]) -> Self {
        Self {
            rows: rows.iter().map(|r| r.to_vec()).collect(),
        }
    }

    pub fn width(&self) -> usize {
        self.rows.first().map_or(0, |r| r.len())
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> &[Vec<u8>] {
        &self.rows
    }

    /// Offsets `(px, py)` of every set cell.
    pub fn blocks(&self) -> impl Iterator<Item = (i32, i32)> + '_ {
        self.rows.iter().enumerate().flat_map(|(py, row)| {
            row.iter()
                .enumerate()
                .filter(|(_, c)| **c != 0)
                .map(move |(px, _)| (px as i32, py as i32))
        })
    }

    pub fn cell_count(&self) -> usize {
        self.blocks().count()
    }

    /// Clockwise quarter turn (transpose, then reverse each row).
    pub fn rotated(&self) -> Shape {
        let h = self.height();
        let w = self.width();
        let mut rows = vec![vec![0u8; h]; w];
        for (y, row) in self.rows.iter().enumerate() {
            for (x, &c) in row.iter().enumerate() {
                rows[x][h - 1 - y] = c;
            }
        }
        Shape { rows }
    }
}
