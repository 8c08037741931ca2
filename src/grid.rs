use crate::shapes::Shape;

pub const COLS: usize = 10;
pub const ROWS: usize = 20;

type Row = [bool; COLS];

const EMPTY_ROW: Row = [false; COLS];

/// Locked cells of the playfield. Row 0 is the top of the board.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Grid {
    cells: [Row; ROWS],
}

impl Default for Grid {
    fn default() -> Self {
        Self::new()
    }
}

impl Grid {
    pub fn new() -> Self {
        Self {
            cells: [EMPTY_ROW; ROWS],
        }
    }

    pub fn is_filled(&self, x: usize, y: usize) -> bool {
        self.cells[y][x]
    }

    pub fn set(&mut self, x: usize, y: usize, filled: bool) {
        self.cells[y][x] = filled;
    }

    pub fn rows(&self) -> &[Row; ROWS] {
        &self.cells
    }

    pub fn filled_count(&self) -> usize {
        self.cells
            .iter()
            .map(|row| row.iter().filter(|&&c| c).count())
            .sum()
    }

    /// True when `shape` placed with its top-left at `(x, y)` leaves the
    /// board sideways, reaches the floor, or overlaps a locked cell.
    /// Cells above the board (`y < 0`) only check the side walls.
    pub fn collides(&self, shape: &Shape, x: i32, y: i32) -> bool {
        shape.blocks().any(|(px, py)| {
            let gx = x + px;
            let gy = y + py;
            if gx < 0 || gx >= COLS as i32 || gy >= ROWS as i32 {
                return true;
            }
            gy >= 0 && self.cells[gy as usize][gx as usize]
        })
    }

    /// Writes every set cell of `shape` at `(x, y)` into the grid, skipping
    /// cells that lie above the visible board. Returns how many were written.
    pub fn lock(&mut self, shape: &Shape, x: i32, y: i32) -> usize {
        let mut written = 0;
        for (px, py) in shape.blocks() {
            let gx = x + px;
            let gy = y + py;
            if gy < 0 || gy >= ROWS as i32 || gx < 0 || gx >= COLS as i32 {
                continue;
            }
            self.cells[gy as usize][gx as usize] = true;
            written += 1;
        }
        written
    }

    /// Removes full rows bottom-to-top, inserting an empty row at the top for
    /// each one, and returns how many were removed.
    pub fn clear_lines(&mut self) -> usize {
        let mut cleared = 0;
        let mut y = ROWS;
        while y > 0 {
            let row = y - 1;
            if self.cells[row].iter().all(|&c| c) {
                cleared += 1;
                // pull everything above down by one
                for pull in (1..=row).rev() {
                    self.cells[pull] = self.cells[pull - 1];
                }
                self.cells[0] = EMPTY_ROW;
                // same index again: it now holds the row that was above
            } else {
                y -= 1;
            }
        }
        cleared
    }

    /// Row-major `0/1` copy for the JS snapshot.
    pub fn to_flat(&self) -> Vec<u8> {
        self.cells
            .iter()
            .flat_map(|row| row.iter().map(|&c| c as u8))
            .collect()
    }
}
