//! Board State
//!
//! The 15x15 grid and the five-in-a-row scan.
//! Cells are serialized as the integers 0 (empty), 1 (black), 2 (white)
//! to match the wire format of board snapshots.

use serde::{Deserialize, Serialize};

/// Board side length.
pub const BOARD_SIZE: usize = 15;

/// Number of consecutive stones required to win.
pub const WIN_LENGTH: usize = 5;

/// Total number of cells; a game with this many moves and no winner is a draw.
pub const MAX_MOVES: u32 = (BOARD_SIZE * BOARD_SIZE) as u32;

/// The four scan axes: horizontal, vertical, down-right, down-left.
const AXES: [(i32, i32); 4] = [(0, 1), (1, 0), (1, 1), (1, -1)];

/// A single board cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(u8)]
#[serde(into = "u8", try_from = "u8")]
pub enum Cell {
    /// No stone placed.
    #[default]
    Empty = 0,
    /// Black stone (player 1).
    Black = 1,
    /// White stone (player 2 or AI).
    White = 2,
}

impl From<Cell> for u8 {
    fn from(cell: Cell) -> u8 {
        cell as u8
    }
}

impl TryFrom<u8> for Cell {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Cell::Empty),
            1 => Ok(Cell::Black),
            2 => Ok(Cell::White),
            other => Err(format!("invalid cell value: {}", other)),
        }
    }
}

/// The 15x15 playing grid.
///
/// Owned exclusively by one `GameSession`; never shared across sessions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    cells: [[Cell; BOARD_SIZE]; BOARD_SIZE],
}

impl Default for Board {
    fn default() -> Self {
        Self::new()
    }
}

impl Board {
    /// Create an empty board.
    pub fn new() -> Self {
        Self {
            cells: [[Cell::Empty; BOARD_SIZE]; BOARD_SIZE],
        }
    }

    /// Check whether a coordinate pair is on the board.
    pub fn in_bounds(row: i32, col: i32) -> bool {
        row >= 0 && col >= 0 && (row as usize) < BOARD_SIZE && (col as usize) < BOARD_SIZE
    }

    /// Get the cell at a position. Out-of-bounds reads return `None`.
    pub fn get(&self, row: usize, col: usize) -> Option<Cell> {
        self.cells.get(row)?.get(col).copied()
    }

    /// Whether the cell at a (known in-bounds) position is empty.
    pub fn is_empty(&self, row: usize, col: usize) -> bool {
        self.get(row, col) == Some(Cell::Empty)
    }

    /// Place a stone. The caller has already validated bounds and emptiness;
    /// a non-empty target is a logic error and is left untouched.
    ///
    /// Returns whether the write happened. Cells only ever transition
    /// empty -> stone, never back.
    pub fn place(&mut self, row: usize, col: usize, stone: Cell) -> bool {
        if stone == Cell::Empty {
            return false;
        }
        match self.cells.get_mut(row).and_then(|r| r.get_mut(col)) {
            Some(cell) if *cell == Cell::Empty => {
                *cell = stone;
                true
            }
            _ => false,
        }
    }

    /// Count placed stones of one color.
    pub fn count(&self, stone: Cell) -> usize {
        self.cells
            .iter()
            .flat_map(|row| row.iter())
            .filter(|&&c| c == stone)
            .count()
    }

    /// Scan the four axes through the just-placed stone and report whether
    /// any run reaches five. Walks positively and negatively along each
    /// axis, counting consecutive same-valued cells plus the stone itself.
    pub fn five_through(&self, row: usize, col: usize) -> bool {
        self.winning_line_through(row, col).is_some()
    }

    /// As `five_through`, but returns the coordinates of a winning run of
    /// exactly `WIN_LENGTH` cells containing the placed stone, if one exists.
    pub fn winning_line_through(&self, row: usize, col: usize) -> Option<Vec<(usize, usize)>> {
        let stone = self.get(row, col)?;
        if stone == Cell::Empty {
            return None;
        }

        for (dr, dc) in AXES {
            let mut line = vec![(row, col)];

            // Walk the positive direction.
            let mut r = row as i32 + dr;
            let mut c = col as i32 + dc;
            while Self::in_bounds(r, c) && self.get(r as usize, c as usize) == Some(stone) {
                line.push((r as usize, c as usize));
                r += dr;
                c += dc;
            }

            // Walk the negative direction.
            let mut r = row as i32 - dr;
            let mut c = col as i32 - dc;
            while Self::in_bounds(r, c) && self.get(r as usize, c as usize) == Some(stone) {
                line.insert(0, (r as usize, c as usize));
                r -= dr;
                c -= dc;
            }

            if line.len() >= WIN_LENGTH {
                // Trim to a run of five containing the placed stone.
                let placed_at = line.iter().position(|&p| p == (row, col)).unwrap_or(0);
                let start = placed_at.saturating_sub(WIN_LENGTH - 1).min(line.len() - WIN_LENGTH);
                return Some(line[start..start + WIN_LENGTH].to_vec());
            }
        }

        None
    }

    /// Rebuild a board from a wire snapshot. Invalid cell values read as
    /// empty.
    pub fn from_snapshot(snapshot: &[[u8; BOARD_SIZE]; BOARD_SIZE]) -> Self {
        let mut board = Board::new();
        for (r, row) in snapshot.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                if let Ok(cell) = Cell::try_from(*value) {
                    board.cells[r][c] = cell;
                }
            }
        }
        board
    }

    /// Raw snapshot as the wire integer grid.
    pub fn snapshot(&self) -> [[u8; BOARD_SIZE]; BOARD_SIZE] {
        let mut out = [[0u8; BOARD_SIZE]; BOARD_SIZE];
        for (r, row) in self.cells.iter().enumerate() {
            for (c, cell) in row.iter().enumerate() {
                out[r][c] = *cell as u8;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn place_run(board: &mut Board, start: (usize, usize), delta: (i32, i32), n: usize, stone: Cell) {
        let (mut r, mut c) = (start.0 as i32, start.1 as i32);
        for _ in 0..n {
            assert!(board.place(r as usize, c as usize, stone));
            r += delta.0;
            c += delta.1;
        }
    }

    #[test]
    fn test_empty_board() {
        let board = Board::new();
        assert_eq!(board.count(Cell::Black), 0);
        assert_eq!(board.count(Cell::White), 0);
        assert!(board.is_empty(7, 7));
    }

    #[test]
    fn test_place_and_get() {
        let mut board = Board::new();
        assert!(board.place(7, 7, Cell::Black));
        assert_eq!(board.get(7, 7), Some(Cell::Black));
        assert!(!board.is_empty(7, 7));
    }

    #[test]
    fn test_place_occupied_rejected() {
        let mut board = Board::new();
        assert!(board.place(7, 7, Cell::Black));
        // Occupied cell never changes value.
        assert!(!board.place(7, 7, Cell::White));
        assert_eq!(board.get(7, 7), Some(Cell::Black));
    }

    #[test]
    fn test_place_empty_stone_rejected() {
        let mut board = Board::new();
        assert!(!board.place(7, 7, Cell::Empty));
        assert!(board.is_empty(7, 7));
    }

    #[test]
    fn test_in_bounds() {
        assert!(Board::in_bounds(0, 0));
        assert!(Board::in_bounds(14, 14));
        assert!(!Board::in_bounds(-1, 0));
        assert!(!Board::in_bounds(0, 15));
        assert!(!Board::in_bounds(15, 3));
    }

    #[test]
    fn test_horizontal_win() {
        let mut board = Board::new();
        place_run(&mut board, (7, 3), (0, 1), 5, Cell::Black);
        for col in 3..8 {
            assert!(board.five_through(7, col), "missed at col {}", col);
        }
        assert!(!board.five_through(7, 8));
    }

    #[test]
    fn test_vertical_win() {
        let mut board = Board::new();
        place_run(&mut board, (2, 9), (1, 0), 5, Cell::White);
        assert!(board.five_through(4, 9));
    }

    #[test]
    fn test_diagonal_down_right_win() {
        let mut board = Board::new();
        place_run(&mut board, (3, 3), (1, 1), 5, Cell::Black);
        assert!(board.five_through(5, 5));
    }

    #[test]
    fn test_diagonal_down_left_win() {
        let mut board = Board::new();
        place_run(&mut board, (3, 11), (1, -1), 5, Cell::White);
        assert!(board.five_through(5, 9));
    }

    #[test]
    fn test_win_ending_at_corner() {
        let mut board = Board::new();
        // Run into the (14,14) corner on the down-right diagonal.
        place_run(&mut board, (10, 10), (1, 1), 5, Cell::Black);
        assert!(board.five_through(14, 14));

        // And into the (0,0) corner horizontally.
        let mut board = Board::new();
        place_run(&mut board, (0, 0), (0, 1), 5, Cell::White);
        assert!(board.five_through(0, 0));
    }

    #[test]
    fn test_four_is_not_a_win() {
        let mut board = Board::new();
        place_run(&mut board, (7, 3), (0, 1), 4, Cell::Black);
        for col in 3..7 {
            assert!(!board.five_through(7, col));
        }
    }

    #[test]
    fn test_broken_run_is_not_a_win() {
        let mut board = Board::new();
        place_run(&mut board, (7, 3), (0, 1), 4, Cell::Black);
        assert!(board.place(7, 8, Cell::Black));
        // (7,7) is white; 4 + gap + 1 does not connect.
        assert!(board.place(7, 7, Cell::White));
        assert!(!board.five_through(7, 8));
        assert!(!board.five_through(7, 6));
    }

    #[test]
    fn test_overline_counts_as_win() {
        let mut board = Board::new();
        place_run(&mut board, (7, 3), (0, 1), 6, Cell::Black);
        let line = board.winning_line_through(7, 5).unwrap();
        assert_eq!(line.len(), WIN_LENGTH);
        assert!(line.contains(&(7, 5)));
    }

    #[test]
    fn test_winning_line_passes_through_placed_stone() {
        let mut board = Board::new();
        place_run(&mut board, (4, 4), (1, 1), 5, Cell::Black);
        for i in 0..5 {
            let line = board.winning_line_through(4 + i, 4 + i).unwrap();
            assert!(line.contains(&(4 + i, 4 + i)));
            assert_eq!(line.len(), WIN_LENGTH);
        }
    }

    #[test]
    fn test_mixed_colors_do_not_connect() {
        let mut board = Board::new();
        place_run(&mut board, (7, 3), (0, 1), 3, Cell::Black);
        place_run(&mut board, (7, 6), (0, 1), 2, Cell::White);
        assert!(!board.five_through(7, 5));
        assert!(!board.five_through(7, 6));
    }

    #[test]
    fn test_random_fill_order_independent_counts() {
        use rand::rngs::StdRng;
        use rand::seq::SliceRandom;
        use rand::SeedableRng;

        let mut rng = StdRng::seed_from_u64(7);
        let mut cells: Vec<(usize, usize)> = (0..BOARD_SIZE)
            .flat_map(|r| (0..BOARD_SIZE).map(move |c| (r, c)))
            .collect();
        cells.shuffle(&mut rng);

        let mut board = Board::new();
        for (i, (r, c)) in cells.iter().enumerate() {
            let stone = if i % 2 == 0 { Cell::Black } else { Cell::White };
            assert!(board.place(*r, *c, stone));
        }
        assert_eq!(board.count(Cell::Black), 113);
        assert_eq!(board.count(Cell::White), 112);
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let mut board = Board::new();
        board.place(0, 0, Cell::Black);
        board.place(14, 14, Cell::White);
        let snap = board.snapshot();
        assert_eq!(snap[0][0], 1);
        assert_eq!(snap[14][14], 2);
        assert_eq!(snap[7][7], 0);
    }

    #[test]
    fn test_cell_serde_as_integers() {
        let board = {
            let mut b = Board::new();
            b.place(0, 1, Cell::Black);
            b
        };
        let json = serde_json::to_string(&board).unwrap();
        let parsed: Board = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, board);
        // First row serializes as raw integers.
        assert!(json.starts_with("{\"cells\":[[0,1,0"));
    }
}
