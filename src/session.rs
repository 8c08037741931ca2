use serde::{Deserialize, Serialize};

use crate::grid::Grid;
use crate::log;
use crate::randomizer::{randomizer_from_kind, Randomizer, RandomizerKind};
use crate::render::RenderStyle;
use crate::shapes::{Shape, Tetromino};

pub const SPAWN_X: i32 = 3;
pub const SPAWN_Y: i32 = 0;
pub const TICK_MS: f64 = 600.0;
pub const POINTS_PER_LINE: u32 = 100;

#[derive(Clone, Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct GameConfig {
    pub tick_ms: f64,
    /// Clears full rows, keeps score and reports it on top-out. When off,
    /// locked rows simply pile up.
    pub enable_scoring: bool,
    pub randomizer: RandomizerKind,
    pub controls: ControlBindings,
    pub score_endpoint: String,
    pub style: RenderStyle,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            tick_ms: TICK_MS,
            enable_scoring: true,
            randomizer: RandomizerKind::default(),
            controls: ControlBindings::default(),
            score_endpoint: "/api/score".to_string(),
            style: RenderStyle::default(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct ControlBindings {
    pub move_left: Vec<String>,
    pub move_right: Vec<String>,
    pub soft_drop: Vec<String>,
    pub rotate: Vec<String>,
}

impl Default for ControlBindings {
    fn default() -> Self {
        Self {
            move_left: vec!["ArrowLeft".to_string()],
            move_right: vec!["ArrowRight".to_string()],
            soft_drop: vec!["ArrowDown".to_string()],
            rotate: vec![
                "ArrowUp".to_string(),
                " ".to_string(),
                "Space".to_string(),
            ],
        }
    }
}

impl ControlBindings {
    pub fn action_for(&self, key: &str) -> Option<Action> {
        let bound = |keys: &[String]| keys.iter().any(|k| k == key);
        if bound(&self.move_left) {
            Some(Action::Left)
        } else if bound(&self.move_right) {
            Some(Action::Right)
        } else if bound(&self.soft_drop) {
            Some(Action::SoftDrop)
        } else if bound(&self.rotate) {
            Some(Action::Rotate)
        } else {
            None
        }
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub enum Action {
    Left,
    Right,
    SoftDrop,
    Rotate,
}

/// Receives the final score when a session tops out.
pub trait ScoreReporter {
    fn report(&mut self, score: u32);
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActivePiece {
    pub kind: Tetromino,
    pub shape: Shape,
    pub x: i32,
    pub y: i32,
}

impl ActivePiece {
    pub fn new(kind: Tetromino) -> Self {
        Self {
            kind,
            shape: kind.shape(),
            x: SPAWN_X,
            y: SPAWN_Y,
        }
    }

    /// Board coordinates of every set cell, including ones above the board.
    pub fn cells(&self) -> impl Iterator<Item = (i32, i32)> + '_ {
        self.shape
            .blocks()
            .map(move |(px, py)| (self.x + px, self.y + py))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    Idle,
    Fell,
    Locked { lines: usize },
    ToppedOut { score: u32 },
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Point {
    pub x: i8,
    pub y: i8,
}

#[derive(Clone, Copy, Serialize, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub pieces: u32,
    pub lines: u32,
}

#[derive(Serialize, Debug)]
pub struct SessionView {
    pub grid: Vec<u8>,
    pub active: Vec<Point>,
    pub active_kind: Option<Tetromino>,
    pub score: u32,
    pub running: bool,
    pub topped_out: bool,
    pub pieces: u32,
    pub lines: u32,
}

pub struct Session {
    config: GameConfig,
    grid: Grid,
    active: Option<ActivePiece>,
    score: u32,
    running: bool,
    topped_out: bool,
    stats: SessionStats,
    tick_accum: f64,
    dirty: bool,
    randomizer: Box<dyn Randomizer>,
    reporter: Box<dyn ScoreReporter>,
}

impl Session {
    pub fn new(config: GameConfig, reporter: Box<dyn ScoreReporter>) -> Self {
        let randomizer = randomizer_from_kind(&config.randomizer);
        Self::with_grid(config, Grid::new(), randomizer, reporter)
    }

    /// Starts a running session on an existing board with a first piece
    /// already spawned.
    pub fn with_grid(
        config: GameConfig,
        grid: Grid,
        randomizer: Box<dyn Randomizer>,
        reporter: Box<dyn ScoreReporter>,
    ) -> Self {
        let mut session = Self {
            config,
            grid,
            active: None,
            score: 0,
            running: true,
            topped_out: false,
            stats: SessionStats::default(),
            tick_accum: 0.0,
            dirty: true,
            randomizer,
            reporter,
        };
        session.spawn();
        session
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn active(&self) -> Option<&ActivePiece> {
        self.active.as_ref()
    }

    pub fn score(&self) -> u32 {
        self.score
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_topped_out(&self) -> bool {
        self.topped_out
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn spawn(&mut self) {
        let kind = self.randomizer.next();
        self.active = Some(ActivePiece::new(kind));
        self.dirty = true;
    }

    /// One gravity step.
    pub fn tick(&mut self) -> TickOutcome {
        if !self.running {
            return TickOutcome::Idle;
        }
        let Some(piece) = self.active.clone() else {
            return TickOutcome::Idle;
        };
        let fallen = ActivePiece {
            y: piece.y + 1,
            ..piece.clone()
        };
        if !self.grid.collides(&fallen.shape, fallen.x, fallen.y) {
            self.active = Some(fallen);
            self.dirty = true;
            return TickOutcome::Fell;
        }
        if piece.y <= 0 {
            let score = self.top_out();
            return TickOutcome::ToppedOut { score };
        }
        let lines = self.lock(&piece);
        self.spawn();
        TickOutcome::Locked { lines }
    }

    /// Feeds host time into the gravity timer and returns how many ticks
    /// fired. At most one tick fires per call; whole periods missed while
    /// the host was not calling (hidden tab) are dropped.
    pub fn advance(&mut self, dt_ms: f64) -> usize {
        if !self.running {
            self.tick_accum = 0.0;
            return 0;
        }
        let period = self.config.tick_ms.max(1.0);
        self.tick_accum += dt_ms.max(0.0);
        if self.tick_accum < period {
            return 0;
        }
        self.tick_accum = (self.tick_accum - period) % period;
        if let TickOutcome::ToppedOut { .. } = self.tick() {
            self.tick_accum = 0.0;
        }
        1
    }

    fn lock(&mut self, piece: &ActivePiece) -> usize {
        self.grid.lock(&piece.shape, piece.x, piece.y);
        self.active = None;
        self.stats.pieces = self.stats.pieces.saturating_add(1);
        self.dirty = true;
        if !self.config.enable_scoring {
            return 0;
        }
        let cleared = self.grid.clear_lines();
        if cleared > 0 {
            self.stats.lines = self.stats.lines.saturating_add(cleared as u32);
            self.score = self
                .score
                .saturating_add(POINTS_PER_LINE * cleared as u32);
        }
        cleared
    }

    fn top_out(&mut self) -> u32 {
        self.running = false;
        self.topped_out = true;
        self.active = None;
        self.tick_accum = 0.0;
        self.dirty = true;
        log(&format!("Top out, final score {}", self.score));
        if self.config.enable_scoring {
            self.reporter.report(self.score);
        }
        self.score
    }

    pub fn handle_key(&mut self, key: &str) -> bool {
        match self.config.controls.action_for(key) {
            Some(action) => self.apply(action),
            None => false,
        }
    }

    /// Applies a player action if the result does not collide. Returns
    /// whether the piece changed. Pausing only stops gravity; the piece can
    /// still be moved. After top-out there is no piece and input is ignored.
    pub fn apply(&mut self, action: Action) -> bool {
        let Some(piece) = self.active.as_ref() else {
            return false;
        };
        let candidate = match action {
            Action::Left => ActivePiece {
                x: piece.x - 1,
                ..piece.clone()
            },
            Action::Right => ActivePiece {
                x: piece.x + 1,
                ..piece.clone()
            },
            Action::SoftDrop => ActivePiece {
                y: piece.y + 1,
                ..piece.clone()
            },
            Action::Rotate => ActivePiece {
                shape: piece.shape.rotated(),
                ..piece.clone()
            },
        };
        if self
            .grid
            .collides(&candidate.shape, candidate.x, candidate.y)
        {
            return false;
        }
        self.active = Some(candidate);
        self.dirty = true;
        true
    }

    /// Pause/resume. Resuming a topped-out session starts a new game.
    pub fn toggle_running(&mut self) {
        if self.running {
            self.running = false;
            self.tick_accum = 0.0;
            return;
        }
        if self.active.is_none() {
            self.restart();
        }
        self.running = true;
    }

    pub fn restart(&mut self) {
        self.grid = Grid::new();
        self.score = 0;
        self.stats = SessionStats::default();
        self.topped_out = false;
        self.tick_accum = 0.0;
        self.running = true;
        self.spawn();
    }

    /// Returns whether anything visible changed since the last call.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }

    pub fn view(&self) -> SessionView {
        let active = self
            .active
            .iter()
            .flat_map(|p| p.cells())
            .filter(|&(_, y)| y >= 0)
            .map(|(x, y)| Point {
                x: x as i8,
                y: y as i8,
            })
            .collect();
        SessionView {
            grid: self.grid.to_flat(),
            active,
            active_kind: self.active.as_ref().map(|p| p.kind),
            score: self.score,
            running: self.running,
            topped_out: self.topped_out,
            pieces: self.stats.pieces,
            lines: self.stats.lines,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{COLS, ROWS};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct Recorder(Rc<RefCell<Vec<u32>>>);

    impl ScoreReporter for Recorder {
        fn report(&mut self, score: u32) {
            self.0.borrow_mut().push(score);
        }
    }

    fn session_with(piece: Tetromino, grid: Grid) -> (Session, Recorder) {
        let recorder = Recorder::default();
        let config = GameConfig {
            randomizer: RandomizerKind::SinglePiece { piece },
            ..GameConfig::default()
        };
        let session = Session::with_grid(
            config.clone(),
            grid,
            randomizer_from_kind(&config.randomizer),
            Box::new(recorder.clone()),
        );
        (session, recorder)
    }

    #[test]
    fn spawns_at_fixed_offset() {
        let (session, _) = session_with(Tetromino::T, Grid::new());
        let piece = session.active().unwrap();
        assert_eq!((piece.x, piece.y), (SPAWN_X, SPAWN_Y));
        assert_eq!(piece.shape, Tetromino::T.shape());
        assert!(session.is_running());
    }

    #[test]
    fn tick_is_noop_while_paused() {
        let (mut session, _) = session_with(Tetromino::O, Grid::new());
        session.toggle_running();
        assert_eq!(session.tick(), TickOutcome::Idle);
        assert_eq!(session.active().unwrap().y, 0);
    }

    #[test]
    fn i_piece_falls_to_floor_then_locks() {
        let (mut session, _) = session_with(Tetromino::I, Grid::new());
        for _ in 0..(ROWS - 1) {
            assert_eq!(session.tick(), TickOutcome::Fell);
        }
        assert_eq!(session.active().unwrap().y, ROWS as i32 - 1);
        assert_eq!(session.tick(), TickOutcome::Locked { lines: 0 });
        assert_eq!(session.grid().filled_count(), 4);
        for x in 3..7 {
            assert!(session.grid().is_filled(x, ROWS - 1));
        }
        // fresh piece back at spawn
        assert_eq!(session.active().unwrap().y, SPAWN_Y);
        assert_eq!(session.stats().pieces, 1);
    }

    #[test]
    fn blocked_at_spawn_tops_out_once() {
        let mut grid = Grid::new();
        grid.set(3, 2, true);
        let (mut session, recorder) = session_with(Tetromino::O, grid);
        assert_eq!(session.tick(), TickOutcome::ToppedOut { score: 0 });
        assert!(!session.is_running());
        assert!(session.is_topped_out());
        assert!(session.active().is_none());
        assert_eq!(session.tick(), TickOutcome::Idle);
        assert_eq!(*recorder.0.borrow(), vec![0]);
    }

    #[test]
    fn scoring_disabled_keeps_rows_and_skips_report() {
        let mut grid = Grid::new();
        for x in 0..COLS {
            if !(3..7).contains(&x) {
                grid.set(x, ROWS - 1, true);
            }
        }
        let recorder = Recorder::default();
        let config = GameConfig {
            enable_scoring: false,
            randomizer: RandomizerKind::SinglePiece { piece: Tetromino::I },
            ..GameConfig::default()
        };
        let mut session = Session::with_grid(
            config.clone(),
            grid,
            randomizer_from_kind(&config.randomizer),
            Box::new(recorder.clone()),
        );
        while session.tick() == TickOutcome::Fell {}
        assert_eq!(session.score(), 0);
        assert_eq!(session.grid().filled_count(), COLS);

        // stack I pieces until the column at spawn is full
        while session.is_running() {
            session.tick();
        }
        assert!(recorder.0.borrow().is_empty());
    }

    #[test]
    fn moves_respect_walls() {
        let (mut session, _) = session_with(Tetromino::O, Grid::new());
        for _ in 0..3 {
            assert!(session.apply(Action::Left));
        }
        assert!(!session.apply(Action::Left));
        assert_eq!(session.active().unwrap().x, 0);
        for _ in 0..8 {
            assert!(session.apply(Action::Right));
        }
        assert!(!session.apply(Action::Right));
        assert_eq!(session.active().unwrap().x, 8);
    }

    #[test]
    fn rotation_fails_silently_against_wall() {
        let (mut session, _) = session_with(Tetromino::I, Grid::new());
        assert!(session.apply(Action::Rotate));
        for _ in 0..6 {
            assert!(session.apply(Action::Right));
        }
        // vertical I at x = 9; horizontal would stick out past the wall
        let before = session.active().unwrap().clone();
        assert!(!session.apply(Action::Rotate));
        assert_eq!(session.active().unwrap(), &before);
    }

    #[test]
    fn soft_drop_stops_at_floor() {
        let (mut session, _) = session_with(Tetromino::O, Grid::new());
        let mut drops = 0;
        while session.apply(Action::SoftDrop) {
            drops += 1;
        }
        assert_eq!(drops, ROWS - 2);
        assert_eq!(session.grid().filled_count(), 0);
    }

    #[test]
    fn keys_map_through_bindings() {
        let (mut session, _) = session_with(Tetromino::T, Grid::new());
        assert!(session.handle_key("ArrowLeft"));
        assert!(session.handle_key("ArrowDown"));
        assert!(session.handle_key(" "));
        assert!(!session.handle_key("KeyQ"));
        let piece = session.active().unwrap();
        assert_eq!((piece.x, piece.y), (2, 1));
        assert_eq!(piece.shape, Tetromino::T.shape().rotated());
    }

    #[test]
    fn keys_still_move_piece_while_paused() {
        let (mut session, _) = session_with(Tetromino::T, Grid::new());
        session.toggle_running();
        assert!(session.handle_key("ArrowLeft"));
        assert_eq!(session.active().unwrap().x, SPAWN_X - 1);
        assert_eq!(session.advance(5000.0), 0);
        assert_eq!(session.active().unwrap().y, SPAWN_Y);
    }

    #[test]
    fn advance_fires_one_tick_per_period() {
        let (mut session, _) = session_with(Tetromino::O, Grid::new());
        assert_eq!(session.advance(599.0), 0);
        assert_eq!(session.advance(1.0), 1);
        assert_eq!(session.advance(1250.0), 1);
        assert_eq!(session.active().unwrap().y, 2);
        // 50 ms carried over from the 1250 ms frame
        assert_eq!(session.advance(549.0), 0);
        assert_eq!(session.advance(1.0), 1);
        assert_eq!(session.active().unwrap().y, 3);

        session.toggle_running();
        assert_eq!(session.advance(5000.0), 0);
        session.toggle_running();
        assert_eq!(session.advance(50.0), 0);
    }

    #[test]
    fn long_gap_fires_a_single_tick() {
        let (mut session, reports) = session_with(Tetromino::O, Grid::new());
        assert_eq!(session.advance(60_000.0), 1);
        assert_eq!(session.active().unwrap().y, 1);
        assert_eq!(session.stats().pieces, 0);
        assert!(session.is_running());
        assert!(reports.0.borrow().is_empty());
        assert_eq!(session.advance(16.0), 0);
    }

    #[test]
    fn resume_after_top_out_restarts() {
        let mut grid = Grid::new();
        grid.set(4, 2, true);
        grid.set(0, 19, true);
        let (mut session, _) = session_with(Tetromino::O, grid);
        assert!(matches!(session.tick(), TickOutcome::ToppedOut { .. }));

        session.toggle_running();
        assert!(session.is_running());
        assert!(!session.is_topped_out());
        assert_eq!(session.grid().filled_count(), 0);
        assert_eq!(session.score(), 0);
        assert!(session.active().is_some());
    }

    #[test]
    fn pause_then_resume_keeps_board() {
        let (mut session, _) = session_with(Tetromino::O, Grid::new());
        session.tick();
        session.toggle_running();
        session.toggle_running();
        assert_eq!(session.active().unwrap().y, 1);
    }

    #[test]
    fn view_lists_visible_active_cells() {
        let (mut session, _) = session_with(Tetromino::I, Grid::new());
        assert!(session.apply(Action::Rotate));
        let view = session.view();
        assert_eq!(view.active.len(), 4);
        assert_eq!(view.active_kind, Some(Tetromino::I));
        assert_eq!(view.grid.len(), COLS * ROWS);
        assert!(session.take_dirty());
        assert!(!session.take_dirty());
    }

    #[test]
    fn config_deserializes_partially() {
        let config: GameConfig =
            serde_json::from_str(r#"{"tick_ms": 250, "enable_scoring": false}"#).unwrap();
        assert_eq!(config.tick_ms, 250.0);
        assert!(!config.enable_scoring);
        assert_eq!(config.score_endpoint, "/api/score");
        assert_eq!(config.controls.action_for("ArrowUp"), Some(Action::Rotate));
    }
}
