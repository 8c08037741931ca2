use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{thread_rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::shapes::Tetromino;

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
pub enum RandomizerKind {
    #[default]
    TrueRandom,
    Seeded { seed: u64 },
    SinglePiece { piece: Tetromino },
}

pub trait Randomizer {
    fn next(&mut self) -> Tetromino;
}

struct TrueRandom;

impl Randomizer for TrueRandom {
    fn next(&mut self) -> Tetromino {
        let mut rng = thread_rng();
        *Tetromino::all()
            .choose(&mut rng)
            .unwrap_or(&Tetromino::I)
    }
}

struct Seeded {
    rng: StdRng,
}

impl Randomizer for Seeded {
    fn next(&mut self) -> Tetromino {
        *Tetromino::all()
            .choose(&mut self.rng)
            .unwrap_or(&Tetromino::I)
    }
}

struct SinglePiece {
    piece: Tetromino,
}

impl Randomizer for SinglePiece {
    fn next(&mut self) -> Tetromino {
        self.piece
    }
}

pub fn randomizer_from_kind(kind: &RandomizerKind) -> Box<dyn Randomizer> {
    match kind {
        RandomizerKind::TrueRandom => Box::new(TrueRandom),
        RandomizerKind::Seeded { seed } => Box::new(Seeded {
            rng: StdRng::seed_from_u64(*seed),
        }),
        RandomizerKind::SinglePiece { piece } => Box::new(SinglePiece { piece: *piece }),
    }
}
