use crate::{Result, Score};

/// Anything that can produce the timed notes of one piece.
pub trait PieceSource: Send + Sync {
    fn id(&self) -> String;

    /// Fails with `UnreadablePiece` when the piece cannot be decoded.
    fn load(&self) -> Result<Score>;
}

#[derive(Clone, Debug)]
pub struct InMemoryPiece {
    id: String,
    score: Score,
}

impl InMemoryPiece {
    pub fn new(id: &str, score: Score) -> Self {
        InMemoryPiece {id: id.to_owned(), score}
    }

    pub fn score(&self) -> &Score {&self.score}
}

impl PieceSource for InMemoryPiece {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn load(&self) -> Result<Score> {
        Ok(self.score.clone())
    }
}

impl <S: PieceSource + ?Sized> PieceSource for &S {
    fn id(&self) -> String {
        (**self).id()
    }

    fn load(&self) -> Result<Score> {
        (**self).load()
    }
}

impl <S: PieceSource + ?Sized> PieceSource for Box<S> {
    fn id(&self) -> String {
        (**self).id()
    }

    fn load(&self) -> Result<Score> {
        (**self).load()
    }
}
