pub mod clips;
pub mod machine;
pub mod timer;

pub use machine::{Effect, GameConfig, GameError, GameEvent, GameMachine, GameSession, Mode};
