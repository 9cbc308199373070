// Core domain types and the game event protocol shared across Quizcast crates.

pub mod protocol;
pub mod types;
