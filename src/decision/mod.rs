//! Keep/Remove decisions and their side effects

mod engine;

pub use engine::{DecisionEngine, EngineOptions, KeepOutcome, RemoveOutcome, StoreRemoval};
