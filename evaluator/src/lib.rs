
pub mod config;
pub mod neural;

pub use config::Config;
pub use neural::{NeuralConfig, PositionEvaluator, Prediction, ShapeError, State};
