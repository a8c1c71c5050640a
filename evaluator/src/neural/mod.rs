
pub mod batch;
pub mod config;
pub mod graph;
pub mod input;
pub mod network;
pub mod prediction;

pub use batch::Batch;
pub use config::Config as NeuralConfig;
pub use input::{BOARD_COLS, BOARD_ROWS, NUM_ACTIONS, ShapeError, State};
pub use network::PositionEvaluator;
pub use prediction::Prediction;
