
use tch::Tensor;

///
/// Number of rows on the game board.
///
pub const BOARD_ROWS : usize = 6;

///
/// Number of columns on the game board.
///
pub const BOARD_COLS : usize = 7;

///
/// Number of moves available to the policy head, one per column.
///
pub const NUM_ACTIONS : usize = BOARD_COLS;

///
/// A board state as supplied by the caller: a row-major 6 x 7 matrix in
/// whatever numeric encoding the self-play producer uses.
///
pub type State = Vec<Vec<f32>>;

///
/// A shape violation in data handed to the evaluator.
///
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ShapeError
{
    #[error("Batch sequences differ in length: {states} states, {policies} policies, {values} values.")]
    BatchLength { states: usize, policies: usize, values: usize },

    #[error("State {index} has {rows} rows, expected {}.", BOARD_ROWS)]
    StateRows { index: usize, rows: usize },

    #[error("Row {row} of state {index} has {cols} columns, expected {}.", BOARD_COLS)]
    StateColumns { index: usize, row: usize, cols: usize },

    #[error("Policy {index} has {len} entries, expected {}.", NUM_ACTIONS)]
    PolicyLength { index: usize, len: usize }
}

///
/// Checks that the state at the given batch index is a 6 x 7 matrix.
///
pub fn check_state (index: usize, state: & State) -> Result<(), ShapeError>
{
    if state.len() != BOARD_ROWS
    {
        return Err(ShapeError::StateRows { index, rows: state.len() });
    }

    for (row, cells) in state.iter().enumerate()
    {
        if cells.len() != BOARD_COLS
        {
            return Err(ShapeError::StateColumns { index, row, cols: cells.len() });
        }
    }

    Ok(())
}

///
/// Checks that the policy target at the given batch index has one entry per column.
///
pub fn check_policy (index: usize, policy: & [f32]) -> Result<(), ShapeError>
{
    match policy.len()
    {
        NUM_ACTIONS => Ok(()),
        len         => Err(ShapeError::PolicyLength { index, len })
    }
}

///
/// Represents a batch of board states as a network input tensor.
///
/// The tensor has shape [N, 6, 7] and lives on the CPU; the graph's input
/// stage reshapes it into single-channel images.
///
#[derive(Debug)]
pub struct Input (pub Tensor);

impl TryFrom<& [State]> for Input
{
    type Error = ShapeError;

    fn try_from (states: & [State]) -> Result<Input, ShapeError>
    {
        let mut cells : Vec<f32> = Vec::with_capacity(states.len() * BOARD_ROWS * BOARD_COLS);

        for (index, state) in states.iter().enumerate()
        {
            check_state(index, state)?;
            state.iter().for_each(|row| cells.extend_from_slice(row));
        }

        let tensor = Tensor::of_slice(& cells).view([states.len() as i64, BOARD_ROWS as i64, BOARD_COLS as i64]);
        Ok(Input(tensor))
    }
}
