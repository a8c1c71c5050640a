
use super::input::NUM_ACTIONS;

///
/// The network's opinion of a single board: a move distribution over the
/// columns and a value in [-1, 1] from the perspective of the player to move.
///
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Prediction
{
    pub policy: [f32; NUM_ACTIONS],
    pub value: f32
}

impl Prediction
{
    ///
    /// Returns the column with the highest policy probability. Ties go to the
    /// leftmost column.
    ///
    pub fn best_column (& self) -> usize
    {
        let mut best = 0;
        for (column, p) in self.policy.iter().enumerate()
        {
            if * p > self.policy[best]
            {
                best = column;
            }
        }
        best
    }

    ///
    /// Returns the policy restricted to the legal columns and renormalised.
    ///
    /// The network does not know the rules, so it spreads some mass over full
    /// columns; the caller supplies the mask. If the legal columns carry no
    /// mass at all, they share it uniformly.
    ///
    pub fn masked (& self, legal: & [bool; NUM_ACTIONS]) -> [f32; NUM_ACTIONS]
    {
        let mut policy = [0.0; NUM_ACTIONS];
        for column in 0 .. NUM_ACTIONS
        {
            if legal[column]
            {
                policy[column] = self.policy[column];
            }
        }

        let total : f32 = policy.iter().sum();
        let count = legal.iter().filter(|l| ** l).count();

        if total > 0.0
        {
            policy.iter_mut().for_each(|p| * p /= total);
        }
        else if count > 0
        {
            for column in 0 .. NUM_ACTIONS
            {
                if legal[column]
                {
                    policy[column] = 1.0 / count as f32;
                }
            }
        }

        policy
    }
}
