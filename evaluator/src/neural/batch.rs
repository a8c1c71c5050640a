
use tch::{Device, Tensor};

use super::input::*;

///
/// Represents a validated self-play batch of (si, pi, z) triples.
///
/// Each index refers to the same turn in all three sequences: the board the
/// player faced, the move distribution found by search, and the eventual game
/// outcome from that player's perspective. Only shapes are checked; policy
/// sums and outcome ranges are taken as given.
///
#[derive(Clone, Copy, Debug)]
pub struct Batch<'a>
{
    states: & 'a [State],
    policies: & 'a [Vec<f32>],
    values: & 'a [f32]
}

impl<'a> Batch<'a>
{
    ///
    /// Creates a batch, rejecting misaligned sequences and malformed records.
    ///
    pub fn new (states: & 'a [State], policies: & 'a [Vec<f32>], values: & 'a [f32]) -> Result<Batch<'a>, ShapeError>
    {
        if states.len() != policies.len() || states.len() != values.len()
        {
            return Err(ShapeError::BatchLength { states: states.len(), policies: policies.len(), values: values.len() });
        }

        for (index, (state, policy)) in states.iter().zip(policies.iter()).enumerate()
        {
            check_state(index, state)?;
            check_policy(index, policy)?;
        }

        Ok(Batch { states, policies, values })
    }

    pub fn len (& self) -> usize
    {
        self.states.len()
    }

    pub fn is_empty (& self) -> bool
    {
        self.states.is_empty()
    }

    ///
    /// Copies the batch into tensors on the given device.
    ///
    pub fn to_memory (& self, device: Device) -> Result<Memory, ShapeError>
    {
        let n = self.len() as i64;
        let states = Input::try_from(self.states)?.0;

        let flat : Vec<f32> = self.policies.iter().flat_map(|p| p.iter().copied()).collect();
        let policies = Tensor::of_slice(& flat).view([n, NUM_ACTIONS as i64]);
        let values = Tensor::of_slice(self.values).view([n, 1]);

        Ok(Memory
        {
            states: states.to_device(device),
            policies: policies.to_device(device),
            values: values.to_device(device)
        })
    }
}

///
/// Represents a batch as device tensors: states [N, 6, 7], policy targets
/// [N, 7] and value targets [N, 1].
///
#[derive(Debug)]
pub struct Memory
{
    pub states: Tensor,
    pub policies: Tensor,
    pub values: Tensor
}

impl Memory
{
    ///
    /// Gathers the rows at the given indices into a mini-batch.
    ///
    pub fn select (& self, indices: & Tensor) -> Memory
    {
        Memory
        {
            states: self.states.index_select(0, indices),
            policies: self.policies.index_select(0, indices),
            values: self.values.index_select(0, indices)
        }
    }

    pub fn len (& self) -> i64
    {
        self.states.size()[0]
    }
}
