
use tabled::{Table, Tabled};

use tch::{Device, Kind, Reduction, Tensor};
use tch::nn::{Adam, Optimizer, OptimizerConfig, VarStore};

use uuid::Uuid;

use utils::error::{Context, Result};
use utils::log;

use super::batch::*;
use super::config::Config;
use super::graph::Graph;
use super::input::*;
use super::prediction::Prediction;

///
/// A network that functions simultaneously as a policy and value head for
/// a 6 x 7 board with one move per column.
///
/// The input shape is a [6, 7] board matrix in the caller's encoding; the
/// same encoding must be used for training and for inference.
///
/// The policy output is a [7] softmaxed vector over the columns. Full
/// columns are not pre-masked and must be handled by the caller (see
/// Prediction::masked).
///
/// The value output is a scalar in [-1, 1] estimating the outcome for the
/// player to move.
///
/// Each evaluator owns its variable store, graph and optimizer; evaluators
/// never share parameters.
///
pub struct PositionEvaluator
{
    id: Uuid,
    config: Config,
    vs: VarStore,
    graph: Graph,
    optimizer: Optimizer,
    trained: bool
}

impl std::fmt::Debug for PositionEvaluator
{
    fn fmt (& self, f: & mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("PositionEvaluator")
            .field("id", & self.id)
            .field("device", & self.vs.device())
            .field("parameters", & self.parameter_count())
            .field("trained", & self.trained)
            .finish()
    }
}

///
/// One line of the graph summary table.
///
#[derive(Tabled)]
struct SummaryRow
{
    node: String,
    kind: & 'static str,
    output: String,
    params: i64
}

impl PositionEvaluator
{
    ///
    /// Creates a freshly initialised evaluator.
    ///
    pub fn new (config: & Config) -> Result<PositionEvaluator>
    {
        if let Some(seed) = config.seed
        {
            tch::manual_seed(seed);
        }

        let device = match config.use_cuda
        {
            true  => Device::cuda_if_available(),
            false => Device::Cpu
        };

        let vs = VarStore::new(device);
        let graph = Graph::new(& vs.root(), config);
        let optimizer = Adam::default().build(& vs, config.learning_rate).context("Failed to create the Adam optimizer.")?;

        let net = PositionEvaluator { id: Uuid::new_v4(), config: config.clone(), vs, graph, optimizer, trained: false };
        log::info!("[{}] Created position evaluator on {:?} with {} parameters.", net.id, device, net.parameter_count());

        Ok(net)
    }

    ///
    /// Creates an evaluator with the standard hyperparameters.
    ///
    pub fn standard () -> Result<PositionEvaluator>
    {
        PositionEvaluator::new(& Config::default())
    }

    pub fn config (& self) -> & Config
    {
        & self.config
    }

    pub fn device (& self) -> Device
    {
        self.vs.device()
    }

    ///
    /// Returns whether at least one fit has completed.
    ///
    pub fn is_trained (& self) -> bool
    {
        self.trained
    }

    ///
    /// Returns the number of trainable scalars in the network.
    ///
    pub fn parameter_count (& self) -> i64
    {
        self.vs.trainable_variables().iter().map(|t| t.size().iter().product::<i64>()).sum()
    }

    ///
    /// Returns a table describing every node of the graph.
    ///
    pub fn summary (& self) -> String
    {
        let rows : Vec<SummaryRow> = self.graph.nodes().map(|node| SummaryRow
        {
            node: node.name.clone(),
            kind: node.kind.name(),
            output: format!("{:?}", node.output),
            params: node.params
        }).collect();

        format!("{}\nTrainable parameters: {}", Table::new(rows), self.graph.parameter_count())
    }

    ///
    /// Given an input board, returns the policy vector and a value estimation.
    ///
    pub fn predict (& self, state: & State) -> Result<Prediction>
    {
        let mut predictions = self.predict_batch(std::slice::from_ref(state))?;
        predictions.pop().context("Evaluation produced no prediction.")
    }

    ///
    /// Evaluates a batch of boards in inference mode: dropout is off and batch
    /// normalisation uses its running statistics.
    ///
    pub fn predict_batch (& self, states: & [State]) -> Result<Vec<Prediction>>
    {
        let input = Input::try_from(states).context("Rejected evaluation input.")?;
        if states.is_empty()
        {
            return Ok(vec![]);
        }

        let xs = input.0.to_device(self.device());
        let (policy, values) = tch::no_grad(|| self.graph.forward(& xs, false));

        let n = states.len();
        let mut policy_data = vec![0.0_f32; n * NUM_ACTIONS];
        policy.to_device(Device::Cpu).contiguous().copy_data::<f32>(& mut policy_data, n * NUM_ACTIONS);

        let mut value_data = vec![0.0_f32; n];
        values.to_device(Device::Cpu).contiguous().copy_data::<f32>(& mut value_data, n);

        let predictions = policy_data.chunks(NUM_ACTIONS).zip(value_data.iter()).map(|(chunk, value)|
        {
            let mut policy = [0.0; NUM_ACTIONS];
            policy.copy_from_slice(chunk);
            Prediction { policy, value: * value }
        }).collect();

        Ok(predictions)
    }

    ///
    /// Trains this model on a self-play batch of boards, search policies and
    /// game outcomes.
    ///
    /// Runs the configured number of epochs over the batch in mini-batches,
    /// reshuffling each epoch. A lone record left over at the end of an epoch
    /// joins the mini-batch before it. The batch is validated before any parameter is
    /// touched, so a rejected batch leaves the network as it was. Policy sums
    /// and outcome ranges are not checked.
    ///
    pub fn fit (& mut self, states: & [State], probabilities: & [Vec<f32>], winners: & [f32]) -> Result<()>
    {
        let batch = Batch::new(states, probabilities, winners).context("Rejected training batch.")?;
        if batch.is_empty()
        {
            log::debug!("[{}] Skipping fit on an empty batch.", self.id);
            return Ok(());
        }

        let device = self.device();
        let memory = batch.to_memory(device).context("Rejected training batch.")?;

        let n = memory.len();
        let ranges = mini_batches(n, self.config.batch_size as i64);
        let mut last_loss = 0.0;

        for epoch in 1 ..= self.config.epochs
        {
            let order = match self.config.shuffle
            {
                true  => Tensor::randperm(n, (Kind::Int64, device)),
                false => Tensor::arange(n, (Kind::Int64, device))
            };

            let (mut policy_total, mut value_total, mut steps) = (0.0, 0.0, 0);

            for & (start, length) in & ranges
            {
                let mini = memory.select(& order.narrow(0, start, length));

                let output = self.graph.forward_t(& mini.states, true);
                let (policy_loss, value_loss) = losses(& output.logits, & output.value, & mini);
                let loss = & policy_loss * self.config.policy_weight + & value_loss * self.config.value_weight;

                self.optimizer.backward_step(& loss);

                policy_total += policy_loss.double_value(& []);
                value_total += value_loss.double_value(& []);
                steps += 1;
            }

            let (policy_mean, value_mean) = (policy_total / steps as f64, value_total / steps as f64);
            last_loss = self.config.policy_weight * policy_mean + self.config.value_weight * value_mean;

            log::debug!("[{}] Epoch {}/{}: policy loss {:.5}, value loss {:.5}.", self.id, epoch, self.config.epochs, policy_mean, value_mean);
        }

        self.trained = true;
        log::info!("[{}] Fit {} examples over {} epochs; final loss {:.5}.", self.id, n, self.config.epochs, last_loss);

        Ok(())
    }
}

///
/// Splits n records into (start, length) mini-batches of the given size.
///
/// A trailing mini-batch of one record is folded into the one before it,
/// since batch normalisation cannot draw statistics from a single record.
///
fn mini_batches (n: i64, size: i64) -> Vec<(i64, i64)>
{
    let size = size.max(1);
    let mut ranges : Vec<(i64, i64)> = (0 .. n).step_by(size as usize).map(|start| (start, size.min(n - start))).collect();

    if size > 1 && ranges.len() > 1 && ranges[ranges.len() - 1].1 == 1
    {
        ranges.pop();
        if let Some(last) = ranges.last_mut()
        {
            last.1 += 1;
        }
    }

    ranges
}

///
/// Returns the categorical cross-entropy of the policy logits against their
/// targets and the mean squared error of the values against theirs.
///
/// The cross-entropy goes through log-softmax so that confidently wrong
/// columns keep their gradient.
///
fn losses (logits: & Tensor, values: & Tensor, targets: & Memory) -> (Tensor, Tensor)
{
    let log_policy = logits.log_softmax(-1, Kind::Float);
    let policy_loss = -(& targets.policies * log_policy).sum_dim_intlist(& [1], false, Kind::Float).mean(Kind::Float);
    let value_loss = values.mse_loss(& targets.values, Reduction::Mean);

    (policy_loss, value_loss)
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn small () -> Config
    {
        Config { channels: 4, fc1_units: 16, fc2_units: 8, batch_size: 4, epochs: 2, use_cuda: false, ..Default::default() }
    }

    fn board (seed: usize) -> State
    {
        (0 .. BOARD_ROWS).map(|i| (0 .. BOARD_COLS).map(|j| ((i * 7 + j + seed) % 3) as f32 - 1.0).collect()).collect()
    }

    fn snapshot (net: & PositionEvaluator) -> Vec<Tensor>
    {
        let mut variables : Vec<(String, Tensor)> = net.vs.variables().into_iter().collect();
        variables.sort_by(|a, b| a.0.cmp(& b.0));
        variables.into_iter().map(|(_, t)| t.copy()).collect()
    }

    fn unchanged (before: & [Tensor], after: & [Tensor]) -> bool
    {
        before.len() == after.len() && before.iter().zip(after.iter()).all(|(a, b)| a.equal(b))
    }

    #[test]
    fn rejected_batches_leave_parameters_untouched ()
    {
        let mut net = PositionEvaluator::new(& small()).unwrap();
        let before = snapshot(& net);

        let states = vec![board(0), board(1), board(2)];
        let policies = vec![vec![1.0 / 7.0; NUM_ACTIONS]; 2];
        let winners = vec![1.0, -1.0, 0.0];

        let err = net.fit(& states, & policies, & winners).unwrap_err();

        assert_eq!(err.downcast_ref::<ShapeError>(), Some(& ShapeError::BatchLength { states: 3, policies: 2, values: 3 }));
        assert!(unchanged(& before, & snapshot(& net)));
        assert!(!net.is_trained());
    }

    #[test]
    fn accepted_batches_move_parameters ()
    {
        let mut net = PositionEvaluator::new(& small()).unwrap();
        let before = snapshot(& net);

        let states : Vec<State> = (0 .. 6).map(board).collect();
        let policies = vec![vec![0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0]; 6];
        let winners = vec![1.0, -1.0, 1.0, -1.0, 0.0, 1.0];

        net.fit(& states, & policies, & winners).unwrap();

        assert!(!unchanged(& before, & snapshot(& net)));
        assert!(net.is_trained());
    }

    #[test]
    fn empty_batches_are_a_no_op ()
    {
        let mut net = PositionEvaluator::new(& small()).unwrap();
        let before = snapshot(& net);

        net.fit(& [], & [], & []).unwrap();

        assert!(unchanged(& before, & snapshot(& net)));
        assert!(!net.is_trained());
        assert!(net.predict_batch(& []).unwrap().is_empty());
    }

    fn targets () -> Memory
    {
        Memory
        {
            states: Tensor::zeros(& [2, 6, 7], (Kind::Float, Device::Cpu)),
            policies: Tensor::of_slice(& [0.0_f32, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]).view([2, 7]),
            values: Tensor::of_slice(& [0.5_f32, -0.5]).view([2, 1])
        }
    }

    #[test]
    fn losses_vanish_on_perfect_predictions ()
    {
        let targets = targets();

        let confident = & targets.policies * 50.0;
        let (policy_loss, value_loss) = losses(& confident, & targets.values, & targets);

        assert!(policy_loss.double_value(& []) < 1e-6);
        assert_eq!(value_loss.double_value(& []), 0.0);

        let flat = Tensor::zeros(& [2, 7], (Kind::Float, Device::Cpu));
        let zeros = Tensor::zeros(& [2, 1], (Kind::Float, Device::Cpu));
        let (policy_loss, value_loss) = losses(& flat, & zeros, & targets);

        assert!((policy_loss.double_value(& []) - 7.0_f64.ln()).abs() < 1e-5);
        assert!((value_loss.double_value(& []) - 0.25).abs() < 1e-6);
    }

    #[test]
    fn confidently_wrong_policies_keep_their_gradient ()
    {
        let targets = targets();

        // Both rows put all their mass on column 2, away from the targets.
        let mut raw = vec![0.0_f32; 14];
        raw[2] = 40.0;
        raw[9] = 40.0;
        let logits = Tensor::of_slice(& raw).view([2, 7]).set_requires_grad(true);

        let (policy_loss, _) = losses(& logits, & targets.values, & targets);
        assert!(policy_loss.double_value(& []) > 39.0);

        policy_loss.backward();
        let grad = logits.grad();

        assert!((grad.double_value(& [0, 1]) + 0.5).abs() < 1e-4);
        assert!((grad.double_value(& [1, 0]) + 0.5).abs() < 1e-4);
        assert!((grad.double_value(& [0, 2]) - 0.5).abs() < 1e-4);
    }

    #[test]
    fn lone_trailing_records_join_the_previous_mini_batch ()
    {
        assert_eq!(mini_batches(9, 8), vec![(0, 9)]);
        assert_eq!(mini_batches(17, 8), vec![(0, 8), (8, 9)]);
        assert_eq!(mini_batches(10, 8), vec![(0, 8), (8, 2)]);
        assert_eq!(mini_batches(16, 8), vec![(0, 8), (8, 8)]);
        assert_eq!(mini_batches(1, 8), vec![(0, 1)]);
        assert_eq!(mini_batches(3, 0), vec![(0, 1), (1, 1), (2, 1)]);
        assert!(mini_batches(0, 8).is_empty());
    }

    #[test]
    fn single_record_fits_keep_inference_finite ()
    {
        let mut net = PositionEvaluator::new(& small()).unwrap();

        net.fit(& [board(0)], & [vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0]], & [1.0]).unwrap();

        let finite = net.vs.variables().values().all(|t| t.isfinite().all().int64_value(& []) == 1);
        assert!(finite);

        let prediction = net.predict(& board(1)).unwrap();
        assert!(prediction.policy.iter().all(|p| p.is_finite()));
        assert!(prediction.value.is_finite());
    }

    #[test]
    fn summary_lists_every_node ()
    {
        let net = PositionEvaluator::new(& small()).unwrap();
        let summary = net.summary();

        for name in ["reshape", "conv4", "fc_bn2", "drop2", "policy_softmax", "value_tanh"]
        {
            assert!(summary.contains(name), "missing {} in\n{}", name, summary);
        }
        assert!(summary.contains(& format!("Trainable parameters: {}", net.parameter_count())));
    }
}
