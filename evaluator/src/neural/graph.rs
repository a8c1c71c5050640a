
use tch::{nn, Kind, Tensor};

use super::config::Config;
use super::input::{BOARD_COLS, BOARD_ROWS, NUM_ACTIONS};

///
/// Spatial padding mode of a convolution.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Padding
{
    Same,
    Valid
}

///
/// The transform a node applies to its input.
///
#[derive(Debug)]
pub enum NodeKind
{
    Reshape (Vec<i64>),
    Conv2d (nn::Conv2D),
    BatchNorm (nn::BatchNorm),
    Relu,
    Flatten,
    Linear (nn::Linear),
    Dropout (f64),
    Softmax,
    Tanh
}

impl NodeKind
{
    pub fn name (& self) -> & 'static str
    {
        match self
        {
            NodeKind::Reshape(_)   => "Reshape",
            NodeKind::Conv2d(_)    => "Conv2d",
            NodeKind::BatchNorm(_) => "BatchNorm",
            NodeKind::Relu         => "ReLU",
            NodeKind::Flatten      => "Flatten",
            NodeKind::Linear(_)    => "Linear",
            NodeKind::Dropout(_)   => "Dropout",
            NodeKind::Softmax      => "Softmax",
            NodeKind::Tanh         => "Tanh"
        }
    }
}

///
/// A named node of the layer graph. The output shape excludes the batch axis.
///
#[derive(Debug)]
pub struct Node
{
    pub name: String,
    pub kind: NodeKind,
    pub output: Vec<i64>,
    pub params: i64
}

impl Node
{
    ///
    /// Applies this node. Dropout and batch normalisation consult the training flag.
    ///
    pub fn forward (& self, xs: & Tensor, train: bool) -> Tensor
    {
        match & self.kind
        {
            NodeKind::Reshape(shape) =>
            {
                let mut full = vec![-1];
                full.extend_from_slice(shape);
                xs.view(full.as_slice())
            },
            NodeKind::Conv2d(conv)   => xs.apply(conv),
            NodeKind::BatchNorm(bn)  => xs.apply_t(bn, train && values_per_feature(xs) > 1),
            NodeKind::Relu           => xs.relu(),
            NodeKind::Flatten        => xs.flatten(1, -1),
            NodeKind::Linear(linear) => xs.apply(linear),
            NodeKind::Dropout(p)     => xs.dropout(* p, train),
            NodeKind::Softmax        => xs.softmax(-1, Kind::Float),
            NodeKind::Tanh           => xs.tanh()
        }
    }
}

///
/// Number of values each normalised feature sees in this batch: N * H * W for
/// images, N for flat vectors.
///
/// Batch statistics over a single value have no variance, and libtorch folds
/// that into the running variance as 0 / 0. Such batches normalise with the
/// running statistics instead.
///
fn values_per_feature (xs: & Tensor) -> i64
{
    let size = xs.size();
    size.iter().product::<i64>() / size.get(1).copied().unwrap_or(1).max(1)
}

///
/// Running statistics follow a 0.99 moving average with epsilon 1e-3.
///
fn batch_norm_config () -> nn::BatchNormConfig
{
    nn::BatchNormConfig { momentum: 0.01, eps: 1e-3, ..Default::default() }
}

///
/// Builds a chain of nodes, tracking the per-example shape as it goes.
///
/// Every parameterised node registers its variables under its own name below
/// the builder's path, so two builders sharing a path must use distinct names.
///
pub struct GraphBuilder<'p, 'a>
{
    path: & 'p nn::Path<'a>,
    nodes: Vec<Node>,
    shape: Vec<i64>
}

impl<'p, 'a> GraphBuilder<'p, 'a>
{
    pub fn new (path: & 'p nn::Path<'a>, input: & [i64]) -> GraphBuilder<'p, 'a>
    {
        GraphBuilder { path, nodes: vec![], shape: input.to_vec() }
    }

    pub fn shape (& self) -> & [i64]
    {
        & self.shape
    }

    fn push (mut self, name: & str, kind: NodeKind, output: Vec<i64>, params: i64) -> Self
    {
        self.shape = output.clone();
        self.nodes.push(Node { name: name.to_owned(), kind, output, params });
        self
    }

    pub fn reshape (self, name: & str, shape: & [i64]) -> Self
    {
        self.push(name, NodeKind::Reshape(shape.to_vec()), shape.to_vec(), 0)
    }

    ///
    /// Adds a square convolution over a [C, H, W] input.
    ///
    pub fn conv2d (self, name: & str, c_out: i64, ksize: i64, padding: Padding) -> Self
    {
        let (c_in, h, w) = (self.shape[0], self.shape[1], self.shape[2]);
        let pad = match padding
        {
            Padding::Same  => ksize / 2,
            Padding::Valid => 0
        };

        let config = nn::ConvConfig { padding: pad, ..Default::default() };
        let conv = nn::conv2d(self.path / name, c_in, c_out, ksize, config);

        let output = vec![c_out, h + 2 * pad - ksize + 1, w + 2 * pad - ksize + 1];
        let params = c_out * c_in * ksize * ksize + c_out;

        self.push(name, NodeKind::Conv2d(conv), output, params)
    }

    ///
    /// Adds batch normalisation over the leading axis: channels for images,
    /// activations for flat vectors.
    ///
    pub fn batch_norm (self, name: & str) -> Self
    {
        let features = self.shape[0];
        let bn = match self.shape.len()
        {
            3 => nn::batch_norm2d(self.path / name, features, batch_norm_config()),
            _ => nn::batch_norm1d(self.path / name, features, batch_norm_config())
        };

        let output = self.shape.clone();
        self.push(name, NodeKind::BatchNorm(bn), output, 2 * features)
    }

    pub fn relu (self, name: & str) -> Self
    {
        let output = self.shape.clone();
        self.push(name, NodeKind::Relu, output, 0)
    }

    pub fn flatten (self, name: & str) -> Self
    {
        let output = vec![self.shape.iter().product()];
        self.push(name, NodeKind::Flatten, output, 0)
    }

    pub fn linear (self, name: & str, units: i64) -> Self
    {
        let inputs = self.shape[0];
        let linear = nn::linear(self.path / name, inputs, units, Default::default());

        self.push(name, NodeKind::Linear(linear), vec![units], inputs * units + units)
    }

    pub fn dropout (self, name: & str, p: f64) -> Self
    {
        let output = self.shape.clone();
        self.push(name, NodeKind::Dropout(p), output, 0)
    }

    pub fn softmax (self, name: & str) -> Self
    {
        let output = self.shape.clone();
        self.push(name, NodeKind::Softmax, output, 0)
    }

    pub fn tanh (self, name: & str) -> Self
    {
        let output = self.shape.clone();
        self.push(name, NodeKind::Tanh, output, 0)
    }

    pub fn build (self) -> Vec<Node>
    {
        self.nodes
    }
}

///
/// The evaluator's computation graph: a shared trunk and two heads branching
/// from its final vector.
///
/// Input is a [N, 6, 7] batch of boards. The trunk reshapes it into
/// single-channel images, runs four 3x3 convolution stages (the last without
/// padding, shrinking the board to 4x5), flattens, and runs two dense stages
/// with dropout. The policy head ends in a softmax over the seven columns and
/// the value head in a tanh.
///
#[derive(Debug)]
pub struct Graph
{
    pub trunk: Vec<Node>,
    pub policy: Vec<Node>,
    pub value: Vec<Node>
}

///
/// Result of a forward pass: policy logits and probabilities [N, 7], values [N, 1].
///
#[derive(Debug)]
pub struct Output
{
    pub logits: Tensor,
    pub policy: Tensor,
    pub value: Tensor
}

impl Graph
{
    ///
    /// Creates the graph, registering all parameters under the given path.
    ///
    pub fn new (path: & nn::Path, config: & Config) -> Graph
    {
        let mut trunk = GraphBuilder::new(path, & [BOARD_ROWS as i64, BOARD_COLS as i64])
            .reshape("reshape", & [1, BOARD_ROWS as i64, BOARD_COLS as i64]);

        for (stage, padding) in [Padding::Same, Padding::Same, Padding::Same, Padding::Valid].iter().enumerate()
        {
            let stage = stage + 1;
            trunk = trunk
                .conv2d(& format!("conv{}", stage), config.channels, 3, * padding)
                .batch_norm(& format!("bn{}", stage))
                .relu(& format!("relu{}", stage));
        }

        let trunk = trunk
            .flatten("flatten")
            .linear("fc1", config.fc1_units)
            .batch_norm("fc_bn1")
            .relu("fc_relu1")
            .dropout("drop1", config.dropout)
            .linear("fc2", config.fc2_units)
            .batch_norm("fc_bn2")
            .relu("fc_relu2")
            .dropout("drop2", config.dropout);

        let features = trunk.shape().to_vec();
        let trunk = trunk.build();

        let policy = GraphBuilder::new(path, & features)
            .linear("policy", NUM_ACTIONS as i64)
            .softmax("policy_softmax")
            .build();

        let value = GraphBuilder::new(path, & features)
            .linear("value", 1)
            .tanh("value_tanh")
            .build();

        Graph { trunk, policy, value }
    }

    ///
    /// Runs a batch through the graph, returning policies [N, 7] and values [N, 1].
    ///
    pub fn forward (& self, xs: & Tensor, train: bool) -> (Tensor, Tensor)
    {
        let output = self.forward_t(xs, train);
        (output.policy, output.value)
    }

    ///
    /// Runs a batch through the graph, also keeping the policy logits that
    /// feed the final softmax node.
    ///
    pub fn forward_t (& self, xs: & Tensor, train: bool) -> Output
    {
        let run = |nodes: & [Node], xs: & Tensor| nodes.iter().fold(xs.shallow_clone(), |acc, node| node.forward(& acc, train));

        let features = run(& self.trunk, xs);

        // The policy head always ends in its softmax node.
        let (softmax, projection) = match self.policy.split_last()
        {
            Some(split) => split,
            None        => unreachable!("policy head is built with a softmax node")
        };
        let logits = run(projection, & features);
        let policy = softmax.forward(& logits, train);

        Output { logits, policy, value: run(& self.value, & features) }
    }

    ///
    /// Iterates over every node: trunk first, then the policy head, then the value head.
    ///
    pub fn nodes (& self) -> impl Iterator<Item = & Node>
    {
        self.trunk.iter().chain(self.policy.iter()).chain(self.value.iter())
    }

    pub fn parameter_count (& self) -> i64
    {
        self.nodes().map(|node| node.params).sum()
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    use tch::{Device, nn::VarStore};

    fn small () -> Config
    {
        Config { channels: 4, fc1_units: 16, fc2_units: 8, ..Default::default() }
    }

    #[test]
    fn trunk_shrinks_the_board_once ()
    {
        let vs = VarStore::new(Device::Cpu);
        let graph = Graph::new(& vs.root(), & small());

        let shapes : Vec<(& str, & [i64])> = graph.trunk.iter().map(|n| (n.name.as_str(), n.output.as_slice())).collect();

        assert_eq!(shapes[0], ("reshape", & [1_i64, 6, 7][..]));
        assert_eq!(shapes[1], ("conv1", & [4_i64, 6, 7][..]));
        assert_eq!(shapes[7], ("conv3", & [4_i64, 6, 7][..]));
        assert_eq!(shapes[10], ("conv4", & [4_i64, 4, 5][..]));
        assert_eq!(shapes[13], ("flatten", & [80_i64][..]));
        assert_eq!(graph.trunk.last().unwrap().output, vec![8]);
        assert_eq!(graph.policy.last().unwrap().output, vec![7]);
        assert_eq!(graph.value.last().unwrap().output, vec![1]);
    }

    #[test]
    fn counts_match_the_variable_store ()
    {
        let vs = VarStore::new(Device::Cpu);
        let graph = Graph::new(& vs.root(), & small());

        let stored : i64 = vs.trainable_variables().iter().map(|t| t.size().iter().product::<i64>()).sum();

        assert_eq!(graph.parameter_count(), stored);
    }

    #[test]
    fn standard_network_size ()
    {
        let vs = VarStore::new(Device::Cpu);
        let graph = Graph::new(& vs.root(), & Config::default());

        assert_eq!(graph.trunk[13].output, vec![512 * 4 * 5]);
        assert_eq!(graph.parameter_count(), 18_107_400);
    }

    #[test]
    fn heads_produce_distributions_and_bounded_values ()
    {
        let vs = VarStore::new(Device::Cpu);
        let graph = Graph::new(& vs.root(), & small());

        let xs = Tensor::randn(& [5, 6, 7], (Kind::Float, Device::Cpu));
        let (policy, value) = graph.forward(& xs, false);

        assert_eq!(policy.size(), vec![5, 7]);
        assert_eq!(value.size(), vec![5, 1]);

        let sums = policy.sum_dim_intlist(& [1], false, Kind::Float);
        for i in 0 .. 5
        {
            assert!((sums.double_value(& [i]) - 1.0).abs() < 1e-5);
            assert!(value.double_value(& [i, 0]).abs() <= 1.0);
        }
    }

    #[test]
    fn logits_feed_the_policy_softmax ()
    {
        let vs = VarStore::new(Device::Cpu);
        let graph = Graph::new(& vs.root(), & small());

        let xs = Tensor::randn(& [3, 6, 7], (Kind::Float, Device::Cpu));
        let output = graph.forward_t(& xs, false);

        assert_eq!(output.logits.size(), vec![3, 7]);
        assert!(output.logits.softmax(-1, Kind::Float).allclose(& output.policy, 1e-6, 1e-6, false));
    }

    #[test]
    fn single_record_batches_keep_running_statistics_finite ()
    {
        let vs = VarStore::new(Device::Cpu);
        let nodes = GraphBuilder::new(& vs.root(), & [4]).linear("fc", 6).batch_norm("fc_bn").build();
        let run = |xs: & Tensor, train: bool| nodes.iter().fold(xs.shallow_clone(), |acc, node| node.forward(& acc, train));

        let _ = run(& Tensor::randn(& [1, 4], (Kind::Float, Device::Cpu)), true);

        let output = run(& Tensor::randn(& [5, 4], (Kind::Float, Device::Cpu)), false);
        assert_eq!(output.isfinite().all().int64_value(& []), 1);

        let flat = Tensor::zeros(& [1, 6], (Kind::Float, Device::Cpu));
        let image = Tensor::zeros(& [1, 6, 4, 5], (Kind::Float, Device::Cpu));
        assert_eq!(values_per_feature(& flat), 1);
        assert_eq!(values_per_feature(& image), 20);
    }

    #[test]
    fn dropout_only_fires_in_training ()
    {
        let vs = VarStore::new(Device::Cpu);
        let node = GraphBuilder::new(& vs.root(), & [1000]).dropout("drop", 0.5).build().remove(0);

        let xs = Tensor::ones(& [1, 1000], (Kind::Float, Device::Cpu));

        assert!(node.forward(& xs, false).equal(& xs));

        // Survivors are scaled by 1 / (1 - p), so each contributes 2 to the sum.
        let kept = node.forward(& xs, true).sum(Kind::Float).double_value(& []) / 2.0;
        assert!(kept > 0.0 && kept < 1000.0);
    }
}
