
use utils::{Serialize, Deserialize};

///
/// A configuration for the position evaluator network.
///
/// The defaults describe the standard network: four 512-channel convolutions,
/// two dense stages of 1024 and 512 units, and an Adam-driven fit of 5 epochs
/// over mini-batches of 64.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config 
{
    #[serde(default = "channels")]
    pub channels: i64,

    #[serde(default = "fc1_units")]
    pub fc1_units: i64,

    #[serde(default = "fc2_units")]
    pub fc2_units: i64,

    #[serde(default = "dropout")]
    pub dropout: f64,

    #[serde(default = "batch_size")]
    pub batch_size: usize,

    #[serde(default = "epochs")]
    pub epochs: usize,

    #[serde(default = "learning_rate")]
    pub learning_rate: f64,

    #[serde(default = "policy_weight")]
    pub policy_weight: f64,

    #[serde(default = "value_weight")]
    pub value_weight: f64,

    #[serde(default = "shuffle")]
    pub shuffle: bool,

    #[serde(default = "use_cuda")]
    pub use_cuda: bool,

    ///
    /// Seeds libtorch's random generator before the network is initialised.
    ///
    /// The generator is process-wide: seeding one evaluator also resets the
    /// stream that every other evaluator in the process draws from for
    /// initialisation, shuffling and dropout.
    ///
    #[serde(default)]
    pub seed: Option<i64>
}

impl Default for Config 
{
    fn default () -> Config 
    {
        Config 
        {
            channels: channels(),
            fc1_units: fc1_units(),
            fc2_units: fc2_units(),
            dropout: dropout(),
            batch_size: batch_size(),
            epochs: epochs(),
            learning_rate: learning_rate(),
            policy_weight: policy_weight(),
            value_weight: value_weight(),
            shuffle: shuffle(),
            use_cuda: use_cuda(),
            seed: None
        }
    }
}

fn channels () -> i64 
{
    512
}

fn fc1_units () -> i64 
{
    1024
}

fn fc2_units () -> i64 
{
    512
}

fn dropout () -> f64 
{
    0.3
}

fn batch_size () -> usize 
{
    64
}

fn epochs () -> usize 
{
    5
}

fn learning_rate () -> f64 
{
    0.001
}

// Policy and value losses are summed with equal weight unless configured otherwise.

fn policy_weight () -> f64 
{
    1.0
}

fn value_weight () -> f64 
{
    1.0
}

fn shuffle () -> bool 
{
    true
}

fn use_cuda () -> bool 
{
    true
}
