
use utils::{Serialize, Deserialize};
use utils::error::*;

pub use crate::neural::config::Config as NeuralConfig;

///
/// Represents a full configuration.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config 
{
    #[serde(default)]
    pub neural: NeuralConfig,

    #[serde(default = "log_path")]
    pub log_path: String,

    #[serde(default = "log_level")]
    pub log_level: String
}

impl Default for Config 
{
    fn default () -> Config 
    {
        Config 
        {
            neural: NeuralConfig::default(),
            log_path: log_path(),
            log_level: log_level()
        }
    }
}

impl Config 
{
    ///
    /// Loads a configuration from a TOML file. Missing fields take their defaults.
    ///
    pub fn from_file (path: & str) -> Result<Config>
    {
        utils::from_toml_file(path).context(format!("Invalid configuration file '{}'.", path))
    }

    ///
    /// Parses a configuration from a TOML string.
    ///
    pub fn parse (s: & str) -> Result<Config>
    {
        toml::from_str(s).context("Invalid configuration.")
    }
}

///
/// Returns the default log path.
///
fn log_path () -> String 
{
    "logs".to_owned()
}

fn log_level () -> String 
{
    "info".to_owned()
}
