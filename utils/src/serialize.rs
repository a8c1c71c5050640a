
use std::fs::OpenOptions;
use std::io::Read;

use serde::de::DeserializeOwned;

use super::error::*;

pub use serde::{Serialize, Deserialize};

///
/// Reads the file at the given path and deserializes it as a TOML document.
///
pub fn from_toml_file<T> (path: & str) -> Result<T>
    where T: DeserializeOwned
{
    let mut contents = String::new();
    OpenOptions::new()
        .read(true)
        .open(path)
        .context(format!("Failed to open '{}'.", path))?
        .read_to_string(& mut contents)
        .context(format!("Failed to read '{}'.", path))?;

    toml::from_str(& contents).context(format!("Failed to parse '{}' as TOML.", path))
}
