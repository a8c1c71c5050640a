
///
/// Error plumbing shared by every crate in the workspace.
///
/// `error!` builds an ad-hoc error from a format string, `Context` attaches 
/// a description to a failing result, and `Result` is the workspace-wide 
/// fallible return type.
///
pub use anyhow::{anyhow as error, bail, Context, Error, Result};
