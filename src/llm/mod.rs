//! Text-generation backends.
//!
//! Every step talks to a model through [`TextGenerator`]. [`CliGenerator`]
//! shells out to a local CLI; [`ScriptedGenerator`] replays canned responses.

mod cli;
mod scripted;

pub use cli::{Backend, CliGenerator};
pub use scripted::ScriptedGenerator;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::BackendConfig;
use crate::error::Result;

/// Opaque `generate(prompt) -> text` capability.
///
/// Implementations fail with [`crate::Error::Generation`] when the backend is
/// unavailable or returns nothing usable. No retries happen at this layer.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generates text for `prompt`.
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Returns the name of this generator.
    fn name(&self) -> &str;
}

/// Builds a generator for one role from its backend configuration.
pub fn generator_for(config: &BackendConfig) -> Result<Arc<dyn TextGenerator>> {
    let backend: Backend = config.backend.parse()?;
    Ok(Arc::new(CliGenerator::new(backend, config.model.clone())?))
}
