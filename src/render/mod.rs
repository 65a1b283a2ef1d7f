//! Render coordination: cached output, synchronous renders and the deferred render queue.

mod coordinator;
mod kumascript;
mod queue;
mod state;

pub use coordinator::*;
pub use kumascript::*;
pub use queue::*;

use std::time::Duration;

use crate::config::Config;

/// Timing policy for renders.
#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub render_timeout: Duration,
    pub force_deferred_timeout: Duration,
    pub kumascript_timeout: Duration,
    pub force_immediate_rendering: bool,
}

impl RenderSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            render_timeout: config.render_timeout,
            force_deferred_timeout: config.force_deferred_timeout,
            kumascript_timeout: config.kumascript_timeout,
            force_immediate_rendering: config.force_immediate_rendering,
        }
    }
}
