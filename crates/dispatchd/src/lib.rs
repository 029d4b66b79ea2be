//! dispatchd - multi-turn task dispatch controller
//!
//! Runtime components: the process runner, gateway readiness, the single-turn
//! executor and the multi-turn controller that ties them together.

pub mod controller;
pub mod executor;
pub mod readiness;
pub mod runner;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dispatch_core::ControllerConfig;

pub use controller::Controller;
pub use executor::{TurnError, TurnExecutor, TurnOutcome};
pub use readiness::{AlwaysReady, Readiness, ReadinessError, TcpReadiness};
pub use runner::{CommandSpec, ProcessOutput, ProcessRunner, RunnerError, ShellRunner};

/// Default config file location (`$XDG_CONFIG_HOME/dispatchd/config`).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("dispatchd").join("config"))
}

/// Build a production controller from configuration: `sh -c` runner and a TCP
/// gateway probe. With `skip_readiness` the gateway is assumed ready.
pub fn controller_from_config(config: &ControllerConfig, skip_readiness: bool) -> Controller {
    let executor = TurnExecutor::new(Arc::new(ShellRunner::new()), config.worker_bin.clone());
    let readiness: Arc<dyn Readiness> = if skip_readiness {
        Arc::new(AlwaysReady)
    } else {
        Arc::new(TcpReadiness::new(
            config.gateway_addr.clone(),
            config.gateway_retries,
            Duration::from_secs(config.gateway_retry_backoff_sec),
        ))
    };
    Controller::new(executor, readiness, config.budget())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_path_ends_with_app_dir() {
        if let Some(path) = default_config_path() {
            assert!(path.ends_with("dispatchd/config"));
        }
    }

    #[test]
    fn controller_from_config_carries_budget() {
        let config = ControllerConfig {
            total_budget_sec: 100,
            per_turn_cap_sec: 50,
            min_remaining_sec: 10,
            ..ControllerConfig::default()
        };
        let controller = controller_from_config(&config, true);
        let debug = format!("{controller:?}");
        assert!(debug.contains("100s"));
        assert!(debug.contains("openclaw"));
    }
}
