//! Game server control
//!
//! The backup pipeline talks to the live server only through
//! [`GameServerController`]: it reads the run state, sends console commands
//! to pause and resume saving, and (from the CLI) changes the power state.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{info, warn};

pub mod panel;

pub use panel::{
    parse_payload, parse_resources, PanelClient, ResourceAttributes, ResourceUsage,
    ServerDetails, ServerDetailsAttributes, ServerResources, SftpDetails,
};

/// Errors returned by the control panel
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControllerError {
    #[error("Control panel request failed: {0}")]
    Http(String),

    #[error("Control panel answered {status} for {endpoint}")]
    Status { endpoint: String, status: u16 },

    #[error("Unexpected control panel response: {0}")]
    Parse(String),

    #[error("Invalid control panel URL: {0}")]
    InvalidUrl(String),
}

/// Run state reported by the panel. Only `Running` matters to the backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerRunState {
    Running,
    Starting,
    Stopping,
    Offline,
    Other(String),
}

impl ServerRunState {
    pub fn is_running(&self) -> bool {
        matches!(self, ServerRunState::Running)
    }

    pub fn as_str(&self) -> &str {
        match self {
            ServerRunState::Running => "running",
            ServerRunState::Starting => "starting",
            ServerRunState::Stopping => "stopping",
            ServerRunState::Offline => "offline",
            ServerRunState::Other(state) => state,
        }
    }
}

impl From<&str> for ServerRunState {
    fn from(value: &str) -> Self {
        match value {
            "running" => ServerRunState::Running,
            "starting" => ServerRunState::Starting,
            "stopping" => ServerRunState::Stopping,
            "offline" => ServerRunState::Offline,
            other => ServerRunState::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ServerRunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Power signals accepted by the panel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerSignal {
    Start,
    Stop,
    Restart,
    Kill,
}

impl PowerSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            PowerSignal::Start => "start",
            PowerSignal::Stop => "stop",
            PowerSignal::Restart => "restart",
            PowerSignal::Kill => "kill",
        }
    }
}

impl fmt::Display for PowerSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PowerSignal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "start" => Ok(PowerSignal::Start),
            "stop" => Ok(PowerSignal::Stop),
            "restart" => Ok(PowerSignal::Restart),
            "kill" => Ok(PowerSignal::Kill),
            other => Err(format!("unknown power signal: {}", other)),
        }
    }
}

/// Acknowledgement for a console command
#[derive(Debug, Clone, PartialEq)]
pub struct CommandReceipt {
    pub status: u16,
    pub body: String,
}

/// Operations the backup pipeline needs from the game server
#[async_trait]
pub trait GameServerController: Send + Sync {
    /// Current run state as reported by the panel
    async fn run_state(&self) -> Result<ServerRunState, ControllerError>;

    /// Send a console command to the server
    async fn send_command(&self, command: &str) -> Result<CommandReceipt, ControllerError>;

    /// Send a power signal. Returns whether the panel accepted it.
    async fn set_power(&self, signal: PowerSignal) -> Result<bool, ControllerError>;
}

/// Outcome of [`change_power_state`]
#[derive(Debug, Clone, PartialEq)]
pub enum PowerChange {
    /// The panel accepted the signal
    Accepted,
    /// The panel refused the signal
    Rejected,
    /// The signal makes no sense in the current state and was not sent
    Skipped { current: ServerRunState },
}

/// Send `signal` only when it would change something.
///
/// `start` is skipped for a running server and `stop`/`restart` for an
/// offline one. `kill` is never sent through this path.
pub async fn change_power_state(
    controller: &dyn GameServerController,
    signal: PowerSignal,
) -> Result<PowerChange, ControllerError> {
    let current = controller.run_state().await?;

    let pointless = match signal {
        PowerSignal::Start => current.is_running(),
        PowerSignal::Stop | PowerSignal::Restart => current == ServerRunState::Offline,
        PowerSignal::Kill => true,
    };

    if pointless {
        info!(signal = %signal, current = %current, "Skipping power change");
        return Ok(PowerChange::Skipped { current });
    }

    if controller.set_power(signal).await? {
        info!(signal = %signal, "Power change accepted");
        Ok(PowerChange::Accepted)
    } else {
        warn!(signal = %signal, "Power change rejected by panel");
        Ok(PowerChange::Rejected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct StaticController {
        state: ServerRunState,
        accept: bool,
        signals: Mutex<Vec<PowerSignal>>,
    }

    impl StaticController {
        fn new(state: ServerRunState, accept: bool) -> Self {
            Self {
                state,
                accept,
                signals: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl GameServerController for StaticController {
        async fn run_state(&self) -> Result<ServerRunState, ControllerError> {
            Ok(self.state.clone())
        }

        async fn send_command(&self, _command: &str) -> Result<CommandReceipt, ControllerError> {
            Ok(CommandReceipt { status: 204, body: String::new() })
        }

        async fn set_power(&self, signal: PowerSignal) -> Result<bool, ControllerError> {
            self.signals.lock().push(signal);
            Ok(self.accept)
        }
    }

    #[test]
    fn test_run_state_parsing() {
        assert_eq!(ServerRunState::from("running"), ServerRunState::Running);
        assert_eq!(ServerRunState::from("offline"), ServerRunState::Offline);
        assert_eq!(
            ServerRunState::from("installing"),
            ServerRunState::Other("installing".to_string())
        );
        assert!(ServerRunState::Running.is_running());
        assert!(!ServerRunState::Starting.is_running());
        assert_eq!(ServerRunState::Other("weird".into()).to_string(), "weird");
    }

    #[test]
    fn test_power_signal_round_trip_through_str() {
        assert_eq!("RESTART".parse::<PowerSignal>(), Ok(PowerSignal::Restart));
        assert!("reboot".parse::<PowerSignal>().is_err());
        assert_eq!(
            serde_json::to_string(&PowerSignal::Kill).unwrap(),
            "\"kill\""
        );
    }

    #[tokio::test]
    async fn test_start_skipped_when_running() {
        let controller = StaticController::new(ServerRunState::Running, true);
        let change = change_power_state(&controller, PowerSignal::Start).await.unwrap();

        assert_eq!(change, PowerChange::Skipped { current: ServerRunState::Running });
        assert!(controller.signals.lock().is_empty());
    }

    #[tokio::test]
    async fn test_stop_and_restart_skipped_when_offline() {
        let controller = StaticController::new(ServerRunState::Offline, true);
        for signal in [PowerSignal::Stop, PowerSignal::Restart] {
            let change = change_power_state(&controller, signal).await.unwrap();
            assert!(matches!(change, PowerChange::Skipped { .. }));
        }
        assert!(controller.signals.lock().is_empty());
    }

    #[tokio::test]
    async fn test_signal_sent_and_rejection_reported() {
        let controller = StaticController::new(ServerRunState::Offline, false);
        let change = change_power_state(&controller, PowerSignal::Start).await.unwrap();

        assert_eq!(change, PowerChange::Rejected);
        assert_eq!(*controller.signals.lock(), vec![PowerSignal::Start]);
    }

    #[tokio::test]
    async fn test_kill_never_sent() {
        let controller = StaticController::new(ServerRunState::Running, true);
        let change = change_power_state(&controller, PowerSignal::Kill).await.unwrap();
        assert!(matches!(change, PowerChange::Skipped { .. }));
    }
}
