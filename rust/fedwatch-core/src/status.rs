//! Training status and training control payloads.

use validator::Validate;

/// A snapshot of the supervised training run.
///
/// Fields missing from a payload take their default value, so the narrower `/api/status` answer
/// of older servers deserializes as well.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingStatus {
    /// The Flower server process runs and accepts connections.
    pub connected: bool,
    /// The Flower server process runs.
    pub server_running: bool,
    /// The Flower server accepts connections.
    #[serde(alias = "flower_server_accessible")]
    pub flower_accessible: bool,
    pub training_in_progress: bool,
    #[serde(alias = "clients_running")]
    pub clients_connected: u32,
    pub current_round: u32,
    pub total_rounds: u32,
}

/// The parameters of a training run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct TrainingConfig {
    #[serde(default = "default_count")]
    #[validate(range(min = 1))]
    pub num_rounds: u32,
    #[serde(default = "default_count")]
    #[validate(range(min = 1))]
    pub num_clients: u32,
}

fn default_count() -> u32 {
    3
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            num_rounds: default_count(),
            num_clients: default_count(),
        }
    }
}

/// The acknowledgement of a training control request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rounds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clients: Option<u32>,
}

impl Ack {
    pub fn started(config: &TrainingConfig) -> Self {
        Self {
            status: "Training started".to_string(),
            rounds: Some(config.num_rounds),
            clients: Some(config.num_clients),
        }
    }

    pub fn stopped() -> Self {
        Self {
            status: "Training stopped".to_string(),
            rounds: None,
            clients: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_narrow_status_payload() {
        let status: TrainingStatus = serde_json::from_str(
            r#"{"training_in_progress": true, "server_running": true, "clients_running": 2}"#,
        )
        .unwrap();
        assert!(status.training_in_progress);
        assert!(status.server_running);
        assert!(!status.connected);
        assert_eq!(status.clients_connected, 2);
        assert_eq!(status.total_rounds, 0);
    }

    #[test]
    fn test_training_config_validation() {
        assert!(TrainingConfig::default().validate().is_ok());
        let config: TrainingConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, TrainingConfig::default());
        assert!(TrainingConfig {
            num_rounds: 0,
            num_clients: 2
        }
        .validate()
        .is_err());
        assert!(TrainingConfig {
            num_rounds: 2,
            num_clients: 0
        }
        .validate()
        .is_err());
    }

    #[test]
    fn test_ack_skips_empty_fields() {
        assert_eq!(
            serde_json::to_string(&Ack::stopped()).unwrap(),
            r#"{"status":"Training stopped"}"#
        );
    }
}
