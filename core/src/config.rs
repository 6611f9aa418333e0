use crate::{model::Position, types::PlayerId};
use serde::{Deserialize, Serialize};

/// Default staleness window for an unconfirmed prediction.
pub const DEFAULT_PREDICTION_TIMEOUT_SECS: i64 = 30;

// ── Networking ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncSettings {
    /// Seconds a prediction may wait for confirmation before it is
    /// abandoned and the client rolls back.
    #[serde(default = "default_prediction_timeout")]
    pub prediction_timeout_secs: i64,
    /// Remote peers the host will accept.
    #[serde(default = "default_max_peers")]
    pub max_peers: usize,
    /// Run phases locally on submit and show the result before the host
    /// confirms.
    #[serde(default = "default_predict")]
    pub predict: bool,
}

fn default_prediction_timeout() -> i64 { DEFAULT_PREDICTION_TIMEOUT_SECS }
fn default_max_peers() -> usize { 4 }
fn default_predict() -> bool { true }

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            prediction_timeout_secs: default_prediction_timeout(),
            max_peers:               default_max_peers(),
            predict:                 default_predict(),
        }
    }
}

// ── Game setup ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BoardConfig {
    pub width:      i64,
    pub height:     i64,
    pub objectives: Vec<Position>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameSetup {
    /// Master seed. None only for single-peer runs.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Turn order.
    pub players: Vec<PlayerId>,
    pub board: BoardConfig,
    #[serde(default = "default_max_units")]
    pub max_units_per_player: usize,
}

fn default_max_units() -> usize { 5 }

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    #[serde(default)]
    pub sync:  SyncSettings,
    pub setup: GameSetup,
}

impl SessionConfig {
    /// Load from a JSON file.
    /// In tests, use SessionConfig::default_test().
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: SessionConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> anyhow::Result<()> {
        let setup = &self.setup;
        if setup.players.len() < 2 {
            anyhow::bail!("a session needs at least two players, got {}", setup.players.len());
        }
        let mut seen = std::collections::BTreeSet::new();
        for player in &setup.players {
            if !seen.insert(player) {
                anyhow::bail!("duplicate player id '{player}'");
            }
        }
        if setup.board.width <= 0 || setup.board.height <= 0 {
            anyhow::bail!("board must have positive dimensions");
        }
        if self.sync.prediction_timeout_secs <= 0 {
            anyhow::bail!("prediction_timeout_secs must be positive");
        }
        Ok(())
    }

    /// Config with hardcoded defaults for use in tests.
    pub fn default_test() -> Self {
        Self {
            sync:  SyncSettings::default(),
            setup: GameSetup::default_test(42),
        }
    }
}

impl GameSetup {
    /// Two players on a 24x24 board with three objectives.
    pub fn default_test(seed: u64) -> Self {
        Self {
            seed:    Some(seed),
            players: vec!["P1".into(), "P2".into()],
            board:   BoardConfig {
                width:      24,
                height:     24,
                objectives: vec![
                    Position::new(4, 12),
                    Position::new(12, 12),
                    Position::new(20, 12),
                ],
            },
            max_units_per_player: default_max_units(),
        }
    }
}
