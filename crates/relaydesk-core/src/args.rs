use crate::config::Config;
use clap::Args;
use std::path::PathBuf;

// Global flags shared across every subcommand.
//
//   -c / --config      Path to a config.toml file
//   --settings-dir     Root state directory override
//   --profile <name>   Isolate state under ~/.relaydesk-<name>
//   --db               Thread database override
#[derive(Debug, Clone, Default, Args)]
pub struct CommonArgs {
    /// Path to a config.toml file
    #[arg(
        short = 'c',
        long,
        value_name = "PATH",
        env = "RELAYDESK_CONFIG",
        global = true
    )]
    pub config: Option<PathBuf>,

    /// Settings directory (default: ~/.relaydesk)
    #[arg(
        long,
        value_name = "DIR",
        env = "RELAYDESK_SETTINGS_DIR",
        global = true
    )]
    pub settings_dir: Option<PathBuf>,

    /// Isolate state under ~/.relaydesk-<PROFILE>
    #[arg(long, value_name = "PROFILE", env = "RELAYDESK_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Thread database (default: <settings-dir>/threads.db)
    #[arg(long = "db", value_name = "PATH", env = "RELAYDESK_DB", global = true)]
    pub db_path: Option<PathBuf>,
}

impl CommonArgs {
    /// Resolve the effective settings directory, honouring `--profile`.
    pub fn effective_settings_dir(&self) -> Option<PathBuf> {
        if let Some(dir) = &self.settings_dir {
            return Some(dir.clone());
        }
        if let Some(profile) = &self.profile {
            let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
            return Some(home.join(format!(".relaydesk-{}", profile)));
        }
        None
    }

    pub fn config_path(&self) -> Option<PathBuf> {
        if let Some(config) = &self.config {
            return Some(config.clone());
        }
        self.effective_settings_dir()
            .map(|settings_dir| settings_dir.join("config.toml"))
    }

    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(settings_dir) = self.effective_settings_dir() {
            config.settings_dir = settings_dir;
        }
        if let Some(db_path) = &self.db_path {
            config.threads.db_path = Some(db_path.clone());
        }
    }

    /// Load the config file these flags point at and apply the overrides.
    pub fn load_config(&self) -> anyhow::Result<Config> {
        let mut config = Config::load(self.config_path())?;
        self.apply_overrides(&mut config);
        Ok(config)
    }
}
