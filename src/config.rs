use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
  pub db_name: String,
  pub db_user: String,
  pub db_password: String,
  pub db_host: String,
  pub db_port: u16,

  pub rpc_url: String,
  #[serde(default)]
  pub rpc_user: Option<String>,
  #[serde(default)]
  pub rpc_password: Option<String>,

  /// Width of the height ranges handed to one persistence worker.
  #[serde(default = "default_chunk_size")]
  pub block_chunk_processing_size: u64,

  /// Run against the in-memory repository instead of PostgreSQL.
  #[serde(default)]
  pub memory_db: bool,
}

fn default_chunk_size() -> u64 {
  100
}

impl Settings {
  pub fn new() -> Result<Self, config::ConfigError> {
    let default_config_path = "./config.toml";
    let env_prefix = "ZINDEXER"; // E.g. ZINDEXER_DB_PASSWORD=... overrides the file value

    let builder = config::Config::builder()
      .add_source(config::File::with_name(default_config_path).required(true))
      .add_source(config::Environment::with_prefix(env_prefix).separator("__"));

    builder.build()?.try_deserialize()
  }

  pub fn database_url(&self) -> String {
    format!(
      "postgres://{}:{}@{}:{}/{}",
      self.db_user, self.db_password, self.db_host, self.db_port, self.db_name
    )
  }
}
