// Configuration loading (§6): `GQUERY_HOME` points at a directory
// holding `gquery-conf.ini`; values there are layered under built-in
// defaults and over environment-variable overrides, the way the
// teacher's server reads its own ambient configuration.

use std::path::{Path, PathBuf};

use gryphon_base::{err, Result};
use serde::Deserialize;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IsolationLevel {
    Snapshot,
    Serializable,
}

#[derive(Clone, Debug, Deserialize)]
pub struct FeatureFlags {
    #[serde(default = "default_true")]
    pub use_rdma: bool,
    #[serde(default = "default_true")]
    pub enable_caching: bool,
    #[serde(default = "default_true")]
    pub enable_garbage_collect: bool,
}

fn default_true() -> bool {
    true
}

impl Default for FeatureFlags {
    fn default() -> Self {
        FeatureFlags {
            use_rdma: true,
            enable_caching: true,
            enable_garbage_collect: true,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct GcThresholds {
    pub cost_threshold: u64,
    pub prop_row_defrag_threshold: u64,
    pub topo_row_defrag_threshold: u64,
}

impl Default for GcThresholds {
    fn default() -> Self {
        GcThresholds {
            cost_threshold: 64,
            prop_row_defrag_threshold: 32,
            topo_row_defrag_threshold: 32,
        }
    }
}

/// The parsed contents of `gquery-conf.ini` plus built-in defaults
/// (§6 "Environment").
#[derive(Clone, Debug, Deserialize)]
pub struct GryphonConfig {
    pub isolation_level: IsolationLevel,
    pub worker_thread_count: usize,
    pub gc_consumer_count: usize,
    pub parser_thread_count: usize,
    pub rdma_kv_store_size_mib: usize,
    pub send_buffer_mib: usize,
    pub recv_buffer_mib: usize,
    pub transaction_table_size_mib: usize,
    #[serde(default)]
    pub features: FeatureFlags,
    #[serde(default)]
    pub gc_thresholds: GcThresholds,
    pub snapshot_dir: PathBuf,
    pub hdfs_path: Option<String>,
}

impl Default for GryphonConfig {
    fn default() -> Self {
        GryphonConfig {
            isolation_level: IsolationLevel::Snapshot,
            worker_thread_count: 16,
            gc_consumer_count: 2,
            parser_thread_count: 4,
            rdma_kv_store_size_mib: 1024,
            send_buffer_mib: 64,
            recv_buffer_mib: 64,
            transaction_table_size_mib: 256,
            features: FeatureFlags::default(),
            gc_thresholds: GcThresholds::default(),
            snapshot_dir: PathBuf::from("/tmp/gryphon-snapshots"),
            hdfs_path: None,
        }
    }
}

impl GryphonConfig {
    /// Loads the ini file at `ini_path` (the CLI's `<config.ini>`
    /// argument, §6), layering `GRYPHON_*` environment overrides on top.
    pub fn load(ini_path: &Path) -> Result<Self> {
        let defaults = GryphonConfig::default();
        let builder = config::Config::builder()
            .set_default("isolation_level", "SNAPSHOT")?
            .set_default("worker_thread_count", defaults.worker_thread_count as i64)?
            .set_default("gc_consumer_count", defaults.gc_consumer_count as i64)?
            .set_default("parser_thread_count", defaults.parser_thread_count as i64)?
            .set_default("rdma_kv_store_size_mib", defaults.rdma_kv_store_size_mib as i64)?
            .set_default("send_buffer_mib", defaults.send_buffer_mib as i64)?
            .set_default("recv_buffer_mib", defaults.recv_buffer_mib as i64)?
            .set_default("transaction_table_size_mib", defaults.transaction_table_size_mib as i64)?
            .set_default("snapshot_dir", defaults.snapshot_dir.to_string_lossy().to_string())?
            .add_source(config::File::from(ini_path.to_path_buf()).required(false))
            .add_source(config::Environment::with_prefix("GRYPHON").separator("__"));
        let built = builder.build().map_err(|e| err(e.to_string()))?;
        built.try_deserialize().map_err(|e| err(e.to_string()))
    }

    /// Reads `GQUERY_HOME` from the environment and loads
    /// `$GQUERY_HOME/gquery-conf.ini`.
    pub fn load_from_env() -> Result<Self> {
        let home = std::env::var("GQUERY_HOME").map_err(|_| err("GQUERY_HOME is not set"))?;
        Self::load(&Path::new(&home).join("gquery-conf.ini"))
    }
}
