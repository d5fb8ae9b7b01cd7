use std::collections::HashMap;
use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::livestatus::ConnectionType;
use crate::printable::{Datatype, IndexRotation, RenderOptions, Target};

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub main: MainConfig,

    #[serde(default)]
    pub nagios_spoolfile: SpoolfileConfig,

    #[serde(default)]
    pub livestatus: LivestatusConfig,

    /// Named gearman workers
    #[serde(default)]
    pub mod_gearman: HashMap<String, GearmanConfig>,

    #[serde(default)]
    pub filter: FilterConfig,

    /// Named output targets
    #[serde(default)]
    pub targets: HashMap<String, TargetConfig>,

    #[serde(default)]
    pub render: RenderConfig,

    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct MainConfig {
    /// Capacity of every target queue
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    #[serde(default = "default_field_separator")]
    pub field_separator: String,

    /// Routing filter for samples without a `NAGFLUX:TARGET`
    #[serde(default = "default_target")]
    pub default_target: String,

    /// Deprecated, use `nagios_spoolfile.folder`
    pub nagios_spoolfile_folder: Option<PathBuf>,

    /// Deprecated, use `nagios_spoolfile.worker_count`
    pub nagios_spoolfile_worker: Option<usize>,
}

impl Default for MainConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            field_separator: default_field_separator(),
            default_target: default_target(),
            nagios_spoolfile_folder: None,
            nagios_spoolfile_worker: None,
        }
    }
}

fn default_buffer_size() -> usize {
    10_000
}

fn default_field_separator() -> String {
    "&".to_string()
}

fn default_target() -> String {
    crate::routing::ALL.to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct SpoolfileConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub folder: Option<PathBuf>,
    pub worker_count: Option<usize>,
}

impl Default for SpoolfileConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            folder: None,
            worker_count: None,
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct LivestatusConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default, rename = "type")]
    pub connection_type: ConnectionType,

    #[serde(default = "default_livestatus_address")]
    pub address: String,

    /// Skip version detection, one of nagios, icinga2, naemon
    pub version: Option<String>,

    #[serde(default = "default_minutes_to_wait")]
    pub minutes_to_wait: u32,
}

impl Default for LivestatusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            connection_type: ConnectionType::default(),
            address: default_livestatus_address(),
            version: None,
            minutes_to_wait: default_minutes_to_wait(),
        }
    }
}

fn default_livestatus_address() -> String {
    "127.0.0.1:6557".to_string()
}

fn default_minutes_to_wait() -> u32 {
    3
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct GearmanConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_gearman_address")]
    pub address: String,

    #[serde(default = "default_gearman_queue")]
    pub queue: String,

    #[serde(default)]
    pub secret: String,

    pub secret_file: Option<PathBuf>,

    #[serde(default = "default_gearman_worker")]
    pub worker: usize,
}

fn default_gearman_address() -> String {
    "127.0.0.1:4730".to_string()
}

fn default_gearman_queue() -> String {
    "perfdata".to_string()
}

fn default_gearman_worker() -> usize {
    1
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct FilterConfig {
    #[serde(default)]
    pub spool_file_line_terms: Vec<String>,

    #[serde(default)]
    pub livestatus_line_terms: Vec<String>,

    /// Record field name to regex terms
    #[serde(default)]
    pub field_filter: HashMap<String, Vec<String>>,

    #[serde(default)]
    pub livestatus_notifications_filter: Vec<String>,

    #[serde(default)]
    pub livestatus_comments_filter: Vec<String>,

    #[serde(default)]
    pub livestatus_downtimes_filter: Vec<String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct TargetConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub datatype: Datatype,
    pub version: String,
    /// Index prefix for Elasticsearch targets
    #[serde(default = "default_index")]
    pub index: String,
}

fn default_index() -> String {
    "nagflow".to_string()
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct RenderConfig {
    #[serde(default = "default_hostcheck_alias")]
    pub hostcheck_alias: String,
    #[serde(default)]
    pub nasty_string: String,
    #[serde(default)]
    pub nasty_string_to_replace: String,
    #[serde(default)]
    pub index_rotation: IndexRotation,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            hostcheck_alias: default_hostcheck_alias(),
            nasty_string: String::new(),
            nasty_string_to_replace: String::new(),
            index_rotation: IndexRotation::default(),
        }
    }
}

fn default_hostcheck_alias() -> String {
    "hostcheck".to_string()
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_min_severity")]
    pub min_severity: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            min_severity: default_min_severity(),
        }
    }
}

fn default_min_severity() -> String {
    "info".to_string()
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("main.field_separator must not be empty")]
    EmptyFieldSeparator,

    #[error("main.buffer_size must be greater than zero")]
    ZeroBufferSize,

    #[error("spool file collector is enabled but no folder is configured")]
    MissingSpoolFolder,

    #[error("spool file collector is enabled but its worker count is missing or zero")]
    MissingSpoolWorkerCount,

    #[error("no target is enabled")]
    NoEnabledTarget,
}

impl Config {
    /// Check the settings nothing can run without
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.main.field_separator.is_empty() {
            return Err(ConfigError::EmptyFieldSeparator);
        }
        if self.main.buffer_size == 0 {
            return Err(ConfigError::ZeroBufferSize);
        }
        if self.nagios_spoolfile.enabled {
            if self.spool_folder().is_none() {
                return Err(ConfigError::MissingSpoolFolder);
            }
            if self.spool_worker_count().is_none_or(|count| count == 0) {
                return Err(ConfigError::MissingSpoolWorkerCount);
            }
        }
        if self.enabled_targets().next().is_none() {
            return Err(ConfigError::NoEnabledTarget);
        }
        Ok(())
    }

    /// Spool folder, `nagios_spoolfile.folder` wins over the deprecated
    /// `main.nagios_spoolfile_folder`
    pub fn spool_folder(&self) -> Option<PathBuf> {
        preferred(
            "nagios_spoolfile.folder",
            self.nagios_spoolfile.folder.clone(),
            [(
                "main.nagios_spoolfile_folder",
                self.main.nagios_spoolfile_folder.clone(),
            )],
        )
    }

    /// Spool worker count, `nagios_spoolfile.worker_count` wins over the
    /// deprecated `main.nagios_spoolfile_worker`
    pub fn spool_worker_count(&self) -> Option<usize> {
        preferred(
            "nagios_spoolfile.worker_count",
            self.nagios_spoolfile.worker_count,
            [(
                "main.nagios_spoolfile_worker",
                self.main.nagios_spoolfile_worker,
            )],
        )
    }

    /// Enabled targets sorted by name
    pub fn enabled_targets(&self) -> impl Iterator<Item = Target> + '_ {
        let mut names: Vec<_> = self
            .targets
            .iter()
            .filter(|(_, target)| target.enabled)
            .map(|(name, _)| name)
            .collect();
        names.sort();

        names.into_iter().map(|name| {
            let target = &self.targets[name];
            Target::new(name.clone(), target.datatype, target.version.clone())
                .with_index(target.index.clone())
        })
    }

    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            hostcheck_alias: self.render.hostcheck_alias.clone(),
            nasty_string: self.render.nasty_string.clone(),
            nasty_string_to_replace: self.render.nasty_string_to_replace.clone(),
            index_rotation: self.render.index_rotation,
        }
    }
}

/// Pick the primary option if set, else the first deprecated one that is set
fn preferred<T, const N: usize>(
    primary_path: &str,
    primary: Option<T>,
    deprecated: [(&str, Option<T>); N],
) -> Option<T> {
    if primary.is_some() {
        for (path, value) in &deprecated {
            if value.is_some() {
                debug!("config option {primary_path} is taken instead of {path}");
            }
        }
        return primary;
    }

    for (path, value) in deprecated {
        if value.is_some() {
            warn!("config option {path} is deprecated, use {primary_path} instead");
            return value;
        }
    }

    debug!("config option {primary_path} is not set");
    None
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
