// 配置管理模块 - serde/TOML 层，转换为各模块的运行时配置

use crate::checker::CheckerConfig;
use crate::pool::PoolConfig;
use crate::transport::TransportType;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 应用配置（从 TOML 文件加载）
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// 域名检查器配置
    #[serde(default)]
    pub checker: CheckerSettings,
    /// 上游配置
    #[serde(default)]
    pub upstream: UpstreamSettings,
    /// 连接池配置
    #[serde(default)]
    pub pool: PoolSettings,
    /// 心跳配置
    #[serde(default)]
    pub heartbeat: HeartbeatSettings,
}

impl AppConfig {
    /// 从 TOML 文件加载配置
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: AppConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        Ok(config)
    }
}

/// 域名检查器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckerSettings {
    /// 被墙域名列表文件（一行一个域名）
    pub blocked_file: Option<PathBuf>,
    /// 直连域名列表文件（一行一个域名）
    pub direct_file: Option<PathBuf>,
    /// 重新探测间隔（秒）
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,
    /// 探测拨号超时（毫秒）
    #[serde(default = "default_dial_timeout_ms")]
    pub dial_timeout_ms: u64,
}

fn default_probe_interval_secs() -> u64 {
    5
}

fn default_dial_timeout_ms() -> u64 {
    3000
}

impl Default for CheckerSettings {
    fn default() -> Self {
        Self {
            blocked_file: None,
            direct_file: None,
            probe_interval_secs: default_probe_interval_secs(),
            dial_timeout_ms: default_dial_timeout_ms(),
        }
    }
}

impl CheckerSettings {
    pub fn to_checker_config(&self) -> CheckerConfig {
        CheckerConfig {
            blocked_file: self.blocked_file.clone(),
            direct_file: self.direct_file.clone(),
            probe_interval: Duration::from_secs(self.probe_interval_secs),
            dial_timeout: Duration::from_millis(self.dial_timeout_ms),
        }
    }
}

/// 上游配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpstreamSettings {
    /// 上游地址（host:port）
    #[serde(default)]
    pub address: String,
    /// 传输类型
    #[serde(default)]
    pub transport: TransportType,
    /// TLS 配置
    #[serde(default)]
    pub tls: TlsSettings,
}

/// TLS 配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TlsSettings {
    /// TLS SNI（缺省时取上游地址的 host 部分）
    pub server_name: Option<String>,
    /// 自定义 CA 证书文件
    pub ca_cert: Option<PathBuf>,
    /// 是否跳过证书验证（仅用于测试）
    #[serde(default)]
    pub skip_verify: bool,
}

/// 连接池配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    /// 初始连接数（为 0 时不预热、不启动健康检查）
    #[serde(default)]
    pub initial_capacity: usize,
    /// 最大连接数
    #[serde(default = "default_max_capacity")]
    pub max_capacity: usize,
    /// 拨号超时（毫秒）
    #[serde(default = "default_pool_dial_timeout_ms")]
    pub dial_timeout_ms: u64,
    /// 健康检查间隔（秒，为 0 时禁用）
    #[serde(default)]
    pub health_interval_secs: u64,
}

fn default_max_capacity() -> usize {
    10
}

fn default_pool_dial_timeout_ms() -> u64 {
    5000
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            initial_capacity: 0,
            max_capacity: default_max_capacity(),
            dial_timeout_ms: default_pool_dial_timeout_ms(),
            health_interval_secs: 0,
        }
    }
}

impl PoolSettings {
    pub fn to_pool_config(&self) -> PoolConfig {
        PoolConfig {
            initial_capacity: self.initial_capacity,
            max_capacity: self.max_capacity,
            dial_timeout: Duration::from_millis(self.dial_timeout_ms),
            health_interval: Duration::from_secs(self.health_interval_secs),
        }
    }
}

/// 心跳配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatSettings {
    /// 心跳发送周期（秒）
    #[serde(default = "default_heartbeat_period_secs")]
    pub period_secs: u64,
}

fn default_heartbeat_period_secs() -> u64 {
    3
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            period_secs: default_heartbeat_period_secs(),
        }
    }
}

impl HeartbeatSettings {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }
}
