use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

use crate::error::ConfigError;
use crate::layout::KernelLayout;
use crate::METRICS_CAPACITY;

const OSRELEASE_PATH: &str = "/proc/sys/kernel/osrelease";

/// 探针配置，挂载时一次性下发，挂载期间只读
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 输出探针内部调试日志
    pub debug_log: bool,
    /// 内核版本（MAJOR.MINOR.PATCH），缺省时读取运行内核
    pub kernel_version: Option<String>,
    /// 探针表："symbol:index,symbol:index"，index 为 kiocb 参数位置（1..=5）
    pub probes: String,
    pub features: Features,
    /// 每条输出流的缓冲条数
    pub channel_capacity: usize,
    /// I/O 聚合表容量
    pub metrics_capacity: usize,
    pub layout: KernelLayout,
}

/// 功能开关
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Features {
    pub dns: bool,
    pub nfs_metrics: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            dns: true,
            nfs_metrics: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug_log: false,
            kernel_version: None,
            probes: String::new(),
            features: Features::default(),
            channel_capacity: 1024,
            metrics_capacity: METRICS_CAPACITY,
            layout: KernelLayout::default(),
        }
    }
}

impl Config {
    /// 从 YAML 文件加载配置
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败 {}", path.display()))?;
        Self::from_yaml_str(&content)
            .with_context(|| format!("解析配置文件失败 {}", path.display()))
    }

    pub fn from_yaml_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_capacity == 0 {
            return Err(ConfigError::ZeroCapacity {
                field: "channel_capacity",
            });
        }
        if self.metrics_capacity == 0 {
            return Err(ConfigError::ZeroCapacity {
                field: "metrics_capacity",
            });
        }
        if let Some(v) = &self.kernel_version {
            KernelVersion::parse(v)?;
        }
        Ok(())
    }

    /// 解析配置的内核版本；未配置时探测运行内核，探测失败返回 None
    pub fn resolve_kernel_version(&self) -> Result<Option<KernelVersion>, ConfigError> {
        match &self.kernel_version {
            Some(v) => KernelVersion::parse(v).map(Some),
            None => Ok(KernelVersion::detect()),
        }
    }
}

/// 与内核 KERNEL_VERSION(a, b, c) 相同的编码
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KernelVersion(u32);

impl KernelVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        let patch = if patch > 255 { 255 } else { patch };
        Self((major << 16) + (minor << 8) + patch)
    }

    pub const fn code(self) -> u32 {
        self.0
    }

    pub const fn major(self) -> u32 {
        (self.0 >> 16) & 0xFF
    }

    pub const fn minor(self) -> u32 {
        (self.0 >> 8) & 0xFF
    }

    pub const fn patch(self) -> u32 {
        self.0 & 0xFF
    }

    /// 解析 "6.8.0"、"5.10"、"6.8.0-45-generic" 等形式
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::KernelVersion(s.to_string());
        let mut parts = s.trim().split('.').map(|p| {
            let digits: String = p.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse::<u32>()
        });

        let major = parts.next().ok_or_else(invalid)?.map_err(|_| invalid())?;
        let minor = parts.next().ok_or_else(invalid)?.map_err(|_| invalid())?;
        let patch = match parts.next() {
            Some(p) => p.unwrap_or(0),
            None => 0,
        };
        if major > 255 || minor > 255 {
            return Err(invalid());
        }
        Ok(Self::new(major, minor, patch))
    }

    /// 读取运行内核版本
    pub fn detect() -> Option<Self> {
        let release = fs::read_to_string(OSRELEASE_PATH).ok()?;
        Self::parse(&release).ok()
    }
}

impl fmt::Display for KernelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major(), self.minor(), self.patch())
    }
}
