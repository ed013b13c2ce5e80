//! Simulator configuration

use anyhow::{anyhow, Context};
use librpmsg::vring::VringLayout;
use librpmsg::{LinkConfig, NsAnnouncement, NsIntent};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimConfig {
    /// Link parameters shared by both ends
    #[serde(default)]
    pub link: LinkConfig,

    /// Vring geometry
    #[serde(default)]
    pub ring: RingConfig,

    /// Channel the echo firmware announces
    #[serde(default)]
    pub channel: ChannelConfig,

    /// Daemon settings
    #[serde(default)]
    pub daemon: DaemonConfig,
}

/// Vring geometry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RingConfig {
    /// Descriptors per ring (power of two)
    #[serde(default = "default_num")]
    pub num: u16,

    /// Used ring alignment
    #[serde(default = "default_align")]
    pub align: usize,

    /// Address the coprocessor sees the buffer pool at
    #[serde(default = "default_device_base")]
    pub device_base: u64,

    /// Let the coprocessor interrupt the host on used buffers
    #[serde(default = "default_true")]
    pub interrupts: bool,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            num: default_num(),
            align: default_align(),
            device_base: default_device_base(),
            interrupts: true,
        }
    }
}

/// Echo channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Name the host binds a driver by
    #[serde(default = "default_channel_name")]
    pub name: String,

    #[serde(default = "default_channel_desc")]
    pub desc: String,

    /// Local (coprocessor) port
    #[serde(default = "default_port")]
    pub port: u32,

    /// Host endpoint that talks to the channel
    #[serde(default = "default_host_addr")]
    pub host_addr: u32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            name: default_channel_name(),
            desc: default_channel_desc(),
            port: default_port(),
            host_addr: default_host_addr(),
        }
    }
}

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_num() -> u16 {
    16
}

fn default_align() -> usize {
    16
}

fn default_device_base() -> u64 {
    0x8000_0000
}

fn default_channel_name() -> String {
    "rpmsg-pru".to_string()
}

fn default_channel_desc() -> String {
    "Channel 30".to_string()
}

fn default_port() -> u32 {
    30
}

fn default_host_addr() -> u32 {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

impl SimConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Vring layout described by `ring`
    pub fn layout(&self) -> anyhow::Result<VringLayout> {
        VringLayout::new(self.ring.num, self.ring.align).ok_or_else(|| {
            anyhow!(
                "invalid ring geometry: num={} align={}",
                self.ring.num,
                self.ring.align
            )
        })
    }

    /// Reject settings the link cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        self.link.validate()?;
        self.layout()?;
        NsAnnouncement::new(NsIntent::Create, &self.channel.name, &self.channel.desc, self.channel.port)
            .map_err(|e| anyhow!("channel name/description: {}", e))?;
        if self.channel.port == self.link.ns_addr {
            return Err(anyhow!("channel port {} is the name-service address", self.channel.port));
        }
        Ok(())
    }
}
