//! Optional engine plugins.
//!
//! A plugin contributes a discovery service to the node's endpoint. Plugins
//! are named in [`NodeConfig::plugins`](super::config::NodeConfig) and loaded
//! before the endpoint binds. Whether a failing plugin aborts startup is
//! governed by [`PluginPolicy`].

use std::fmt::Debug;
use std::path::Path;

use iroh::discovery::pkarr::dht::DhtDiscovery;
use iroh::discovery::Discovery;

use crate::crypto::SecretKey;

use super::config::PluginPolicy;

#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("unknown plugin: {0}")]
    Unknown(String),
    #[error("plugin {name} failed to initialize: {reason}")]
    Init { name: String, reason: String },
    #[error("plugin {name} failed to inject: {reason}")]
    Inject { name: String, reason: String },
}

pub trait Plugin: Send + Sync + Debug {
    fn name(&self) -> &str;

    /// Prepare any state the plugin keeps under the repository root
    fn init(&mut self, _root: &Path) -> Result<(), PluginError> {
        Ok(())
    }

    /// Build the discovery service this plugin adds to the endpoint
    fn discovery(&self, secret_key: &SecretKey) -> Result<Box<dyn Discovery>, PluginError>;
}

/// Publishes and resolves node addresses on the mainline DHT
#[derive(Debug, Default)]
pub struct DhtPlugin;

impl DhtPlugin {
    pub const NAME: &'static str = "dht";
}

impl Plugin for DhtPlugin {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn discovery(&self, secret_key: &SecretKey) -> Result<Box<dyn Discovery>, PluginError> {
        let discovery = DhtDiscovery::builder()
            .secret_key(secret_key.0.clone())
            .build()
            .map_err(|e| PluginError::Inject {
                name: Self::NAME.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Box::new(discovery))
    }
}

/// Instantiate a built-in plugin by name
pub fn builtin(name: &str) -> Result<Box<dyn Plugin>, PluginError> {
    match name {
        DhtPlugin::NAME => Ok(Box::new(DhtPlugin)),
        other => Err(PluginError::Unknown(other.to_string())),
    }
}

/// Loads plugins and collects the services they inject.
#[derive(Debug)]
pub struct PluginLoader {
    policy: PluginPolicy,
    plugins: Vec<Box<dyn Plugin>>,
}

impl PluginLoader {
    /// Resolve plugin names and run each plugin's `init` at `root`.
    pub fn load(names: &[String], root: &Path, policy: PluginPolicy) -> Result<Self, PluginError> {
        let mut loader = Self {
            policy,
            plugins: Vec::with_capacity(names.len()),
        };
        for name in names {
            let loaded = builtin(name).and_then(|mut plugin| {
                plugin.init(root)?;
                Ok(plugin)
            });
            match loaded {
                Ok(plugin) => {
                    tracing::debug!(plugin = %name, "loaded plugin");
                    loader.plugins.push(plugin);
                }
                Err(e) => loader.tolerate(e)?,
            }
        }
        Ok(loader)
    }

    /// Add an externally constructed plugin
    pub fn with_plugin(mut self, plugin: Box<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    /// Collect the discovery services of all loaded plugins
    pub fn inject(&self, secret_key: &SecretKey) -> Result<Vec<Box<dyn Discovery>>, PluginError> {
        let mut services = Vec::with_capacity(self.plugins.len());
        for plugin in &self.plugins {
            match plugin.discovery(secret_key) {
                Ok(service) => services.push(service),
                Err(e) => self.tolerate(e)?,
            }
        }
        Ok(services)
    }

    fn tolerate(&self, err: PluginError) -> Result<(), PluginError> {
        match self.policy {
            PluginPolicy::BestEffort => {
                tracing::warn!("ignoring plugin failure: {}", err);
                Ok(())
            }
            PluginPolicy::Strict => Err(err),
        }
    }
}
