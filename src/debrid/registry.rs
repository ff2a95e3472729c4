//! Provider registry
//!
//! Built once at startup and passed by reference to whatever needs providers.
//! Holds the constructor table for the supported vendors and the configured
//! provider instances in priority order.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use tracing::{info, warn};

use crate::config::{Config, ProviderSettings};
use crate::debrid::definitions::{AllDebridProvider, RealDebridProvider, TorBoxProvider};
use crate::debrid::{Provider, ProviderKind};
use crate::error::{DebridError, Result};

/// Information about a supported provider type
#[derive(Debug, Clone)]
pub struct ProviderTypeInfo {
    pub kind: ProviderKind,
    /// Display name
    pub name: &'static str,
    pub site_link: &'static str,
    /// Whether the provider needs an explicit file selection before caching
    pub requires_file_selection: bool,
}

/// All supported provider types
pub static AVAILABLE_PROVIDERS: Lazy<Vec<ProviderTypeInfo>> = Lazy::new(|| {
    vec![
        ProviderTypeInfo {
            kind: ProviderKind::RealDebrid,
            name: "Real-Debrid",
            site_link: "https://real-debrid.com/",
            requires_file_selection: true,
        },
        ProviderTypeInfo {
            kind: ProviderKind::AllDebrid,
            name: "AllDebrid",
            site_link: "https://alldebrid.com/",
            requires_file_selection: false,
        },
        ProviderTypeInfo {
            kind: ProviderKind::TorBox,
            name: "TorBox",
            site_link: "https://torbox.app/",
            requires_file_selection: false,
        },
    ]
});

/// Builds a provider from its settings
pub type ProviderConstructor = fn(&ProviderSettings) -> Result<Arc<dyn Provider>>;

fn build_realdebrid(settings: &ProviderSettings) -> Result<Arc<dyn Provider>> {
    Ok(Arc::new(RealDebridProvider::new(settings)?))
}

fn build_alldebrid(settings: &ProviderSettings) -> Result<Arc<dyn Provider>> {
    Ok(Arc::new(AllDebridProvider::new(settings)?))
}

fn build_torbox(settings: &ProviderSettings) -> Result<Arc<dyn Provider>> {
    Ok(Arc::new(TorBoxProvider::new(settings)?))
}

struct RegisteredProvider {
    provider: Arc<dyn Provider>,
    enabled: bool,
}

/// Configured providers, in priority order
#[derive(Default)]
pub struct ProviderRegistry {
    constructors: HashMap<ProviderKind, ProviderConstructor>,
    providers: Vec<RegisteredProvider>,
}

impl ProviderRegistry {
    /// An empty registry with no constructors
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty registry that knows how to build every supported vendor
    pub fn with_builtin_constructors() -> Self {
        let mut registry = Self::new();
        registry.register_constructor(ProviderKind::RealDebrid, build_realdebrid);
        registry.register_constructor(ProviderKind::AllDebrid, build_alldebrid);
        registry.register_constructor(ProviderKind::TorBox, build_torbox);
        registry
    }

    /// Build the registry from configuration.
    ///
    /// Unknown provider kinds are a configuration error; disabled entries
    /// are kept but never handed out.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut registry = Self::with_builtin_constructors();
        for settings in &config.providers {
            registry.add_from_settings(settings)?;
        }
        if registry.enabled().is_empty() {
            warn!("No debrid provider is enabled");
        }
        Ok(registry)
    }

    pub fn register_constructor(&mut self, kind: ProviderKind, constructor: ProviderConstructor) {
        self.constructors.insert(kind, constructor);
    }

    /// Instantiate and register a provider from settings
    pub fn add_from_settings(&mut self, settings: &ProviderSettings) -> Result<()> {
        let kind: ProviderKind = settings.kind.parse()?;
        let constructor = self.constructors.get(&kind).ok_or_else(|| {
            DebridError::Configuration(format!("no constructor registered for {kind}"))
        })?;
        let provider = constructor(settings)?;
        info!(
            provider = %settings.name,
            kind = %kind,
            enabled = settings.enabled,
            "Debrid provider registered"
        );
        self.providers.push(RegisteredProvider {
            provider,
            enabled: settings.enabled,
        });
        Ok(())
    }

    /// Register an already built, enabled provider at the lowest priority
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.push(RegisteredProvider {
            provider,
            enabled: true,
        });
    }

    /// Enabled providers in priority order
    pub fn enabled(&self) -> Vec<Arc<dyn Provider>> {
        self.providers
            .iter()
            .filter(|p| p.enabled)
            .map(|p| Arc::clone(&p.provider))
            .collect()
    }

    /// Enabled provider by instance name or vendor id, case-insensitive
    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        let name = name.trim();
        let by_kind = name.parse::<ProviderKind>().ok();
        self.providers
            .iter()
            .filter(|p| p.enabled)
            .find(|p| p.provider.name().eq_ignore_ascii_case(name))
            .or_else(|| {
                self.providers
                    .iter()
                    .filter(|p| p.enabled)
                    .find(|p| Some(p.provider.kind()) == by_kind)
            })
            .map(|p| Arc::clone(&p.provider))
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
