//! Version registration for the interception policy
//!
//! Keeps track of which cache version is installed and which one controls
//! clients, the way a browser tracks service worker registrations. The state
//! is persisted as `registration.json` in the storage root.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::policy::{InstallError, InterceptionPolicy, LifecycleSignal};

/// File name of the registration state inside the storage root
pub const REGISTRATION_FILE: &str = "registration.json";

/// Errors that can occur while installing or activating a version
#[derive(Debug, Error)]
pub enum RegistrationError {
    /// The install event failed; the registration is left unchanged
    #[error("Install failed: {0}")]
    Install(#[from] InstallError),

    /// The registration state could not be saved
    #[error("Could not save registration: {0}")]
    Save(#[from] std::io::Error),

    /// The registration state could not be encoded
    #[error("Could not encode registration: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One installed version of the policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    /// Cache name the version owns
    pub cache_name: String,
    /// When the install event completed
    pub installed_at: DateTime<Utc>,
    /// When the version became active, if it has
    pub activated_at: Option<DateTime<Utc>>,
    /// Whether the version took control of open clients on activation
    pub clients_claimed: bool,
}

/// Persisted registration state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrationState {
    /// The version currently controlling clients
    pub active: Option<VersionRecord>,
    /// An installed version waiting for the active one to go away
    pub waiting: Option<VersionRecord>,
}

/// Drives lifecycle events and records their outcome
#[derive(Debug)]
pub struct Registration {
    path: PathBuf,
    state: RegistrationState,
}

impl Registration {
    /// Loads the registration stored in `root`
    ///
    /// A missing or unreadable file yields an empty registration.
    pub fn load(root: &Path) -> Self {
        let path = root.join(REGISTRATION_FILE);
        let state = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable registration");
                RegistrationState::default()
            }),
            Err(_) => RegistrationState::default(),
        };
        Self { path, state }
    }

    /// Returns the current state
    pub fn state(&self) -> &RegistrationState {
        &self.state
    }

    /// Installs the policy's version
    ///
    /// When the install event asks to skip waiting the version is activated
    /// right away; otherwise it is recorded as waiting.
    pub async fn install(&mut self, policy: &InterceptionPolicy) -> Result<LifecycleSignal, RegistrationError> {
        let signal = policy.on_install().await?;

        self.state.waiting = Some(VersionRecord {
            cache_name: policy.config().cache_name.clone(),
            installed_at: Utc::now(),
            activated_at: None,
            clients_claimed: false,
        });
        self.save()?;

        if signal == LifecycleSignal::SkipWaiting {
            self.activate(policy).await?;
        }
        Ok(signal)
    }

    /// Activates the policy's version and promotes it to active
    pub async fn activate(&mut self, policy: &InterceptionPolicy) -> Result<LifecycleSignal, RegistrationError> {
        let signal = policy.on_activate().await;
        let cache_name = &policy.config().cache_name;

        let mut record = match self.state.waiting.take() {
            Some(record) if &record.cache_name == cache_name => record,
            _ => VersionRecord {
                cache_name: cache_name.clone(),
                installed_at: Utc::now(),
                activated_at: None,
                clients_claimed: false,
            },
        };
        record.activated_at = Some(Utc::now());
        record.clients_claimed = signal == LifecycleSignal::ClaimClients;
        self.state.active = Some(record);
        self.save()?;

        info!(cache = %cache_name, "Activated");
        Ok(signal)
    }

    /// Writes the state to disk
    fn save(&self) -> Result<(), RegistrationError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.state)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}
