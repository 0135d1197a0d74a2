pub mod artifacts;
pub mod checks;
pub mod handler;
pub mod webhook;

use std::{
    collections::{hash_map::Entry, HashMap},
    sync::Arc,
};

use anyhow::{Context, Result};
use ci_reporter_core::config::GitHubConfig;
use octocrab::{models::InstallationId, Octocrab};
use tokio::sync::Mutex;

/// GitHub API access: a personal-token client, plus per-installation clients
/// when a GitHub App is configured.
#[derive(Clone)]
pub struct GitHub {
    pub client: Octocrab,
    app: Option<Arc<Mutex<AppClients>>>,
}

struct AppClients {
    app_client: Octocrab,
    clients: HashMap<InstallationId, Octocrab>,
}

impl GitHub {
    pub async fn new(config: &GitHubConfig) -> Result<Arc<Self>> {
        let client = Octocrab::builder()
            .personal_token(config.token.clone())
            .build()
            .context("Failed to create GitHub client")?;
        octocrab::initialise(client.clone());
        let profile = client.current().user().await.context("Failed to fetch current user")?;
        tracing::info!("Logged in as {}", profile.login);

        let app = if let Some(app_config) = &config.app {
            let app_client = Octocrab::builder()
                .app(
                    app_config.id.into(),
                    jsonwebtoken::EncodingKey::from_rsa_pem(app_config.private_key.as_bytes())?,
                )
                .build()
                .context("Failed to create GitHub App client")?;
            tracing::info!("GitHub App {} configured", app_config.id);
            Some(Arc::new(Mutex::new(AppClients { app_client, clients: HashMap::new() })))
        } else {
            None
        };
        Ok(Arc::new(Self { client, app }))
    }

    /// Client authenticated for the event's installation. Installation
    /// clients are cached; without an App configuration the token client is
    /// used for everything.
    pub async fn client_for(&self, installation_id: Option<InstallationId>) -> Result<Octocrab> {
        if let (Some(app), Some(installation_id)) = (&self.app, installation_id) {
            let mut guard = app.lock().await;
            let app = &mut *guard;
            return match app.clients.entry(installation_id) {
                Entry::Occupied(entry) => Ok(entry.get().clone()),
                Entry::Vacant(entry) => {
                    let client = app
                        .app_client
                        .installation(installation_id)
                        .context("Failed to create installation client")?;
                    Ok(entry.insert(client).clone())
                }
            };
        }
        Ok(self.client.clone())
    }

    /// Drop the cached client for a removed installation.
    pub async fn forget_installation(&self, installation_id: InstallationId) {
        if let Some(app) = &self.app {
            app.lock().await.clients.remove(&installation_id);
        }
    }
}
