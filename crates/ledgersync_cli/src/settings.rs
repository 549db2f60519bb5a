//! Endpoint flags and the local state directory.

use clap::Args;
use ledgersync_engine::{EndpointConfig, ReqwestDavClient, SyncConfig, SyncOrchestrator};
use ledgersync_storage::{FileStore, StateStore, StateStoreExt};
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

const DEVICE_KEY: &str = "device.json";

/// WebDAV endpoint settings.
#[derive(Args, Debug)]
pub struct EndpointArgs {
    /// Server scheme (http or https)
    #[arg(global = true, long, env = "LEDGERSYNC_SCHEME", default_value = "https")]
    scheme: String,

    /// Server host name
    #[arg(global = true, long, env = "LEDGERSYNC_HOST", default_value = "")]
    host: String,

    /// Server port
    #[arg(global = true, long, env = "LEDGERSYNC_PORT", default_value = "")]
    port: String,

    /// Sync root directory on the server
    #[arg(
        global = true,
        long = "remote-path",
        env = "LEDGERSYNC_PATH",
        default_value = "/ledgersync"
    )]
    path: String,

    /// WebDAV user name
    #[arg(global = true, long, env = "LEDGERSYNC_USERNAME", default_value = "")]
    username: String,

    /// WebDAV password
    #[arg(
        global = true,
        long,
        env = "LEDGERSYNC_PASSWORD",
        hide_env_values = true,
        default_value = ""
    )]
    password: String,

    /// Passphrase for the remote encryption key
    #[arg(
        global = true,
        long,
        env = "LEDGERSYNC_KEY",
        hide_env_values = true,
        default_value = ""
    )]
    key: String,
}

impl EndpointArgs {
    /// Builds the endpoint configuration.
    pub fn to_config(&self) -> EndpointConfig {
        EndpointConfig::new(self.host.clone())
            .with_scheme(self.scheme.clone())
            .with_port(self.port.clone())
            .with_path(self.path.clone())
            .with_credentials(self.username.clone(), self.password.clone())
            .with_encryption_key(self.key.clone())
    }
}

/// The local state directory of one device.
pub struct Workspace {
    store: Arc<dyn StateStore>,
    device_id: String,
    endpoint: EndpointConfig,
}

impl Workspace {
    /// Opens the state directory, creating it and a device id on first use.
    pub fn open(dir: &Path, endpoint: EndpointConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let store: Arc<dyn StateStore> = Arc::new(FileStore::open(dir)?);
        let device_id = match store.load_json::<String>(DEVICE_KEY)? {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().to_string();
                store.save_json(DEVICE_KEY, &id)?;
                info!(device_id = %id, "created device id");
                id
            }
        };
        Ok(Self {
            store,
            device_id,
            endpoint,
        })
    }

    /// This device's id.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Opens the replica and an orchestrator talking to the real server.
    pub fn orchestrator(
        &self,
    ) -> Result<SyncOrchestrator<ReqwestDavClient>, Box<dyn std::error::Error>> {
        let config = SyncConfig::new(self.device_id.clone());
        let client = Arc::new(ReqwestDavClient::new(&config)?);
        Ok(SyncOrchestrator::open(
            config,
            client,
            Arc::clone(&self.store),
            self.endpoint.clone(),
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_id_is_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = EndpointConfig::new("dav.test");

        let first = Workspace::open(dir.path(), endpoint.clone()).unwrap();
        let second = Workspace::open(dir.path(), endpoint).unwrap();
        assert_eq!(first.device_id(), second.device_id());
        assert!(Uuid::parse_str(first.device_id()).is_ok());
    }
}
