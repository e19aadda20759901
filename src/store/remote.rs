//! Remote file store holding the processed images

use crate::{
    config::{SftpAuth, SftpConfig},
    error::{PipelineError, Result},
};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use std::{
    io::Write,
    net::TcpStream,
    path::Path,
    sync::{Arc, Mutex},
};
use tracing::{debug, info, instrument};

/// Directory listing and upload on the remote store
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// File names (without directory) inside `dir`
    async fn list_dir(&self, dir: &str) -> Result<Vec<String>>;

    /// Write `bytes` to `path`, replacing any existing file
    async fn upload(&self, bytes: Vec<u8>, path: &str) -> Result<()>;

    /// Close the connection. Calling it twice is a no-op.
    async fn disconnect(&self) -> Result<()>;
}

struct SftpConnection {
    session: ssh2::Session,
    sftp: ssh2::Sftp,
}

/// `RemoteStore` over SFTP.
///
/// libssh2 is blocking, so every call runs on tokio's blocking pool and
/// holds the connection lock for its whole duration.
pub struct SftpStore {
    connection: Arc<Mutex<Option<SftpConnection>>>,
    host: String,
    username: String,
}

impl SftpStore {
    /// Connect and authenticate, with the private key when one is
    /// configured and the password otherwise
    ///
    /// # Errors
    /// - TCP, handshake or authentication failures
    #[instrument(skip(config), fields(host = %config.host, port = config.port, user = %config.username))]
    pub async fn connect(config: &SftpConfig) -> Result<Self> {
        let config = config.clone();
        let host = config.host.clone();
        let username = config.username.clone();

        let connection = tokio::task::spawn_blocking(move || open_connection(&config))
            .await
            .map_err(|e| PipelineError::internal(format!("SFTP connect task failed: {}", e)))??;

        info!(host = %host, user = %username, "🔌 Connected to remote store");
        Ok(Self {
            connection: Arc::new(Mutex::new(Some(connection))),
            host,
            username,
        })
    }

    async fn with_connection<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SftpConnection) -> Result<T> + Send + 'static,
    {
        let connection = Arc::clone(&self.connection);
        tokio::task::spawn_blocking(move || {
            let mut guard = connection
                .lock()
                .map_err(|_| PipelineError::internal("SFTP connection lock poisoned"))?;
            let conn = guard
                .as_mut()
                .ok_or_else(|| PipelineError::transport("SFTP connection is closed"))?;
            op(conn)
        })
        .await
        .map_err(|e| PipelineError::internal(format!("SFTP task failed: {}", e)))?
    }
}

fn open_connection(config: &SftpConfig) -> Result<SftpConnection> {
    let tcp = TcpStream::connect((config.host.as_str(), config.port)).map_err(|e| {
        PipelineError::transport(format!(
            "Failed to reach {}:{}: {}",
            config.host, config.port, e
        ))
    })?;

    let mut session = ssh2::Session::new()?;
    session.set_tcp_stream(tcp);
    session.handshake()?;

    match &config.auth {
        SftpAuth::PrivateKey(key) => {
            session.userauth_pubkey_file(&config.username, None, key, None)?;
        },
        SftpAuth::Password(password) => {
            session.userauth_password(&config.username, password.expose_secret())?;
        },
    }
    if !session.authenticated() {
        return Err(PipelineError::transport(format!(
            "Authentication as '{}' was rejected",
            config.username
        )));
    }

    let sftp = session.sftp()?;
    Ok(SftpConnection { session, sftp })
}

#[async_trait]
impl RemoteStore for SftpStore {
    #[instrument(skip(self))]
    async fn list_dir(&self, dir: &str) -> Result<Vec<String>> {
        let dir = dir.to_string();
        let names = self
            .with_connection(move |conn| {
                let entries = conn.sftp.readdir(Path::new(&dir))?;
                Ok(entries
                    .into_iter()
                    .filter(|(_, stat)| !stat.is_dir())
                    .filter_map(|(path, _)| {
                        path.file_name()
                            .map(|name| name.to_string_lossy().into_owned())
                    })
                    .collect::<Vec<_>>())
            })
            .await?;

        debug!(entries = names.len(), "Remote directory listed");
        Ok(names)
    }

    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    async fn upload(&self, bytes: Vec<u8>, path: &str) -> Result<()> {
        let path = path.to_string();
        self.with_connection(move |conn| {
            let mut file = conn.sftp.create(Path::new(&path))?;
            file.write_all(&bytes)
                .map_err(|e| PipelineError::transport(format!("Failed to write '{}': {}", path, e)))?;
            Ok(())
        })
        .await
    }

    async fn disconnect(&self) -> Result<()> {
        let connection = Arc::clone(&self.connection);
        let closed = tokio::task::spawn_blocking(move || -> Result<bool> {
            let mut guard = connection
                .lock()
                .map_err(|_| PipelineError::internal("SFTP connection lock poisoned"))?;
            match guard.take() {
                Some(SftpConnection { session, sftp }) => {
                    drop(sftp);
                    session.disconnect(None, "batch finished", None)?;
                    Ok(true)
                },
                None => Ok(false),
            }
        })
        .await
        .map_err(|e| PipelineError::internal(format!("SFTP disconnect task failed: {}", e)))??;

        if closed {
            info!(host = %self.host, user = %self.username, "Disconnected from remote store");
        }
        Ok(())
    }
}
