mod auth;
pub mod error;
mod hostkeys;
mod session;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use auth::authenticate;
pub use auth::{Credential, Credentials, DEFAULT_KEY_NAMES, PassphrasePrompt};
pub use error::{ClientError, ClientResult};
pub use hostkeys::ClientHandler;
use russh::{Disconnect, client};
pub use session::SshSession;
use ssh_core::{SessionConnector, SshCoreError, SshResult, within};
use tk_types::Endpoint;
use tracing::info;

/// Interval between SSH-level keepalives on an otherwise idle session.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Dials the SSH server and authenticates, once per shared session.
pub struct SshConnector {
    config: Arc<client::Config>,
    address: Endpoint,
    credentials: Arc<Credentials>,
    dial_timeout: Duration,
}

impl SshConnector {
    pub fn new(address: Endpoint, credentials: Credentials, dial_timeout: Duration) -> Self {
        Self {
            config: Arc::new(build_client_config()),
            address,
            credentials: Arc::new(credentials),
            dial_timeout,
        }
    }
}

#[async_trait]
impl SessionConnector for SshConnector {
    type Session = SshSession;

    fn endpoint(&self) -> String {
        self.address.to_string()
    }

    async fn connect(&self) -> SshResult<SshSession> {
        let address = self.endpoint();
        if self.credentials.is_empty() {
            return Err(SshCoreError::AuthExhausted {
                username: self.credentials.username().to_string(),
                address,
            });
        }

        info!("connecting to {address}");
        let handler = ClientHandler::new(address.clone());
        let connecting = client::connect(Arc::clone(&self.config), self.address.as_pair(), handler);
        let mut handle = within(self.dial_timeout, connecting)
            .await
            .ok_or_else(|| SshCoreError::ConnectTimeout {
                address: address.clone(),
                timeout: self.dial_timeout,
            })?
            .map_err(|err| err.into_core(&address))?;

        if let Err(err) = authenticate(&mut handle, &self.credentials, &address).await {
            let _ = handle.disconnect(Disconnect::ByApplication, "", "").await;
            return Err(err);
        }
        Ok(SshSession::new(handle, address))
    }
}

fn build_client_config() -> client::Config {
    client::Config {
        nodelay: true,
        inactivity_timeout: None,
        keepalive_interval: Some(KEEPALIVE_INTERVAL),
        keepalive_max: 3,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;
    use tk_types::CredentialOptions;
    use tokio::net::TcpListener;

    use super::*;

    #[test]
    fn client_config_keeps_idle_sessions_alive() {
        let config = build_client_config();
        assert!(config.nodelay);
        assert_eq!(config.inactivity_timeout, None);
        assert_eq!(config.keepalive_interval, Some(KEEPALIVE_INTERVAL));
    }

    async fn password_only() -> Credentials {
        let options = CredentialOptions {
            username: "ops".into(),
            password: Some(SecretString::new("s3cret".into())),
            key_file: None,
        };
        let no_prompt = |_: &std::path::Path| -> std::io::Result<String> { Ok(String::new()) };
        Credentials::load_with(&options, None, &no_prompt).await.unwrap()
    }

    #[tokio::test]
    async fn no_credentials_is_auth_exhausted_without_dialing() {
        let options = CredentialOptions {
            username: "ops".into(),
            password: None,
            key_file: None,
        };
        let no_prompt = |_: &std::path::Path| -> std::io::Result<String> { Ok(String::new()) };
        let credentials = Credentials::load_with(&options, None, &no_prompt).await.unwrap();

        // Port 9 (discard) is never dialed: the check happens first.
        let connector = SshConnector::new(Endpoint::new("192.0.2.1", 9), credentials, Duration::from_secs(5));
        let err = connector.connect().await.err().expect("nothing to authenticate with");
        assert!(err.is_auth_exhausted());
        assert!(err.to_string().contains("ops@192.0.2.1:9"));
    }

    #[tokio::test]
    async fn silent_server_hits_the_dial_timeout() {
        // Accepts the TCP connection but never speaks SSH.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let connector = SshConnector::new(Endpoint::new("127.0.0.1", port), password_only().await, Duration::from_millis(200));
        let err = connector.connect().await.err().expect("handshake cannot complete");
        assert!(matches!(err, SshCoreError::ConnectTimeout { .. }), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn refused_connection_is_reported_with_the_address() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let connector = SshConnector::new(Endpoint::new("127.0.0.1", port), password_only().await, Duration::from_secs(5));
        assert_eq!(connector.endpoint(), format!("127.0.0.1:{port}"));
        let err = connector.connect().await.err().expect("nothing listens there");
        assert!(!err.is_auth_exhausted());
        assert!(!err.is_process_fatal());
    }

    #[tokio::test]
    async fn zero_dial_timeout_means_wait_for_the_outcome() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let connector = SshConnector::new(Endpoint::new("127.0.0.1", port), password_only().await, Duration::ZERO);
        let err = connector.connect().await.err().expect("nothing listens there");
        assert!(!matches!(err, SshCoreError::ConnectTimeout { .. }), "zero must not time out: {err}");
    }
}
