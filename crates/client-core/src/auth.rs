use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

// Internal Result type alias
type Result<T> = crate::ClientResult<T>;
use rpassword::prompt_password;
use russh::{
    client,
    keys::{self, HashAlg, PrivateKeyWithHashAlg},
};
use secrecy::{ExposeSecret, SecretString};
use ssh_core::{SshCoreError, SshResult};
use tk_types::CredentialOptions;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::{ClientError, hostkeys::ClientHandler};

/// Key files probed under `~/.ssh` when no key is given explicitly.
pub const DEFAULT_KEY_NAMES: [&str; 2] = ["id_rsa", "id_ed25519"];

/// Asks for the passphrase of an encrypted key.
pub type PassphrasePrompt = dyn Fn(&Path) -> std::io::Result<String> + Send + Sync;

/// One way of proving identity to the server.
pub enum Credential {
    Password(SecretString),
    PublicKey { path: PathBuf, key: Arc<keys::PrivateKey> },
}

impl Credential {
    fn label(&self) -> &'static str {
        match self {
            Credential::Password(_) => "password",
            Credential::PublicKey { .. } => "publickey",
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password(_) => f.write_str("Password(..)"),
            Credential::PublicKey { path, key } => f
                .debug_struct("PublicKey")
                .field("path", path)
                .field("algorithm", &key.algorithm().to_string())
                .finish(),
        }
    }
}

/// Username plus the ordered list of methods to try: password first, then keys.
#[derive(Debug)]
pub struct Credentials {
    username: String,
    methods: Vec<Credential>,
}

impl Credentials {
    /// Resolve credentials against the current user's home directory, prompting
    /// on the terminal for the passphrase of an encrypted explicit key.
    pub async fn load(options: &CredentialOptions) -> Result<Self> {
        let home = dirs::home_dir();
        Self::load_with(options, home.as_deref(), &prompt_passphrase).await
    }

    /// Like [`Credentials::load`] with the home directory and passphrase source supplied.
    ///
    /// An explicit key that cannot be loaded is an error. Default keys that are
    /// missing, encrypted or unreadable are skipped. An empty result is not an
    /// error here; the connector reports it as exhausted authentication.
    pub async fn load_with(options: &CredentialOptions, home: Option<&Path>, prompt: &PassphrasePrompt) -> Result<Self> {
        let mut methods = Vec::new();

        if let Some(password) = options.password.as_ref().filter(|p| !p.expose_secret().is_empty()) {
            methods.push(Credential::Password(password.clone()));
        }

        if let Some(path) = &options.key_file {
            let key = load_key_file(path, Some(prompt)).await?;
            info!(key = %path.display(), "loaded key");
            methods.push(Credential::PublicKey {
                path: path.clone(),
                key: Arc::new(key),
            });
        } else if let Some(home) = home {
            for name in DEFAULT_KEY_NAMES {
                let path = home.join(".ssh").join(name);
                if !path.exists() {
                    info!(key = %path.display(), "default key not present, skipping");
                    continue;
                }
                match load_key_file(&path, None).await {
                    Ok(key) => {
                        debug!(key = %path.display(), "loaded default key");
                        methods.push(Credential::PublicKey {
                            path,
                            key: Arc::new(key),
                        });
                    }
                    Err(err) => info!(key = %path.display(), error = %err, "could not load key"),
                }
            }
        } else {
            warn!("home directory unknown; not probing default keys");
        }

        if methods.is_empty() {
            warn!(username = %options.username, "no authentication method could be found");
        }
        Ok(Self {
            username: options.username.clone(),
            methods,
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn methods(&self) -> &[Credential] {
        &self.methods
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

async fn load_key_file(path: &Path, prompt: Option<&PassphrasePrompt>) -> Result<keys::PrivateKey> {
    let data = fs::read_to_string(path)
        .await
        .map_err(|err| ClientError::key_load(path, err))?;
    decode_key(&data, path, prompt)
}

/// Decode an OpenSSH or PEM private key. Without a prompt an encrypted key is an error.
fn decode_key(data: &str, path: &Path, prompt: Option<&PassphrasePrompt>) -> Result<keys::PrivateKey> {
    match keys::decode_secret_key(data, None) {
        Ok(key) => Ok(key),
        Err(keys::Error::KeyIsEncrypted) => {
            let Some(prompt) = prompt else {
                return Err(ClientError::key_load(path, "key is passphrase protected"));
            };
            let passphrase = prompt(path)?;
            keys::decode_secret_key(data, Some(&passphrase))
                .map_err(|err| ClientError::key_load(path, format!("failed to decrypt: {err}")))
        }
        Err(err) => Err(ClientError::key_load(path, err)),
    }
}

fn prompt_passphrase(path: &Path) -> std::io::Result<String> {
    prompt_password(format!("Enter passphrase for {}: ", path.display()))
}

/// Try every configured method in order until the server accepts one.
pub(crate) async fn authenticate(
    session: &mut client::Handle<ClientHandler>,
    credentials: &Credentials,
    address: &str,
) -> SshResult<()> {
    let username = credentials.username();
    let rsa_hash_hint: Option<HashAlg> = session.best_supported_rsa_hash().await.unwrap_or(None).flatten();

    for method in credentials.methods() {
        let label = method.label();
        let result = match method {
            Credential::Password(password) => {
                session
                    .authenticate_password(username, password.expose_secret())
                    .await
            }
            Credential::PublicKey { path, key } => {
                debug!(key = %path.display(), algorithm = %key.algorithm(), "attempting public-key auth");
                let hash_alg = if key.algorithm().is_rsa() { rsa_hash_hint } else { None };
                session
                    .authenticate_publickey(username, PrivateKeyWithHashAlg::new(Arc::clone(key), hash_alg))
                    .await
            }
        };
        match result {
            Ok(result) if result.success() => {
                info!(method = label, %username, %address, "authentication succeeded");
                return Ok(());
            }
            Ok(_) => warn!(method = label, "authentication rejected by server"),
            Err(err) => warn!(method = label, error = %err, "authentication attempt failed"),
        }
    }

    Err(SshCoreError::AuthExhausted {
        username: username.to_string(),
        address: address.to_string(),
    })
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
