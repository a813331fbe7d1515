use russh::keys::{HashAlg, PublicKey};
use tracing::debug;

/// russh callbacks for the tunnel client.
///
/// Server host keys are accepted without verification; the fingerprint is
/// only logged so an operator can compare it by hand.
pub struct ClientHandler {
    authority: String,
}

impl ClientHandler {
    pub fn new(authority: impl Into<String>) -> Self {
        Self {
            authority: authority.into(),
        }
    }
}

impl russh::client::Handler for ClientHandler {
    type Error = crate::ClientError;

    fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> impl std::future::Future<Output = std::result::Result<bool, Self::Error>> + Send {
        let fingerprint = server_public_key.fingerprint(HashAlg::Sha256).to_string();
        let algorithm = server_public_key.algorithm().to_string();
        debug!(
            authority = %self.authority,
            %algorithm,
            %fingerprint,
            "accepting server host key"
        );
        async move { Ok(true) }
    }
}
