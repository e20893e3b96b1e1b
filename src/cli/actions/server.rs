use crate::api::{self, handlers::auth::AuthConfig};
use anyhow::Result;
use secrecy::SecretString;
use tracing::info;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: SecretString,
    pub auth_config: AuthConfig,
}

/// Run the HTTP server until shutdown.
/// # Errors
/// Returns an error if the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    info!(
        port = args.port,
        base_url = args.auth_config.base_url(),
        session_ttl_seconds = args.auth_config.session_ttl_seconds(),
        "starting snippetbox"
    );

    api::new(args.port, args.dsn, args.auth_config).await
}
