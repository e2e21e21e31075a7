use clap::Args;

use crate::drive::{DriveClient, DriveError};
use crate::token_manager::{TokenManager, TokenSource, GOOGLE_TOKEN_URL};

/// Configuration for a Google Drive destination.
#[derive(Args, Debug, Clone)]
pub struct DriveConfig {
    /// Folder under My Drive that holds one subfolder per module
    #[arg(long, default_value = "rsync-os", env = "DRIVE_BASE")]
    pub drive_base: String,

    /// Pre-issued OAuth access token (skips the refresh flow)
    #[arg(long, env = "DRIVE_ACCESS_TOKEN")]
    pub drive_access_token: Option<String>,

    /// Google OAuth2 Client ID (for token refresh)
    #[arg(long, env = "GOOGLE_CLIENT_ID")]
    pub google_client_id: Option<String>,

    /// Google OAuth2 Client Secret (for token refresh)
    #[arg(long, env = "GOOGLE_CLIENT_SECRET")]
    pub google_client_secret: Option<String>,

    /// Long-lived OAuth2 refresh token
    #[arg(long, env = "GOOGLE_REFRESH_TOKEN")]
    pub google_refresh_token: Option<String>,

    /// Drive API root
    #[arg(long, default_value = "https://www.googleapis.com", env = "DRIVE_API_URL")]
    pub drive_api_url: String,

    /// OAuth2 token endpoint
    #[arg(long, default_value = GOOGLE_TOKEN_URL, env = "GOOGLE_TOKEN_URL")]
    pub google_token_url: String,
}

impl DriveConfig {
    pub fn token_source(&self) -> Result<TokenSource, DriveError> {
        if let Some(token) = &self.drive_access_token {
            return Ok(TokenSource::Static(token.clone()));
        }
        match (
            &self.google_client_id,
            &self.google_client_secret,
            &self.google_refresh_token,
        ) {
            (Some(client_id), Some(client_secret), Some(refresh_token)) => {
                Ok(TokenSource::Refresh {
                    client_id: client_id.clone(),
                    client_secret: client_secret.clone(),
                    refresh_token: refresh_token.clone(),
                })
            }
            _ => Err(DriveError::Config(
                "either --drive-access-token or all of --google-client-id, \
                 --google-client-secret and --google-refresh-token are required"
                    .to_string(),
            )),
        }
    }

    pub fn client(&self) -> Result<DriveClient, DriveError> {
        let tokens = TokenManager::with_token_url(self.token_source()?, &self.google_token_url);
        Ok(DriveClient::with_base_url(&self.drive_api_url, tokens))
    }
}
