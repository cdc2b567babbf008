//! Helper configuration: the remote URL and the `nostr.*` git-config keys.
//!
//! The remote URL has the shape `blossom://<npub1...>/<project>` (or
//! `nostr://...`, same behavior under the older scheme name). The owner key
//! is read from `nostr.nsec` or `nostr.sec`, the relay from `nostr.relay`
//! (required), the Blossom server from `nostr.blossom` (required once a
//! transfer starts), and the repository's object format from
//! `extensions.objectformat`.

use std::path::PathBuf;
use std::str::FromStr;

use url::Url;

use crate::errors::HelperError;
use crate::git::Git;
use crate::hash::HashKind;
use crate::nostr::keys::{self, Keys};

/// Parsed and validated remote URL.
#[derive(Clone, Debug)]
pub struct RemoteUrl {
    pub scheme: String,
    pub npub: String,
    pub project: String,
}

impl RemoteUrl {
    /// Parse `blossom://<npub>/<project>` or `nostr://<npub>/<project>`.
    pub fn parse(raw: &str) -> Result<RemoteUrl, HelperError> {
        let url = Url::parse(raw)
            .map_err(|e| HelperError::Config(format!("invalid remote URL `{raw}`: {e}")))?;

        let scheme = url.scheme().to_string();
        if scheme != "blossom" && scheme != "nostr" {
            return Err(HelperError::Config(
                "Git remote URL must start with \"blossom://\" or \"nostr://\"".to_string(),
            ));
        }
        if !url.username().is_empty() || url.password().is_some() {
            return Err(HelperError::Config(
                "Git remote URL must not specify username or password.".to_string(),
            ));
        }

        let npub = url
            .host_str()
            .unwrap_or_default()
            .to_string();
        if !npub.starts_with("npub1") {
            return Err(HelperError::Config(format!(
                "Invalid remote URL. Use {scheme}://<npub>/<project>"
            )));
        }

        let segments: Vec<&str> = url
            .path()
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect();
        let [project] = segments.as_slice() else {
            return Err(HelperError::Config(format!(
                "Invalid remote URL. Use {scheme}://<npub>/<project>"
            )));
        };

        Ok(RemoteUrl {
            scheme,
            npub,
            project: project.to_string(),
        })
    }
}

/// Everything a helper session needs to know, resolved once at startup.
#[derive(Clone, Debug)]
pub struct Settings {
    pub remote_name: String,
    pub url: RemoteUrl,
    /// Owner public key (hex), decoded from the URL's npub.
    pub owner_pubkey: String,
    /// Secret key, when configured. Required for pushing only.
    pub keys: Option<Keys>,
    pub relay: String,
    pub blossom: Option<String>,
    pub object_format: HashKind,
    pub git_dir: PathBuf,
}

impl Settings {
    /// Resolve settings from the environment and git config.
    pub async fn load(git: &Git, remote_name: &str, raw_url: &str) -> Result<Settings, HelperError> {
        let url = RemoteUrl::parse(raw_url)?;
        let owner_pubkey = keys::decode_npub(&url.npub)?;

        let git_dir = std::env::var_os("GIT_DIR")
            .map(PathBuf::from)
            .ok_or_else(|| {
                HelperError::Config("GIT_DIR is not set; this helper must be run by git".to_string())
            })?;

        let secret = match git.config_value("nostr.nsec").await? {
            Some(value) => Some(value),
            None => git.config_value("nostr.sec").await?,
        };
        let keys = secret.as_deref().map(Keys::parse).transpose()?;

        let relay = git.config_value("nostr.relay").await?.ok_or_else(|| {
            HelperError::Config(
                "Relay must be set via 'git config --global --add nostr.relay wss://relay.for.repos'"
                    .to_string(),
            )
        })?;
        let blossom = git.config_value("nostr.blossom").await?;

        let object_format = match git.config_value("extensions.objectformat").await? {
            Some(value) => HashKind::from_str(&value)?,
            None => HashKind::Sha1,
        };
        tracing::debug!("repository object format is {object_format}");

        Ok(Settings {
            remote_name: remote_name.to_string(),
            url,
            owner_pubkey,
            keys,
            relay,
            blossom,
            object_format,
            git_dir,
        })
    }
}
