//! Provisioning metadata (config drive) for the transition into `active`.
//!
//! User data may be given inline or as a URL; a URL is resolved through a
//! [`UserDataFetcher`] so the payload sent to the remote always carries
//! inline content.
//!
//! From microversion 1.56 the config drive is sent as a JSON object.
//! Older microversions take a base64-encoded, gzipped ISO 9660 image
//! labelled `config-2`.

use std::fmt;
use std::io::Write;
use std::str::FromStr;

use base64::Engine;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::clients::UserDataFetcher;
use crate::error::{Error, Result};
use crate::iso9660::{self, IsoFile};

const CONFIG_DRIVE_LABEL: &str = "config-2";
const META_DATA_PATH: &str = "openstack/latest/meta_data.json";
const NETWORK_DATA_PATH: &str = "openstack/latest/network_data.json";
const USER_DATA_PATH: &str = "openstack/latest/user_data";

/// Negotiated API microversion, e.g. `1.56`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Microversion {
    pub major: u32,
    pub minor: u32,
}

impl Microversion {
    /// First microversion that accepts the config drive as a JSON object.
    pub const CONFIG_DRIVE_OBJECT: Microversion = Microversion::new(1, 56);

    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl FromStr for Microversion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::Validation(format!("invalid microversion '{}'", s));
        let (major, minor) = s.trim().split_once('.').ok_or_else(invalid)?;
        Ok(Self {
            major: major.parse().map_err(|_| invalid())?,
            minor: minor.parse().map_err(|_| invalid())?,
        })
    }
}

impl fmt::Display for Microversion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Where user data comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum UserDataSource {
    Inline(String),
    /// Fetched at build time. `ca_cert` is a base64-encoded PEM bundle to
    /// trust in addition to the system roots.
    Url {
        url: String,
        ca_cert: Option<String>,
    },
}

/// Deploy-time payload. Built once per transition attempt and not
/// modified afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProvisioningMetadata {
    user_data: Option<String>,
    network_data: Map<String, Value>,
    meta_data: Map<String, Value>,
}

impl ProvisioningMetadata {
    pub fn new(
        user_data: Option<String>,
        network_data: Map<String, Value>,
        meta_data: Map<String, Value>,
    ) -> Self {
        Self {
            user_data,
            network_data,
            meta_data,
        }
    }

    pub fn user_data(&self) -> Option<&str> {
        self.user_data.as_deref()
    }

    pub fn network_data(&self) -> &Map<String, Value> {
        &self.network_data
    }

    pub fn meta_data(&self) -> &Map<String, Value> {
        &self.meta_data
    }

    /// Render the config drive payload accepted by `microversion`.
    pub fn config_drive(&self, microversion: Microversion) -> Result<ConfigDrive> {
        let contents = ConfigDriveContents {
            user_data: self.user_data.clone(),
            meta_data: self.meta_data.clone(),
            network_data: self.network_data.clone(),
        };
        if microversion >= Microversion::CONFIG_DRIVE_OBJECT {
            return Ok(ConfigDrive::Object(contents));
        }

        debug!(microversion = %microversion, "Packing config drive as ISO image");
        contents.pack().map(ConfigDrive::Encoded)
    }
}

/// Config drive as sent in the `configdrive` field of a provision request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigDrive {
    /// Base64 of a gzipped ISO 9660 image.
    Encoded(String),
    Object(ConfigDriveContents),
}

impl ConfigDrive {
    pub fn contents(&self) -> Option<&ConfigDriveContents> {
        match self {
            ConfigDrive::Object(contents) => Some(contents),
            ConfigDrive::Encoded(_) => None,
        }
    }

    pub fn encoded(&self) -> Option<&str> {
        match self {
            ConfigDrive::Encoded(image) => Some(image),
            ConfigDrive::Object(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigDriveContents {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub meta_data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub network_data: Map<String, Value>,
}

impl ConfigDriveContents {
    /// Lay the contents out under `openstack/latest/`, then gzip and
    /// base64-encode the image. `meta_data.json` is always written; the
    /// other files only when set.
    pub fn pack(&self) -> Result<String> {
        let meta_data = to_json(&self.meta_data)?;
        let network_data = to_json(&self.network_data)?;

        let mut files = vec![IsoFile {
            path: META_DATA_PATH,
            data: &meta_data,
        }];
        if !self.network_data.is_empty() {
            files.push(IsoFile {
                path: NETWORK_DATA_PATH,
                data: &network_data,
            });
        }
        if let Some(user_data) = &self.user_data {
            files.push(IsoFile {
                path: USER_DATA_PATH,
                data: user_data.as_bytes(),
            });
        }
        let image = iso9660::build_iso(CONFIG_DRIVE_LABEL, &files)?;

        let compress_failed =
            |e: std::io::Error| Error::Validation(format!("failed to compress config drive: {}", e));
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&image).map_err(compress_failed)?;
        let gzipped = encoder.finish().map_err(compress_failed)?;
        Ok(base64::engine::general_purpose::STANDARD.encode(gzipped))
    }
}

fn to_json(map: &Map<String, Value>) -> Result<Vec<u8>> {
    serde_json::to_vec(map)
        .map_err(|e| Error::Validation(format!("config drive data is not serializable: {}", e)))
}

/// Resolve user data and assemble the metadata for a deploy.
pub async fn build_provisioning_metadata(
    fetcher: &dyn UserDataFetcher,
    user_data: Option<UserDataSource>,
    network_data: Map<String, Value>,
    meta_data: Map<String, Value>,
) -> Result<ProvisioningMetadata> {
    let user_data = match user_data {
        None => None,
        Some(UserDataSource::Inline(content)) => Some(content),
        Some(UserDataSource::Url { url, ca_cert }) => {
            if url.is_empty() {
                return Err(Error::Validation("user data url is empty".to_string()));
            }
            debug!(url = %url, custom_ca = ca_cert.is_some(), "Fetching user data");
            Some(fetcher.fetch(&url, ca_cert.as_deref()).await?)
        }
    };

    Ok(ProvisioningMetadata::new(user_data, network_data, meta_data))
}
