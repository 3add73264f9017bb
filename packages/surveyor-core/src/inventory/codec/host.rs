//! Per-host variables as automation tooling reads them.
//!
//! PAN-OS hosts are driven through `connection: local` modules, which read
//! `panos_username`/`panos_password` and a `panos_provider` block instead of
//! `ansible_user`/`ansible_password`.

use crate::classify::{ConnectionProfile, CredentialRefs, SecretRef, Transport};
use crate::inventory::DeviceRecord;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

const PANOS_OS_TAG: &str = "panos";
const UNKNOWN_OS_TAG: &str = "unknown";
const PANOS_PROVIDER: &str = "panos_provider";
const SESSION_KEY: &str = "ansible_httpapi_session_key";

/// Keys owned by [`HostVars`]; anything else travels in `extra`
const KNOWN_FIELDS: &[&str] = &[
    "ansible_host",
    "ansible_network_os",
    "ansible_connection",
    "ansible_httpapi_use_ssl",
    "ansible_httpapi_port",
    "ansible_user",
    "ansible_password",
    "panos_username",
    "panos_password",
    SESSION_KEY,
    "device_role",
    "site",
    PANOS_PROVIDER,
];

fn is_false(value: &bool) -> bool {
    !*value
}

/// Provider block pointing back at the host's own variables
fn templated_panos_provider() -> serde_json::Value {
    serde_json::json!({
        "ip_address": "{{ ansible_host }}",
        "username": "{{ panos_username }}",
        "password": "{{ panos_password }}",
    })
}

/// Wire form of a [`DeviceRecord`]. The hostname is the mapping key and the
/// group is implied by where the entry sits, so neither is repeated here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(super) struct HostVars {
    ansible_host: IpAddr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ansible_network_os: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ansible_connection: Option<Transport>,
    #[serde(default, skip_serializing_if = "is_false")]
    ansible_httpapi_use_ssl: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ansible_httpapi_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ansible_user: Option<SecretRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ansible_password: Option<SecretRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    panos_username: Option<SecretRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    panos_password: Option<SecretRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ansible_httpapi_session_key: Option<SecretRef>,
    device_role: String,
    site: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    panos_provider: Option<serde_json::Value>,
    #[serde(flatten)]
    extra: IndexMap<String, serde_json::Value>,
}

impl From<&DeviceRecord> for HostVars {
    fn from(record: &DeviceRecord) -> Self {
        let profile = record.profile();
        let credentials = profile.credentials.as_ref();
        let panos = profile.os_tag == PANOS_OS_TAG;

        let username = credentials.map(|c| c.username.clone());
        let password = credentials.map(|c| c.password.clone());
        let (ansible_user, ansible_password, panos_username, panos_password) = if panos {
            (None, None, username, password)
        } else {
            (username, password, None, None)
        };

        // Token-only hosts carry their session key outside the credentials
        let session_key = credentials.and_then(|c| c.api_token.clone()).or_else(|| {
            record
                .extra_vars()
                .get(SESSION_KEY)
                .and_then(|value| value.as_str())
                .and_then(|raw| raw.parse().ok())
        });
        let panos_provider = record
            .extra_vars()
            .get(PANOS_PROVIDER)
            .cloned()
            .or_else(|| panos.then(templated_panos_provider));
        let extra = record
            .extra_vars()
            .iter()
            .filter(|(key, _)| !KNOWN_FIELDS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Self {
            ansible_host: record.address(),
            ansible_network_os: Some(profile.os_tag.clone()),
            ansible_connection: match profile.transport {
                Transport::None => None,
                transport => Some(transport),
            },
            ansible_httpapi_use_ssl: profile.uses_tls,
            ansible_httpapi_port: profile.api_port,
            ansible_user,
            ansible_password,
            panos_username,
            panos_password,
            ansible_httpapi_session_key: session_key,
            device_role: record.device_role().to_string(),
            site: record.site().to_string(),
            panos_provider,
            extra,
        }
    }
}

impl HostVars {
    /// Rebuild the record owned by leaf group `group` under key `hostname`
    pub(super) fn into_record(self, hostname: &str, group: &str) -> Result<DeviceRecord, String> {
        let ansible_pair = self.ansible_user.is_some() || self.ansible_password.is_some();
        let panos_pair = self.panos_username.is_some() || self.panos_password.is_some();

        let (username, password, names) = match (ansible_pair, panos_pair) {
            (true, true) => {
                return Err(format!(
                    "host '{}' sets both ansible_user/ansible_password and panos_username/panos_password",
                    hostname
                ));
            }
            (false, true) => (
                self.panos_username,
                self.panos_password,
                "panos_username and panos_password",
            ),
            _ => (
                self.ansible_user,
                self.ansible_password,
                "ansible_user and ansible_password",
            ),
        };

        let mut extra = self.extra;
        let credentials = match (username, password) {
            (Some(username), Some(password)) => Some(CredentialRefs {
                username,
                password,
                api_token: self.ansible_httpapi_session_key,
            }),
            (None, None) => {
                if let Some(token) = self.ansible_httpapi_session_key {
                    extra.insert(SESSION_KEY.to_string(), token.to_string().into());
                }
                None
            }
            _ => {
                return Err(format!("host '{}' must set both {}", hostname, names));
            }
        };

        let os_tag = self.ansible_network_os.unwrap_or_else(|| {
            if panos_pair {
                PANOS_OS_TAG.to_string()
            } else {
                UNKNOWN_OS_TAG.to_string()
            }
        });

        // The templated provider is derived again on render
        if let Some(provider) = self.panos_provider {
            if os_tag != PANOS_OS_TAG || provider != templated_panos_provider() {
                extra.insert(PANOS_PROVIDER.to_string(), provider);
            }
        }

        let profile = ConnectionProfile {
            transport: self.ansible_connection.unwrap_or(Transport::None),
            os_tag,
            uses_tls: self.ansible_httpapi_use_ssl,
            api_port: self.ansible_httpapi_port,
            credentials,
        };

        Ok(DeviceRecord::new(
            hostname,
            self.ansible_host,
            group,
            profile,
            self.device_role,
            self.site,
        )
        .with_extra_vars(extra))
    }
}
