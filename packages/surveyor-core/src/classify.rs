//! Device classification.
//!
//! Maps an address to a device group and the connection profile automation
//! needs to reach it. [`OctetRangeClassifier`] is a heuristic stand-in that
//! bins the last octet of the address; anything implementing [`Classifier`]
//! (SNMP sysObjectID lookup, SSH banner inspection) can replace it without
//! touching the inventory builder.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::IpAddr;
use std::ops::RangeInclusive;
use std::str::FromStr;

/// Group that receives addresses no bin matches
pub const UNKNOWN_GROUP: &str = "unknown_devices";

/// Hardware vendor family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vendor {
    Cisco,
    Arista,
    Juniper,
    PaloAlto,
    Fortinet,
}

impl Vendor {
    pub const ALL: [Vendor; 5] = [
        Vendor::Cisco,
        Vendor::Arista,
        Vendor::Juniper,
        Vendor::PaloAlto,
        Vendor::Fortinet,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Vendor::Cisco => "cisco",
            Vendor::Arista => "arista",
            Vendor::Juniper => "juniper",
            Vendor::PaloAlto => "palo_alto",
            Vendor::Fortinet => "fortinet",
        }
    }

    /// Parent group owning every leaf group of this vendor
    pub fn parent_group(&self) -> String {
        format!("{}_devices", self.as_str())
    }

    /// Overlay group referencing the vendor parent
    pub fn overlay_group(&self) -> String {
        format!("all_{}", self.as_str())
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Functional class of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Router,
    Switch,
    Firewall,
}

impl DeviceClass {
    pub const ALL: [DeviceClass; 3] = [DeviceClass::Switch, DeviceClass::Router, DeviceClass::Firewall];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceClass::Router => "router",
            DeviceClass::Switch => "switch",
            DeviceClass::Firewall => "firewall",
        }
    }

    /// Overlay group referencing every leaf group of this class
    pub fn overlay_group(&self) -> String {
        format!("all_{}s", self.as_str())
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A leaf inventory group together with the axes overlays are built on
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceGroup {
    pub name: String,
    pub vendor: Option<Vendor>,
    pub class: Option<DeviceClass>,
}

impl DeviceGroup {
    pub fn new(name: impl Into<String>, vendor: Option<Vendor>, class: Option<DeviceClass>) -> Self {
        Self {
            name: name.into(),
            vendor,
            class,
        }
    }

    /// Name of the group that owns this one; `None` means directly under `all`
    pub fn parent(&self) -> Option<String> {
        self.vendor.map(|v| v.parent_group())
    }
}

/// How automation connects to a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    NetworkCli,
    #[serde(rename = "httpapi")]
    HttpApi,
    Netconf,
    Local,
    /// No usable transport; the device is listed but not automated
    None,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::NetworkCli => "network_cli",
            Transport::HttpApi => "httpapi",
            Transport::Netconf => "netconf",
            Transport::Local => "local",
            Transport::None => "none",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "network_cli" => Ok(Transport::NetworkCli),
            "httpapi" => Ok(Transport::HttpApi),
            "netconf" => Ok(Transport::Netconf),
            "local" => Ok(Transport::Local),
            "none" => Ok(Transport::None),
            other => Err(format!("unknown transport '{}'", other)),
        }
    }
}

/// Symbolic reference to a secret held by an external store.
///
/// Rendered as `${store:key}`. Resolution happens outside this crate; a
/// `SecretRef` never carries the secret value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecretRef {
    store: String,
    key: String,
}

impl SecretRef {
    pub fn new(store: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            store: store.into(),
            key: key.into(),
        }
    }

    pub fn store(&self) -> &str {
        &self.store
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${{{}:{}}}", self.store, self.key)
    }
}

impl FromStr for SecretRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let inner = s
            .strip_prefix("${")
            .and_then(|rest| rest.strip_suffix('}'))
            .ok_or_else(|| format!("'{}' is not a ${{store:key}} reference", s))?;
        match inner.split_once(':') {
            Some((store, key)) if !store.is_empty() && !key.is_empty() => {
                Ok(SecretRef::new(store, key))
            }
            _ => Err(format!("'{}' is not a ${{store:key}} reference", s)),
        }
    }
}

impl Serialize for SecretRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SecretRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Credential placeholders for one vendor family
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRefs {
    pub username: SecretRef,
    pub password: SecretRef,
    pub api_token: Option<SecretRef>,
}

/// Everything automation needs to connect to devices of one group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionProfile {
    pub transport: Transport,
    pub os_tag: String,
    pub uses_tls: bool,
    pub api_port: Option<u16>,
    pub credentials: Option<CredentialRefs>,
}

impl ConnectionProfile {
    /// Profile for devices nothing is known about
    pub fn noop() -> Self {
        Self {
            transport: Transport::None,
            os_tag: "unknown".to_string(),
            uses_tls: false,
            api_port: None,
            credentials: None,
        }
    }
}

/// Result of classifying one address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub group: DeviceGroup,
    pub profile: ConnectionProfile,
}

impl Classification {
    pub fn is_unknown(&self) -> bool {
        self.group.name == UNKNOWN_GROUP
    }
}

/// Strategy deciding which group and profile an address belongs to
pub trait Classifier: Send + Sync {
    /// Classify one address. Must be deterministic and side-effect free.
    fn classify(&self, addr: IpAddr) -> Classification;

    /// Every group `classify` can return, in the order the inventory lists them
    fn catalog(&self) -> Vec<DeviceGroup>;
}

struct Bin {
    octets: RangeInclusive<u8>,
    group: &'static str,
    vendor: Vendor,
    class: DeviceClass,
    transport: Transport,
    os_tag: &'static str,
    api_port: Option<u16>,
    credential_prefix: &'static str,
    api_token_key: Option<&'static str>,
}

const REFERENCE_BINS: [Bin; 6] = [
    Bin {
        octets: 1..=10,
        group: "cisco_routers",
        vendor: Vendor::Cisco,
        class: DeviceClass::Router,
        transport: Transport::NetworkCli,
        os_tag: "ios",
        api_port: None,
        credential_prefix: "cisco",
        api_token_key: None,
    },
    Bin {
        octets: 11..=30,
        group: "cisco_switches",
        vendor: Vendor::Cisco,
        class: DeviceClass::Switch,
        transport: Transport::NetworkCli,
        os_tag: "ios",
        api_port: None,
        credential_prefix: "cisco",
        api_token_key: None,
    },
    Bin {
        octets: 31..=40,
        group: "arista_switches",
        vendor: Vendor::Arista,
        class: DeviceClass::Switch,
        transport: Transport::HttpApi,
        os_tag: "eos",
        api_port: Some(443),
        credential_prefix: "arista",
        api_token_key: None,
    },
    Bin {
        octets: 41..=50,
        group: "juniper_routers",
        vendor: Vendor::Juniper,
        class: DeviceClass::Router,
        transport: Transport::Netconf,
        os_tag: "junos",
        api_port: None,
        credential_prefix: "juniper",
        api_token_key: None,
    },
    Bin {
        octets: 51..=60,
        group: "palo_alto_firewalls",
        vendor: Vendor::PaloAlto,
        class: DeviceClass::Firewall,
        transport: Transport::Local,
        os_tag: "panos",
        api_port: None,
        credential_prefix: "panos",
        api_token_key: None,
    },
    Bin {
        octets: 61..=70,
        group: "fortinet_firewalls",
        vendor: Vendor::Fortinet,
        class: DeviceClass::Firewall,
        transport: Transport::HttpApi,
        os_tag: "fortios",
        api_port: Some(443),
        credential_prefix: "fortinet",
        api_token_key: Some("fortigate_api_token"),
    },
];

/// Heuristic classifier binning the last octet of the address.
///
/// This is an approximation, not a fingerprint: the bins only reflect an
/// addressing convention. Profiles are built once and cloned per lookup.
pub struct OctetRangeClassifier {
    bins: Vec<(RangeInclusive<u8>, Classification)>,
    fallback: Classification,
}

impl OctetRangeClassifier {
    /// Build the reference bin table with credentials pointing at `secret_store`
    pub fn new(secret_store: &str) -> Self {
        let bins = REFERENCE_BINS
            .iter()
            .map(|bin| {
                let secret = |suffix: &str| {
                    SecretRef::new(secret_store, format!("{}_{}", bin.credential_prefix, suffix))
                };
                let profile = ConnectionProfile {
                    transport: bin.transport,
                    os_tag: bin.os_tag.to_string(),
                    uses_tls: bin.api_port.is_some(),
                    api_port: bin.api_port,
                    credentials: Some(CredentialRefs {
                        username: secret("username"),
                        password: secret("password"),
                        api_token: bin.api_token_key.map(|key| SecretRef::new(secret_store, key)),
                    }),
                };
                let group = DeviceGroup::new(bin.group, Some(bin.vendor), Some(bin.class));
                (bin.octets.clone(), Classification { group, profile })
            })
            .collect();

        Self {
            bins,
            fallback: Classification {
                group: DeviceGroup::new(UNKNOWN_GROUP, None, None),
                profile: ConnectionProfile::noop(),
            },
        }
    }
}

impl Default for OctetRangeClassifier {
    fn default() -> Self {
        Self::new("vault")
    }
}

/// Last byte of the address, the only input the octet heuristic looks at
fn last_octet(addr: IpAddr) -> u8 {
    match addr {
        IpAddr::V4(v4) => v4.octets()[3],
        IpAddr::V6(v6) => v6.octets()[15],
    }
}

impl Classifier for OctetRangeClassifier {
    fn classify(&self, addr: IpAddr) -> Classification {
        let octet = last_octet(addr);
        self.bins
            .iter()
            .find(|(octets, _)| octets.contains(&octet))
            .map(|(_, classification)| classification.clone())
            .unwrap_or_else(|| self.fallback.clone())
    }

    fn catalog(&self) -> Vec<DeviceGroup> {
        self.bins
            .iter()
            .map(|(_, c)| c.group.clone())
            .chain(std::iter::once(self.fallback.group.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(addr: &str) -> Classification {
        OctetRangeClassifier::default().classify(addr.parse().unwrap())
    }

    #[test]
    fn test_reference_bins() {
        let c = classify("10.0.0.5");
        assert_eq!(c.group.name, "cisco_routers");
        assert_eq!(c.profile.os_tag, "ios");
        assert_eq!(c.profile.transport, Transport::NetworkCli);

        let c = classify("10.0.0.25");
        assert_eq!(c.group.name, "cisco_switches");
        assert_eq!(c.profile.os_tag, "ios");

        let c = classify("10.0.0.35");
        assert_eq!(c.group.name, "arista_switches");
        assert_eq!(c.profile.os_tag, "eos");
        assert!(c.profile.uses_tls);
        assert_eq!(c.profile.transport, Transport::HttpApi);
        assert_eq!(c.profile.api_port, Some(443));

        let c = classify("10.0.0.45");
        assert_eq!(c.group.name, "juniper_routers");
        assert_eq!(c.profile.os_tag, "junos");
        assert_eq!(c.profile.transport, Transport::Netconf);

        let c = classify("10.0.0.55");
        assert_eq!(c.group.name, "palo_alto_firewalls");
        assert_eq!(c.profile.transport, Transport::Local);

        let c = classify("10.0.0.65");
        assert_eq!(c.group.name, "fortinet_firewalls");
        assert_eq!(c.profile.os_tag, "fortios");
        let creds = c.profile.credentials.unwrap();
        assert_eq!(
            creds.api_token.unwrap().to_string(),
            "${vault:fortigate_api_token}"
        );
    }

    #[test]
    fn test_bin_boundaries_are_inclusive() {
        assert_eq!(classify("10.0.0.1").group.name, "cisco_routers");
        assert_eq!(classify("10.0.0.10").group.name, "cisco_routers");
        assert_eq!(classify("10.0.0.11").group.name, "cisco_switches");
        assert_eq!(classify("10.0.0.30").group.name, "cisco_switches");
        assert_eq!(classify("10.0.0.70").group.name, "fortinet_firewalls");
        assert_eq!(classify("10.0.0.71").group.name, UNKNOWN_GROUP);
    }

    #[test]
    fn test_unknown_fallback() {
        let c = classify("10.0.0.200");
        assert!(c.is_unknown());
        assert_eq!(c.profile, ConnectionProfile::noop());
        assert!(c.group.parent().is_none());
        assert!(classify("10.0.0.0").is_unknown());
    }

    #[test]
    fn test_classification_is_deterministic() {
        let classifier = OctetRangeClassifier::default();
        let other = OctetRangeClassifier::default();
        for last in 0..=255u8 {
            let addr = IpAddr::from([192, 168, 1, last]);
            assert_eq!(classifier.classify(addr), classifier.classify(addr));
            assert_eq!(classifier.classify(addr), other.classify(addr));
        }
    }

    #[test]
    fn test_ipv6_uses_last_byte() {
        assert_eq!(classify("2001:db8::5").group.name, "cisco_routers");
        assert_eq!(classify("2001:db8::ff").group.name, UNKNOWN_GROUP);
    }

    #[test]
    fn test_credentials_use_configured_store() {
        let c = OctetRangeClassifier::new("sops").classify("10.0.0.5".parse().unwrap());
        let creds = c.profile.credentials.unwrap();
        assert_eq!(creds.username.to_string(), "${sops:cisco_username}");
        assert_eq!(creds.password.to_string(), "${sops:cisco_password}");
        assert!(creds.api_token.is_none());
    }

    #[test]
    fn test_catalog_lists_every_group_once() {
        let catalog = OctetRangeClassifier::default().catalog();
        let names: Vec<_> = catalog.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "cisco_routers",
                "cisco_switches",
                "arista_switches",
                "juniper_routers",
                "palo_alto_firewalls",
                "fortinet_firewalls",
                UNKNOWN_GROUP,
            ]
        );
    }

    #[test]
    fn test_secret_ref_parse() {
        let secret: SecretRef = "${vault:cisco_username}".parse().unwrap();
        assert_eq!(secret.store(), "vault");
        assert_eq!(secret.key(), "cisco_username");
        assert!("{{ vault_cisco_username }}".parse::<SecretRef>().is_err());
        assert!("${vault}".parse::<SecretRef>().is_err());
        assert!("${:key}".parse::<SecretRef>().is_err());
    }

    #[test]
    fn test_transport_names() {
        for transport in [
            Transport::NetworkCli,
            Transport::HttpApi,
            Transport::Netconf,
            Transport::Local,
            Transport::None,
        ] {
            assert_eq!(transport.as_str().parse::<Transport>(), Ok(transport));
        }
    }
}
