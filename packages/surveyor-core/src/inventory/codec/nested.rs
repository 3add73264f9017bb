//! Nested mapping layout shared by the YAML and JSON encodings.
//!
//! ```yaml
//! all:
//!   children:
//!     cisco_devices:
//!       children:
//!         cisco_routers:
//!           hosts:
//!             device-10-0-0-5: { ansible_host: 10.0.0.5, ... }
//!     all_routers:
//!       children:
//!         cisco_routers: {}
//!   vars:
//!     ansible_python_interpreter: auto_silent
//! ```
//!
//! A group body with `hosts` is a leaf, one with `children` owns groups, and
//! an empty body under `children` names a group owned elsewhere.

use super::host::HostVars;
use crate::error::{Result, SurveyError};
use crate::inventory::{InventoryBuilder, InventoryGroup, InventoryTree, ROOT_GROUP};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;

/// Mapping entries in document order. Repeated keys are kept so the
/// builder sees them instead of the last one silently winning.
#[derive(Debug)]
struct Entries<V>(Vec<(String, V)>);

impl<V> Default for Entries<V> {
    fn default() -> Self {
        Entries(Vec::new())
    }
}

impl<V> Entries<V> {
    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn repeated_key(&self) -> Option<&str> {
        let mut seen = HashSet::new();
        self.0
            .iter()
            .map(|(key, _)| key.as_str())
            .find(|key| !seen.insert(*key))
    }
}

impl<V> IntoIterator for Entries<V> {
    type Item = (String, V);
    type IntoIter = std::vec::IntoIter<(String, V)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<V> FromIterator<(String, V)> for Entries<V> {
    fn from_iter<I: IntoIterator<Item = (String, V)>>(iter: I) -> Self {
        Entries(iter.into_iter().collect())
    }
}

impl<V: Serialize> Serialize for Entries<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(key, value)| (key, value)))
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for Entries<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct EntriesVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for EntriesVisitor<V> {
            type Value = Entries<V>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut map: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry()? {
                    entries.push(entry);
                }
                Ok(Entries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor(PhantomData))
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct GroupBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hosts: Option<Entries<HostVars>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    children: Option<Entries<Option<GroupBody>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    vars: Option<Entries<serde_json::Value>>,
}

impl GroupBody {
    fn is_reference(&self) -> bool {
        self.hosts.is_none() && self.children.is_none()
    }
}

type Document = Entries<GroupBody>;

pub(super) fn render_yaml(tree: &InventoryTree) -> Result<String> {
    serde_yaml::to_string(&to_document(tree)).map_err(|e| SurveyError::Render {
        encoding: "yaml",
        message: e.to_string(),
    })
}

pub(super) fn render_json(tree: &InventoryTree) -> Result<String> {
    let mut text =
        serde_json::to_string_pretty(&to_document(tree)).map_err(|e| SurveyError::Render {
            encoding: "json",
            message: e.to_string(),
        })?;
    text.push('\n');
    Ok(text)
}

pub(super) fn parse_yaml(content: &str) -> Result<InventoryTree> {
    let document: Document = serde_yaml::from_str(content).map_err(|e| SurveyError::Parse {
        encoding: "yaml",
        message: e.to_string(),
    })?;
    from_document(document, "yaml")
}

pub(super) fn parse_json(content: &str) -> Result<InventoryTree> {
    let document: Document = serde_json::from_str(content).map_err(|e| SurveyError::Parse {
        encoding: "json",
        message: e.to_string(),
    })?;
    from_document(document, "json")
}

fn to_document(tree: &InventoryTree) -> Document {
    Entries(vec![(ROOT_GROUP.to_string(), to_body(tree.root()))])
}

fn to_body(group: &InventoryGroup) -> GroupBody {
    let vars = (!group.vars.is_empty()).then(|| {
        group
            .vars
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    });

    if let Some(hosts) = &group.hosts {
        return GroupBody {
            hosts: Some(
                hosts
                    .iter()
                    .map(|(hostname, record)| (hostname.clone(), HostVars::from(record)))
                    .collect(),
            ),
            children: None,
            vars,
        };
    }

    let children = group
        .children
        .iter()
        .map(|(name, child)| (name.clone(), Some(to_body(child))))
        .chain(
            group
                .references
                .iter()
                .map(|reference| (reference.clone(), Some(GroupBody::default()))),
        )
        .collect();

    GroupBody {
        hosts: None,
        children: Some(children),
        vars,
    }
}

/// Repeated group names and var keys are rejected here. Repeated hostnames
/// are left for the builder, which reports them as duplicate hosts.
fn check_unique<V>(entries: &Entries<V>, what: &str, owner: &str) -> Result<()> {
    match entries.repeated_key() {
        Some(key) => Err(SurveyError::InvalidInventory(format!(
            "{} '{}' appears more than once in '{}'",
            what, key, owner
        ))),
        None => Ok(()),
    }
}

fn from_document(document: Document, encoding: &'static str) -> Result<InventoryTree> {
    check_unique(&document, "group", "the document root")?;
    let mut builder = InventoryBuilder::verbatim();

    for (name, body) in document {
        if name == ROOT_GROUP {
            if body.hosts.is_some() {
                return Err(SurveyError::Parse {
                    encoding,
                    message: format!("root group '{}' cannot own hosts", ROOT_GROUP),
                });
            }
            let vars = body.vars.unwrap_or_default();
            check_unique(&vars, "var", ROOT_GROUP)?;
            for (key, value) in vars {
                builder.set_var(ROOT_GROUP, &key, value)?;
            }
            let children = body.children.unwrap_or_default();
            check_unique(&children, "group", ROOT_GROUP)?;
            for (child, child_body) in children {
                match child_body {
                    Some(child_body) if !child_body.is_reference() => {
                        add_group(&mut builder, &child, child_body, None, encoding)?;
                    }
                    _ => {
                        return Err(SurveyError::InvalidInventory(format!(
                            "root group cannot reference '{}'",
                            child
                        )));
                    }
                }
            }
        } else {
            // Top-level groups besides `all` are implicitly its children
            add_group(&mut builder, &name, body, None, encoding)?;
        }
    }

    builder.build()
}

fn add_group(
    builder: &mut InventoryBuilder,
    name: &str,
    body: GroupBody,
    parent: Option<&str>,
    encoding: &'static str,
) -> Result<()> {
    match body.hosts {
        Some(hosts) => {
            builder.declare_leaf(name, parent)?;
            for (hostname, vars) in hosts {
                let record = vars
                    .into_record(&hostname, name)
                    .map_err(|message| SurveyError::Parse { encoding, message })?;
                builder.insert_record(record)?;
            }
            if body.children.is_some_and(|c| !c.is_empty()) {
                return Err(SurveyError::InvalidInventory(format!(
                    "leaf group '{}' cannot also contain groups",
                    name
                )));
            }
        }
        None => {
            builder.declare_parent(name, parent)?;
            let children = body.children.unwrap_or_default();
            check_unique(&children, "group", name)?;
            for (child, child_body) in children {
                match child_body {
                    Some(child_body) if !child_body.is_reference() => {
                        add_group(builder, &child, child_body, Some(name), encoding)?;
                    }
                    Some(GroupBody { vars: Some(_), .. }) => {
                        return Err(SurveyError::Parse {
                            encoding,
                            message: format!(
                                "'{}' under '{}' has vars but neither hosts nor children",
                                child, name
                            ),
                        });
                    }
                    _ => builder.add_reference(name, &child)?,
                }
            }
        }
    }

    let vars = body.vars.unwrap_or_default();
    check_unique(&vars, "var", name)?;
    for (key, value) in vars {
        builder.set_var(name, &key, value)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::codec::tests::sample_tree;
    use crate::inventory::GroupKind;

    #[test]
    fn test_yaml_layout() {
        let text = render_yaml(&sample_tree()).unwrap();
        let value: serde_yaml::Value = serde_yaml::from_str(&text).unwrap();
        let all = &value["all"];

        let routers = &all["children"]["cisco_devices"]["children"]["cisco_routers"];
        let host = &routers["hosts"]["device-10-0-0-5"];
        assert_eq!(host["ansible_host"].as_str(), Some("10.0.0.5"));
        assert_eq!(host["ansible_network_os"].as_str(), Some("ios"));
        assert_eq!(host["ansible_user"].as_str(), Some("${vault:cisco_username}"));

        let overlay = &all["children"]["all_routers"]["children"];
        assert!(overlay["cisco_routers"].as_mapping().unwrap().is_empty());
        assert_eq!(all["vars"]["retries"].as_u64(), Some(3));
    }

    #[test]
    fn test_empty_leaf_keeps_hosts_key() {
        let mut builder = InventoryBuilder::verbatim();
        builder.declare_leaf("spare", None).unwrap();
        let tree = builder.build().unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&render_json(&tree).unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"all": {"children": {"spare": {"hosts": {}}}}})
        );
    }

    #[test]
    fn test_null_child_is_a_reference() {
        let text = r#"{
            "all": {
                "children": {
                    "edge": {"hosts": {}},
                    "everything": {"children": {"edge": null}}
                }
            }
        }"#;
        let tree = parse_json(text).unwrap();
        let overlay = tree.group("everything").unwrap();
        assert_eq!(overlay.kind(), GroupKind::Overlay);
        assert_eq!(overlay.references(), &["edge".to_string()]);
    }

    #[test]
    fn test_hand_written_yaml() {
        let text = r#"
all:
  children:
    routers:
      hosts:
        core-1:
          ansible_host: 192.0.2.1
          ansible_network_os: ios
          ansible_connection: network_cli
          ansible_user: ${vault:cisco_username}
          ansible_password: ${vault:cisco_password}
          device_role: core
          site: lab
      vars:
        ansible_become: true
"#;
        let tree = parse_yaml(text).unwrap();
        let record = tree.host("core-1").unwrap();
        assert_eq!(record.group(), "routers");
        assert_eq!(record.site(), "lab");
        assert_eq!(
            tree.group("routers").unwrap().vars().get("ansible_become"),
            Some(&serde_json::json!(true))
        );
    }

    #[test]
    fn test_dangling_reference_is_invalid() {
        let text = r#"{"all": {"children": {"everything": {"children": {"ghost": {}}}}}}"#;
        assert!(matches!(
            parse_json(text),
            Err(SurveyError::InvalidInventory(_))
        ));
    }

    #[test]
    fn test_duplicate_hostname_across_groups() {
        let host = r#"{"ansible_host": "192.0.2.1", "ansible_network_os": "ios",
                       "device_role": "r", "site": "s"}"#;
        let text = format!(
            r#"{{"all": {{"children": {{
                "a": {{"hosts": {{"dup": {host}}}}},
                "b": {{"hosts": {{"dup": {host}}}}}
            }}}}}}"#
        );
        assert!(matches!(
            parse_json(&text),
            Err(SurveyError::DuplicateHost { .. })
        ));
    }

    #[test]
    fn test_repeated_hostname_in_one_group_yaml() {
        let text = r#"
all:
  children:
    routers:
      hosts:
        dup:
          ansible_host: 192.0.2.1
          ansible_network_os: ios
          device_role: core
          site: lab
        dup:
          ansible_host: 192.0.2.2
          ansible_network_os: eos
          device_role: core
          site: lab
"#;
        match parse_yaml(text) {
            Err(SurveyError::DuplicateHost {
                hostname,
                existing,
                incoming,
            }) => {
                assert_eq!(hostname, "dup");
                assert_eq!(existing, "192.0.2.1");
                assert_eq!(incoming, "192.0.2.2");
            }
            other => panic!("expected DuplicateHost, got {:?}", other.map(|t| t.host_count())),
        }
    }

    #[test]
    fn test_repeated_hostname_in_one_group_json() {
        let text = r#"{"all": {"children": {"routers": {"hosts": {
            "dup": {"ansible_host": "192.0.2.1", "ansible_network_os": "ios",
                    "device_role": "core", "site": "lab"},
            "dup": {"ansible_host": "192.0.2.2", "ansible_network_os": "eos",
                    "device_role": "core", "site": "lab"}
        }}}}}"#;
        assert!(matches!(
            parse_json(text),
            Err(SurveyError::DuplicateHost { .. })
        ));
    }

    #[test]
    fn test_repeated_group_or_var_is_invalid() {
        let groups = r#"{"all": {"children": {
            "edge": {"hosts": {}},
            "edge": {"children": {}}
        }}}"#;
        assert!(matches!(
            parse_json(groups),
            Err(SurveyError::InvalidInventory(_))
        ));

        let vars = r#"{"all": {"vars": {"retries": 1, "retries": 2}}}"#;
        assert!(matches!(
            parse_json(vars),
            Err(SurveyError::InvalidInventory(_))
        ));
    }

    #[test]
    fn test_unrecognised_host_vars_survive_yaml() {
        let text = r#"
all:
  children:
    core_routers:
      hosts:
        rtr-core-001:
          ansible_host: 10.1.1.1
          ansible_network_os: ios
          device_role: core_router
          site: datacenter_1
          bgp_asn: 65001
"#;
        let tree = parse_yaml(text).unwrap();
        let record = tree.host("rtr-core-001").unwrap();
        assert_eq!(record.extra_vars()["bgp_asn"], 65001);

        let rendered = render_yaml(&tree).unwrap();
        assert!(rendered.contains("bgp_asn: 65001"));
        assert_eq!(parse_yaml(&rendered).unwrap(), tree);
    }

    #[test]
    fn test_malformed_document() {
        assert!(matches!(
            parse_yaml("all: [1, 2"),
            Err(SurveyError::Parse { encoding: "yaml", .. })
        ));
        assert!(matches!(
            parse_json(r#"{"all": {"hostz": {}}}"#),
            Err(SurveyError::Parse { encoding: "json", .. })
        ));
    }
}
