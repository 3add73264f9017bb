//! Inventory data model.
//!
//! An [`InventoryTree`] is a strict tree over host ownership (every
//! [`DeviceRecord`] lives in exactly one leaf group) and a DAG over group
//! names (overlay groups list other groups by name). Trees are only produced
//! by [`InventoryBuilder::build`], which checks both properties.

pub mod builder;
pub mod codec;

pub use builder::{canonical_hostname, InventoryBuilder};

use crate::classify::ConnectionProfile;
use crate::error::{Result, SurveyError};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::IpAddr;

/// Name of the root group
pub const ROOT_GROUP: &str = "all";

/// A device that answered both probes, as it appears in the inventory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    hostname: String,
    address: IpAddr,
    group: String,
    profile: ConnectionProfile,
    device_role: String,
    site: String,
    /// Host variables this crate does not interpret, kept for round trips
    extra_vars: IndexMap<String, serde_json::Value>,
}

impl DeviceRecord {
    pub fn new(
        hostname: impl Into<String>,
        address: IpAddr,
        group: impl Into<String>,
        profile: ConnectionProfile,
        device_role: impl Into<String>,
        site: impl Into<String>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            address,
            group: group.into(),
            profile,
            device_role: device_role.into(),
            site: site.into(),
            extra_vars: IndexMap::new(),
        }
    }

    pub fn with_extra_vars(mut self, extra_vars: IndexMap<String, serde_json::Value>) -> Self {
        self.extra_vars = extra_vars;
        self
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn address(&self) -> IpAddr {
        self.address
    }

    /// Name of the leaf group owning this record
    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn profile(&self) -> &ConnectionProfile {
        &self.profile
    }

    pub fn device_role(&self) -> &str {
        &self.device_role
    }

    pub fn site(&self) -> &str {
        &self.site
    }

    pub fn extra_vars(&self) -> &IndexMap<String, serde_json::Value> {
        &self.extra_vars
    }
}

/// Role a group plays in the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKind {
    /// Owns host records directly
    Leaf,
    /// Owns other groups
    Parent,
    /// Only references groups owned elsewhere
    Overlay,
}

/// A named node of the inventory
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InventoryGroup {
    pub(crate) name: String,
    /// `Some` for leaf groups, even when empty
    pub(crate) hosts: Option<IndexMap<String, DeviceRecord>>,
    pub(crate) children: IndexMap<String, InventoryGroup>,
    pub(crate) references: Vec<String>,
    pub(crate) vars: IndexMap<String, serde_json::Value>,
}

impl InventoryGroup {
    pub(crate) fn leaf(name: &str) -> Self {
        Self {
            name: name.to_string(),
            hosts: Some(IndexMap::new()),
            ..Default::default()
        }
    }

    pub(crate) fn parent(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> GroupKind {
        if self.hosts.is_some() {
            GroupKind::Leaf
        } else if self.children.is_empty() && !self.references.is_empty() {
            GroupKind::Overlay
        } else {
            GroupKind::Parent
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.hosts.is_some()
    }

    /// Host records owned directly by this group, in insertion order
    pub fn hosts(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.hosts.iter().flat_map(|hosts| hosts.values())
    }

    pub fn host_count(&self) -> usize {
        self.hosts.as_ref().map_or(0, |hosts| hosts.len())
    }

    /// Groups owned by this group, in insertion order
    pub fn children(&self) -> impl Iterator<Item = &InventoryGroup> {
        self.children.values()
    }

    /// Names of groups this group lists without owning
    pub fn references(&self) -> &[String] {
        &self.references
    }

    pub fn vars(&self) -> &IndexMap<String, serde_json::Value> {
        &self.vars
    }

    /// Pre-order walk of this group and everything it owns
    fn walk<'a>(&'a self, out: &mut Vec<&'a InventoryGroup>) {
        out.push(self);
        for child in self.children.values() {
            child.walk(out);
        }
    }
}

/// Host counts and overlay sizes for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InventoryStats {
    pub total_hosts: usize,
    pub total_groups: usize,
    /// Hosts per leaf group, tree order
    pub leaf_groups: Vec<(String, usize)>,
    /// Resolved host count per overlay group, tree order
    pub overlays: Vec<(String, usize)>,
    /// Hosts per OS tag
    pub by_os: BTreeMap<String, usize>,
}

/// Frozen inventory rooted at `all`
#[derive(Debug, Clone, PartialEq)]
pub struct InventoryTree {
    pub(crate) root: InventoryGroup,
}

impl InventoryTree {
    pub fn root(&self) -> &InventoryGroup {
        &self.root
    }

    /// Every group in pre-order, starting with `all`
    pub fn groups(&self) -> Vec<&InventoryGroup> {
        let mut out = Vec::new();
        self.root.walk(&mut out);
        out
    }

    pub fn group(&self, name: &str) -> Option<&InventoryGroup> {
        self.groups().into_iter().find(|g| g.name == name)
    }

    pub fn leaf_groups(&self) -> Vec<&InventoryGroup> {
        self.groups().into_iter().filter(|g| g.is_leaf()).collect()
    }

    /// Every host record, in tree order
    pub fn hosts(&self) -> Vec<&DeviceRecord> {
        self.groups().into_iter().flat_map(|g| g.hosts()).collect()
    }

    pub fn host(&self, hostname: &str) -> Option<&DeviceRecord> {
        self.groups()
            .into_iter()
            .find_map(|g| g.hosts.as_ref().and_then(|hosts| hosts.get(hostname)))
    }

    pub fn host_count(&self) -> usize {
        self.groups().iter().map(|g| g.host_count()).sum()
    }

    /// Hostnames a group stands for, following both ownership and references.
    ///
    /// Each hostname appears once even when several paths lead to it.
    pub fn resolve_hosts(&self, name: &str) -> Option<Vec<&str>> {
        let index = self.index();
        let start = *index.get(name)?;
        let mut seen_groups = HashSet::new();
        let mut seen_hosts = HashSet::new();
        let mut out = Vec::new();
        let mut stack = vec![start];

        while let Some(group) = stack.pop() {
            if !seen_groups.insert(group.name.as_str()) {
                continue;
            }
            for record in group.hosts() {
                if seen_hosts.insert(record.hostname.as_str()) {
                    out.push(record.hostname.as_str());
                }
            }
            // Reverse so the stack pops in declaration order
            for reference in group.references.iter().rev() {
                if let Some(target) = index.get(reference.as_str()) {
                    stack.push(target);
                }
            }
            for child in group.children.values().rev() {
                stack.push(child);
            }
        }

        Some(out)
    }

    /// Check the ownership and naming invariants.
    pub fn validate(&self) -> Result<()> {
        let groups = self.groups();
        let mut names = HashSet::new();
        for group in &groups {
            if !names.insert(group.name.as_str()) {
                return Err(SurveyError::InvalidInventory(format!(
                    "group '{}' is defined more than once",
                    group.name
                )));
            }
        }

        if self.root.hosts.is_some() {
            return Err(SurveyError::InvalidInventory(format!(
                "root group '{}' cannot own hosts",
                ROOT_GROUP
            )));
        }

        let mut owners: HashMap<&str, &str> = HashMap::new();
        for group in &groups {
            if group.is_leaf() && (!group.children.is_empty() || !group.references.is_empty()) {
                return Err(SurveyError::InvalidInventory(format!(
                    "leaf group '{}' cannot also contain groups",
                    group.name
                )));
            }
            for (hostname, record) in group.hosts.iter().flatten() {
                if hostname != &record.hostname || record.group != group.name {
                    return Err(SurveyError::InvalidInventory(format!(
                        "host '{}' is filed under the wrong key or group",
                        hostname
                    )));
                }
                if let Some(existing) = owners.insert(hostname.as_str(), group.name.as_str()) {
                    return Err(SurveyError::InvalidInventory(format!(
                        "host '{}' is owned by both '{}' and '{}'",
                        hostname, existing, group.name
                    )));
                }
            }
            for reference in &group.references {
                if !names.contains(reference.as_str()) {
                    return Err(SurveyError::InvalidInventory(format!(
                        "group '{}' references undefined group '{}'",
                        group.name, reference
                    )));
                }
                if reference == ROOT_GROUP {
                    return Err(SurveyError::InvalidInventory(format!(
                        "group '{}' cannot reference the root group",
                        group.name
                    )));
                }
            }
        }

        self.check_acyclic()
    }

    /// Reject reference cycles; ownership alone can never form one
    fn check_acyclic(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit<'a>(
            group: &'a InventoryGroup,
            index: &HashMap<&'a str, &'a InventoryGroup>,
            marks: &mut HashMap<&'a str, Mark>,
        ) -> Result<()> {
            match marks.get(group.name.as_str()) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => {
                    return Err(SurveyError::InvalidInventory(format!(
                        "group '{}' is part of a reference cycle",
                        group.name
                    )));
                }
                None => {}
            }
            marks.insert(group.name.as_str(), Mark::Visiting);
            for child in group.children.values() {
                visit(child, index, marks)?;
            }
            for reference in &group.references {
                if let Some(target) = index.get(reference.as_str()) {
                    visit(target, index, marks)?;
                }
            }
            marks.insert(group.name.as_str(), Mark::Done);
            Ok(())
        }

        let index = self.index();
        let mut marks = HashMap::new();
        visit(&self.root, &index, &mut marks)
    }

    pub fn stats(&self) -> InventoryStats {
        let groups = self.groups();
        let mut by_os = BTreeMap::new();
        for record in self.hosts() {
            *by_os.entry(record.profile.os_tag.clone()).or_insert(0) += 1;
        }

        InventoryStats {
            total_hosts: self.host_count(),
            total_groups: groups.len(),
            leaf_groups: groups
                .iter()
                .filter(|g| g.is_leaf())
                .map(|g| (g.name.clone(), g.host_count()))
                .collect(),
            overlays: groups
                .iter()
                .filter(|g| g.kind() == GroupKind::Overlay)
                .map(|g| {
                    let count = self.resolve_hosts(&g.name).map_or(0, |hosts| hosts.len());
                    (g.name.clone(), count)
                })
                .collect(),
            by_os,
        }
    }

    fn index(&self) -> HashMap<&str, &InventoryGroup> {
        self.groups()
            .into_iter()
            .map(|g| (g.name.as_str(), g))
            .collect()
    }
}
