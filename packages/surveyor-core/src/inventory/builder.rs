//! Construct-then-freeze assembly of an [`InventoryTree`].

use super::{DeviceRecord, InventoryGroup, InventoryTree, ROOT_GROUP};
use crate::classify::{Classification, DeviceClass, DeviceGroup, Vendor};
use crate::config::InventorySettings;
use crate::error::{Result, SurveyError};
use std::collections::HashMap;
use std::net::IpAddr;

/// Overlay grouping every vendor parent under the environment axis
pub const PRODUCTION_GROUP: &str = "production";

/// Stable hostname for an address: `<prefix>-` followed by the address with
/// separators replaced (`device-10-0-0-5`, `device-2001-db8--1`).
pub fn canonical_hostname(prefix: &str, addr: IpAddr) -> String {
    format!("{}-{}", prefix, addr.to_string().replace(['.', ':'], "-"))
}

/// Mutable staging area for an inventory.
///
/// Groups keep the order in which they were first declared and hosts the
/// order in which they were added. Nothing is observable until [`build`]
/// freezes and validates the tree.
///
/// [`build`]: InventoryBuilder::build
pub struct InventoryBuilder {
    settings: InventorySettings,
    root: InventoryGroup,
    /// Group name -> names of its ancestors below the root
    paths: HashMap<String, Vec<String>>,
    /// Leaf groups with vendor/class metadata, in declaration order
    device_groups: Vec<DeviceGroup>,
    /// Hostname -> address that claimed it
    claimed: HashMap<String, IpAddr>,
    derive_overlays: bool,
}

impl InventoryBuilder {
    /// Builder for a discovery run; overlay groups are derived on [`build`].
    ///
    /// [`build`]: InventoryBuilder::build
    pub fn new(settings: &InventorySettings) -> Self {
        let mut root = InventoryGroup::parent(ROOT_GROUP);
        root.vars = settings.vars.clone();
        Self {
            settings: settings.clone(),
            root,
            paths: HashMap::new(),
            device_groups: Vec::new(),
            claimed: HashMap::new(),
            derive_overlays: true,
        }
    }

    /// Builder that reproduces a document verbatim, without derived overlays
    pub(crate) fn verbatim() -> Self {
        let mut builder = Self::new(&InventorySettings::default());
        builder.derive_overlays = false;
        builder.root.vars.clear();
        builder
    }

    /// Pre-create every group a classifier can produce, so an empty run
    /// still yields the full group skeleton in a predictable order.
    pub fn with_catalog(mut self, catalog: &[DeviceGroup]) -> Self {
        for group in catalog {
            self.ensure_device_group(group);
        }
        self
    }

    pub fn settings(&self) -> &InventorySettings {
        &self.settings
    }

    /// Record a classified device, creating its leaf and parent groups on
    /// first use.
    pub fn add_device(
        &mut self,
        address: IpAddr,
        classification: &Classification,
    ) -> Result<&DeviceRecord> {
        self.ensure_device_group(&classification.group);
        let record = DeviceRecord::new(
            canonical_hostname(&self.settings.hostname_prefix, address),
            address,
            classification.group.name.clone(),
            classification.profile.clone(),
            self.settings.device_role.clone(),
            self.settings.site.clone(),
        );
        self.insert_record(record)
    }

    /// Insert a prebuilt record into the already declared leaf group it names.
    pub fn insert_record(&mut self, record: DeviceRecord) -> Result<&DeviceRecord> {
        if let Some(existing) = self.claimed.get(record.hostname()) {
            return Err(SurveyError::DuplicateHost {
                hostname: record.hostname().to_string(),
                existing: existing.to_string(),
                incoming: record.address().to_string(),
            });
        }

        let group_name = record.group().to_string();
        let hostname = record.hostname().to_string();
        let group = find_group_mut(&mut self.root, &self.paths, &group_name).ok_or_else(|| {
            SurveyError::InvalidInventory(format!(
                "host '{}' names undeclared group '{}'",
                hostname, group_name
            ))
        })?;
        let hosts = group.hosts.as_mut().ok_or_else(|| {
            SurveyError::InvalidInventory(format!(
                "host '{}' placed in non-leaf group '{}'",
                hostname, group_name
            ))
        })?;

        tracing::trace!("{} -> {}", hostname, group_name);
        self.claimed.insert(hostname.clone(), record.address());
        let (index, _) = hosts.insert_full(hostname, record);
        Ok(&hosts[index])
    }

    /// Declare a group that owns other groups. `parent` must already exist;
    /// `None` places it under the root.
    pub fn declare_parent(&mut self, name: &str, parent: Option<&str>) -> Result<()> {
        self.declare(InventoryGroup::parent(name), parent)
    }

    /// Declare a leaf group that owns hosts.
    pub fn declare_leaf(&mut self, name: &str, parent: Option<&str>) -> Result<()> {
        self.declare(InventoryGroup::leaf(name), parent)
    }

    /// Make `group` list `target` by name. The target may be declared later;
    /// it must exist by the time the tree is built.
    pub fn add_reference(&mut self, group: &str, target: &str) -> Result<()> {
        let group_ref = self.group_mut(group).ok_or_else(|| {
            SurveyError::InvalidInventory(format!("reference from undeclared group '{}'", group))
        })?;
        if !group_ref.references.iter().any(|r| r == target) {
            group_ref.references.push(target.to_string());
        }
        Ok(())
    }

    /// Set a variable on a declared group (`all` included).
    pub fn set_var(&mut self, group: &str, key: &str, value: serde_json::Value) -> Result<()> {
        let group_ref = self.group_mut(group).ok_or_else(|| {
            SurveyError::InvalidInventory(format!("vars for undeclared group '{}'", group))
        })?;
        group_ref.vars.insert(key.to_string(), value);
        Ok(())
    }

    pub fn contains_group(&self, name: &str) -> bool {
        name == ROOT_GROUP || self.paths.contains_key(name)
    }

    pub fn host_count(&self) -> usize {
        self.claimed.len()
    }

    /// Freeze the tree. Derives overlay groups when enabled and validates
    /// every ownership and reference invariant.
    pub fn build(mut self) -> Result<InventoryTree> {
        if self.derive_overlays {
            for (name, targets) in self.overlay_plan() {
                if self.contains_group(&name) {
                    return Err(SurveyError::InvalidInventory(format!(
                        "overlay '{}' collides with an existing group",
                        name
                    )));
                }
                self.declare_parent(&name, None)?;
                for target in targets {
                    self.add_reference(&name, &target)?;
                }
            }
        }

        let tree = InventoryTree { root: self.root };
        tree.validate()?;
        tracing::debug!(
            "Inventory built: {} hosts in {} groups",
            tree.host_count(),
            tree.groups().len()
        );
        Ok(tree)
    }

    /// Overlay groups over the declared device groups: by vendor, by device
    /// class, then by environment. Overlays with nothing to reference are
    /// skipped.
    fn overlay_plan(&self) -> Vec<(String, Vec<String>)> {
        let mut plan = Vec::new();

        for vendor in Vendor::ALL {
            if self.device_groups.iter().any(|g| g.vendor == Some(vendor)) {
                plan.push((vendor.overlay_group(), vec![vendor.parent_group()]));
            }
        }

        for class in DeviceClass::ALL {
            let leaves: Vec<String> = self
                .device_groups
                .iter()
                .filter(|g| g.class == Some(class))
                .map(|g| g.name.clone())
                .collect();
            if !leaves.is_empty() {
                plan.push((class.overlay_group(), leaves));
            }
        }

        let mut production: Vec<String> = Vec::new();
        for parent in self.device_groups.iter().filter_map(|g| g.parent()) {
            if !production.contains(&parent) {
                production.push(parent);
            }
        }
        if !production.is_empty() {
            plan.push((PRODUCTION_GROUP.to_string(), production));
        }

        plan
    }

    fn ensure_device_group(&mut self, group: &DeviceGroup) {
        if self.paths.contains_key(&group.name) {
            return;
        }
        let parent = group.parent();
        if let Some(parent) = &parent {
            if !self.paths.contains_key(parent) {
                self.insert_group(InventoryGroup::parent(parent), Vec::new());
            }
        }
        let path = match parent {
            Some(parent) => {
                let mut path = self.paths.get(&parent).cloned().unwrap_or_default();
                path.push(parent);
                path
            }
            None => Vec::new(),
        };
        self.insert_group(InventoryGroup::leaf(&group.name), path);
        self.device_groups.push(group.clone());
    }

    fn declare(&mut self, group: InventoryGroup, parent: Option<&str>) -> Result<()> {
        if self.contains_group(&group.name) {
            return Err(SurveyError::InvalidInventory(format!(
                "group '{}' is defined more than once",
                group.name
            )));
        }
        let path = match parent {
            None | Some(ROOT_GROUP) => Vec::new(),
            Some(parent) => {
                let parent_group = self.group_mut(parent).ok_or_else(|| {
                    SurveyError::InvalidInventory(format!(
                        "group '{}' declared under undeclared parent '{}'",
                        group.name, parent
                    ))
                })?;
                if parent_group.is_leaf() {
                    return Err(SurveyError::InvalidInventory(format!(
                        "group '{}' declared under leaf group '{}'",
                        group.name, parent
                    )));
                }
                let mut path = self.paths.get(parent).cloned().unwrap_or_default();
                path.push(parent.to_string());
                path
            }
        };
        self.insert_group(group, path);
        Ok(())
    }

    fn insert_group(&mut self, group: InventoryGroup, path: Vec<String>) {
        let name = group.name.clone();
        let mut node = &mut self.root;
        for step in &path {
            node = node
                .children
                .entry(step.clone())
                .or_insert_with(|| InventoryGroup::parent(step));
        }
        node.children.insert(name.clone(), group);
        self.paths.insert(name, path);
    }

    fn group_mut(&mut self, name: &str) -> Option<&mut InventoryGroup> {
        find_group_mut(&mut self.root, &self.paths, name)
    }
}

fn find_group_mut<'a>(
    root: &'a mut InventoryGroup,
    paths: &HashMap<String, Vec<String>>,
    name: &str,
) -> Option<&'a mut InventoryGroup> {
    if name == ROOT_GROUP {
        return Some(root);
    }
    let path = paths.get(name)?;
    let mut node = root;
    for step in path {
        node = node.children.get_mut(step)?;
    }
    node.children.get_mut(name)
}
