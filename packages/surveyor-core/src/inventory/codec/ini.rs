//! Flat INI layout.
//!
//! ```ini
//! [all:vars]
//! ansible_python_interpreter=auto_silent
//!
//! [all:children]
//! cisco_devices
//! all_routers
//!
//! [cisco_devices:children]
//! cisco_routers
//!
//! [cisco_routers]
//! device-10-0-0-5 ansible_host=10.0.0.5 ansible_network_os=ios ...
//!
//! [all_routers:children]
//! cisco_routers
//! ```
//!
//! Sections are flat, so ownership comes from order: the first time a group
//! name appears (in a `:children` list or as its own section) fixes where it
//! lives. A name listed after that is a reference.

use super::host::HostVars;
use crate::error::{Result, SurveyError};
use crate::inventory::{InventoryBuilder, InventoryGroup, InventoryTree, ROOT_GROUP};
use std::collections::{HashMap, HashSet};
use std::fmt::Write;

const ENCODING: &str = "ini";

fn parse_error(line: usize, message: impl std::fmt::Display) -> SurveyError {
    SurveyError::Parse {
        encoding: ENCODING,
        message: format!("line {}: {}", line, message),
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

pub(super) fn render(tree: &InventoryTree) -> String {
    let mut out = String::new();
    let root = tree.root();

    if !root.vars.is_empty() {
        write_vars(&mut out, ROOT_GROUP, root);
    }

    let mut mentioned: HashSet<&str> = HashSet::new();
    mentioned.insert(ROOT_GROUP);
    let _ = writeln!(out, "[{}:children]", ROOT_GROUP);
    for child in root.children.keys() {
        let _ = writeln!(out, "{}", child);
        mentioned.insert(child.as_str());
    }
    out.push('\n');

    let mut deferred: Vec<&InventoryGroup> = Vec::new();
    for group in tree.groups().into_iter().skip(1) {
        match &group.hosts {
            Some(hosts) => {
                let _ = writeln!(out, "[{}]", group.name);
                for (hostname, record) in hosts {
                    let _ = writeln!(out, "{}", host_line(hostname, &HostVars::from(record)));
                }
            }
            None => {
                let _ = writeln!(out, "[{}:children]", group.name);
                for child in group.children.keys() {
                    let _ = writeln!(out, "{}", child);
                    mentioned.insert(child.as_str());
                }
                // An unseen name here would read back as owned
                if group.references.iter().all(|r| mentioned.contains(r.as_str())) {
                    for reference in &group.references {
                        let _ = writeln!(out, "{}", reference);
                    }
                } else {
                    deferred.push(group);
                }
            }
        }
        out.push('\n');

        if !group.vars.is_empty() {
            write_vars(&mut out, &group.name, group);
        }
    }

    for group in deferred {
        let _ = writeln!(out, "[{}:children]", group.name);
        for reference in &group.references {
            let _ = writeln!(out, "{}", reference);
        }
        out.push('\n');
    }

    out
}

fn write_vars(out: &mut String, name: &str, group: &InventoryGroup) {
    let _ = writeln!(out, "[{}:vars]", name);
    for (key, value) in &group.vars {
        let _ = writeln!(out, "{}={}", key, encode_value(value));
    }
    out.push('\n');
}

fn host_line(hostname: &str, vars: &HostVars) -> String {
    let mut line = hostname.to_string();
    if let Ok(serde_json::Value::Object(fields)) = serde_json::to_value(vars) {
        for (key, value) in fields {
            let _ = write!(line, " {}={}", key, encode_value(&value));
        }
    }
    line
}

/// Scalars are written bare unless reading them back would change them
fn encode_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => {
            let ambiguous = s.is_empty()
                || s.chars()
                    .any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | '#' | ';'))
                || serde_json::from_str::<serde_json::Value>(s).is_ok();
            if ambiguous {
                serde_json::Value::String(s.clone()).to_string()
            } else {
                s.clone()
            }
        }
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
enum SectionKind {
    Hosts,
    Children,
    Vars,
}

#[derive(Debug)]
struct Section {
    name: String,
    kind: SectionKind,
    line: usize,
    entries: Vec<(usize, String)>,
}

fn split_sections(content: &str) -> Result<Vec<Section>> {
    let mut sections: Vec<Section> = Vec::new();

    for (index, raw) in content.lines().enumerate() {
        let lineno = index + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(header) = line.strip_prefix('[') {
            let header = header
                .strip_suffix(']')
                .ok_or_else(|| parse_error(lineno, "unterminated section header"))?
                .trim();
            let (name, kind) = match header.rsplit_once(':') {
                Some((name, "children")) => (name, SectionKind::Children),
                Some((name, "vars")) => (name, SectionKind::Vars),
                Some((_, suffix)) => {
                    return Err(parse_error(
                        lineno,
                        format!("unknown section suffix ':{}'", suffix),
                    ));
                }
                None => (header, SectionKind::Hosts),
            };
            if name.is_empty() {
                return Err(parse_error(lineno, "empty group name"));
            }
            sections.push(Section {
                name: name.to_string(),
                kind,
                line: lineno,
                entries: Vec::new(),
            });
            continue;
        }

        match sections.last_mut() {
            Some(section) => section.entries.push((lineno, line.to_string())),
            None => return Err(parse_error(lineno, "entry outside of any section")),
        }
    }

    Ok(sections)
}

pub(super) fn parse(content: &str) -> Result<InventoryTree> {
    let sections = split_sections(content)?;

    // Group names in order of first appearance, with the owner that
    // listed them first (None means the root).
    let mut order: Vec<String> = Vec::new();
    let mut owner: HashMap<String, Option<String>> = HashMap::new();
    let mut parents: HashSet<String> = HashSet::new();
    let mut references: Vec<(String, String)> = Vec::new();

    let mut mention = |name: &str, by: Option<&str>, order: &mut Vec<String>| -> bool {
        if name == ROOT_GROUP || owner.contains_key(name) {
            return false;
        }
        owner.insert(name.to_string(), by.map(str::to_string));
        order.push(name.to_string());
        true
    };

    for section in &sections {
        match section.kind {
            SectionKind::Hosts => {
                if section.name == ROOT_GROUP {
                    return Err(parse_error(
                        section.line,
                        format!("root group '{}' cannot own hosts", ROOT_GROUP),
                    ));
                }
                mention(&section.name, None, &mut order);
            }
            SectionKind::Children => {
                mention(&section.name, None, &mut order);
                parents.insert(section.name.clone());
                let by = (section.name != ROOT_GROUP).then_some(section.name.as_str());
                for (lineno, entry) in &section.entries {
                    let child = entry.as_str();
                    if child.split_whitespace().nth(1).is_some() {
                        return Err(parse_error(*lineno, "expected a single group name"));
                    }
                    if child == ROOT_GROUP {
                        return Err(parse_error(*lineno, "the root group cannot be a child"));
                    }
                    // Every group already sits under the root
                    if !mention(child, by, &mut order) && by.is_some() {
                        references.push((section.name.clone(), child.to_string()));
                    }
                }
            }
            SectionKind::Vars => {}
        }
    }

    let mut builder = InventoryBuilder::verbatim();
    for name in &order {
        let parent = owner.get(name).cloned().flatten();
        if parents.contains(name) {
            builder.declare_parent(name, parent.as_deref())?;
        } else {
            builder.declare_leaf(name, parent.as_deref())?;
        }
    }

    for section in sections.iter().filter(|s| s.kind == SectionKind::Hosts) {
        for (lineno, entry) in &section.entries {
            let (hostname, vars) = parse_host_line(*lineno, entry)?;
            let record = vars
                .into_record(&hostname, &section.name)
                .map_err(|message| parse_error(*lineno, message))?;
            builder.insert_record(record)?;
        }
    }

    for (group, target) in &references {
        builder.add_reference(group, target)?;
    }

    for section in sections.iter().filter(|s| s.kind == SectionKind::Vars) {
        for (lineno, entry) in &section.entries {
            let (key, raw) = entry
                .split_once('=')
                .ok_or_else(|| parse_error(*lineno, "expected key=value"))?;
            let value = decode_value(*lineno, raw.trim())?;
            builder.set_var(&section.name, key.trim(), value)?;
        }
    }

    builder.build()
}

fn parse_host_line(lineno: usize, line: &str) -> Result<(String, HostVars)> {
    let mut tokens = tokenize(lineno, line)?.into_iter();
    let hostname = tokens
        .next()
        .ok_or_else(|| parse_error(lineno, "missing hostname"))?;

    let mut fields = serde_json::Map::new();
    for token in tokens {
        let (key, raw) = token
            .split_once('=')
            .ok_or_else(|| parse_error(lineno, format!("expected key=value, got '{}'", token)))?;
        if fields.insert(key.to_string(), decode_value(lineno, raw)?).is_some() {
            return Err(parse_error(
                lineno,
                format!("host '{}' sets '{}' more than once", hostname, key),
            ));
        }
    }

    let vars = serde_json::from_value(serde_json::Value::Object(fields))
        .map_err(|e| parse_error(lineno, format!("host '{}': {}", hostname, e)))?;
    Ok((hostname, vars))
}

/// Split on whitespace outside double quotes
fn tokenize(lineno: usize, line: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut escaped = false;

    for c in line.chars() {
        if quoted {
            current.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                quoted = false;
            }
        } else if c.is_whitespace() {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
        } else {
            if c == '"' {
                quoted = true;
            }
            current.push(c);
        }
    }

    if quoted {
        return Err(parse_error(lineno, "unterminated quoted value"));
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

fn decode_value(lineno: usize, raw: &str) -> Result<serde_json::Value> {
    if raw.starts_with('"') {
        return serde_json::from_str::<String>(raw)
            .map(serde_json::Value::String)
            .map_err(|e| parse_error(lineno, format!("bad quoted value {}: {}", raw, e)));
    }
    Ok(serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string())))
}
