//! Text and JSON presentation of reports, classifications and inventories

use std::net::IpAddr;
use std::path::Path;
use surveyor_core::{
    Classification, DiscoveryReport, Disposition, Encoding, GroupKind, InventoryGroup,
    InventoryStats, InventoryTree,
};

pub fn print_report(report: &DiscoveryReport, path: &Path, encoding: Encoding) {
    println!();
    if report.is_empty() {
        println!("No devices discovered");
    } else {
        println!("Discovered {} devices:", report.classified);
        println!();
        for record in report.tree.hosts() {
            println!(
                "  {:40} {:20} {}",
                record.hostname(),
                record.group(),
                record.profile().os_tag
            );
        }
    }

    println!();
    println!("Range:            {}", report.range);
    println!("Addresses:        {}", report.expanded);
    println!("Live:             {}", report.live);
    println!("Service open:     {}", report.service_open);
    println!(
        "Classified:       {} ({} unknown)",
        report.classified, report.unknown
    );
    println!("Elapsed:          {:.1}s", report.elapsed_secs);
    println!("Inventory:        {} ({})", path.display(), encoding);
}

pub fn report_json(report: &DiscoveryReport, path: &Path, encoding: Encoding) -> serde_json::Value {
    let devices: Vec<_> = report
        .tree
        .hosts()
        .into_iter()
        .map(|record| {
            serde_json::json!({
                "hostname": record.hostname(),
                "address": record.address().to_string(),
                "group": record.group(),
                "os": record.profile().os_tag,
            })
        })
        .collect();

    let dispositions: Vec<_> = report
        .dispositions
        .iter()
        .filter(|(_, d)| *d != Disposition::NotLive)
        .map(|(address, disposition)| {
            serde_json::json!({
                "address": address.to_string(),
                "disposition": disposition,
            })
        })
        .collect();

    serde_json::json!({
        "status": if report.is_empty() { "empty" } else { "ok" },
        "range": report.range.to_string(),
        "counts": {
            "expanded": report.expanded,
            "live": report.live,
            "service_open": report.service_open,
            "classified": report.classified,
            "unknown": report.unknown,
        },
        "devices": devices,
        "live_addresses": dispositions,
        "output": path.display().to_string(),
        "encoding": encoding.as_str(),
        "generated_at": report.generated_at.to_rfc3339(),
        "elapsed_secs": report.elapsed_secs,
    })
}

pub fn classification_line(address: IpAddr, classification: &Classification) -> String {
    let profile = &classification.profile;
    let user = profile
        .credentials
        .as_ref()
        .map(|c| c.username.to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{:39} {:20} {}/{}  {}",
        address.to_string(),
        classification.group.name,
        profile.transport,
        profile.os_tag,
        user
    )
}

pub fn classification_json(address: IpAddr, classification: &Classification) -> serde_json::Value {
    let profile = &classification.profile;
    serde_json::json!({
        "address": address.to_string(),
        "group": classification.group.name,
        "vendor": classification.group.vendor,
        "class": classification.group.class,
        "transport": profile.transport,
        "os": profile.os_tag,
        "uses_tls": profile.uses_tls,
        "api_port": profile.api_port,
        "credentials": profile.credentials.as_ref().map(|c| serde_json::json!({
            "username": c.username,
            "password": c.password,
            "api_token": c.api_token,
        })),
    })
}

/// Group tree in the style of `ansible-inventory --graph`, with overlay
/// references and vars shown inline.
pub fn tree_lines(tree: &InventoryTree) -> Vec<String> {
    let mut lines = Vec::new();
    push_group(tree.root(), 0, &mut lines);
    lines
}

fn push_group(group: &InventoryGroup, depth: usize, lines: &mut Vec<String>) {
    let indent = "  |".repeat(depth);
    let prefix = if depth == 0 { String::new() } else { format!("{}--", indent) };

    let mut header = format!("{}@{}:", prefix, group.name());
    if group.kind() == GroupKind::Overlay {
        header.push_str(&format!(" -> {}", group.references().join(", ")));
    } else if !group.references().is_empty() {
        header.push_str(&format!(" (+ {})", group.references().join(", ")));
    }
    lines.push(header);

    let inner = format!("{}  |--", indent);
    for (key, value) in group.vars() {
        lines.push(format!("{}{} = {}", inner, key, value));
    }
    for record in group.hosts() {
        lines.push(format!("{}{} ({})", inner, record.hostname(), record.address()));
    }
    for child in group.children() {
        push_group(child, depth + 1, lines);
    }
}

pub fn print_stats(stats: &InventoryStats) {
    println!("Hosts:  {}", stats.total_hosts);
    println!("Groups: {}", stats.total_groups);

    println!();
    println!("Hosts per leaf group:");
    for (name, count) in &stats.leaf_groups {
        println!("  {:24} {}", name, count);
    }

    if !stats.overlays.is_empty() {
        println!();
        println!("Overlay groups (resolved hosts):");
        for (name, count) in &stats.overlays {
            println!("  {:24} {}", name, count);
        }
    }

    if !stats.by_os.is_empty() {
        println!();
        println!("Hosts per OS:");
        for (os, count) in &stats.by_os {
            println!("  {:24} {}", os, count);
        }
    }
}
