//! Format deploy plans, results, manifests, and facts as text.

use crate::deploy::DeploySequence;
use crate::facts::{ArchiveFacts, InstalledFacts};
use crate::manifest::Manifest;
use crate::ops::{ManifestReport, SideloadResult};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use owo_colors::OwoColorize;

/// Format a section heading with bold/underline. Respects NO_COLOR and TTY.
pub fn format_section_heading(title: &str) -> String {
    format!("{}", title.bold().underline())
}

fn short_hash(hash: &str) -> &str {
    &hash[..hash.len().min(12)]
}

/// Format a deploy sequence as a table of actions.
pub fn format_plan_text(app_name: &str, sequence: &DeploySequence) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{}\n\n",
        format_section_heading(&format!("Deploy plan: {app_name}"))
    ));
    if sequence.is_empty() {
        out.push_str("  Nothing to do; installed content already matches.\n");
        return out;
    }
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Action", "Path"]);
    for action in sequence.iter() {
        table.add_row(vec![action.kind().to_string(), action.path().to_string()]);
    }
    out.push_str(&format!("{table}\n"));
    out.push_str(&format!(
        "  {} extracts, {} removals, {} actions total\n",
        sequence.extract_count(),
        sequence.remove_count(),
        sequence.len()
    ));
    out
}

/// Format a sideload result summary.
pub fn format_result_text(result: &SideloadResult) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{}\n\n",
        format_section_heading(&format!("App: {}", result.app_name))
    ));
    out.push_str(&format!(
        "  Changed: {}\n",
        if result.changed { "yes" } else { "no" }
    ));
    out.push_str(&format!("  Hash: {}...\n", short_hash(&result.hash)));
    out.push_str(&format!("  State file: {}\n", result.state_file));
    out.push_str(&format!(
        "  Files: {} added, {} updated, {} removed, {} unchanged\n",
        result.added, result.updated, result.removed, result.unchanged
    ));
    if let Some(installed_at) = result.installed_at {
        out.push_str(&format!("  Installed at: {installed_at}\n"));
    }
    if let Some(ref files) = result.files {
        out.push_str(&format!("\n{}\n", format_section_heading("Files")));
        for file in files {
            out.push_str(&format!("  {file}\n"));
        }
    }
    out
}

/// Format a manifest as a file table.
pub fn format_manifest_text(manifest: &Manifest) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{}\n\n",
        format_section_heading(&format!("Manifest: {}", manifest.name))
    ));
    out.push_str(&format!("  Hash: {}...\n", short_hash(&manifest.hash)));
    out.push_str(&format!("  Files: {}\n\n", manifest.file_count()));
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Path", "Size", "Mode", "Hash"]);
    for record in manifest.files.values() {
        table.add_row(vec![
            record.path.clone(),
            record.size.to_string(),
            format!("{:o}", record.mode),
            short_hash(&record.hash).to_string(),
        ]);
    }
    out.push_str(&format!("{table}\n"));
    out
}

/// Format a manifest status report.
pub fn format_manifest_report_text(report: &ManifestReport) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{}\n\n",
        format_section_heading("Manifest status")
    ));
    out.push_str(&format!("  App dir: {}\n", report.app_dir));
    out.push_str(&format!("  State file: {}\n", report.state_file));
    out.push_str(&format!("  Status: {}\n", report.status));
    if let Some(ref manifest) = report.manifest {
        out.push('\n');
        out.push_str(&format_manifest_text(manifest));
    }
    out
}

/// Format archive facts.
pub fn format_archive_facts_text(facts: &ArchiveFacts) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{}\n\n",
        format_section_heading(&format!("Archive facts: {}", facts.name))
    ));
    out.push_str(&format!("  Files: {}\n", facts.file_count));
    out.push_str(&format!("  Hash: {}...\n", short_hash(&facts.hash)));
    if facts.local_files.is_empty() {
        out.push_str("  Local files: none\n");
    } else {
        out.push_str(&format!("  Local files: {}\n", facts.local_files.join(", ")));
    }
    out
}

/// Format installed-app facts.
pub fn format_installed_facts_text(facts: &InstalledFacts) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{}\n\n",
        format_section_heading("Installed app facts")
    ));
    out.push_str(&format!("  App dir: {}\n", facts.app_dir));
    out.push_str(&format!("  State: {}\n", facts.state));
    if let Some(ref src_path) = facts.src_path {
        out.push_str(&format!("  Source: {src_path}\n"));
    }
    if let Some(ref src_hash) = facts.src_hash {
        out.push_str(&format!("  Source hash: {}...\n", short_hash(src_hash)));
    }
    if let Some(installed_at) = facts.installed_at {
        out.push_str(&format!("  Installed at: {installed_at}\n"));
    }
    if let Some(ref tool_version) = facts.tool_version {
        out.push_str(&format!("  Tool version: {tool_version}\n"));
    }
    if let Some(file_count) = facts.file_count {
        out.push_str(&format!("  Files: {file_count}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::DeployAction;

    #[test]
    fn empty_plan_renders_noop_message() {
        let text = format_plan_text("app", &DeploySequence::default());
        assert!(text.contains("Nothing to do"));
    }

    #[test]
    fn plan_table_lists_every_action() {
        let sequence = DeploySequence {
            actions: vec![
                DeployAction::EnsureDirectory("default".into()),
                DeployAction::ExtractFile("default/app.conf".into()),
            ],
        };
        let text = format_plan_text("app", &sequence);
        assert!(text.contains("ensure_directory"));
        assert!(text.contains("default/app.conf"));
        assert!(text.contains("1 extracts, 0 removals, 2 actions total"));
    }
}
