use anyhow::Result;

use crate::config::Config;

/// One configured source instance and whether it looks usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceStatus {
    /// `<type>:<name>`, the form `csync sync` accepts.
    pub name: String,
    pub location: String,
    pub status: &'static str,
    pub healthy: bool,
}

/// Every configured source, filesystem instances first, each sorted by name.
pub fn get_sources(config: &Config) -> Vec<SourceStatus> {
    let mut sources = Vec::new();

    for (name, fs) in &config.connectors.filesystem {
        let healthy = fs.root.is_dir();
        sources.push(SourceStatus {
            name: format!("filesystem:{}", name),
            location: fs.root.display().to_string(),
            status: if healthy { "OK" } else { "MISSING ROOT" },
            healthy,
        });
    }

    for (name, git) in &config.connectors.git {
        let healthy = !git.url.trim().is_empty();
        sources.push(SourceStatus {
            name: format!("git:{}", name),
            location: format!("{}#{}", git.url, git.branch),
            status: if healthy { "OK" } else { "NO URL" },
            healthy,
        });
    }

    sources
}

pub fn list_sources(config: &Config) -> Result<()> {
    let sources = get_sources(config);
    if sources.is_empty() {
        println!("No sources configured.");
        return Ok(());
    }

    println!("{:<24} {:<14} {:<8} LOCATION", "SOURCE", "STATUS", "HEALTHY");
    for s in sources {
        println!(
            "{:<24} {:<14} {:<8} {}",
            s.name, s.status, s.healthy, s.location
        );
    }
    Ok(())
}
