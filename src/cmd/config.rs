//! Configuration diagnostics command - `prlens config`.

use std::path::Path;

use anyhow::Result;
use console::style;

use prlens::adapters::{AdapterProvider, HttpAdapterProvider};
use prlens::config::{AppConfig, DEFAULT_CONFIG_FILE, Secret};

fn secret(value: &Secret) -> &'static str {
    if value.is_empty() { "(not set)" } else { "********" }
}

fn or_unset(value: &str) -> &str {
    if value.trim().is_empty() { "(not set)" } else { value }
}

fn check(ok: bool) -> console::StyledObject<&'static str> {
    if ok {
        style("✓").green()
    } else {
        style("✗").red()
    }
}

pub async fn cmd_config(config: &AppConfig, config_path: Option<&Path>) -> Result<()> {
    println!();
    println!("prlens configuration");
    println!("====================");
    println!();

    match config_path {
        Some(path) => println!("Config file: {}", path.display()),
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            println!("Config file: {}", DEFAULT_CONFIG_FILE)
        }
        None => println!("Config file: none (defaults + environment)"),
    }
    println!();

    println!("[server]");
    println!("  host = \"{}\"", config.server.host);
    println!("  port = {}", config.server.port);
    println!();

    println!("[jira]");
    println!("  url = \"{}\"", or_unset(&config.jira.url));
    println!("  email = \"{}\"", or_unset(&config.jira.email));
    println!("  api_token = {}", secret(&config.jira.api_token));
    println!();

    let azdo = &config.azure_devops;
    println!("[azure_devops]");
    println!("  organization = \"{}\"", or_unset(&azdo.organization));
    println!("  project = \"{}\"", or_unset(&azdo.project));
    println!("  pat = {}", secret(&azdo.pat));
    println!("  default_repo = \"{}\"", azdo.default_repo);
    if let Some(base_url) = &azdo.base_url {
        println!("  base_url = \"{}\"", base_url);
    }
    println!("  max_files = {}", azdo.max_files);
    println!();

    let ai = &config.ai;
    println!("[ai]");
    println!("  provider = \"{}\"", ai.provider);
    println!("  model = \"{}\"", ai.model());
    println!("  base_url = \"{}\"", ai.base_url());
    println!("  api_key = {}", secret(&ai.api_key));
    println!();

    println!("Connectivity:");
    let status = HttpAdapterProvider::new(config.clone()).config_status().await;
    println!("  {} Jira", check(status.jira));
    println!("  {} Azure DevOps", check(status.azure_devops));
    match &status.ai_provider {
        Some(provider) => println!("  {} AI ({})", check(true), provider),
        None => println!(
            "  {} AI (set {})",
            check(false),
            style(ai.provider.key_var()).yellow()
        ),
    }
    println!();

    Ok(())
}
