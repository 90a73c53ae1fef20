//! Command handlers.

use crate::client::ApiClient;
use crate::commands::CacheCommands;
use crate::config::{CliConfig, OutputFormat};
use anyhow::{Context, bail};
use console::style;
use serde_json::Value;
use vigil_core::{ExpirationPolicy, PolicyUpdate, UpdatePolicy, UsageSignals};

/// Run one `vigil caches` subcommand against the API.
pub async fn cache_command(config: &CliConfig, command: CacheCommands) -> anyhow::Result<()> {
    let client = ApiClient::new(config);
    let format = config.output_format;

    match command {
        CacheCommands::List => {
            let caches = client.list().await?;
            match format {
                OutputFormat::Table => print_table(&caches),
                _ => print_value(format, &caches)?,
            }
        }
        CacheCommands::Get { name } => print_value(format, &client.get(&name).await?)?,
        CacheCommands::Status { name } => print_value(format, &client.status(&name).await?)?,
        CacheCommands::Processing { name } => {
            print_value(format, &client.processing(&name).await?)?
        }
        CacheCommands::EnsureFresh { name } => {
            let read = client.ensure_fresh(&name).await?;
            if read["building"].as_bool() == Some(true) {
                println!("{} Build started for {}", style("▶").cyan(), style(&name).bold());
            } else {
                println!("{} {} is fresh", style("✓").green(), style(&name).bold());
            }
        }
        CacheCommands::Refresh { name, wait } => {
            let receipt = client.refresh(&name, wait).await?;
            if receipt["code"] == "already_building" {
                println!("{} {} is already building", style("i").blue(), name);
            } else {
                println!(
                    "{} Refresh started for {} (next allowed after {})",
                    style("✓").green(),
                    style(&name).bold(),
                    receipt["cooldownUntil"].as_str().unwrap_or("-")
                );
            }
        }
        CacheCommands::Cancel { name } => {
            let result = client.cancel(&name).await?;
            if result["cancelled"].as_bool() == Some(true) {
                println!("{} Cancellation requested for {}", style("✓").green(), name);
            } else {
                println!("{} No build running for {}", style("i").blue(), name);
            }
        }
        CacheCommands::Invalidate { name, reason } => {
            client.invalidate(&name, reason.as_deref()).await?;
            println!("{} {} invalidated", style("✓").green(), name);
        }
        CacheCommands::Usage {
            name,
            reads_per_hour,
            mutations,
        } => {
            let usage = UsageSignals {
                reads_per_hour,
                source_mutations: mutations,
            };
            client.report_usage(&name, &usage).await?;
            println!("{} Usage recorded for {}", style("✓").green(), name);
        }
        CacheCommands::Policy {
            name,
            all,
            update_policy,
            expiration,
            auto_refresh,
        } => {
            if name.is_none() && !all {
                bail!("name a cache or pass --all");
            }
            let update = policy_update(update_policy.as_deref(), expiration.as_deref(), auto_refresh)?;
            let result = client.set_policy(name.as_deref(), &update).await?;
            println!(
                "{} Policy updated on {} cache(s)",
                style("✓").green(),
                result["changed"].as_u64().unwrap_or(0)
            );
        }
        CacheCommands::Initialize => {
            let entries = client.initialize().await?;
            println!(
                "{} {} cache(s) registered",
                style("✓").green(),
                entries.as_array().map(Vec::len).unwrap_or(0)
            );
        }
        CacheCommands::Reset { name } => {
            client.reset(&name).await?;
            println!("{} {} reset", style("✓").green(), name);
        }
        CacheCommands::Errors { name, limit } => {
            let errors = client.errors(&name, limit).await?;
            match format {
                OutputFormat::Table => {
                    for e in errors.as_array().into_iter().flatten() {
                        println!(
                            "{}  {:<22} {}",
                            style(e["occurredAt"].as_str().unwrap_or("-")).dim(),
                            e["kind"].as_str().unwrap_or("-"),
                            e["message"].as_str().unwrap_or("")
                        );
                    }
                }
                _ => print_value(format, &errors)?,
            }
        }
    }
    Ok(())
}

/// Build a policy change from command-line strings.
pub fn policy_update(
    update_policy: Option<&str>,
    expiration: Option<&str>,
    auto_refresh: Option<bool>,
) -> anyhow::Result<PolicyUpdate> {
    let update_policy = update_policy
        .map(|p| serde_json::from_value::<UpdatePolicy>(Value::String(p.to_string())))
        .transpose()
        .context("unknown update policy")?;
    let expiration_policy = expiration
        .map(str::parse::<ExpirationPolicy>)
        .transpose()?;

    let update = PolicyUpdate {
        update_policy,
        expiration_policy,
        auto_refresh,
    };
    if update.is_empty() {
        bail!("nothing to change: pass --update-policy, --expiration or --auto-refresh");
    }
    Ok(update)
}

fn print_value(format: OutputFormat, value: &Value) -> anyhow::Result<()> {
    match format {
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
        OutputFormat::Json | OutputFormat::Table => {
            println!("{}", serde_json::to_string_pretty(value)?)
        }
    }
    Ok(())
}

fn print_table(caches: &Value) {
    println!(
        "{:<28} {:<16} {:<9} {:<8} {:>10} {:>6}",
        style("NAME").bold(),
        style("TYPE").bold(),
        style("STATUS").bold(),
        style("HEALTH").bold(),
        style("RECORDS").bold(),
        style("STALE").bold()
    );
    for c in caches.as_array().into_iter().flatten() {
        let status = c["status"].as_str().unwrap_or("-");
        let styled = match status {
            "active" => style(status).green(),
            "building" => style(status).cyan(),
            "error" => style(status).red(),
            _ => style(status).yellow(),
        };
        println!(
            "{:<28} {:<16} {:<9} {:<8} {:>10} {:>6}",
            c["name"].as_str().unwrap_or("-"),
            c["entityType"].as_str().unwrap_or("-"),
            styled,
            c["health"].as_str().unwrap_or("-"),
            c["recordCount"].as_u64().unwrap_or(0),
            c["stale"].as_bool().unwrap_or(false)
        );
    }
}

/// Show current configuration.
pub fn show_config(config: &CliConfig) -> anyhow::Result<()> {
    println!("{}", style("Vigil CLI configuration").bold());
    println!("  file:          {}", CliConfig::config_path()?.display());
    println!("  api_url:       {}", config.api_url);
    println!("  role:          {}", config.role.as_deref().unwrap_or("-"));
    println!("  user:          {}", config.user.as_deref().unwrap_or("-"));
    println!("  output_format: {:?}", config.output_format);
    Ok(())
}

/// Set a configuration value and persist it.
pub fn set_config(key: &str, value: &str) -> anyhow::Result<()> {
    let mut config = CliConfig::load()?;
    config.set(key, value)?;
    config.save()?;
    println!("{} Set {} = {}", style("✓").green(), key, value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_update_parsing() {
        let update = policy_update(Some("once_a_day"), Some("45"), None).unwrap();
        assert_eq!(update.update_policy, Some(UpdatePolicy::OnceADay));
        assert_eq!(update.expiration_policy, Some(ExpirationPolicy::TtlMinutes(45)));

        let update = policy_update(None, Some("never"), Some(false)).unwrap();
        assert_eq!(update.expiration_policy, Some(ExpirationPolicy::Never));
        assert_eq!(update.auto_refresh, Some(false));

        assert!(policy_update(Some("hourly"), None, None).is_err());
        assert!(policy_update(None, Some("0"), None).is_err());
        assert!(policy_update(None, None, None).is_err());
    }
}
