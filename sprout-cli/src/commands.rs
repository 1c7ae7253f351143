//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use crate::RegistryAction;
use sprout_core::config::{load_config, load_config_file};
use sprout_core::{
    Answer, Context, RouteMode, RouteOutcome, SpecialistInvoker, SpecialistRegistry,
    SpecialistRouter, SproutConfig,
};
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Handle a CLI subcommand.
pub async fn handle_command(
    command: Commands,
    workspace: &Path,
    config_path: Option<&Path>,
) -> anyhow::Result<()> {
    match command {
        Commands::Ask {
            query,
            specialists,
            single,
            json,
        } => {
            let config = resolve_config(workspace, config_path)?;
            let invoker = sprout_core::providers::create_invoker(&config.invoker)?;
            let outcome = ask(&config, invoker, &query, route_mode(specialists, single)).await?;
            print!("{}", render_outcome(&outcome, json)?);
            Ok(())
        }
        Commands::Classify { query, specialists } => {
            let config = resolve_config(workspace, config_path)?;
            println!("{}", classify(&config, &query, route_mode(specialists, false))?);
            Ok(())
        }
        Commands::Registry { action } => handle_registry(action, workspace, config_path),
        Commands::Config { action } => handle_config(action, workspace, config_path),
    }
}

/// Explicit config file when given, layered workspace config otherwise.
fn resolve_config(workspace: &Path, config_path: Option<&Path>) -> anyhow::Result<SproutConfig> {
    tracing::debug!(
        workspace = %workspace.display(),
        explicit = config_path.is_some(),
        "Loading configuration"
    );
    let config = match config_path {
        Some(path) => load_config_file(path),
        None => load_config(Some(workspace), None),
    };
    config.map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
}

fn route_mode(specialists: Vec<String>, single: bool) -> RouteMode {
    let specialists: Vec<String> = specialists
        .into_iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect();
    if !specialists.is_empty() {
        RouteMode::Specialists(specialists)
    } else if single {
        RouteMode::ForcedSingle
    } else {
        RouteMode::Auto
    }
}

async fn ask(
    config: &SproutConfig,
    invoker: Arc<dyn SpecialistInvoker>,
    query: &str,
    mode: RouteMode,
) -> anyhow::Result<RouteOutcome> {
    let router = SpecialistRouter::from_config(config, invoker)?;
    Ok(router.route(query, mode, Context::new()).await)
}

fn render_outcome(outcome: &RouteOutcome, json: bool) -> anyhow::Result<String> {
    if json {
        return Ok(format!("{}\n", serde_json::to_string_pretty(outcome)?));
    }

    let mut out = String::new();
    let decision = &outcome.decision;
    writeln!(
        out,
        "[{}] {}",
        decision.mode(),
        decision.chosen_specialists().join(", ")
    )?;
    writeln!(out)?;
    writeln!(out, "{}", outcome.text())?;

    match &outcome.answer {
        Answer::Single(response) if outcome.is_degraded() => {
            writeln!(
                out,
                "\n(low confidence: no validated answer from '{}')",
                response.specialist_id
            )?;
        }
        Answer::Collaborative(report) if !report.missing_domains.is_empty() => {
            let missing: Vec<&str> = report.missing_domains.iter().map(String::as_str).collect();
            writeln!(out, "\n(incomplete: {} did not answer)", missing.join(", "))?;
        }
        _ => {}
    }
    Ok(out)
}

fn classify(config: &SproutConfig, query: &str, mode: RouteMode) -> anyhow::Result<String> {
    let problems = config.routing.validate();
    if !problems.is_empty() {
        anyhow::bail!("Invalid routing configuration: {}", problems.join("; "));
    }
    let registry = config.load_registry()?;
    let details =
        sprout_core::routing::decide(&registry, &config.routing, Uuid::new_v4(), query, &mode);
    Ok(serde_json::to_string_pretty(&details.decision)?)
}

fn handle_registry(
    action: RegistryAction,
    workspace: &Path,
    config_path: Option<&Path>,
) -> anyhow::Result<()> {
    match action {
        RegistryAction::Check { path } => {
            let (registry, source) = match path {
                Some(path) => {
                    let registry = SpecialistRegistry::load(&path)?;
                    (registry, path.display().to_string())
                }
                None => {
                    let config = resolve_config(workspace, config_path)?;
                    let source = config
                        .registry_path
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| "built-in registry".to_string());
                    (config.load_registry()?, source)
                }
            };
            println!(
                "{}: OK ({} specialists, generalist '{}')",
                source,
                registry.len(),
                registry.generalist()
            );
            Ok(())
        }
        RegistryAction::List => {
            let config = resolve_config(workspace, config_path)?;
            let registry = config.load_registry()?;
            print!("{}", render_registry(&registry));
            Ok(())
        }
    }
}

fn render_registry(registry: &SpecialistRegistry) -> String {
    let mut out = format!("Specialists ({}):\n", registry.len());
    let mut profiles: Vec<_> = registry.iter().collect();
    profiles.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
    for profile in profiles {
        let marker = if profile.id == registry.generalist() {
            " (generalist)"
        } else {
            ""
        };
        let _ = writeln!(
            out,
            "  {:<12} {:<20} priority {:>3}{}",
            profile.id,
            profile.name(),
            profile.priority,
            marker
        );
        if !profile.fallback_chain.is_empty() {
            let _ = writeln!(out, "               -> {}", profile.fallback_chain.join(" -> "));
        }
    }
    out
}

fn handle_config(
    action: ConfigAction,
    workspace: &Path,
    config_path: Option<&Path>,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".sprout");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let toml_str = toml::to_string_pretty(&SproutConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = resolve_config(workspace, config_path)?;
            let toml_str = toml::to_string_pretty(&config)?;
            println!("{}", toml_str);
            let problems = config.validate();
            if !problems.is_empty() {
                eprintln!("Configuration problems:");
                for problem in problems {
                    eprintln!("  - {}", problem);
                }
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sprout_core::{InvokeError, MockInvoker};
    use tempfile::TempDir;

    fn specialists(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_route_mode_from_flags() {
        assert_eq!(route_mode(Vec::new(), false), RouteMode::Auto);
        assert_eq!(route_mode(Vec::new(), true), RouteMode::ForcedSingle);
        assert_eq!(
            route_mode(specialists(&[" sleep", "nutrition ", ""]), false),
            RouteMode::Specialists(specialists(&["sleep", "nutrition"]))
        );
        assert_eq!(route_mode(specialists(&[""]), false), RouteMode::Auto);
    }

    #[tokio::test]
    async fn test_config_init_creates_file() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();

        let command = Commands::Config {
            action: ConfigAction::Init,
        };
        handle_command(command, workspace, None).await.unwrap();

        let config_path = workspace.join(".sprout").join("config.toml");
        assert!(config_path.exists());

        let content = std::fs::read_to_string(&config_path).unwrap();
        let parsed: SproutConfig = toml::from_str(&content).unwrap();
        assert_eq!(parsed.routing.max_retries, 2);
        assert_eq!(parsed.invoker.model, "gpt-4o-mini");
    }

    #[tokio::test]
    async fn test_config_init_idempotent() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();

        let command = Commands::Config {
            action: ConfigAction::Init,
        };
        handle_command(command, workspace, None).await.unwrap();

        let config_path = workspace.join(".sprout").join("config.toml");
        std::fs::write(&config_path, "[routing]\nmax_retries = 5\n").unwrap();

        let command = Commands::Config {
            action: ConfigAction::Init,
        };
        handle_command(command, workspace, None).await.unwrap();

        let content = std::fs::read_to_string(&config_path).unwrap();
        assert_eq!(content, "[routing]\nmax_retries = 5\n");
    }

    #[tokio::test]
    async fn test_config_show_defaults() {
        let dir = TempDir::new().unwrap();
        let command = Commands::Config {
            action: ConfigAction::Show,
        };
        assert!(handle_command(command, dir.path(), None).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_explicit_config_is_an_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.toml");
        let command = Commands::Config {
            action: ConfigAction::Show,
        };
        assert!(
            handle_command(command, dir.path(), Some(&missing))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_registry_check_rejects_cycle() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.toml");
        std::fs::write(
            &path,
            r#"
generalist = "g"

[[specialists]]
id = "g"
priority = 1

[[specialists]]
id = "a"
priority = 5
fallback_chain = ["b", "g"]

[[specialists]]
id = "b"
priority = 4
fallback_chain = ["a", "g"]
"#,
        )
        .unwrap();

        let command = Commands::Registry {
            action: RegistryAction::Check { path: Some(path) },
        };
        assert!(handle_command(command, dir.path(), None).await.is_err());
    }

    #[tokio::test]
    async fn test_registry_check_builtin() {
        let dir = TempDir::new().unwrap();
        let command = Commands::Registry {
            action: RegistryAction::Check { path: None },
        };
        assert!(handle_command(command, dir.path(), None).await.is_ok());
    }

    #[test]
    fn test_render_registry_lists_generalist_last() {
        let registry = SpecialistRegistry::builtin().unwrap();
        let rendered = render_registry(&registry);
        assert!(rendered.starts_with(&format!("Specialists ({}):", registry.len())));
        let last_entry = rendered
            .lines()
            .filter(|line| !line.trim_start().starts_with("->"))
            .last()
            .unwrap();
        assert!(last_entry.contains("(generalist)"));
    }

    #[test]
    fn test_classify_forced_query() {
        let config = SproutConfig::default();
        let json = classify(&config, "熱が38度あります", RouteMode::Auto).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["mode"], "forced");
        assert_eq!(value["chosen_specialists"][0], "health");
    }

    #[tokio::test]
    async fn test_ask_renders_single_answer() {
        let invoker = Arc::new(MockInvoker::new().with_reply(
            "nutrition",
            "離乳食は少量から始めて、食べる量より楽しく食べることを大切にしましょう。",
        ));
        let outcome = ask(
            &SproutConfig::default(),
            invoker,
            "離乳食を食べてくれません",
            RouteMode::Auto,
        )
        .await
        .unwrap();

        let text = render_outcome(&outcome, false).unwrap();
        assert!(text.starts_with("[scored] nutrition"));
        assert!(text.contains("離乳食は少量から"));
        assert!(!text.contains("low confidence"));
    }

    #[tokio::test]
    async fn test_ask_drops_unknown_specialists() {
        let invoker = Arc::new(MockInvoker::new());
        let outcome = ask(
            &SproutConfig::default(),
            invoker.clone(),
            "夜泣きがひどいです",
            RouteMode::Specialists(specialists(&["sleep", "astrology"])),
        )
        .await
        .unwrap();

        assert_eq!(outcome.decision.chosen_specialists().to_vec(), vec!["sleep".to_string()]);
        assert_eq!(invoker.called_specialists(), vec!["sleep".to_string()]);
        assert!(
            outcome
                .decision
                .trace()
                .iter()
                .any(|line| line.contains("astrology"))
        );
    }

    #[tokio::test]
    async fn test_ask_flags_missing_domains() {
        let invoker = Arc::new(MockInvoker::new().with_failure(
            "play",
            InvokeError::Remote {
                specialist: "play".into(),
                message: "boom".into(),
            },
        ));
        let outcome = ask(
            &SproutConfig::default(),
            invoker,
            "夜泣きと離乳食と遊びの相談です",
            RouteMode::Specialists(specialists(&["sleep", "nutrition", "play"])),
        )
        .await
        .unwrap();

        let text = render_outcome(&outcome, false).unwrap();
        assert!(text.starts_with("[parallel]"));
        assert!(text.contains("(incomplete: play did not answer)"));

        let json = render_outcome(&outcome, true).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["answer"]["kind"], "collaborative");
        assert_eq!(value["answer"]["missing_domains"][0], "play");
    }
}
