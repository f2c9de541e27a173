use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use std::env;
use std::io;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use thiserror::Error;

#[derive(Parser, Debug)]
#[command(name = "drydock", version, about = "Drydock CLI")]
struct Cli {
    #[arg(long, global = true)]
    json: bool,
    #[arg(long, global = true, hide = true)]
    bundle_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Up {
        #[arg(long, value_parser = ["always", "never", "missing"]) ]
        pull: Option<String>,
    },
    Down,
    Build,
    Status,
    Doctor,
}

#[derive(Debug, Error)]
enum DrydockError {
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("process error: {0}")]
    Process(String),
}

#[derive(Debug, Serialize)]
struct JsonResult<T: Serialize> {
    ok: bool,
    result: Option<T>,
    error: Option<String>,
}

#[derive(Debug)]
struct Context {
    bundle_dir: PathBuf,
    json: bool,
}

fn main() -> Result<(), DrydockError> {
    let cli = Cli::parse();
    let ctx = Context {
        bundle_dir: resolve_bundle_dir(cli.bundle_dir.as_ref()),
        json: cli.json,
    };

    let result = match cli.command {
        // A bare invocation refreshes the whole stack.
        None => handle_cycle(&ctx),
        Some(Commands::Up { pull }) => handle_up(&ctx, pull),
        Some(Commands::Down) => handle_down(&ctx),
        Some(Commands::Build) => handle_build(&ctx),
        Some(Commands::Status) => handle_status(&ctx),
        Some(Commands::Doctor) => handle_doctor(&ctx),
    };

    if let Err(err) = result {
        if ctx.json {
            let payload = JsonResult::<serde_json::Value> {
                ok: false,
                result: None,
                error: Some(err.to_string()),
            };
            print_json(&payload)?;
        } else {
            eprintln!("{err}");
        }
        std::process::exit(1);
    }

    Ok(())
}

fn resolve_bundle_dir(override_path: Option<&PathBuf>) -> PathBuf {
    if let Some(path) = override_path {
        return path.clone();
    }
    if let Ok(path) = env::var("DRYDOCK_BUNDLE_DIR") {
        return PathBuf::from(path);
    }
    if let Ok(exe) = env::current_exe() {
        if let Some(dir) = exe.parent() {
            let candidate = dir.to_path_buf();
            if candidate.join("compose.yml").exists() {
                return candidate;
            }
        }
    }
    if let Ok(cwd) = env::current_dir() {
        return cwd;
    }
    PathBuf::from(".")
}

fn require_compose_file(ctx: &Context) -> Result<PathBuf, DrydockError> {
    let compose = ctx.bundle_dir.join("compose.yml");
    if !compose.exists() {
        return Err(DrydockError::Config(format!(
            "missing compose file: {}",
            compose.display()
        )));
    }
    Ok(compose)
}

fn compose_command(ctx: &Context) -> Command {
    let mut cmd = Command::new("docker");
    cmd.arg("compose");
    cmd.current_dir(&ctx.bundle_dir);
    cmd
}

fn cycle_plan() -> Vec<Vec<String>> {
    vec![
        vec!["down".to_string()],
        vec!["build".to_string()],
        vec!["up".to_string(), "-d".to_string()],
    ]
}

fn handle_cycle(ctx: &Context) -> Result<(), DrydockError> {
    require_compose_file(ctx)?;
    for stage in cycle_plan() {
        run_stage(ctx, &stage)?;
    }
    output(ctx, json!({"action": "cycle"}))
}

fn run_stage(ctx: &Context, stage: &[String]) -> Result<(), DrydockError> {
    let mut cmd = compose_command(ctx);
    cmd.args(stage);
    if ctx.json {
        let cmd_output = cmd
            .output()
            .map_err(|err| DrydockError::Process(format!("failed to run command: {err}")))?;
        if !cmd_output.status.success() {
            let stderr = String::from_utf8_lossy(&cmd_output.stderr).trim().to_string();
            return Err(DrydockError::Process(format!(
                "docker compose {} failed with status {}: {}",
                stage.join(" "),
                cmd_output.status,
                stderr
            )));
        }
        return Ok(());
    }
    let status = cmd
        .status()
        .map_err(|err| DrydockError::Process(format!("failed to run command: {err}")))?;
    if !status.success() {
        return Err(DrydockError::Process(format!(
            "docker compose {} failed with status {status}",
            stage.join(" ")
        )));
    }
    Ok(())
}

fn handle_up(ctx: &Context, pull: Option<String>) -> Result<(), DrydockError> {
    require_compose_file(ctx)?;
    let mut cmd = compose_command(ctx);
    cmd.arg("up").arg("-d");
    if let Some(pull) = pull {
        cmd.arg("--pull").arg(pull);
    }
    run_command(ctx, cmd, json!({"action": "up"}))
}

fn handle_down(ctx: &Context) -> Result<(), DrydockError> {
    require_compose_file(ctx)?;
    let mut cmd = compose_command(ctx);
    cmd.arg("down");
    run_command(ctx, cmd, json!({"action": "down"}))
}

fn handle_build(ctx: &Context) -> Result<(), DrydockError> {
    require_compose_file(ctx)?;
    let mut cmd = compose_command(ctx);
    cmd.arg("build");
    run_command(ctx, cmd, json!({"action": "build"}))
}

fn handle_status(ctx: &Context) -> Result<(), DrydockError> {
    require_compose_file(ctx)?;
    let mut cmd = compose_command(ctx);
    cmd.arg("ps").arg("--format").arg("json");
    let output = cmd
        .output()
        .map_err(|err| DrydockError::Process(format!("failed to run docker compose: {err}")))?;
    if !output.status.success() {
        return Err(DrydockError::Process(
            String::from_utf8_lossy(&output.stderr).to_string(),
        ));
    }
    let text = String::from_utf8_lossy(&output.stdout);
    let rows = parse_compose_ps_output(&text);
    if ctx.json {
        let payload = JsonResult {
            ok: true,
            result: Some(rows),
            error: None,
        };
        print_json(&payload)?;
        return Ok(());
    }
    if rows.as_array().map(|a| a.is_empty()).unwrap_or(true) {
        println!("No containers running.");
    } else {
        println!("{}", text.trim());
    }
    Ok(())
}

// `docker compose ps --format json` emits one JSON object per line on newer
// releases and a single array on older ones.
fn parse_compose_ps_output(text: &str) -> serde_json::Value {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(value) if value.is_array() => value,
        Ok(value) => serde_json::Value::Array(vec![value]),
        Err(_) => {
            let mut items = Vec::new();
            for line in text.lines() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if let Ok(value) = serde_json::from_str::<serde_json::Value>(line) {
                    items.push(value);
                }
            }
            serde_json::Value::Array(items)
        }
    }
}

fn handle_doctor(ctx: &Context) -> Result<(), DrydockError> {
    let docker_installed = which::which("docker").is_ok();
    let docker_ok = if docker_installed {
        Command::new("docker")
            .arg("info")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    } else {
        false
    };
    let compose_present = ctx.bundle_dir.join("compose.yml").exists();

    if ctx.json {
        let payload = JsonResult {
            ok: docker_ok && compose_present,
            result: Some(json!({
                "docker_installed": docker_installed,
                "docker_running": docker_ok,
                "compose_file_present": compose_present,
                "bundle_dir": ctx.bundle_dir,
            })),
            error: if docker_ok && compose_present {
                None
            } else if !docker_ok {
                Some("docker is not available".to_string())
            } else {
                Some("compose.yml not found in bundle directory".to_string())
            },
        };
        print_json(&payload)?;
        return Ok(());
    }

    println!(
        "Docker: {}",
        if docker_ok { "ok" } else { "missing or not running" }
    );
    println!(
        "Compose file: {}",
        if compose_present { "present" } else { "missing" }
    );
    if !docker_ok {
        return Err(DrydockError::Process("docker is not available".to_string()));
    }
    if !compose_present {
        return Err(DrydockError::Config(
            "compose.yml not found in bundle directory".to_string(),
        ));
    }
    Ok(())
}

fn run_command(
    ctx: &Context,
    mut cmd: Command,
    json_payload: serde_json::Value,
) -> Result<(), DrydockError> {
    let cmd_output = cmd
        .output()
        .map_err(|err| DrydockError::Process(format!("failed to run command: {err}")))?;
    if !cmd_output.status.success() {
        let stderr = String::from_utf8_lossy(&cmd_output.stderr).trim().to_string();
        let mut message = format!("command failed with status {}", cmd_output.status);
        if !stderr.is_empty() {
            message = format!("{message}: {stderr}");
            let lower = stderr.to_lowercase();
            if lower.contains("denied")
                || lower.contains("unauthorized")
                || lower.contains("authentication")
            {
                message = format!(
                    "{message}\nHint: authenticate with `docker login` for private images."
                );
            }
        }
        return Err(DrydockError::Process(message));
    }
    if !cmd_output.stdout.is_empty() && !ctx.json {
        let stdout = String::from_utf8_lossy(&cmd_output.stdout);
        print!("{stdout}");
    }
    output(ctx, json_payload)
}

fn output(ctx: &Context, payload: serde_json::Value) -> Result<(), DrydockError> {
    if ctx.json {
        let wrapper = JsonResult {
            ok: true,
            result: Some(payload),
            error: None,
        };
        print_json(&wrapper)?;
    } else {
        println!("{}", payload);
    }
    Ok(())
}

fn print_json<T: Serialize>(payload: &T) -> Result<(), DrydockError> {
    let text = serde_json::to_string_pretty(payload)?;
    println!("{}", text);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn cycle_plan_runs_down_build_up_in_order() {
        let plan = cycle_plan();
        assert_eq!(
            plan,
            vec![
                vec!["down".to_string()],
                vec!["build".to_string()],
                vec!["up".to_string(), "-d".to_string()],
            ]
        );
    }

    #[test]
    fn bundle_dir_override_wins() {
        let dir = tempdir().unwrap();
        let resolved = resolve_bundle_dir(Some(&dir.path().to_path_buf()));
        assert_eq!(resolved, dir.path());
    }

    #[test]
    fn missing_compose_file_is_a_config_error() {
        let dir = tempdir().unwrap();
        let ctx = Context {
            bundle_dir: dir.path().to_path_buf(),
            json: true,
        };
        let result = require_compose_file(&ctx);
        assert!(matches!(result, Err(DrydockError::Config(_))));
    }

    #[test]
    fn compose_file_is_resolved_when_present() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("compose.yml"), "services: {}\n").unwrap();
        let ctx = Context {
            bundle_dir: dir.path().to_path_buf(),
            json: true,
        };
        let compose = require_compose_file(&ctx).expect("compose file");
        assert!(compose.ends_with("compose.yml"));
    }

    #[test]
    fn compose_ps_array_output_parses() {
        let rows = parse_compose_ps_output("[{\"Name\":\"svc\"}]");
        assert_eq!(rows.as_array().unwrap().len(), 1);
    }

    #[test]
    fn compose_ps_line_delimited_output_parses() {
        let rows = parse_compose_ps_output("{\"Name\":\"a\"}\n{\"Name\":\"b\"}\n");
        assert_eq!(rows.as_array().unwrap().len(), 2);
    }
}
