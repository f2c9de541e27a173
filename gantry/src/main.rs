use chrono::Utc;
use clap::{Parser, Subcommand};
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Input};
use dirs::home_dir;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::env;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::io;
use std::io::IsTerminal;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

const DEFAULT_CONFIG_YAML: &str = include_str!("../config/default.yaml");
const PACKAGED_MODE_ENV: &str = "GANTRY_PACKAGED";

#[derive(Parser, Debug)]
#[command(name = "gantry", version, about = "Gantry CLI")]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Up {
        #[arg(long)]
        repo_url: Option<String>,
        #[arg(long)]
        repo_dir: Option<PathBuf>,
        #[arg(long, default_value_t = false, hide = true)]
        packaged: bool,
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    Setup {
        #[arg(long, default_value_t = false)]
        defaults: bool,
        #[arg(long, default_value_t = false)]
        yes: bool,
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    Doctor {
        #[arg(long, default_value_t = false)]
        strict: bool,
    },
    Paths,
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    Init,
    Edit,
    Validate,
}

#[derive(Debug, Error)]
enum GantryError {
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("prompt error: {0}")]
    Prompt(#[from] dialoguer::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("fetch error: {0}")]
    Fetch(String),
    #[error("persist error: {0}")]
    Persist(String),
    #[error("process error: {0}")]
    Process(String),
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
struct Config {
    version: u32,
    repository: Repository,
    server: Server,
    proxy: Proxy,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
struct Repository {
    url: String,
    dir_name: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
struct Server {
    name: String,
    runner: String,
    entry_script: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
struct Proxy {
    program: String,
    extra_args: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            repository: Repository::default(),
            server: Server::default(),
            proxy: Proxy::default(),
        }
    }
}

impl Default for Repository {
    fn default() -> Self {
        Self {
            url: "https://github.com/nsourlos/MCP_git_repo_to_single_file/".to_string(),
            dir_name: "MCP_git_repo_to_single_file".to_string(),
        }
    }
}

impl Default for Server {
    fn default() -> Self {
        Self {
            name: "git-files-server".to_string(),
            runner: "uv".to_string(),
            entry_script: "server.py".to_string(),
        }
    }
}

impl Default for Proxy {
    fn default() -> Self {
        Self {
            program: "mcpo".to_string(),
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize)]
struct JsonResult<T: Serialize> {
    ok: bool,
    result: Option<T>,
    error: Option<String>,
}

#[derive(Debug, Clone)]
struct Context {
    config_path: PathBuf,
    json: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
struct LaunchTarget {
    command: String,
    args: Vec<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
struct LaunchConfiguration {
    #[serde(rename = "mcpServers")]
    servers: BTreeMap<String, LaunchTarget>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LastRunState {
    run_id: String,
    started_at: String,
    repo_dir: String,
    launch_config_path: String,
}

#[derive(Debug, Clone)]
struct BootstrapOptions {
    repo_url: String,
    repo_dir: PathBuf,
    packaged: bool,
    dry_run: bool,
}

#[derive(Debug, Clone)]
struct BootstrapOutcome {
    repo_dir: PathBuf,
    launch_config_path: PathBuf,
    search_path: OsString,
    handed_off: bool,
}

#[derive(Debug, Clone)]
struct CommandOutput {
    status_code: i32,
    stderr: Vec<u8>,
}

impl CommandOutput {
    fn success(&self) -> bool {
        self.status_code == 0
    }
}

trait GitRunner {
    fn run(&self, args: &[String], search_path: &OsStr) -> Result<CommandOutput, io::Error>;
}

struct RealGitRunner;

impl GitRunner for RealGitRunner {
    fn run(&self, args: &[String], search_path: &OsStr) -> Result<CommandOutput, io::Error> {
        let output = Command::new("git")
            .args(args)
            .env("PATH", search_path)
            .output()?;
        let status_code = output
            .status
            .code()
            .unwrap_or(if output.status.success() { 0 } else { 1 });
        Ok(CommandOutput {
            status_code,
            stderr: output.stderr,
        })
    }
}

#[derive(Debug, Clone)]
struct ProxyInvocation {
    program: String,
    config_path: PathBuf,
    extra_args: Vec<String>,
    search_path: OsString,
}

impl ProxyInvocation {
    fn argv(&self) -> Vec<String> {
        let mut argv = vec![
            self.program.clone(),
            "--config".to_string(),
            self.config_path.to_string_lossy().to_string(),
        ];
        argv.extend(self.extra_args.iter().cloned());
        argv
    }

    fn rendered(&self) -> String {
        self.argv().join(" ")
    }
}

trait ProxyLauncher {
    fn launch(&self, invocation: &ProxyInvocation) -> Result<(), GantryError>;
}

struct RealProxyLauncher;

impl ProxyLauncher for RealProxyLauncher {
    fn launch(&self, invocation: &ProxyInvocation) -> Result<(), GantryError> {
        let mut cmd = Command::new(&invocation.program);
        cmd.arg("--config").arg(&invocation.config_path);
        cmd.args(&invocation.extra_args);
        cmd.env("PATH", &invocation.search_path);
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Replaces the process image; only reached again on failure.
            let err = cmd.exec();
            Err(GantryError::Process(format!(
                "failed to hand off to {}: {}",
                invocation.program, err
            )))
        }
        #[cfg(not(unix))]
        {
            let status = cmd.status().map_err(|err| {
                GantryError::Process(format!(
                    "failed to start {}: {}",
                    invocation.program, err
                ))
            })?;
            if !status.success() {
                std::process::exit(status.code().unwrap_or(1));
            }
            Ok(())
        }
    }
}

fn main() -> Result<(), GantryError> {
    let cli = Cli::parse();
    let ctx = build_context(&cli);
    let runner = RealGitRunner;
    let launcher = RealProxyLauncher;

    let command = cli.command.unwrap_or(Commands::Up {
        repo_url: None,
        repo_dir: None,
        packaged: false,
        dry_run: false,
    });

    let result = match command {
        Commands::Up {
            repo_url,
            repo_dir,
            packaged,
            dry_run,
        } => handle_up(&ctx, repo_url, repo_dir, packaged, dry_run, &runner, &launcher),
        Commands::Config { command } => handle_config(&ctx, command),
        Commands::Setup {
            defaults,
            yes,
            dry_run,
        } => handle_setup(&ctx, defaults, yes, dry_run),
        Commands::Doctor { strict } => handle_doctor(&ctx, strict),
        Commands::Paths => handle_paths(&ctx),
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
        completion_notice("run aborted");
        std::process::exit(1);
    }

    completion_notice("run complete");
    Ok(())
}

fn build_context(cli: &Cli) -> Context {
    Context {
        config_path: resolve_config_path(cli.config.as_ref()),
        json: cli.json,
    }
}

fn completion_notice(message: &str) {
    eprintln!("gantry: {message}");
}

fn resolve_config_path(override_path: Option<&PathBuf>) -> PathBuf {
    if let Some(path) = override_path {
        return path.clone();
    }
    if let Ok(path) = env::var("GANTRY_CONFIG") {
        return PathBuf::from(path);
    }
    let mut base = default_config_dir();
    base.push("config.yaml");
    base
}

fn default_config_dir() -> PathBuf {
    if let Ok(path) = env::var("GANTRY_CONFIG_DIR") {
        return PathBuf::from(path);
    }
    let mut base = home_dir().unwrap_or_else(|| PathBuf::from("."));
    base.push(".config");
    base.push("gantry");
    base
}

fn config_dir_from_path(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .map_or_else(default_config_dir, PathBuf::from)
}

fn ensure_parent(path: &Path) -> Result<(), GantryError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn read_config_from_str(content: &str) -> Result<Config, GantryError> {
    let cfg: Config = serde_yaml::from_str(content)?;
    if cfg.version != 1 {
        return Err(GantryError::Config(format!(
            "unsupported config version {}",
            cfg.version
        )));
    }
    validate_config(&cfg)?;
    Ok(cfg)
}

fn read_config(path: &Path) -> Result<Config, GantryError> {
    let content = fs::read_to_string(path)?;
    read_config_from_str(&content)
}

fn read_config_or_default(path: &Path) -> Result<Config, GantryError> {
    if !path.exists() {
        return Ok(Config::default());
    }
    read_config(path)
}

fn validate_config(cfg: &Config) -> Result<(), GantryError> {
    if cfg.repository.url.trim().is_empty() {
        return Err(GantryError::Config(
            "repository.url must be non-empty".to_string(),
        ));
    }
    let dir_name = cfg.repository.dir_name.trim();
    if dir_name.is_empty() {
        return Err(GantryError::Config(
            "repository.dir_name must be non-empty".to_string(),
        ));
    }
    if dir_name.contains('/') || dir_name.contains('\\') {
        return Err(GantryError::Config(
            "repository.dir_name must be a single path component".to_string(),
        ));
    }
    if cfg.server.name.trim().is_empty() {
        return Err(GantryError::Config(
            "server.name must be non-empty".to_string(),
        ));
    }
    if cfg.server.runner.trim().is_empty() {
        return Err(GantryError::Config(
            "server.runner must be non-empty".to_string(),
        ));
    }
    if cfg.server.entry_script.trim().is_empty() {
        return Err(GantryError::Config(
            "server.entry_script must be non-empty".to_string(),
        ));
    }
    if cfg.proxy.program.trim().is_empty() {
        return Err(GantryError::Config(
            "proxy.program must be non-empty".to_string(),
        ));
    }
    Ok(())
}

fn packaged_mode_enabled() -> bool {
    match env::var(PACKAGED_MODE_ENV) {
        Ok(value) => matches!(value.as_str(), "1" | "true" | "yes"),
        Err(_) => false,
    }
}

fn packaged_path_candidates() -> Vec<PathBuf> {
    let mut candidates = vec![
        PathBuf::from("/opt/homebrew/bin"),
        PathBuf::from("/usr/local/bin"),
        PathBuf::from("/usr/bin"),
        PathBuf::from("/bin"),
    ];
    // Drive-letter paths contain ':' and cannot be joined into a unix PATH.
    if cfg!(windows) {
        let program_files = env::var_os("ProgramFiles")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("C:\\Program Files"));
        candidates.push(program_files.join("Git").join("bin"));
    }
    candidates
}

fn effective_search_path(packaged: bool, inherited: Option<OsString>) -> OsString {
    let inherited = inherited.unwrap_or_default();
    if !packaged {
        return inherited;
    }
    let existing: Vec<PathBuf> = env::split_paths(&inherited).collect();
    let mut merged: Vec<PathBuf> = Vec::new();
    for candidate in packaged_path_candidates() {
        if !existing.contains(&candidate) && !merged.contains(&candidate) {
            merged.push(candidate);
        }
    }
    merged.extend(existing);
    match env::join_paths(merged) {
        Ok(joined) => joined,
        Err(_) => inherited,
    }
}

fn resolve_repo_dir(dir: &Path) -> Result<PathBuf, GantryError> {
    if dir.is_absolute() {
        return Ok(dir.to_path_buf());
    }
    Ok(env::current_dir()?.join(dir))
}

fn ensure_local_copy<R: GitRunner>(
    ctx: &Context,
    runner: &R,
    source_url: &str,
    target_dir: &Path,
    search_path: &OsStr,
) -> Result<PathBuf, GantryError> {
    let dest = resolve_repo_dir(target_dir)?;
    if dest.exists() {
        if !ctx.json {
            println!("Repository already present at {}", dest.display());
        }
        return Ok(dest);
    }

    if !ctx.json {
        println!("Cloning {} into {}...", source_url, dest.display());
    }
    let args = vec![
        "clone".to_string(),
        source_url.to_string(),
        dest.to_string_lossy().to_string(),
    ];
    let output = runner.run(&args, search_path).map_err(|err| {
        if err.kind() == io::ErrorKind::NotFound {
            GantryError::Fetch(
                "git was not found on the effective search path".to_string(),
            )
        } else {
            GantryError::Fetch(format!("failed to start git clone: {err}"))
        }
    })?;
    if !output.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let mut message = format!(
            "git clone of {} failed with status {}",
            source_url, output.status_code
        );
        if !stderr.is_empty() {
            message = format!("{message}: {stderr}");
        }
        return Err(GantryError::Fetch(message));
    }
    Ok(dest)
}

fn build_launch_config(cfg: &Config, repo_dir: &Path) -> LaunchConfiguration {
    let target = LaunchTarget {
        command: cfg.server.runner.clone(),
        args: vec![
            "--directory".to_string(),
            repo_dir.to_string_lossy().to_string(),
            "run".to_string(),
            cfg.server.entry_script.clone(),
        ],
        env: BTreeMap::new(),
    };
    let mut servers = BTreeMap::new();
    servers.insert(cfg.server.name.clone(), target);
    LaunchConfiguration { servers }
}

fn persist_launch_config(config: &LaunchConfiguration) -> Result<PathBuf, GantryError> {
    let body = serde_json::to_string_pretty(config)?;
    let mut file = tempfile::Builder::new()
        .prefix("gantry-launch-")
        .suffix(".json")
        .tempfile()
        .map_err(|err| {
            GantryError::Persist(format!("failed to create launch config file: {err}"))
        })?;
    file.write_all(body.as_bytes())
        .and_then(|_| file.flush())
        .and_then(|_| file.as_file().sync_all())
        .map_err(|err| {
            GantryError::Persist(format!("failed to write launch config: {err}"))
        })?;
    // The downstream proxy reopens the file by path; it must outlive our handle.
    let (_file, path) = file.keep().map_err(|err| {
        GantryError::Persist(format!("failed to retain launch config file: {err}"))
    })?;
    Ok(path)
}

fn last_run_state_path(config_dir: &Path) -> PathBuf {
    config_dir.join(".last_run.json")
}

fn run_id_from_now() -> String {
    format!("gantry__{}", Utc::now().format("%Y_%m_%d_%H_%M_%S"))
}

fn write_last_run_state(config_dir: &Path, state: &LastRunState) -> Result<(), GantryError> {
    fs::create_dir_all(config_dir)?;
    let path = last_run_state_path(config_dir);
    let tmp_path = path.with_extension("json.tmp");
    let body = serde_json::to_string_pretty(state)?;
    fs::write(&tmp_path, format!("{body}\n"))?;
    fs::rename(&tmp_path, &path)?;
    Ok(())
}

fn load_last_run_state(config_dir: &Path) -> Result<Option<LastRunState>, GantryError> {
    let path = last_run_state_path(config_dir);
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path)?;
    let parsed: LastRunState = serde_json::from_str(&content)?;
    Ok(Some(parsed))
}

fn run_bootstrap<R: GitRunner, L: ProxyLauncher>(
    ctx: &Context,
    cfg: &Config,
    opts: &BootstrapOptions,
    runner: &R,
    launcher: &L,
) -> Result<BootstrapOutcome, GantryError> {
    let search_path = effective_search_path(opts.packaged, env::var_os("PATH"));
    let repo_dir = ensure_local_copy(ctx, runner, &opts.repo_url, &opts.repo_dir, &search_path)?;
    let launch = build_launch_config(cfg, &repo_dir);
    let config_path = persist_launch_config(&launch)?;
    if !ctx.json {
        println!("Wrote launch config to {}", config_path.display());
    }

    if opts.dry_run {
        return Ok(BootstrapOutcome {
            repo_dir,
            launch_config_path: config_path,
            search_path,
            handed_off: false,
        });
    }

    let state = LastRunState {
        run_id: run_id_from_now(),
        started_at: Utc::now().to_rfc3339(),
        repo_dir: repo_dir.to_string_lossy().to_string(),
        launch_config_path: config_path.to_string_lossy().to_string(),
    };
    write_last_run_state(&config_dir_from_path(&ctx.config_path), &state)?;

    let invocation = ProxyInvocation {
        program: cfg.proxy.program.clone(),
        config_path: config_path.clone(),
        extra_args: cfg.proxy.extra_args.clone(),
        search_path: search_path.clone(),
    };
    if !ctx.json {
        println!("Handing off: {}", invocation.rendered());
    }
    completion_notice("bootstrap complete; handing off");
    launcher.launch(&invocation)?;

    Ok(BootstrapOutcome {
        repo_dir,
        launch_config_path: config_path,
        search_path,
        handed_off: true,
    })
}

fn handle_up<R: GitRunner, L: ProxyLauncher>(
    ctx: &Context,
    repo_url: Option<String>,
    repo_dir: Option<PathBuf>,
    packaged: bool,
    dry_run: bool,
    runner: &R,
    launcher: &L,
) -> Result<(), GantryError> {
    let cfg = read_config_or_default(&ctx.config_path)?;
    let opts = BootstrapOptions {
        repo_url: repo_url.unwrap_or_else(|| cfg.repository.url.clone()),
        repo_dir: repo_dir.unwrap_or_else(|| PathBuf::from(&cfg.repository.dir_name)),
        packaged: packaged || packaged_mode_enabled(),
        dry_run,
    };
    let outcome = run_bootstrap(ctx, &cfg, &opts, runner, launcher)?;
    output(
        ctx,
        json!({
            "action": "up",
            "dry_run": opts.dry_run,
            "repo_dir": outcome.repo_dir,
            "launch_config_path": outcome.launch_config_path,
            "search_path": outcome.search_path.to_string_lossy(),
            "handed_off": outcome.handed_off,
        }),
    )
}

fn handle_config(ctx: &Context, command: ConfigCommand) -> Result<(), GantryError> {
    match command {
        ConfigCommand::Init => {
            if ctx.config_path.exists() {
                return output(ctx, json!({"path": ctx.config_path, "created": false}));
            }
            ensure_parent(&ctx.config_path)?;
            fs::write(&ctx.config_path, DEFAULT_CONFIG_YAML)?;
            output(ctx, json!({"path": ctx.config_path, "created": true}))
        }
        ConfigCommand::Edit => {
            if !ctx.config_path.exists() {
                ensure_parent(&ctx.config_path)?;
                fs::write(&ctx.config_path, DEFAULT_CONFIG_YAML)?;
            }
            let editor = env::var("VISUAL").ok().or_else(|| env::var("EDITOR").ok());
            if let Some(editor) = editor {
                let status = Command::new(editor)
                    .arg(&ctx.config_path)
                    .status()
                    .map_err(|err| {
                        GantryError::Process(format!("failed to launch editor: {err}"))
                    })?;
                if !status.success() {
                    return Err(GantryError::Process("editor exited with error".to_string()));
                }
                output(ctx, json!({"path": ctx.config_path}))
            } else {
                Err(GantryError::Process(
                    "EDITOR is not set; please edit the config file manually".to_string(),
                ))
            }
        }
        ConfigCommand::Validate => {
            let _cfg = read_config(&ctx.config_path)?;
            output(ctx, json!({"path": ctx.config_path, "valid": true}))
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct SetupPlan {
    config_path: String,
    created: bool,
    updated: bool,
    dry_run: bool,
}

fn handle_setup(
    ctx: &Context,
    defaults: bool,
    yes: bool,
    dry_run: bool,
) -> Result<(), GantryError> {
    if ctx.json && !defaults {
        return Err(GantryError::Process(
            "--json is only supported with `gantry setup --defaults`".to_string(),
        ));
    }
    if !defaults && !io::stdin().is_terminal() {
        return Err(GantryError::Process(
            "interactive setup requires a TTY; re-run with `--defaults` for non-interactive mode"
                .to_string(),
        ));
    }

    let config_exists = ctx.config_path.exists();
    let mut cfg = if config_exists {
        read_config(&ctx.config_path)?
    } else {
        Config::default()
    };

    if !defaults {
        let theme = ColorfulTheme::default();
        cfg.repository.url = Input::with_theme(&theme)
            .with_prompt("Repository URL")
            .default(cfg.repository.url.clone())
            .interact_text()?;
        cfg.repository.dir_name = Input::with_theme(&theme)
            .with_prompt("Clone directory name")
            .default(cfg.repository.dir_name.clone())
            .interact_text()?;
        cfg.server.runner = Input::with_theme(&theme)
            .with_prompt("Package runner")
            .default(cfg.server.runner.clone())
            .interact_text()?;
        cfg.proxy.program = Input::with_theme(&theme)
            .with_prompt("Proxy program")
            .default(cfg.proxy.program.clone())
            .interact_text()?;
    }
    validate_config(&cfg)?;

    let plan = SetupPlan {
        config_path: ctx.config_path.to_string_lossy().to_string(),
        created: !config_exists,
        updated: config_exists,
        dry_run,
    };
    if dry_run {
        return output(ctx, serde_json::to_value(&plan)?);
    }

    if config_exists && !yes && !defaults {
        let proceed = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(format!(
                "Overwrite existing config at {}?",
                ctx.config_path.display()
            ))
            .default(false)
            .interact()?;
        if !proceed {
            return output(
                ctx,
                json!({"config_path": plan.config_path, "updated": false}),
            );
        }
    }

    let body = serde_yaml::to_string(&cfg)?;
    write_atomic_text_file(&ctx.config_path, &body)?;
    output(ctx, serde_json::to_value(&plan)?)
}

fn write_atomic_text_file(path: &Path, content: &str) -> Result<(), GantryError> {
    ensure_parent(path)?;
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, content)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
struct DoctorCheck {
    id: String,
    ok: bool,
    severity: String,
    strict_fail: bool,
    message: String,
    remediation: String,
    details: serde_json::Value,
}

fn doctor_check(
    id: &str,
    ok: bool,
    severity: &str,
    strict_fail: bool,
    message: impl Into<String>,
    remediation: impl Into<String>,
    details: serde_json::Value,
) -> DoctorCheck {
    DoctorCheck {
        id: id.to_string(),
        ok,
        severity: severity.to_string(),
        strict_fail,
        message: message.into(),
        remediation: remediation.into(),
        details,
    }
}

fn tool_resolvable(tool: &str, search_path: &OsStr) -> bool {
    let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    which::which_in(tool, Some(search_path), cwd).is_ok()
}

fn temp_area_writable() -> bool {
    let test_path = env::temp_dir().join(".gantry_write_test");
    fs::write(&test_path, b"ok")
        .and_then(|_| fs::remove_file(&test_path))
        .is_ok()
}

fn collect_doctor_checks(cfg: &Config) -> Result<Vec<DoctorCheck>, GantryError> {
    let mut checks = Vec::new();
    let search_path = effective_search_path(packaged_mode_enabled(), env::var_os("PATH"));

    let git_ok = tool_resolvable("git", &search_path);
    checks.push(doctor_check(
        "git_client",
        git_ok,
        "error",
        true,
        if git_ok {
            "git is resolvable on the effective search path"
        } else {
            "git is not resolvable on the effective search path"
        },
        "Install git or extend PATH so the clone step can run.",
        json!({}),
    ));

    let runner_ok = tool_resolvable(&cfg.server.runner, &search_path);
    checks.push(doctor_check(
        "package_runner",
        runner_ok,
        "error",
        true,
        if runner_ok {
            format!("{} is resolvable on the effective search path", cfg.server.runner)
        } else {
            format!(
                "{} is not resolvable on the effective search path",
                cfg.server.runner
            )
        },
        format!(
            "Install {} so the proxy can start the launched server.",
            cfg.server.runner
        ),
        json!({"runner": cfg.server.runner}),
    ));

    let proxy_ok = tool_resolvable(&cfg.proxy.program, &search_path);
    checks.push(doctor_check(
        "proxy_program",
        proxy_ok,
        "error",
        true,
        if proxy_ok {
            format!("{} is resolvable on the effective search path", cfg.proxy.program)
        } else {
            format!(
                "{} is not resolvable on the effective search path",
                cfg.proxy.program
            )
        },
        format!("Install {} before handing off.", cfg.proxy.program),
        json!({"program": cfg.proxy.program}),
    ));

    let temp_ok = temp_area_writable();
    checks.push(doctor_check(
        "temp_area_writable",
        temp_ok,
        "error",
        true,
        if temp_ok {
            "temporary file area is writable"
        } else {
            "temporary file area is not writable"
        },
        format!(
            "Ensure {} is writable; the launch config is persisted there.",
            env::temp_dir().display()
        ),
        json!({"temp_dir": env::temp_dir()}),
    ));

    let repo_dir = resolve_repo_dir(Path::new(&cfg.repository.dir_name))?;
    let repo_present = repo_dir.exists();
    checks.push(doctor_check(
        "repository_materialized",
        repo_present,
        "warn",
        false,
        if repo_present {
            "server repository is already materialized"
        } else {
            "server repository is absent and will be cloned on first up"
        },
        format!("Run `gantry up` to clone into {}.", repo_dir.display()),
        json!({"repo_dir": repo_dir}),
    ));

    checks.push(doctor_check(
        "config_schema_compatibility",
        cfg.version == 1,
        "error",
        true,
        if cfg.version == 1 {
            "config schema version is compatible"
        } else {
            "config schema version is incompatible"
        },
        "Set `version: 1` in config.yaml.",
        json!({"config_version": cfg.version}),
    ));

    Ok(checks)
}

fn handle_doctor(ctx: &Context, strict: bool) -> Result<(), GantryError> {
    let cfg = read_config_or_default(&ctx.config_path)?;
    let checks = collect_doctor_checks(&cfg)?;
    let has_error = checks
        .iter()
        .any(|check| !check.ok && check.severity == "error");
    let has_strict_warning = checks.iter().any(|check| !check.ok && check.strict_fail);
    let ok = !has_error && (!strict || !has_strict_warning);
    let primary_error = checks
        .iter()
        .find(|check| !check.ok && check.severity == "error")
        .or_else(|| checks.iter().find(|check| !check.ok))
        .map(|check| check.message.clone());

    if ctx.json {
        let payload = JsonResult {
            ok,
            result: Some(json!({ "checks": checks, "strict": strict })),
            error: if ok { None } else { primary_error },
        };
        print_json(&payload)?;
        return Ok(());
    }

    for check in &checks {
        let state = if check.ok { "ok" } else { "fail" };
        println!(
            "[{}] {} ({}) - {}",
            state, check.id, check.severity, check.message
        );
        if !check.ok {
            println!("  remediation: {}", check.remediation);
        }
    }
    if ok {
        return Ok(());
    }
    if strict && has_strict_warning && !has_error {
        return Err(GantryError::Process("doctor strict mode failed".to_string()));
    }
    Err(GantryError::Process(
        primary_error.unwrap_or_else(|| "one or more readiness checks failed".to_string()),
    ))
}

fn handle_paths(ctx: &Context) -> Result<(), GantryError> {
    let cfg = read_config_or_default(&ctx.config_path)?;
    let config_dir = config_dir_from_path(&ctx.config_path);
    let repo_dir = resolve_repo_dir(Path::new(&cfg.repository.dir_name))?;
    let state_path = last_run_state_path(&config_dir);
    let last_run = load_last_run_state(&config_dir)?;
    output(
        ctx,
        json!({
            "config_dir": config_dir,
            "config_path": ctx.config_path,
            "config_exists": ctx.config_path.exists(),
            "repo_dir": repo_dir,
            "last_run_state": state_path,
            "last_run": last_run,
            "temp_dir": env::temp_dir(),
        }),
    )
}

fn output(ctx: &Context, payload: serde_json::Value) -> Result<(), GantryError> {
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

fn print_json<T: Serialize>(payload: &T) -> Result<(), GantryError> {
    let text = serde_json::to_string_pretty(payload)?;
    println!("{}", text);
    Ok(())
}
