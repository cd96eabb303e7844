use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use cloudsdk_config::{init_tracing, load_for_dir, CloudToolsConfig, SdkManagement};
use cloudsdk_manager::{
    CloudSdkManager, GcloudManagedSdk, SdkError, SharedSink, StdoutSink, TracingSink,
    INSTALL_JOB_NAME, UPDATE_JOB_NAME,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "cloudsdk", version, about = "Inspect, install and update the Google Cloud SDK")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show configuration, feature state and the SDK in use
    Status(CommonArgs),
    /// Print the root of the Cloud SDK installation in use
    Locate(CommonArgs),
    /// Install the managed Cloud SDK and the App Engine Java component
    Install(ModifyArgs),
    /// Update the components of the managed Cloud SDK
    Update(ModifyArgs),
}

#[derive(Args)]
struct CommonArgs {
    /// Configuration file (defaults to `cloudsdk.toml` discovery in the current directory)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Emit JSON suitable for scripts
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct ModifyArgs {
    #[command(flatten)]
    common: CommonArgs,
    /// Enable the managed SDK feature for this run regardless of configuration
    #[arg(long)]
    force_feature: bool,
}

fn main() {
    let cli = Cli::parse();
    let exit_code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            2
        }
    };

    std::process::exit(exit_code);
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Status(args) => {
            let (config, config_path) = load_config(args.config.as_deref())?;
            let manager = build_manager(&config)?;
            let located = manager.locate_sdk();
            let report = StatusReport {
                config_path,
                management: config.sdk.management,
                auto_update: config.sdk.auto_update,
                managed_feature_enabled: manager.is_managed_sdk_feature_enabled(),
                managed_root: manager.managed_sdk().root().to_path_buf(),
                managed_installed: manager.managed_sdk().is_installed(),
                sdk_root: located.as_ref().ok().map(|sdk| sdk.root().to_path_buf()),
                sdk_error: located.as_ref().err().map(ToString::to_string),
            };
            print_status(&report, args.json)?;
            Ok(0)
        }
        Command::Locate(args) => {
            let (config, _) = load_config(args.config.as_deref())?;
            let manager = build_manager(&config)?;
            match manager.locate_sdk() {
                Ok(sdk) => {
                    if args.json {
                        print_json(&serde_json::json!({
                            "root": sdk.root(),
                            "gcloud": sdk.gcloud(),
                        }))?;
                    } else {
                        println!("{}", sdk.root().display());
                    }
                    Ok(0)
                }
                Err(err) => {
                    if args.json {
                        print_json(&serde_json::json!({ "error": err.to_string() }))?;
                    } else {
                        eprintln!("{err}");
                    }
                    Ok(1)
                }
            }
        }
        Command::Install(args) => run_modify(args, ModifyKind::Install),
        Command::Update(args) => run_modify(args, ModifyKind::Update),
    }
}

#[derive(Clone, Copy)]
enum ModifyKind {
    Install,
    Update,
}

/// Exit code for a modification stopped by SIGINT/SIGTERM, as a shell reports it.
const EXIT_INTERRUPTED: i32 = 130;

fn run_modify(args: ModifyArgs, kind: ModifyKind) -> Result<i32> {
    let (config, _) = load_config(args.common.config.as_deref())?;
    let manager = Arc::new(build_manager(&config)?);
    if args.force_feature {
        manager.force_managed_sdk_feature(true);
    }

    // The installer runs in its own process group, so a terminal interrupt never reaches it.
    // Cancelling the manager kills that group and unwinds the job.
    let interrupted = Arc::clone(&manager);
    if let Err(err) = ctrlc::set_handler(move || {
        tracing::warn!(target: "cloudsdk.manager", "interrupted; cancelling Cloud SDK modification");
        interrupted.shutdown();
    }) {
        tracing::warn!(
            target: "cloudsdk.manager",
            error = %err,
            "failed to install interrupt handler"
        );
    }

    let job_name = match kind {
        ModifyKind::Install => INSTALL_JOB_NAME,
        ModifyKind::Update => UPDATE_JOB_NAME,
    };
    // With --json stdout carries only the report; tool output goes to the log instead.
    let output: SharedSink = if args.common.json {
        Arc::new(TracingSink::new(job_name))
    } else {
        Arc::new(StdoutSink)
    };
    let result = match kind {
        ModifyKind::Install => manager.install_managed_sdk(Some(output)),
        ModifyKind::Update => manager.update_managed_sdk(Some(output)),
    };
    manager.shutdown();

    let exit = match &result {
        Ok(()) => 0,
        Err(SdkError::FeatureDisabled | SdkError::NotManaged) => 2,
        Err(err) if err.is_cancelled() => EXIT_INTERRUPTED,
        Err(_) => 1,
    };
    if args.common.json {
        print_json(&ModifyReport {
            ok: result.is_ok(),
            cancelled: result.as_ref().err().is_some_and(SdkError::is_cancelled),
            error: result
                .as_ref()
                .err()
                .map(|err| format!("{:#}", anyhow::Error::new(err.clone()))),
        })?;
    } else if let Err(err) = &result {
        eprintln!("{:#}", anyhow::Error::new(err.clone()));
    }
    Ok(exit)
}

fn load_config(explicit: Option<&Path>) -> Result<(CloudToolsConfig, Option<PathBuf>)> {
    let (config, path) = match explicit {
        Some(path) => {
            let config = CloudToolsConfig::load_from_path(path)
                .with_context(|| format!("failed to load {}", path.display()))?;
            (config, Some(path.to_path_buf()))
        }
        None => {
            let cwd = std::env::current_dir().context("failed to determine current directory")?;
            load_for_dir(&cwd)?
        }
    };
    init_tracing(&config.logging);
    tracing::debug!(target: "cloudsdk.config", path = ?path, "configuration loaded");
    Ok((config, path))
}

fn build_manager(config: &CloudToolsConfig) -> Result<CloudSdkManager> {
    let root = config
        .sdk
        .managed_root_or_default()
        .context("cannot determine where the managed Cloud SDK lives; set sdk.managed_root")?;
    let sdk = GcloudManagedSdk::new(root, config.sdk.installer.clone());
    Ok(CloudSdkManager::new(config.sdk.clone(), Arc::new(sdk)))
}

#[derive(Serialize)]
struct StatusReport {
    config_path: Option<PathBuf>,
    management: SdkManagement,
    auto_update: bool,
    managed_feature_enabled: bool,
    managed_root: PathBuf,
    managed_installed: bool,
    sdk_root: Option<PathBuf>,
    sdk_error: Option<String>,
}

#[derive(Serialize)]
struct ModifyReport {
    ok: bool,
    cancelled: bool,
    error: Option<String>,
}

fn print_status(report: &StatusReport, json: bool) -> Result<()> {
    if json {
        return print_json(report);
    }

    let management = match report.management {
        SdkManagement::Managed => "managed",
        SdkManagement::Custom => "custom",
    };
    match &report.config_path {
        Some(path) => println!("config: {}", path.display()),
        None => println!("config: <defaults>"),
    }
    println!("management: {management}");
    println!("auto_update: {}", report.auto_update);
    println!("managed_feature_enabled: {}", report.managed_feature_enabled);
    println!(
        "managed_root: {} ({})",
        report.managed_root.display(),
        if report.managed_installed {
            "installed"
        } else {
            "not installed"
        }
    );
    match (&report.sdk_root, &report.sdk_error) {
        (Some(root), _) => println!("sdk: {}", root.display()),
        (None, Some(err)) => println!("sdk: {err}"),
        (None, None) => println!("sdk: <unknown>"),
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value)?;
    println!("{out}");
    Ok(())
}
