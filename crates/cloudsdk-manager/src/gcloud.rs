use std::path::{Path, PathBuf};
use std::sync::Arc;

use cloudsdk_process::{
    run_command_checked, CommandResult, LineCallback, OutputStream, RunOptions,
};

use crate::error::ModifyError;
use crate::install::{ManagedSdk, SdkComponent};
use crate::job::ModifyContext;
use crate::locate::gcloud_path;

#[derive(Debug, thiserror::Error)]
#[error("no Cloud SDK installer is configured (set sdk.installer)")]
pub struct MissingInstaller;

/// Drives a real SDK through `gcloud` and the bootstrap installer.
#[derive(Debug, Clone)]
pub struct GcloudManagedSdk {
    root: PathBuf,
    installer: Vec<String>,
}

impl GcloudManagedSdk {
    /// `root` is the SDK directory itself (`.../google-cloud-sdk`); the installer is asked to
    /// install into its parent.
    pub fn new(root: impl Into<PathBuf>, installer: Vec<String>) -> Self {
        Self {
            root: root.into(),
            installer,
        }
    }

    fn gcloud(&self) -> PathBuf {
        gcloud_path(&self.root)
    }

    fn install_dir(&self) -> &Path {
        self.root.parent().unwrap_or(&self.root)
    }

    fn run(
        &self,
        program: &Path,
        args: &[String],
        cx: &ModifyContext,
    ) -> Result<CommandResult, ModifyError> {
        let mut opts = RunOptions {
            cancellation: Some(cx.token().clone()),
            ..RunOptions::default()
        };
        opts.env
            .insert("CLOUDSDK_CORE_DISABLE_PROMPTS".to_owned(), "1".to_owned());
        if let Some(output) = cx.output() {
            let on_line: LineCallback =
                Arc::new(move |_: OutputStream, line: &str| output.println(line));
            opts.on_line = Some(on_line);
        }

        let cwd = if self.install_dir().is_dir() {
            self.install_dir()
        } else {
            Path::new(".")
        };
        tracing::debug!(
            target: "cloudsdk.process",
            program = %program.display(),
            ?args,
            "running Cloud SDK command"
        );
        Ok(run_command_checked(cwd, program, args, opts)?)
    }

    fn run_gcloud(
        &self,
        args: &[&str],
        cx: &ModifyContext,
    ) -> Result<CommandResult, ModifyError> {
        let args: Vec<String> = args.iter().map(|arg| (*arg).to_owned()).collect();
        self.run(&self.gcloud(), &args, cx)
    }
}

impl ManagedSdk for GcloudManagedSdk {
    fn root(&self) -> &Path {
        &self.root
    }

    fn is_installed(&self) -> bool {
        self.gcloud().is_file()
    }

    fn install(&self, cx: &ModifyContext) -> Result<(), ModifyError> {
        let Some((program, rest)) = self.installer.split_first() else {
            return Err(ModifyError::failed(MissingInstaller));
        };
        std::fs::create_dir_all(self.install_dir())?;

        let mut args = rest.to_vec();
        args.push("--disable-prompts".to_owned());
        args.push(format!("--install-dir={}", self.install_dir().display()));
        self.run(Path::new(program), &args, cx)?;
        Ok(())
    }

    fn has_component(
        &self,
        component: SdkComponent,
        cx: &ModifyContext,
    ) -> Result<bool, ModifyError> {
        let result = self.run_gcloud(
            &[
                "components",
                "list",
                "--only-local-state",
                "--format=value(id)",
            ],
            cx,
        )?;
        Ok(result
            .output
            .stdout
            .lines()
            .any(|line| line.trim() == component.id()))
    }

    fn install_component(
        &self,
        component: SdkComponent,
        cx: &ModifyContext,
    ) -> Result<(), ModifyError> {
        self.run_gcloud(&["components", "install", component.id(), "--quiet"], cx)?;
        Ok(())
    }

    fn update(&self, cx: &ModifyContext) -> Result<(), ModifyError> {
        self.run_gcloud(&["components", "update", "--quiet"], cx)?;
        Ok(())
    }
}
