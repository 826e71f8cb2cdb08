use std::process::Stdio;
use std::time::{Duration, Instant};

use modelget_core::models::settings::HelperSettings;
use serde::Serialize;
use tokio::sync::OnceCell;

pub const INTERPRETER_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
pub const LIBRARY_PROBE_TIMEOUT: Duration = Duration::from_secs(10);
pub const REGISTRY_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

const LIBRARY_MARKER: &str = "MODELGET_HUB_OK";
const LIBRARY_CHECK: &str =
    "import huggingface_hub; print('MODELGET_HUB_OK', huggingface_hub.__version__)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Capabilities {
    pub native: bool,
    pub interpreter: bool,
    pub library: bool,
    pub registry_cli: bool,
}

impl Capabilities {
    /// Interpreter and hub library are both usable.
    pub fn helper_ready(&self) -> bool {
        self.interpreter && self.library
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DependencyStatus {
    pub name: String,
    pub installed: bool,
    pub version: Option<String>,
}

/// Probes external tooling once and keeps the answers for the life of the
/// prober. A probe that fails or times out is cached as unavailable too.
pub struct CapabilityProber {
    helper: HelperSettings,
    native: bool,
    interpreter: OnceCell<Option<String>>,
    library: OnceCell<Option<String>>,
    registry_cli: OnceCell<Option<String>>,
}

impl CapabilityProber {
    pub fn new(helper: HelperSettings, native: bool) -> Self {
        Self {
            helper,
            native,
            interpreter: OnceCell::new(),
            library: OnceCell::new(),
            registry_cli: OnceCell::new(),
        }
    }

    /// A prober whose answers are already known; nothing is spawned.
    pub fn with_capabilities(caps: Capabilities) -> Self {
        let seed = |ok: bool| OnceCell::new_with(Some(ok.then(|| "preset".to_string())));
        Self {
            helper: HelperSettings::default(),
            native: caps.native,
            interpreter: seed(caps.interpreter),
            library: seed(caps.library),
            registry_cli: seed(caps.registry_cli),
        }
    }

    pub fn helper_settings(&self) -> &HelperSettings {
        &self.helper
    }

    async fn interpreter_version(&self) -> Option<String> {
        self.interpreter
            .get_or_init(|| {
                run_probe(
                    &self.helper.interpreter,
                    &["--version"],
                    INTERPRETER_PROBE_TIMEOUT,
                    None,
                )
            })
            .await
            .clone()
    }

    async fn library_version(&self) -> Option<String> {
        self.library
            .get_or_init(|| async {
                if self.interpreter_version().await.is_none() {
                    return None;
                }
                run_probe(
                    &self.helper.interpreter,
                    &["-c", LIBRARY_CHECK],
                    LIBRARY_PROBE_TIMEOUT,
                    Some(LIBRARY_MARKER),
                )
                .await
            })
            .await
            .clone()
    }

    async fn registry_cli_version(&self) -> Option<String> {
        self.registry_cli
            .get_or_init(|| {
                run_probe(
                    &self.helper.registry_cli,
                    &["--version"],
                    REGISTRY_PROBE_TIMEOUT,
                    None,
                )
            })
            .await
            .clone()
    }

    pub async fn capabilities(&self) -> Capabilities {
        let (interpreter, library, registry_cli) = tokio::join!(
            self.interpreter_version(),
            self.library_version(),
            self.registry_cli_version(),
        );
        Capabilities {
            native: self.native,
            interpreter: interpreter.is_some(),
            library: library.is_some(),
            registry_cli: registry_cli.is_some(),
        }
    }

    pub async fn dependency_report(&self) -> Vec<DependencyStatus> {
        let (interpreter, library, registry_cli) = tokio::join!(
            self.interpreter_version(),
            self.library_version(),
            self.registry_cli_version(),
        );
        vec![
            DependencyStatus {
                name: self.helper.interpreter.clone(),
                installed: interpreter.is_some(),
                version: interpreter,
            },
            DependencyStatus {
                name: "huggingface_hub".into(),
                installed: library.is_some(),
                version: library,
            },
            DependencyStatus {
                name: self.helper.registry_cli.clone(),
                installed: registry_cli.is_some(),
                version: registry_cli,
            },
        ]
    }
}

/// Runs `program args`, racing it against `timeout`. Returns the reported
/// version text on a zero exit (and, when given, a `marker` in stdout).
async fn run_probe(
    program: &str,
    args: &[&str],
    timeout: Duration,
    marker: Option<&str>,
) -> Option<String> {
    let started = Instant::now();
    let output = crate::core::process::command(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output();

    let result = match tokio::time::timeout(timeout, output).await {
        Ok(Ok(output)) if output.status.success() => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            // Older interpreters print their version on stderr.
            let stderr = String::from_utf8_lossy(&output.stderr);
            match marker {
                Some(m) => stdout
                    .lines()
                    .find_map(|l| l.trim().strip_prefix(m))
                    .map(|rest| rest.trim().to_string()),
                None => stdout
                    .lines()
                    .chain(stderr.lines())
                    .map(str::trim)
                    .find(|l| !l.is_empty())
                    .map(str::to_string)
                    .or_else(|| Some(String::new())),
            }
        }
        Ok(Ok(output)) => {
            tracing::debug!("[probe] {} exited with {}", program, output.status);
            None
        }
        Ok(Err(e)) => {
            tracing::debug!("[probe] {} could not start: {}", program, e);
            None
        }
        Err(_) => {
            tracing::warn!("[probe] {} timed out after {:?}", program, timeout);
            None
        }
    };

    tracing::debug!(
        "[probe] {} {:?} -> {:?} in {:?}",
        program,
        args,
        result,
        started.elapsed()
    );
    result
}
