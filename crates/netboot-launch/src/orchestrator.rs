//! Launch orchestration: build, wire, boot, supervise.
//!
//! ```text
//! Idle -> Building -> Launching -> Running -> Terminated
//!            |            |
//!            +-> Failed <-+
//! ```
//!
//! Every step runs once. A failure ends the invocation with the failing
//! step's error; nothing is retried.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use netboot_profiles::{Architecture, ArchitectureProfile};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::emulator::EmulatorInvocation;
use crate::error::{LaunchError, Result};
use crate::filter::{DiagnosticFilter, LineReader, LineState};
use crate::toolchain::{is_file, Toolchain};
use crate::wiring::NetbootWiring;

/// Filtered chunks buffered between the emulator's pipes and the output.
const LINE_BACKLOG: usize = 256;

/// Orchestrator lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchState {
    Idle,
    Building,
    Launching,
    Running,
    Terminated,
    Failed,
}

impl LaunchState {
    fn can_transition_to(self, next: LaunchState) -> bool {
        use LaunchState::*;
        matches!(
            (self, next),
            (Idle, Building)
                | (Building, Launching)
                | (Building, Failed)
                | (Launching, Running)
                | (Launching, Failed)
                | (Running, Terminated)
        )
    }
}

/// How a booted guest's run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The emulator exited with this status code.
    Exited(i32),
    /// The emulator was killed by this signal.
    Signalled(i32),
    /// The run was interrupted and the emulator stopped.
    Interrupted,
}

impl RunOutcome {
    /// Exit code the harness itself should report.
    pub fn exit_code(self) -> i32 {
        match self {
            RunOutcome::Exited(code) => code,
            RunOutcome::Signalled(signal) => 128 + signal,
            RunOutcome::Interrupted => 130,
        }
    }

    pub fn success(self) -> bool {
        self == RunOutcome::Exited(0)
    }

    fn from_status(status: ExitStatus) -> Self {
        match status.code() {
            Some(code) => RunOutcome::Exited(code),
            None => RunOutcome::Signalled(terminating_signal(&status)),
        }
    }
}

#[cfg(unix)]
fn terminating_signal(status: &ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status.signal().unwrap_or(0)
}

#[cfg(not(unix))]
fn terminating_signal(_status: &ExitStatus) -> i32 {
    0
}

/// Environment the orchestrator runs a profile in.
#[derive(Debug, Clone)]
pub struct LaunchSettings {
    pub toolchain: Toolchain,
    /// Emulator binary; defaults to the architecture's `qemu-system-*`.
    pub emulator_program: Option<PathBuf>,
    /// Architecture of this machine, for the acceleration check.
    pub host: Option<Architecture>,
    /// How long to wait for the emulator to die after an interrupt.
    pub kill_grace: Duration,
    /// Forward a partial console line after this much silence.
    pub idle_flush: Duration,
}

impl LaunchSettings {
    pub fn new(toolchain: Toolchain) -> Self {
        Self {
            toolchain,
            emulator_program: None,
            host: Architecture::host(),
            kill_grace: Duration::from_secs(5),
            idle_flush: Duration::from_millis(100),
        }
    }

    fn project_dir(&self) -> &Path {
        &self.toolchain.project_dir
    }
}

/// Runs one profile through build and boot.
#[derive(Debug)]
pub struct Orchestrator {
    profile: ArchitectureProfile,
    settings: LaunchSettings,
    state: LaunchState,
    history: Vec<LaunchState>,
}

impl Orchestrator {
    pub fn new(profile: ArchitectureProfile, settings: LaunchSettings) -> Self {
        Self {
            profile,
            settings,
            state: LaunchState::Idle,
            history: vec![LaunchState::Idle],
        }
    }

    pub fn profile(&self) -> &ArchitectureProfile {
        &self.profile
    }

    pub fn state(&self) -> LaunchState {
        self.state
    }

    /// Every state visited so far, starting with `Idle`.
    pub fn history(&self) -> &[LaunchState] {
        &self.history
    }

    fn transition(&mut self, next: LaunchState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {:?} -> {next:?}",
            self.state
        );
        info!(
            architecture = %self.profile.architecture,
            from = ?self.state,
            to = ?next,
            "launch state"
        );
        self.state = next;
        self.history.push(next);
    }

    fn fail<T>(&mut self, err: LaunchError) -> Result<T> {
        self.transition(LaunchState::Failed);
        Err(err)
    }

    fn emulator_program(&self) -> PathBuf {
        self.settings
            .emulator_program
            .clone()
            .unwrap_or_else(|| PathBuf::from(self.profile.architecture.emulator_program()))
    }

    /// Compute the emulator invocation for an already built `artifact`.
    pub fn plan(&self, artifact: &Path) -> Result<EmulatorInvocation> {
        let architecture = self.profile.architecture;
        let firmware = self.profile.firmware_path(self.settings.project_dir());
        if let Some(path) = &firmware {
            if !is_file(path) {
                return Err(LaunchError::LaunchFailed {
                    architecture,
                    detail: format!("firmware image {} not found", path.display()),
                });
            }
        }

        let wiring = NetbootWiring::new(&self.profile, artifact)?;
        EmulatorInvocation::new(
            &self.profile,
            &self.emulator_program(),
            firmware.as_deref(),
            &wiring,
            self.settings.host,
        )
    }

    /// Build and boot, stopping on Ctrl-C or SIGTERM, with console output on stdout.
    pub async fn run(&mut self) -> Result<RunOutcome> {
        let mut stdout = tokio::io::stdout();
        self.run_until(shutdown_signal(), &mut stdout).await
    }

    /// Build and boot, stopping when `interrupt` completes, with filtered
    /// console output written to `out`.
    pub async fn run_until<F, W>(&mut self, interrupt: F, out: &mut W) -> Result<RunOutcome>
    where
        F: Future<Output = ()>,
        W: AsyncWrite + Unpin,
    {
        let architecture = self.profile.architecture;
        if self.state != LaunchState::Idle {
            return Err(LaunchError::Configuration {
                architecture,
                detail: format!("orchestrator already ran (state {:?})", self.state),
            });
        }

        self.transition(LaunchState::Building);
        let artifact = match self.settings.toolchain.build(&self.profile) {
            Ok(artifact) => artifact,
            Err(err) => return self.fail(err),
        };

        self.transition(LaunchState::Launching);
        let prepared = self
            .plan(&artifact)
            .and_then(|inv| Ok((inv, DiagnosticFilter::for_profile(&self.profile)?)));
        let (invocation, filter) = match prepared {
            Ok(prepared) => prepared,
            Err(err) => return self.fail(err),
        };
        debug!(command = %invocation.command_line(), "starting emulator");

        let child = match spawn(&invocation, self.settings.project_dir()) {
            Ok(child) => child,
            Err(err) => {
                return self.fail(LaunchError::LaunchFailed {
                    architecture,
                    detail: format!("failed to start {}: {err}", invocation.program.display()),
                })
            }
        };

        self.transition(LaunchState::Running);
        let result = supervise(
            child,
            filter,
            interrupt,
            out,
            self.settings.kill_grace,
            self.settings.idle_flush,
        )
        .await;
        self.transition(LaunchState::Terminated);

        if let Ok(outcome) = &result {
            info!(%architecture, ?outcome, "emulator finished");
        }
        result
    }
}

fn spawn(invocation: &EmulatorInvocation, project_dir: &Path) -> io::Result<Child> {
    Command::new(&invocation.program)
        .args(&invocation.args)
        .current_dir(project_dir)
        .stdin(Stdio::inherit())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
}

enum Stop {
    Exited(io::Result<ExitStatus>),
    Interrupted,
    Aborted,
}

/// Pump the child's output through `filter` until it exits or `interrupt` fires.
///
/// Each pipe is filtered by its own reader task so that a line split into
/// chunks keeps its own line state.
async fn supervise<F, W>(
    mut child: Child,
    filter: DiagnosticFilter,
    interrupt: F,
    out: &mut W,
    kill_grace: Duration,
    idle_flush: Duration,
) -> Result<RunOutcome>
where
    F: Future<Output = ()>,
    W: AsyncWrite + Unpin,
{
    let filter = Arc::new(filter);
    let (tx, mut rx) = mpsc::channel(LINE_BACKLOG);
    let mut readers: Vec<JoinHandle<io::Result<()>>> = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(tokio::spawn(read_lines(stdout, filter.clone(), tx.clone(), idle_flush)));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(tokio::spawn(read_lines(stderr, filter.clone(), tx.clone(), idle_flush)));
    }
    drop(tx);

    // A dead output sink would leave the child blocked on a full pipe.
    let (abort_tx, abort_rx) = oneshot::channel::<()>();
    let pump = async {
        let result = write_output(&mut rx, out).await;
        if result.is_err() {
            let _ = abort_tx.send(());
        }
        result
    };

    let wait = async {
        tokio::pin!(interrupt);
        let stop = tokio::select! {
            biased;
            () = &mut interrupt => Stop::Interrupted,
            Ok(()) = abort_rx => Stop::Aborted,
            status = child.wait() => Stop::Exited(status),
        };
        match stop {
            Stop::Exited(status) => status
                .map(RunOutcome::from_status)
                .map_err(LaunchError::from),
            Stop::Interrupted | Stop::Aborted => {
                if matches!(stop, Stop::Interrupted) {
                    warn!("interrupted; stopping emulator");
                }
                let _ = child.start_kill();
                match tokio::time::timeout(kill_grace, child.wait()).await {
                    Ok(Ok(status)) => debug!(%status, "emulator stopped"),
                    Ok(Err(err)) => warn!("waiting for emulator failed: {err}"),
                    Err(_) => warn!("emulator still running after {kill_grace:?}"),
                }
                Ok(RunOutcome::Interrupted)
            }
        }
    };

    let (waited, pumped) = tokio::join!(wait, pump);
    pumped?;
    for reader in readers {
        reader.await.map_err(io::Error::other)??;
    }
    waited
}

async fn read_lines<R>(
    reader: R,
    filter: Arc<DiagnosticFilter>,
    tx: mpsc::Sender<Vec<u8>>,
    idle_flush: Duration,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut lines = LineReader::new(BufReader::new(reader)).with_idle_flush(idle_flush);
    let mut state = LineState::default();
    while let Some(chunk) = lines.next_line().await? {
        let filtered = filter.filter_chunk(&chunk, &mut state).into_owned();
        if filtered.is_empty() {
            continue;
        }
        if tx.send(filtered).await.is_err() {
            break;
        }
    }
    Ok(())
}

/// Write filtered output until every reader is done, flushing each chunk.
async fn write_output<W>(rx: &mut mpsc::Receiver<Vec<u8>>, out: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(bytes) = rx.recv().await {
        out.write_all(&bytes).await?;
        out.flush().await?;
    }
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("failed to install Ctrl-C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!("failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = sigterm => {},
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::testutil::write_script;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Instant;

    struct Fixture {
        dir: tempfile::TempDir,
        profile: ArchitectureProfile,
        settings: LaunchSettings,
    }

    impl Fixture {
        /// x86_64 without acceleration, a stub toolchain that logs each call,
        /// a prebuilt artifact, and a firmware file.
        fn new(toolchain_body: &str, emulator_body: &str) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path();

            let mut profile = ArchitectureProfile::x86_64().without_acceleration();
            let firmware = root.join("OVMF.fd");
            std::fs::write(&firmware, b"fw").unwrap();
            profile.firmware.path = Some(firmware);

            let mut toolchain = Toolchain::new(root);
            toolchain.program = write_script(
                root,
                "toolchain",
                &format!("echo build >> \"{}/build.log\"\n{toolchain_body}", root.display()),
            );
            let artifact = toolchain.artifact_path(&profile);
            std::fs::create_dir_all(artifact.parent().unwrap()).unwrap();
            std::fs::write(&artifact, b"MZ").unwrap();

            let emulator = write_script(
                root,
                "emulator",
                &format!("touch \"{}/emulator.ran\"\n{emulator_body}", root.display()),
            );
            let mut settings = LaunchSettings::new(toolchain);
            settings.emulator_program = Some(emulator);
            settings.host = Some(Architecture::X86_64);
            settings.kill_grace = Duration::from_secs(2);

            Self {
                dir,
                profile,
                settings,
            }
        }

        fn path(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }

        fn builds(&self) -> usize {
            std::fs::read_to_string(self.path("build.log"))
                .map(|log| log.lines().count())
                .unwrap_or(0)
        }

        fn orchestrator(&self) -> Orchestrator {
            Orchestrator::new(self.profile.clone(), self.settings.clone())
        }
    }

    fn never() -> std::future::Pending<()> {
        std::future::pending()
    }

    #[test]
    fn transitions_follow_the_state_machine() {
        use LaunchState::*;
        assert!(Idle.can_transition_to(Building));
        assert!(Building.can_transition_to(Failed));
        assert!(Launching.can_transition_to(Failed));
        assert!(!Running.can_transition_to(Failed));
        assert!(!Idle.can_transition_to(Running));
        assert!(!Terminated.can_transition_to(Building));
    }

    #[test]
    fn outcome_exit_codes() {
        assert_eq!(RunOutcome::Exited(0).exit_code(), 0);
        assert!(RunOutcome::Exited(0).success());
        assert_eq!(RunOutcome::Exited(3).exit_code(), 3);
        assert_eq!(RunOutcome::Signalled(9).exit_code(), 137);
        assert_eq!(RunOutcome::Interrupted.exit_code(), 130);
        assert!(!RunOutcome::Interrupted.success());
    }

    #[tokio::test]
    async fn build_failure_never_launches() {
        let fx = Fixture::new("echo 'error: aborting' >&2\nexit 1\n", "exit 0\n");
        let mut orch = fx.orchestrator();
        let mut out = Vec::new();

        let err = orch.run_until(never(), &mut out).await.unwrap_err();
        assert!(matches!(err, LaunchError::BuildFailed { code: Some(1), .. }));
        assert_eq!(
            orch.history(),
            [LaunchState::Idle, LaunchState::Building, LaunchState::Failed]
        );
        assert!(!fx.path("emulator.ran").exists());
        assert_eq!(err.exit_code(), 1);
    }

    #[tokio::test]
    async fn missing_firmware_fails_launch_after_one_build() {
        let mut fx = Fixture::new("exit 0\n", "exit 0\n");
        fx.profile.firmware.path = Some(fx.path("missing/OVMF.fd"));
        let mut orch = fx.orchestrator();
        let mut out = Vec::new();

        let err = orch.run_until(never(), &mut out).await.unwrap_err();
        assert!(matches!(err, LaunchError::LaunchFailed { .. }));
        assert!(err.to_string().contains("firmware image"));
        assert_eq!(
            orch.history(),
            [
                LaunchState::Idle,
                LaunchState::Building,
                LaunchState::Launching,
                LaunchState::Failed
            ]
        );
        assert_eq!(fx.builds(), 1);
        assert!(!fx.path("emulator.ran").exists());
    }

    #[tokio::test]
    async fn missing_emulator_binary_is_launch_failure() {
        let mut fx = Fixture::new("exit 0\n", "exit 0\n");
        fx.settings.emulator_program = Some(fx.path("no-such-qemu"));
        let mut orch = fx.orchestrator();
        let mut out = Vec::new();

        let err = orch.run_until(never(), &mut out).await.unwrap_err();
        assert!(matches!(err, LaunchError::LaunchFailed { .. }));
        assert_eq!(orch.state(), LaunchState::Failed);
    }

    #[tokio::test]
    async fn cross_host_acceleration_fails_launch() {
        let mut fx = Fixture::new("exit 0\n", "exit 0\n");
        fx.profile.acceleration = Some(netboot_profiles::Acceleration::Kvm);
        fx.settings.host = Some(Architecture::Aarch64);
        let mut orch = fx.orchestrator();
        let mut out = Vec::new();

        let err = orch.run_until(never(), &mut out).await.unwrap_err();
        assert!(matches!(err, LaunchError::Profile(_)));
        assert_eq!(orch.state(), LaunchState::Failed);
        assert!(!fx.path("emulator.ran").exists());
    }

    #[tokio::test]
    async fn run_filters_output_and_mirrors_exit_code() {
        let fx = Fixture::new(
            "exit 0\n",
            "echo 'BdsDxe: loading Boot0001 \"UEFI PXEv4\"'\n\
             echo 'error: kernel panicked' >&2\n\
             echo '>>Start PXE over IPv4.'\n\
             for a in \"$@\"; do echo \"arg=$a\"; done\n\
             exit 3\n",
        );
        let mut orch = fx.orchestrator();
        let mut out = Vec::new();

        let outcome = orch.run_until(never(), &mut out).await.unwrap();
        assert_eq!(outcome, RunOutcome::Exited(3));
        assert_eq!(outcome.exit_code(), 3);
        assert_eq!(orch.state(), LaunchState::Terminated);

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("[BdsDxe]\n"));
        assert!(!text.contains("BdsDxe: loading"));
        assert!(text.contains("error: kernel panicked\n"));
        assert!(text.contains(">>Start PXE over IPv4.\n"));
        assert!(text.contains("arg=-nographic\n"));
        assert!(text.contains("arg=e1000,netdev=net0\n"));
        assert!(!text.contains("arg=-accel"));
        assert_eq!(fx.builds(), 1);
    }

    #[tokio::test]
    async fn interrupt_kills_the_emulator() {
        let fx = Fixture::new("exit 0\n", "echo booting\nexec sleep 30\n");
        let mut orch = fx.orchestrator();
        let mut out = Vec::new();

        let started = Instant::now();
        let outcome = orch
            .run_until(tokio::time::sleep(Duration::from_millis(300)), &mut out)
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::Interrupted);
        assert_ne!(outcome.exit_code(), 0);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(orch.state(), LaunchState::Terminated);
    }

    #[tokio::test]
    async fn orchestrator_runs_once() {
        let fx = Fixture::new("exit 0\n", "exit 0\n");
        let mut orch = fx.orchestrator();
        let mut out = Vec::new();

        assert!(orch.run_until(never(), &mut out).await.unwrap().success());
        let err = orch.run_until(never(), &mut out).await.unwrap_err();
        assert!(matches!(err, LaunchError::Configuration { .. }));
        assert_eq!(fx.builds(), 1);
    }

    #[tokio::test]
    async fn plan_uses_the_built_artifact() {
        let fx = Fixture::new("exit 0\n", "exit 0\n");
        let orch = fx.orchestrator();
        let artifact = fx.settings.toolchain.artifact_path(&fx.profile);
        let inv = orch.plan(&artifact).unwrap();
        let line = inv.command_line();
        assert!(line.contains("bootfile=bootloader.efi"));
        assert!(line.contains(&format!("-bios {}", fx.path("OVMF.fd").display())));
    }

    #[tokio::test]
    async fn rejected_arguments_are_mirrored_as_exit_status() {
        let fx = Fixture::new(
            "exit 0\n",
            "echo 'qemu-system-x86_64: -bogus: invalid option' >&2\nexit 1\n",
        );
        let mut orch = fx.orchestrator();
        let mut out = Vec::new();

        let outcome = orch.run_until(never(), &mut out).await.unwrap();
        assert_eq!(outcome, RunOutcome::Exited(1));
        assert_eq!(orch.state(), LaunchState::Terminated);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("-bogus: invalid option\n"));
    }

    /// A sink whose reader went away.
    struct ClosedPipe;

    impl AsyncWrite for ClosedPipe {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn broken_output_stops_the_emulator() {
        let fx = Fixture::new("exit 0\n", "while :; do echo booting; touch alive; sleep 0.05; done\n");
        let mut orch = fx.orchestrator();

        let started = Instant::now();
        let err = orch.run_until(never(), &mut ClosedPipe).await.unwrap_err();
        assert!(matches!(err, LaunchError::Stream(_)));
        assert_eq!(orch.state(), LaunchState::Terminated);
        assert!(started.elapsed() < fx.settings.kill_grace);

        let _ = std::fs::remove_file(fx.path("alive"));
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!fx.path("alive").exists());
    }
}
