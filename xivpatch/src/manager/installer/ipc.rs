//! Installer state machine over a byte stream pair.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::protocol::{encode_line, InstallerRequest, InstallerResponse};
use super::{InstallRequest, Installer, InstallerFuture, InstallerState};
use crate::manager::error::{PatchError, PatchResult};

/// How long the installer gets to answer `hello`.
const HELLO_TIMEOUT: Duration = Duration::from_secs(30);

/// How long finalization may take.
const FINISH_TIMEOUT: Duration = Duration::from_secs(120);

/// State shared with the response reader task.
#[derive(Debug)]
struct Shared {
    state: watch::Sender<InstallerState>,
    greeted: watch::Sender<bool>,
    connected: watch::Sender<bool>,
    finishes: watch::Sender<u64>,
    last_failure: Mutex<Option<String>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: watch::channel(InstallerState::NotStarted).0,
            greeted: watch::channel(false).0,
            connected: watch::channel(false).0,
            finishes: watch::channel(0).0,
            last_failure: Mutex::new(None),
        }
    }

    fn fail(&self, reason: String) {
        *self.last_failure.lock() = Some(reason);
        self.state.send_replace(InstallerState::Failed);
    }

    fn handle(&self, response: InstallerResponse) {
        match response {
            InstallerResponse::Hello { version } => {
                info!(version = version.as_deref().unwrap_or("unknown"), "Installer ready");
                self.greeted.send_replace(true);
                self.state.send_if_modified(|state| {
                    if *state == InstallerState::NotStarted {
                        *state = InstallerState::Ready;
                        true
                    } else {
                        false
                    }
                });
            }
            InstallerResponse::InstallOk => {
                let moved = self.state.send_if_modified(|state| {
                    if *state == InstallerState::Installing {
                        *state = InstallerState::Ready;
                        true
                    } else {
                        false
                    }
                });
                if !moved {
                    warn!(state = %*self.state.borrow(), "Unexpected install result");
                }
            }
            InstallerResponse::InstallFailed { reason } => {
                warn!(reason = %reason, "Installer reported failure");
                self.fail(reason);
            }
            InstallerResponse::FinishOk => {
                debug!("Installer finalized");
                self.finishes.send_modify(|count| *count += 1);
            }
        }
    }

    fn disconnected(&self) {
        self.connected.send_replace(false);
        if *self.state.borrow() == InstallerState::Installing {
            self.fail("installer exited while applying a patch".to_string());
        }
    }
}

async fn read_responses<R>(reader: R, shared: Arc<Shared>)
where
    R: AsyncRead + Unpin + Send,
{
    let mut lines = BufReader::new(reader).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => match InstallerResponse::from_line(&line) {
                Ok(response) => shared.handle(response),
                Err(e) => warn!(error = %e, "Ignoring installer message"),
            },
            Ok(None) => {
                debug!("Installer closed its output");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read from installer");
                break;
            }
        }
    }

    shared.disconnected();
}

/// [`Installer`] over a request writer and a response reader.
///
/// Responses are read by a background task; requests are written under a
/// lock so only one is in flight on the wire at a time.
pub struct IpcInstaller<W> {
    shared: Arc<Shared>,
    writer: tokio::sync::Mutex<Option<W>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl<W> Default for IpcInstaller<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<W> IpcInstaller<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Create an installer with no connection.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::new()),
            writer: tokio::sync::Mutex::new(None),
            reader: Mutex::new(None),
        }
    }

    /// Create an installer connected to `reader` and `writer`.
    ///
    /// Must be called within a Tokio runtime.
    pub fn connect<R>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let mut installer = Self::new();
        installer.shared.connected.send_replace(true);
        *installer.writer.get_mut() = Some(writer);
        *installer.reader.lock() = Some(tokio::spawn(read_responses(
            reader,
            Arc::clone(&installer.shared),
        )));
        installer
    }

    /// Replace the connection, resetting the state to `NotStarted`.
    pub async fn attach<R>(&self, reader: R, writer: W)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        if let Some(old) = self.reader.lock().take() {
            old.abort();
        }

        *self.writer.lock().await = Some(writer);
        *self.shared.last_failure.lock() = None;
        self.shared.greeted.send_replace(false);
        self.shared.state.send_replace(InstallerState::NotStarted);
        self.shared.connected.send_replace(true);

        *self.reader.lock() = Some(tokio::spawn(read_responses(
            reader,
            Arc::clone(&self.shared),
        )));
    }

    /// Whether the response stream is still open.
    pub fn is_connected(&self) -> bool {
        *self.shared.connected.borrow()
    }

    async fn send(&self, request: &InstallerRequest) -> PatchResult<()> {
        let line = encode_line(request)?;
        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| PatchError::Protocol("installer is not running".to_string()))?;

        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| PatchError::Protocol(format!("failed to write to installer: {}", e)))?;
        writer
            .flush()
            .await
            .map_err(|e| PatchError::Protocol(format!("failed to write to installer: {}", e)))?;

        debug!(request = line.trim_end(), "Sent installer request");
        Ok(())
    }

    async fn hello(&self) -> PatchResult<()> {
        self.send(&InstallerRequest::Hello).await?;

        let mut greeted = self.shared.greeted.subscribe();
        let mut connected = self.shared.connected.subscribe();

        let wait = async {
            tokio::select! {
                result = greeted.wait_for(|g| *g) => result
                    .map(|_| ())
                    .map_err(|_| PatchError::Protocol("installer went away".to_string())),
                _ = connected.wait_for(|c| !*c) => Err(PatchError::Protocol(
                    "installer exited before it was ready".to_string(),
                )),
            }
        };

        tokio::time::timeout(HELLO_TIMEOUT, wait)
            .await
            .map_err(|_| PatchError::Protocol("installer did not answer hello".to_string()))?
    }

    async fn install(&self, request: InstallRequest) -> PatchResult<()> {
        let claimed = self.shared.state.send_if_modified(|state| {
            if *state == InstallerState::Ready {
                *state = InstallerState::Installing;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(PatchError::Protocol(format!(
                "installer is {}, cannot install {}",
                self.state(),
                request.descriptor.version_id
            )));
        }
        *self.shared.last_failure.lock() = None;

        info!(
            version = %request.descriptor.version_id,
            repository = %request.repository,
            "Installing patch"
        );

        let message = InstallerRequest::Install {
            game_path: request.game_path,
            patch_file: request.patch_file,
            repository: request.repository,
            descriptor: request.descriptor,
        };

        if let Err(e) = self.send(&message).await {
            self.shared.fail(e.to_string());
            return Err(e);
        }
        Ok(())
    }

    async fn finish(&self, game_path: PathBuf) -> PatchResult<()> {
        let mut finishes = self.shared.finishes.subscribe();
        let before = *finishes.borrow_and_update();
        let mut connected = self.shared.connected.subscribe();

        self.send(&InstallerRequest::Finish { game_path }).await?;

        let wait = async {
            tokio::select! {
                result = finishes.wait_for(|count| *count > before) => result
                    .map(|_| ())
                    .map_err(|_| PatchError::Protocol("installer went away".to_string())),
                _ = connected.wait_for(|c| !*c) => Err(PatchError::Protocol(
                    "installer exited before finishing".to_string(),
                )),
            }
        };

        tokio::time::timeout(FINISH_TIMEOUT, wait)
            .await
            .map_err(|_| PatchError::Protocol("installer did not finish in time".to_string()))?
    }

    async fn close(&self) -> PatchResult<()> {
        if self.is_connected() {
            if let Err(e) = self.send(&InstallerRequest::Exit).await {
                debug!(error = %e, "Installer already gone");
            }
        }
        // Dropping the writer closes the installer's input.
        self.writer.lock().await.take();
        Ok(())
    }
}

impl<W> Drop for IpcInstaller<W> {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.get_mut().take() {
            reader.abort();
        }
    }
}

impl<W> Installer for IpcInstaller<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn start_if_needed(&self) -> InstallerFuture<'_, ()> {
        Box::pin(async move {
            if self.is_connected() {
                Ok(())
            } else {
                Err(PatchError::Protocol("installer is not connected".to_string()))
            }
        })
    }

    fn wait_on_hello(&self) -> InstallerFuture<'_, ()> {
        Box::pin(self.hello())
    }

    fn start_install(&self, request: InstallRequest) -> InstallerFuture<'_, ()> {
        Box::pin(self.install(request))
    }

    fn state(&self) -> InstallerState {
        *self.shared.state.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<InstallerState> {
        self.shared.state.subscribe()
    }

    fn last_failure(&self) -> Option<String> {
        self.shared.last_failure.lock().clone()
    }

    fn finish_install(&self, game_path: PathBuf) -> InstallerFuture<'_, ()> {
        Box::pin(self.finish(game_path))
    }

    fn shutdown(&self) -> InstallerFuture<'_, ()> {
        Box::pin(self.close())
    }
}
