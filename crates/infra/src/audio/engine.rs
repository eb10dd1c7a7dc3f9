//! Dedicated audio thread driving an [`AudioOrchestrator`]
//!
//! The orchestrator is built on the `audio` thread itself so every component
//! container binds to it. The host talks to it through an [`AudioHandle`].

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use sonority_core::domain::audio::{AudioError, Result};
use sonority_core::domain::orchestrator::{AudioHandle, AudioOrchestrator};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default interval between orchestrator updates.
pub const DEFAULT_TICK: Duration = Duration::from_millis(10);

/// Audio engine owning the audio thread
pub struct AudioEngine {
    handle: AudioHandle,
    shutdown: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

fn run(mut audio: AudioOrchestrator, shutdown: Receiver<()>, tick: Duration) {
    info!("Audio thread running: {}", audio);

    loop {
        audio.update();
        match shutdown.recv_timeout(tick) {
            Err(RecvTimeoutError::Timeout) => continue,
            _ => break,
        }
    }

    audio.dispose();
    debug!("Audio thread exiting");
}

impl AudioEngine {
    /// Spawn the audio thread and build the orchestrator on it.
    ///
    /// Fails if `build` fails; the thread is gone by the time this returns.
    pub fn start<F>(build: F, tick: Duration) -> Result<Self>
    where
        F: FnOnce() -> Result<AudioOrchestrator> + Send + 'static,
    {
        let (ready_tx, ready_rx) = bounded::<Result<AudioHandle>>(1);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        let thread = thread::Builder::new()
            .name("audio".to_string())
            .spawn(move || match build() {
                Ok(audio) => {
                    let _ = ready_tx.send(Ok(audio.handle()));
                    run(audio, shutdown_rx, tick);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| AudioError::OsError(format!("failed to spawn audio thread: {}", e)))?;

        let handle = match ready_rx.recv() {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(AudioError::Backend("audio thread exited during startup".to_string()));
            }
        };

        Ok(Self {
            handle,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> AudioHandle {
        self.handle.clone()
    }

    /// Run `task` on the audio thread. Returns `false` once stopped.
    pub fn run<F>(&self, task: F) -> bool
    where
        F: FnOnce(&mut AudioOrchestrator) + Send + 'static,
    {
        self.handle.run(task)
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the audio thread, disposing the orchestrator. Idempotent.
    pub fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            info!("Shutting down audio engine");
            if thread.join().is_err() {
                warn!("Audio thread panicked");
            }
        }
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sonority_core::domain::config::AudioConfig;
    use sonority_core::domain::orchestrator::OrchestratorOptions;
    use sonority_core::domain::store::MemoryResourceStore;
    use sonority_core::domain::thread::AudioThread;
    use sonority_core::domain::virtual_backend::VirtualBackend;
    use std::sync::Arc;

    fn build(virt: Arc<VirtualBackend>) -> impl FnOnce() -> Result<AudioOrchestrator> + Send {
        move || {
            let resources = Arc::new(MemoryResourceStore::new());
            AudioOrchestrator::new(
                virt,
                Arc::new(AudioThread::new()),
                resources.clone(),
                resources,
                OrchestratorOptions {
                    config: AudioConfig::headless(),
                    ..OrchestratorOptions::default()
                },
            )
        }
    }

    #[test]
    fn test_tasks_run_on_audio_thread() {
        let virt = Arc::new(VirtualBackend::with_devices(&["Speakers"]));
        let mut engine = AudioEngine::start(build(virt), DEFAULT_TICK).unwrap();

        let (tx, rx) = bounded(1);
        assert!(engine.run(move |audio| {
            let _ = tx.send((thread::current().name().map(str::to_string), audio.to_string()));
        }));

        let (name, display) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("audio"));
        assert_eq!(display, "AudioOrchestrator (No sound)");

        engine.stop();
        assert!(!engine.is_running());
        assert!(!engine.run(|_| {}));
    }

    #[test]
    fn test_build_failure_is_reported() {
        let result = AudioEngine::start(
            || Err(AudioError::InvalidConfiguration("nope".to_string())),
            DEFAULT_TICK,
        );
        assert!(matches!(result, Err(AudioError::InvalidConfiguration(_))));
    }
}
