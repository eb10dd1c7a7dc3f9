//! Output stream management
//!
//! cpal streams are not `Send` on every platform, so they live on a dedicated
//! `cpal-output` thread. The backend talks to it over a command channel and
//! the stream callback renders the shared [`MixGraph`].

use super::mix::MixGraph;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::Stream;
use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use sonority_core::domain::audio::{AudioError, Result};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

enum Command {
    Open {
        device: String,
        reply: Sender<Result<StreamInfo>>,
    },
    Close,
}

/// What the opened stream ended up running at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub device: String,
    pub channels: u16,
    pub sample_rate: u32,
}

/// Owner of the `cpal-output` thread.
pub struct OutputThread {
    commands: Option<Sender<Command>>,
    handle: Option<JoinHandle<()>>,
}

fn open_stream(device_name: &str, graph: Arc<Mutex<MixGraph>>) -> Result<(Stream, StreamInfo)> {
    let host = cpal::default_host();
    #[allow(deprecated)]
    let device: cpal::Device = host
        .output_devices()
        .map_err(|e| AudioError::OsError(e.to_string()))?
        .find(|d| d.name().ok().as_deref() == Some(device_name))
        .ok_or_else(|| AudioError::DeviceNotFound(device_name.to_string()))?;

    let supported = device
        .default_output_config()
        .map_err(|e| AudioError::InvalidConfiguration(e.to_string()))?;
    let config = supported.config();

    let info = StreamInfo {
        device: device_name.to_string(),
        channels: config.channels,
        sample_rate: config.sample_rate,
    };

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| match graph.try_lock() {
                Ok(mut graph) => graph.render(data),
                // Contended with a control call; skip this buffer.
                Err(_) => data.fill(0.0),
            },
            |err| error!("Output stream error: {}", err),
            None,
        )
        .map_err(|e| AudioError::StreamError(format!("Failed to build stream: {}", e)))?;

    stream
        .play()
        .map_err(|e| AudioError::StreamError(format!("Failed to start stream: {}", e)))?;

    Ok((stream, info))
}

fn run(commands: Receiver<Command>, graph: Arc<Mutex<MixGraph>>) {
    let mut current: Option<Stream> = None;

    for command in commands {
        match command {
            Command::Open { device, reply } => {
                // Only one device plays at a time.
                current = None;
                let result = open_stream(&device, Arc::clone(&graph)).map(|(stream, info)| {
                    current = Some(stream);
                    info
                });
                if let Err(e) = &result {
                    warn!(device = %device, error = %e, "Failed to open output stream");
                }
                let _ = reply.send(result);
            }
            Command::Close => {
                if current.take().is_some() {
                    debug!("Output stream closed");
                }
            }
        }
    }

    drop(current);
    debug!("Output thread exiting");
}

impl OutputThread {
    pub fn spawn(graph: Arc<Mutex<MixGraph>>) -> Result<Self> {
        let (commands, rx) = unbounded();
        let handle = thread::Builder::new()
            .name("cpal-output".to_string())
            .spawn(move || run(rx, graph))
            .map_err(|e| AudioError::OsError(format!("failed to spawn output thread: {}", e)))?;

        Ok(Self {
            commands: Some(commands),
            handle: Some(handle),
        })
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .as_ref()
            .ok_or(AudioError::Disposed("OutputThread"))?
            .send(command)
            .map_err(|_| AudioError::StreamError("output thread is gone".to_string()))
    }

    /// Open an output stream on `device`, replacing any open stream.
    pub fn open(&self, device: &str) -> Result<StreamInfo> {
        let (reply, response) = bounded(1);
        self.send(Command::Open {
            device: device.to_string(),
            reply,
        })?;
        let info = response
            .recv()
            .map_err(|_| AudioError::StreamError("output thread is gone".to_string()))??;

        info!(
            device = %info.device,
            channels = info.channels,
            sample_rate = info.sample_rate,
            "Output stream started"
        );
        Ok(info)
    }

    pub fn close(&self) -> Result<()> {
        self.send(Command::Close)
    }

    pub fn shutdown(&mut self) {
        self.commands.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Output thread panicked");
            }
        }
    }
}

impl Drop for OutputThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}
