use super::mixer::Mixer;
use super::output::{ChainId, OutputSink};
use crate::models::DecodedWindow;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use thiserror::Error;
use tracing::{error, info};

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("No output device found")]
    DeviceNotFound,
    #[error("Stream config error: {0}")]
    StreamConfig(String),
    #[error("Stream build error: {0}")]
    StreamBuild(String),
    #[error("Stream play error: {0}")]
    StreamPlay(String),
    #[error("Audio thread exited before the stream started")]
    ThreadExited,
}

/// Output sink that mixes scheduled windows into the default cpal device
///
/// The cpal stream is not `Send`, so it lives on a dedicated thread for the
/// lifetime of the sink. Dropping the sink stops the stream.
pub struct CpalSink {
    mixer: Arc<Mutex<Mixer>>,
    sample_rate: u32,
    channels: u16,
    shutdown_tx: mpsc::Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl CpalSink {
    /// Open the default output device and start rendering
    pub fn new() -> Result<Self, OutputError> {
        let (ready_tx, ready_rx) = mpsc::channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("stemdeck-audio".to_string())
            .spawn(move || {
                let stream = match build_stream() {
                    Ok((stream, mixer, config)) => {
                        let _ = ready_tx.send(Ok((mixer, config)));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Park until the sink is dropped
                let _ = shutdown_rx.recv();
                drop(stream);
                info!("Audio output stopped");
            })
            .map_err(|_| OutputError::ThreadExited)?;

        let (mixer, config) = ready_rx.recv().map_err(|_| OutputError::ThreadExited)??;
        let sample_rate = config.sample_rate.0;
        let channels = config.channels;

        Ok(Self {
            mixer,
            sample_rate,
            channels,
            shutdown_tx,
            thread: Some(thread),
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    fn mixer(&self) -> MutexGuard<'_, Mixer> {
        self.mixer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn build_stream() -> Result<(cpal::Stream, Arc<Mutex<Mixer>>, StreamConfig), OutputError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(OutputError::DeviceNotFound)?;

    let default_config = device
        .default_output_config()
        .map_err(|e| OutputError::StreamConfig(e.to_string()))?;
    let stream_config = StreamConfig::from(default_config.clone());

    info!(
        "Audio device: {} channels, {} Hz, {:?}",
        stream_config.channels,
        stream_config.sample_rate.0,
        default_config.sample_format()
    );

    let mixer = Arc::new(Mutex::new(Mixer::new(
        stream_config.sample_rate.0,
        stream_config.channels,
    )));
    let mixer_for_callback = mixer.clone();

    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                mixer_for_callback
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .render(data);
            },
            |err| {
                error!("Audio stream error: {:?}", err);
            },
            None,
        )
        .map_err(|e| OutputError::StreamBuild(e.to_string()))?;

    stream
        .play()
        .map_err(|e| OutputError::StreamPlay(e.to_string()))?;

    Ok((stream, mixer, stream_config))
}

impl OutputSink for CpalSink {
    fn now(&self) -> f64 {
        self.mixer().now()
    }

    fn create_chain(&self, gain: f32) -> ChainId {
        self.mixer().create_chain(gain)
    }

    fn set_gain(&self, chain: ChainId, gain: f32) {
        self.mixer().set_gain(chain, gain);
    }

    fn detach(&self, chain: ChainId) {
        self.mixer().detach(chain);
    }

    fn schedule(&self, chain: ChainId, window: Arc<DecodedWindow>, when: f64) {
        self.mixer().schedule(chain, window, when);
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
