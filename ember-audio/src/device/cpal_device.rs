//! cpal-backed device sink.
//!
//! `cpal::Stream` is not `Send`, so the stream lives on a dedicated output
//! thread for its whole life; the sink front-end owns only the lock-free
//! ring-buffer producers and is freely movable with the engine. The audio
//! callback drains every open stream's ring and mixes them additively
//! into the device buffer, underruns coming out as silence.

use super::{DeviceSink, StreamId};
use crate::buffer::BufferHandle;
use crate::error::{Error, Result};
use crate::types::{Format, SampleType};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Ring capacity per stream, in seconds of audio.
const RING_SECONDS: usize = 1;

struct StreamState {
    producer: HeapProd<f32>,
    format: Format,
}

pub struct CpalDevice {
    format: Format,
    streams: Vec<Option<StreamState>>,
    /// Consumer ends, shared with the audio callback.
    consumers: Arc<Mutex<Vec<Option<HeapCons<f32>>>>>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl CpalDevice {
    /// Open the default output device at the given rate and channel
    /// layout. Fails when no device is available or the configuration is
    /// not supported.
    pub fn open(format: Format) -> Result<Self> {
        let consumers: Arc<Mutex<Vec<Option<HeapCons<f32>>>>> = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));

        let (ready_tx, ready_rx) = mpsc::channel::<std::result::Result<(), String>>();
        let thread_consumers = Arc::clone(&consumers);
        let thread_stop = Arc::clone(&stop);

        let worker = std::thread::Builder::new()
            .name("audio-output".into())
            .spawn(move || {
                run_output_thread(format, thread_consumers, thread_stop, ready_tx);
            })
            .map_err(|e| Error::Device(format!("failed to spawn output thread: {}", e)))?;

        match ready_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(Error::Device(e)),
            Err(_) => return Err(Error::Device("audio output thread did not start".into())),
        }

        info!("Audio device opened. [format={}]", format);
        Ok(Self {
            format,
            streams: Vec::new(),
            consumers,
            stop,
            worker: Some(worker),
        })
    }
}

fn run_output_thread(
    format: Format,
    consumers: Arc<Mutex<Vec<Option<HeapCons<f32>>>>>,
    stop: Arc<AtomicBool>,
    ready: mpsc::Sender<std::result::Result<(), String>>,
) {
    let host = cpal::default_host();
    let Some(device) = host.default_output_device() else {
        let _ = ready.send(Err("no audio output device available".into()));
        return;
    };

    let sample_format = match device.default_output_config() {
        Ok(config) => config.sample_format(),
        Err(e) => {
            let _ = ready.send(Err(format!("no default output config: {}", e)));
            return;
        }
    };

    let config = StreamConfig {
        channels: format.channel_count,
        sample_rate: cpal::SampleRate(format.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = match sample_format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, consumers, |s| s),
        SampleFormat::I16 => {
            build_stream::<i16>(&device, &config, consumers, |s| (s * i16::MAX as f32) as i16)
        }
        SampleFormat::U16 => build_stream::<u16>(&device, &config, consumers, |s| {
            ((s + 1.0) * 32767.5) as u16
        }),
        other => Err(format!("unsupported device sample format: {:?}", other)),
    };

    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready.send(Err(format!("failed to start stream: {}", e)));
        return;
    }
    let _ = ready.send(Ok(()));
    debug!("Audio output thread running");

    // The stream must stay alive on this thread; park until shutdown.
    while !stop.load(Ordering::Acquire) {
        std::thread::sleep(Duration::from_millis(50));
    }
    drop(stream);
    debug!("Audio output thread stopped");
}

fn build_stream<T: cpal::SizedSample + Send + 'static>(
    device: &cpal::Device,
    config: &StreamConfig,
    consumers: Arc<Mutex<Vec<Option<HeapCons<f32>>>>>,
    convert: impl Fn(f32) -> T + Send + 'static,
) -> std::result::Result<cpal::Stream, String> {
    let mut mix: Vec<f32> = Vec::new();
    let mut scratch: Vec<f32> = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                mix.clear();
                mix.resize(data.len(), 0.0);
                scratch.resize(data.len(), 0.0);

                if let Ok(mut consumers) = consumers.lock() {
                    for consumer in consumers.iter_mut().flatten() {
                        let popped = consumer.pop_slice(&mut scratch[..data.len()]);
                        for (acc, &sample) in mix.iter_mut().zip(&scratch[..popped]) {
                            *acc += sample;
                        }
                    }
                }

                for (out, &sample) in data.iter_mut().zip(&mix) {
                    *out = convert(sample.clamp(-1.0, 1.0));
                }
            },
            move |err| {
                warn!("Audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| format!("failed to build stream: {}", e))
}

impl DeviceSink for CpalDevice {
    fn open_stream(&mut self, name: &str, format: Format) -> Result<StreamId> {
        if format.sample_rate != self.format.sample_rate
            || format.channel_count != self.format.channel_count
        {
            return Err(Error::Device(format!(
                "stream format {} does not match device format {}",
                format, self.format
            )));
        }

        let capacity = self.format.sample_rate as usize
            * self.format.channel_count as usize
            * RING_SECONDS;
        let (producer, consumer) = HeapRb::<f32>::new(capacity).split();

        let mut consumers = self.consumers.lock().unwrap_or_else(|e| e.into_inner());
        consumers.push(Some(consumer));
        self.streams.push(Some(StreamState { producer, format }));
        debug!("Opened device stream. [name={}, format={}]", name, format);
        Ok(self.streams.len() - 1)
    }

    fn queue_buffer(&mut self, stream: StreamId, buffer: BufferHandle) -> Result<()> {
        let state = match self.streams.get_mut(stream) {
            Some(Some(state)) => state,
            _ => return Err(Error::Device(format!("unknown stream {}", stream))),
        };

        let pushed = match buffer.sample_type() {
            SampleType::Float32 => state.producer.push_slice(buffer.as_f32()),
            SampleType::Int16 => {
                let samples: Vec<f32> = buffer
                    .as_i16()
                    .iter()
                    .map(|&s| s as f32 / i16::MAX as f32)
                    .collect();
                state.producer.push_slice(&samples)
            }
            SampleType::Int32 => {
                let samples: Vec<f32> = buffer
                    .as_i32()
                    .iter()
                    .map(|&s| s as f32 / i32::MAX as f32)
                    .collect();
                state.producer.push_slice(&samples)
            }
        };

        let total = buffer.frame_count() * state.format.channel_count as usize;
        if pushed < total {
            warn!(
                "Device stream overrun, dropping samples. [stream={}, dropped={}]",
                stream,
                total - pushed
            );
        }
        Ok(())
    }

    fn buffered_ms(&self, stream: StreamId) -> u32 {
        match self.streams.get(stream) {
            Some(Some(state)) => {
                let frames = state.producer.occupied_len() / state.format.channel_count as usize;
                ember_common::timing::frames_to_ms(state.format.sample_rate, frames) as u32
            }
            _ => 0,
        }
    }

    fn close_stream(&mut self, stream: StreamId) {
        if let Some(slot) = self.streams.get_mut(stream) {
            *slot = None;
        }
        let mut consumers = self.consumers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = consumers.get_mut(stream) {
            *slot = None;
        }
    }
}

impl Drop for CpalDevice {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
