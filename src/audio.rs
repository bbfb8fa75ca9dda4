//! Rodio-backed playback surface.
//!
//! Each pipeline owns a growing byte buffer that chunk appends extend and a
//! blocking decode task that reads from it through Symphonia, pushing PCM
//! into a rodio [`Sink`]. The decoder blocks while no new bytes are
//! available; if the sink has played everything by then, the pipeline
//! reports [`SinkEvent::Waiting`] once for that stall.

use anyhow::Result;
use bytes::Bytes;
use log::{debug, warn};
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamHandle, Sink};
use std::io::{Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSource, MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};
use tokio::sync::mpsc;

use crate::error::SinkError;
use crate::surface::{MediaPipeline, MediaSink, PlaybackSurface, SinkEvent};

const READ_WAIT: Duration = Duration::from_millis(100);
const CLEANUP_THRESHOLD: usize = 2 * 1024 * 1024; // Drop consumed bytes past 2MB
const MAX_QUEUED_SOURCES: usize = 32;
const CONTAINER_HINT: &str = "mp3";

#[derive(Debug, Default)]
struct StreamBuffer {
    data: Vec<u8>,
    pos: usize,
    closed: bool,
    stall_reported: bool,
}

#[derive(Debug, Default)]
struct SharedBuffer {
    state: Mutex<StreamBuffer>,
    ready: Condvar,
}

impl SharedBuffer {
    fn lock(&self) -> MutexGuard<'_, StreamBuffer> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

/// Blocking reader over a pipeline's appended bytes, fed to Symphonia.
struct StreamingReader {
    shared: Arc<SharedBuffer>,
    sink: Arc<Sink>,
    events: mpsc::UnboundedSender<SinkEvent>,
}

impl Read for StreamingReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut state = self.shared.lock();
        loop {
            if state.pos < state.data.len() {
                let n = buf.len().min(state.data.len() - state.pos);
                buf[..n].copy_from_slice(&state.data[state.pos..state.pos + n]);
                state.pos += n;

                if state.pos > CLEANUP_THRESHOLD {
                    let consumed = state.pos;
                    state.data.drain(..consumed);
                    state.pos = 0;
                    debug!("Cleaned up {}KB of read data", consumed / 1024);
                }
                return Ok(n);
            }

            if state.closed {
                return Ok(0);
            }

            let (guard, timeout) = self
                .shared
                .ready
                .wait_timeout(state, READ_WAIT)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;

            if timeout.timed_out() && !state.stall_reported && self.sink.empty() {
                state.stall_reported = true;
                debug!("Playback waiting for data");
                let _ = self.events.send(SinkEvent::Waiting);
            }
        }
    }
}

impl Seek for StreamingReader {
    fn seek(&mut self, _: SeekFrom) -> std::io::Result<u64> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "seek not supported",
        ))
    }
}

impl MediaSource for StreamingReader {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

/// Write end of a rodio pipeline. Appends complete synchronously, so the
/// sink acknowledges each one straight away.
struct RodioMediaSink {
    shared: Arc<SharedBuffer>,
    sink: Arc<Sink>,
    events: mpsc::UnboundedSender<SinkEvent>,
    duration: Arc<AtomicU64>,
}

impl MediaSink for RodioMediaSink {
    fn append(&mut self, data: Bytes) -> Result<(), SinkError> {
        {
            let mut state = self.shared.lock();
            if state.closed {
                return Err(SinkError::Closed);
            }
            state.data.extend_from_slice(&data);
            state.stall_reported = false;
        }
        self.shared.ready.notify_all();

        let _ = self.events.send(SinkEvent::UpdateEnd);
        Ok(())
    }

    fn is_updating(&self) -> bool {
        false
    }

    fn set_duration(&mut self, seconds: f64) -> Result<(), SinkError> {
        if self.shared.is_closed() {
            return Err(SinkError::Closed);
        }
        self.duration.store(seconds.to_bits(), Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) {
        self.shared.lock().closed = true;
        self.shared.ready.notify_all();
        self.sink.stop();
    }
}

/// Plays pipelines through the default audio output.
pub struct RodioSurface {
    handle: OutputStreamHandle,
    current: Mutex<Option<Arc<Sink>>>,
    duration: Arc<AtomicU64>,
    paused: AtomicBool,
}

impl RodioSurface {
    /// Open the default output device. The returned [`OutputStream`] must be
    /// kept alive for as long as anything plays.
    pub fn try_default() -> Result<(OutputStream, Self)> {
        let (stream, handle) = OutputStream::try_default()?;
        Ok((stream, Self::new(handle)))
    }

    pub fn new(handle: OutputStreamHandle) -> Self {
        Self {
            handle,
            current: Mutex::new(None),
            duration: Arc::new(AtomicU64::new(0f64.to_bits())),
            paused: AtomicBool::new(false),
        }
    }

    fn current_sink(&self) -> Option<Arc<Sink>> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl PlaybackSurface for RodioSurface {
    fn open_pipeline(&self) -> Result<MediaPipeline, SinkError> {
        let sink = Sink::try_new(&self.handle).map_err(|e| SinkError::Output(e.to_string()))?;
        let sink = Arc::new(sink);
        let shared = Arc::new(SharedBuffer::default());
        let (tx, rx) = mpsc::unbounded_channel();

        self.duration.store(0f64.to_bits(), Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(sink.clone());

        let reader = StreamingReader {
            shared: shared.clone(),
            sink: sink.clone(),
            events: tx.clone(),
        };
        let decode_sink = sink.clone();
        let decode_events = tx.clone();
        tokio::task::spawn_blocking(move || {
            decode_blocking_task(reader, decode_sink, decode_events)
        });

        Ok(MediaPipeline {
            sink: Box::new(RodioMediaSink {
                shared,
                sink,
                events: tx,
                duration: self.duration.clone(),
            }),
            events: rx,
        })
    }

    fn pause(&self) {
        if let Some(sink) = self.current_sink() {
            sink.pause();
        }
        self.paused.store(true, Ordering::SeqCst);
        debug!("Audio paused");
    }

    fn resume(&self) {
        if let Some(sink) = self.current_sink() {
            sink.play();
        }
        self.paused.store(false, Ordering::SeqCst);
        debug!("Audio resumed");
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn duration(&self) -> f64 {
        f64::from_bits(self.duration.load(Ordering::SeqCst))
    }
}

/// Probe the stream and decode it into `sink` until the pipeline closes.
fn decode_blocking_task(
    reader: StreamingReader,
    sink: Arc<Sink>,
    events: mpsc::UnboundedSender<SinkEvent>,
) {
    let shared = reader.shared.clone();
    let mss = MediaSourceStream::new(
        Box::new(reader) as Box<dyn MediaSource>,
        MediaSourceStreamOptions::default(),
    );

    let (format, decoder) = match open_decoder(mss) {
        Ok(opened) => opened,
        Err(e) => {
            if !shared.is_closed() {
                warn!("Could not open audio stream: {}", e);
                let _ = events.send(SinkEvent::Error(SinkError::Rejected(e.to_string())));
            }
            return;
        }
    };

    decode_packets(format, decoder, &sink, &shared);
    debug!("Decode blocking task ended");
}

fn open_decoder(
    mss: MediaSourceStream,
) -> Result<(Box<dyn FormatReader>, Box<dyn Decoder>), SymphoniaError> {
    let mut hint = Hint::new();
    hint.with_extension(CONTAINER_HINT);

    let probed = get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let format = probed.format;

    let track = format
        .default_track()
        .ok_or(SymphoniaError::Unsupported("no default track"))?;
    let decoder = get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    debug!(
        "Found audio track: codec={:?}, sample_rate={:?}, channels={:?}",
        track.codec_params.codec, track.codec_params.sample_rate, track.codec_params.channels
    );

    Ok((format, decoder))
}

fn decode_packets(
    mut format: Box<dyn FormatReader>,
    mut decoder: Box<dyn Decoder>,
    sink: &Sink,
    shared: &SharedBuffer,
) {
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!("Stream closed");
                break;
            }
            Err(SymphoniaError::ResetRequired) => {
                warn!("Decoder reset required (unsupported)");
                break;
            }
            Err(e) => {
                debug!("Format error: {}", e);
                break;
            }
        };

        let audio_buf = match decoder.decode(&packet) {
            Ok(audio_buf) => audio_buf,
            Err(SymphoniaError::DecodeError(e)) => {
                debug!("Skipping bad frame: {}", e);
                continue;
            }
            Err(e) => {
                debug!("Decoder error: {}", e);
                break;
            }
        };

        let spec = *audio_buf.spec();
        let mut samples = SampleBuffer::<f32>::new(audio_buf.capacity() as u64, spec);
        samples.copy_interleaved_ref(audio_buf);
        let source = SamplesBuffer::new(
            spec.channels.count() as u16,
            spec.rate,
            samples.samples().to_vec(),
        );

        // Decoder is faster than playback
        while sink.len() > MAX_QUEUED_SOURCES {
            if shared.is_closed() {
                return;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        if shared.is_closed() {
            return;
        }
        sink.append(source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn idle_pipeline() -> (StreamingReader, RodioMediaSink, mpsc::UnboundedReceiver<SinkEvent>) {
        let (sink, _output) = Sink::new_idle();
        let sink = Arc::new(sink);
        let shared = Arc::new(SharedBuffer::default());
        let (tx, rx) = mpsc::unbounded_channel();

        let reader = StreamingReader {
            shared: shared.clone(),
            sink: sink.clone(),
            events: tx.clone(),
        };
        let media_sink = RodioMediaSink {
            shared,
            sink,
            events: tx,
            duration: Arc::new(AtomicU64::new(0)),
        };
        (reader, media_sink, rx)
    }

    #[test]
    fn test_append_is_acknowledged_and_readable() {
        let (mut reader, mut sink, mut events) = idle_pipeline();

        sink.append(Bytes::from_static(b"abcdef")).unwrap();
        assert_eq!(events.try_recv().unwrap(), SinkEvent::UpdateEnd);

        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(reader.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
    }

    #[test]
    fn test_read_blocks_until_append() {
        let (mut reader, mut sink, _events) = idle_pipeline();

        let handle = thread::spawn(move || {
            let mut buf = [0u8; 8];
            let n = reader.read(&mut buf).unwrap();
            buf[..n].to_vec()
        });

        thread::sleep(Duration::from_millis(30));
        sink.append(Bytes::from_static(b"late")).unwrap();

        assert_eq!(handle.join().unwrap(), b"late".to_vec());
    }

    #[test]
    fn test_stall_on_empty_sink_reported_once() {
        let (mut reader, mut sink, mut events) = idle_pipeline();
        sink.append(Bytes::from_static(b"xy")).unwrap();
        assert_eq!(events.try_recv().unwrap(), SinkEvent::UpdateEnd);

        let mut buf = [0u8; 2];
        reader.read(&mut buf).unwrap();

        let handle = thread::spawn(move || {
            let mut buf = [0u8; 2];
            reader.read(&mut buf).unwrap()
        });
        thread::sleep(READ_WAIT * 3 + Duration::from_millis(50));
        sink.close();

        assert_eq!(handle.join().unwrap(), 0);
        assert_eq!(events.try_recv().unwrap(), SinkEvent::Waiting);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_close_ends_stream_and_rejects_appends() {
        let (mut reader, mut sink, _events) = idle_pipeline();
        sink.append(Bytes::from_static(b"tail")).unwrap();
        sink.close();

        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).unwrap(), 4);
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
        assert_eq!(sink.append(Bytes::from_static(b"more")), Err(SinkError::Closed));
        assert_eq!(sink.set_duration(1.0), Err(SinkError::Closed));
    }

    #[test]
    fn test_consumed_bytes_are_dropped() {
        let (mut reader, mut sink, _events) = idle_pipeline();
        sink.append(Bytes::from(vec![7u8; 3 * 1024 * 1024])).unwrap();

        let mut buf = vec![0u8; 64 * 1024];
        let mut read = 0;
        while read <= CLEANUP_THRESHOLD {
            read += reader.read(&mut buf).unwrap();
        }

        let state = reader.shared.lock();
        assert_eq!(state.pos, 0);
        assert_eq!(state.data.len(), 3 * 1024 * 1024 - read);
    }

    #[test]
    fn test_set_duration_is_published() {
        let (_reader, mut sink, _events) = idle_pipeline();
        let duration = sink.duration.clone();

        sink.set_duration(12.5).unwrap();

        assert_eq!(f64::from_bits(duration.load(Ordering::SeqCst)), 12.5);
    }
}
