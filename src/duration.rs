//! Out-of-band duration estimation for individual chunks.
//!
//! Estimation decodes its own copy of a chunk and never touches the bytes
//! handed to the playback buffer. It is best-effort metadata: any failure
//! degrades to a zero-length contribution.

use bytes::Bytes;
use log::debug;
use std::io::Cursor;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};

use crate::error::DecodeError;

pub trait DurationEstimator: Send + Sync {
    /// Decode `data` and return its playable length in seconds.
    fn decode_duration(&self, data: Bytes) -> Result<f64, DecodeError>;

    /// Like [`decode_duration`](Self::decode_duration), but a failure yields `0.0`.
    fn estimate(&self, data: Bytes) -> f64 {
        match self.decode_duration(data) {
            Ok(seconds) => seconds,
            Err(e) => {
                debug!("Duration estimate failed, counting 0s: {}", e);
                0.0
            }
        }
    }
}

/// Estimator backed by a full symphonia decode of the chunk.
#[derive(Debug, Clone, Default)]
pub struct SymphoniaEstimator {
    extension: Option<String>,
}

impl SymphoniaEstimator {
    /// Probe with a file extension hint (e.g. `"mp3"`).
    pub fn with_extension(extension: impl Into<String>) -> Self {
        Self {
            extension: Some(extension.into()),
        }
    }
}

impl DurationEstimator for SymphoniaEstimator {
    fn decode_duration(&self, data: Bytes) -> Result<f64, DecodeError> {
        if data.is_empty() {
            return Err(DecodeError::Empty);
        }

        let mss = MediaSourceStream::new(Box::new(Cursor::new(data)), MediaSourceStreamOptions::default());

        let mut hint = Hint::new();
        if let Some(ext) = &self.extension {
            hint.with_extension(ext);
        }

        let probed = get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;
        let mut format = probed.format;

        let track = format.default_track().ok_or(DecodeError::NoTrack)?;
        let track_id = track.id;
        let mut decoder = get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

        let mut seconds = 0.0;
        let mut decoded_any = false;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) if decoded_any => {
                    // A chunk boundary can cut the final frame short.
                    debug!("Stopping estimate at truncated packet: {}", e);
                    break;
                }
                Err(e) => return Err(e.into()),
            };

            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(audio_buf) => {
                    let rate = audio_buf.spec().rate;
                    if rate == 0 {
                        return Err(DecodeError::Unsupported);
                    }
                    seconds += audio_buf.frames() as f64 / rate as f64;
                    decoded_any = true;
                }
                // Non-fatal, skip bad frame
                Err(SymphoniaError::DecodeError(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(seconds)
    }
}
