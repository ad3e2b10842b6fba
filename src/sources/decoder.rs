//! Audio decoding using symphonia.
//!
//! Turns any container symphonia can probe into the frame format the voice
//! transport expects: 20ms of 48kHz interleaved stereo f32 LE.

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use std::{collections::VecDeque, io::ErrorKind, thread, time::Duration};
use symphonia::core::{
    audio::SampleBuffer,
    codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL},
    errors::Error as SymphoniaError,
    formats::{FormatOptions, FormatReader},
    io::{MediaSource, MediaSourceStream},
    meta::{MetadataOptions, MetadataRevision, StandardTagKey},
    probe::Hint,
};
use tracing::{debug, warn};

use super::FrameSource;
use crate::{
    audio::{CHANNELS, FRAME_SAMPLES, SAMPLE_RATE},
    error::DecodeError,
};

/// Input frames handed to the resampler per call.
const RESAMPLE_CHUNK: usize = 1024;

/// Frames a decode thread may run ahead of its reader.
const THREAD_LOOKAHEAD: usize = 8;

type FrameResult = Result<Option<Bytes>, DecodeError>;

/// Tags and length read from a file without decoding it.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProbedInfo {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub duration: Option<Duration>,
}

fn probe(
    source: Box<dyn MediaSource>,
    extension: Option<&str>,
) -> Result<symphonia::core::probe::ProbeResult, DecodeError> {
    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }

    let stream = MediaSourceStream::new(source, Default::default());
    let probed = symphonia::default::get_probe().format(
        &hint,
        stream,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    Ok(probed)
}

/// Reads title, artist and duration. Blocking; call from a blocking task.
pub fn probe_info(
    source: Box<dyn MediaSource>,
    extension: Option<&str>,
) -> Result<ProbedInfo, DecodeError> {
    let mut probed = probe(source, extension)?;
    let mut info = ProbedInfo::default();

    if let Some(track) = probed.format.default_track() {
        let params = &track.codec_params;
        if let (Some(frames), Some(rate)) = (params.n_frames, params.sample_rate) {
            info.duration = Some(Duration::from_secs_f64(frames as f64 / rate as f64));
        }
    }

    // Tags dentro del contenedor tienen prioridad sobre ID3 externos
    if let Some(revision) = probed.format.metadata().current() {
        read_tags(revision, &mut info);
    }
    if info.title.is_none() {
        if let Some(metadata) = probed.metadata.get() {
            if let Some(revision) = metadata.current() {
                read_tags(revision, &mut info);
            }
        }
    }

    Ok(info)
}

fn read_tags(revision: &MetadataRevision, info: &mut ProbedInfo) {
    for tag in revision.tags() {
        match tag.std_key {
            Some(StandardTagKey::TrackTitle) if info.title.is_none() => {
                info.title = Some(tag.value.to_string());
            }
            Some(StandardTagKey::Artist) if info.artist.is_none() => {
                info.artist = Some(tag.value.to_string());
            }
            _ => {}
        }
    }
}

/// Decodes one track and slices it into 20ms frames.
pub struct SymphoniaFrameSource {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    resampler: Option<FastFixedIn<f32>>,
    /// Planar input waiting for a full resampler chunk.
    resample_input: Vec<Vec<f32>>,
    /// Interleaved 48kHz stereo samples ready to be framed.
    pending: VecDeque<f32>,
    finished: bool,
}

impl SymphoniaFrameSource {
    /// Probes the container and prepares a decoder. Blocking.
    pub fn new(source: Box<dyn MediaSource>, extension: Option<&str>) -> Result<Self, DecodeError> {
        let probed = probe(source, extension)?;
        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| DecodeError::Unsupported("no audio track found".to_string()))?;

        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| DecodeError::Unsupported("unknown sample rate".to_string()))?;

        let decoder =
            symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;
        let track_id = track.id;

        let resampler = if sample_rate == SAMPLE_RATE {
            None
        } else {
            debug!("Resampling from {}Hz to {}Hz", sample_rate, SAMPLE_RATE);
            let resampler = FastFixedIn::<f32>::new(
                SAMPLE_RATE as f64 / sample_rate as f64,
                1.0,
                PolynomialDegree::Cubic,
                RESAMPLE_CHUNK,
                CHANNELS,
            )
            .map_err(|e| DecodeError::Resample(e.to_string()))?;
            Some(resampler)
        };

        Ok(Self {
            format,
            decoder,
            track_id,
            resampler,
            resample_input: vec![Vec::new(); CHANNELS],
            pending: VecDeque::new(),
            finished: false,
        })
    }

    /// Decodes the next packet of our track. Returns `false` at end of stream.
    fn decode_packet(&mut self) -> Result<bool, DecodeError> {
        let packet = match self.format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                return Ok(false);
            }
            Err(SymphoniaError::ResetRequired) => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != self.track_id {
            return Ok(true);
        }

        let (samples, channels) = match self.decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buffer.copy_interleaved_ref(decoded);
                (buffer.samples().to_vec(), spec.channels.count())
            }
            Err(SymphoniaError::DecodeError(msg)) => {
                warn!("Paquete corrupto descartado: {}", msg);
                return Ok(true);
            }
            Err(e) => return Err(e.into()),
        };

        self.push_samples(&samples, channels)?;
        Ok(true)
    }

    /// Accepts interleaved samples with any channel count and stores them as
    /// stereo, resampling when needed.
    fn push_samples(&mut self, samples: &[f32], channels: usize) -> Result<(), DecodeError> {
        if channels == 0 {
            return Ok(());
        }

        let stereo = samples.chunks_exact(channels).map(|frame| {
            let left = frame[0];
            let right = if channels > 1 { frame[1] } else { left };
            (left, right)
        });

        let Some(resampler) = self.resampler.as_mut() else {
            for (left, right) in stereo {
                self.pending.push_back(left);
                self.pending.push_back(right);
            }
            return Ok(());
        };

        for (left, right) in stereo {
            self.resample_input[0].push(left);
            self.resample_input[1].push(right);
        }

        while self.resample_input[0].len() >= resampler.input_frames_next() {
            let needed = resampler.input_frames_next();
            let chunk: Vec<Vec<f32>> = self
                .resample_input
                .iter_mut()
                .map(|channel| channel.drain(..needed).collect())
                .collect();
            let output = resampler
                .process(&chunk, None)
                .map_err(|e| DecodeError::Resample(e.to_string()))?;
            interleave_into(&mut self.pending, &output);
        }

        Ok(())
    }

    /// Pushes whatever is left in the resampler once the stream has ended.
    fn flush_resampler(&mut self) -> Result<(), DecodeError> {
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(());
        };
        if self.resample_input[0].is_empty() {
            return Ok(());
        }

        let output = resampler
            .process_partial(Some(self.resample_input.as_slice()), None)
            .map_err(|e| DecodeError::Resample(e.to_string()))?;
        self.resample_input.iter_mut().for_each(Vec::clear);
        interleave_into(&mut self.pending, &output);
        Ok(())
    }

    /// One frame of audio; the last one is padded with silence.
    pub fn read_frame(&mut self) -> Result<Option<Bytes>, DecodeError> {
        let frame_len = FRAME_SAMPLES * CHANNELS;

        while self.pending.len() < frame_len && !self.finished {
            if !self.decode_packet()? {
                self.finished = true;
                self.flush_resampler()?;
            }
        }

        if self.pending.is_empty() {
            return Ok(None);
        }

        let mut frame = BytesMut::with_capacity(frame_len * std::mem::size_of::<f32>());
        for _ in 0..frame_len {
            frame.put_f32_le(self.pending.pop_front().unwrap_or(0.0));
        }
        Ok(Some(frame.freeze()))
    }
}

fn interleave_into(out: &mut VecDeque<f32>, planar: &[Vec<f32>]) {
    let frames = planar.iter().map(Vec::len).min().unwrap_or(0);
    for i in 0..frames {
        for channel in planar {
            out.push_back(channel[i]);
        }
    }
}

/// A [`SymphoniaFrameSource`] running on its own OS thread.
///
/// Probing, decoding and the reads underneath all block, so none of it may
/// run on a runtime worker. The thread exits once the track ends, decoding
/// fails, or this handle is dropped.
pub struct DecodeThread {
    frames: flume::Receiver<FrameResult>,
    finished: bool,
}

impl DecodeThread {
    /// Runs `open` and then the decoder on a new thread. Errors from `open`
    /// surface on the first [`FrameSource::next_frame`] call.
    pub fn spawn<F>(open: F) -> Result<Self, DecodeError>
    where
        F: FnOnce() -> Result<SymphoniaFrameSource, DecodeError> + Send + 'static,
    {
        let (tx, frames) = flume::bounded(THREAD_LOOKAHEAD);
        thread::Builder::new()
            .name("jukebox-decode".to_string())
            .spawn(move || decode_loop(open, tx))?;

        Ok(Self {
            frames,
            finished: false,
        })
    }
}

fn decode_loop<F>(open: F, tx: flume::Sender<FrameResult>)
where
    F: FnOnce() -> Result<SymphoniaFrameSource, DecodeError>,
{
    let mut source = match open() {
        Ok(source) => source,
        Err(e) => {
            let _ = tx.send(Err(e));
            return;
        }
    };

    loop {
        let result = source.read_frame();
        let more = matches!(result, Ok(Some(_)));
        if tx.send(result).is_err() {
            debug!("🛑 Hilo de decodificación sin lector, terminando");
            return;
        }
        if !more {
            return;
        }
    }
}

#[async_trait]
impl FrameSource for DecodeThread {
    async fn next_frame(&mut self) -> FrameResult {
        if self.finished {
            return Ok(None);
        }

        let result = match self.frames.recv_async().await {
            Ok(result) => result,
            Err(_) => Err(DecodeError::Aborted(
                "decode thread exited without finishing".to_string(),
            )),
        };
        if !matches!(result, Ok(Some(_))) {
            self.finished = true;
        }
        result
    }
}
