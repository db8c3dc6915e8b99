use std::io::Cursor;

use ringbuf::HeapRb;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};

/// Capture rate sent to the speech-to-text engine.
pub const CAPTURE_SAMPLE_RATE: u32 = 16000;

/// Floor of the level meter; anything quieter reads as 0.
const METER_FLOOR_DB: f32 = -60.0;

/// Decoded, mono audio
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / u64::from(self.sample_rate)
    }
}

pub fn create_resampler(in_sampling_rate: f64, out_sampling_rate: f64, chunk_size: usize) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1
    )?;
    Ok(resampler)
}

pub fn split_for_chunks(samples: &[f32], chunk_size: usize) -> Vec<Vec<f32>> {
    samples.chunks(chunk_size).map(|chunk| {
        let mut chunk = chunk.to_vec();
        chunk.resize(chunk_size, 0.0);
        chunk
    }).collect()
}

/// Converts mono samples between rates. The tail is zero-padded to a full chunk.
pub fn resample(samples: &[f32], from: u32, to: u32) -> anyhow::Result<Vec<f32>> {
    if from == to || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    let mut resampler = create_resampler(f64::from(from), f64::from(to), 1024)?;
    let chunk_size = resampler.input_frames_next();
    let mut out = Vec::with_capacity(samples.len() * to as usize / from as usize + chunk_size);
    for chunk in split_for_chunks(samples, chunk_size) {
        let resampled = resampler.process(&[chunk.as_slice()], None)?;
        if let Some(channel) = resampled.first() {
            out.extend_from_slice(channel);
        }
    }
    Ok(out)
}

pub fn shared_buffer(size: usize) -> HeapRb<f32> {
    HeapRb::new(size)
}

/// Averages interleaved frames down to one channel.
pub fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Energy of a block of samples on a 0-100 scale.
///
/// The RMS level is mapped linearly from -60 dBFS (0) to full scale (100).
pub fn level(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    let rms = (sum_sq / samples.len() as f32).sqrt();
    if rms <= 0.0 {
        return 0.0;
    }
    let db = (20.0 * rms.log10()).max(METER_FLOOR_DB);
    ((db - METER_FLOOR_DB) / -METER_FLOOR_DB * 100.0).clamp(0.0, 100.0)
}

/// Encodes mono samples as a 16-bit PCM WAV file.
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> anyhow::Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &sample in samples {
            let sample = (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Decodes an MP3 file to mono samples.
pub fn decode_mp3(mp3: &[u8]) -> anyhow::Result<DecodedAudio> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3));
    let mut samples = Vec::new();
    let mut sample_rate = 0;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = frame.sample_rate as u32;
                let channels = frame.channels.max(1);
                samples.extend(frame.data.chunks(channels).map(|c| {
                    c.iter().map(|&s| f32::from(s) / 32768.0).sum::<f32>() / c.len() as f32
                }));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(anyhow::anyhow!("mp3 decode error: {}", e)),
        }
    }

    if samples.is_empty() {
        return Err(anyhow::anyhow!("mp3 contained no audio frames"));
    }
    tracing::debug!("decoded {} samples at {}hz", samples.len(), sample_rate);
    Ok(DecodedAudio { samples, sample_rate })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_reads_zero() {
        assert_eq!(level(&[0.0; 256]), 0.0);
        assert_eq!(level(&[]), 0.0);
    }

    #[test]
    fn full_scale_reads_hundred() {
        let square: Vec<f32> = (0..256).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        assert!((level(&square) - 100.0).abs() < 0.01);
    }

    #[test]
    fn speech_level_is_above_default_threshold() {
        let tone: Vec<f32> = (0..1600).map(|i| 0.1 * (i as f32 * 0.05).sin()).collect();
        let l = level(&tone);
        assert!(l > 15.0 && l < 100.0, "level {}", l);
    }

    #[test]
    fn wav_has_riff_header_and_samples() {
        let wav = samples_to_wav(&[0.0, 0.5, -0.5, 1.0], CAPTURE_SAMPLE_RATE).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(wav.len(), 44 + 4 * 2);
    }

    #[test]
    fn downmix_averages_frames() {
        assert_eq!(downmix(&[1.0, 0.0, 0.5, 0.5], 2), vec![0.5, 0.5]);
        assert_eq!(downmix(&[0.25], 1), vec![0.25]);
    }

    #[test]
    fn garbage_is_not_mp3() {
        assert!(decode_mp3(b"definitely not an mp3").is_err());
    }
}
