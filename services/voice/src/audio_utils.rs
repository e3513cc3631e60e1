use rubato::{FastFixedIn, PolynomialDegree};

/// Sample rate of G.711 µ-law (PCMU) as negotiated with the peer.
pub const PCMU_SAMPLE_RATE: f64 = 8000.0;

/// 20 ms of PCMU audio, one byte per sample.
pub const PCMU_FRAME_LEN: usize = 160;

const ULAW_BIAS: i32 = 0x84;
const ULAW_CLIP: i32 = 32635;

/// Creates a mono resampler between two sample rates.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1,
    )?;
    Ok(resampler)
}

/// Compresses one 16-bit linear sample to G.711 µ-law.
pub fn ulaw_encode(sample: i16) -> u8 {
    let mut value = sample as i32;
    let sign = if value < 0 {
        value = -value;
        0x80
    } else {
        0x00
    };
    value = value.min(ULAW_CLIP) + ULAW_BIAS;

    let exponent = (7 - (value >> 7).leading_zeros().saturating_sub(24).min(7)) as i32;
    let mantissa = (value >> (exponent + 3)) & 0x0F;
    !(sign | (exponent << 4) as u8 | mantissa as u8)
}

/// Expands one G.711 µ-law byte to a 16-bit linear sample.
pub fn ulaw_decode(encoded: u8) -> i16 {
    let byte = !encoded;
    let sign = byte & 0x80;
    let exponent = ((byte >> 4) & 0x07) as i32;
    let mantissa = (byte & 0x0F) as i32;
    let magnitude = (((mantissa << 3) + ULAW_BIAS) << exponent) - ULAW_BIAS;
    if sign != 0 { -magnitude as i16 } else { magnitude as i16 }
}

/// Converts a slice of f32 samples to a vector of i16 samples.
pub fn convert_f32_to_i16(pcm32: &[f32]) -> Vec<i16> {
    pcm32
        .iter()
        .map(|&sample| (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

/// Encodes f32 samples in `[-1.0, 1.0]` as µ-law bytes.
pub fn encode_f32_to_ulaw(pcm32: &[f32]) -> Vec<u8> {
    convert_f32_to_i16(pcm32).into_iter().map(ulaw_encode).collect()
}

/// Decodes µ-law bytes to f32 samples in `[-1.0, 1.0]`.
pub fn decode_ulaw_to_f32(encoded: &[u8]) -> Vec<f32> {
    encoded
        .iter()
        .map(|&byte| ulaw_decode(byte) as f32 / 32768.0)
        .collect()
}

/// Cuts a continuous µ-law stream into fixed 20 ms frames.
#[derive(Default)]
pub struct Framer {
    pending: Vec<u8>,
}

impl Framer {
    /// Appends `encoded` and returns every complete frame now available.
    pub fn push(&mut self, encoded: &[u8]) -> Vec<Vec<u8>> {
        self.pending.extend_from_slice(encoded);
        let complete = self.pending.len() / PCMU_FRAME_LEN * PCMU_FRAME_LEN;
        self.pending
            .drain(..complete)
            .collect::<Vec<_>>()
            .chunks(PCMU_FRAME_LEN)
            .map(<[u8]>::to_vec)
            .collect()
    }
}
