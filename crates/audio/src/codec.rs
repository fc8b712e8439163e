//! Codec PCM 16 bits + base64
//!
//! Le service vocal échange de l'audio brut : PCM 16 bits signé little-endian,
//! transporté en base64 dans des messages texte. Ce module fait la conversion
//! entre nos échantillons flottants et cette représentation filaire.
//!
//! Les fonctions sont pures : aucun état partagé, chaque appel alloue localement.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::{
    AudioCodec, AudioError, AudioFrame, AudioResult, EncodedChunk, Sample,
    error::PCM16_SAMPLE_WIDTH, types::pcm_mime_type,
};

/// Échelle de quantification 16 bits
const PCM16_SCALE: f32 = 32768.0;

/// Plage de fréquences acceptée pour un fragment reçu
pub const MIN_SAMPLE_RATE: u32 = 8_000;
pub const MAX_SAMPLE_RATE: u32 = 96_000;

/// Quantifie des échantillons flottants en octets PCM 16 bits little-endian
///
/// Les valeurs hors de [-1.0, 1.0] sont écrêtées.
pub fn quantize_pcm16(samples: &[Sample]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * PCM16_SAMPLE_WIDTH);
    for &sample in samples {
        let clamped = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };
        let quantized = (clamped * PCM16_SCALE)
            .round()
            .clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        bytes.extend_from_slice(&quantized.to_le_bytes());
    }
    bytes
}

/// Convertit des octets PCM 16 bits little-endian en échantillons normalisés
///
/// # Erreurs
/// - `AudioError::FormatError` si la longueur n'est pas un multiple de 2
pub fn dequantize_pcm16(bytes: &[u8]) -> AudioResult<Vec<Sample>> {
    if bytes.len() % PCM16_SAMPLE_WIDTH != 0 {
        return Err(AudioError::FormatError {
            len: bytes.len(),
            sample_width: PCM16_SAMPLE_WIDTH,
        });
    }

    Ok(bytes
        .chunks_exact(PCM16_SAMPLE_WIDTH)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / PCM16_SCALE)
        .collect())
}

/// Codec PCM 16 bits pour le service vocal
///
/// # Example
/// ```rust
/// use audio::{AudioCodec, AudioFrame, PcmCodec};
///
/// let codec = PcmCodec::new(16000);
/// let frame = AudioFrame::new(vec![0.0, 0.5, -0.5], 16000, 1, 0);
///
/// let chunk = codec.encode(&frame);
/// assert_eq!(chunk.mime_type, "audio/pcm;rate=16000");
///
/// let bytes = codec.decode(&chunk).unwrap();
/// let decoded = codec.decode_audio_samples(&bytes, 16000, 1).unwrap();
/// assert_eq!(decoded.samples.len(), 3);
/// ```
#[derive(Clone, Debug)]
pub struct PcmCodec {
    /// Fréquence annoncée dans le type MIME des chunks produits
    sample_rate: u32,
}

impl PcmCodec {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }

    /// Codec pour les frames capturées avec cette configuration
    pub fn for_capture(config: &crate::AudioConfig) -> Self {
        Self::new(config.capture_sample_rate)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl AudioCodec for PcmCodec {
    fn encode(&self, frame: &AudioFrame) -> EncodedChunk {
        let bytes = quantize_pcm16(&frame.samples);
        EncodedChunk::new(STANDARD.encode(bytes), pcm_mime_type(self.sample_rate))
    }

    fn decode(&self, chunk: &EncodedChunk) -> AudioResult<Vec<u8>> {
        Ok(STANDARD.decode(chunk.data.as_bytes())?)
    }

    fn decode_audio_samples(&self, bytes: &[u8], sample_rate: u32, channels: u16) -> AudioResult<AudioFrame> {
        if channels == 0 {
            return Err(AudioError::ConfigError("Nombre de canaux nul".to_string()));
        }
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&sample_rate) {
            return Err(AudioError::UnsupportedSampleRate(sample_rate));
        }

        let frame_width = PCM16_SAMPLE_WIDTH * channels as usize;
        if bytes.len() % frame_width != 0 {
            return Err(AudioError::FormatError {
                len: bytes.len(),
                sample_width: frame_width,
            });
        }

        let samples = dequantize_pcm16(bytes)?;
        Ok(AudioFrame::new(samples, sample_rate, channels, 0))
    }

    fn codec_info(&self) -> String {
        format!("PCM 16 bits LE / base64 @ {} Hz", self.sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantization_bounds() {
        let bytes = quantize_pcm16(&[1.0, -1.0, 2.5, -3.0, 0.0]);
        let values: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|p| i16::from_le_bytes([p[0], p[1]]))
            .collect();
        assert_eq!(values, vec![i16::MAX, i16::MIN, i16::MAX, i16::MIN, 0]);
    }

    #[test]
    fn test_round_trip_error_bound() {
        let codec = PcmCodec::new(16000);

        // Balayage de toute la plage représentable, bornes comprises
        let samples: Vec<f32> = (0..=4000)
            .map(|i| (-1.0 + i as f32 * (2.0 / 4000.0)).clamp(-1.0, 1.0))
            .collect();
        let frame = AudioFrame::new(samples.clone(), 16000, 1, 0);

        let chunk = codec.encode(&frame);
        let bytes = codec.decode(&chunk).unwrap();
        let decoded = codec.decode_audio_samples(&bytes, 16000, 1).unwrap();

        assert_eq!(decoded.samples.len(), samples.len());
        for (original, restored) in samples.iter().zip(&decoded.samples) {
            assert!(
                (original - restored).abs() <= 1.0 / 32768.0 + f32::EPSILON,
                "écart trop grand: {} -> {}", original, restored
            );
        }
    }

    #[test]
    fn test_decode_rejects_bad_alphabet() {
        let codec = PcmCodec::new(16000);
        let chunk = EncodedChunk::new("pas du base64 !".to_string(), "audio/pcm;rate=24000");
        assert!(matches!(codec.decode(&chunk), Err(AudioError::DecodeError(_))));
    }

    #[test]
    fn test_decode_rejects_odd_length() {
        let codec = PcmCodec::new(24000);
        let result = codec.decode_audio_samples(&[0x01, 0x02, 0x03], 24000, 1);
        assert!(matches!(result, Err(AudioError::FormatError { len: 3, sample_width: 2 })));

        // Stéréo : il faut un multiple de 4 octets
        let result = codec.decode_audio_samples(&[0, 0, 0, 0, 0, 0], 24000, 2);
        assert!(matches!(result, Err(AudioError::FormatError { len: 6, sample_width: 4 })));
    }

    #[test]
    fn test_decode_rejects_out_of_range_rate() {
        let codec = PcmCodec::new(24000);
        let bytes = vec![0u8; 4800];

        for rate in [0, 1, 4000, 192_000] {
            let result = codec.decode_audio_samples(&bytes, rate, 1);
            assert!(matches!(result, Err(AudioError::UnsupportedSampleRate(r)) if r == rate));
        }
        assert!(codec.decode_audio_samples(&bytes, MIN_SAMPLE_RATE, 1).is_ok());
        assert!(codec.decode_audio_samples(&bytes, MAX_SAMPLE_RATE, 1).is_ok());
    }

    #[test]
    fn test_decoded_frame_metadata() {
        let codec = PcmCodec::new(16000);
        let bytes = vec![0u8; 4800]; // 2400 échantillons
        let frame = codec.decode_audio_samples(&bytes, 24000, 1).unwrap();
        assert_eq!(frame.sample_rate, 24000);
        assert_eq!(frame.channels, 1);
        assert!((frame.duration_secs() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_empty_payload() {
        let codec = PcmCodec::new(16000);
        let frame = codec.decode_audio_samples(&[], 24000, 1).unwrap();
        assert!(frame.samples.is_empty());
        assert_eq!(frame.duration_secs(), 0.0);
    }
}
