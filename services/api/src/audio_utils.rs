use base64::Engine;
use bytes::Bytes;

// Standard sample rates for the audio crossing this service.
pub const CLIENT_INPUT_PCM16_SAMPLE_RATE: u32 = 16000;
pub const SYNTHESIS_OUTPUT_PCM16_SAMPLE_RATE: u32 = 24000;

/// Encodes raw PCM16 bytes as standard base64 for JSON transport.
pub fn encode_base64(pcm16_bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(pcm16_bytes)
}

/// Decodes a base64 audio fragment back into raw bytes.
pub fn decode_base64(base64_fragment: &str) -> anyhow::Result<Bytes> {
    let decoded = base64::engine::general_purpose::STANDARD.decode(base64_fragment)?;
    Ok(Bytes::from(decoded))
}

/// Playback duration of mono PCM16 audio, in milliseconds.
pub fn pcm16_duration_ms(byte_len: usize, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    let samples = (byte_len / 2) as u64;
    samples * 1000 / sample_rate as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_base64() {
        assert_eq!(encode_base64(&[0x01, 0x00, 0xff, 0x7f]), "AQD/fw==");
        assert_eq!(encode_base64(&[]), "");
    }

    #[test]
    fn test_decode_base64() {
        let decoded = decode_base64("AQD/fw==").unwrap();
        assert_eq!(decoded.as_ref(), &[0x01, 0x00, 0xff, 0x7f]);
    }

    #[test]
    fn test_decode_invalid_base64() {
        assert!(decode_base64("not base64!").is_err());
    }

    #[test]
    fn test_pcm16_duration_ms() {
        // One second of 16 kHz mono PCM16 is 32000 bytes.
        assert_eq!(pcm16_duration_ms(32000, CLIENT_INPUT_PCM16_SAMPLE_RATE), 1000);
        assert_eq!(pcm16_duration_ms(4800, SYNTHESIS_OUTPUT_PCM16_SAMPLE_RATE), 100);
        // A trailing odd byte is not a sample.
        assert_eq!(pcm16_duration_ms(3, 1000), 1);
        assert_eq!(pcm16_duration_ms(320, 0), 0);
    }
}
