use encoding_rs::{DecoderResult, Encoding, GBK, UTF_8};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Bytes inspected when sniffing a file's encoding
pub const PROBE_LEN: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum TextEncoding {
    #[strum(serialize = "utf-8")]
    Utf8,
    #[strum(serialize = "gbk")]
    Gbk,
    #[strum(serialize = "latin1")]
    Latin1,
}

impl TextEncoding {
    /// Decoder backing this encoding. Latin-1 maps bytes straight to code
    /// points and has none.
    pub fn decoder_encoding(self) -> Option<&'static Encoding> {
        match self {
            TextEncoding::Utf8 => Some(UTF_8),
            TextEncoding::Gbk => Some(GBK),
            TextEncoding::Latin1 => None,
        }
    }
}

/// Guess the encoding of a text file from its first bytes.
///
/// Returns `Ok(None)` when the file looks binary.
pub fn detect_encoding<P: AsRef<Path>>(path: P) -> io::Result<Option<TextEncoding>> {
    let mut probe = Vec::with_capacity(PROBE_LEN);
    File::open(path)?
        .take(PROBE_LEN as u64)
        .read_to_end(&mut probe)?;
    let complete = probe.len() < PROBE_LEN;
    Ok(sniff(&probe, complete))
}

/// Classify the first bytes of a file, trying UTF-8, then GBK, then Latin-1.
///
/// When `complete` is false the probe is only a prefix and may cut a
/// multi-byte sequence at its end. Bytes that fit neither UTF-8 nor GBK and
/// contain NUL are treated as binary.
pub fn sniff(probe: &[u8], complete: bool) -> Option<TextEncoding> {
    if decodes_cleanly(UTF_8, probe, complete) {
        return Some(TextEncoding::Utf8);
    }
    if decodes_cleanly(GBK, probe, complete) {
        return Some(TextEncoding::Gbk);
    }
    if probe.contains(&0) {
        return None;
    }
    Some(TextEncoding::Latin1)
}

fn decodes_cleanly(encoding: &'static Encoding, probe: &[u8], complete: bool) -> bool {
    let mut decoder = encoding.new_decoder_without_bom_handling();
    let capacity = decoder
        .max_utf8_buffer_length_without_replacement(probe.len())
        .unwrap_or(probe.len() * 4);
    let mut out = String::with_capacity(capacity);
    let (result, _) = decoder.decode_to_string_without_replacement(probe, &mut out, complete);
    matches!(result, DecoderResult::InputEmpty)
}
