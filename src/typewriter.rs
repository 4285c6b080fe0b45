use encoding_rs::Decoder;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use crate::encoding::TextEncoding;

/// Bytes pulled from the file per refill
pub const CHUNK_SIZE: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum TextError {
    #[error("failed to read text: {0}")]
    Io(#[from] io::Error),
}

/// Reveals a text file one character at a time, reading it lazily in chunks
pub struct TypeWriter {
    reader: Option<Box<dyn Read + Send>>,
    encoding: TextEncoding,
    // keeps sequences cut by a chunk boundary; `None` for Latin-1
    decoder: Option<Decoder>,
    buffer: Vec<char>,
    buffer_pos: usize,
    position: usize,
    loaded: bool,
}

impl TypeWriter {
    pub fn new() -> Self {
        Self {
            reader: None,
            encoding: TextEncoding::Utf8,
            decoder: None,
            buffer: Vec::new(),
            buffer_pos: 0,
            position: 0,
            loaded: false,
        }
    }

    pub fn open<P: AsRef<Path>>(&mut self, path: P, encoding: TextEncoding) -> Result<(), TextError> {
        let file = File::open(path)?;
        self.open_reader(file, encoding);
        Ok(())
    }

    pub fn open_reader<R: Read + Send + 'static>(&mut self, reader: R, encoding: TextEncoding) {
        self.reset();
        self.reader = Some(Box::new(reader));
        self.encoding = encoding;
        self.decoder = encoding
            .decoder_encoding()
            .map(|enc| enc.new_decoder_with_bom_removal());
        self.loaded = true;
    }

    /// True once a file has been opened, until `reset`. Reaching the end of
    /// the file does not clear it.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Characters revealed so far
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    /// Next character of the text, `None` once the file is exhausted.
    pub fn next_char(&mut self) -> Result<Option<char>, TextError> {
        while self.buffer_pos >= self.buffer.len() {
            if !self.fill()? {
                return Ok(None);
            }
        }

        let c = self.buffer[self.buffer_pos];
        self.buffer_pos += 1;
        self.position += 1;
        Ok(Some(c))
    }

    pub fn reset(&mut self) {
        self.reader = None;
        self.decoder = None;
        self.buffer.clear();
        self.buffer_pos = 0;
        self.position = 0;
        self.loaded = false;
    }

    /// Replace the buffer with the next chunk. Returns false at end of file.
    fn fill(&mut self) -> Result<bool, TextError> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(false);
        };

        let mut chunk = [0u8; CHUNK_SIZE];
        let n = loop {
            match reader.read(&mut chunk) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        };

        self.buffer.clear();
        self.buffer_pos = 0;

        let last = n == 0;
        if last {
            // the decoder must not be fed again after its final call
            self.reader = None;
        }
        let text = self.decode(&chunk[..n], last);
        self.buffer.extend(text.chars());

        // an empty chunk mid-file only means a sequence is still incomplete
        Ok(!last || !self.buffer.is_empty())
    }

    fn decode(&mut self, bytes: &[u8], last: bool) -> String {
        match self.decoder.as_mut() {
            Some(decoder) => {
                let capacity = decoder
                    .max_utf8_buffer_length(bytes.len())
                    .unwrap_or(bytes.len() * 3 + 4);
                let mut out = String::with_capacity(capacity);
                let _ = decoder.decode_to_string(bytes, &mut out, last);
                out
            }
            None => encoding_rs::mem::decode_latin1(bytes).into_owned(),
        }
    }
}

impl Default for TypeWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TypeWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeWriter")
            .field("encoding", &self.encoding)
            .field("position", &self.position)
            .field("open", &self.reader.is_some())
            .field("loaded", &self.loaded)
            .finish()
    }
}
