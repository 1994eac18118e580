use std::fs::File;
use std::io::{
    self,
    BufReader,
    BufWriter,
    Read,
    Write,
};
use std::path::Path;

use serde::{
    Deserialize,
    Serialize,
};

use crate::error::{
    CollapseError,
    Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compression {
    None,
    Gz,
    Zstd,
}

impl Compression {
    pub fn name(&self) -> &str {
        match self {
            Compression::None => "none",
            Compression::Gz => "gzip",
            Compression::Zstd => "zstd",
        }
    }

    /// Guesses the compression from the file extension.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        match path.as_ref().extension().and_then(|e| e.to_str()) {
            Some("gz") | Some("gzip") => Compression::Gz,
            Some("zst") | Some("zstd") => Compression::Zstd,
            _ => Compression::None,
        }
    }

    pub fn default_level(&self) -> u32 {
        match self {
            Compression::None => 0,
            Compression::Gz => 6,
            Compression::Zstd => 3,
        }
    }

    pub fn get_decoder<R: Read + Send + 'static>(
        &self,
        handle: R,
    ) -> io::Result<Box<dyn Read + Send>> {
        let decoder: Box<dyn Read + Send> = match self {
            Compression::Gz => Box::new(flate2::read::MultiGzDecoder::new(
                BufReader::new(handle),
            )),
            Compression::Zstd => Box::new(zstd::Decoder::new(handle)?),
            Compression::None => Box::new(handle),
        };
        Ok(decoder)
    }

    pub fn get_encoder<W: Write>(
        &self,
        handle: W,
        compression_level: u32,
    ) -> io::Result<Encoder<W>> {
        let encoder = match self {
            Compression::Gz => Encoder::Gz(flate2::write::GzEncoder::new(
                handle,
                flate2::Compression::new(compression_level),
            )),
            Compression::Zstd => {
                Encoder::Zstd(zstd::Encoder::new(handle, compression_level as i32)?)
            },
            Compression::None => Encoder::Plain(handle),
        };
        Ok(encoder)
    }
}

/// Output stream with an explicit [`Encoder::finish`], so that trailer
/// write failures surface as errors instead of being lost on drop.
pub enum Encoder<W: Write> {
    Plain(W),
    Gz(flate2::write::GzEncoder<W>),
    Zstd(zstd::Encoder<'static, W>),
}

impl<W: Write> Encoder<W> {
    /// Writes any trailer and returns the underlying sink.
    pub fn finish(self) -> io::Result<W> {
        let mut inner = match self {
            Encoder::Plain(w) => w,
            Encoder::Gz(e) => e.finish()?,
            Encoder::Zstd(e) => e.finish()?,
        };
        inner.flush()?;
        Ok(inner)
    }
}

impl<W: Write> Write for Encoder<W> {
    fn write(
        &mut self,
        buf: &[u8],
    ) -> io::Result<usize> {
        match self {
            Encoder::Plain(w) => w.write(buf),
            Encoder::Gz(e) => e.write(buf),
            Encoder::Zstd(e) => e.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Encoder::Plain(w) => w.flush(),
            Encoder::Gz(e) => e.flush(),
            Encoder::Zstd(e) => e.flush(),
        }
    }
}

/// Opens an input table, decompressing by extension. `-` reads stdin.
pub fn open_input<P: AsRef<Path>>(path: P) -> Result<Box<dyn Read + Send>> {
    let path = path.as_ref();
    if path.as_os_str() == "-" {
        return Ok(Box::new(io::stdin()));
    }
    let file = File::open(path).map_err(|e| CollapseError::io(path, e))?;
    Compression::from_path(path)
        .get_decoder(file)
        .map_err(|e| CollapseError::io(path, e))
}

/// Creates an output file wrapped in the requested encoder.
pub fn create_output<P: AsRef<Path>>(
    path: P,
    compression: Compression,
    compression_level: u32,
) -> Result<Encoder<BufWriter<File>>> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|e| CollapseError::io(path, e))?;
    compression
        .get_encoder(BufWriter::new(file), compression_level)
        .map_err(|e| CollapseError::io(path, e))
}
