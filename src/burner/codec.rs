use std::io;

use bytes::{Buf, BytesMut};
use encoding_rs::Encoding;
use once_cell::sync::Lazy;
use tokio_util::codec::Decoder;

static SYSTEM_ENCODING: Lazy<Option<&'static Encoding>> = Lazy::new(system_encoding);

/// Decodes burner output using the system ANSI code page, falling back to
/// lossy UTF-8.
pub fn decode_output(data: &[u8]) -> String {
    decode_with(data, *SYSTEM_ENCODING)
}

/// Decodes `data` with `encoding` if it decodes cleanly, else as lossy UTF-8.
pub fn decode_with(data: &[u8], encoding: Option<&'static Encoding>) -> String {
    if data.is_ascii() {
        return String::from_utf8_lossy(data).into_owned();
    }

    if let Some(encoding) = encoding {
        let (decoded, _, had_errors) = encoding.decode(data);
        if !had_errors {
            return decoded.into_owned();
        }
    }

    String::from_utf8_lossy(data).into_owned()
}

#[cfg(windows)]
fn system_encoding() -> Option<&'static Encoding> {
    use windows::Win32::Globalization::GetACP;

    // SAFETY: GetACP takes no arguments and only reads process state.
    let code_page = unsafe { GetACP() };
    u16::try_from(code_page).ok().and_then(codepage::to_encoding)
}

#[cfg(not(windows))]
fn system_encoding() -> Option<&'static Encoding> {
    None
}

/// Splits burner output into lines.
///
/// `\n`, `\r\n` and a bare `\r` all end a line; the burner redraws its
/// progress line with carriage returns.
#[derive(Debug, Default, Clone, Copy)]
pub struct LineCodec;

impl Decoder for LineCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, io::Error> {
        let Some(pos) = src.iter().position(|b| *b == b'\n' || *b == b'\r') else {
            return Ok(None);
        };

        let line = src.split_to(pos);
        let terminator = src[0];
        src.advance(1);
        if terminator == b'\r' && src.first() == Some(&b'\n') {
            src.advance(1);
        }

        Ok(Some(decode_output(&line)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>, io::Error> {
        match self.decode(src)? {
            Some(line) => Ok(Some(line)),
            None if src.is_empty() => Ok(None),
            None => {
                let line = src.split();
                Ok(Some(decode_output(&line)))
            }
        }
    }
}
