use anyhow::{anyhow, Result};
use encoding_rs::WINDOWS_1252;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::str::FromStr;

pub trait TextDecoder {
    fn decode<'a>(&self, bytes: &'a [u8]) -> Cow<'a, str>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// Every byte is the code point of the same value. This is what the engine tools assume.
    #[default]
    Latin1,
    /// Western Windows code page; differs from Latin-1 only in 0x80..=0x9F.
    Windows1252,
}

impl FromStr for Encoding {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "latin1" | "iso-8859-1" => Ok(Encoding::Latin1),
            "cp1252" | "windows1252" | "windows-1252" => Ok(Encoding::Windows1252),
            _ => Err(anyhow!("unknown text encoding: {}", s)),
        }
    }
}

/// A simple decoder bound to one encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Decoder {
    enc: Encoding,
}

impl Decoder {
    #[inline]
    pub fn new(enc: Encoding) -> Self {
        Self { enc }
    }

    #[inline]
    pub fn encoding(&self) -> Encoding {
        self.enc
    }
}

impl TextDecoder for Decoder {
    fn decode<'a>(&self, bytes: &'a [u8]) -> Cow<'a, str> {
        match self.enc {
            Encoding::Latin1 => {
                if bytes.is_ascii() {
                    // ASCII is valid UTF-8 as-is
                    Cow::Borrowed(std::str::from_utf8(bytes).unwrap_or_default())
                } else {
                    Cow::Owned(bytes.iter().map(|&b| b as char).collect())
                }
            }
            Encoding::Windows1252 => {
                let (cow, had_errors) = WINDOWS_1252.decode_without_bom_handling(bytes);
                if had_errors {
                    log::warn!("windows-1252 decode error");
                }
                cow
            }
        }
    }
}
