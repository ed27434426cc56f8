//! HTTP `Range` parsing and negotiation.

use tapeloop_core::{Error, Result};

/// A single byte range from a `Range: bytes=...` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSpec {
    /// `bytes=s-e`, inclusive.
    Bounded { start: u64, end: u64 },
    /// `bytes=s-`
    From { start: u64 },
    /// `bytes=-n`, the last `n` bytes.
    Suffix { length: u64 },
}

impl RangeSpec {
    pub fn parse(header: &str) -> Result<Self> {
        let header = header.trim();
        let invalid = || Error::InvalidRange(header.to_string());

        let (unit, set) = header.split_once('=').ok_or_else(invalid)?;
        if !unit.trim().eq_ignore_ascii_case("bytes") {
            return Err(invalid());
        }
        let set = set.trim();
        if set.contains(',') {
            return Err(Error::InvalidRange(format!(
                "multiple ranges are not supported: {header}"
            )));
        }

        let (first, last) = set.split_once('-').ok_or_else(invalid)?;
        let (first, last) = (first.trim(), last.trim());
        let position = |s: &str| -> Result<u64> {
            if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            s.parse().map_err(|_| invalid())
        };

        match (first.is_empty(), last.is_empty()) {
            (true, true) => Err(invalid()),
            (true, false) => Ok(Self::Suffix {
                length: position(last)?,
            }),
            (false, true) => Ok(Self::From {
                start: position(first)?,
            }),
            (false, false) => {
                let (start, end) = (position(first)?, position(last)?);
                if start > end {
                    return Err(invalid());
                }
                Ok(Self::Bounded { start, end })
            }
        }
    }

    /// `bytes=0-`, which asks for the whole resource.
    pub fn is_whole(&self) -> bool {
        matches!(self, Self::From { start: 0 })
    }
}

/// What is known about the length of the resource being served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceLength {
    Known(u64),
    /// Still being written; only `available` bytes exist so far.
    Growing { available: u64 },
}

impl ResourceLength {
    pub fn known(&self) -> Option<u64> {
        match self {
            Self::Known(len) => Some(*len),
            Self::Growing { .. } => None,
        }
    }
}

/// Outcome of negotiating a request against a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Negotiation {
    /// 200 with the whole body.
    Full { length: Option<u64> },
    /// 206 covering `start..=end`.
    Partial {
        start: u64,
        end: u64,
        total: Option<u64>,
    },
}

impl Negotiation {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Full { .. } => 200,
            Self::Partial { .. } => 206,
        }
    }

    pub fn is_partial(&self) -> bool {
        matches!(self, Self::Partial { .. })
    }

    pub fn content_length(&self) -> Option<u64> {
        match self {
            Self::Full { length } => *length,
            Self::Partial { start, end, .. } => Some(end - start + 1),
        }
    }

    /// `Content-Range` value for partial responses. An unknown total is
    /// written as `*`.
    pub fn content_range(&self) -> Option<String> {
        match self {
            Self::Full { .. } => None,
            Self::Partial {
                start,
                end,
                total: Some(total),
            } => Some(format!("bytes {start}-{end}/{total}")),
            Self::Partial {
                start,
                end,
                total: None,
            } => Some(format!("bytes {start}-{end}/*")),
        }
    }

    /// Whether the total length is known, so ranges can be advertised.
    pub fn length_known(&self) -> bool {
        matches!(
            self,
            Self::Full { length: Some(_) }
                | Self::Partial {
                    total: Some(_),
                    ..
                }
        )
    }

    /// Start offset and optional inclusive end to read.
    pub fn window(&self) -> (u64, Option<u64>) {
        match self {
            Self::Full { .. } => (0, None),
            Self::Partial { start, end, .. } => (*start, Some(*end)),
        }
    }
}

/// Resolve an optional range against a resource length.
///
/// Known lengths follow RFC 9110: ends are clamped, and a start at or past
/// the end is unsatisfiable. Growing resources are clamped to the bytes
/// available so far; a start beyond them, or a suffix range, cannot be
/// served yet.
pub fn negotiate(spec: Option<RangeSpec>, length: ResourceLength) -> Result<Negotiation> {
    let Some(spec) = spec else {
        return Ok(Negotiation::Full {
            length: length.known(),
        });
    };

    match length {
        ResourceLength::Known(total) => {
            let unsatisfiable = Error::RangeUnsatisfiable {
                length: Some(total),
            };
            let last = total.saturating_sub(1);
            let (start, end) = match spec {
                RangeSpec::Bounded { start, end } => (start, end.min(last)),
                RangeSpec::From { start } => (start, last),
                RangeSpec::Suffix { length } => {
                    if length == 0 {
                        return Err(unsatisfiable);
                    }
                    (total.saturating_sub(length), last)
                }
            };
            if start >= total {
                return Err(unsatisfiable);
            }
            Ok(Negotiation::Partial {
                start,
                end,
                total: Some(total),
            })
        }
        ResourceLength::Growing { available } => {
            let not_yet = Error::RangeNotYetAvailable { available };
            let last = available.saturating_sub(1);
            let (start, end) = match spec {
                RangeSpec::Bounded { start, end } => (start, end.min(last)),
                RangeSpec::From { start } => (start, last),
                RangeSpec::Suffix { .. } => return Err(not_yet),
            };
            if start >= available {
                return Err(not_yet);
            }
            Ok(Negotiation::Partial {
                start,
                end,
                total: None,
            })
        }
    }
}
