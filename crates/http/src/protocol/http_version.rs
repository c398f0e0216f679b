use crate::protocol::ParseFailure;

/// The protocol versions the engine admits. HTTP/1.0 and HTTP/2+ are
/// rejected at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpVersion {
    #[default]
    Http1_1,
}

impl HttpVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http1_1 => "HTTP/1.1",
        }
    }
}

impl TryFrom<&[u8]> for HttpVersion {
    type Error = ParseFailure;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        match bytes {
            b"HTTP/1.1" => Ok(Self::Http1_1),
            _ => Err(ParseFailure::UnsupportedHttpVersion),
        }
    }
}
