#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    Io(String),
    Encode(String),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::Io(msg) => write!(f, "io: {}", msg),
            ParseError::Encode(msg) => write!(f, "encode: {}", msg),
        }
    }
}

impl std::error::Error for ParseError {}

impl From<std::io::Error> for ParseError {
    fn from(error: std::io::Error) -> Self {
        ParseError::Io(error.to_string())
    }
}
