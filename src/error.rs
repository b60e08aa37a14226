use std::fmt;

#[derive(Debug)]
pub enum Error {
    Http(reqwest::Error),
    Io(std::io::Error),
    Decode(serde_json::Error),
    /// The portal explicitly rejected the credentials.
    LoginFailed {
        url: String,
        user: String,
        message: String,
    },
    /// A call needed a login but no credentials were ever supplied.
    AuthenticationRequired,
    /// The portal still reports the subject as unauthenticated after a fresh login.
    NotAuthenticated { method: String },
    CommandFailed { method: String, message: String },
    ProtocolMismatch { context: String, body: String },
    InvalidArgument(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Http(e) => write!(f, "HTTP error: {e}"),
            Error::Io(e) => write!(f, "IO error: {e}"),
            Error::Decode(e) => write!(f, "state decode error: {e}"),
            Error::LoginFailed { url, user, message } => {
                write!(f, "login failed for {user} at {url}: {message}")
            }
            Error::AuthenticationRequired => write!(f, "login required"),
            Error::NotAuthenticated { method } => {
                write!(f, "{method}: subject is not authenticated after re-login")
            }
            Error::CommandFailed { method, message } => {
                write!(f, "command execution failed: {method} -> {message}")
            }
            Error::ProtocolMismatch { context, body } => {
                write!(f, "unexpected response to {context}: {body}")
            }
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Http(e) => Some(e),
            Error::Io(e) => Some(e),
            Error::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Decode(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
