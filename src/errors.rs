use std::error::Error;
use std::io::{self, ErrorKind};

use http::StatusCode;
use xml::reader::Error as XmlRError;
use xml::writer::Error as XmlWError;

use crate::davpath::DavPath;
use crate::fs::FsError;

pub type DavResult<T> = Result<T, DavError>;

#[derive(Debug)]
pub enum DavError {
    XmlReadError,  // error reading/parsing xml
    XmlParseError, // error interpreting xml
    InvalidPath,   // error parsing path
    IllegalPath,   // path not valid here
    ForbiddenPath, // too many dotdots
    UnknownDavMethod,
    Utf8Error,
    Status(StatusCode),
    StatusClose(StatusCode),
    FsError(FsError),
    IoError(io::Error),
    XmlReaderError(XmlRError),
    XmlWriterError(XmlWError),
    // active lock without a matching token in the If: header.
    Locked(DavPath),
    // lock/property backend failure.
    Backend(String),
}

impl Error for DavError {
    fn description(&self) -> &str {
        "DAV error"
    }

    fn cause(&self) -> Option<&dyn Error> {
        match self {
            DavError::FsError(e) => Some(e),
            DavError::IoError(e) => Some(e),
            DavError::XmlReaderError(e) => Some(e),
            DavError::XmlWriterError(e) => Some(e),
            _ => None,
        }
    }
}

impl std::fmt::Display for DavError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DavError::XmlReaderError(_) => write!(f, "XML parse error"),
            DavError::XmlWriterError(_) => write!(f, "XML generate error"),
            DavError::IoError(_) => write!(f, "I/O error"),
            DavError::Locked(p) => write!(f, "resource {p} is locked"),
            DavError::Backend(e) => write!(f, "backend error: {e}"),
            _ => write!(f, "{self:?}"),
        }
    }
}

impl From<FsError> for DavError {
    fn from(e: FsError) -> Self {
        DavError::FsError(e)
    }
}

impl From<DavError> for io::Error {
    fn from(e: DavError) -> Self {
        match e {
            DavError::IoError(e) => e,
            DavError::FsError(e) => e.into(),
            _ => io::Error::new(io::ErrorKind::Other, e),
        }
    }
}

impl From<FsError> for io::Error {
    fn from(e: FsError) -> Self {
        fserror_to_ioerror(e)
    }
}

impl From<io::Error> for DavError {
    fn from(e: io::Error) -> Self {
        DavError::IoError(e)
    }
}

impl From<StatusCode> for DavError {
    fn from(e: StatusCode) -> Self {
        DavError::Status(e)
    }
}

impl From<XmlRError> for DavError {
    fn from(e: XmlRError) -> Self {
        DavError::XmlReaderError(e)
    }
}

impl From<XmlWError> for DavError {
    fn from(e: XmlWError) -> Self {
        DavError::XmlWriterError(e)
    }
}

impl From<xmltree::ParseError> for DavError {
    fn from(_e: xmltree::ParseError) -> Self {
        DavError::XmlParseError
    }
}

impl From<std::str::Utf8Error> for DavError {
    fn from(_: std::str::Utf8Error) -> Self {
        DavError::Utf8Error
    }
}

impl From<std::string::FromUtf8Error> for DavError {
    fn from(_: std::string::FromUtf8Error) -> Self {
        DavError::Utf8Error
    }
}

#[cfg(feature = "sqlls")]
impl From<rusqlite::Error> for DavError {
    fn from(e: rusqlite::Error) -> Self {
        DavError::Backend(e.to_string())
    }
}

impl From<tokio::task::JoinError> for DavError {
    fn from(e: tokio::task::JoinError) -> Self {
        DavError::Backend(e.to_string())
    }
}

fn fserror_to_ioerror(e: FsError) -> io::Error {
    match e {
        FsError::NotImplemented => io::Error::new(io::ErrorKind::Other, "NotImplemented"),
        FsError::GeneralFailure => io::Error::new(io::ErrorKind::Other, "GeneralFailure"),
        FsError::Exists => io::Error::new(io::ErrorKind::AlreadyExists, "Exists"),
        FsError::NotFound => io::Error::new(io::ErrorKind::NotFound, "Notfound"),
        FsError::Forbidden => io::Error::new(io::ErrorKind::PermissionDenied, "Forbidden"),
        FsError::InsufficientStorage => io::Error::new(io::ErrorKind::Other, "InsufficientStorage"),
        FsError::NotEmpty => io::Error::new(io::ErrorKind::Other, "NotEmpty"),
        FsError::IsRemote => io::Error::new(io::ErrorKind::Other, "IsRemote"),
    }
}

fn ioerror_to_status(ioerror: &io::Error) -> StatusCode {
    match ioerror.kind() {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
        ErrorKind::AlreadyExists => StatusCode::CONFLICT,
        ErrorKind::TimedOut => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    }
}

pub(crate) fn fserror_to_status(e: &FsError) -> StatusCode {
    match e {
        FsError::NotImplemented => StatusCode::NOT_IMPLEMENTED,
        FsError::GeneralFailure => StatusCode::INTERNAL_SERVER_ERROR,
        FsError::Exists => StatusCode::METHOD_NOT_ALLOWED,
        FsError::NotFound => StatusCode::NOT_FOUND,
        FsError::Forbidden => StatusCode::FORBIDDEN,
        FsError::InsufficientStorage => StatusCode::INSUFFICIENT_STORAGE,
        FsError::NotEmpty => StatusCode::CONFLICT,
        FsError::IsRemote => StatusCode::BAD_GATEWAY,
    }
}

impl DavError {
    pub fn statuscode(&self) -> StatusCode {
        match self {
            DavError::XmlReadError => StatusCode::BAD_REQUEST,
            DavError::XmlParseError => StatusCode::BAD_REQUEST,
            DavError::InvalidPath => StatusCode::BAD_REQUEST,
            DavError::IllegalPath => StatusCode::NOT_FOUND,
            DavError::ForbiddenPath => StatusCode::FORBIDDEN,
            DavError::UnknownDavMethod => StatusCode::NOT_IMPLEMENTED,
            DavError::Utf8Error => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            DavError::IoError(e) => ioerror_to_status(e),
            DavError::FsError(e) => fserror_to_status(e),
            DavError::Status(e) => *e,
            DavError::StatusClose(e) => *e,
            DavError::XmlReaderError(_e) => StatusCode::BAD_REQUEST,
            DavError::XmlWriterError(_e) => StatusCode::INTERNAL_SERVER_ERROR,
            DavError::Locked(_) => StatusCode::LOCKED,
            DavError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn must_close(&self) -> bool {
        !matches!(
            self,
            &DavError::Status(_) | &DavError::FsError(FsError::NotFound) | &DavError::Locked(_)
        )
    }
}
