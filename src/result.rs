use std::fmt::Display;

use miette::miette;

/// Errors of the external tools that the tasks need to tell apart.
///
/// Anything else is carried as a [`miette::Report`].
#[derive(Debug)]
pub enum Error {
    /// The video or channel cannot be served (removed, private, geo-blocked...)
    Unavailable(String),

    /// The remote side refused us for going too fast (HTTP 429, bot check)
    Throttled(String),

    Miette(miette::Report),
}

impl From<miette::Report> for Error {
    fn from(err: miette::Report) -> Self {
        Error::Miette(err)
    }
}

impl From<Error> for miette::Report {
    fn from(err: Error) -> Self {
        match err {
            Error::Unavailable(line) => miette!("Unavailable stream: {line}"),
            Error::Throttled(line) => miette!("Throttled by remote: {line}"),
            Error::Miette(err) => err,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Unavailable(line) => write!(f, "unavailable: {line}"),
            Error::Throttled(line) => write!(f, "throttled: {line}"),
            Error::Miette(report) => write!(f, "{report:#}"),
        }
    }
}

impl Error {
    pub fn wrap_err_with<D, F>(self, f: F) -> Error
    where
        D: Display + Send + Sync + 'static,
        F: FnOnce() -> D,
    {
        match self {
            Error::Miette(report) => Error::Miette(report.wrap_err(f())),
            err => err,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Build an error out of a message
pub fn err_msg<D>(msg: D) -> Error
where
    D: Display + std::fmt::Debug + Send + Sync + 'static,
{
    Error::Miette(miette::Report::msg(msg))
}

/// Return early with an error built out of a message
pub fn bail<T, D>(msg: D) -> Result<T>
where
    D: Display + std::fmt::Debug + Send + Sync + 'static,
{
    Err(err_msg(msg))
}
