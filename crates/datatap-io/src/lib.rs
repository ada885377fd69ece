//! Scheme-polymorphic file fetching.
//!
//! A [`Fetcher`] turns a URI into a locally readable [`FetchedFile`] and
//! answers `listdir` and `mtime` queries where the scheme supports them.
//! The [`Registry`] maps URI schemes to fetcher constructors; local paths,
//! HTTP(S), the FTP family, and S3 are built in, and callers can register
//! their own schemes.

mod error;
mod fetcher;
mod ftp;
mod http;
mod local;
mod registry;
mod s3;
pub mod uri;

pub use error::FetchError;
pub use fetcher::{DEFAULT_CONNECT_TIMEOUT, FetchedFile, Fetcher, FetcherOptions};
pub use ftp::{FTP_SCHEMES, FtpFetcher};
pub use http::HttpFetcher;
pub use local::LocalFetcher;
pub use registry::Registry;
pub use s3::{S3_SCHEMES, S3Fetcher};
