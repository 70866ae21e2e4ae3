//! Dotenv loading
//!
//! Parsing is delegated to `dotenvy`, which accepts the same files as the Go
//! `godotenv` loader: `export` prefixes, comments, single and double quotes,
//! double-quoted values spanning lines, and `${VAR}` expansion against the
//! process environment and earlier lines of the file.
//!
//! ```text
//! # comment
//! DOMAIN_NAME=example.com
//! export NUM_OF_SSH_SERVERS=2
//! OAUTH_CLIENT_SECRET="quoted # not a comment"
//! OAUTH_DOMAIN=auth.${DOMAIN_NAME}
//! ```
//!
//! Entries are returned, never written into the process environment.

use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors reading or parsing a dotenv file
#[derive(Error, Debug)]
pub enum DotenvError {
    /// The file does not exist
    #[error("{} not found, please create it first", .0.display())]
    NotFound(PathBuf),

    /// The file exists but could not be read or parsed
    #[error(transparent)]
    Parse(#[from] dotenvy::Error),
}

/// Read and parse a dotenv file
pub fn load(path: &Path) -> Result<Vec<(String, String)>, DotenvError> {
    match dotenvy::from_path_iter(path) {
        Ok(iter) => collect(iter),
        Err(err) if err.not_found() => Err(DotenvError::NotFound(path.to_path_buf())),
        Err(err) => Err(err.into()),
    }
}

/// Key/value pairs in file order
fn collect<R: Read>(iter: dotenvy::Iter<R>) -> Result<Vec<(String, String)>, DotenvError> {
    Ok(iter.collect::<Result<Vec<_>, _>>()?)
}
