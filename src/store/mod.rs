//! External collaborators of the pipeline: the player datastore, the
//! remote file store and the HTTP source of raw photos

pub mod players;
pub mod remote;
pub mod source;

pub use players::{MySqlPlayerStore, PlayerStore};
pub use remote::{RemoteStore, SftpStore};
pub use source::{FetchOutcome, HttpImageSource, ImageSource};

use std::collections::HashSet;

/// Join a remote directory and a file name with a single `/`
#[must_use]
pub fn remote_path(dir: &str, file_name: &str) -> String {
    if dir.is_empty() {
        return file_name.to_string();
    }
    format!("{}/{}", dir.trim_end_matches('/'), file_name)
}

/// Identifiers already processed, derived from a remote listing.
///
/// Only names ending with `suffix` count; the suffix is stripped.
#[must_use]
pub fn processed_ids<I, S>(names: I, suffix: &str) -> HashSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .filter_map(|name| {
            name.as_ref()
                .strip_suffix(suffix)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
        })
        .collect()
}
