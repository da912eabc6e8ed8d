//! Bounded retry for single remote calls

use log::warn;

use super::SyncOptions;
use crate::remote::RemoteError;

/// Run `call` until it succeeds, fails permanently, or runs out of attempts
///
/// Waits between attempts according to the cause of the last failure.
pub(crate) fn with_retry<T>(
    options: &SyncOptions,
    what: &str,
    mut call: impl FnMut() -> Result<T, RemoteError>,
) -> Result<T, RemoteError> {
    let max_attempts = options.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match call() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < max_attempts => {
                let delay = options.delay_for(&err);
                warn!(
                    "{} failed (attempt {}/{}): {}; retrying in {:?}",
                    what, attempt, max_attempts, err, delay
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
