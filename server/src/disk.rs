//! Upload-volume free-space probe.

use std::path::Path;

/// Headroom kept free on the upload volume: 1 GiB.
const MIN_FREE_SPACE: u64 = 1024 * 1024 * 1024;

/// Checks that the volume holding `dir` can absorb `incoming` bytes
/// while keeping [`MIN_FREE_SPACE`] in reserve.
pub fn ensure_capacity(dir: &Path, incoming: u64) -> Result<(), String> {
    let available = fs2::available_space(dir).map_err(|err| err.to_string())?;
    let required = incoming.saturating_add(MIN_FREE_SPACE);

    if available < required {
        return Err(format!(
            "need {required} bytes ({incoming} incoming + {MIN_FREE_SPACE} reserve), {available} available"
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiny_upload_fits_on_any_test_machine() {
        let dir = std::env::temp_dir();
        assert!(ensure_capacity(&dir, 0).is_ok());
    }

    #[test]
    fn absurd_upload_does_not() {
        let dir = std::env::temp_dir();
        assert!(ensure_capacity(&dir, u64::MAX - MIN_FREE_SPACE).is_err());
    }
}
