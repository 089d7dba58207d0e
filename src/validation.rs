//! Parameter and buffer validation shared by the kernels and the harness.
//!
//! All functions return `Result<_, String>`; callers map the message into
//! their own error type (`BackendError::InvalidConfig` for kernels).

/// Largest supported channel block for blocked layouts.
pub const MAX_BLOCK_SIZE: usize = 64;

/// Validate a pooling/convolution window along one axis.
#[inline]
pub fn validate_window(kernel: usize, dilation: usize, stride: usize) -> Result<(), String> {
    if kernel == 0 || dilation == 0 || stride == 0 {
        return Err(format!(
            "kernel {kernel}, dilation {dilation}, stride {stride} must all be > 0"
        ));
    }
    Ok(())
}

/// Validate a channel block size (power of two, at most [`MAX_BLOCK_SIZE`]).
#[inline]
pub fn validate_block_size(block_size: usize) -> Result<(), String> {
    if !block_size.is_power_of_two() {
        return Err(format!("block size {block_size} is not a power of two"));
    }
    if block_size > MAX_BLOCK_SIZE {
        return Err(format!(
            "block size {} exceeds MAX_BLOCK_SIZE {}",
            block_size, MAX_BLOCK_SIZE
        ));
    }
    Ok(())
}

/// Validate input buffer length matches expected.
#[inline]
pub fn validate_input_len(actual: usize, expected: usize, name: &str) -> Result<(), String> {
    if actual != expected {
        return Err(format!("{} len {} != expected {}", name, actual, expected));
    }
    Ok(())
}

/// Validate a buffer holds at least `required` elements.
#[inline]
pub fn validate_min_len(actual: usize, required: usize, name: &str) -> Result<(), String> {
    if actual < required {
        return Err(format!("{} len {} < required {}", name, actual, required));
    }
    Ok(())
}

/// Product of `extents` with overflow check.
#[inline]
pub fn checked_volume(extents: &[usize], name: &str) -> Result<usize, String> {
    extents
        .iter()
        .try_fold(1usize, |acc, &e| acc.checked_mul(e))
        .ok_or_else(|| format!("{name} element count overflow"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_window() {
        assert!(validate_window(3, 1, 1).is_ok());
        assert!(validate_window(0, 1, 1).is_err());
        assert!(validate_window(3, 0, 1).is_err());
        assert!(validate_window(3, 1, 0).is_err());
    }

    #[test]
    fn test_validate_block_size() {
        assert!(validate_block_size(4).is_ok());
        assert!(validate_block_size(16).is_ok());
        assert!(validate_block_size(MAX_BLOCK_SIZE).is_ok());
        assert!(validate_block_size(0).is_err());
        assert!(validate_block_size(12).is_err());
        assert!(validate_block_size(128).is_err());
    }

    #[test]
    fn test_validate_lengths() {
        assert!(validate_input_len(8, 8, "bias").is_ok());
        assert!(validate_input_len(7, 8, "bias").is_err());
        assert!(validate_min_len(9, 8, "output").is_ok());
        let err = validate_min_len(7, 8, "output").unwrap_err();
        assert_eq!(err, "output len 7 < required 8");
    }

    #[test]
    fn test_checked_volume() {
        assert_eq!(checked_volume(&[2, 3, 4], "input").unwrap(), 24);
        assert_eq!(checked_volume(&[], "input").unwrap(), 1);
        assert!(checked_volume(&[usize::MAX, 2], "input").is_err());
    }
}
