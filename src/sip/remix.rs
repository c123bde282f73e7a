//! Channel remix stage: applies a resolved [`Matrix`] to go from a source's
//! channel count to the route's working channel count.

use crate::error::SipError;
use crate::matrix::Matrix;

pub fn remix(samples: &[f32], matrix: &Matrix) -> Result<Vec<f32>, SipError> {
    if samples.len() % matrix.in_channels.max(1) != 0 {
        return Err(SipError::UnsupportedRemix {
            from: matrix.in_channels,
            to: matrix.out_channels,
        });
    }
    Ok(matrix.apply(samples))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_matrix_is_passthrough() {
        let matrix = Matrix::identity(2);
        let out = remix(&[0.5, -0.5, 0.25, -0.25], &matrix).expect("valid remix");
        assert_eq!(out, vec![0.5, -0.5, 0.25, -0.25]);
    }

    #[test]
    fn misaligned_buffer_errors() {
        let matrix = Matrix::identity(2);
        assert!(remix(&[0.1, 0.2, 0.3], &matrix).is_err());
    }
}
