//! Loss functions

use ndarray::{Array2, Zip};

use crate::error::{Result, TunerError};

/// Probabilities are clipped to [EPSILON, 1 - EPSILON] before the log
pub const EPSILON: f32 = 1e-7;

/// Mean categorical cross-entropy of softmax outputs against one-hot targets
///
/// Returns the loss and its gradient with respect to `probs`.
pub fn categorical_crossentropy(probs: &Array2<f32>, targets: &Array2<f32>) -> Result<(f32, Array2<f32>)> {
    if probs.dim() != targets.dim() {
        return Err(TunerError::ShapeError {
            expected: format!("{:?}", targets.dim()),
            actual: format!("{:?}", probs.dim()),
        });
    }
    let n = probs.nrows().max(1) as f32;

    let mut loss = 0.0f32;
    let mut grad = Array2::zeros(probs.raw_dim());
    Zip::from(&mut grad)
        .and(probs)
        .and(targets)
        .for_each(|g, &p, &y| {
            let p = p.clamp(EPSILON, 1.0 - EPSILON);
            if y != 0.0 {
                loss -= y * p.ln();
                *g = -y / (p * n);
            }
        });

    Ok((loss / n, grad))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_prediction_has_near_zero_loss() {
        let probs = Array2::from_shape_vec((1, 3), vec![0.0, 1.0, 0.0]).unwrap();
        let targets = probs.clone();
        let (loss, _) = categorical_crossentropy(&probs, &targets).unwrap();
        assert!(loss < 1e-5);
    }

    #[test]
    fn test_uniform_prediction() {
        let probs = Array2::from_elem((2, 4), 0.25);
        let targets = Array2::from_shape_vec((2, 4), vec![1., 0., 0., 0., 0., 0., 1., 0.]).unwrap();
        let (loss, grad) = categorical_crossentropy(&probs, &targets).unwrap();
        assert!((loss - 4.0f32.ln()).abs() < 1e-5);
        // -1 / (0.25 * 2)
        assert!((grad[[0, 0]] + 2.0).abs() < 1e-5);
        assert_eq!(grad[[0, 1]], 0.0);
    }

    #[test]
    fn test_zero_probability_is_finite() {
        let probs = Array2::from_shape_vec((1, 2), vec![0.0, 1.0]).unwrap();
        let targets = Array2::from_shape_vec((1, 2), vec![1.0, 0.0]).unwrap();
        let (loss, grad) = categorical_crossentropy(&probs, &targets).unwrap();
        assert!(loss.is_finite());
        assert!(grad.iter().all(|g| g.is_finite()));
    }

    #[test]
    fn test_shape_mismatch() {
        let probs = Array2::<f32>::zeros((2, 3));
        let targets = Array2::<f32>::zeros((2, 4));
        assert!(categorical_crossentropy(&probs, &targets).is_err());
    }
}
