use serde::{Deserialize, Serialize};

use crate::one_euro_filter::FilterError;

/// A dense vector signal with an explicit shape, stored row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SignalData")]
pub struct Signal {
    shape: Vec<usize>,
    data: Vec<f64>,
}

/// Unchecked wire form, validated through [`Signal::new`].
#[derive(Deserialize)]
struct SignalData {
    shape: Vec<usize>,
    data: Vec<f64>,
}

impl TryFrom<SignalData> for Signal {
    type Error = FilterError;

    fn try_from(raw: SignalData) -> Result<Self, Self::Error> {
        Signal::new(raw.shape, raw.data)
    }
}

impl Signal {
    pub fn new(shape: Vec<usize>, data: Vec<f64>) -> Result<Self, FilterError> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(FilterError::MalformedSignal {
                shape,
                len: data.len(),
            });
        }

        Ok(Self { shape, data })
    }

    /// An `(n, 1)` column vector.
    pub fn column(data: Vec<f64>) -> Self {
        Self {
            shape: vec![data.len(), 1],
            data,
        }
    }

    pub fn zeros(shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        Self {
            shape,
            data: vec![0.0; len],
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }

    pub fn norm(&self) -> f64 {
        self.data.iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    pub(crate) fn from_parts(shape: Vec<usize>, data: Vec<f64>) -> Self {
        debug_assert_eq!(shape.iter().product::<usize>(), data.len());
        Self { shape, data }
    }

    pub(crate) fn with_data(&self, data: Vec<f64>) -> Self {
        debug_assert_eq!(data.len(), self.data.len());
        Self {
            shape: self.shape.clone(),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_data_not_matching_shape() {
        let result = Signal::new(vec![3, 1], vec![1.0, 2.0]);
        assert!(matches!(
            result,
            Err(FilterError::MalformedSignal { len: 2, .. })
        ));
    }

    #[test]
    fn column_has_trailing_unit_axis() {
        let signal = Signal::column(vec![1.0, 2.0, 3.0]);
        assert_eq!(signal.shape(), &[3, 1]);
        assert_eq!(signal.len(), 3);
    }

    #[test]
    fn zeros_and_norm() {
        let signal = Signal::zeros(vec![2, 2]);
        assert_eq!(signal.as_slice(), &[0.0; 4]);
        assert_eq!(signal.norm(), 0.0);

        let signal = Signal::new(vec![2], vec![3.0, 4.0]).unwrap();
        assert!((signal.norm() - 5.0).abs() < 1e-12);
    }

    #[test]
    fn detects_non_finite_values() {
        assert!(Signal::column(vec![0.0, 1.0]).is_finite());
        assert!(!Signal::column(vec![0.0, f64::NAN]).is_finite());
    }

    #[test]
    fn deserializing_checks_shape_against_data() {
        let signal: Signal = serde_json::from_str(r#"{ "shape": [2, 1], "data": [1.0, 2.0] }"#).unwrap();
        assert_eq!(signal, Signal::column(vec![1.0, 2.0]));

        let result = serde_json::from_str::<Signal>(r#"{ "shape": [3, 1], "data": [1.0] }"#);
        assert!(result.is_err());
    }
}
