use ndarray::Array2;

use crate::{MgritError, Result};

/// The value carried at one time point: a `batch × width` activation block.
pub type State = Array2<f64>;

/// Flattens a state row-major for the wire.
pub(crate) fn pack(x: &State) -> Vec<f64> {
    x.iter().copied().collect()
}

/// Rebuilds a state received off the wire.
pub(crate) fn unpack(flat: Vec<f64>, batch: usize, width: usize) -> Result<State> {
    let got = (flat.len() / width.max(1), width);
    Array2::from_shape_vec((batch, width), flat).map_err(|_| MgritError::ShapeMismatch {
        what: "received boundary value",
        got,
        expected: (batch, width),
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::array;

    #[test]
    fn pack_unpack_roundtrip() {
        let x = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let back = unpack(pack(&x), 2, 3).unwrap();
        assert_eq!(back, x);
    }

    #[test]
    fn unpack_rejects_truncated_payload() {
        let err = unpack(vec![1.0; 5], 2, 3).unwrap_err();
        assert!(matches!(err, MgritError::ShapeMismatch { .. }));
    }
}
