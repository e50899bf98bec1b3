//! Packed lower-triangular addressing shared by the RF, lookup-table and
//! ARSA cores.
//!
//! All "row vs column" handling for symmetric matrices goes through a single
//! normalising step (swap so row <= column) followed by packed addressing;
//! there are no separate upper/lower-triangular code paths anywhere in this
//! crate.

/// Byte value reserved for "no data" in a packed triangular byte matrix.
pub const MISSING_BYTE: u8 = 0xFF;

/// Index into the packed row-major lower-triangular layout for `(row, col)`
/// with `row <= col`, i.e. `pack(i, j) = j(j+1)/2 + i`.
///
/// `row` and `col` are normalised first, so callers may pass either order.
#[inline]
pub fn pack_index(row: usize, col: usize) -> usize {
    let (i, j) = if row <= col { (row, col) } else { (col, row) };
    j * (j + 1) / 2 + i
}

/// Number of entries needed to store an `n x n` symmetric matrix packed by
/// [`pack_index`].
#[inline]
pub fn packed_len(n: usize) -> usize {
    n * (n + 1) / 2
}

/// A packed symmetric `n x n` matrix of `f64` values.
#[derive(Debug, Clone)]
pub struct PackedTriangle<T> {
    n: usize,
    data: Vec<T>,
}

impl<T: Clone> PackedTriangle<T> {
    pub fn filled(n: usize, value: T) -> Self {
        PackedTriangle {
            n,
            data: vec![value; packed_len(n)],
        }
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn get(&self, row: usize, col: usize) -> &T {
        &self.data[pack_index(row, col)]
    }

    pub fn set(&mut self, row: usize, col: usize, value: T) {
        let idx = pack_index(row, col);
        self.data[idx] = value;
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }
}

/// A packed symmetric `n x n` byte-coded matrix, with real values looked up
/// through a shared `levels` table. `0xFF` denotes "no data" and is never
/// looked up.
#[derive(Debug, Clone)]
pub struct PackedTriangleBytes {
    n: usize,
    bytes: Vec<u8>,
    /// Strictly increasing; invariant (i) of the data model.
    levels: Vec<f64>,
}

impl PackedTriangleBytes {
    /// Builds a packed byte matrix from raw storage, validating invariants
    /// (i) `levels` strictly increasing and the storage length matching `n`.
    pub fn new(n: usize, bytes: Vec<u8>, levels: Vec<f64>) -> Result<Self, crate::error::KernelError> {
        let expected = packed_len(n);
        if bytes.len() != expected {
            return Err(crate::error::KernelError::ShapeMismatch {
                detail: format!(
                    "packed triangular byte matrix for n={n} expects {expected} bytes, got {}",
                    bytes.len()
                ),
            });
        }
        if !levels.windows(2).all(|w| w[0] < w[1]) {
            return Err(crate::error::KernelError::ShapeMismatch {
                detail: "levels table must be strictly increasing".to_string(),
            });
        }
        Ok(PackedTriangleBytes { n, bytes, levels })
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn levels(&self) -> &[f64] {
        &self.levels
    }

    pub fn raw_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Byte code at `(row, col)`, normalised so row <= col before addressing.
    pub fn code(&self, row: usize, col: usize) -> u8 {
        self.bytes[pack_index(row, col)]
    }

    /// Real-valued distance at `(row, col)`, or `None` if the stored code is
    /// `0xFF` ("no data"). The diagonal is included in storage but ignored
    /// by all algorithms that consume this type, per the boundary
    /// invariant; callers that need the diagonal should read [`code`]
    /// directly.
    pub fn value(&self, row: usize, col: usize) -> Option<f64> {
        let code = self.code(row, col);
        if code == MISSING_BYTE {
            None
        } else {
            Some(self.levels[code as usize])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triangular_pack_matches_scenario_a() {
        // scenario (a): n=3, pack values (0,0)=0,(0,1)=1,(1,1)=2,(0,2)=3,(1,2)=4,(2,2)=5
        assert_eq!(pack_index(0, 0), 0);
        assert_eq!(pack_index(0, 1), 1);
        assert_eq!(pack_index(1, 1), 2);
        assert_eq!(pack_index(0, 2), 3);
        assert_eq!(pack_index(1, 2), 4);
        assert_eq!(pack_index(2, 2), 5);
    }

    #[test]
    fn pack_index_is_symmetric() {
        for i in 0..6 {
            for j in 0..6 {
                assert_eq!(pack_index(i, j), pack_index(j, i));
            }
        }
    }

    #[test]
    fn round_trip_write_then_read_transposed() {
        let mut m = PackedTriangle::filled(4, 0.0_f64);
        m.set(1, 3, 42.0);
        assert_eq!(*m.get(3, 1), 42.0);
    }

    #[test]
    fn rejects_non_increasing_levels() {
        let bytes = vec![0u8; packed_len(2)];
        let err = PackedTriangleBytes::new(2, bytes, vec![1.0, 1.0]);
        assert!(err.is_err());
    }

    #[test]
    fn missing_byte_has_no_value() {
        let n = 2;
        let mut bytes = vec![0u8; packed_len(n)];
        bytes[pack_index(0, 1)] = MISSING_BYTE;
        let m = PackedTriangleBytes::new(n, bytes, vec![0.1, 0.2]).unwrap();
        assert_eq!(m.value(0, 1), None);
        assert_eq!(m.value(1, 0), None);
    }
}
