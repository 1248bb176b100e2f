//! Numeric tables exchanged between training steps.
//!
//! [`DenseTable`] holds factor blocks and cross-products, [`CsrTable`] holds
//! the sparse rating matrix (or a block of it). All indices are 0-based in
//! memory; the 1-based CSR text format is handled in [`crate::io`].

use crate::error::AlsError;

/// Row positions inside a factor block.
pub type IndexTable = Vec<usize>;

/// Memory layout of a [`DenseTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StorageLayout {
    /// Full `n_rows × n_cols` matrix, row after row.
    #[default]
    RowMajor,
    /// Square symmetric matrix, lower triangle stored row by row.
    PackedSymmetric,
    /// Square lower-triangular matrix, stored row by row.
    PackedLowerTriangular,
    /// Square upper-triangular matrix, stored row by row.
    PackedUpperTriangular,
}

impl StorageLayout {
    /// Whether this layout stores only `n(n+1)/2` values.
    pub fn is_packed(self) -> bool {
        !matches!(self, StorageLayout::RowMajor)
    }
}

/// Dense matrix of `f64` values.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseTable {
    n_rows: usize,
    n_cols: usize,
    layout: StorageLayout,
    data: Vec<f64>,
}

impl DenseTable {
    /// Zero-filled row-major table.
    pub fn zeros(n_rows: usize, n_cols: usize) -> Self {
        Self {
            n_rows,
            n_cols,
            layout: StorageLayout::RowMajor,
            data: vec![0.0; n_rows * n_cols],
        }
    }

    /// Wrap a row-major buffer of exactly `n_rows * n_cols` values.
    pub fn from_vec(n_rows: usize, n_cols: usize, data: Vec<f64>) -> Result<Self, AlsError> {
        if data.len() != n_rows * n_cols {
            return Err(AlsError::IncorrectTableSize {
                name: "data",
                expected: format!("{} values", n_rows * n_cols),
                actual: format!("{} values", data.len()),
            });
        }
        Ok(Self {
            n_rows,
            n_cols,
            layout: StorageLayout::RowMajor,
            data,
        })
    }

    /// Build a row-major table from equally long rows.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self, AlsError> {
        let n_cols = rows.first().map_or(0, Vec::len);
        let mut data = Vec::with_capacity(rows.len() * n_cols);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != n_cols {
                return Err(AlsError::IncorrectTableSize {
                    name: "rows",
                    expected: format!("{} columns", n_cols),
                    actual: format!("{} columns in row {}", row.len(), i),
                });
            }
            data.extend_from_slice(row);
        }
        Self::from_vec(rows.len(), n_cols, data)
    }

    /// Wrap a packed buffer for a square `n × n` matrix.
    pub fn packed(n: usize, layout: StorageLayout, data: Vec<f64>) -> Result<Self, AlsError> {
        if !layout.is_packed() {
            return Err(AlsError::InvalidParameter(
                "packed table requires a packed layout".into(),
            ));
        }
        let expected = n * (n + 1) / 2;
        if data.len() != expected {
            return Err(AlsError::IncorrectTableSize {
                name: "data",
                expected: format!("{} packed values", expected),
                actual: format!("{} values", data.len()),
            });
        }
        Ok(Self {
            n_rows: n,
            n_cols: n,
            layout,
            data,
        })
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    pub fn layout(&self) -> StorageLayout {
        self.layout
    }

    pub fn is_packed(&self) -> bool {
        self.layout.is_packed()
    }

    /// Raw storage in the table's own layout.
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Slice of row `i`. Only meaningful for [`StorageLayout::RowMajor`].
    pub fn row(&self, i: usize) -> &[f64] {
        debug_assert!(!self.is_packed());
        &self.data[i * self.n_cols..(i + 1) * self.n_cols]
    }

    pub fn row_mut(&mut self, i: usize) -> &mut [f64] {
        debug_assert!(!self.is_packed());
        let n = self.n_cols;
        &mut self.data[i * n..(i + 1) * n]
    }

    /// Element `(i, j)` for any layout.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        match self.layout {
            StorageLayout::RowMajor => self.data[i * self.n_cols + j],
            StorageLayout::PackedSymmetric => {
                let (r, c) = if j > i { (j, i) } else { (i, j) };
                self.data[r * (r + 1) / 2 + c]
            }
            StorageLayout::PackedLowerTriangular => {
                if j > i {
                    0.0
                } else {
                    self.data[i * (i + 1) / 2 + j]
                }
            }
            StorageLayout::PackedUpperTriangular => {
                if j < i {
                    0.0
                } else {
                    let start = i * self.n_cols - (i * i - i) / 2;
                    self.data[start + j - i]
                }
            }
        }
    }

    /// Copy into a full row-major table.
    pub fn to_row_major(&self) -> DenseTable {
        if !self.is_packed() {
            return self.clone();
        }
        let mut out = DenseTable::zeros(self.n_rows, self.n_cols);
        for i in 0..self.n_rows {
            for j in 0..self.n_cols {
                out.data[i * self.n_cols + j] = self.get(i, j);
            }
        }
        out
    }

    /// `"rows x cols"`, used in error messages.
    pub fn shape_string(&self) -> String {
        format!("{} x {}", self.n_rows, self.n_cols)
    }

    /// Require a full (non-packed) table with `n_cols` columns and, when
    /// given, exactly `n_rows` rows.
    pub(crate) fn check_full(
        &self,
        name: &'static str,
        n_rows: Option<usize>,
        n_cols: usize,
    ) -> Result<(), AlsError> {
        if self.is_packed() {
            return Err(AlsError::IncorrectTableLayout(name));
        }
        let rows_ok = n_rows.map_or(true, |r| r == self.n_rows);
        if !rows_ok || self.n_cols != n_cols {
            let expected = match n_rows {
                Some(r) => format!("{} x {}", r, n_cols),
                None => format!("any x {}", n_cols),
            };
            return Err(AlsError::IncorrectTableSize {
                name,
                expected,
                actual: self.shape_string(),
            });
        }
        Ok(())
    }
}

/// Compressed sparse row matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct CsrTable {
    n_rows: usize,
    n_cols: usize,
    values: Vec<f64>,
    col_indices: Vec<usize>,
    row_offsets: Vec<usize>,
}

impl CsrTable {
    /// Build a CSR table, validating offsets and column indices.
    ///
    /// `row_offsets` must have `n_rows + 1` entries starting at 0 and ending
    /// at `values.len()`; columns inside each row must be strictly ascending
    /// and below `n_cols`.
    pub fn new(
        n_rows: usize,
        n_cols: usize,
        values: Vec<f64>,
        col_indices: Vec<usize>,
        row_offsets: Vec<usize>,
    ) -> Result<Self, AlsError> {
        if values.len() != col_indices.len() {
            return Err(AlsError::IncorrectCsrIndices(format!(
                "{} values but {} column indices",
                values.len(),
                col_indices.len()
            )));
        }
        if row_offsets.len() != n_rows + 1 {
            return Err(AlsError::IncorrectCsrIndices(format!(
                "expected {} row offsets, got {}",
                n_rows + 1,
                row_offsets.len()
            )));
        }
        if row_offsets[0] != 0 || row_offsets[n_rows] != values.len() {
            return Err(AlsError::IncorrectCsrIndices(format!(
                "row offsets must span 0..{}, got {}..{}",
                values.len(),
                row_offsets[0],
                row_offsets[n_rows]
            )));
        }
        for i in 0..n_rows {
            let (start, end) = (row_offsets[i], row_offsets[i + 1]);
            if start > end || end > values.len() {
                return Err(AlsError::IncorrectCsrIndices(format!(
                    "row offsets decrease at row {}",
                    i
                )));
            }
            let cols = &col_indices[start..end];
            for (k, &c) in cols.iter().enumerate() {
                if c >= n_cols {
                    return Err(AlsError::IncorrectCsrIndices(format!(
                        "column {} in row {} exceeds {} columns",
                        c, i, n_cols
                    )));
                }
                if k > 0 && c <= cols[k - 1] {
                    return Err(AlsError::IncorrectCsrIndices(format!(
                        "columns of row {} must be strictly ascending: {} follows {}",
                        i,
                        c,
                        cols[k - 1]
                    )));
                }
            }
        }
        Ok(Self {
            n_rows,
            n_cols,
            values,
            col_indices,
            row_offsets,
        })
    }

    /// Table with no stored entries.
    pub fn empty(n_rows: usize, n_cols: usize) -> Self {
        Self {
            n_rows,
            n_cols,
            values: Vec::new(),
            col_indices: Vec::new(),
            row_offsets: vec![0; n_rows + 1],
        }
    }

    /// Build from `(row, col, value)` entries in any order. Duplicate
    /// coordinates are rejected.
    pub fn from_triplets(
        n_rows: usize,
        n_cols: usize,
        triplets: &[(usize, usize, f64)],
    ) -> Result<Self, AlsError> {
        let mut sorted: Vec<(usize, usize, f64)> = triplets.to_vec();
        sorted.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        let mut row_offsets = vec![0usize; n_rows + 1];
        let mut values = Vec::with_capacity(sorted.len());
        let mut col_indices = Vec::with_capacity(sorted.len());
        for (k, &(r, c, v)) in sorted.iter().enumerate() {
            if r >= n_rows || c >= n_cols {
                return Err(AlsError::IncorrectIndex(format!(
                    "entry ({}, {}) outside {} x {}",
                    r, c, n_rows, n_cols
                )));
            }
            if k > 0 && sorted[k - 1].0 == r && sorted[k - 1].1 == c {
                return Err(AlsError::IncorrectIndex(format!(
                    "duplicate entry ({}, {})",
                    r, c
                )));
            }
            row_offsets[r + 1] += 1;
            values.push(v);
            col_indices.push(c);
        }
        for i in 0..n_rows {
            row_offsets[i + 1] += row_offsets[i];
        }
        Ok(Self {
            n_rows,
            n_cols,
            values,
            col_indices,
            row_offsets,
        })
    }

    /// Keep the non-zero entries of a dense table.
    pub fn from_dense(dense: &DenseTable) -> Self {
        let full = dense.to_row_major();
        let mut values = Vec::new();
        let mut col_indices = Vec::new();
        let mut row_offsets = Vec::with_capacity(full.n_rows() + 1);
        row_offsets.push(0);
        for i in 0..full.n_rows() {
            for (j, &v) in full.row(i).iter().enumerate() {
                if v != 0.0 {
                    values.push(v);
                    col_indices.push(j);
                }
            }
            row_offsets.push(values.len());
        }
        Self {
            n_rows: full.n_rows(),
            n_cols: full.n_cols(),
            values,
            col_indices,
            row_offsets,
        }
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn col_indices(&self) -> &[usize] {
        &self.col_indices
    }

    pub fn row_offsets(&self) -> &[usize] {
        &self.row_offsets
    }

    /// Column indices and values of row `i`.
    pub fn row(&self, i: usize) -> (&[usize], &[f64]) {
        let (start, end) = (self.row_offsets[i], self.row_offsets[i + 1]);
        (&self.col_indices[start..end], &self.values[start..end])
    }

    pub fn row_nnz(&self, i: usize) -> usize {
        self.row_offsets[i + 1] - self.row_offsets[i]
    }

    /// Swap rows and columns.
    pub fn transpose(&self) -> CsrTable {
        let mut counts = vec![0usize; self.n_cols + 1];
        for &c in &self.col_indices {
            counts[c + 1] += 1;
        }
        for j in 0..self.n_cols {
            counts[j + 1] += counts[j];
        }
        let row_offsets = counts.clone();
        let mut next = counts;
        let mut values = vec![0.0; self.nnz()];
        let mut col_indices = vec![0usize; self.nnz()];
        // Rows are visited in order, so the columns of the result stay ascending.
        for i in 0..self.n_rows {
            let (cols, vals) = self.row(i);
            for (&c, &v) in cols.iter().zip(vals) {
                let dst = next[c];
                values[dst] = v;
                col_indices[dst] = i;
                next[c] += 1;
            }
        }
        CsrTable {
            n_rows: self.n_cols,
            n_cols: self.n_rows,
            values,
            col_indices,
            row_offsets,
        }
    }

    /// Rows `start..end`, keeping all columns.
    pub fn row_block(&self, start: usize, end: usize) -> CsrTable {
        let (lo, hi) = (self.row_offsets[start], self.row_offsets[end]);
        CsrTable {
            n_rows: end - start,
            n_cols: self.n_cols,
            values: self.values[lo..hi].to_vec(),
            col_indices: self.col_indices[lo..hi].to_vec(),
            row_offsets: self.row_offsets[start..=end].iter().map(|&o| o - lo).collect(),
        }
    }

    /// Columns `start..end`, rebased so that column `start` becomes 0.
    pub fn column_block(&self, start: usize, end: usize) -> CsrTable {
        let mut values = Vec::new();
        let mut col_indices = Vec::new();
        let mut row_offsets = Vec::with_capacity(self.n_rows + 1);
        row_offsets.push(0);
        for i in 0..self.n_rows {
            let (cols, vals) = self.row(i);
            for (&c, &v) in cols.iter().zip(vals) {
                if c >= start && c < end {
                    values.push(v);
                    col_indices.push(c - start);
                }
            }
            row_offsets.push(values.len());
        }
        CsrTable {
            n_rows: self.n_rows,
            n_cols: end - start,
            values,
            col_indices,
            row_offsets,
        }
    }

    /// Expand into a row-major dense table.
    pub fn to_dense(&self) -> DenseTable {
        let mut out = DenseTable::zeros(self.n_rows, self.n_cols);
        for i in 0..self.n_rows {
            let (cols, vals) = self.row(i);
            let row = out.row_mut(i);
            for (&c, &v) in cols.iter().zip(vals) {
                row[c] = v;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CsrTable {
        // [1 0 2]
        // [0 0 0]
        // [0 3 4]
        CsrTable::new(3, 3, vec![1.0, 2.0, 3.0, 4.0], vec![0, 2, 1, 2], vec![0, 2, 2, 4]).unwrap()
    }

    #[test]
    fn csr_rejects_bad_offsets() {
        let err = CsrTable::new(2, 2, vec![1.0], vec![0], vec![0, 1]).unwrap_err();
        assert!(matches!(err, AlsError::IncorrectCsrIndices(_)));
        let err = CsrTable::new(2, 2, vec![1.0], vec![0], vec![0, 2, 1]).unwrap_err();
        assert!(matches!(err, AlsError::IncorrectCsrIndices(_)));
    }

    #[test]
    fn csr_rejects_unsorted_or_out_of_range_columns() {
        let err = CsrTable::new(1, 3, vec![1.0, 2.0], vec![2, 1], vec![0, 2]).unwrap_err();
        assert!(format!("{}", err).contains("strictly ascending"));
        let err = CsrTable::new(1, 2, vec![1.0], vec![2], vec![0, 1]).unwrap_err();
        assert!(format!("{}", err).contains("exceeds"));
    }

    #[test]
    fn transpose_twice_is_identity() {
        let m = sample();
        let t = m.transpose();
        assert_eq!(t.n_rows(), 3);
        assert_eq!(t.row(2), (&[0usize, 2][..], &[2.0, 4.0][..]));
        assert_eq!(t.transpose(), m);
    }

    #[test]
    fn triplets_match_explicit_construction() {
        let m = CsrTable::from_triplets(
            3,
            3,
            &[(2, 2, 4.0), (0, 0, 1.0), (2, 1, 3.0), (0, 2, 2.0)],
        )
        .unwrap();
        assert_eq!(m, sample());
    }

    #[test]
    fn triplets_reject_duplicates() {
        let err = CsrTable::from_triplets(2, 2, &[(0, 1, 1.0), (0, 1, 2.0)]).unwrap_err();
        assert!(matches!(err, AlsError::IncorrectIndex(_)));
    }

    #[test]
    fn row_and_column_blocks() {
        let m = sample();
        let rows = m.row_block(1, 3);
        assert_eq!(rows.n_rows(), 2);
        assert_eq!(rows.row_nnz(0), 0);
        assert_eq!(rows.row(1).1, &[3.0, 4.0]);

        let cols = m.column_block(1, 3);
        assert_eq!(cols.n_cols(), 2);
        assert_eq!(cols.row(0), (&[1usize][..], &[2.0][..]));
        assert_eq!(cols.row(2), (&[0usize, 1][..], &[3.0, 4.0][..]));
    }

    #[test]
    fn dense_round_trip_keeps_non_zeros() {
        let m = sample();
        assert_eq!(CsrTable::from_dense(&m.to_dense()), m);
    }

    #[test]
    fn packed_layouts_expand_correctly() {
        // 3x3 lower triangle: [1; 2 3; 4 5 6]
        let lower = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let sym = DenseTable::packed(3, StorageLayout::PackedSymmetric, lower.clone()).unwrap();
        assert_eq!(sym.get(0, 2), 4.0);
        assert_eq!(sym.get(2, 0), 4.0);
        let low = DenseTable::packed(3, StorageLayout::PackedLowerTriangular, lower).unwrap();
        assert_eq!(low.get(0, 1), 0.0);
        assert_eq!(low.to_row_major().row(2), &[4.0, 5.0, 6.0]);

        // 3x3 upper triangle: [1 2 3; 4 5; 6]
        let up = DenseTable::packed(
            3,
            StorageLayout::PackedUpperTriangular,
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
        )
        .unwrap();
        assert_eq!(up.to_row_major().data(), &[1.0, 2.0, 3.0, 0.0, 4.0, 5.0, 0.0, 0.0, 6.0]);
    }

    #[test]
    fn check_full_rejects_packed_and_wrong_shape() {
        let packed = DenseTable::packed(2, StorageLayout::PackedSymmetric, vec![1.0, 2.0, 3.0]).unwrap();
        assert!(matches!(
            packed.check_full("crossProduct", Some(2), 2),
            Err(AlsError::IncorrectTableLayout("crossProduct"))
        ));
        let dense = DenseTable::zeros(2, 3);
        assert!(dense.check_full("factors", None, 3).is_ok());
        assert!(matches!(
            dense.check_full("factors", Some(3), 3),
            Err(AlsError::IncorrectTableSize { .. })
        ));
    }
}
