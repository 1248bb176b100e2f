use std::borrow::Cow;

use crate::error::AlsError;
use crate::table::{CsrTable, DenseTable, IndexTable};

/// Computation method of the training algorithm.
///
/// Selects which kind of rating table the algorithm consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i32)]
pub enum TrainingMethod {
    /// Ratings supplied as a dense `n_users × n_items` table; zero entries
    /// are treated as unobserved.
    DefaultDense = 0,
    /// Ratings supplied as a CSR table.
    #[default]
    FastCsr = 1,
}

impl TrainingMethod {
    pub fn name(self) -> &'static str {
        match self {
            TrainingMethod::DefaultDense => "defaultDense",
            TrainingMethod::FastCsr => "fastCSR",
        }
    }

    /// Map the integer code used on the command line.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(TrainingMethod::DefaultDense),
            1 => Some(TrainingMethod::FastCsr),
            _ => None,
        }
    }
}

/// Training parameters shared by every step of a computation.
///
/// `n_factors` must stay the same for all steps of one distributed run.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    /// Number of latent factors per user and per item.
    pub n_factors: usize,
    /// Number of user+item update epochs.
    pub max_iterations: usize,
    /// Confidence scale: `c = 1 + alpha * r`.
    pub alpha: f64,
    /// L2 regularisation added to the diagonal of every normal equation.
    pub lambda: f64,
    /// Ratings above this value count as a positive preference.
    pub preference_threshold: f64,
    /// Seed of the factor initialisation stream.
    pub seed: u64,
    /// Input table kind.
    pub method: TrainingMethod,
}

impl Default for Parameter {
    fn default() -> Self {
        Self {
            n_factors: 10,
            max_iterations: 5,
            alpha: 40.0,
            lambda: 0.01,
            preference_threshold: 0.0,
            seed: 777_777,
            method: TrainingMethod::FastCsr,
        }
    }
}

impl Parameter {
    /// Validate parameter values (independent of training data).
    pub fn validate(&self) -> Result<(), AlsError> {
        if self.n_factors == 0 {
            return Err(AlsError::InvalidParameter("n_factors must be > 0".into()));
        }
        if !self.alpha.is_finite() || self.alpha < 0.0 {
            return Err(AlsError::InvalidParameter("alpha < 0".into()));
        }
        if !self.lambda.is_finite() || self.lambda < 0.0 {
            return Err(AlsError::InvalidParameter("lambda < 0".into()));
        }
        if !self.preference_threshold.is_finite() {
            return Err(AlsError::InvalidParameter(
                "preference_threshold must be finite".into(),
            ));
        }
        Ok(())
    }

    /// Require `table` to be a full factor block with `n_factors` columns.
    pub(crate) fn check_factors(
        &self,
        table: &DenseTable,
        name: &'static str,
    ) -> Result<(), AlsError> {
        if table.is_packed() {
            return Err(AlsError::IncorrectTableLayout(name));
        }
        if table.n_cols() != self.n_factors {
            return Err(AlsError::IncorrectNumberOfFactors {
                expected: self.n_factors,
                actual: table.n_cols(),
            });
        }
        Ok(())
    }

    /// Require `table` to be a full `n_factors × n_factors` cross-product.
    pub(crate) fn check_cross_product(
        &self,
        table: &DenseTable,
        name: &'static str,
    ) -> Result<(), AlsError> {
        table.check_full(name, Some(self.n_factors), self.n_factors)
    }
}

/// Split of one dimension (users or items) across nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Partition {
    /// `n` blocks of (nearly) equal size.
    Equal(usize),
    /// Explicit block boundaries: `offsets[k]..offsets[k + 1]` is block `k`.
    Offsets(Vec<usize>),
}

impl Partition {
    pub fn n_parts(&self) -> usize {
        match self {
            Partition::Equal(n) => *n,
            Partition::Offsets(offsets) => offsets.len().saturating_sub(1),
        }
    }

    /// Block boundaries for a dimension of size `full`.
    ///
    /// Returns `n_parts + 1` non-decreasing values from 0 to `full`.
    pub fn offsets(&self, full: usize) -> Result<Vec<usize>, AlsError> {
        match self {
            Partition::Equal(0) => Err(AlsError::InvalidParameter(
                "partition must have at least one block".into(),
            )),
            Partition::Equal(n) => Ok((0..=*n).map(|k| k * full / n).collect()),
            Partition::Offsets(offsets) => {
                if offsets.len() < 2 {
                    return Err(AlsError::InvalidParameter(
                        "partition must have at least one block".into(),
                    ));
                }
                if offsets[0] != 0 || offsets[offsets.len() - 1] != full {
                    return Err(AlsError::InvalidParameter(format!(
                        "partition must span 0..{}",
                        full
                    )));
                }
                if offsets.windows(2).any(|w| w[0] > w[1]) {
                    return Err(AlsError::InvalidParameter(
                        "partition offsets must be non-decreasing".into(),
                    ));
                }
                Ok(offsets.clone())
            }
        }
    }
}

/// Rating table handed to batch training, tagged with its storage kind.
#[derive(Debug, Clone, Copy)]
pub enum TrainingData<'a> {
    Dense(&'a DenseTable),
    Csr(&'a CsrTable),
}

impl<'a> TrainingData<'a> {
    pub fn kind_name(&self) -> &'static str {
        match self {
            TrainingData::Dense(_) => "dense",
            TrainingData::Csr(_) => "CSR",
        }
    }

    pub fn n_users(&self) -> usize {
        match self {
            TrainingData::Dense(t) => t.n_rows(),
            TrainingData::Csr(t) => t.n_rows(),
        }
    }

    pub fn n_items(&self) -> usize {
        match self {
            TrainingData::Dense(t) => t.n_cols(),
            TrainingData::Csr(t) => t.n_cols(),
        }
    }

    /// Observed ratings in CSR form (users × items).
    pub fn to_csr(&self) -> Cow<'a, CsrTable> {
        match *self {
            TrainingData::Dense(t) => Cow::Owned(CsrTable::from_dense(t)),
            TrainingData::Csr(t) => Cow::Borrowed(t),
        }
    }

    /// Fail with `UnsupportedMethod` unless the data kind matches `method`.
    pub fn check_method(&self, method: TrainingMethod) -> Result<(), AlsError> {
        let ok = matches!(
            (method, self),
            (TrainingMethod::DefaultDense, TrainingData::Dense(_))
                | (TrainingMethod::FastCsr, TrainingData::Csr(_))
        );
        if ok {
            Ok(())
        } else {
            Err(AlsError::UnsupportedMethod {
                method: method.name(),
                data: self.kind_name(),
            })
        }
    }
}

/// A trained implicit ALS model.
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    users_factors: DenseTable,
    items_factors: DenseTable,
}

impl Model {
    /// Pair user and item factors; both must be full tables with the same
    /// number of columns.
    pub fn new(users_factors: DenseTable, items_factors: DenseTable) -> Result<Self, AlsError> {
        if users_factors.is_packed() {
            return Err(AlsError::IncorrectTableLayout("usersFactors"));
        }
        if items_factors.is_packed() {
            return Err(AlsError::IncorrectTableLayout("itemsFactors"));
        }
        if users_factors.n_cols() != items_factors.n_cols() {
            return Err(AlsError::IncorrectNumberOfFactors {
                expected: users_factors.n_cols(),
                actual: items_factors.n_cols(),
            });
        }
        Ok(Self {
            users_factors,
            items_factors,
        })
    }

    pub fn n_users(&self) -> usize {
        self.users_factors.n_rows()
    }

    pub fn n_items(&self) -> usize {
        self.items_factors.n_rows()
    }

    pub fn n_factors(&self) -> usize {
        self.users_factors.n_cols()
    }

    pub fn users_factors(&self) -> &DenseTable {
        &self.users_factors
    }

    pub fn items_factors(&self) -> &DenseTable {
        &self.items_factors
    }

    pub(crate) fn users_factors_mut(&mut self) -> &mut DenseTable {
        &mut self.users_factors
    }

    pub(crate) fn items_factors_mut(&mut self) -> &mut DenseTable {
        &mut self.items_factors
    }

    /// Factor vector of user `u`.
    pub fn user(&self, u: usize) -> &[f64] {
        self.users_factors.row(u)
    }

    /// Factor vector of item `i`.
    pub fn item(&self, i: usize) -> &[f64] {
        self.items_factors.row(i)
    }

    /// Require `n_factors` to match the parameter.
    pub fn check(&self, param: &Parameter) -> Result<(), AlsError> {
        param.check_factors(&self.users_factors, "usersFactors")?;
        param.check_factors(&self.items_factors, "itemsFactors")
    }
}

/// A block of factor rows plus the global index of every row.
///
/// Partial models are the unit of exchange between nodes: step 3 produces
/// one per destination node, step 4 consumes all it receives and yields the
/// recomputed block of its own rows.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialModel {
    factors: DenseTable,
    indices: IndexTable,
}

impl PartialModel {
    /// Contiguous block whose first row has global index `offset`.
    pub fn from_offset(factors: DenseTable, offset: usize) -> Self {
        let indices = (offset..offset + factors.n_rows()).collect();
        Self { factors, indices }
    }

    /// Scattered rows with explicit global indices.
    pub fn from_indices(factors: DenseTable, indices: IndexTable) -> Result<Self, AlsError> {
        if indices.len() != factors.n_rows() {
            return Err(AlsError::IncorrectTableSize {
                name: "indices",
                expected: format!("{} x 1", factors.n_rows()),
                actual: format!("{} x 1", indices.len()),
            });
        }
        Ok(Self { factors, indices })
    }

    /// Zero factors for `n_rows` rows starting at `offset`.
    pub fn zeros(n_rows: usize, n_factors: usize, offset: usize) -> Self {
        Self::from_offset(DenseTable::zeros(n_rows, n_factors), offset)
    }

    pub fn factors(&self) -> &DenseTable {
        &self.factors
    }

    pub fn factors_mut(&mut self) -> &mut DenseTable {
        &mut self.factors
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn n_rows(&self) -> usize {
        self.factors.n_rows()
    }

    pub fn n_factors(&self) -> usize {
        self.factors.n_cols()
    }

    /// First global index when the rows form one contiguous range.
    pub fn offset(&self) -> Option<usize> {
        let first = *self.indices.first()?;
        let contiguous = self
            .indices
            .iter()
            .enumerate()
            .all(|(k, &idx)| idx == first + k);
        contiguous.then_some(first)
    }

    pub fn into_parts(self) -> (DenseTable, IndexTable) {
        (self.factors, self.indices)
    }

    /// Validate against the parameter's `n_factors`.
    pub fn check(&self, param: &Parameter, name: &'static str) -> Result<(), AlsError> {
        param.check_factors(&self.factors, name)?;
        if self.indices.len() != self.factors.n_rows() {
            return Err(AlsError::IncorrectTableSize {
                name: "indices",
                expected: format!("{} x 1", self.factors.n_rows()),
                actual: format!("{} x 1", self.indices.len()),
            });
        }
        Ok(())
    }
}
