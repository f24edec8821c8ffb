//! Power spectra on an integer multipole grid.

use crate::error::{FingerprintError, Result};

/// One observational or model power spectrum.
///
/// Invariants (checked by [`Spectrum::new`]): multipoles strictly increasing,
/// values finite, and, when present, every uncertainty finite and positive.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    name: String,
    ell: Vec<u32>,
    value: Vec<f64>,
    uncertainty: Option<Vec<f64>>,
}

impl Spectrum {
    /// Build a validated spectrum.
    ///
    /// `name` is only used in error messages and reports.
    pub fn new(
        name: impl Into<String>,
        ell: Vec<u32>,
        value: Vec<f64>,
        uncertainty: Option<Vec<f64>>,
    ) -> Result<Self> {
        let name = name.into();
        if ell.is_empty() {
            return Err(FingerprintError::invalid_spectrum(&name, "no multipoles"));
        }
        if value.len() != ell.len() {
            return Err(FingerprintError::invalid_spectrum(
                &name,
                format!("{} values for {} multipoles", value.len(), ell.len()),
            ));
        }
        if let Some(w) = ell.windows(2).position(|w| w[1] <= w[0]) {
            return Err(FingerprintError::invalid_spectrum(
                &name,
                format!(
                    "multipoles not strictly increasing at index {} ({} -> {})",
                    w + 1,
                    ell[w],
                    ell[w + 1]
                ),
            ));
        }
        if let Some(i) = value.iter().position(|v| !v.is_finite()) {
            return Err(FingerprintError::invalid_spectrum(
                &name,
                format!("non-finite value at ell={}", ell[i]),
            ));
        }
        if let Some(sigma) = &uncertainty {
            if sigma.len() != ell.len() {
                return Err(FingerprintError::invalid_spectrum(
                    &name,
                    format!("{} uncertainties for {} multipoles", sigma.len(), ell.len()),
                ));
            }
            if let Some(i) = sigma.iter().position(|s| !(s.is_finite() && *s > 0.0)) {
                return Err(FingerprintError::invalid_spectrum(
                    &name,
                    format!("uncertainty {} at ell={} is not positive", sigma[i], ell[i]),
                ));
            }
        }
        Ok(Self {
            name,
            ell,
            value,
            uncertainty,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ell(&self) -> &[u32] {
        &self.ell
    }

    pub fn values(&self) -> &[f64] {
        &self.value
    }

    pub fn uncertainty(&self) -> Option<&[f64]> {
        self.uncertainty.as_deref()
    }

    pub fn len(&self) -> usize {
        self.ell.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ell.is_empty()
    }

    /// Indices of the bins with `ell_min <= ell <= ell_max`.
    pub fn indices_in_range(&self, ell_min: u32, ell_max: u32) -> Vec<usize> {
        self.ell
            .iter()
            .enumerate()
            .filter(|(_, &l)| l >= ell_min && l <= ell_max)
            .map(|(i, _)| i)
            .collect()
    }

    /// Restrict to `[ell_min, ell_max]`. Fails if no bin survives.
    pub fn crop(&self, ell_min: u32, ell_max: u32) -> Result<Self> {
        let idx = self.indices_in_range(ell_min, ell_max);
        if idx.is_empty() {
            return Err(FingerprintError::invalid_spectrum(
                &self.name,
                format!("no multipoles in range [{}, {}]", ell_min, ell_max),
            ));
        }
        Ok(Self {
            name: self.name.clone(),
            ell: idx.iter().map(|&i| self.ell[i]).collect(),
            value: idx.iter().map(|&i| self.value[i]).collect(),
            uncertainty: self
                .uncertainty
                .as_ref()
                .map(|s| idx.iter().map(|&i| s[i]).collect()),
        })
    }

    /// Little-endian `(ell, value, uncertainty)` triples, used to hash
    /// spectra that did not come from a file.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len() * 20);
        for i in 0..self.len() {
            out.extend_from_slice(&self.ell[i].to_le_bytes());
            out.extend_from_slice(&self.value[i].to_le_bytes());
            let s = self.uncertainty.as_ref().map_or(f64::NAN, |s| s[i]);
            out.extend_from_slice(&s.to_le_bytes());
        }
        out
    }
}

/// Check that two spectra share exactly the same multipole grid.
pub fn check_aligned(observed: &Spectrum, model: &Spectrum) -> Result<()> {
    if observed.len() != model.len() {
        return Err(FingerprintError::MisalignedGrid {
            reason: format!(
                "'{}' has {} bins, '{}' has {}",
                observed.name(),
                observed.len(),
                model.name(),
                model.len()
            ),
        });
    }
    if let Some(i) = observed
        .ell()
        .iter()
        .zip(model.ell())
        .position(|(a, b)| a != b)
    {
        return Err(FingerprintError::MisalignedGrid {
            reason: format!(
                "bin {}: '{}' has ell={}, '{}' has ell={}",
                i,
                observed.name(),
                observed.ell()[i],
                model.name(),
                model.ell()[i]
            ),
        });
    }
    Ok(())
}
