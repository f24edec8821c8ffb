//! Content hashes, pre-registration commitments and the provenance record.
//!
//! A run is reproducible from its provenance: the SHA-256 of each input, the
//! seed, the period set and the commitment over the full configuration.
//! Pre-registration works by publishing the commitment before the data are
//! examined; [`verify_preregistration`] then refuses any run whose
//! parameters differ from the registered ones. Registering the
//! [`InputHashes`] as well pins the dataset identity, checked by
//! [`verify_registered_inputs`].

use crate::config::{ProtocolConfig, WhiteningMode};
use crate::error::{FingerprintError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Domain separator for configuration commitments.
const DOMAIN_PREREGISTRATION_V1: &[u8] = b"fingerprint-core/preregistration/v1\0";

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    hex::encode(h.finalize())
}

/// Commitment over the canonical JSON encoding of `config`.
///
/// Any change to a verdict-affecting parameter (periods, range, trials,
/// seed, whitening, thresholds, strictness, protocol version) changes it.
pub fn preregistration_commitment(config: &ProtocolConfig) -> Result<String> {
    let canonical = serde_json::to_vec(config)?;
    let mut h = Sha256::new();
    h.update(DOMAIN_PREREGISTRATION_V1);
    h.update(&canonical);
    Ok(hex::encode(h.finalize()))
}

/// Fail unless `config` hashes to the registered commitment.
pub fn verify_preregistration(config: &ProtocolConfig, expected: &str) -> Result<()> {
    let actual = preregistration_commitment(config)?;
    if !actual.eq_ignore_ascii_case(expected.trim()) {
        return Err(FingerprintError::PreregistrationMismatch {
            expected: expected.trim().to_string(),
            actual,
        });
    }
    Ok(())
}

/// SHA-256 digests of the run's inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputHashes {
    pub observed: String,
    pub model: String,
    pub covariance: Option<String>,
    /// `"file"` when hashed over file bytes, `"canonical"` when hashed over
    /// the in-memory encoding.
    pub method: String,
}

/// Fail unless every input digest equals the registered one.
///
/// Both sets must be hashed the same way; a registered covariance digest
/// requires a covariance input and vice versa.
pub fn verify_registered_inputs(registered: &InputHashes, actual: &InputHashes) -> Result<()> {
    let mismatch = |input: &str, expected: &str, found: &str| FingerprintError::InputHashMismatch {
        input: input.to_string(),
        expected: expected.to_string(),
        actual: found.to_string(),
    };
    if registered.method != actual.method {
        return Err(mismatch("hash method", &registered.method, &actual.method));
    }
    let same = |a: &str, b: &str| a.eq_ignore_ascii_case(b.trim());
    if !same(&actual.observed, &registered.observed) {
        return Err(mismatch("observed", &registered.observed, &actual.observed));
    }
    if !same(&actual.model, &registered.model) {
        return Err(mismatch("model", &registered.model, &actual.model));
    }
    match (&registered.covariance, &actual.covariance) {
        (None, None) => Ok(()),
        (Some(r), Some(a)) if same(a, r) => Ok(()),
        (r, a) => Err(mismatch(
            "covariance",
            r.as_deref().unwrap_or("<none>"),
            a.as_deref().unwrap_or("<none>"),
        )),
    }
}

/// Everything needed to rerun and audit a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub crate_version: String,
    pub protocol_version: String,
    pub preregistration_commitment: String,
    pub seed: u64,
    pub periods: Vec<u32>,
    pub n_trials: usize,
    pub ell_min: u32,
    pub ell_max: u32,
    pub whitening: WhiteningMode,
    pub inputs: InputHashes,
}

impl Provenance {
    pub fn new(config: &ProtocolConfig, inputs: InputHashes) -> Result<Self> {
        Ok(Self {
            crate_version: env!("CARGO_PKG_VERSION").to_string(),
            protocol_version: config.protocol_version.clone(),
            preregistration_commitment: preregistration_commitment(config)?,
            seed: config.seed,
            periods: config.periods.as_slice().to_vec(),
            n_trials: config.n_trials,
            ell_min: config.ell_min,
            ell_max: config.ell_max,
            whitening: config.whitening,
            inputs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PeriodSet, Thresholds};

    fn config() -> ProtocolConfig {
        ProtocolConfig {
            protocol_version: "comb-v1".into(),
            periods: PeriodSet::new([8, 16, 32]).unwrap(),
            ell_min: 2,
            ell_max: 1000,
            n_trials: 1000,
            seed: 7,
            whitening: WhiteningMode::Diagonal,
            thresholds: Thresholds::default(),
            strict: true,
        }
    }

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_commitment_is_stable_and_sensitive() {
        let a = preregistration_commitment(&config()).unwrap();
        assert_eq!(a, preregistration_commitment(&config()).unwrap());
        assert_eq!(a.len(), 64);

        let mut changed = config();
        changed.periods = PeriodSet::new([8, 16, 32, 64]).unwrap();
        assert_ne!(a, preregistration_commitment(&changed).unwrap());

        let mut changed = config();
        changed.seed = 8;
        assert_ne!(a, preregistration_commitment(&changed).unwrap());
    }

    #[test]
    fn test_verify_preregistration() {
        let cfg = config();
        let c = preregistration_commitment(&cfg).unwrap();
        assert!(verify_preregistration(&cfg, &c).is_ok());
        assert!(verify_preregistration(&cfg, &c.to_uppercase()).is_ok());

        let mut tampered = cfg.clone();
        tampered.thresholds.candidate = 0.05;
        assert!(matches!(
            verify_preregistration(&tampered, &c),
            Err(FingerprintError::PreregistrationMismatch { .. })
        ));
    }

    fn hashes() -> InputHashes {
        InputHashes {
            observed: sha256_hex(b"obs"),
            model: sha256_hex(b"model"),
            covariance: Some(sha256_hex(b"cov")),
            method: "file".into(),
        }
    }

    #[test]
    fn test_registered_inputs_must_match() {
        let registered = hashes();
        assert!(verify_registered_inputs(&registered, &hashes()).is_ok());

        let mut swapped = hashes();
        swapped.observed = sha256_hex(b"other release");
        match verify_registered_inputs(&registered, &swapped) {
            Err(FingerprintError::InputHashMismatch { input, .. }) => assert_eq!(input, "observed"),
            other => panic!("unexpected {:?}", other),
        }

        let mut dropped = hashes();
        dropped.covariance = None;
        assert!(matches!(
            verify_registered_inputs(&registered, &dropped),
            Err(FingerprintError::InputHashMismatch { .. })
        ));

        let mut rehashed = hashes();
        rehashed.method = "canonical".into();
        assert!(verify_registered_inputs(&registered, &rehashed).is_err());
    }

    #[test]
    fn test_provenance_copies_parameters() {
        let hashes = InputHashes {
            observed: sha256_hex(b"obs"),
            model: sha256_hex(b"model"),
            covariance: None,
            method: "canonical".into(),
        };
        let p = Provenance::new(&config(), hashes).unwrap();
        assert_eq!(p.seed, 7);
        assert_eq!(p.periods, vec![8, 16, 32]);
        assert_eq!(p.crate_version, env!("CARGO_PKG_VERSION"));
    }
}
