//! Quorum thresholds
//!
//! For N replicas and fractions `wf`, `rf`:
//!
//! - write quorum `W = floor(N * wf) + 1`
//! - read quorum  `R = floor(N * rf) + 1`
//!
//! `wf + rf > 1` is required up front. With it, any W replicas that took a
//! write and any R replicas that answer a read share at least one replica,
//! which is what makes an acknowledged write visible to a later read.

use crate::common::config::{ReadAgreement, ServiceConfig};
use crate::common::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuorumPolicy {
    replicas: usize,
    write_fraction: f64,
    read_fraction: f64,
    agreement: ReadAgreement,
}

impl QuorumPolicy {
    pub fn new(
        replicas: usize,
        write_fraction: f64,
        read_fraction: f64,
        agreement: ReadAgreement,
    ) -> Result<Self> {
        if replicas == 0 {
            return Err(Error::InvalidQuorum("replica count must be >= 1".into()));
        }
        for (label, fraction) in [("write", write_fraction), ("read", read_fraction)] {
            if !(fraction > 0.0 && fraction <= 1.0) {
                return Err(Error::InvalidQuorum(format!(
                    "{} fraction must be in (0, 1], got {}",
                    label, fraction
                )));
            }
        }
        if write_fraction + read_fraction <= 1.0 {
            return Err(Error::InvalidQuorum(format!(
                "write fraction + read fraction must exceed 1, got {} + {}",
                write_fraction, read_fraction
            )));
        }
        Ok(Self {
            replicas,
            write_fraction,
            read_fraction,
            agreement,
        })
    }

    pub fn from_config(config: &ServiceConfig, replicas: usize) -> Result<Self> {
        Self::new(
            replicas,
            config.write_fraction,
            config.read_fraction,
            config.read_agreement,
        )
    }

    pub fn replicas(&self) -> usize {
        self.replicas
    }

    pub fn agreement(&self) -> ReadAgreement {
        self.agreement
    }

    /// `W`: successful executions needed before a write is committed.
    pub fn write_quorum(&self) -> usize {
        (self.replicas as f64 * self.write_fraction).floor() as usize + 1
    }

    /// `R`: the read quorum derived from the read fraction.
    pub fn read_quorum(&self) -> usize {
        (self.replicas as f64 * self.read_fraction).floor() as usize + 1
    }

    /// Matching replicas a read value needs before it is accepted.
    ///
    /// `Strict` asks for `R + 1`, one more than the read quorum. `Quorum`
    /// asks for exactly `R`.
    pub fn read_threshold(&self) -> usize {
        match self.agreement {
            ReadAgreement::Strict => self.read_quorum() + 1,
            ReadAgreement::Quorum => self.read_quorum(),
        }
    }

    pub fn write_reached(&self, successes: usize) -> bool {
        successes >= self.write_quorum()
    }

    pub fn read_reached(&self, matching: usize) -> bool {
        matching >= self.read_threshold()
    }

    /// Thresholds that can never be met with this many replicas.
    pub fn unreachable(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.write_quorum() > self.replicas {
            out.push(format!(
                "write quorum {} exceeds {} replicas",
                self.write_quorum(),
                self.replicas
            ));
        }
        if self.read_threshold() > self.replicas {
            out.push(format!(
                "read threshold {} ({} agreement) exceeds {} replicas",
                self.read_threshold(),
                self.agreement,
                self.replicas
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_replicas_default_fractions() {
        let policy = QuorumPolicy::new(3, 0.51, 0.51, ReadAgreement::Strict).unwrap();
        assert_eq!(policy.write_quorum(), 2);
        assert_eq!(policy.read_quorum(), 2);
        assert_eq!(policy.read_threshold(), 3);
        assert!(policy.write_reached(2));
        assert!(!policy.write_reached(1));
        assert!(!policy.read_reached(2));
        assert!(policy.read_reached(3));
        assert!(policy.unreachable().is_empty());
    }

    #[test]
    fn test_quorum_agreement_uses_read_quorum() {
        let policy = QuorumPolicy::new(3, 0.51, 0.51, ReadAgreement::Quorum).unwrap();
        assert_eq!(policy.read_threshold(), 2);
        assert!(policy.read_reached(2));
    }

    #[test]
    fn test_rejects_non_overlapping_fractions() {
        for (wf, rf) in [(0.5, 0.5), (0.3, 0.7), (0.1, 0.2), (0.5, 0.49)] {
            for n in 1..8 {
                assert!(
                    QuorumPolicy::new(n, wf, rf, ReadAgreement::Strict).is_err(),
                    "n={} wf={} rf={}",
                    n,
                    wf,
                    rf
                );
            }
        }
    }

    #[test]
    fn test_rejects_out_of_range() {
        assert!(QuorumPolicy::new(0, 0.6, 0.6, ReadAgreement::Strict).is_err());
        assert!(QuorumPolicy::new(3, 0.0, 1.0, ReadAgreement::Strict).is_err());
        assert!(QuorumPolicy::new(3, 1.5, 0.6, ReadAgreement::Strict).is_err());
        assert!(QuorumPolicy::new(3, f64::NAN, 0.9, ReadAgreement::Strict).is_err());
    }

    #[test]
    fn test_write_and_read_sets_intersect() {
        // W + R > N for every accepted configuration.
        for n in 1..=12 {
            for (wf, rf) in [(0.51, 0.51), (0.6, 0.41), (0.9, 0.2), (1.0, 0.01)] {
                let policy = QuorumPolicy::new(n, wf, rf, ReadAgreement::Quorum).unwrap();
                assert!(
                    policy.write_quorum() + policy.read_quorum() > n,
                    "n={} wf={} rf={}",
                    n,
                    wf,
                    rf
                );
            }
        }
    }

    #[test]
    fn test_unreachable_thresholds() {
        // Full write fraction needs N + 1 acknowledgements.
        let policy = QuorumPolicy::new(3, 1.0, 0.51, ReadAgreement::Quorum).unwrap();
        assert_eq!(policy.write_quorum(), 4);
        assert_eq!(policy.unreachable().len(), 1);

        // A single replica can never satisfy strict agreement.
        let policy = QuorumPolicy::new(1, 0.51, 0.51, ReadAgreement::Strict).unwrap();
        assert_eq!(policy.read_threshold(), 2);
        assert_eq!(policy.unreachable().len(), 1);
    }
}
