use crate::rpc::types::{LogEntry, LogFilter};
use crate::runtime::error::QueryError;
use alloy_primitives::{Address, B256};
use anyhow::Result;

/// One position of a bundle: the event topic-0 it must emit and, optionally,
/// the contract that must emit it. `address == None` matches any emitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceStep {
    pub signature: B256,
    pub address: Option<Address>,
}

impl SequenceStep {
    /// The zero address is treated as a wildcard.
    pub fn new(signature: B256, address: Option<Address>) -> Self {
        Self {
            signature,
            address: address.filter(|address| !address.is_zero()),
        }
    }

    pub fn matches(&self, log: &LogEntry) -> bool {
        if log.signature() != Some(&self.signature) {
            return false;
        }
        self.address.map_or(true, |address| log.address == address)
    }
}

/// Ordered event signatures that must appear in consecutive transactions of
/// one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSignatureSequence {
    steps: Vec<SequenceStep>,
}

impl EventSignatureSequence {
    /// `addresses`, when given, must pair one address with every signature.
    pub fn new(signatures: &[B256], addresses: Option<&[Address]>) -> Result<Self> {
        if signatures.is_empty() {
            return Err(QueryError::validation("event signature sequence cannot be empty").into());
        }

        let steps = match addresses {
            None => signatures
                .iter()
                .map(|signature| SequenceStep::new(*signature, None))
                .collect(),
            Some(addresses) if addresses.len() != signatures.len() => {
                return Err(QueryError::validation(format!(
                    "{} addresses supplied for {} signatures",
                    addresses.len(),
                    signatures.len()
                ))
                .into());
            }
            Some(addresses) => signatures
                .iter()
                .zip(addresses)
                .map(|(signature, address)| SequenceStep::new(*signature, Some(*address)))
                .collect(),
        };

        Ok(Self { steps })
    }

    pub fn from_steps(steps: Vec<SequenceStep>) -> Result<Self> {
        if steps.is_empty() {
            return Err(QueryError::validation("event signature sequence cannot be empty").into());
        }
        Ok(Self { steps })
    }

    pub fn steps(&self) -> &[SequenceStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub(crate) fn head(&self) -> &SequenceStep {
        &self.steps[0]
    }

    /// Log filter selecting candidate starts for the first step.
    pub fn head_filter(&self) -> LogFilter {
        let head = self.head();
        let filter = LogFilter::new().event_signature(head.signature);
        match head.address {
            Some(address) => filter.address(address),
            None => filter,
        }
    }
}
