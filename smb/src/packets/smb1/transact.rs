//! Transaction (`SMB_COM_TRANSACTION`/`TRANSACTION2`/`NT_TRANSACT`)
//! parameter/data reassembly (spec §4.3).
//!
//! A transaction's parameter and data blocks may arrive split across a
//! primary request and one or more `_SECONDARY` follow-ups, each
//! carrying a displacement into the logical whole. A transaction is
//! complete once both blocks have received exactly `total` bytes.

use crate::error::{Error, Result};

/// Which transaction sub-protocol a request belongs to, since the
/// secondary-command opcode and setup-word layout differ per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactKind {
    /// `SMB_COM_TRANSACTION` / `SMB_COM_TRANSACTION_SECONDARY`.
    Transaction,
    /// `SMB_COM_TRANSACTION2` / `SMB_COM_TRANSACTION2_SECONDARY`.
    Transaction2,
    /// `SMB_COM_NT_TRANSACT` / `SMB_COM_NT_TRANSACT_SECONDARY`.
    NtTransact,
}

/// One segment of a transaction's parameter or data block, as carried
/// by a single request packet.
#[derive(Debug, Clone, Copy)]
pub struct Segment {
    pub total: usize,
    pub displacement: usize,
    pub bytes_len: usize,
}

/// Accumulates parameter and data bytes across a primary request and
/// its secondaries until both blocks are fully received.
#[derive(Debug)]
pub struct TransactionReassembly {
    kind: TransactKind,
    setup: Vec<u16>,
    params_total: usize,
    data_total: usize,
    params: Vec<u8>,
    data: Vec<u8>,
    params_received: usize,
    data_received: usize,
}

impl TransactionReassembly {
    pub fn new(kind: TransactKind, params_total: usize, data_total: usize, setup: Vec<u16>) -> Self {
        TransactionReassembly {
            kind,
            setup,
            params_total,
            data_total,
            params: vec![0u8; params_total],
            data: vec![0u8; data_total],
            params_received: 0,
            data_received: 0,
        }
    }

    pub fn kind(&self) -> TransactKind {
        self.kind
    }

    pub fn setup(&self) -> &[u16] {
        &self.setup
    }

    /// Copies `bytes` into the parameter block at `displacement`.
    pub fn add_params(&mut self, displacement: usize, bytes: &[u8]) -> Result<()> {
        Self::splice(&mut self.params, self.params_total, displacement, bytes)?;
        self.params_received += bytes.len();
        Ok(())
    }

    /// Copies `bytes` into the data block at `displacement`.
    pub fn add_data(&mut self, displacement: usize, bytes: &[u8]) -> Result<()> {
        Self::splice(&mut self.data, self.data_total, displacement, bytes)?;
        self.data_received += bytes.len();
        Ok(())
    }

    fn splice(into: &mut [u8], total: usize, displacement: usize, bytes: &[u8]) -> Result<()> {
        let end = displacement
            .checked_add(bytes.len())
            .ok_or_else(|| Error::Malformed("transaction displacement overflow".into()))?;
        if end > total {
            return Err(Error::Malformed(format!(
                "transaction segment [{displacement}, {end}) exceeds declared total {total}"
            )));
        }
        into[displacement..end].copy_from_slice(bytes);
        Ok(())
    }

    /// A transaction is complete when both blocks have received exactly
    /// their declared total (spec §4.3, §8).
    pub fn is_complete(&self) -> bool {
        self.params_received >= self.params_total && self.data_received >= self.data_total
    }

    pub fn params(&self) -> &[u8] {
        &self.params
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_parts(self) -> (Vec<u8>, Vec<u8>) {
        (self.params, self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_segment_transaction_completes_immediately() {
        let mut t = TransactionReassembly::new(TransactKind::Transaction2, 4, 3, vec![0x0001]);
        t.add_params(0, &[1, 2, 3, 4]).unwrap();
        t.add_data(0, &[9, 8, 7]).unwrap();
        assert!(t.is_complete());
        assert_eq!(t.params(), &[1, 2, 3, 4]);
        assert_eq!(t.data(), &[9, 8, 7]);
    }

    #[test]
    fn split_across_secondary_completes_once_both_blocks_are_full() {
        let mut t = TransactionReassembly::new(TransactKind::Transaction2, 6, 0, Vec::new());
        t.add_params(0, &[1, 2, 3]).unwrap();
        assert!(!t.is_complete());
        t.add_params(3, &[4, 5, 6]).unwrap();
        assert!(t.is_complete());
        assert_eq!(t.params(), &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn segment_exceeding_declared_total_is_rejected() {
        let mut t = TransactionReassembly::new(TransactKind::NtTransact, 4, 0, Vec::new());
        let err = t.add_params(2, &[1, 2, 3]);
        assert!(matches!(err, Err(Error::Malformed(_))));
    }

    #[test]
    fn out_of_order_secondaries_still_complete_correctly() {
        let mut t = TransactionReassembly::new(TransactKind::Transaction, 0, 9, Vec::new());
        t.add_data(6, &[6, 7, 8]).unwrap();
        t.add_data(0, &[0, 1, 2]).unwrap();
        t.add_data(3, &[3, 4, 5]).unwrap();
        assert!(t.is_complete());
        assert_eq!(t.data(), &[0, 1, 2, 3, 4, 5, 6, 7, 8]);
    }
}
