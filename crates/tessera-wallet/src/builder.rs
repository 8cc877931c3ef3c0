//! Transaction construction and signing.

use tessera_core::constants::TX_VERSION;
use tessera_core::transaction::{Transaction, TxInput, TxOutput, Witness};
use tessera_core::types::{Address, AddressType, Amount, Utxo, UtxoRule};
use tessera_core::TesseraError;

use crate::account::Account;

pub struct TransactionBuilder;

impl TransactionBuilder {
    /// Build a transfer from `sender`, paying `outputs` plus a fee of
    /// `fee_per_byte` × estimated wire size. UTXOs are selected greedily,
    /// largest first; any surplus above target + fee returns to the sender
    /// as a change output.
    pub fn create_transfer(
        sender: &Account,
        spendable: &[Utxo],
        outputs: Vec<TxOutput>,
        fee_per_byte: u64,
    ) -> Result<Transaction, TesseraError> {
        if outputs.is_empty() {
            return Err(TesseraError::Malformed("transfer needs at least one output".into()));
        }
        if outputs.iter().any(|o| o.amount == 0) {
            return Err(TesseraError::Malformed("zero-amount output".into()));
        }
        let total_out: Amount = outputs.iter().map(|o| o.amount).sum();
        Self::select_and_assemble(sender, spendable, outputs, total_out, fee_per_byte, 0)
    }

    /// Build a stake registration: the first output carries `SigOrSlash` and
    /// targets the stake sink. Protocol rule: the fee left on the table must
    /// be at least the staked amount.
    pub fn create_stake(
        sender: &Account,
        spendable: &[Utxo],
        staking_address: Address,
        amount: Amount,
        fee_per_byte: u64,
    ) -> Result<Transaction, TesseraError> {
        if amount == 0 {
            return Err(TesseraError::Malformed("zero-amount stake".into()));
        }
        if staking_address.address_type() != AddressType::S {
            return Err(TesseraError::RuleViolation(
                "stake output must target a stake-sink (S) address".into(),
            ));
        }
        let outputs = vec![TxOutput::new(amount, staking_address, UtxoRule::SigOrSlash)];
        Self::select_and_assemble(sender, spendable, outputs, amount, fee_per_byte, amount)
    }

    /// Greedy selection loop shared by transfer and stake construction.
    /// `min_fee` lifts the fee floor (the SigOrSlash fee >= amount rule).
    fn select_and_assemble(
        sender: &Account,
        spendable: &[Utxo],
        outputs: Vec<TxOutput>,
        total_out: Amount,
        fee_per_byte: u64,
        min_fee: Amount,
    ) -> Result<Transaction, TesseraError> {
        let mut candidates: Vec<&Utxo> = spendable.iter().collect();
        candidates.sort_by(|a, b| b.amount.cmp(&a.amount));

        let mut inputs: Vec<TxInput> = Vec::new();
        let mut sum_in: Amount = 0;
        let mut fee: Amount = 0;

        for utxo in candidates {
            inputs.push(TxInput::Utxo(utxo.anchor));
            sum_in = sum_in
                .checked_add(utxo.amount)
                .ok_or_else(|| TesseraError::Malformed("input amount overflow".into()))?;

            // Size estimate assumes the change output is present; a fee
            // overestimate of one output is absorbed as extra fee.
            let mut sized = outputs.clone();
            sized.push(TxOutput::new(1, sender.address().clone(), UtxoRule::Sig));
            let prototype = Transaction::assemble(TX_VERSION, inputs.clone(), sized);
            fee = (fee_per_byte * prototype.estimated_size() as u64)
                .max(min_fee)
                .max(1);

            if sum_in >= total_out + fee {
                let change = sum_in - total_out - fee;
                let mut final_outputs = outputs;
                if change > 0 {
                    final_outputs.push(TxOutput::new(
                        change,
                        sender.address().clone(),
                        UtxoRule::Sig,
                    ));
                }
                return Ok(Transaction::assemble(TX_VERSION, inputs, final_outputs));
            }
        }

        Err(TesseraError::InsufficientFunds { need: total_out + fee, have: sum_in })
    }

    /// Append witnesses: one per distinct signer address, each an Ed25519
    /// signature over the transaction id.
    pub fn sign(tx: &mut Transaction, signers: &[&Account]) {
        let mut seen: Vec<&Address> = Vec::new();
        for account in signers {
            if seen.contains(&account.address()) {
                continue;
            }
            seen.push(account.address());
            let signature = account.keypair.sign(tx.id.as_bytes());
            tx.witnesses.push(Witness::new(
                signature,
                account.keypair.public_bytes().to_vec(),
            ));
        }
    }
}
