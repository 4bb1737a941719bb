use crate::error::{EscrowError, Result};
use agora_ledger::LedgerClient;
use agora_types::{AccountAddress, NativeAmount, TxRef};
use std::sync::Arc;
use tracing::{debug, info};

/// A payment that checked out: who sent it and how much actually arrived
/// (overpayment is accepted, so `received` may exceed the expectation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedPayment {
    pub sender: AccountAddress,
    pub received: NativeAmount,
}

/// Outcome of a verification attempt. `NotVerified` covers every expected
/// "not (yet) payable" condition — unknown reference, unconfirmed, execution
/// error, wrong destination, short amount — and is a normal result, not an
/// error. Only ledger transport failures surface as errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    Verified(VerifiedPayment),
    NotVerified { reason: String },
}

impl VerifyOutcome {
    fn rejected(reason: impl Into<String>) -> Self {
        VerifyOutcome::NotVerified {
            reason: reason.into(),
        }
    }
}

/// Confirms that a claimed proof references a finalized value transfer of at
/// least the expected amount into the expected address. Read-only: recording
/// the result is the caller's job, behind the store's conditional update.
pub struct PaymentVerifier {
    ledger: Arc<dyn LedgerClient>,
}

impl PaymentVerifier {
    pub fn new(ledger: Arc<dyn LedgerClient>) -> Self {
        Self { ledger }
    }

    pub async fn verify(
        &self,
        proof: &TxRef,
        expected_amount: NativeAmount,
        expected_address: AccountAddress,
        expected_sender: Option<AccountAddress>,
    ) -> Result<VerifyOutcome> {
        let tx = match self.ledger.get_transaction(proof).await {
            Ok(Some(tx)) => tx,
            Ok(None) => {
                return Ok(VerifyOutcome::rejected(
                    "transaction not found or not yet confirmed",
                ))
            }
            Err(e) if e.is_transient() => {
                return Err(EscrowError::LedgerTransient(e.to_string()))
            }
            Err(e) => return Ok(VerifyOutcome::rejected(e.to_string())),
        };

        if !tx.finalized {
            return Ok(VerifyOutcome::rejected("transaction is not finalized"));
        }
        if let Some(err) = &tx.err {
            return Ok(VerifyOutcome::rejected(format!(
                "transaction failed on ledger: {}",
                err
            )));
        }

        let received = match tx.balance_delta(expected_address) {
            Some(delta) if delta > 0 => delta as u64,
            Some(_) => {
                return Ok(VerifyOutcome::rejected(
                    "no funds arrived at the escrow address",
                ))
            }
            None => {
                return Ok(VerifyOutcome::rejected(
                    "transaction does not touch the escrow address",
                ))
            }
        };

        if received < expected_amount.to_base_units() {
            debug!(
                proof = %proof,
                received = received,
                expected = expected_amount.to_base_units(),
                "Payment amount short"
            );
            return Ok(VerifyOutcome::rejected(format!(
                "received {} base units, expected at least {}",
                received,
                expected_amount.to_base_units()
            )));
        }

        if let Some(expected_sender) = expected_sender {
            if tx.index_of(expected_sender).is_none() {
                return Ok(VerifyOutcome::rejected(
                    "expected sender does not appear in the transaction",
                ));
            }
        }

        let sender = match tx.signer() {
            Some(sender) => sender,
            None => return Ok(VerifyOutcome::rejected("transaction has no signer")),
        };

        info!(
            proof = %proof,
            sender = %sender,
            received = received,
            escrow_address = %expected_address,
            "✅ Payment verified"
        );

        Ok(VerifyOutcome::Verified(VerifiedPayment {
            sender,
            received: NativeAmount::from_base_units(received),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_crypto::Keypair;
    use agora_ledger::MemoryLedger;

    async fn funded_payment(
        amount: NativeAmount,
    ) -> (Arc<MemoryLedger>, Keypair, AccountAddress, TxRef) {
        let ledger = Arc::new(MemoryLedger::new());
        let payer = Keypair::generate();
        let escrow = Keypair::generate().address();

        ledger
            .credit(payer.address(), NativeAmount::from_native(10.0))
            .await;
        let proof = ledger.submit_transfer(&payer, escrow, amount).await.unwrap();

        (ledger, payer, escrow, proof)
    }

    #[tokio::test]
    async fn test_exact_payment_verifies_and_records_sender() {
        let amount = NativeAmount::from_native(0.05);
        let (ledger, payer, escrow, proof) = funded_payment(amount).await;
        let verifier = PaymentVerifier::new(ledger);

        let outcome = verifier.verify(&proof, amount, escrow, None).await.unwrap();

        assert_eq!(
            outcome,
            VerifyOutcome::Verified(VerifiedPayment {
                sender: payer.address(),
                received: amount,
            })
        );
    }

    #[tokio::test]
    async fn test_overpayment_is_accepted() {
        let paid = NativeAmount::from_native(0.08);
        let (ledger, _, escrow, proof) = funded_payment(paid).await;
        let verifier = PaymentVerifier::new(ledger);

        let outcome = verifier
            .verify(&proof, NativeAmount::from_native(0.05), escrow, None)
            .await
            .unwrap();

        match outcome {
            VerifyOutcome::Verified(payment) => assert_eq!(payment.received, paid),
            other => panic!("expected verified, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_short_payment_is_rejected() {
        let (ledger, _, escrow, proof) = funded_payment(NativeAmount::from_native(0.01)).await;
        let verifier = PaymentVerifier::new(ledger);

        let outcome = verifier
            .verify(&proof, NativeAmount::from_native(0.05), escrow, None)
            .await
            .unwrap();

        assert!(matches!(outcome, VerifyOutcome::NotVerified { .. }));
    }

    #[tokio::test]
    async fn test_wrong_destination_is_rejected() {
        let amount = NativeAmount::from_native(0.05);
        let (ledger, _, _escrow, proof) = funded_payment(amount).await;
        let verifier = PaymentVerifier::new(ledger);

        let other_address = Keypair::generate().address();
        let outcome = verifier
            .verify(&proof, amount, other_address, None)
            .await
            .unwrap();

        assert!(matches!(outcome, VerifyOutcome::NotVerified { .. }));
    }

    #[tokio::test]
    async fn test_sender_constraint_enforced() {
        let amount = NativeAmount::from_native(0.05);
        let (ledger, payer, escrow, proof) = funded_payment(amount).await;
        let verifier = PaymentVerifier::new(ledger);

        let stranger = Keypair::generate().address();
        let outcome = verifier
            .verify(&proof, amount, escrow, Some(stranger))
            .await
            .unwrap();
        assert!(matches!(outcome, VerifyOutcome::NotVerified { .. }));

        let outcome = verifier
            .verify(&proof, amount, escrow, Some(payer.address()))
            .await
            .unwrap();
        assert!(matches!(outcome, VerifyOutcome::Verified(_)));
    }

    #[tokio::test]
    async fn test_unknown_reference_is_soft_failure() {
        let ledger = Arc::new(MemoryLedger::new());
        let verifier = PaymentVerifier::new(ledger);

        let outcome = verifier
            .verify(
                &TxRef::new("missing"),
                NativeAmount::from_native(0.05),
                Keypair::generate().address(),
                None,
            )
            .await
            .unwrap();

        assert!(matches!(outcome, VerifyOutcome::NotVerified { .. }));
    }
}
