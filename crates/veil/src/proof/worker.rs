//! One proof task: runs the engine's prove-then-populate pair for a request and reports over a
//! channel.

use super::{ProofRequest, SerializedTransaction};
use crate::engine::{
    ContractCall, PrivacyEngine, ProgressReporter, TokenAmount, TokenRecipient, TransactionInputs,
};
use crate::errors::{Result, VeilError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};

/// Messages a task emits. Zero or more `progress`, then exactly one `result` or `error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerMessage {
    Progress {
        progress: u8,
    },
    Result {
        #[serde(rename = "serializedTransaction")]
        serialized_transaction: SerializedTransaction,
    },
    Error {
        message: String,
    },
}

impl WorkerMessage {
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }
}

/// A message stamped with the generation of the task that sent it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tagged {
    pub generation: u64,
    pub message: WorkerMessage,
}

/// Engine fraction in `0.0..=1.0` to a whole percentage.
#[expect(
    clippy::float_arithmetic,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "value is clamped to 0..=100 before the cast"
)]
pub fn percent(fraction: f64) -> u8 {
    if !fraction.is_finite() {
        return 0;
    }
    (fraction.clamp(0.0, 1.0) * 100.0).round() as u8
}

/// Prove and populate `req`, returning the serialized `{transactionData, proof}` payload.
pub async fn prove(
    engine: &dyn PrivacyEngine,
    req: &ProofRequest,
    progress: ProgressReporter,
) -> Result<SerializedTransaction> {
    match req {
        ProofRequest::Shield(r) => {
            let inputs = TransactionInputs::single_erc20(
                r.chain,
                r.token_address,
                r.amount,
                r.recipient.to_string(),
            );
            let shield = engine.generate_shield_transaction(&inputs, progress).await?;
            let tx = engine
                .populate_shield(r.chain, r.recipient.as_str(), &inputs, &shield)
                .await?;
            SerializedTransaction::from_parts(&tx, &shield)
        }
        ProofRequest::Transfer(r) => {
            let inputs = TransactionInputs::single_erc20(
                r.chain,
                r.token_address,
                r.amount,
                r.recipient.to_string(),
            );
            let proof = engine
                .generate_transfer_proof(&r.wallet_id, &inputs, progress)
                .await?;
            let tx = engine
                .generate_transact(r.chain, &r.wallet_id, &inputs, &proof)
                .await?;
            SerializedTransaction::from_parts(&tx, &proof)
        }
        ProofRequest::Unshield(r) => {
            let inputs = TransactionInputs::single_erc20(
                r.chain,
                r.token_address,
                r.amount,
                r.destination.to_checksum(None),
            );
            let proof = engine
                .generate_unshield_proof(&r.wallet_id, &inputs, progress)
                .await?;
            let tx = engine
                .populate_proved_unshield(r.chain, &r.wallet_id, &inputs, &proof)
                .await?;
            SerializedTransaction::from_parts(&tx, &proof)
        }
        ProofRequest::Swap(r) => {
            let unshield = [TokenAmount {
                token_address: r.quote.sell_token,
                amount: r.quote.sell_amount,
            }];
            let calls = [ContractCall {
                to: r.quote.to,
                data: r.quote.data.clone(),
                value: r.quote.value,
            }];
            let reshield = [TokenRecipient {
                token_address: r.quote.buy_token,
                recipient_address: r.recipient.to_string(),
            }];
            let proved = engine
                .generate_cross_contract_calls_proof(
                    r.chain,
                    &r.wallet_id,
                    &unshield,
                    &calls,
                    &reshield,
                    progress,
                )
                .await?;
            SerializedTransaction::from_parts(&proved.transaction, &proved.proof)
        }
    }
}

/// Task body. Sends are best effort: a closed channel means nobody is listening any more.
pub async fn run(
    engine: Arc<dyn PrivacyEngine>,
    req: ProofRequest,
    generation: u64,
    tx: mpsc::UnboundedSender<Tagged>,
) {
    let progress_tx = tx.clone();
    let reporter: ProgressReporter = Arc::new(move |fraction| {
        let _sent = progress_tx.send(Tagged {
            generation,
            message: WorkerMessage::Progress {
                progress: percent(fraction),
            },
        });
    });

    let message = match prove(engine.as_ref(), &req, reporter).await {
        Ok(serialized_transaction) => {
            let _sent = tx.send(Tagged {
                generation,
                message: WorkerMessage::Progress { progress: 100 },
            });
            WorkerMessage::Result {
                serialized_transaction,
            }
        }
        Err(VeilError::Proof(message)) => WorkerMessage::Error { message },
        Err(e) => WorkerMessage::Error {
            message: e.to_string(),
        },
    };
    let _sent = tx.send(Tagged {
        generation,
        message,
    });
}

/// A running task together with the watcher that reports it if it panics.
#[derive(Debug)]
pub struct WorkerHandle {
    worker: AbortHandle,
    watcher: JoinHandle<()>,
}

impl WorkerHandle {
    /// Kill the task outright. Nothing further is sent for its generation.
    pub fn abort(&self) {
        self.worker.abort();
        self.watcher.abort();
    }
}

/// Spawn [`run`] for `generation`. A panic inside the engine still ends the task with exactly
/// one `error` message.
pub fn spawn(
    engine: Arc<dyn PrivacyEngine>,
    req: ProofRequest,
    generation: u64,
    tx: mpsc::UnboundedSender<Tagged>,
) -> WorkerHandle {
    let task = tokio::spawn(run(engine, req, generation, tx.clone()));
    let worker = task.abort_handle();
    let watcher = tokio::spawn(async move {
        if let Err(e) = task.await {
            if e.is_panic() {
                tracing::error!(generation, error = %e, "proof task panicked");
                let _sent = tx.send(Tagged {
                    generation,
                    message: WorkerMessage::Error {
                        message: "proof engine crashed".into(),
                    },
                });
            }
        }
    });
    WorkerHandle { worker, watcher }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{PrivacyAddress, SupportedChain};
    use crate::proof::{ProofKind, ShieldRequest, SwapQuote, SwapRequest, TransferRequest};
    use crate::testing::MockEngine;
    use alloy::primitives::{Address, Bytes, U256};

    fn shield() -> eyre::Result<ProofRequest> {
        Ok(ProofRequest::Shield(ShieldRequest {
            chain: SupportedChain::Polygon,
            token_address: Address::repeat_byte(0x11),
            amount: U256::from(5_u64),
            recipient: PrivacyAddress::parse("0zkabc")?,
        }))
    }

    async fn collect(engine: Arc<MockEngine>, req: ProofRequest) -> Vec<WorkerMessage> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        run(engine, req, 7, tx).await;
        let mut out = Vec::new();
        while let Ok(t) = rx.try_recv() {
            assert_eq!(t.generation, 7, "message carries task generation");
            out.push(t.message);
        }
        out
    }

    #[test]
    fn percent_rounds_and_clamps() {
        assert_eq!(percent(0.0), 0);
        assert_eq!(percent(0.494), 49);
        assert_eq!(percent(0.496), 50);
        assert_eq!(percent(1.0), 100);
        assert_eq!(percent(1.7), 100);
        assert_eq!(percent(-0.2), 0);
        assert_eq!(percent(f64::NAN), 0);
    }

    #[test]
    fn messages_use_worker_wire_format() -> eyre::Result<()> {
        let p = serde_json::to_value(WorkerMessage::Progress { progress: 42 })?;
        assert_eq!(p, serde_json::json!({"type": "progress", "progress": 42}));
        let r = serde_json::to_value(WorkerMessage::Result {
            serialized_transaction: SerializedTransaction::from_json("{}"),
        })?;
        assert_eq!(
            r,
            serde_json::json!({"type": "result", "serializedTransaction": "{}"})
        );
        let e = serde_json::to_value(WorkerMessage::Error {
            message: "boom".into(),
        })?;
        assert_eq!(e, serde_json::json!({"type": "error", "message": "boom"}));
        Ok(())
    }

    #[tokio::test]
    async fn shield_reports_progress_then_one_result() -> eyre::Result<()> {
        let engine = Arc::new(MockEngine::new());
        let msgs = collect(Arc::clone(&engine), shield()?).await;

        let (last, rest) = msgs
            .split_last()
            .ok_or_else(|| eyre::eyre!("no messages"))?;
        assert!(rest.iter().all(|m| !m.is_terminal()));
        assert_eq!(rest.last(), Some(&WorkerMessage::Progress { progress: 100 }));
        let WorkerMessage::Result {
            serialized_transaction,
        } = last
        else {
            eyre::bail!("expected result, got {last:?}");
        };
        assert!(!serialized_transaction.raw_transaction_bytes()?.is_empty());
        assert_eq!(engine.proofs(), vec![ProofKind::Shield]);
        Ok(())
    }

    #[tokio::test]
    async fn engine_failure_becomes_error_message() -> eyre::Result<()> {
        let engine = Arc::new(MockEngine::new());
        engine.fail_next_proof("insufficient private balance");
        let req = ProofRequest::Transfer(TransferRequest {
            chain: SupportedChain::Polygon,
            wallet_id: "w".into(),
            token_address: Address::repeat_byte(0x11),
            amount: U256::from(5_u64),
            recipient: PrivacyAddress::parse("0zkabc")?,
            broadcaster_fee_token: None,
        });
        let msgs = collect(engine, req).await;
        assert_eq!(
            msgs.last(),
            Some(&WorkerMessage::Error {
                message: "insufficient private balance".into()
            })
        );
        assert_eq!(msgs.iter().filter(|m| m.is_terminal()).count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn engine_panic_is_reported_as_error() -> eyre::Result<()> {
        let engine = Arc::new(MockEngine::new());
        engine.panic_next_proof();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _handle = spawn(engine, shield()?, 4, tx);

        let mut terminal = None;
        while let Some(t) = rx.recv().await {
            assert_eq!(t.generation, 4, "message carries task generation");
            if t.message.is_terminal() {
                terminal = Some(t.message);
                break;
            }
        }
        assert_eq!(
            terminal,
            Some(WorkerMessage::Error {
                message: "proof engine crashed".into()
            })
        );
        Ok(())
    }

    #[tokio::test]
    async fn aborted_task_sends_nothing_more() -> eyre::Result<()> {
        let engine = Arc::new(MockEngine::new());
        engine.set_proof_delay(std::time::Duration::from_secs(60));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = spawn(engine, shield()?, 5, tx);
        tokio::task::yield_now().await;
        handle.abort();
        // Both tasks hold a sender; once they are gone the channel closes empty.
        assert_eq!(rx.recv().await, None);
        Ok(())
    }

    #[tokio::test]
    async fn swap_unshields_sell_token_and_reshields_buy_token() -> eyre::Result<()> {
        let engine = Arc::new(MockEngine::new());
        let req = ProofRequest::Swap(SwapRequest {
            chain: SupportedChain::Arbitrum,
            wallet_id: "w".into(),
            quote: SwapQuote {
                sell_token: Address::repeat_byte(0x01),
                buy_token: Address::repeat_byte(0x02),
                sell_amount: U256::from(100_u64),
                buy_amount: U256::from(99_u64),
                to: Address::repeat_byte(0x0d),
                data: Bytes::from(vec![0x12]),
                value: U256::ZERO,
            },
            recipient: PrivacyAddress::parse("0zkabc")?,
            fee_recipient: Address::repeat_byte(0xfe),
            fee_basis_points: 85,
        });
        let msgs = collect(Arc::clone(&engine), req).await;
        assert!(matches!(msgs.last(), Some(WorkerMessage::Result { .. })));
        assert_eq!(engine.proofs(), vec![ProofKind::Swap]);
        Ok(())
    }
}
