//! Submission with bounded retries and provider fallback.

use crate::config::BroadcastConfig;
use crate::error::{EngineError, ErrorKind, Result};
use crate::provider::{ProviderError, SharedProvider};
use crate::signer::SignedTransaction;

#[derive(Debug, Clone, Default)]
pub struct Broadcaster {
    config: BroadcastConfig,
}

impl Broadcaster {
    pub fn new(config: BroadcastConfig) -> Self {
        Self { config }
    }

    /// Submit `signed` to each provider in order until one accepts it.
    ///
    /// "Already known" counts as acceptance, so resubmitting the same bytes
    /// yields the same txid. Rejections are final; transient failures are
    /// retried with backoff, then the next provider is tried.
    pub async fn submit(&self, providers: &[SharedProvider], signed: &SignedTransaction) -> Result<String> {
        let chain = signed.chain();
        let txid = signed.txid();
        let attempts = self.config.max_attempts_per_provider.max(1);
        let mut failures = Vec::new();

        for provider in providers {
            for attempt in 1..=attempts {
                let outcome = tokio::time::timeout(self.config.timeout(), provider.broadcast(signed.raw()))
                    .await
                    .unwrap_or(Err(ProviderError::Timeout));

                match outcome {
                    Ok(reported) => {
                        if !reported.eq_ignore_ascii_case(txid) {
                            log::warn!(
                                "{chain}: {} reported id {reported} for {txid}; keeping the locally computed id",
                                provider.name()
                            );
                        }
                        log::info!("{chain}: broadcast {txid} via {}", provider.name());
                        return Ok(txid.to_string());
                    }
                    Err(ProviderError::AlreadyKnown) => {
                        log::info!("{chain}: {txid} already known to {}", provider.name());
                        return Ok(txid.to_string());
                    }
                    Err(ProviderError::Rejected(reason, message)) => {
                        log::warn!("{chain}: {} rejected {txid} ({reason:?}): {message}", provider.name());
                        return Err(EngineError::new(
                            ErrorKind::BroadcastRejected,
                            chain,
                            format!("{reason:?}: {message}"),
                        ));
                    }
                    Err(err) if err.is_transient() => {
                        log::warn!(
                            "{chain}: broadcast of {txid} via {} failed (attempt {attempt}/{attempts}): {err}",
                            provider.name()
                        );
                        failures.push(format!("{}: {err}", provider.name()));
                        if attempt < attempts {
                            tokio::time::sleep(self.config.backoff(attempt)).await;
                        }
                    }
                    Err(err) => {
                        log::warn!("{chain}: {} answered {err} for {txid}, trying next provider", provider.name());
                        failures.push(format!("{}: {err}", provider.name()));
                        break;
                    }
                }
            }
        }

        if failures.is_empty() {
            return Err(EngineError::new(
                ErrorKind::ProviderUnavailable,
                chain,
                "no provider configured",
            ));
        }
        Err(EngineError::new(
            ErrorKind::Network,
            chain,
            format!("broadcast of {txid} failed everywhere: {}", failures.join("; ")),
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use chain_xrp::transaction::XrpPayment;

    use super::*;
    use crate::builder::TxDetails;
    use crate::fees::FeeSignal;
    use crate::provider::{ChainTip, NetworkProvider, RejectReason};
    use crate::tracker::Observation;
    use crate::types::{Chain, KeyRef};

    /// Plays back scripted broadcast answers, then repeats the last one.
    struct Scripted {
        name: &'static str,
        answers: Mutex<Vec<std::result::Result<String, ProviderError>>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(name: &'static str, answers: Vec<std::result::Result<String, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                name,
                answers: Mutex::new(answers),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl NetworkProvider for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        async fn broadcast(&self, _raw_tx: &[u8]) -> std::result::Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut answers = self.answers.lock().unwrap();
            if answers.len() > 1 {
                answers.remove(0)
            } else {
                answers[0].clone()
            }
        }

        async fn get_fee_signal(&self) -> std::result::Result<FeeSignal, ProviderError> {
            Err(ProviderError::NotFound)
        }

        async fn get_tx_status(&self, _txid: &str) -> std::result::Result<Observation, ProviderError> {
            Err(ProviderError::NotFound)
        }

        async fn get_chain_tip(&self) -> std::result::Result<ChainTip, ProviderError> {
            Err(ProviderError::NotFound)
        }
    }

    fn signed() -> SignedTransaction {
        let payment = XrpPayment::new(
            "rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh",
            "rrrrrrrrrrrrrrrrrrrrrhoLvTp",
            1,
            10,
            1,
        )
        .unwrap();
        SignedTransaction::new(
            KeyRef::new(Chain::Xrp, 0, 0),
            vec![1, 2, 3],
            "ABCD".into(),
            "h".into(),
            payment.account.clone(),
            TxDetails::Xrp { payment },
            None,
        )
    }

    fn broadcaster() -> Broadcaster {
        Broadcaster::new(BroadcastConfig {
            timeout_ms: 50,
            max_attempts_per_provider: 2,
            backoff_ms: 1,
            max_backoff_ms: 2,
        })
    }

    #[tokio::test]
    async fn already_known_is_success() {
        let p = Scripted::new("p", vec![Ok("ABCD".into()), Err(ProviderError::AlreadyKnown)]);
        let providers: Vec<SharedProvider> = vec![p.clone()];
        let b = broadcaster();
        assert_eq!(b.submit(&providers, &signed()).await.unwrap(), "ABCD");
        assert_eq!(b.submit(&providers, &signed()).await.unwrap(), "ABCD");
        assert_eq!(p.calls(), 2);
    }

    #[tokio::test]
    async fn transient_failures_fall_through_to_next_provider() {
        let primary = Scripted::new("primary", vec![Err(ProviderError::Unavailable("503".into()))]);
        let backup = Scripted::new("backup", vec![Ok("abcd".into())]);
        let providers: Vec<SharedProvider> = vec![primary.clone(), backup.clone()];
        assert_eq!(broadcaster().submit(&providers, &signed()).await.unwrap(), "ABCD");
        assert_eq!(primary.calls(), 2);
        assert_eq!(backup.calls(), 1);
    }

    #[tokio::test]
    async fn rejection_is_not_retried() {
        let primary = Scripted::new(
            "primary",
            vec![Err(ProviderError::Rejected(RejectReason::FeeTooLow, "min fee 12".into()))],
        );
        let backup = Scripted::new("backup", vec![Ok("ABCD".into())]);
        let providers: Vec<SharedProvider> = vec![primary.clone(), backup.clone()];
        let err = broadcaster().submit(&providers, &signed()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::BroadcastRejected);
        assert_eq!(primary.calls(), 1);
        assert_eq!(backup.calls(), 0);
    }

    struct Slow;

    #[async_trait]
    impl NetworkProvider for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        async fn broadcast(&self, _raw_tx: &[u8]) -> std::result::Result<String, ProviderError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("ABCD".into())
        }

        async fn get_fee_signal(&self) -> std::result::Result<FeeSignal, ProviderError> {
            Err(ProviderError::NotFound)
        }

        async fn get_tx_status(&self, _txid: &str) -> std::result::Result<Observation, ProviderError> {
            Err(ProviderError::NotFound)
        }

        async fn get_chain_tip(&self) -> std::result::Result<ChainTip, ProviderError> {
            Err(ProviderError::NotFound)
        }
    }

    #[tokio::test]
    async fn exhausted_providers_give_network_error() {
        let providers: Vec<SharedProvider> = vec![Arc::new(Slow)];
        let err = broadcaster().submit(&providers, &signed()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Network);
        assert!(err.is_retryable());

        let err = broadcaster().submit(&[], &signed()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ProviderUnavailable);
    }
}
