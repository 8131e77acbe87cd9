//! Wires the engine from a [`SchedulerConfig`].
//!
//! One node provider is shared by the permit builder, the smart account, the
//! paymaster reader and the trigger source. The bundler client serves as both
//! relay and fee oracle.

use std::sync::Arc;
use std::time::Duration;

use alloy_provider::{DynProvider, Provider, ProviderBuilder};
use alloy_signer_local::PrivateKeySigner;
use subpay::account::AccountRegistry;
use subpay::executor::{Collaborators, Executor};
use subpay::listener::Listener;
use subpay::operation::AccountDeployment;
use subpay::scheduler::Scheduler;
use subpay::store::{MemoryStore, SubscriptionStore};
use subpay::subscription::NewSubscription;
use subpay::timestamp::{Clock, SystemClock};
use subpay_evm::{
    BundlerClient, LocalSmartAccount, LogTriggerSource, PaymasterOverhead, PermitBuilder,
    SubscriptionCalls,
};
use url::Url;

use crate::config::SchedulerConfig;
use crate::error::SetupError;

/// The wired engine, ready to run.
pub struct Engine {
    /// Periodic driver.
    pub scheduler: Arc<Scheduler>,
    /// Event driver, when enabled.
    pub listener: Option<(Listener, LogTriggerSource<DynProvider>)>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("scheduler", &self.scheduler)
            .field("listener", &self.listener.is_some())
            .finish()
    }
}

impl Engine {
    /// Builds every collaborator, seeds the store and runs startup recovery.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError`] if a secret is unresolved, a URL or key is
    /// malformed, or the store rejects a seed record.
    pub async fn build(config: &SchedulerConfig) -> Result<Self, SetupError> {
        let rpc_url: Url = config.chain.rpc_url.parse()?;
        let provider = ProviderBuilder::default().connect_http(rpc_url).erased();
        let chain_id = config.chain.chain_id;

        let account = smart_account(&provider, config)?;
        let payer = config.account.address;
        let accounts = Arc::new(AccountRegistry::new());
        accounts.register(Arc::new(account));

        let bundler = Arc::new(
            BundlerClient::try_new(&config.chain.bundler_url, config.chain.entry_point)?
                .with_fee_tier(config.chain.fee_tier)
                .with_timeout(Duration::from_secs(config.chain.request_timeout_secs)),
        );
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let store = Arc::new(MemoryStore::new());
        for seed in &config.subscriptions {
            let payer_account = seed.payer.unwrap_or(payer);
            if payer_account != payer {
                tracing::warn!(payer = %payer_account, "seed subscription payer has no local account");
            }
            let created = store
                .create(
                    NewSubscription {
                        payer_account,
                        amount: seed.amount,
                        interval_seconds: seed.interval_seconds,
                        description: seed.description.clone(),
                    },
                    clock.now(),
                )
                .await?;
            tracing::info!(
                subscription = %created.id,
                payer = %created.payer_account,
                amount = %created.amount,
                interval_seconds = created.interval_seconds,
                "subscription seeded"
            );
        }

        let executor = Executor::new(
            Collaborators {
                store,
                accounts,
                authorizer: Arc::new(PermitBuilder::new(
                    provider.clone(),
                    config.engine.sponsorship.token,
                    chain_id,
                )),
                fee_oracle: Arc::clone(&bundler) as _,
                sponsor_overhead: Arc::new(PaymasterOverhead::new(provider.clone())),
                relay: bundler,
                calls: Arc::new(SubscriptionCalls::new(
                    config.contract.address,
                    config.engine.sponsorship.token,
                    config.contract.entry,
                )),
                clock,
            },
            &config.engine,
        );
        let recovered = executor.recover().await?;
        if recovered > 0 {
            tracing::info!(recovered, "recovered interrupted executions");
        }

        let scheduler = Arc::new(Scheduler::new(
            Arc::new(executor),
            config.engine.tick_interval(),
            config.engine.max_concurrent_jobs,
        ));

        let listener = config.listener.enabled.then(|| {
            let mut source = LogTriggerSource::new(
                provider.clone(),
                config.contract.address,
                &config.listener.event_signature,
            )
            .with_poll_interval(Duration::from_secs(config.listener.poll_interval_secs.max(1)))
            .with_max_block_range(config.listener.max_block_range);
            if let Some(block) = config.listener.start_block {
                source = source.from_block(block);
            }
            tracing::info!(
                contract = %config.contract.address,
                event = %config.listener.event_signature,
                "trigger listener enabled"
            );
            (Listener::new(Arc::clone(&scheduler)), source)
        });

        Ok(Self {
            scheduler,
            listener,
        })
    }
}

fn smart_account(
    provider: &DynProvider,
    config: &SchedulerConfig,
) -> Result<LocalSmartAccount<DynProvider>, SetupError> {
    let account = &config.account;
    let owner = parse_owner_key(&account.owner_private_key)?;
    tracing::info!(account = %account.address, owner = %owner.address(), "smart account configured");

    let mut local = LocalSmartAccount::new(
        provider.clone(),
        owner,
        account.address,
        config.chain.entry_point,
        config.chain.chain_id,
    );
    if let Some(validator) = account.validator {
        local = local.with_validator(validator);
    }
    match (account.factory, &account.factory_data) {
        (None, None) => Ok(local),
        (Some(factory), Some(factory_data)) => Ok(local.with_factory(AccountDeployment {
            factory,
            factory_data: factory_data.clone(),
        })),
        _ => Err(SetupError::IncompleteFactory),
    }
}

fn parse_owner_key(raw: &str) -> Result<PrivateKeySigner, SetupError> {
    let key = raw.trim();
    if key.is_empty() || key.starts_with('$') {
        return Err(SetupError::Unresolved("account.owner_private_key"));
    }
    key.parse::<PrivateKeySigner>()
        .map_err(|e| SetupError::InvalidKey(e.to_string()))
}
