//! The credential lifecycle manager.
//!
//! Owns the cached [`TokenRecord`] for each grant and decides when to go
//! back to the identity provider. Renewal is lazy: nothing happens until a
//! caller asks for a token that is inside the safety margin.
//!
//! Concurrent renewals of one grant collapse into a single provider call.
//! The first caller spawns the renewal as its own task and installs a shared
//! handle to it in the grant's in-flight slot; everyone arriving while it
//! runs clones and awaits the same handle. The task finishes even if every
//! waiter goes away. A forced renewal never joins a lazy one, since the lazy
//! one may be satisfied from the cache without calling the provider.
//! Code exchange and renewal of the user grant additionally serialize on a
//! per-grant gate so a refresh started with an old refresh token cannot
//! overwrite a record from a newer exchange.

use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use super::record::{GrantKind, TokenRecord, TokenStatus};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::crypto::StateSigner;
use crate::error::CredentialError;
use crate::providers::{IdentityProvider, TokenSet};
use crate::store::TokenStore;

type RenewalFuture = Shared<BoxFuture<'static, Result<TokenRecord, CredentialError>>>;

/// Tunables for the manager.
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Tokens are considered expired this long before their real expiry.
    pub safety_margin: Duration,
    /// Upper bound on any single identity-provider call.
    pub provider_timeout: Duration,
    pub application_scopes: Vec<String>,
    pub user_scopes: Vec<String>,
}

impl ManagerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            safety_margin: config.safety_margin,
            provider_timeout: config.provider_timeout,
            application_scopes: config.application_scopes.clone(),
            user_scopes: config.user_scopes.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Renewal {
    /// Renew unless someone else already produced a usable token.
    IfStale,
    /// Always go to the provider.
    Forced,
}

#[derive(Default)]
struct CacheState {
    loaded: bool,
    record: Option<TokenRecord>,
    stale: bool,
}

#[derive(Default)]
struct InFlight {
    if_stale: Option<RenewalFuture>,
    forced: Option<RenewalFuture>,
}

impl InFlight {
    fn for_mode(&mut self, mode: Renewal) -> &mut Option<RenewalFuture> {
        match mode {
            Renewal::IfStale => &mut self.if_stale,
            Renewal::Forced => &mut self.forced,
        }
    }

    /// A renewal the caller may await instead of starting its own. A forced
    /// renewal always yields a fresh token, so lazy callers may join it too.
    fn joinable(&self, mode: Renewal) -> Option<RenewalFuture> {
        match mode {
            Renewal::IfStale => self.forced.as_ref().or(self.if_stale.as_ref()).cloned(),
            Renewal::Forced => self.forced.clone(),
        }
    }
}

#[derive(Default)]
struct GrantSlot {
    cache: StdMutex<CacheState>,
    in_flight: StdMutex<InFlight>,
    gate: Mutex<()>,
}

struct Inner {
    provider: Arc<dyn IdentityProvider>,
    store: Arc<dyn TokenStore>,
    clock: Arc<dyn Clock>,
    state_signer: Option<StateSigner>,
    settings: ManagerSettings,
    application: GrantSlot,
    user: GrantSlot,
}

/// Handle to the credential manager. Cheap to clone; all clones share the
/// same cache and in-flight renewals.
#[derive(Clone)]
pub struct CredentialManager {
    inner: Arc<Inner>,
}

pub struct CredentialManagerBuilder {
    provider: Arc<dyn IdentityProvider>,
    store: Arc<dyn TokenStore>,
    settings: ManagerSettings,
    clock: Arc<dyn Clock>,
    state_signer: Option<StateSigner>,
}

impl CredentialManagerBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn state_signer(mut self, signer: StateSigner) -> Self {
        self.state_signer = Some(signer);
        self
    }

    pub fn build(self) -> CredentialManager {
        CredentialManager {
            inner: Arc::new(Inner {
                provider: self.provider,
                store: self.store,
                clock: self.clock,
                state_signer: self.state_signer,
                settings: self.settings,
                application: GrantSlot::default(),
                user: GrantSlot::default(),
            }),
        }
    }
}

fn lock<T>(m: &StdMutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

impl CredentialManager {
    pub fn builder(
        provider: Arc<dyn IdentityProvider>,
        store: Arc<dyn TokenStore>,
        settings: ManagerSettings,
    ) -> CredentialManagerBuilder {
        CredentialManagerBuilder {
            provider,
            store,
            settings,
            clock: Arc::new(SystemClock),
            state_signer: None,
        }
    }

    /// Return an access token for `grant` that stays valid for at least the
    /// safety margin, renewing it first if necessary.
    ///
    /// May block on network and storage I/O.
    pub async fn get_valid_access_token(&self, grant: GrantKind) -> Result<String, CredentialError> {
        if let Some(record) = self.inner.usable_cached(grant).await? {
            return Ok(record.access_token);
        }
        let record = self.renew(grant, Renewal::IfStale).await?;
        Ok(record.access_token)
    }

    /// Client-credentials grant. Replaces any stored application token.
    pub async fn mint_application_token(&self) -> Result<TokenRecord, CredentialError> {
        self.renew(GrantKind::Application, Renewal::Forced).await
    }

    /// Refresh-token grant using the stored user record.
    pub async fn refresh_user_token(&self) -> Result<TokenRecord, CredentialError> {
        self.renew(GrantKind::User, Renewal::Forced).await
    }

    /// Consent URL for the seller, carrying a freshly signed `state`.
    pub fn build_authorization_url(&self) -> Result<Url, CredentialError> {
        let signer = self.inner.state_signer.as_ref().ok_or_else(|| {
            CredentialError::Configuration("STATE_SECRET is not set".into())
        })?;
        let state = signer.issue(self.inner.clock.now())?;
        self.inner
            .provider
            .authorization_url(&self.inner.settings.user_scopes, &state)
    }

    /// Check a `state` echoed back on the consent callback.
    pub fn verify_state(&self, state: &str) -> Result<(), CredentialError> {
        let signer = self.inner.state_signer.as_ref().ok_or_else(|| {
            CredentialError::Configuration("STATE_SECRET is not set".into())
        })?;
        signer.verify(state, self.inner.clock.now())
    }

    /// Authorization-code grant. Stores and returns a new user record.
    pub async fn exchange_authorization_code(
        &self,
        code: &str,
    ) -> Result<TokenRecord, CredentialError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(CredentialError::Validation(
                "authorization code must not be empty".into(),
            ));
        }

        let inner = &self.inner;
        let _gate = inner.slot(GrantKind::User).gate.lock().await;

        let issued_at = inner.clock.now();
        let tokens = inner
            .call_provider("authorization_code", inner.provider.exchange_code(code))
            .await?;
        if tokens.refresh_token.is_none() {
            warn!("{} code exchange returned no refresh token", inner.provider.id());
        }

        let record = TokenRecord::from_token_set(
            GrantKind::User,
            tokens,
            issued_at,
            &inner.settings.user_scopes,
        );
        inner.commit(record).await
    }

    /// Mark the cached token for `grant` as unusable after the marketplace
    /// rejected `rejected_access_token` with a 401. The next request renews
    /// it. The stored record is left alone.
    ///
    /// A rejection of a token that has already been replaced is ignored and
    /// `false` is returned, so late 401s do not discard a fresh token.
    pub fn invalidate(&self, grant: GrantKind, rejected_access_token: &str) -> bool {
        let mut cache = lock(&self.inner.slot(grant).cache);
        let current = cache
            .record
            .as_ref()
            .is_some_and(|record| record.access_token == rejected_access_token);
        if current {
            cache.stale = true;
            info!("Invalidated cached {grant} token");
        } else {
            debug!("Ignoring rejection of a superseded {grant} token");
        }
        current
    }

    /// Non-secret summary of `record`, judged against the manager's clock.
    pub fn status_of(&self, record: &TokenRecord) -> TokenStatus {
        record.status(self.inner.clock.now(), self.inner.settings.safety_margin)
    }

    /// Non-secret summary of the stored record for `grant`.
    pub async fn status(&self, grant: GrantKind) -> Result<Option<TokenStatus>, CredentialError> {
        let stale = lock(&self.inner.slot(grant).cache).stale;
        Ok(self.inner.cached(grant).await?.map(|record| {
            let mut status = self.status_of(&record);
            status.valid &= !stale;
            status
        }))
    }

    /// Delete the stored user record. The seller has to consent again.
    pub async fn forget_user_token(&self) -> Result<(), CredentialError> {
        let slot = self.inner.slot(GrantKind::User);
        let _gate = slot.gate.lock().await;
        self.inner.store.delete(GrantKind::User).await?;
        *lock(&slot.cache) = CacheState {
            loaded: true,
            record: None,
            stale: false,
        };
        info!("Forgot stored user token");
        Ok(())
    }

    async fn renew(&self, grant: GrantKind, mode: Renewal) -> Result<TokenRecord, CredentialError> {
        let renewal = {
            let mut in_flight = lock(&self.inner.slot(grant).in_flight);
            match in_flight.joinable(mode) {
                Some(pending) => pending,
                None => {
                    let pending = self.inner.spawn_renewal(grant, mode);
                    *in_flight.for_mode(mode) = Some(pending.clone());
                    pending
                }
            }
        };
        renewal.await
    }
}

impl Inner {
    fn slot(&self, grant: GrantKind) -> &GrantSlot {
        match grant {
            GrantKind::Application => &self.application,
            GrantKind::User => &self.user,
        }
    }

    /// The cached record, loading it from the store on first use.
    async fn cached(&self, grant: GrantKind) -> Result<Option<TokenRecord>, CredentialError> {
        {
            let cache = lock(&self.slot(grant).cache);
            if cache.loaded {
                return Ok(cache.record.clone());
            }
        }

        let stored = self.store.load(grant).await?;
        let mut cache = lock(&self.slot(grant).cache);
        if !cache.loaded {
            cache.loaded = true;
            cache.record = stored;
        }
        Ok(cache.record.clone())
    }

    async fn usable_cached(&self, grant: GrantKind) -> Result<Option<TokenRecord>, CredentialError> {
        let record = self.cached(grant).await?;
        let stale = lock(&self.slot(grant).cache).stale;
        let now = self.clock.now();
        Ok(record.filter(|r| !stale && r.is_usable_at(now, self.settings.safety_margin)))
    }

    /// Run a renewal on its own task. The task clears its in-flight entry
    /// when done; the returned handle clears it instead if the task panicked.
    fn spawn_renewal(self: &Arc<Self>, grant: GrantKind, mode: Renewal) -> RenewalFuture {
        let inner = Arc::clone(self);
        let task = tokio::spawn(async move {
            let result = inner.perform_renewal(grant, mode).await;
            lock(&inner.slot(grant).in_flight).for_mode(mode).take();
            result
        });

        let inner = Arc::clone(self);
        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    lock(&inner.slot(grant).in_flight).for_mode(mode).take();
                    Err(CredentialError::AuthProvider(format!(
                        "{grant} renewal task failed: {e}"
                    )))
                }
            }
        }
        .boxed()
        .shared()
    }

    async fn perform_renewal(
        &self,
        grant: GrantKind,
        mode: Renewal,
    ) -> Result<TokenRecord, CredentialError> {
        let _gate = self.slot(grant).gate.lock().await;

        if mode == Renewal::IfStale {
            if let Some(record) = self.usable_cached(grant).await? {
                return Ok(record);
            }
        }

        let result = match grant {
            GrantKind::Application => self.mint_application().await,
            GrantKind::User => self.refresh_user().await,
        };
        if let Err(e) = &result {
            warn!("Renewal of {grant} token via {} failed: {e}", self.provider.id());
        }
        result
    }

    async fn mint_application(&self) -> Result<TokenRecord, CredentialError> {
        let scopes = &self.settings.application_scopes;
        let issued_at = self.clock.now();
        let tokens = self
            .call_provider("client_credentials", self.provider.client_credentials(scopes))
            .await?;

        let record = TokenRecord::from_token_set(GrantKind::Application, tokens, issued_at, scopes);
        self.commit(record).await
    }

    async fn refresh_user(&self) -> Result<TokenRecord, CredentialError> {
        let current = self
            .cached(GrantKind::User)
            .await?
            .ok_or_else(|| CredentialError::NoStoredCredential(GrantKind::User.to_string()))?;
        let refresh_token = current
            .refresh_token
            .clone()
            .ok_or_else(|| CredentialError::NoStoredCredential(GrantKind::User.to_string()))?;

        let scopes: Vec<String> = if current.scope.is_empty() {
            self.settings.user_scopes.clone()
        } else {
            current.scope.iter().cloned().collect()
        };

        let issued_at = self.clock.now();
        let tokens = self
            .call_provider(
                "refresh_token",
                self.provider.refresh_token(&refresh_token, &scopes),
            )
            .await?;

        let mut record = TokenRecord::from_token_set(GrantKind::User, tokens, issued_at, &scopes);
        if record.refresh_token.is_none() {
            record.refresh_token = current.refresh_token;
            record.refresh_token_expires_in = current.refresh_token_expires_in;
        } else if record.refresh_token != current.refresh_token {
            info!("{} rotated the user refresh token", self.provider.id());
        }
        self.commit(record).await
    }

    /// Bound a provider call by the configured timeout.
    async fn call_provider<F>(&self, grant: &str, call: F) -> Result<TokenSet, CredentialError>
    where
        F: std::future::Future<Output = Result<TokenSet, CredentialError>>,
    {
        let timeout = self.settings.provider_timeout;
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(CredentialError::AuthProvider(format!(
                "{} {grant} call timed out after {}s",
                self.provider.id(),
                timeout.as_secs_f32()
            ))),
        }
    }

    /// Persist first, then publish to the cache. A failed write leaves the
    /// cache on the previous record.
    async fn commit(&self, record: TokenRecord) -> Result<TokenRecord, CredentialError> {
        self.store.save(&record).await?;

        let mut cache = lock(&self.slot(record.grant).cache);
        cache.loaded = true;
        cache.stale = false;
        cache.record = Some(record.clone());
        drop(cache);

        info!(
            "Stored new {} token (expires in {}s, backend {})",
            record.grant,
            record.expires_in,
            self.store.backend()
        );
        Ok(record)
    }
}
