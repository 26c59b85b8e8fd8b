//! Session lifecycle and application state for the provider directory.
//!
//! The [`SessionController`] owns the last-known auth session and is the one
//! place identity-backend failures are translated into user-facing messages.
//! Screen selection and the in-memory provider registry live in [`router`]
//! and [`directory`]; [`app`] ties the three together into a single state
//! store driven by user actions.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak,
};

use async_trait::async_trait;
use identity::HttpIdentityClient;
use shared::{
    domain::Session,
    error::{AuthError, ProviderError, ProviderErrorCode},
    protocol::{AuthChange, SignUpProfile},
};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, info, warn};

pub mod app;
pub mod directory;
pub mod router;

pub use app::ServiceDirectory;
pub use directory::{PhotoUpload, ProviderRegistry, ProviderSubmission, RegistrationError};
pub use router::{Nav, ViewRouter, ViewState};

/// Credential calls are not dispatched for passwords shorter than this.
const MIN_PASSWORD_LEN: usize = 6;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(rwlock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    rwlock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(rwlock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    rwlock.write().unwrap_or_else(PoisonError::into_inner)
}

/// External identity backend contract: password sign-in, signup, password
/// recovery, sign-out, session resume, and the change notification stream.
#[async_trait]
pub trait IdentityBackend: Send + Sync {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, ProviderError>;

    /// `None` means the backend accepted the signup but defers session
    /// issuance until the email address is confirmed.
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        profile: SignUpProfile,
    ) -> Result<Option<Session>, ProviderError>;

    async fn reset_password_for_email(
        &self,
        email: &str,
        redirect_to: &str,
    ) -> Result<(), ProviderError>;

    async fn sign_out(&self) -> Result<(), ProviderError>;

    async fn get_session(&self) -> Option<Session>;

    fn subscribe_changes(&self) -> broadcast::Receiver<AuthChange>;
}

#[async_trait]
impl IdentityBackend for HttpIdentityClient {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, ProviderError> {
        HttpIdentityClient::sign_in_with_password(self, email, password).await
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        profile: SignUpProfile,
    ) -> Result<Option<Session>, ProviderError> {
        HttpIdentityClient::sign_up(self, email, password, profile).await
    }

    async fn reset_password_for_email(
        &self,
        email: &str,
        redirect_to: &str,
    ) -> Result<(), ProviderError> {
        HttpIdentityClient::reset_password_for_email(self, email, redirect_to).await
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        HttpIdentityClient::sign_out(self).await
    }

    async fn get_session(&self) -> Option<Session> {
        HttpIdentityClient::get_session(self).await
    }

    fn subscribe_changes(&self) -> broadcast::Receiver<AuthChange> {
        HttpIdentityClient::subscribe_changes(self)
    }
}

/// Null backend for contexts constructed without identity wiring.
pub struct MissingIdentityBackend {
    changes: broadcast::Sender<AuthChange>,
}

impl MissingIdentityBackend {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(1);
        Self { changes }
    }
}

impl Default for MissingIdentityBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityBackend for MissingIdentityBackend {
    async fn sign_in_with_password(
        &self,
        _email: &str,
        _password: &str,
    ) -> Result<Session, ProviderError> {
        Err(unconfigured())
    }

    async fn sign_up(
        &self,
        _email: &str,
        _password: &str,
        _profile: SignUpProfile,
    ) -> Result<Option<Session>, ProviderError> {
        Err(unconfigured())
    }

    async fn reset_password_for_email(
        &self,
        _email: &str,
        _redirect_to: &str,
    ) -> Result<(), ProviderError> {
        Err(unconfigured())
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        Err(unconfigured())
    }

    async fn get_session(&self) -> Option<Session> {
        None
    }

    fn subscribe_changes(&self) -> broadcast::Receiver<AuthChange> {
        self.changes.subscribe()
    }
}

fn unconfigured() -> ProviderError {
    ProviderError::new(
        ProviderErrorCode::Unavailable,
        "identity backend is not configured",
    )
}

/// Last-known auth state. `Unknown` until the startup resume query resolves;
/// callers must not treat it as signed-out before then.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Unknown,
    Authenticated(Session),
    Anonymous,
}

impl SessionState {
    pub fn session(&self) -> Option<&Session> {
        match self {
            SessionState::Authenticated(session) => Some(session),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated(_))
    }
}

/// Credential form for the signup screen.
#[derive(Debug, Clone, Default)]
pub struct SignUpForm {
    pub full_name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

type ChangeCallback = Box<dyn Fn(&AuthChange) + Send + Sync>;

struct Registration {
    id: u64,
    callback: ChangeCallback,
}

/// Owns the mirrored auth session and the single session-change registration.
///
/// Session state never updates as a direct return value of a credential call:
/// the backend reports the transition on its change stream and a listener
/// task applies it here.
pub struct SessionController {
    backend: Arc<dyn IdentityBackend>,
    state: RwLock<SessionState>,
    registration: Mutex<Option<Arc<Registration>>>,
    next_registration: AtomicU64,
    busy: AtomicBool,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl SessionController {
    pub fn new(backend: Arc<dyn IdentityBackend>) -> Arc<Self> {
        let controller = Arc::new(Self {
            backend: Arc::clone(&backend),
            state: RwLock::new(SessionState::Unknown),
            registration: Mutex::new(None),
            next_registration: AtomicU64::new(0),
            busy: AtomicBool::new(false),
            listener: Mutex::new(None),
        });

        let mut changes = backend.subscribe_changes();
        let weak = Arc::downgrade(&controller);
        let task = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => {
                        let Some(controller) = weak.upgrade() else {
                            break;
                        };
                        controller.apply_change(&change);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "session change stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        *lock(&controller.listener) = Some(task);

        controller
    }

    /// One-shot startup query; seeds the last-known state before the first
    /// render decision is trusted.
    pub async fn resume(&self) {
        match self.backend.get_session().await {
            Some(session) => {
                info!(user_id = %session.user_id, "resumed existing session");
                self.apply_change(&AuthChange::SignedIn(session));
            }
            None => {
                let mut state = write(&self.state);
                if matches!(*state, SessionState::Unknown) {
                    *state = SessionState::Anonymous;
                }
            }
        }
    }

    pub fn current_session(&self) -> Option<Session> {
        read(&self.state).session().cloned()
    }

    pub fn session_state(&self) -> SessionState {
        read(&self.state).clone()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<(), AuthError> {
        if !looks_like_email(email) || password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::InvalidCredentials);
        }

        let Some(_busy) = BusyGuard::try_acquire(&self.busy) else {
            debug!("sign-in already in flight, dropping re-entrant submit");
            return Ok(());
        };

        match self.backend.sign_in_with_password(email, password).await {
            Ok(session) => {
                info!(user_id = %session.user_id, "sign-in accepted");
                Ok(())
            }
            Err(err) => {
                warn!(code = ?err.code, "sign-in rejected by identity backend");
                Err(err.into())
            }
        }
    }

    pub async fn sign_up(&self, form: &SignUpForm) -> Result<(), AuthError> {
        if form.password != form.confirm_password {
            return Err(AuthError::Validation("Passwords do not match".to_string()));
        }
        if !looks_like_email(&form.email) || form.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::Validation(
                "Invalid email or password too short (min 6 characters)".to_string(),
            ));
        }

        let Some(_busy) = BusyGuard::try_acquire(&self.busy) else {
            debug!("signup already in flight, dropping re-entrant submit");
            return Ok(());
        };

        let full_name = form.full_name.trim();
        let profile = SignUpProfile {
            full_name: (!full_name.is_empty()).then(|| full_name.to_string()),
        };

        match self
            .backend
            .sign_up(&form.email, &form.password, profile)
            .await
        {
            Ok(Some(session)) => {
                info!(user_id = %session.user_id, "signup established a session");
                Ok(())
            }
            Ok(None) => {
                info!("signup accepted, awaiting email confirmation");
                Ok(())
            }
            Err(err) => {
                warn!(code = ?err.code, "signup rejected by identity backend");
                Err(err.into())
            }
        }
    }

    pub async fn send_password_reset(
        &self,
        email: &str,
        redirect_to: &str,
    ) -> Result<(), AuthError> {
        if !looks_like_email(email) {
            return Err(AuthError::Validation(
                "Please enter a valid email address".to_string(),
            ));
        }

        let Some(_busy) = BusyGuard::try_acquire(&self.busy) else {
            debug!("password reset already in flight, dropping re-entrant submit");
            return Ok(());
        };

        self.backend
            .reset_password_for_email(email, redirect_to)
            .await
            .map_err(AuthError::from)
    }

    /// Best-effort: the backend call may fail, local state clears regardless.
    pub async fn sign_out(&self) {
        if let Err(err) = self.backend.sign_out().await {
            warn!(code = ?err.code, "identity sign-out failed, clearing local session anyway");
        }
        self.apply_change(&AuthChange::SignedOut);
    }

    /// Registers the session-change callback. A controller carries at most
    /// one registration; a new one replaces the previous. The returned guard
    /// cancels the registration when dropped.
    pub fn on_session_change(
        self: &Arc<Self>,
        callback: impl Fn(&AuthChange) + Send + Sync + 'static,
    ) -> SessionChangeGuard {
        let id = self.next_registration.fetch_add(1, Ordering::Relaxed);
        *lock(&self.registration) = Some(Arc::new(Registration {
            id,
            callback: Box::new(callback),
        }));
        SessionChangeGuard {
            controller: Arc::downgrade(self),
            id,
        }
    }

    fn apply_change(&self, change: &AuthChange) {
        let next = match change {
            AuthChange::SignedIn(session) | AuthChange::TokenRefreshed(session) => {
                SessionState::Authenticated(session.clone())
            }
            AuthChange::SignedOut => SessionState::Anonymous,
        };

        {
            let mut state = write(&self.state);
            if *state == next {
                debug!("session change carries no transition, skipping");
                return;
            }
            *state = next;
        }

        // Invoke outside the registration lock so the callback may
        // re-register without deadlocking.
        let registration = lock(&self.registration).clone();
        if let Some(registration) = registration {
            (registration.callback)(change);
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.listener).take() {
            task.abort();
        }
    }
}

/// Cancels its session-change registration when dropped, so the callback
/// never fires into a view that has been torn down.
pub struct SessionChangeGuard {
    controller: Weak<SessionController>,
    id: u64,
}

impl SessionChangeGuard {
    pub fn cancel(self) {}

    fn release(&self) {
        let Some(controller) = self.controller.upgrade() else {
            return;
        };
        let mut registration = lock(&controller.registration);
        if registration.as_ref().is_some_and(|r| r.id == self.id) {
            *registration = None;
        }
    }
}

impl Drop for SessionChangeGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// One in-flight credential call at a time; the flag clears on every exit
/// path through the guard's drop.
struct BusyGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> BusyGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
            .then_some(Self { flag })
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

fn looks_like_email(email: &str) -> bool {
    email.contains('@')
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
