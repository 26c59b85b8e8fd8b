//! Single owned application state store.
//!
//! Composes the session controller, the view router, and the provider
//! registry behind one set of user-action methods, and holds the one
//! session-change registration that keeps the three consistent: a session
//! becoming present promotes to the dashboard, a session becoming absent
//! clears the registry and forces the login screen.

use std::sync::{Arc, Mutex, Weak};

use shared::{
    domain::{ProviderId, ProviderKind, ProviderRecord},
    error::AuthError,
    protocol::AuthChange,
};
use tracing::info;

use crate::{
    directory::{ProviderRegistry, ProviderSubmission, RegistrationError},
    lock,
    router::{Nav, ViewRouter, ViewState},
    SessionChangeGuard, SessionController, SessionState, SignUpForm,
};

/// Stock carpentry shots rotated on the dashboard.
const CARPENTER_IMAGES: [&str; 3] = [
    "https://images.unsplash.com/photo-1622150162807-20e8607f65c3?auto=format&fit=crop&w=800&q=80",
    "https://images.unsplash.com/photo-1617104551722-3b2d51366400?auto=format&fit=crop&w=800&q=80",
    "https://images.unsplash.com/photo-1601058268499-e52658b8bb88?auto=format&fit=crop&w=800&q=80",
];

/// Rotating image strip; a timer tick advances one slot and wraps.
#[derive(Debug, Clone)]
pub struct ImageCarousel {
    images: Vec<String>,
    index: usize,
}

impl ImageCarousel {
    pub fn new(images: Vec<String>) -> Self {
        Self { images, index: 0 }
    }

    pub fn current(&self) -> Option<&str> {
        self.images.get(self.index).map(String::as_str)
    }

    pub fn tick(&mut self) {
        if !self.images.is_empty() {
            self.index = (self.index + 1) % self.images.len();
        }
    }
}

pub struct ServiceDirectory {
    controller: Arc<SessionController>,
    router: Mutex<ViewRouter>,
    registry: Mutex<ProviderRegistry>,
    carousel: Mutex<ImageCarousel>,
    reset_redirect: String,
    _session_watch: SessionChangeGuard,
}

impl ServiceDirectory {
    pub fn new(controller: Arc<SessionController>, reset_redirect: impl Into<String>) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let watch = {
                let weak = weak.clone();
                controller.on_session_change(move |change| {
                    if let Some(app) = weak.upgrade() {
                        app.handle_session_change(change);
                    }
                })
            };

            Self {
                controller,
                router: Mutex::new(ViewRouter::new()),
                registry: Mutex::new(ProviderRegistry::new()),
                carousel: Mutex::new(ImageCarousel::new(
                    CARPENTER_IMAGES.iter().map(|url| url.to_string()).collect(),
                )),
                reset_redirect: reset_redirect.into(),
                _session_watch: watch,
            }
        })
    }

    /// Runs the startup session resume; the view promotes to the dashboard
    /// through the change notification if a session comes back.
    pub async fn start(&self) {
        self.controller.resume().await;
    }

    pub fn view(&self) -> ViewState {
        lock(&self.router).current()
    }

    pub fn session_state(&self) -> SessionState {
        self.controller.session_state()
    }

    pub fn controller(&self) -> &Arc<SessionController> {
        &self.controller
    }

    pub async fn submit_sign_in(&self, email: &str, password: &str) -> Result<(), AuthError> {
        self.controller.sign_in(email, password).await
    }

    /// The signup screen returns to login on success; a backend that issues
    /// a session immediately promotes to the dashboard through the change
    /// notification instead.
    pub async fn submit_sign_up(&self, form: &SignUpForm) -> Result<(), AuthError> {
        self.controller.sign_up(form).await?;
        self.navigate(Nav::BackToLogin);
        Ok(())
    }

    pub async fn submit_password_reset(&self, email: &str) -> Result<(), AuthError> {
        self.controller
            .send_password_reset(email, &self.reset_redirect)
            .await
    }

    pub fn open_sign_up(&self) -> bool {
        self.navigate(Nav::OpenSignUp)
    }

    pub fn open_forgot_password(&self) -> bool {
        self.navigate(Nav::OpenForgotPassword)
    }

    pub fn back_to_login(&self) -> bool {
        self.navigate(Nav::BackToLogin)
    }

    pub fn open_registration(&self, kind: ProviderKind) -> bool {
        self.navigate(Nav::OpenRegistration(kind))
    }

    pub fn open_directory(&self) -> bool {
        self.navigate(Nav::OpenDirectory)
    }

    pub fn back_to_dashboard(&self) -> bool {
        self.navigate(Nav::BackToDashboard)
    }

    /// Successful submission appends the record and returns to the dashboard.
    pub fn submit_registration(
        &self,
        kind: ProviderKind,
        submission: ProviderSubmission,
    ) -> Result<ProviderId, RegistrationError> {
        if self.view() != ViewState::RegisterProvider(kind) {
            return Err(RegistrationError::FormNotOpen);
        }
        let id = lock(&self.registry).register(kind, submission)?;
        self.navigate(Nav::BackToDashboard);
        Ok(id)
    }

    pub fn search_directory(&self, kind: ProviderKind, term: &str) -> Vec<ProviderRecord> {
        lock(&self.registry)
            .search(kind, term)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn provider_count(&self, kind: ProviderKind) -> usize {
        lock(&self.registry).count(kind)
    }

    pub fn carousel_image(&self) -> Option<String> {
        lock(&self.carousel).current().map(str::to_string)
    }

    pub fn carousel_tick(&self) {
        lock(&self.carousel).tick();
    }

    pub async fn sign_out(&self) {
        self.controller.sign_out().await;
    }

    fn navigate(&self, nav: Nav) -> bool {
        let session_present = self.controller.session_state().is_authenticated();
        lock(&self.router).navigate(nav, session_present)
    }

    fn handle_session_change(&self, change: &AuthChange) {
        match change {
            AuthChange::SignedIn(_) | AuthChange::TokenRefreshed(_) => {
                lock(&self.router).session_established();
            }
            AuthChange::SignedOut => {
                lock(&self.registry).clear();
                lock(&self.router).session_lost();
                info!("session ended, provider registry cleared");
            }
        }
    }
}
