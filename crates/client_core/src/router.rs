//! Screen selection state machine.
//!
//! Navigation requests come from the user; session-driven transitions come
//! from the session controller's change notification and preempt everything
//! else.

use shared::domain::ProviderKind;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewState {
    Login,
    SignUp,
    ForgotPassword,
    Dashboard,
    RegisterProvider(ProviderKind),
    Directory,
}

impl ViewState {
    /// Screens that may only be shown while a session is present.
    pub fn requires_session(&self) -> bool {
        matches!(
            self,
            ViewState::Dashboard | ViewState::RegisterProvider(_) | ViewState::Directory
        )
    }
}

/// Caller-driven navigation requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nav {
    OpenSignUp,
    OpenForgotPassword,
    BackToLogin,
    OpenRegistration(ProviderKind),
    OpenDirectory,
    BackToDashboard,
}

#[derive(Debug)]
pub struct ViewRouter {
    current: ViewState,
}

impl Default for ViewRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewRouter {
    pub fn new() -> Self {
        Self {
            current: ViewState::Login,
        }
    }

    pub fn current(&self) -> ViewState {
        self.current
    }

    /// Applies a navigation request if it is valid from the current screen.
    /// Invalid requests are refused rather than applied; returns whether the
    /// view changed.
    pub fn navigate(&mut self, nav: Nav, session_present: bool) -> bool {
        let next = match (self.current, nav) {
            (ViewState::Login, Nav::OpenSignUp) => ViewState::SignUp,
            (ViewState::Login, Nav::OpenForgotPassword) => ViewState::ForgotPassword,
            (ViewState::SignUp, Nav::BackToLogin) => ViewState::Login,
            (ViewState::ForgotPassword, Nav::BackToLogin) => ViewState::Login,
            (ViewState::Dashboard, Nav::OpenRegistration(kind)) => {
                ViewState::RegisterProvider(kind)
            }
            (ViewState::Dashboard, Nav::OpenDirectory) => ViewState::Directory,
            (ViewState::RegisterProvider(_), Nav::BackToDashboard) => ViewState::Dashboard,
            (ViewState::Directory, Nav::BackToDashboard) => ViewState::Dashboard,
            (current, nav) => {
                debug!(?current, ?nav, "refused navigation request");
                return false;
            }
        };

        if next.requires_session() && !session_present {
            debug!(?next, "refused navigation: no session");
            return false;
        }

        self.current = next;
        true
    }

    /// Session became present: unauthenticated screens promote to the
    /// dashboard, authenticated ones stay where they are.
    pub fn session_established(&mut self) {
        if !self.current.requires_session() {
            self.current = ViewState::Dashboard;
        }
    }

    /// Session became absent: preempts everything, back to the login screen.
    pub fn session_lost(&mut self) {
        self.current = ViewState::Login;
    }
}
