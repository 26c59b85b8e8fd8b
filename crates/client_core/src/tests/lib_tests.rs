use super::*;
use shared::domain::{ProviderKind, UserId};
use std::{sync::atomic::AtomicUsize, time::Duration};
use tokio::sync::Notify;
use uuid::Uuid;

const RESET_REDIRECT: &str = "https://app.example.com/reset-password";

fn test_session(email: &str) -> Session {
    Session {
        user_id: UserId(Uuid::new_v4()),
        email: email.to_string(),
        access_token: "at-test".to_string(),
        refresh_token: None,
        expires_at: None,
    }
}

fn maid(name: &str, city: &str, area: &str) -> ProviderSubmission {
    ProviderSubmission {
        name: name.to_string(),
        phone_number: "01001234567".to_string(),
        city: city.to_string(),
        area: area.to_string(),
        rating: 4,
        photo: None,
    }
}

struct StubBackend {
    changes: broadcast::Sender<AuthChange>,
    sign_in_result: Mutex<Result<Session, ProviderError>>,
    sign_out_result: Mutex<Result<(), ProviderError>>,
    resume_session: Mutex<Option<Session>>,
    sign_in_calls: AtomicUsize,
    gate: Option<Arc<Notify>>,
}

impl StubBackend {
    fn new() -> Self {
        let (changes, _) = broadcast::channel(16);
        Self {
            changes,
            sign_in_result: Mutex::new(Err(ProviderError::new(
                ProviderErrorCode::Internal,
                "sign-in result not configured",
            ))),
            sign_out_result: Mutex::new(Ok(())),
            resume_session: Mutex::new(None),
            sign_in_calls: AtomicUsize::new(0),
            gate: None,
        }
    }

    fn accepting(email: &str) -> Self {
        let stub = Self::new();
        *lock(&stub.sign_in_result) = Ok(test_session(email));
        stub
    }

    fn rejecting(code: ProviderErrorCode, message: &str) -> Self {
        let stub = Self::new();
        *lock(&stub.sign_in_result) = Err(ProviderError::new(code, message));
        stub
    }

    fn gated(email: &str, gate: Arc<Notify>) -> Self {
        let mut stub = Self::accepting(email);
        stub.gate = Some(gate);
        stub
    }

    fn with_resumed(email: &str) -> Self {
        let stub = Self::new();
        *lock(&stub.resume_session) = Some(test_session(email));
        stub
    }

    fn emit(&self, change: AuthChange) {
        let _ = self.changes.send(change);
    }

    fn calls(&self) -> usize {
        self.sign_in_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityBackend for StubBackend {
    async fn sign_in_with_password(
        &self,
        _email: &str,
        _password: &str,
    ) -> Result<Session, ProviderError> {
        self.sign_in_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let result = lock(&self.sign_in_result).clone();
        if let Ok(session) = &result {
            self.emit(AuthChange::SignedIn(session.clone()));
        }
        result
    }

    async fn sign_up(
        &self,
        _email: &str,
        _password: &str,
        _profile: SignUpProfile,
    ) -> Result<Option<Session>, ProviderError> {
        Ok(None)
    }

    async fn reset_password_for_email(
        &self,
        _email: &str,
        _redirect_to: &str,
    ) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        lock(&self.sign_out_result).clone()
    }

    async fn get_session(&self) -> Option<Session> {
        lock(&self.resume_session).clone()
    }

    fn subscribe_changes(&self) -> broadcast::Receiver<AuthChange> {
        self.changes.subscribe()
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met within one second");
}

async fn signed_in_app() -> (
    Arc<StubBackend>,
    Arc<SessionController>,
    Arc<ServiceDirectory>,
) {
    let stub = Arc::new(StubBackend::accepting("ann@example.com"));
    let controller = SessionController::new(Arc::clone(&stub) as Arc<dyn IdentityBackend>);
    let app = ServiceDirectory::new(Arc::clone(&controller), RESET_REDIRECT);
    app.start().await;
    app.submit_sign_in("ann@example.com", "secret123")
        .await
        .expect("sign-in accepted");
    wait_until(|| app.view() == ViewState::Dashboard).await;
    (stub, controller, app)
}

#[tokio::test]
async fn local_validation_rejects_malformed_credentials() {
    let stub = Arc::new(StubBackend::accepting("ann@example.com"));
    let controller = SessionController::new(Arc::clone(&stub) as Arc<dyn IdentityBackend>);
    let app = ServiceDirectory::new(controller, RESET_REDIRECT);
    app.start().await;

    let err = app
        .submit_sign_in("no-at-sign", "secret123")
        .await
        .expect_err("must fail");
    assert_eq!(err, AuthError::InvalidCredentials);
    assert!(!err.to_string().is_empty());

    let err = app
        .submit_sign_in("ann@example.com", "short")
        .await
        .expect_err("must fail");
    assert_eq!(err, AuthError::InvalidCredentials);

    assert_eq!(stub.calls(), 0);
    assert_eq!(app.view(), ViewState::Login);
}

#[tokio::test]
async fn unconfigured_backend_surfaces_the_generic_message() {
    let controller =
        SessionController::new(Arc::new(MissingIdentityBackend::new()) as Arc<dyn IdentityBackend>);
    let app = ServiceDirectory::new(controller, RESET_REDIRECT);
    app.start().await;

    let err = app
        .submit_sign_in("ann@example.com", "secret123")
        .await
        .expect_err("must fail");
    assert_eq!(err, AuthError::Unexpected);
    assert_eq!(err.to_string(), "An unexpected error occurred");
    assert_eq!(app.view(), ViewState::Login);
}

#[tokio::test]
async fn provider_rejection_stays_on_login() {
    let stub = Arc::new(StubBackend::rejecting(
        ProviderErrorCode::InvalidCredentials,
        "Invalid login credentials",
    ));
    let controller = SessionController::new(Arc::clone(&stub) as Arc<dyn IdentityBackend>);
    let app = ServiceDirectory::new(Arc::clone(&controller), RESET_REDIRECT);
    app.start().await;

    let err = app
        .submit_sign_in("ann@example.com", "secret123")
        .await
        .expect_err("must fail");
    assert_eq!(err.to_string(), "Invalid email or password");

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(app.view(), ViewState::Login);
    assert!(controller.current_session().is_none());
}

#[tokio::test]
async fn successful_sign_in_promotes_to_dashboard() {
    let (_stub, controller, app) = signed_in_app().await;
    assert_eq!(app.view(), ViewState::Dashboard);
    let session = controller.current_session().expect("session present");
    assert_eq!(session.email, "ann@example.com");
}

#[tokio::test]
async fn startup_resume_promotes_before_first_render() {
    let stub = Arc::new(StubBackend::with_resumed("ann@example.com"));
    let controller = SessionController::new(Arc::clone(&stub) as Arc<dyn IdentityBackend>);
    let app = ServiceDirectory::new(Arc::clone(&controller), RESET_REDIRECT);

    assert_eq!(controller.session_state(), SessionState::Unknown);
    app.start().await;
    assert_eq!(app.view(), ViewState::Dashboard);
    assert!(controller.current_session().is_some());
}

#[tokio::test]
async fn startup_without_session_lands_on_login() {
    let stub = Arc::new(StubBackend::new());
    let controller = SessionController::new(Arc::clone(&stub) as Arc<dyn IdentityBackend>);
    let app = ServiceDirectory::new(Arc::clone(&controller), RESET_REDIRECT);

    app.start().await;
    assert_eq!(controller.session_state(), SessionState::Anonymous);
    assert_eq!(app.view(), ViewState::Login);
}

#[tokio::test]
async fn sign_out_clears_everything_even_when_the_backend_fails() {
    let (stub, controller, app) = signed_in_app().await;
    *lock(&stub.sign_out_result) = Err(ProviderError::new(
        ProviderErrorCode::Unavailable,
        "backend down",
    ));

    assert!(app.open_registration(ProviderKind::HouseMaid));
    app.submit_registration(ProviderKind::HouseMaid, maid("Ann", "Cairo", "Maadi"))
        .expect("registered");
    assert_eq!(app.provider_count(ProviderKind::HouseMaid), 1);

    app.sign_out().await;
    assert_eq!(app.view(), ViewState::Login);
    assert!(controller.current_session().is_none());
    assert_eq!(app.provider_count(ProviderKind::HouseMaid), 0);
}

#[tokio::test]
async fn registration_appends_one_record_and_returns_to_dashboard() {
    let (_stub, _controller, app) = signed_in_app().await;

    assert!(app.open_registration(ProviderKind::HouseMaid));
    let id = app
        .submit_registration(ProviderKind::HouseMaid, maid("Ann", "Cairo", "Maadi"))
        .expect("registered");

    assert_eq!(app.view(), ViewState::Dashboard);
    let maids = app.search_directory(ProviderKind::HouseMaid, "");
    assert_eq!(maids.len(), 1);
    assert_eq!(maids[0].id, id);
    assert_eq!(app.provider_count(ProviderKind::Carpenter), 0);
}

#[tokio::test]
async fn registration_requires_the_form_to_be_open() {
    let (_stub, _controller, app) = signed_in_app().await;

    let err = app
        .submit_registration(ProviderKind::HouseMaid, maid("Ann", "Cairo", "Maadi"))
        .expect_err("form is not open");
    assert_eq!(err, RegistrationError::FormNotOpen);
    assert_eq!(app.provider_count(ProviderKind::HouseMaid), 0);
}

#[tokio::test]
async fn directory_filtering_matches_the_product_behavior() {
    let (_stub, _controller, app) = signed_in_app().await;

    assert!(app.open_registration(ProviderKind::HouseMaid));
    app.submit_registration(ProviderKind::HouseMaid, maid("Ann", "Cairo", "Maadi"))
        .expect("registered");
    assert!(app.open_registration(ProviderKind::HouseMaid));
    app.submit_registration(ProviderKind::HouseMaid, maid("Bob", "Giza", "Haram"))
        .expect("registered");

    let hits = app.search_directory(ProviderKind::HouseMaid, "maa");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].name, "Ann");

    assert_eq!(app.search_directory(ProviderKind::HouseMaid, "").len(), 2);
    assert!(app
        .search_directory(ProviderKind::HouseMaid, "alexandria")
        .is_empty());
}

#[tokio::test]
async fn reentrant_submit_does_not_dispatch_twice() {
    let gate = Arc::new(Notify::new());
    let stub = Arc::new(StubBackend::gated("ann@example.com", Arc::clone(&gate)));
    let controller = SessionController::new(Arc::clone(&stub) as Arc<dyn IdentityBackend>);
    let app = ServiceDirectory::new(Arc::clone(&controller), RESET_REDIRECT);
    app.start().await;

    let first = {
        let app = Arc::clone(&app);
        tokio::spawn(async move { app.submit_sign_in("ann@example.com", "secret123").await })
    };
    wait_until(|| stub.calls() == 1).await;
    assert!(controller.is_busy());

    // Second click while the first call is still in flight.
    app.submit_sign_in("ann@example.com", "secret123")
        .await
        .expect("dropped silently");
    assert_eq!(stub.calls(), 1);

    gate.notify_one();
    first.await.expect("join").expect("sign-in result");
    wait_until(|| app.view() == ViewState::Dashboard).await;
    assert!(!controller.is_busy());
}

#[tokio::test]
async fn canceled_subscription_never_fires_again() {
    let stub = Arc::new(StubBackend::new());
    let controller = SessionController::new(Arc::clone(&stub) as Arc<dyn IdentityBackend>);

    let seen = Arc::new(AtomicUsize::new(0));
    let guard = {
        let seen = Arc::clone(&seen);
        controller.on_session_change(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
    };

    stub.emit(AuthChange::SignedIn(test_session("ann@example.com")));
    wait_until(|| seen.load(Ordering::SeqCst) == 1).await;

    guard.cancel();
    stub.emit(AuthChange::SignedOut);
    wait_until(|| controller.session_state() == SessionState::Anonymous).await;
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn new_registration_replaces_the_previous_one() {
    let stub = Arc::new(StubBackend::new());
    let controller = SessionController::new(Arc::clone(&stub) as Arc<dyn IdentityBackend>);

    let first_seen = Arc::new(AtomicUsize::new(0));
    let second_seen = Arc::new(AtomicUsize::new(0));

    let _first_guard = {
        let seen = Arc::clone(&first_seen);
        controller.on_session_change(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
    };
    let _second_guard = {
        let seen = Arc::clone(&second_seen);
        controller.on_session_change(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
    };

    stub.emit(AuthChange::SignedIn(test_session("ann@example.com")));
    wait_until(|| second_seen.load(Ordering::SeqCst) == 1).await;
    assert_eq!(first_seen.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn provider_driven_expiry_preempts_any_authenticated_view() {
    let (stub, controller, app) = signed_in_app().await;
    assert!(app.open_directory());

    stub.emit(AuthChange::SignedOut);
    wait_until(|| app.view() == ViewState::Login).await;
    assert!(controller.current_session().is_none());
}

#[tokio::test]
async fn signup_rejects_mismatched_confirm_password() {
    let stub = Arc::new(StubBackend::new());
    let controller = SessionController::new(Arc::clone(&stub) as Arc<dyn IdentityBackend>);
    let app = ServiceDirectory::new(controller, RESET_REDIRECT);
    app.start().await;
    assert!(app.open_sign_up());

    let form = SignUpForm {
        full_name: "Ann".to_string(),
        email: "ann@example.com".to_string(),
        password: "secret123".to_string(),
        confirm_password: "secret124".to_string(),
    };
    let err = app.submit_sign_up(&form).await.expect_err("must fail");
    assert_eq!(
        err,
        AuthError::Validation("Passwords do not match".to_string())
    );
    assert_eq!(app.view(), ViewState::SignUp);
}

#[tokio::test]
async fn successful_signup_returns_to_login() {
    let stub = Arc::new(StubBackend::new());
    let controller = SessionController::new(Arc::clone(&stub) as Arc<dyn IdentityBackend>);
    let app = ServiceDirectory::new(controller, RESET_REDIRECT);
    app.start().await;
    assert!(app.open_sign_up());

    let form = SignUpForm {
        full_name: "Ann".to_string(),
        email: "ann@example.com".to_string(),
        password: "secret123".to_string(),
        confirm_password: "secret123".to_string(),
    };
    app.submit_sign_up(&form).await.expect("accepted");
    assert_eq!(app.view(), ViewState::Login);
}

#[tokio::test]
async fn password_reset_validates_the_email_locally() {
    let stub = Arc::new(StubBackend::new());
    let controller = SessionController::new(Arc::clone(&stub) as Arc<dyn IdentityBackend>);
    let app = ServiceDirectory::new(controller, RESET_REDIRECT);
    app.start().await;
    assert!(app.open_forgot_password());

    let err = app
        .submit_password_reset("not-an-email")
        .await
        .expect_err("must fail");
    assert_eq!(
        err,
        AuthError::Validation("Please enter a valid email address".to_string())
    );

    app.submit_password_reset("ann@example.com")
        .await
        .expect("dispatched");
    // The success screen stays put until the user navigates back.
    assert_eq!(app.view(), ViewState::ForgotPassword);
    assert!(app.back_to_login());
    assert_eq!(app.view(), ViewState::Login);
}
