//! Registration manager (RFC 3261 section 10)
//!
//! Keeps one binding alive on the registrar. Refreshes are scheduled at a fraction of the
//! effective expiry, failures are reported once and never retried automatically.

use crate::account::Account;
use crate::agent::{AgentTimer, Ctx, Owner};
use crate::dialog::ALLOWED_METHODS;
use crate::directory::RegistrationSnapshot;
use crate::event::{Event, Failure, RegistrationState};
use crate::util::{random_sequence_number, random_string};
use crate::AgentError;
use sip_auth::{ClientAuthenticator, DigestAuthenticator, RequestParts, ResponseParts};
use sip_core::timer::TimerId;
use sip_core::{Request, Response, TsxKey};
use sip_types::header::typed::{CSeq, CallID, Contact, Expires, FromTo, MinExpires};
use sip_types::uri::{NameAddr, SipUri};
use sip_types::{CodeKind, Method, Name, StatusCode};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Purpose {
    Register,
    Unregister,
}

#[derive(Debug)]
struct Pending {
    key: TsxKey,
    purpose: Purpose,
    /// Sent request without `Via`, kept to answer authentication challenges
    request: Request,
    auth_retried: bool,
    interval_retried: bool,
}

pub(crate) struct Registration {
    state: RegistrationState,

    registrar: SipUri,
    from: FromTo,
    to: FromTo,
    call_id: CallID,
    cseq: u32,
    target: SocketAddr,

    /// Expiry asked for, raised by `423 Interval Too Brief`
    requested: Duration,
    refresh_fraction: f64,
    expires_at: Option<Instant>,
    refresh: Option<TimerId>,
    /// The registrar accepted a binding which was not removed since, it may still hold it
    /// after a failed refresh
    bound: bool,

    pending: Option<Pending>,
    authenticator: DigestAuthenticator,
    last_failure: Option<Failure>,
}

impl Registration {
    pub(crate) fn new(
        account: &Account,
        refresh_fraction: f64,
        target: SocketAddr,
    ) -> Result<Self, AgentError> {
        let aor = account.aor()?;

        Ok(Self {
            state: RegistrationState::Unregistered,
            registrar: account.registrar()?,
            from: FromTo::new(account.identity()?, Some(random_string())),
            to: FromTo::new(NameAddr::uri(aor), None),
            call_id: CallID::new(random_string()),
            cseq: random_sequence_number(),
            target,
            requested: account.registration_interval,
            refresh_fraction,
            expires_at: None,
            refresh: None,
            bound: false,
            pending: None,
            authenticator: DigestAuthenticator::new(account.credentials()),
            last_failure: None,
        })
    }

    pub(crate) fn state(&self) -> RegistrationState {
        self.state
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    pub(crate) fn snapshot(&self) -> RegistrationSnapshot {
        RegistrationSnapshot {
            state: self.state,
            expires_at: self.expires_at,
            last_failure: self.last_failure.clone(),
        }
    }

    pub(crate) fn set_password(&mut self, account: &Account) {
        self.authenticator
            .set_default_credentials(account.digest_user());
    }

    /// Register now, or renew an existing binding
    pub(crate) fn register(&mut self, ctx: &mut Ctx<'_>) {
        match self.state {
            RegistrationState::Registering | RegistrationState::Refreshing => {
                log::debug!("registration already in progress");
                return;
            }
            RegistrationState::Registered => {
                self.state = RegistrationState::Refreshing;
            }
            RegistrationState::Unregistered
            | RegistrationState::Unregistering
            | RegistrationState::Failed => {
                self.state = RegistrationState::Registering;
            }
        }

        self.cancel_refresh(ctx);
        self.last_failure = None;

        ctx.emit(Event::WillRegister);

        self.send(ctx, Purpose::Register, self.requested, false, false);
    }

    /// Remove the binding. Does nothing if there is none.
    pub(crate) fn unregister(&mut self, ctx: &mut Ctx<'_>) {
        match self.state {
            RegistrationState::Unregistered | RegistrationState::Unregistering => {
                log::debug!("unregister in state {:?} is a no-op", self.state);
                return;
            }
            RegistrationState::Failed if !self.bound => {
                log::debug!("registration failed without binding, nothing to remove");

                ctx.emit(Event::WillUnregister);
                self.unregistered(ctx);
                return;
            }
            RegistrationState::Failed
            | RegistrationState::Registering
            | RegistrationState::Registered
            | RegistrationState::Refreshing => {}
        }

        self.cancel_refresh(ctx);
        self.state = RegistrationState::Unregistering;

        ctx.emit(Event::WillUnregister);

        self.send(ctx, Purpose::Unregister, Duration::ZERO, false, false);
    }

    /// The refresh timer fired
    pub(crate) fn refresh_due(&mut self, ctx: &mut Ctx<'_>) {
        self.refresh = None;

        if self.state == RegistrationState::Registered {
            log::debug!("refreshing registration");
            self.register(ctx);
        }
    }

    /// The connection carrying the binding is gone, the registrar may drop it at any time
    pub(crate) fn connection_lost(&mut self, ctx: &mut Ctx<'_>, failure: Failure) {
        if self.state == RegistrationState::Registered {
            self.fail(ctx, failure);
        }
    }

    fn send(
        &mut self,
        ctx: &mut Ctx<'_>,
        purpose: Purpose,
        expires: Duration,
        auth_retried: bool,
        interval_retried: bool,
    ) {
        let mut request = Request::new(Method::REGISTER, self.registrar.clone());

        self.cseq += 1;

        request.headers.insert(Name::MAX_FORWARDS, "70");
        request.headers.insert_type(Name::FROM, &self.from);
        request.headers.insert_type(Name::TO, &self.to);
        request.headers.insert_named(&self.call_id);
        request
            .headers
            .insert_named(&CSeq::new(self.cseq, Method::REGISTER));
        request.headers.insert_named(ctx.contact);
        request
            .headers
            .insert_named(&Expires(
                u32::try_from(expires.as_secs()).unwrap_or(u32::MAX),
            ));
        request.headers.insert(Name::ALLOW, ALLOWED_METHODS);

        self.authenticator.authorize_request(&mut request.headers);

        let key = ctx.send(request.clone(), self.target, Owner::Registration);

        self.pending = Some(Pending {
            key,
            purpose,
            request,
            auth_retried,
            interval_retried,
        });
    }

    pub(crate) fn receive_response(&mut self, ctx: &mut Ctx<'_>, key: &TsxKey, response: Response) {
        let Some(pending) = self.pending.take_if(|pending| pending.key == *key) else {
            log::debug!("{key}: ignoring response of an abandoned REGISTER");
            return;
        };

        let code = response.code();

        match code.kind() {
            CodeKind::Provisional => {
                self.pending = Some(pending);
            }
            CodeKind::Success => match pending.purpose {
                Purpose::Register => self.registered(ctx, &response),
                Purpose::Unregister => self.unregistered(ctx),
            },
            _ if code == StatusCode::UNAUTHORIZED
                || code == StatusCode::PROXY_AUTHENTICATION_REQUIRED =>
            {
                self.challenged(ctx, pending, &response);
            }
            _ if code == StatusCode::INTERVAL_TOO_BRIEF
                && pending.purpose == Purpose::Register
                && !pending.interval_retried =>
            {
                match response.headers.get_named::<MinExpires>() {
                    Ok(MinExpires(min)) => {
                        log::info!("registrar demands an expiry of at least {min}s");

                        self.requested = self.requested.max(Duration::from_secs(min.into()));

                        self.send(
                            ctx,
                            Purpose::Register,
                            self.requested,
                            pending.auth_retried,
                            true,
                        );
                    }
                    Err(e) => {
                        log::warn!("423 without usable Min-Expires, {e}");
                        self.rejected(ctx, pending.purpose, &response);
                    }
                }
            }
            _ => self.rejected(ctx, pending.purpose, &response),
        }
    }

    pub(crate) fn transaction_failed(&mut self, ctx: &mut Ctx<'_>, key: &TsxKey, failure: Failure) {
        let Some(pending) = self.pending.take_if(|pending| pending.key == *key) else {
            return;
        };

        match pending.purpose {
            Purpose::Register => self.fail(ctx, failure),
            // the binding will expire on its own
            Purpose::Unregister => self.unregistered(ctx),
        }
    }

    fn challenged(&mut self, ctx: &mut Ctx<'_>, pending: Pending, response: &Response) {
        let failure = if pending.auth_retried {
            log::warn!("credentials were refused");
            Failure::AuthenticationFailed
        } else {
            let result = self.authenticator.handle_rejection(
                RequestParts {
                    line: &pending.request.line,
                    headers: &pending.request.headers,
                    body: &pending.request.body,
                },
                ResponseParts {
                    line: &response.line,
                    headers: &response.headers,
                    body: &response.body,
                },
            );

            match result {
                Ok(()) => {
                    let expires = match pending.purpose {
                        Purpose::Register => self.requested,
                        Purpose::Unregister => Duration::ZERO,
                    };

                    self.send(ctx, pending.purpose, expires, true, pending.interval_retried);
                    return;
                }
                Err(e) => {
                    log::warn!("failed to answer authentication challenge, {e}");
                    Failure::AuthenticationFailed
                }
            }
        };

        match pending.purpose {
            Purpose::Register => self.fail(ctx, failure),
            Purpose::Unregister => self.unregistered(ctx),
        }
    }

    fn rejected(&mut self, ctx: &mut Ctx<'_>, purpose: Purpose, response: &Response) {
        match purpose {
            Purpose::Register => self.fail(
                ctx,
                Failure::Rejected {
                    code: response.code(),
                    reason: response.line.reason.as_ref().map(|r| r.to_string()),
                },
            ),
            Purpose::Unregister => self.unregistered(ctx),
        }
    }

    fn registered(&mut self, ctx: &mut Ctx<'_>, response: &Response) {
        let granted = granted_expiry(response, ctx.contact).unwrap_or(self.requested);
        let expires = if granted.is_zero() {
            self.requested
        } else {
            granted.min(self.requested)
        };

        let refresh_in = expires.mul_f64(self.refresh_fraction);

        log::info!(
            "registered for {}s, refreshing in {}s",
            expires.as_secs(),
            refresh_in.as_secs()
        );

        self.state = RegistrationState::Registered;
        self.bound = true;
        self.expires_at = Some(ctx.now + expires);
        self.refresh = Some(
            ctx.timers
                .insert(ctx.now + refresh_in, AgentTimer::RegistrationRefresh),
        );

        ctx.emit(Event::DidRegister { expires });
    }

    fn unregistered(&mut self, ctx: &mut Ctx<'_>) {
        self.state = RegistrationState::Unregistered;
        self.bound = false;
        self.expires_at = None;
        self.authenticator.reset();

        ctx.emit(Event::DidUnregister);
    }

    fn fail(&mut self, ctx: &mut Ctx<'_>, failure: Failure) {
        log::warn!("registration failed, {failure}");

        self.cancel_refresh(ctx);
        self.state = RegistrationState::Failed;
        self.expires_at = None;
        self.pending = None;
        self.last_failure = Some(failure.clone());

        ctx.emit(Event::FailedRegister { failure });
    }

    fn cancel_refresh(&mut self, ctx: &mut Ctx<'_>) {
        if let Some(id) = self.refresh.take() {
            ctx.timers.cancel(id);
        }
    }
}

/// Expiry the registrar granted to `contact`, from its Contact parameter or the Expires header
fn granted_expiry(response: &Response, contact: &Contact) -> Option<Duration> {
    let contacts = response
        .headers
        .get_all_named::<Contact>()
        .unwrap_or_default();

    let ours = contacts
        .iter()
        .find(|c| c.uri.uri.compare(&contact.uri.uri))
        .or(contacts.first());

    let seconds = match ours.and_then(Contact::expires) {
        Some(seconds) => seconds,
        None => response.headers.get_named::<Expires>().ok()?.0,
    };

    Some(Duration::from_secs(seconds.into()))
}
