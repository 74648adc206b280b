//! Per-user submission state machine.
//!
//! `Session::apply` is pure: it computes the next session or explains why the
//! trigger does not apply. Persisting the result (compare-and-set on the previous
//! state) and all side effects belong to the pipeline.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Offer, OfferId, UserId, UserProfile};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserState {
    Neutral,
    AwaitingEmail,
    AwaitingPayment,
    AwaitingContent,
    AwaitingConfirmation,
    AwaitingModeration,
    Banned,
}

impl UserState {
    pub const ALL: [UserState; 7] = [
        UserState::Neutral,
        UserState::AwaitingEmail,
        UserState::AwaitingPayment,
        UserState::AwaitingContent,
        UserState::AwaitingConfirmation,
        UserState::AwaitingModeration,
        UserState::Banned,
    ];

    /// Persisted representation.
    pub fn as_str(self) -> &'static str {
        match self {
            UserState::Neutral => "none",
            UserState::AwaitingEmail => "waiting_email",
            UserState::AwaitingPayment => "waiting_payment",
            UserState::AwaitingContent => "waiting_content",
            UserState::AwaitingConfirmation => "waiting_confirm",
            UserState::AwaitingModeration => "waiting_moderation",
            UserState::Banned => "banned",
        }
    }

    /// States in which the session must reference an offer.
    pub fn requires_offer(self) -> bool {
        matches!(
            self,
            UserState::AwaitingEmail
                | UserState::AwaitingPayment
                | UserState::AwaitingContent
                | UserState::AwaitingConfirmation
                | UserState::AwaitingModeration
        )
    }

    /// A paid submission is in flight; switching offers would drop the credit.
    pub fn holds_payment(self) -> bool {
        matches!(
            self,
            UserState::AwaitingContent
                | UserState::AwaitingConfirmation
                | UserState::AwaitingModeration
        )
    }
}

impl fmt::Display for UserState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized user state: {0:?}")]
pub struct UnknownState(pub String);

impl FromStr for UserState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UserState::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| UnknownState(s.to_string()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub user_id: UserId,
    pub state: UserState,
    pub offer_id: Option<OfferId>,
    pub paid_at: Option<DateTime<Utc>>,
    pub email: Option<String>,
    pub email_declined: bool,
    pub banned_at: Option<DateTime<Utc>>,
    pub ban_reason: Option<String>,
    pub profile: UserProfile,
}

impl Session {
    pub fn new(user_id: UserId, profile: UserProfile) -> Self {
        Self {
            user_id,
            state: UserState::Neutral,
            offer_id: None,
            paid_at: None,
            email: None,
            email_declined: false,
            banned_at: None,
            ban_reason: None,
            profile,
        }
    }

    /// Offer reference is present in every state that needs one; banned sessions hold none.
    pub fn invariant_holds(&self) -> bool {
        match self.state {
            UserState::Banned => self.offer_id.is_none(),
            st if st.requires_offer() => self.offer_id.is_some(),
            _ => true,
        }
    }

    pub fn apply(
        &self,
        trigger: Trigger<'_>,
        now: DateTime<Utc>,
    ) -> Result<Session, TransitionError> {
        if self.state == UserState::Banned && !matches!(trigger, Trigger::Ban { .. }) {
            return Err(TransitionError::Banned);
        }

        let mut next = self.clone();
        match trigger {
            Trigger::SelectOffer(offer) => {
                if !offer.active {
                    return Err(TransitionError::OfferInactive(offer.id));
                }
                if self.state.holds_payment() {
                    return Err(self.unexpected(&[
                        UserState::Neutral,
                        UserState::AwaitingEmail,
                        UserState::AwaitingPayment,
                    ]));
                }
                next.offer_id = Some(offer.id);
                next.state = if self.email.is_some() || self.email_declined {
                    UserState::Neutral
                } else {
                    UserState::AwaitingEmail
                };
            }
            Trigger::SupplyEmail(raw) => {
                self.expect(&[UserState::AwaitingEmail])?;
                let email = raw.trim();
                if !is_valid_email(email) {
                    return Err(TransitionError::InvalidEmail);
                }
                next.email = Some(email.to_string());
                next.state = UserState::Neutral;
            }
            Trigger::DeclineEmail(offer_id) => {
                self.expect(&[UserState::AwaitingEmail])?;
                next.email_declined = true;
                next.offer_id = Some(offer_id);
                next.state = UserState::Neutral;
            }
            Trigger::RequestPayment(offer_id) => {
                self.expect(&[
                    UserState::Neutral,
                    UserState::AwaitingEmail,
                    UserState::AwaitingPayment,
                ])?;
                next.offer_id = Some(offer_id);
                next.state = UserState::AwaitingPayment;
            }
            Trigger::PaymentConfirmed(offer_id) => {
                next.offer_id = Some(offer_id);
                next.paid_at = Some(now);
                next.state = UserState::AwaitingContent;
            }
            Trigger::SubmitContent { payment_window } => {
                self.expect(&[UserState::AwaitingContent])?;
                if let Some(paid_at) = self.paid_at {
                    if now - paid_at > payment_window {
                        return Err(TransitionError::PaymentExpired);
                    }
                }
                next.state = UserState::AwaitingConfirmation;
            }
            Trigger::Confirm {
                moderation_required,
            } => {
                self.expect(&[UserState::AwaitingConfirmation])?;
                if moderation_required {
                    next.state = UserState::AwaitingModeration;
                } else {
                    next.clear_offer();
                }
            }
            Trigger::Reload => {
                self.expect(&[UserState::AwaitingConfirmation])?;
                next.state = UserState::AwaitingContent;
            }
            Trigger::ModeratorReject => {
                self.expect(&[UserState::AwaitingModeration])?;
                // The payment credit survives a rejection with a fresh window.
                next.paid_at = Some(now);
                next.state = UserState::AwaitingContent;
            }
            Trigger::ModeratorAccept => {
                self.expect(&[UserState::AwaitingModeration])?;
                next.clear_offer();
            }
            Trigger::Reset => {
                next.clear_offer();
            }
            Trigger::Ban { reason } => {
                next.offer_id = None;
                next.paid_at = None;
                next.banned_at = Some(now);
                next.ban_reason = Some(reason.to_string());
                next.state = UserState::Banned;
            }
        }

        if next.offer_id.is_none() && next.state.requires_offer() {
            return Err(TransitionError::MissingOffer);
        }
        Ok(next)
    }

    fn clear_offer(&mut self) {
        self.offer_id = None;
        self.paid_at = None;
        self.state = UserState::Neutral;
    }

    fn expect(&self, allowed: &'static [UserState]) -> Result<(), TransitionError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(self.unexpected(allowed))
        }
    }

    fn unexpected(&self, allowed: &'static [UserState]) -> TransitionError {
        TransitionError::UnexpectedState {
            expected: allowed,
            actual: self.state,
        }
    }
}

/// Everything that can move a session.
#[derive(Clone, Copy, Debug)]
pub enum Trigger<'a> {
    SelectOffer(&'a Offer),
    SupplyEmail(&'a str),
    DeclineEmail(OfferId),
    RequestPayment(OfferId),
    PaymentConfirmed(OfferId),
    SubmitContent { payment_window: Duration },
    Confirm { moderation_required: bool },
    Reload,
    ModeratorReject,
    ModeratorAccept,
    Reset,
    Ban { reason: &'a str },
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("session is banned")]
    Banned,
    #[error("session is {actual}, expected one of {expected:?}")]
    UnexpectedState {
        expected: &'static [UserState],
        actual: UserState,
    },
    #[error("offer {0:?} is not active")]
    OfferInactive(OfferId),
    #[error("invalid email format")]
    InvalidEmail,
    #[error("payment window has passed")]
    PaymentExpired,
    #[error("no offer selected")]
    MissingOffer,
}

/// Permissive shape check: `local@domain.tld`.
pub fn is_valid_email(email: &str) -> bool {
    if email.len() < 5 || email.len() > 254 || email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some(at) = email.find('@') else {
        return false;
    };
    let Some(dot) = email.rfind('.') else {
        return false;
    };
    at > 0 && dot > at + 1 && dot < email.len() - 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChatId, ThreadId};
    use proptest::prelude::*;

    fn offer(id: i64, active: bool) -> Offer {
        Offer {
            id: OfferId(id),
            group_id: ChatId(-100),
            thread_id: ThreadId(5),
            title: "Services".into(),
            price: 50_000,
            duration_days: 7,
            max_photos: 5,
            max_text_len: 1000,
            moderation_required: false,
            active,
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn fresh() -> Session {
        Session::new(UserId(42), UserProfile::default())
    }

    #[test]
    fn persisted_names_round_trip_and_unknown_is_rejected() {
        for st in UserState::ALL {
            assert_eq!(st.as_str().parse::<UserState>().unwrap(), st);
        }
        assert_eq!(
            "waiting_something".parse::<UserState>(),
            Err(UnknownState("waiting_something".into()))
        );
    }

    #[test]
    fn email_shape_check() {
        assert!(is_valid_email("a@b.co"));
        assert!(is_valid_email("first.last@mail.example.org"));
        assert!(!is_valid_email("@b.co"));
        assert!(!is_valid_email("ab.co"));
        assert!(!is_valid_email("a@.co"));
        assert!(!is_valid_email("a@bco."));
        assert!(!is_valid_email("a b@c.de"));
    }

    #[test]
    fn select_offer_asks_for_email_only_once() {
        let o = offer(1, true);
        let s = fresh().apply(Trigger::SelectOffer(&o), now()).unwrap();
        assert_eq!(s.state, UserState::AwaitingEmail);
        assert_eq!(s.offer_id, Some(OfferId(1)));

        let s = s.apply(Trigger::DeclineEmail(OfferId(1)), now()).unwrap();
        assert_eq!(s.state, UserState::Neutral);
        assert!(s.email_declined);

        let s = s.apply(Trigger::SelectOffer(&o), now()).unwrap();
        assert_eq!(s.state, UserState::Neutral);
    }

    #[test]
    fn invalid_email_keeps_waiting() {
        let o = offer(1, true);
        let s = fresh().apply(Trigger::SelectOffer(&o), now()).unwrap();
        assert_eq!(
            s.apply(Trigger::SupplyEmail("nope"), now()),
            Err(TransitionError::InvalidEmail)
        );
        let s = s.apply(Trigger::SupplyEmail(" me@site.org "), now()).unwrap();
        assert_eq!(s.email.as_deref(), Some("me@site.org"));
        assert_eq!(s.state, UserState::Neutral);
    }

    #[test]
    fn inactive_offer_cannot_be_selected() {
        let o = offer(3, false);
        assert_eq!(
            fresh().apply(Trigger::SelectOffer(&o), now()),
            Err(TransitionError::OfferInactive(OfferId(3)))
        );
    }

    #[test]
    fn content_after_payment_window_is_refused() {
        let paid = now() - Duration::hours(25);
        let mut s = fresh();
        s = s.apply(Trigger::RequestPayment(OfferId(1)), paid).unwrap();
        s = s.apply(Trigger::PaymentConfirmed(OfferId(1)), paid).unwrap();
        assert_eq!(
            s.apply(
                Trigger::SubmitContent {
                    payment_window: Duration::hours(24)
                },
                now()
            ),
            Err(TransitionError::PaymentExpired)
        );

        let reset = s.apply(Trigger::Reset, now()).unwrap();
        assert_eq!(reset.state, UserState::Neutral);
        assert_eq!(reset.offer_id, None);
        assert_eq!(reset.paid_at, None);
    }

    #[test]
    fn confirm_routes_by_moderation_flag() {
        let mut s = fresh();
        s = s.apply(Trigger::PaymentConfirmed(OfferId(1)), now()).unwrap();
        s = s
            .apply(
                Trigger::SubmitContent {
                    payment_window: Duration::hours(24),
                },
                now(),
            )
            .unwrap();

        let published = s
            .apply(
                Trigger::Confirm {
                    moderation_required: false,
                },
                now(),
            )
            .unwrap();
        assert_eq!(published.state, UserState::Neutral);
        assert_eq!(published.offer_id, None);

        let queued = s
            .apply(
                Trigger::Confirm {
                    moderation_required: true,
                },
                now(),
            )
            .unwrap();
        assert_eq!(queued.state, UserState::AwaitingModeration);
        assert_eq!(queued.offer_id, Some(OfferId(1)));

        // A second confirm on the already-moved session is stale.
        assert!(matches!(
            published.apply(Trigger::Confirm { moderation_required: false }, now()),
            Err(TransitionError::UnexpectedState { actual: UserState::Neutral, .. })
        ));
    }

    #[test]
    fn reject_keeps_payment_credit() {
        let mut s = fresh();
        s.state = UserState::AwaitingModeration;
        s.offer_id = Some(OfferId(9));
        s.paid_at = Some(now() - Duration::days(3));

        let s = s.apply(Trigger::ModeratorReject, now()).unwrap();
        assert_eq!(s.state, UserState::AwaitingContent);
        assert_eq!(s.offer_id, Some(OfferId(9)));
        assert_eq!(s.paid_at, Some(now()));
    }

    #[test]
    fn banned_is_terminal() {
        let s = fresh().apply(Trigger::Ban { reason: "spam" }, now()).unwrap();
        assert_eq!(s.state, UserState::Banned);
        assert_eq!(s.ban_reason.as_deref(), Some("spam"));
        assert_eq!(s.apply(Trigger::Reset, now()), Err(TransitionError::Banned));
        assert_eq!(
            s.apply(Trigger::PaymentConfirmed(OfferId(1)), now()),
            Err(TransitionError::Banned)
        );
    }

    #[test]
    fn paid_session_cannot_switch_offers() {
        let mut s = fresh();
        s = s.apply(Trigger::PaymentConfirmed(OfferId(1)), now()).unwrap();
        let other = offer(2, true);
        assert!(matches!(
            s.apply(Trigger::SelectOffer(&other), now()),
            Err(TransitionError::UnexpectedState { .. })
        ));
    }

    fn any_step() -> impl Strategy<Value = (u8, usize, bool)> {
        (0u8..12, 0usize..2, any::<bool>())
    }

    proptest! {
        #[test]
        fn offer_reference_invariant_holds(steps in proptest::collection::vec(any_step(), 0..64)) {
            let offers = [offer(1, true), offer(2, false)];
            let mut s = fresh();
            let mut t = now();
            for (kind, idx, flag) in steps {
                t += Duration::hours(3);
                let o = &offers[idx];
                let trigger = match kind {
                    0 => Trigger::SelectOffer(o),
                    1 => Trigger::SupplyEmail(if flag { "me@site.org" } else { "bad" }),
                    2 => Trigger::DeclineEmail(o.id),
                    3 => Trigger::RequestPayment(o.id),
                    4 => Trigger::PaymentConfirmed(o.id),
                    5 => Trigger::SubmitContent { payment_window: Duration::hours(24) },
                    6 => Trigger::Confirm { moderation_required: flag },
                    7 => Trigger::Reload,
                    8 => Trigger::ModeratorReject,
                    9 => Trigger::ModeratorAccept,
                    10 => Trigger::Reset,
                    _ => if flag { Trigger::Ban { reason: "spam" } } else { Trigger::Reset },
                };
                if let Ok(next) = s.apply(trigger, t) {
                    s = next;
                }
                prop_assert!(s.invariant_holds(), "broken invariant: {:?}", s);
            }
        }
    }
}
