//! The turn-based USSD menu.
//!
//! The aggregator posts the whole navigation history as one `*`-delimited
//! string; each turn re-parses it from the top. Parsing is separated from
//! acting: [`parse_navigation`] maps the string to a typed [`MenuAction`],
//! and the handler decides whether that action is a static reply or a
//! payment run.

use std::fmt::{Display, Formatter};

use serde::Deserialize;

/// One inbound USSD exchange as posted by the aggregator.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UssdRequest {
    /// Aggregator session identifier; stable across the session's turns.
    pub session_id: String,
    /// The dialed service code.
    pub service_code: String,
    /// The subscriber's phone number.
    pub phone_number: String,
    /// `*`-delimited navigation history; empty on the first turn.
    #[serde(default)]
    pub text: String,
}

/// A reply to one USSD exchange.
///
/// `Continue` keeps the session open; `End` terminates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UssdReply {
    /// Rendered with the `CON` prefix.
    Continue(String),
    /// Rendered with the `END` prefix.
    End(String),
}

impl Display for UssdReply {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Continue(text) => write!(f, "CON {text}"),
            Self::End(text) => write!(f, "END {text}"),
        }
    }
}

/// What the navigation string asks the gateway to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuAction {
    /// First turn: show the main menu.
    MainMenu,
    /// Ask for the recipient wallet identifier.
    PromptRecipient,
    /// Ask for the amount to send.
    PromptAmount,
    /// Confirm leaf reached: execute a payment.
    SendPayment {
        /// Recipient wallet identifier as typed by the subscriber.
        recipient: String,
        /// Amount in base units.
        amount: u128,
    },
    /// Leave the menu.
    Exit,
    /// Anything the menu does not offer.
    Invalid,
}

impl MenuAction {
    /// Returns the reply for actions that do not run a payment.
    #[must_use]
    pub fn static_reply(&self) -> Option<UssdReply> {
        match self {
            Self::MainMenu => Some(UssdReply::Continue(
                "Welcome to OpFlow\n1. Send payment\n2. Exit".to_owned(),
            )),
            Self::PromptRecipient => Some(UssdReply::Continue(
                "Enter recipient wallet address:".to_owned(),
            )),
            Self::PromptAmount => Some(UssdReply::Continue(
                "Enter amount to send (in base units):".to_owned(),
            )),
            Self::Exit => Some(UssdReply::End(
                "Thank you for using OpFlow. Goodbye!".to_owned(),
            )),
            Self::Invalid => Some(UssdReply::End(
                "Invalid input. Please try again.".to_owned(),
            )),
            Self::SendPayment { .. } => None,
        }
    }
}

/// Maps a navigation string to its action.
#[must_use]
pub fn parse_navigation(text: &str) -> MenuAction {
    if text.is_empty() {
        return MenuAction::MainMenu;
    }

    let steps: Vec<&str> = text.split('*').collect();
    match steps.as_slice() {
        ["1"] => MenuAction::PromptRecipient,
        ["1", recipient] => {
            if recipient.trim().is_empty() {
                MenuAction::Invalid
            } else {
                MenuAction::PromptAmount
            }
        }
        ["1", recipient, amount] => parse_payment(recipient, amount),
        ["2"] => MenuAction::Exit,
        _ => MenuAction::Invalid,
    }
}

/// Validates the confirm leaf's recipient and amount.
fn parse_payment(recipient: &str, amount: &str) -> MenuAction {
    let recipient = recipient.trim();
    if recipient.is_empty() {
        return MenuAction::Invalid;
    }
    match amount.trim().parse::<u128>() {
        Ok(amount) if amount > 0 => MenuAction::SendPayment {
            recipient: recipient.to_owned(),
            amount,
        },
        _ => MenuAction::Invalid,
    }
}
