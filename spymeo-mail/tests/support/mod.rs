#![allow(dead_code)] // Test utility module - not all helpers are used by every test binary

pub mod mock_mailer;
pub mod mock_provider;

use spymeo_mail::EmailMessage;

/// A minimal valid message
pub fn message(to: &str) -> EmailMessage {
    EmailMessage::builder()
        .to(to)
        .from("SPYMEO <noreply@spymeo.fr>")
        .subject("Confirmation de rendez-vous")
        .html("<p>Votre rendez-vous est confirmé</p>")
        .build()
        .unwrap_or_else(|e| panic!("test message is valid: {e}"))
}
