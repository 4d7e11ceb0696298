use std::fs;

use jicket::processed_mail::{Correlation, ProcessedMail};
use jicket::ticket_id::TicketIdCodec;

const TICKET_ADDRESS: &str = "tickets@example.com";

fn default_codec() -> TicketIdCodec {
    TicketIdCodec::new(
        "JicketSalt",
        "ABCDEFGHIJKLMNOPQRSTUVWXYZ1234567890",
        6,
        "JI-",
    )
    .expect("default codec config should be valid")
}

#[test]
fn test_threadstarter_email_is_recognized() {
    // Load test email file
    let email_content = fs::read("data_test/threadstarter.eml")
        .expect("Failed to read test email file data_test/threadstarter.eml");

    let mail = ProcessedMail::parse(11, &email_content);
    let (identity, correlation) = mail
        .correlate(TICKET_ADDRESS, &default_codec())
        .expect("correlation should succeed");

    println!("📧 Threadstarter token: {}", identity.token);

    // The confirmation email carries its own token back
    assert_eq!(identity.token, "AB12CD");
    assert_eq!(identity.prefixed, "JI-AB12CD");

    // And must never be mistaken for a genuine reply
    assert_eq!(correlation, Correlation::Threadstarter);
}

#[test]
fn test_reply_email_reattaches_to_ticket() {
    let email_content = fs::read("data_test/reply.eml")
        .expect("Failed to read test email file data_test/reply.eml");

    let mail = ProcessedMail::parse(12, &email_content);
    let (identity, correlation) = mail
        .correlate(TICKET_ADDRESS, &default_codec())
        .expect("correlation should succeed");

    println!("📧 Reply token: {} ({:?})", identity.token, correlation);

    // Token recovered from the subject line, not minted from the UID
    assert_eq!(identity.token, "AB12CD");
    assert_eq!(correlation, Correlation::Reply);

    // The body reaches the tracker as plain text
    let body = mail.body_text();
    assert!(body.contains("still broken"), "unexpected body: {}", body);
}

#[test]
fn test_new_email_starts_a_ticket() {
    let email_content = fs::read("data_test/new_ticket.eml")
        .expect("Failed to read test email file data_test/new_ticket.eml");

    let codec = default_codec();
    let mail = ProcessedMail::parse(42, &email_content);
    let (identity, correlation) = mail
        .correlate(TICKET_ADDRESS, &codec)
        .expect("correlation should succeed");

    println!("📧 Fresh token: {}", identity.token);

    assert_eq!(correlation, Correlation::NewTicket);
    assert_eq!(identity.sequence, 42);

    // The minted token round-trips so every later cycle re-derives it
    assert_eq!(codec.decode(&identity.token).expect("decode"), 42);
    assert!(identity.token.len() >= 6);

    // text/plain wins over the text/html sibling
    let body = mail.body_text();
    assert!(body.contains("second floor"));
    assert!(!body.contains("<p>"), "html leaked into body: {}", body);

    // Cc addresses are kept for the confirmation email
    assert_eq!(mail.cc_addrs.len(), 1);
    assert!(mail.cc_addrs[0].contains("erika@customer.example.com"));
}

#[test]
fn test_correlating_twice_gives_identical_results() {
    let email_content = fs::read("data_test/reply.eml").expect("Failed to read test email file");

    let codec = default_codec();
    let mail = ProcessedMail::parse(12, &email_content);

    let first = mail.correlate(TICKET_ADDRESS, &codec).expect("first run");
    let second = mail.correlate(TICKET_ADDRESS, &codec).expect("second run");
    assert_eq!(first, second);
}
